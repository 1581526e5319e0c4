use anyhow::{Result, bail};
use std::process;

use crate::config::Config;
use nourish_core::models::{Goal, Units, UserProfile};
use nourish_core::onboarding;
use nourish_core::store::{self, SharedStore};

use super::helpers::{height_to_cm, json_error, weight_to_kg};
use super::{advisor, autosync};

/// Fields `profile set` may change. `None` keeps the current value.
#[derive(Debug, Default)]
pub(crate) struct ProfileUpdate {
    pub name: Option<String>,
    pub goal: Option<String>,
    pub activity: Option<String>,
    pub cuisine: Option<String>,
    pub height: Option<f64>,
    pub weight: Option<f64>,
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    pub water: Option<f64>,
}

impl ProfileUpdate {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.goal.is_none()
            && self.activity.is_none()
            && self.cuisine.is_none()
            && self.height.is_none()
            && self.weight.is_none()
            && self.calories.is_none()
            && self.protein.is_none()
            && self.carbs.is_none()
            && self.fat.is_none()
            && self.water.is_none()
    }

    /// Apply to `profile`, reading height and weight in `units`.
    fn apply(self, mut profile: UserProfile, units: Units) -> Result<UserProfile> {
        let numbers = [
            ("height", self.height),
            ("weight", self.weight),
            ("calories", self.calories),
            ("protein", self.protein),
            ("carbs", self.carbs),
            ("fat", self.fat),
            ("water", self.water),
        ];
        for (label, value) in numbers {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    bail!("{label} must be a non-negative number");
                }
            }
        }

        if let Some(name) = self.name {
            if name.trim().is_empty() {
                bail!("Name must not be empty");
            }
            profile.full_name = name.trim().to_string();
        }
        if let Some(goal) = self.goal {
            profile.goal = goal.parse::<Goal>()?;
        }
        if let Some(activity) = self.activity {
            profile.workout_frequency = activity;
        }
        if let Some(cuisine) = self.cuisine {
            profile.preferred_cuisine = cuisine;
        }
        if let Some(height) = self.height {
            profile.height = height_to_cm(units, height);
        }
        if let Some(weight) = self.weight {
            profile.weight = weight_to_kg(units, weight);
        }
        if let Some(calories) = self.calories {
            profile.daily_calories_target = calories;
        }
        if let Some(protein) = self.protein {
            profile.protein = protein;
        }
        if let Some(carbs) = self.carbs {
            profile.carbs = carbs;
        }
        if let Some(fat) = self.fat {
            profile.fat = fat;
        }
        if let Some(water) = self.water {
            profile.water_liters = water;
        }
        Ok(profile)
    }
}

pub(super) fn print_profile(profile: &UserProfile, units: Units) {
    println!("=== {} ===\n", profile.full_name);
    println!("  Age: {}  Gender: {}", profile.age, profile.gender);
    println!(
        "  Height: {}  Weight: {}",
        units.format_height(profile.height),
        units.format_weight(profile.weight)
    );
    println!("  Goal: {}  Activity: {}", profile.goal, profile.workout_frequency);
    println!("  Cuisine: {}", profile.preferred_cuisine);
    println!();
    let cal = profile.daily_calories_target;
    let p = profile.protein;
    let c = profile.carbs;
    let f = profile.fat;
    let water = profile.water_liters;
    println!("  TARGET: {cal:.0} kcal | P:{p:.0}g C:{c:.0}g F:{f:.0}g | Water: {water:.1} L");
    if let Some(strategy) = &profile.diet_strategy {
        println!("\n  Diet strategy:\n    {strategy}");
    }
    if let Some(plan) = &profile.workout_plan {
        println!("\n  Workout plan:\n    {plan}");
    }
}

fn require_profile(store: &SharedStore, json: bool) -> (UserProfile, Units) {
    let guard = store::lock(store);
    let units = guard.units();
    if let Some(profile) = guard.profile() {
        return (profile.clone(), units);
    }
    drop(guard);
    let message = "No profile yet. Run `nourish onboard` first";
    if json {
        println!("{}", json_error(message));
    } else {
        eprintln!("{message}");
    }
    process::exit(2);
}

pub(crate) fn cmd_profile_show(store: &SharedStore, json: bool) -> Result<()> {
    let (profile, units) = require_profile(store, json);
    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    } else {
        print_profile(&profile, units);
    }
    Ok(())
}

pub(crate) async fn cmd_profile_set(
    config: &Config,
    store: &SharedStore,
    update: ProfileUpdate,
    json: bool,
) -> Result<()> {
    if update.is_empty() {
        bail!("Nothing to update. Pass at least one field, e.g. --weight 72");
    }
    let (profile, units) = require_profile(store, json);
    let updated = update.apply(profile, units)?;
    store::lock(store).set_profile(updated.clone());

    if json {
        println!("{}", serde_json::to_string_pretty(&updated)?);
    } else {
        println!("Profile updated.\n");
        print_profile(&updated, units);
    }
    autosync(config, store).await;
    Ok(())
}

pub(crate) async fn cmd_profile_refresh(
    config: &Config,
    store: &SharedStore,
    json: bool,
) -> Result<()> {
    let advisor = advisor(config)?;
    let (_, units) = require_profile(store, json);

    let Some(plan) = onboarding::refresh_plan(store, &advisor).await? else {
        let message = "The coach did not return a usable plan. Targets unchanged";
        if json {
            println!("{}", json_error(message));
        } else {
            eprintln!("{message}");
        }
        process::exit(2);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        if let Some(profile) = store::lock(store).profile() {
            print_profile(profile, units);
        }
        if let Some(tip) = &plan.tip {
            println!("\n  Tip: {tip}");
        }
    }
    autosync(config, store).await;
    Ok(())
}
