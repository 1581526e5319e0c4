use anyhow::{Result, bail};
use log::warn;

use crate::config::Config;
use nourish_core::models::{Goal, Units};
use nourish_core::onboarding::{
    self, OnboardingDraft, OnboardingOutcome, PlanSource, STEP_COUNT, step_title,
};
use nourish_core::store::{self, SharedStore};

use super::helpers::{height_to_cm, prompt_number, prompt_text, weight_to_kg};
use super::profile::print_profile;
use super::{advisor, autosync};

pub(crate) struct OnboardArgs {
    pub name: Option<String>,
    pub gender: Option<String>,
    pub goal: Option<String>,
    pub activity: Option<String>,
    pub cuisine: Option<String>,
    pub birth_date: Option<String>,
    pub height: Option<f64>,
    pub weight: Option<f64>,
    pub no_ai: bool,
    pub json: bool,
}

/// Build the draft from flags. Height and weight are read in `units`.
fn draft_from_args(args: &OnboardArgs, units: Units) -> Result<OnboardingDraft> {
    let mut draft = OnboardingDraft::default();
    if let Some(name) = &args.name {
        draft.full_name.clone_from(name);
    }
    if let Some(gender) = &args.gender {
        draft.gender.clone_from(gender);
    }
    if let Some(goal) = &args.goal {
        draft.goal = Some(goal.parse::<Goal>()?);
    }
    if let Some(activity) = &args.activity {
        draft.workout_frequency.clone_from(activity);
    }
    if let Some(cuisine) = &args.cuisine {
        draft.preferred_cuisine.clone_from(cuisine);
    }
    if let Some(birth_date) = &args.birth_date {
        draft.birth_date.clone_from(birth_date);
    }
    if let Some(height) = args.height {
        draft.height = height_to_cm(units, height);
    }
    if let Some(weight) = args.weight {
        draft.weight = weight_to_kg(units, weight);
    }
    Ok(draft)
}

const MAX_ATTEMPTS: usize = 3;

fn ask_step(draft: &mut OnboardingDraft, args: &OnboardArgs, units: Units, step: usize) -> Result<()> {
    match step {
        0 => draft.full_name = prompt_text("Your name", None)?,
        1 => draft.gender = prompt_text("Gender", None)?,
        2 => {
            let goal = prompt_text("Goal (lose, maintain, gain)", Some("maintain"))?;
            draft.goal = Some(goal.parse()?);
        }
        3 => {
            draft.workout_frequency =
                prompt_text("Workouts per week", Some("3-4 times a week"))?;
        }
        4 => {
            draft.preferred_cuisine =
                prompt_text("Preferred cuisine", Some(&draft.preferred_cuisine))?;
        }
        5 => draft.birth_date = prompt_text("Birth date (YYYY-MM-DD)", None)?,
        6 => {
            let (h_label, w_label, h_default, w_default) = match units {
                Units::Metric => ("Height (cm)", "Weight (kg)", 170.0, 70.0),
                Units::Imperial => ("Height (in)", "Weight (lb)", 67.0, 154.0),
            };
            if args.height.is_none() {
                draft.height = height_to_cm(units, prompt_number(h_label, h_default)?);
            }
            if args.weight.is_none() {
                draft.weight = weight_to_kg(units, prompt_number(w_label, w_default)?);
            }
        }
        _ => {}
    }
    Ok(())
}

/// Walk the wizard steps, asking only for what the flags left open.
fn prompt_missing(draft: &mut OnboardingDraft, args: &OnboardArgs, units: Units) -> Result<()> {
    for step in 0..STEP_COUNT {
        let answered = match step {
            6 => args.height.is_some() && args.weight.is_some(),
            4 => args.cuisine.is_some(),
            _ => draft.can_proceed(step),
        };
        if answered {
            continue;
        }
        eprintln!("\n[{}/{STEP_COUNT}] {}", step + 1, step_title(step));
        let mut attempts = 0;
        loop {
            ask_step(draft, args, units, step)?;
            if draft.can_proceed(step) {
                break;
            }
            attempts += 1;
            if attempts == MAX_ATTEMPTS {
                bail!("'{}' is required", step_title(step));
            }
            eprintln!("That doesn't look right, try again.");
        }
    }
    Ok(())
}

fn print_outcome(outcome: &OnboardingOutcome, units: Units) {
    match outcome.source {
        PlanSource::Ai => println!("Your personalised plan is ready.\n"),
        PlanSource::Fallback => {
            println!("Using the default plan. Run `nourish profile refresh-plan` for a tailored one.\n");
        }
    }
    print_profile(&outcome.profile, units);
    if let Some(tip) = &outcome.tip {
        println!("\n  Tip: {tip}");
    }
    if let Some(meal) = &outcome.meal_suggestion {
        println!("  Try: {meal}");
    }
}

pub(crate) async fn cmd_onboard(
    config: &Config,
    store: &SharedStore,
    args: OnboardArgs,
) -> Result<()> {
    let (units, already) = {
        let store = store::lock(store);
        (store.units(), store.is_onboarded())
    };
    if already && !args.json {
        eprintln!("Note: you are already onboarded; this replaces your profile.");
    }

    let mut draft = draft_from_args(&args, units)?;
    if args.json {
        if let Some(step) = draft.first_incomplete_step() {
            bail!("'{}' is missing or invalid. Pass it as a flag with --json", step_title(step));
        }
    } else {
        prompt_missing(&mut draft, &args, units)?;
    }

    let outcome = if args.no_ai {
        onboarding::complete_onboarding_offline(store, &draft)?
    } else {
        match advisor(config) {
            Ok(advisor) => {
                if !args.json {
                    eprintln!("Generating your plan...");
                }
                onboarding::complete_onboarding(store, &advisor, &draft).await?
            }
            Err(e) => {
                warn!("AI plan unavailable: {e:#}");
                onboarding::complete_onboarding_offline(store, &draft)?
            }
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome, units);
    }
    autosync(config, store).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nourish_core::storage::LocalStorage;
    use nourish_core::store::Store;

    fn args() -> OnboardArgs {
        OnboardArgs {
            name: Some("Ada".to_string()),
            gender: Some("female".to_string()),
            goal: Some("lose".to_string()),
            activity: Some("3-4 times a week".to_string()),
            cuisine: None,
            birth_date: Some("1990-05-01".to_string()),
            height: Some(65.0),
            weight: Some(150.0),
            no_ai: true,
            json: true,
        }
    }

    #[test]
    fn test_draft_from_flags_is_complete() {
        let draft = draft_from_args(&args(), Units::Metric).unwrap();
        assert!(draft.is_complete());
        assert_eq!(draft.goal, Some(Goal::Lose));
        assert_eq!(draft.preferred_cuisine, "Mediterranean");
    }

    #[test]
    fn test_draft_converts_imperial() {
        let draft = draft_from_args(&args(), Units::Imperial).unwrap();
        assert!((draft.height - 165.1).abs() < 1e-9);
        assert!((draft.weight - 68.039).abs() < 0.01);
    }

    #[test]
    fn test_draft_rejects_unknown_goal() {
        let mut a = args();
        a.goal = Some("shred".to_string());
        assert!(draft_from_args(&a, Units::Metric).is_err());
    }

    #[test]
    fn test_unparsable_birth_date_blocks_the_age_step() {
        let mut a = args();
        a.birth_date = Some("yesterday".to_string());
        let draft = draft_from_args(&a, Units::Metric).unwrap();
        assert_eq!(draft.first_incomplete_step(), Some(5));
        assert_eq!(step_title(5), "Age");
    }

    #[test]
    fn test_offline_onboarding_sets_profile() {
        let store = Store::load(LocalStorage::open_in_memory().unwrap()).into_shared();
        let draft = draft_from_args(&args(), Units::Metric).unwrap();
        let outcome = onboarding::complete_onboarding_offline(&store, &draft).unwrap();
        assert_eq!(outcome.source, PlanSource::Fallback);

        let guard = store::lock(&store);
        assert!(guard.is_onboarded());
        assert_eq!(guard.profile().unwrap().full_name, "Ada");
    }
}
