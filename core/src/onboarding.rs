use anyhow::{Result, bail};
use chrono::NaiveDate;
use log::{info, warn};
use serde::Serialize;

use crate::advisor::{Advisor, CompletionProvider, HealthPlan, PlanRequest};
use crate::models::{Goal, UserProfile};
use crate::store::{self, SharedStore};

pub const STEP_COUNT: usize = 7;
pub const DEFAULT_AGE: u32 = 25;

pub const FALLBACK_CALORIES: f64 = 2200.0;
pub const FALLBACK_PROTEIN: f64 = 150.0;
pub const FALLBACK_CARBS: f64 = 250.0;
pub const FALLBACK_FAT: f64 = 70.0;
pub const FALLBACK_WATER_LITERS: f64 = 2.5;
pub const FALLBACK_DIET_STRATEGY: &str =
    "Focus on whole foods, lean proteins, and complex carbohydrates. Stay hydrated.";
pub const FALLBACK_WORKOUT_PLAN: &str = "30 minutes of moderate activity 3-5 times a week.";

/// Litres of water per kilogram of body weight.
const WATER_LITERS_PER_KG: f64 = 0.033;

#[derive(Debug, Clone, PartialEq)]
pub struct OnboardingDraft {
    pub full_name: String,
    pub gender: String,
    pub goal: Option<Goal>,
    pub workout_frequency: String,
    pub preferred_cuisine: String,
    /// `YYYY-MM-DD`
    pub birth_date: String,
    pub height: f64,
    pub weight: f64,
}

impl Default for OnboardingDraft {
    fn default() -> Self {
        Self {
            full_name: String::new(),
            gender: String::new(),
            goal: None,
            workout_frequency: String::new(),
            preferred_cuisine: "Mediterranean".to_string(),
            birth_date: String::new(),
            height: 170.0,
            weight: 70.0,
        }
    }
}

impl OnboardingDraft {
    /// Whether the wizard may advance past `step` (0-based).
    #[must_use]
    pub fn can_proceed(&self, step: usize) -> bool {
        match step {
            0 => !self.full_name.trim().is_empty(),
            1 => !self.gender.trim().is_empty(),
            2 => self.goal.is_some(),
            3 => !self.workout_frequency.trim().is_empty(),
            4 => !self.preferred_cuisine.trim().is_empty(),
            5 => NaiveDate::parse_from_str(self.birth_date.trim(), "%Y-%m-%d").is_ok(),
            6 => self.height > 0.0 && self.weight > 0.0,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        (0..STEP_COUNT).all(|step| self.can_proceed(step))
    }

    /// First step that still blocks, if any.
    #[must_use]
    pub fn first_incomplete_step(&self) -> Option<usize> {
        (0..STEP_COUNT).find(|&step| !self.can_proceed(step))
    }

    fn plan_request(&self, age: u32) -> PlanRequest {
        PlanRequest {
            full_name: self.full_name.clone(),
            age,
            gender: self.gender.clone(),
            goal: self.goal.unwrap_or_default().to_string(),
            workout_frequency: self.workout_frequency.clone(),
            height_cm: self.height,
            weight_kg: self.weight,
            preferred_cuisine: self.preferred_cuisine.clone(),
        }
    }
}

#[must_use]
pub fn step_title(step: usize) -> &'static str {
    match step {
        0 => "Identity",
        1 => "Gender",
        2 => "Goal",
        3 => "Activity",
        4 => "Cuisine",
        5 => "Age",
        6 => "Body Stats",
        _ => "Unknown",
    }
}

/// Whole years since `birth_date`; [`DEFAULT_AGE`] when it is missing or not a date.
#[must_use]
pub fn age_from_birth_date(birth_date: &str, today: NaiveDate) -> u32 {
    match NaiveDate::parse_from_str(birth_date.trim(), "%Y-%m-%d") {
        Ok(dob) => today.years_since(dob).unwrap_or(0),
        Err(_) => DEFAULT_AGE,
    }
}

/// Water target rounded to one decimal.
#[must_use]
pub fn water_target_liters(weight_kg: f64) -> f64 {
    (weight_kg * WATER_LITERS_PER_KG * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanSource {
    Ai,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingOutcome {
    pub profile: UserProfile,
    pub source: PlanSource,
    pub tip: Option<String>,
    pub meal_suggestion: Option<String>,
}

fn build_profile(draft: &OnboardingDraft, age: u32, plan: Option<&HealthPlan>) -> UserProfile {
    let base = UserProfile {
        full_name: draft.full_name.trim().to_string(),
        age,
        gender: draft.gender.clone(),
        goal: draft.goal.unwrap_or_default(),
        workout_frequency: draft.workout_frequency.clone(),
        birth_date: draft.birth_date.clone(),
        height: draft.height,
        weight: draft.weight,
        preferred_cuisine: draft.preferred_cuisine.clone(),
        ..UserProfile::default()
    };
    match plan {
        Some(plan) => UserProfile {
            daily_calories_target: plan.daily_calories_target,
            protein: plan.protein,
            carbs: plan.carbs,
            fat: plan.fat,
            water_liters: water_target_liters(draft.weight),
            diet_strategy: plan.diet_strategy.clone(),
            workout_plan: plan.workout_plan.clone(),
            ..base
        },
        None => UserProfile {
            daily_calories_target: FALLBACK_CALORIES,
            protein: FALLBACK_PROTEIN,
            carbs: FALLBACK_CARBS,
            fat: FALLBACK_FAT,
            water_liters: FALLBACK_WATER_LITERS,
            diet_strategy: Some(FALLBACK_DIET_STRATEGY.to_string()),
            workout_plan: Some(FALLBACK_WORKOUT_PLAN.to_string()),
            ..base
        },
    }
}

/// A parsed plan without a positive calorie target is treated as no plan.
async fn usable_plan<P: CompletionProvider>(
    advisor: &Advisor<P>,
    req: &PlanRequest,
) -> Option<HealthPlan> {
    let plan = advisor.generate_health_plan(req).await?;
    if plan.is_usable() {
        return Some(plan);
    }
    warn!("Discarding AI plan without a calorie target");
    None
}

fn finish(store: &SharedStore, profile: UserProfile) {
    let mut store = store::lock(store);
    store.set_profile(profile);
    store.set_onboarded(true);
}

/// Build the profile from an AI plan, or the fallback plan if none comes back.
pub async fn complete_onboarding<P: CompletionProvider>(
    store: &SharedStore,
    advisor: &Advisor<P>,
    draft: &OnboardingDraft,
) -> Result<OnboardingOutcome> {
    if let Some(step) = draft.first_incomplete_step() {
        bail!("Onboarding incomplete: '{}' is missing", step_title(step));
    }
    let today = store::lock(store).today();
    let age = age_from_birth_date(&draft.birth_date, today);

    let plan = usable_plan(advisor, &draft.plan_request(age)).await;
    let outcome = match plan {
        Some(plan) => {
            info!("Generated AI plan: {} kcal", plan.daily_calories_target);
            OnboardingOutcome {
                profile: build_profile(draft, age, Some(&plan)),
                source: PlanSource::Ai,
                tip: plan.tip,
                meal_suggestion: plan.meal_suggestion,
            }
        }
        None => {
            warn!("AI plan unavailable, using fallback targets");
            OnboardingOutcome {
                profile: build_profile(draft, age, None),
                source: PlanSource::Fallback,
                tip: None,
                meal_suggestion: None,
            }
        }
    };

    finish(store, outcome.profile.clone());
    Ok(outcome)
}

/// Finish onboarding with the fallback plan, without contacting the model.
pub fn complete_onboarding_offline(
    store: &SharedStore,
    draft: &OnboardingDraft,
) -> Result<OnboardingOutcome> {
    if let Some(step) = draft.first_incomplete_step() {
        bail!("Onboarding incomplete: '{}' is missing", step_title(step));
    }
    let today = store::lock(store).today();
    let age = age_from_birth_date(&draft.birth_date, today);
    let profile = build_profile(draft, age, None);
    finish(store, profile.clone());
    Ok(OnboardingOutcome {
        profile,
        source: PlanSource::Fallback,
        tip: None,
        meal_suggestion: None,
    })
}

/// Regenerate targets for the current profile. The profile is only replaced
/// when a plan comes back.
pub async fn refresh_plan<P: CompletionProvider>(
    store: &SharedStore,
    advisor: &Advisor<P>,
) -> Result<Option<HealthPlan>> {
    let Some(profile) = store::lock(store).profile().cloned() else {
        bail!("No profile found. Run onboarding first");
    };

    let Some(plan) = usable_plan(advisor, &PlanRequest::from(&profile)).await else {
        return Ok(None);
    };

    let updated = UserProfile {
        daily_calories_target: plan.daily_calories_target,
        protein: plan.protein,
        carbs: plan.carbs,
        fat: plan.fat,
        diet_strategy: plan.diet_strategy.clone(),
        workout_plan: plan.workout_plan.clone(),
        ..profile
    };
    store::lock(store).set_profile(updated);
    Ok(Some(plan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::{ChatRequest, ChatResponse};
    use crate::storage::LocalStorage;
    use crate::store::Store;
    use async_trait::async_trait;

    struct Canned(Option<&'static str>);

    #[async_trait]
    impl CompletionProvider for Canned {
        async fn complete(&self, _request: &ChatRequest) -> anyhow::Result<ChatResponse> {
            let Some(reply) = self.0 else {
                anyhow::bail!("network down");
            };
            Ok(serde_json::from_value(serde_json::json!({
                "choices": [{"message": {"content": reply}}]
            }))?)
        }
    }

    const PLAN_REPLY: &str = "Plan: {\"dailyCaloriesTarget\": 1900, \"protein\": 130, \
        \"carbs\": 200, \"fat\": 65, \"tip\": \"Sleep well\", \"mealSuggestion\": \"Lentil soup\", \
        \"dietStrategy\": \"High fibre\", \"workoutPlan\": \"Run twice a week\"}";

    fn june_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn shared_store() -> SharedStore {
        Store::load_with_clock(LocalStorage::open_in_memory().unwrap(), june_first).into_shared()
    }

    fn complete_draft() -> OnboardingDraft {
        OnboardingDraft {
            full_name: "Ana Souza".to_string(),
            gender: "female".to_string(),
            goal: Some(Goal::Lose),
            workout_frequency: "3-5".to_string(),
            birth_date: "1993-02-11".to_string(),
            weight: 64.5,
            ..OnboardingDraft::default()
        }
    }

    #[test]
    fn test_can_proceed_per_step() {
        let mut draft = OnboardingDraft::default();
        assert!(!draft.can_proceed(0));
        draft.full_name = "Ana".to_string();
        assert!(draft.can_proceed(0));
        assert!(!draft.can_proceed(1));
        assert!(!draft.can_proceed(2));
        draft.goal = Some(Goal::Gain);
        assert!(draft.can_proceed(2));
        assert!(draft.can_proceed(4));
        assert!(!draft.can_proceed(5));
        draft.birth_date = "yesterday".to_string();
        assert!(!draft.can_proceed(5));
        draft.birth_date = "1990-13-01".to_string();
        assert!(!draft.can_proceed(5));
        draft.birth_date = " 1990-05-01 ".to_string();
        assert!(draft.can_proceed(5));
        assert!(draft.can_proceed(6));
        draft.height = 0.0;
        assert!(!draft.can_proceed(6));
        assert!(!draft.can_proceed(7));
        assert_eq!(draft.first_incomplete_step(), Some(1));
    }

    #[test]
    fn test_complete_draft() {
        assert!(complete_draft().is_complete());
        assert_eq!(complete_draft().first_incomplete_step(), None);
    }

    #[test]
    fn test_age_from_birth_date() {
        assert_eq!(age_from_birth_date("1993-02-11", june_first()), 31);
        assert_eq!(age_from_birth_date("1993-06-02", june_first()), 30);
        assert_eq!(age_from_birth_date("1993-06-01", june_first()), 31);
        assert_eq!(age_from_birth_date("", june_first()), DEFAULT_AGE);
        assert_eq!(age_from_birth_date("yesterday", june_first()), DEFAULT_AGE);
        assert_eq!(age_from_birth_date("2030-01-01", june_first()), 0);
    }

    #[test]
    fn test_water_target() {
        assert!((water_target_liters(64.5) - 2.1).abs() < 1e-9);
        assert!((water_target_liters(70.0) - 2.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_onboarding_with_ai_plan() {
        let store = shared_store();
        let advisor = Advisor::new(Canned(Some(PLAN_REPLY)));
        let outcome = complete_onboarding(&store, &advisor, &complete_draft())
            .await
            .unwrap();

        assert_eq!(outcome.source, PlanSource::Ai);
        assert_eq!(outcome.tip.as_deref(), Some("Sleep well"));
        let s = store::lock(&store);
        assert!(s.is_onboarded());
        let p = s.profile().unwrap();
        assert_eq!(p.age, 31);
        assert_eq!(p.goal, Goal::Lose);
        assert!((p.daily_calories_target - 1900.0).abs() < f64::EPSILON);
        assert!((p.water_liters - 2.1).abs() < 1e-9);
        assert_eq!(p.diet_strategy.as_deref(), Some("High fibre"));
    }

    #[tokio::test]
    async fn test_onboarding_falls_back_when_ai_fails() {
        let store = shared_store();
        let advisor = Advisor::new(Canned(None));
        let outcome = complete_onboarding(&store, &advisor, &complete_draft())
            .await
            .unwrap();

        assert_eq!(outcome.source, PlanSource::Fallback);
        let p = outcome.profile;
        assert!((p.daily_calories_target - FALLBACK_CALORIES).abs() < f64::EPSILON);
        assert!((p.protein - 150.0).abs() < f64::EPSILON);
        assert!((p.water_liters - 2.5).abs() < f64::EPSILON);
        assert_eq!(p.workout_plan.as_deref(), Some(FALLBACK_WORKOUT_PLAN));
        assert!(store::lock(&store).is_onboarded());
    }

    #[tokio::test]
    async fn test_onboarding_falls_back_on_plan_without_target() {
        let store = shared_store();
        let advisor = Advisor::new(Canned(Some("Here you go: {\"protein\": 160, \"tip\": \"Walk\"}")));
        let outcome = complete_onboarding(&store, &advisor, &complete_draft())
            .await
            .unwrap();

        assert_eq!(outcome.source, PlanSource::Fallback);
        assert!((outcome.profile.daily_calories_target - FALLBACK_CALORIES).abs() < f64::EPSILON);
        assert!((outcome.profile.protein - FALLBACK_PROTEIN).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_refresh_plan_ignores_plan_without_target() {
        let store = shared_store();
        complete_onboarding_offline(&store, &complete_draft()).unwrap();
        let before = store::lock(&store).profile().cloned();

        let advisor = Advisor::new(Canned(Some("{\"dailyCaloriesTarget\": 0, \"protein\": 90}")));
        assert!(refresh_plan(&store, &advisor).await.unwrap().is_none());
        assert_eq!(store::lock(&store).profile().cloned(), before);
    }

    #[test]
    fn test_offline_onboarding() {
        let store = shared_store();
        let outcome = complete_onboarding_offline(&store, &complete_draft()).unwrap();
        assert_eq!(outcome.source, PlanSource::Fallback);
        assert_eq!(store::lock(&store).profile(), Some(&outcome.profile));
    }

    #[tokio::test]
    async fn test_incomplete_draft_is_rejected() {
        let store = shared_store();
        let advisor = Advisor::new(Canned(Some(PLAN_REPLY)));
        let draft = OnboardingDraft {
            birth_date: String::new(),
            ..complete_draft()
        };
        let err = complete_onboarding(&store, &advisor, &draft)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Age"));
        assert!(!store::lock(&store).is_onboarded());
    }

    #[tokio::test]
    async fn test_refresh_plan_replaces_targets_only() {
        let store = shared_store();
        complete_onboarding_offline(&store, &complete_draft()).unwrap();

        let advisor = Advisor::new(Canned(Some(PLAN_REPLY)));
        let plan = refresh_plan(&store, &advisor).await.unwrap().unwrap();
        assert_eq!(plan.meal_suggestion.as_deref(), Some("Lentil soup"));

        let s = store::lock(&store);
        let p = s.profile().unwrap();
        assert!((p.daily_calories_target - 1900.0).abs() < f64::EPSILON);
        assert!((p.fat - 65.0).abs() < f64::EPSILON);
        assert_eq!(p.workout_plan.as_deref(), Some("Run twice a week"));
        // Water stays at the value chosen during onboarding.
        assert!((p.water_liters - FALLBACK_WATER_LITERS).abs() < f64::EPSILON);
        assert_eq!(p.full_name, "Ana Souza");
    }

    #[tokio::test]
    async fn test_refresh_plan_without_result_keeps_profile() {
        let store = shared_store();
        complete_onboarding_offline(&store, &complete_draft()).unwrap();
        let before = store::lock(&store).profile().cloned();
        let revision = store::lock(&store).revision();

        let advisor = Advisor::new(Canned(Some("no plan today")));
        assert!(refresh_plan(&store, &advisor).await.unwrap().is_none());
        assert_eq!(store::lock(&store).profile().cloned(), before);
        assert_eq!(store::lock(&store).revision(), revision);
    }

    #[tokio::test]
    async fn test_refresh_plan_requires_profile() {
        let store = shared_store();
        let advisor = Advisor::new(Canned(Some(PLAN_REPLY)));
        assert!(refresh_plan(&store, &advisor).await.is_err());
    }
}
