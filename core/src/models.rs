use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Millilitres per glass on the water tracker.
pub const GLASS_ML: f64 = 250.0;

const KG_TO_LB: f64 = 2.204_62;
const CM_PER_INCH: f64 = 2.54;

/// Accept numbers, numeric strings, null, or garbage; anything unusable becomes 0.
///
/// Stored and remote payloads are not trusted to be well-typed, and a single
/// bad entry must not turn a running total into NaN.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let number = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(number.filter(|v| v.is_finite()).unwrap_or(0.0))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Goal {
    Lose,
    #[default]
    Maintain,
    Gain,
}

impl Goal {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lose => "lose",
            Self::Maintain => "maintain",
            Self::Gain => "gain",
        }
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Goal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lose" => Ok(Self::Lose),
            "maintain" => Ok(Self::Maintain),
            "gain" => Ok(Self::Gain),
            _ => bail!("Invalid goal '{s}'. Must be one of: lose, maintain, gain"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dark => "dark",
            Self::Light => "light",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "dark" => Ok(Self::Dark),
            "light" => Ok(Self::Light),
            _ => bail!("Invalid theme '{s}'. Must be one of: dark, light"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

impl Units {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Imperial => "imperial",
        }
    }

    /// Format a weight given in kilograms for display.
    #[must_use]
    pub fn format_weight(self, kg: f64) -> String {
        match self {
            Self::Metric => format!("{kg:.1} kg"),
            Self::Imperial => format!("{:.1} lb", kg_to_lb(kg)),
        }
    }

    /// Format a height given in centimetres for display.
    #[must_use]
    pub fn format_height(self, cm: f64) -> String {
        match self {
            Self::Metric => format!("{cm:.0} cm"),
            Self::Imperial => format!("{:.1} in", cm_to_inches(cm)),
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Units {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "metric" => Ok(Self::Metric),
            "imperial" => Ok(Self::Imperial),
            _ => bail!("Invalid units '{s}'. Must be one of: metric, imperial"),
        }
    }
}

#[must_use]
pub fn kg_to_lb(kg: f64) -> f64 {
    kg * KG_TO_LB
}

#[must_use]
pub fn lb_to_kg(lb: f64) -> f64 {
    lb / KG_TO_LB
}

#[must_use]
pub fn cm_to_inches(cm: f64) -> f64 {
    cm / CM_PER_INCH
}

#[must_use]
pub fn inches_to_cm(inches: f64) -> f64 {
    inches * CM_PER_INCH
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub theme: Theme,
    pub units: Units,
}

// --- Profile ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    pub full_name: String,
    pub age: u32,
    pub gender: String,
    pub goal: Goal,
    pub workout_frequency: String,
    pub birth_date: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub height: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub weight: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub daily_calories_target: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub protein: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub carbs: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub fat: f64,
    pub preferred_cuisine: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub water_liters: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diet_strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workout_plan: Option<String>,
}

// --- Food log ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub calories: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub protein: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub carbs: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fat: f64,
    #[serde(default)]
    pub serving_size: String,
    /// Wall-clock label for display only; insertion order is canonical.
    #[serde(default)]
    pub time: String,
}

#[derive(Debug, Clone)]
pub struct NewFoodEntry {
    pub name: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub serving_size: String,
}

impl NewFoodEntry {
    /// Stamp a random identifier and the current local time label.
    #[must_use]
    pub fn into_entry(self) -> FoodEntry {
        let time = Local::now().format("%H:%M").to_string();
        self.into_entry_at(time)
    }

    #[must_use]
    pub fn into_entry_at(self, time: String) -> FoodEntry {
        FoodEntry {
            id: Uuid::new_v4().to_string(),
            name: self.name,
            calories: self.calories,
            protein: self.protein,
            carbs: self.carbs,
            fat: self.fat,
            serving_size: self.serving_size,
            time,
        }
    }
}

pub fn validate_new_food_entry(entry: &NewFoodEntry) -> anyhow::Result<()> {
    if entry.name.trim().is_empty() {
        bail!("Food name must not be empty");
    }
    let fields = [
        ("calories", entry.calories),
        ("protein", entry.protein),
        ("carbs", entry.carbs),
        ("fat", entry.fat),
    ];
    for (label, value) in fields {
        if !value.is_finite() || value < 0.0 {
            bail!("{label} must be a non-negative number");
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyLog {
    /// Always the sum of `food_logs[*].calories`; recomputed, never trusted.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub calories_consumed: f64,
    /// Millilitres.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub water_intake: f64,
    #[serde(default)]
    pub food_logs: Vec<FoodEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DailyLog {
    #[must_use]
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn sum_calories(entries: &[FoodEntry]) -> f64 {
        entries
            .iter()
            .map(|e| e.calories)
            .filter(|c| c.is_finite())
            .sum()
    }

    /// Re-derive the calorie total and fill in a missing date.
    #[must_use]
    pub fn normalized(mut self, fallback_date: NaiveDate) -> Self {
        self.calories_consumed = Self::sum_calories(&self.food_logs);
        if !self.water_intake.is_finite() || self.water_intake < 0.0 {
            self.water_intake = 0.0;
        }
        if self.date.is_none() {
            self.date = Some(fallback_date);
        }
        self
    }

    #[must_use]
    pub fn totals(&self) -> MacroTotals {
        MacroTotals::from_entries(&self.food_logs)
    }
}

/// A past day's log, keyed by its date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub date: NaiveDate,
    pub log: DailyLog,
}

// --- Derived progress ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MacroTotals {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

impl MacroTotals {
    #[must_use]
    pub fn from_entries(entries: &[FoodEntry]) -> Self {
        let finite = |v: f64| if v.is_finite() { v } else { 0.0 };
        entries.iter().fold(Self::default(), |acc, e| Self {
            calories: acc.calories + finite(e.calories),
            protein: acc.protein + finite(e.protein),
            carbs: acc.carbs + finite(e.carbs),
            fat: acc.fat + finite(e.fat),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MacroProgress {
    pub current: f64,
    pub target: f64,
    pub percent: f64,
}

impl MacroProgress {
    #[must_use]
    pub fn new(current: f64, target: f64) -> Self {
        let percent = if target > 0.0 {
            (current / target * 100.0).min(100.0)
        } else {
            0.0
        };
        Self {
            current,
            target,
            percent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WaterProgress {
    pub intake_ml: f64,
    pub target_ml: f64,
    pub percent: f64,
    pub filled_glasses: u32,
    pub total_glasses: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayProgress {
    pub date: Option<NaiveDate>,
    pub consumed: f64,
    pub target: f64,
    pub remaining: f64,
    pub percent: f64,
    pub protein: MacroProgress,
    pub carbs: MacroProgress,
    pub fat: MacroProgress,
    pub water: WaterProgress,
    pub entry_count: usize,
}

impl DayProgress {
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn compute(log: &DailyLog, profile: Option<&UserProfile>) -> Self {
        let totals = log.totals();
        let consumed = log.calories_consumed.round();
        let target = profile.map_or(0.0, |p| p.daily_calories_target);
        let safe_target = if target > 0.0 { target } else { 1.0 };

        let water_target_ml = profile.map_or(0.0, |p| p.water_liters * 1000.0);
        let water_percent = if water_target_ml > 0.0 {
            (log.water_intake / water_target_ml * 100.0).min(100.0)
        } else {
            0.0
        };

        Self {
            date: log.date,
            consumed,
            target,
            remaining: (safe_target - consumed).max(0.0),
            percent: (consumed / safe_target * 100.0).min(100.0),
            protein: MacroProgress::new(totals.protein, profile.map_or(0.0, |p| p.protein)),
            carbs: MacroProgress::new(totals.carbs, profile.map_or(0.0, |p| p.carbs)),
            fat: MacroProgress::new(totals.fat, profile.map_or(0.0, |p| p.fat)),
            water: WaterProgress {
                intake_ml: log.water_intake,
                target_ml: water_target_ml,
                percent: water_percent,
                filled_glasses: (log.water_intake / GLASS_ML).floor().max(0.0) as u32,
                total_glasses: (water_target_ml / GLASS_ML).ceil().max(0.0) as u32,
            },
            entry_count: log.food_logs.len(),
        }
    }
}

// --- Fingerprints ---

/// SHA-256 over the canonical JSON form of `value`.
///
/// `serde_json::Value` objects keep their keys sorted, so two payloads that
/// differ only in field order hash the same.
#[must_use]
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> String {
    use std::fmt::Write;

    let canonical = serde_json::to_value(value)
        .and_then(|v| serde_json::to_vec(&v))
        .unwrap_or_default();
    Sha256::digest(&canonical)
        .iter()
        .fold(String::with_capacity(64), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}
