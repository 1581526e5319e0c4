use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use log::{debug, warn};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{
    DailyLog, DayProgress, FoodEntry, HistoryEntry, Preferences, Theme, Units, UserProfile,
    fingerprint,
};
use crate::storage::{
    LocalStorage, ONBOARDED_KEY, PREFERENCES_EDITED_AT_KEY, PROFILE_EDITED_AT_KEY, PROFILE_KEY,
    THEME_KEY, TODAY_LOG_KEY, UNITS_KEY,
};

/// The store handle shared between the view layer and the sync bridge.
pub type SharedStore = Arc<Mutex<Store>>;

/// Source of the current calendar date.
pub type Clock = fn() -> NaiveDate;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Lock a shared store, recovering the guard if a holder panicked.
pub fn lock(store: &SharedStore) -> MutexGuard<'_, Store> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

#[must_use]
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Onboarded,
    Profile,
    TodayLog,
    Theme,
    Units,
    History,
    SelectedDate,
}

impl ChangeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Onboarded => "onboarded",
            Self::Profile => "profile",
            Self::TodayLog => "todayLog",
            Self::Theme => "theme",
            Self::Units => "units",
            Self::History => "history",
            Self::SelectedDate => "selectedDate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub kind: ChangeKind,
    pub origin: Origin,
    pub revision: u64,
}

struct Persisted {
    is_onboarded: bool,
    profile: Option<UserProfile>,
    today_log: DailyLog,
    preferences: Preferences,
    profile_edited_at: Option<DateTime<Utc>>,
    preferences_edited_at: Option<DateTime<Utc>>,
}

/// Single source of truth for UI-observable state.
///
/// Every mutation is applied in memory, written through to [`LocalStorage`]
/// where the field is persisted, and announced on the change channel.
pub struct Store {
    storage: LocalStorage,
    clock: Clock,
    is_onboarded: bool,
    profile: Option<UserProfile>,
    today_log: DailyLog,
    history: Vec<HistoryEntry>,
    preferences: Preferences,
    selected_date: NaiveDate,
    profile_edited_at: Option<DateTime<Utc>>,
    preferences_edited_at: Option<DateTime<Utc>>,
    revision: u64,
    changes: broadcast::Sender<Change>,
}

impl Store {
    pub fn load(storage: LocalStorage) -> Self {
        Self::load_with_clock(storage, local_today)
    }

    /// Hydrate from storage in one pass. Any unreadable key resets everything.
    pub fn load_with_clock(storage: LocalStorage, clock: Clock) -> Self {
        let today = clock();
        let persisted = match load_persisted(&storage, today) {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to load persisted state, starting fresh: {e:#}");
                Persisted {
                    is_onboarded: false,
                    profile: None,
                    today_log: DailyLog::empty(today),
                    preferences: Preferences::default(),
                    profile_edited_at: None,
                    preferences_edited_at: None,
                }
            }
        };

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            storage,
            clock,
            is_onboarded: persisted.is_onboarded,
            profile: persisted.profile,
            today_log: persisted.today_log,
            history: Vec::new(),
            preferences: persisted.preferences,
            selected_date: today,
            profile_edited_at: persisted.profile_edited_at,
            preferences_edited_at: persisted.preferences_edited_at,
            revision: 0,
            changes,
        }
    }

    #[must_use]
    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    /// Give back the underlying storage, e.g. to simulate a restart.
    #[must_use]
    pub fn into_storage(self) -> LocalStorage {
        self.storage
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.changes.subscribe()
    }

    // --- Getters ---

    #[must_use]
    pub fn today(&self) -> NaiveDate {
        (self.clock)()
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn is_onboarded(&self) -> bool {
        self.is_onboarded
    }

    #[must_use]
    pub fn profile(&self) -> Option<&UserProfile> {
        self.profile.as_ref()
    }

    #[must_use]
    pub fn today_log(&self) -> &DailyLog {
        &self.today_log
    }

    /// History as fetched: most recent date first.
    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    #[must_use]
    pub fn history_chronological(&self) -> Vec<HistoryEntry> {
        self.history.iter().rev().cloned().collect()
    }

    #[must_use]
    pub fn preferences(&self) -> Preferences {
        self.preferences
    }

    #[must_use]
    pub fn theme(&self) -> Theme {
        self.preferences.theme
    }

    #[must_use]
    pub fn units(&self) -> Units {
        self.preferences.units
    }

    #[must_use]
    pub fn selected_date(&self) -> NaiveDate {
        self.selected_date
    }

    #[must_use]
    pub fn log_for_date(&self, date: NaiveDate) -> DailyLog {
        if self.today_log.date == Some(date) {
            return self.today_log.clone();
        }
        self.history
            .iter()
            .find(|h| h.date == date)
            .map_or_else(|| DailyLog::empty(date), |h| h.log.clone())
    }

    #[must_use]
    pub fn progress_for(&self, date: NaiveDate) -> DayProgress {
        DayProgress::compute(&self.log_for_date(date), self.profile.as_ref())
    }

    // --- Actions ---

    pub fn set_onboarded(&mut self, flag: bool) {
        self.persist(ONBOARDED_KEY, if flag { "true" } else { "false" });
        self.is_onboarded = flag;
        self.emit(ChangeKind::Onboarded, Origin::Local);
    }

    pub fn set_profile(&mut self, profile: UserProfile) {
        self.persist_json(PROFILE_KEY, &profile);
        self.profile = Some(profile);
        self.profile_edited_at = Some(self.stamp(PROFILE_EDITED_AT_KEY));
        self.emit(ChangeKind::Profile, Origin::Local);
    }

    pub fn add_food_entry(&mut self, entry: FoodEntry) {
        let today = self.today();
        let log = &mut self.today_log;
        log.food_logs.push(entry);
        log.calories_consumed = DailyLog::sum_calories(&log.food_logs);
        log.date.get_or_insert(today);
        log.updated_at = Some(Utc::now());
        self.persist_today_log();
        self.emit(ChangeKind::TodayLog, Origin::Local);
    }

    /// Add `ml` millilitres of water. Negative or non-finite deltas are ignored.
    pub fn add_water(&mut self, ml: f64) {
        if !ml.is_finite() || ml <= 0.0 {
            if ml < 0.0 {
                warn!("Ignoring negative water delta: {ml}");
            }
            return;
        }
        let today = self.today();
        let log = &mut self.today_log;
        log.water_intake = (log.water_intake + ml).max(0.0);
        log.date.get_or_insert(today);
        log.updated_at = Some(Utc::now());
        self.persist_today_log();
        self.emit(ChangeKind::TodayLog, Origin::Local);
    }

    /// Replace today's log. The calorie total is always re-derived.
    pub fn set_today_log(&mut self, log: DailyLog) {
        let mut log = log.normalized(self.today());
        log.updated_at = Some(Utc::now());
        self.today_log = log;
        self.persist_today_log();
        self.emit(ChangeKind::TodayLog, Origin::Local);
    }

    /// Replace the rolling history. Not persisted; rebuilt from remote each session.
    pub fn set_history(&mut self, history: Vec<HistoryEntry>) {
        self.history = history;
        self.emit(ChangeKind::History, Origin::Remote);
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.persist(THEME_KEY, theme.as_str());
        self.preferences.theme = theme;
        self.preferences_edited_at = Some(self.stamp(PREFERENCES_EDITED_AT_KEY));
        self.emit(ChangeKind::Theme, Origin::Local);
    }

    pub fn set_units(&mut self, units: Units) {
        self.persist(UNITS_KEY, units.as_str());
        self.preferences.units = units;
        self.preferences_edited_at = Some(self.stamp(PREFERENCES_EDITED_AT_KEY));
        self.emit(ChangeKind::Units, Origin::Local);
    }

    pub fn set_selected_date(&mut self, date: NaiveDate) {
        self.selected_date = date;
        self.emit(ChangeKind::SelectedDate, Origin::Local);
    }

    // --- Remote reconciliation ---

    /// Accept a remote profile unless it is identical or older than the last local edit.
    pub(crate) fn accept_remote_profile(
        &mut self,
        profile: UserProfile,
        written_at: Option<DateTime<Utc>>,
    ) -> bool {
        if is_stale(written_at, self.profile_edited_at) {
            debug!("Skipping stale remote profile");
            return false;
        }
        if self
            .profile
            .as_ref()
            .is_some_and(|local| fingerprint(local) == fingerprint(&profile))
        {
            return false;
        }
        self.persist_json(PROFILE_KEY, &profile);
        self.profile = Some(profile);
        self.emit(ChangeKind::Profile, Origin::Remote);
        true
    }

    pub(crate) fn accept_remote_theme(
        &mut self,
        theme: Theme,
        written_at: Option<DateTime<Utc>>,
    ) -> bool {
        if theme == self.preferences.theme || is_stale(written_at, self.preferences_edited_at) {
            return false;
        }
        self.persist(THEME_KEY, theme.as_str());
        self.preferences.theme = theme;
        self.emit(ChangeKind::Theme, Origin::Remote);
        true
    }

    pub(crate) fn accept_remote_units(
        &mut self,
        units: Units,
        written_at: Option<DateTime<Utc>>,
    ) -> bool {
        if units == self.preferences.units || is_stale(written_at, self.preferences_edited_at) {
            return false;
        }
        self.persist(UNITS_KEY, units.as_str());
        self.preferences.units = units;
        self.emit(ChangeKind::Units, Origin::Remote);
        true
    }

    /// Accept a remote today-log through the same normalisation as [`Store::set_today_log`].
    pub(crate) fn accept_remote_today_log(&mut self, log: DailyLog) -> bool {
        let incoming = log.normalized(self.today());
        if incoming.date != self.today_log.date {
            debug!("Skipping remote log for {:?}", incoming.date);
            return false;
        }
        if is_stale(incoming.updated_at, self.today_log.updated_at) {
            debug!("Skipping stale remote log");
            return false;
        }
        if fingerprint(&incoming) == fingerprint(&self.today_log) {
            return false;
        }
        self.today_log = incoming;
        self.persist_today_log();
        self.emit(ChangeKind::TodayLog, Origin::Remote);
        true
    }

    // --- Internals ---

    fn emit(&mut self, kind: ChangeKind, origin: Origin) {
        self.revision += 1;
        // No receivers is fine; nobody is listening yet.
        let _ = self.changes.send(Change {
            kind,
            origin,
            revision: self.revision,
        });
    }

    fn persist(&self, key: &str, value: &str) {
        if let Err(e) = self.storage.set(key, value) {
            warn!("Failed to persist '{key}': {e:#}");
        }
    }

    fn persist_json<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => self.persist(key, &json),
            Err(e) => warn!("Failed to serialize '{key}': {e}"),
        }
    }

    /// Record a local edit instant under `key` and return it.
    fn stamp(&self, key: &str) -> DateTime<Utc> {
        let now = Utc::now();
        self.persist(key, &now.to_rfc3339());
        now
    }

    fn persist_today_log(&self) {
        self.persist_json(TODAY_LOG_KEY, &self.today_log);
    }
}

/// A remote write is stale when it predates the most recent local edit.
fn is_stale(remote: Option<DateTime<Utc>>, local: Option<DateTime<Utc>>) -> bool {
    matches!((remote, local), (Some(r), Some(l)) if r < l)
}

/// An unreadable edit stamp only weakens conflict checks, so it is dropped
/// rather than failing the load.
fn load_stamp(storage: &LocalStorage, key: &str) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = storage.get(key)? else {
        return Ok(None);
    };
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(at) => Ok(Some(at.with_timezone(&Utc))),
        Err(e) => {
            warn!("Ignoring unreadable '{key}' stamp: {e}");
            Ok(None)
        }
    }
}

fn load_persisted(storage: &LocalStorage, today: NaiveDate) -> Result<Persisted> {
    let profile = storage
        .get(PROFILE_KEY)?
        .map(|s| serde_json::from_str::<UserProfile>(&s))
        .transpose()
        .context("Corrupt stored profile")?;

    let stored_log = storage
        .get(TODAY_LOG_KEY)?
        .map(|s| serde_json::from_str::<DailyLog>(&s))
        .transpose()
        .context("Corrupt stored today log")?;

    let today_log = match stored_log {
        Some(log) if log.date.is_some_and(|d| d != today) => {
            debug!("Rolling over today log from {:?} to {today}", log.date);
            let fresh = DailyLog::empty(today);
            if let Err(e) = storage.set(TODAY_LOG_KEY, &serde_json::to_string(&fresh)?) {
                warn!("Failed to persist rolled-over log: {e:#}");
            }
            fresh
        }
        Some(log) => log.normalized(today),
        None => DailyLog::empty(today),
    };

    let is_onboarded = storage.get(ONBOARDED_KEY)?.as_deref() == Some("true");

    let theme = storage
        .get(THEME_KEY)?
        .map(|s| s.parse::<Theme>())
        .transpose()?
        .unwrap_or_default();
    let units = storage
        .get(UNITS_KEY)?
        .map(|s| s.parse::<Units>())
        .transpose()?
        .unwrap_or_default();

    Ok(Persisted {
        is_onboarded,
        profile,
        today_log,
        preferences: Preferences { theme, units },
        profile_edited_at: load_stamp(storage, PROFILE_EDITED_AT_KEY)?,
        preferences_edited_at: load_stamp(storage, PREFERENCES_EDITED_AT_KEY)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Goal;

    fn june_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn june_second() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 2).unwrap()
    }

    fn fresh_store() -> Store {
        Store::load_with_clock(LocalStorage::open_in_memory().unwrap(), june_first)
    }

    fn reload(store: Store, clock: Clock) -> Store {
        Store::load_with_clock(store.into_storage(), clock)
    }

    fn food(name: &str, calories: f64, protein: f64, carbs: f64, fat: f64, serving: &str, time: &str) -> FoodEntry {
        FoodEntry {
            id: format!("{name}-{time}"),
            name: name.to_string(),
            calories,
            protein,
            carbs,
            fat,
            serving_size: serving.to_string(),
            time: time.to_string(),
        }
    }

    fn egg() -> FoodEntry {
        food("Egg", 78.0, 6.0, 1.0, 5.0, "1 egg", "08:00")
    }

    fn toast() -> FoodEntry {
        food("Toast", 120.0, 3.0, 22.0, 2.0, "1 slice", "08:05")
    }

    fn sample_profile() -> UserProfile {
        UserProfile {
            full_name: "Ana Souza".to_string(),
            age: 31,
            gender: "female".to_string(),
            goal: Goal::Lose,
            workout_frequency: "3-5".to_string(),
            birth_date: "1993-02-11".to_string(),
            height: 168.0,
            weight: 64.5,
            daily_calories_target: 2200.0,
            protein: 150.0,
            carbs: 250.0,
            fat: 70.0,
            preferred_cuisine: "Mediterranean".to_string(),
            water_liters: 2.1,
            diet_strategy: Some("Whole foods".to_string()),
            workout_plan: None,
        }
    }

    #[test]
    fn test_fresh_store_defaults() {
        let store = fresh_store();
        assert!(!store.is_onboarded());
        assert!(store.profile().is_none());
        assert_eq!(store.today_log().date, Some(june_first()));
        assert!(store.today_log().food_logs.is_empty());
        assert_eq!(store.theme(), Theme::Dark);
        assert_eq!(store.units(), Units::Metric);
        assert_eq!(store.selected_date(), june_first());
        assert!(store.history().is_empty());
    }

    #[test]
    fn test_add_food_entries_scenario() {
        let mut store = fresh_store();
        store.add_food_entry(egg());
        store.add_food_entry(toast());

        let log = store.today_log();
        assert!((log.calories_consumed - 198.0).abs() < f64::EPSILON);
        assert_eq!(log.food_logs.len(), 2);
        assert_eq!(log.food_logs[0].name, "Egg");
        assert_eq!(log.food_logs[1].name, "Toast");
        assert_eq!(log.date, Some(june_first()));
    }

    #[test]
    fn test_total_matches_sum_after_every_add() {
        let mut store = fresh_store();
        let calories = [78.0, 120.0, 0.0, 455.5, 12.25];
        for (i, cal) in calories.iter().enumerate() {
            store.add_food_entry(food("Item", *cal, 0.0, 0.0, 0.0, "1", &i.to_string()));
            let log = store.today_log();
            let expected: f64 = log.food_logs.iter().map(|f| f.calories).sum();
            assert!((log.calories_consumed - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_set_today_log_ignores_supplied_total() {
        let mut store = fresh_store();
        let tampered = DailyLog {
            calories_consumed: 5000.0,
            water_intake: 250.0,
            food_logs: vec![egg(), toast()],
            date: None,
            updated_at: None,
        };
        store.set_today_log(tampered.clone());
        assert!((store.today_log().calories_consumed - 198.0).abs() < f64::EPSILON);
        assert_eq!(store.today_log().date, Some(june_first()));

        store.set_today_log(tampered);
        assert!((store.today_log().calories_consumed - 198.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_add_water_accumulates() {
        let mut store = fresh_store();
        let before = store.today_log().water_intake;
        store.add_water(250.0);
        store.add_water(250.0);
        assert!((store.today_log().water_intake - before - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_add_water_never_negative() {
        let mut store = fresh_store();
        let revision = store.revision();
        store.add_water(-1000.0);
        store.add_water(f64::NAN);
        assert!((store.today_log().water_intake - 0.0).abs() < f64::EPSILON);
        assert_eq!(store.revision(), revision);
    }

    #[test]
    fn test_profile_round_trip_through_storage() {
        let mut store = fresh_store();
        store.set_profile(sample_profile());
        store.set_onboarded(true);

        let store = reload(store, june_first);
        assert_eq!(store.profile(), Some(&sample_profile()));
        assert!(store.is_onboarded());
    }

    #[test]
    fn test_same_day_reload_keeps_entries() {
        let mut store = fresh_store();
        store.add_food_entry(egg());
        store.add_water(500.0);

        let store = reload(store, june_first);
        assert_eq!(store.today_log().food_logs.len(), 1);
        assert!((store.today_log().water_intake - 500.0).abs() < f64::EPSILON);
        assert!((store.today_log().calories_consumed - 78.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rollover_on_new_day() {
        let mut store = fresh_store();
        store.add_food_entry(egg());
        store.add_water(500.0);

        let store = reload(store, june_second);
        assert_eq!(store.today_log().date, Some(june_second()));
        assert!(store.today_log().food_logs.is_empty());
        assert!((store.today_log().water_intake - 0.0).abs() < f64::EPSILON);

        // The rolled-over log is written back immediately.
        let storage = store.into_storage();
        let raw = storage.get(TODAY_LOG_KEY).unwrap().unwrap();
        assert!(raw.contains("2024-06-02"));
    }

    #[test]
    fn test_stale_persisted_total_is_recomputed() {
        let storage = LocalStorage::open_in_memory().unwrap();
        storage
            .set(
                TODAY_LOG_KEY,
                r#"{"caloriesConsumed":9000,"waterIntake":0,"date":"2024-06-01",
                    "foodLogs":[{"id":"a","name":"Egg","calories":78},{"id":"b","name":"Toast","calories":120}]}"#,
            )
            .unwrap();
        let store = Store::load_with_clock(storage, june_first);
        assert!((store.today_log().calories_consumed - 198.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_calories_do_not_produce_nan() {
        let storage = LocalStorage::open_in_memory().unwrap();
        storage
            .set(
                TODAY_LOG_KEY,
                r#"{"waterIntake":0,"date":"2024-06-01",
                    "foodLogs":[{"id":"a","name":"Egg","calories":78},{"id":"b","name":"Ghost"},{"id":"c","name":"Soup","calories":"n/a"}]}"#,
            )
            .unwrap();
        let store = Store::load_with_clock(storage, june_first);
        let total = store.today_log().calories_consumed;
        assert!(!total.is_nan());
        assert!((total - 78.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stored_log_without_date_gets_today() {
        let storage = LocalStorage::open_in_memory().unwrap();
        storage
            .set(TODAY_LOG_KEY, r#"{"caloriesConsumed":0,"waterIntake":100,"foodLogs":[]}"#)
            .unwrap();
        let store = Store::load_with_clock(storage, june_first);
        assert_eq!(store.today_log().date, Some(june_first()));
        assert!((store.today_log().water_intake - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_corrupt_key_resets_everything() {
        let storage = LocalStorage::open_in_memory().unwrap();
        storage
            .set(PROFILE_KEY, &serde_json::to_string(&sample_profile()).unwrap())
            .unwrap();
        storage.set(ONBOARDED_KEY, "true").unwrap();
        storage.set(THEME_KEY, "light").unwrap();
        storage.set(TODAY_LOG_KEY, "{not json").unwrap();

        let store = Store::load_with_clock(storage, june_first);
        assert!(store.profile().is_none());
        assert!(!store.is_onboarded());
        assert_eq!(store.theme(), Theme::Dark);
        assert_eq!(store.today_log().date, Some(june_first()));
    }

    #[test]
    fn test_unknown_theme_value_resets_everything() {
        let storage = LocalStorage::open_in_memory().unwrap();
        storage.set(ONBOARDED_KEY, "true").unwrap();
        storage.set(THEME_KEY, "neon").unwrap();
        let store = Store::load_with_clock(storage, june_first);
        assert!(!store.is_onboarded());
    }

    #[test]
    fn test_theme_and_units_persist() {
        let mut store = fresh_store();
        store.set_theme(Theme::Light);
        store.set_units(Units::Imperial);

        let store = reload(store, june_first);
        assert_eq!(store.theme(), Theme::Light);
        assert_eq!(store.units(), Units::Imperial);
    }

    #[test]
    fn test_selected_date_and_history_not_persisted() {
        let mut store = fresh_store();
        store.set_selected_date(june_second());
        store.set_history(vec![HistoryEntry {
            date: june_first(),
            log: DailyLog::empty(june_first()),
        }]);
        assert_eq!(store.selected_date(), june_second());

        let store = reload(store, june_first);
        assert_eq!(store.selected_date(), june_first());
        assert!(store.history().is_empty());
    }

    #[test]
    fn test_theme_change_is_announced() {
        let mut store = fresh_store();
        let mut rx = store.subscribe();
        store.set_theme(Theme::Light);

        let change = rx.try_recv().unwrap();
        assert_eq!(change.kind, ChangeKind::Theme);
        assert_eq!(change.origin, Origin::Local);
        assert_eq!(change.revision, store.revision());
    }

    #[test]
    fn test_history_chronological_is_ascending() {
        let mut store = fresh_store();
        let may_30 = NaiveDate::from_ymd_opt(2024, 5, 30).unwrap();
        let may_31 = NaiveDate::from_ymd_opt(2024, 5, 31).unwrap();
        store.set_history(vec![
            HistoryEntry {
                date: may_31,
                log: DailyLog::empty(may_31),
            },
            HistoryEntry {
                date: may_30,
                log: DailyLog::empty(may_30),
            },
        ]);
        let dates: Vec<NaiveDate> = store.history_chronological().iter().map(|h| h.date).collect();
        assert_eq!(dates, vec![may_30, may_31]);
        assert_eq!(store.history()[0].date, may_31);
    }

    #[test]
    fn test_log_for_date() {
        let mut store = fresh_store();
        store.add_food_entry(egg());
        let may_31 = NaiveDate::from_ymd_opt(2024, 5, 31).unwrap();
        let mut past = DailyLog::empty(may_31);
        past.food_logs.push(toast());
        let past = past.normalized(may_31);
        store.set_history(vec![HistoryEntry {
            date: may_31,
            log: past,
        }]);

        assert_eq!(store.log_for_date(june_first()).food_logs[0].name, "Egg");
        assert_eq!(store.log_for_date(may_31).food_logs[0].name, "Toast");
        assert!(store.log_for_date(june_second()).food_logs.is_empty());

        let progress = store.progress_for(may_31);
        assert!((progress.consumed - 120.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_remote_profile_overwrites_then_ignores_duplicate() {
        let mut store = fresh_store();
        store.set_profile(sample_profile());

        let mut remote = sample_profile();
        remote.daily_calories_target = 2500.0;
        let later = Some(Utc::now() + chrono::Duration::seconds(5));

        assert!(store.accept_remote_profile(remote.clone(), later));
        assert!((store.profile().unwrap().daily_calories_target - 2500.0).abs() < f64::EPSILON);

        let revision = store.revision();
        assert!(!store.accept_remote_profile(remote, later));
        assert_eq!(store.revision(), revision);
    }

    #[test]
    fn test_remote_profile_older_than_local_edit_is_rejected() {
        let mut store = fresh_store();
        let earlier = Some(Utc::now() - chrono::Duration::seconds(60));
        store.set_profile(sample_profile());

        let mut remote = sample_profile();
        remote.daily_calories_target = 1800.0;
        assert!(!store.accept_remote_profile(remote, earlier));
        assert!((store.profile().unwrap().daily_calories_target - 2200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_local_edit_stamps_survive_reload() {
        let mut store = fresh_store();
        store.set_profile(sample_profile());
        store.set_units(Units::Imperial);
        store.add_food_entry(egg());
        let mut store = reload(store, june_first);

        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        let mut remote = sample_profile();
        remote.daily_calories_target = 2500.0;
        assert!(!store.accept_remote_profile(remote, Some(hour_ago)));
        assert!((store.profile().unwrap().daily_calories_target - 2200.0).abs() < f64::EPSILON);

        assert!(!store.accept_remote_units(Units::Metric, Some(hour_ago)));
        assert_eq!(store.units(), Units::Imperial);

        let remote_log = DailyLog {
            food_logs: vec![toast()],
            updated_at: Some(hour_ago),
            ..DailyLog::empty(june_first())
        };
        assert!(!store.accept_remote_today_log(remote_log));
        assert_eq!(store.today_log().food_logs[0].name, "Egg");
    }

    #[test]
    fn test_newer_remote_profile_still_wins_after_reload() {
        let mut store = fresh_store();
        store.set_profile(sample_profile());
        let mut store = reload(store, june_first);

        let mut remote = sample_profile();
        remote.daily_calories_target = 2500.0;
        let later = Some(Utc::now() + chrono::Duration::seconds(5));
        assert!(store.accept_remote_profile(remote, later));
    }

    #[test]
    fn test_unreadable_edit_stamp_is_dropped() {
        let store = fresh_store();
        let storage = store.into_storage();
        storage.set(PROFILE_EDITED_AT_KEY, "not a time").unwrap();
        storage.set(THEME_KEY, "light").unwrap();

        let mut store = Store::load_with_clock(storage, june_first);
        assert_eq!(store.theme(), Theme::Light);
        let hour_ago = Some(Utc::now() - chrono::Duration::hours(1));
        assert!(store.accept_remote_profile(sample_profile(), hour_ago));
    }

    #[test]
    fn test_remote_profile_is_persisted_and_marked_remote() {
        let mut store = fresh_store();
        let mut rx = store.subscribe();
        assert!(store.accept_remote_profile(sample_profile(), None));
        assert_eq!(rx.try_recv().unwrap().origin, Origin::Remote);

        let store = reload(store, june_first);
        assert_eq!(store.profile(), Some(&sample_profile()));
    }

    #[test]
    fn test_remote_today_log_is_normalized() {
        let mut store = fresh_store();
        let remote = DailyLog {
            calories_consumed: 1.0,
            water_intake: 300.0,
            food_logs: vec![egg(), toast()],
            date: Some(june_first()),
            updated_at: None,
        };
        assert!(store.accept_remote_today_log(remote.clone()));
        assert!((store.today_log().calories_consumed - 198.0).abs() < f64::EPSILON);

        // Same payload again, tampered total and all, is not a change.
        let revision = store.revision();
        assert!(!store.accept_remote_today_log(remote));
        assert_eq!(store.revision(), revision);
    }

    #[test]
    fn test_remote_today_log_for_other_day_is_ignored() {
        let mut store = fresh_store();
        let remote = DailyLog {
            food_logs: vec![egg()],
            ..DailyLog::empty(june_second())
        };
        assert!(!store.accept_remote_today_log(remote));
        assert!(store.today_log().food_logs.is_empty());
    }

    #[test]
    fn test_stale_remote_today_log_is_rejected() {
        let mut store = fresh_store();
        let old = Utc::now() - chrono::Duration::seconds(30);
        store.add_food_entry(egg());

        let remote = DailyLog {
            food_logs: vec![toast()],
            updated_at: Some(old),
            ..DailyLog::empty(june_first())
        };
        assert!(!store.accept_remote_today_log(remote));
        assert_eq!(store.today_log().food_logs[0].name, "Egg");
    }

    #[test]
    fn test_remote_preferences() {
        let mut store = fresh_store();
        assert!(store.accept_remote_theme(Theme::Light, None));
        assert!(!store.accept_remote_theme(Theme::Light, None));
        assert!(store.accept_remote_units(Units::Imperial, None));
        assert_eq!(store.preferences(), Preferences {
            theme: Theme::Light,
            units: Units::Imperial,
        });

        store.set_theme(Theme::Dark);
        let stale = Some(Utc::now() - chrono::Duration::seconds(30));
        assert!(!store.accept_remote_theme(Theme::Light, stale));
        assert_eq!(store.theme(), Theme::Dark);
    }
}
