use anyhow::{Result, bail};
use serde::Serialize;

use crate::config::Config;
use nourish_core::models::{
    DailyLog, FoodEntry, GLASS_ML, NewFoodEntry, validate_new_food_entry,
};
use nourish_core::store::{self, SharedStore};

use super::autosync;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoggedEntry<'a> {
    entry: &'a FoodEntry,
    today: &'a DailyLog,
}

/// Append an entry to today's log.
pub(super) fn record_entry(store: &SharedStore, entry: NewFoodEntry) -> Result<FoodEntry> {
    validate_new_food_entry(&entry)?;
    let entry = entry.into_entry();
    store::lock(store).add_food_entry(entry.clone());
    Ok(entry)
}

pub(super) fn print_logged(store: &SharedStore, entry: &FoodEntry, json: bool) -> Result<()> {
    let today = store::lock(store).today_log().clone();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&LoggedEntry {
                entry,
                today: &today,
            })?
        );
    } else {
        let name = &entry.name;
        let cal = entry.calories;
        let total = today.calories_consumed;
        println!("Logged {name} ({cal:.0} kcal). Today: {total:.0} kcal");
    }
    Ok(())
}

pub(crate) async fn cmd_log(
    config: &Config,
    store: &SharedStore,
    entry: NewFoodEntry,
    json: bool,
) -> Result<()> {
    let entry = record_entry(store, entry)?;
    print_logged(store, &entry, json)?;
    autosync(config, store).await;
    Ok(())
}

pub(crate) async fn cmd_water(
    config: &Config,
    store: &SharedStore,
    ml: Option<f64>,
    json: bool,
) -> Result<()> {
    let ml = ml.unwrap_or(GLASS_ML);
    if !ml.is_finite() || ml <= 0.0 {
        bail!("Water amount must be greater than 0 ml");
    }

    let progress = {
        let mut store = store::lock(store);
        store.add_water(ml);
        let today = store.today();
        store.progress_for(today)
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&progress.water)?);
    } else {
        let water = &progress.water;
        let intake = water.intake_ml;
        let filled = water.filled_glasses;
        if water.target_ml > 0.0 {
            let target = water.target_ml;
            let total = water.total_glasses;
            println!(
                "Added {ml:.0} ml. Today: {intake:.0} / {target:.0} ml ({filled}/{total} glasses)"
            );
        } else {
            println!("Added {ml:.0} ml. Today: {intake:.0} ml ({filled} glasses)");
        }
    }

    autosync(config, store).await;
    Ok(())
}
