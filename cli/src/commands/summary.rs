use anyhow::Result;
use log::warn;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use crate::config::Config;
use nourish_core::models::{DayProgress, MacroProgress};
use nourish_core::store::{self, SharedStore};

use super::fetch_history;
use super::helpers::{json_error, no_neg_zero, parse_date, print_entry_table};

fn macro_line(label: &str, m: &MacroProgress) -> String {
    let current = no_neg_zero(m.current);
    if m.target > 0.0 {
        let target = m.target;
        let percent = m.percent;
        format!("{label}: {current:.0}/{target:.0}g ({percent:.0}%)")
    } else {
        format!("{label}: {current:.0}g")
    }
}

fn print_progress(progress: &DayProgress) {
    let consumed = progress.consumed;
    if progress.target > 0.0 {
        let target = progress.target;
        let remaining = progress.remaining;
        let percent = progress.percent;
        println!("  CALORIES: {consumed:.0} / {target:.0} kcal ({percent:.0}%)");
        println!("  REMAINING: {remaining:.0} kcal");
    } else {
        println!("  CALORIES: {consumed:.0} kcal (no target set)");
    }
    println!(
        "  {} | {} | {}",
        macro_line("P", &progress.protein),
        macro_line("C", &progress.carbs),
        macro_line("F", &progress.fat),
    );

    let water = &progress.water;
    let intake = water.intake_ml;
    let filled = water.filled_glasses;
    if water.target_ml > 0.0 {
        let target = water.target_ml;
        let total = water.total_glasses;
        println!("  WATER: {intake:.0} / {target:.0} ml ({filled}/{total} glasses)");
    } else {
        println!("  WATER: {intake:.0} ml ({filled} glasses)");
    }
}

pub(crate) async fn cmd_summary(
    config: &Config,
    store: &SharedStore,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;

    let today = store::lock(store).today();
    if date != today && config.sync_enabled() {
        if let Err(e) = fetch_history(config, store).await {
            warn!("Could not load history: {e:#}");
        }
    }

    let (log, progress) = {
        let mut store = store::lock(store);
        store.set_selected_date(date);
        (store.log_for_date(date), store.progress_for(date))
    };

    if json {
        #[derive(serde::Serialize)]
        struct Summary<'a> {
            date: String,
            progress: &'a DayProgress,
            entries: &'a [nourish_core::models::FoodEntry],
        }
        println!(
            "{}",
            serde_json::to_string_pretty(&Summary {
                date: date.to_string(),
                progress: &progress,
                entries: &log.food_logs,
            })?
        );
        return Ok(());
    }

    if log.food_logs.is_empty() && log.water_intake <= 0.0 {
        if date == today {
            println!("=== {date} ===\n");
            print_progress(&progress);
            println!("\n  Nothing logged yet today.");
            return Ok(());
        }
        eprintln!("No entries for {date}");
        process::exit(2);
    }

    println!("=== {date} ===\n");
    if !log.food_logs.is_empty() {
        print_entry_table(&log.food_logs);
        println!();
    }
    print_progress(&progress);

    Ok(())
}

pub(crate) async fn cmd_history(config: &Config, store: &SharedStore, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct HistoryRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Calories")]
        calories: String,
        #[tabled(rename = "Protein")]
        protein: String,
        #[tabled(rename = "Carbs")]
        carbs: String,
        #[tabled(rename = "Fat")]
        fat: String,
        #[tabled(rename = "Water")]
        water: String,
    }

    if let Err(e) = fetch_history(config, store).await {
        if json {
            println!("{}", json_error(&format!("{e:#}")));
            process::exit(1);
        }
        return Err(e);
    }

    let history = store::lock(store).history_chronological();

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    if history.is_empty() {
        eprintln!("No synced days yet");
        process::exit(2);
    }

    let rows: Vec<HistoryRow> = history
        .iter()
        .rev()
        .map(|h| {
            let totals = h.log.totals();
            HistoryRow {
                date: h.date.to_string(),
                calories: format!("{:.0}", no_neg_zero(h.log.calories_consumed)),
                protein: format!("{:.0}g", no_neg_zero(totals.protein)),
                carbs: format!("{:.0}g", no_neg_zero(totals.carbs)),
                fat: format!("{:.0}g", no_neg_zero(totals.fat)),
                water: format!("{:.0} ml", no_neg_zero(h.log.water_intake)),
            }
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macro_line_with_target() {
        let m = MacroProgress::new(50.0, 100.0);
        assert_eq!(macro_line("P", &m), "P: 50/100g (50%)");
    }

    #[test]
    fn test_macro_line_without_target() {
        let m = MacroProgress::new(42.4, 0.0);
        assert_eq!(macro_line("F", &m), "F: 42g");
    }
}
