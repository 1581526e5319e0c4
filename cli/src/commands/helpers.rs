use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use nourish_core::advisor::FoodEstimate;
use nourish_core::models::{FoodEntry, Units, inches_to_cm, lb_to_kg};

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Heights are entered in inches under imperial units.
pub(crate) fn height_to_cm(units: Units, value: f64) -> f64 {
    match units {
        Units::Metric => value,
        Units::Imperial => inches_to_cm(value),
    }
}

/// Weights are entered in pounds under imperial units.
pub(crate) fn weight_to_kg(units: Units, value: f64) -> f64 {
    match units {
        Units::Metric => value,
        Units::Imperial => lb_to_kg(value),
    }
}

/// Ask for a line of text; an empty answer takes `default` when there is one.
pub(crate) fn prompt_text(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(d) => eprint!("{label} [{d}]: "),
        None => eprint!("{label}: "),
    }
    io::stderr().flush()?;
    let line = read_line()?;
    let answer = line.trim();
    if answer.is_empty() {
        return Ok(default.unwrap_or_default().to_string());
    }
    Ok(answer.to_string())
}

pub(crate) fn prompt_number(label: &str, default: f64) -> Result<f64> {
    let answer = prompt_text(label, Some(&format!("{default}")))?;
    let value: f64 = answer
        .parse()
        .with_context(|| format!("Invalid number '{answer}'"))?;
    if !value.is_finite() || value <= 0.0 {
        bail!("{label} must be greater than 0");
    }
    Ok(value)
}

fn read_line() -> Result<String> {
    let stdin = io::stdin();
    let line = stdin.lock().lines().next().context("No input")??;
    Ok(line)
}

pub(crate) fn print_estimate_table(estimates: &[FoodEstimate]) {
    #[derive(Tabled)]
    struct EstimateRow {
        #[tabled(rename = "#")]
        idx: usize,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Serving")]
        serving: String,
        #[tabled(rename = "Calories")]
        calories: String,
        #[tabled(rename = "Protein")]
        protein: String,
        #[tabled(rename = "Carbs")]
        carbs: String,
        #[tabled(rename = "Fat")]
        fat: String,
    }

    let rows: Vec<EstimateRow> = estimates
        .iter()
        .enumerate()
        .map(|(i, e)| EstimateRow {
            idx: i + 1,
            name: truncate(&e.name, 35),
            serving: truncate(&e.serving, 15),
            calories: format!("{:.0}", no_neg_zero(e.calories)),
            protein: format!("{:.1}g", no_neg_zero(e.protein)),
            carbs: format!("{:.1}g", no_neg_zero(e.carbs)),
            fat: format!("{:.1}g", no_neg_zero(e.fat)),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..7)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_entry_table(entries: &[FoodEntry]) {
    #[derive(Tabled)]
    struct EntryRow {
        #[tabled(rename = "Time")]
        time: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Serving")]
        serving: String,
        #[tabled(rename = "Calories")]
        calories: String,
        #[tabled(rename = "Protein")]
        protein: String,
        #[tabled(rename = "Carbs")]
        carbs: String,
        #[tabled(rename = "Fat")]
        fat: String,
    }

    let rows: Vec<EntryRow> = entries
        .iter()
        .map(|e| EntryRow {
            time: e.time.clone(),
            name: truncate(&e.name, 35),
            serving: truncate(&e.serving_size, 15),
            calories: format!("{:.0}", no_neg_zero(e.calories)),
            protein: format!("{:.0}g", no_neg_zero(e.protein)),
            carbs: format!("{:.0}g", no_neg_zero(e.carbs)),
            fat: format!("{:.0}g", no_neg_zero(e.fat)),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..7)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
