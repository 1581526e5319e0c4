use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use std::path::Path;
use std::process;

use crate::config::Config;
use nourish_core::advisor::FoodEstimate;
use nourish_core::store::SharedStore;

use super::advisor;
use super::autosync;
use super::helpers::{json_error, print_estimate_table};
use super::entries::{print_logged, record_entry};

/// Images larger than this are refused before upload.
const MAX_IMAGE_BYTES: u64 = 4 * 1024 * 1024;

pub(crate) async fn cmd_coach(config: &Config, prompt: &str, json: bool) -> Result<()> {
    #[derive(Serialize)]
    struct CoachReply<'a> {
        prompt: &'a str,
        reply: &'a str,
    }

    if prompt.trim().is_empty() {
        bail!("Ask the coach something");
    }
    let advisor = advisor(config)?;
    let reply = advisor.coach_response(prompt).await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&CoachReply {
                prompt,
                reply: &reply,
            })?
        );
    } else {
        println!("{reply}");
    }
    Ok(())
}

fn encode_image(path: &Path) -> Result<String> {
    let size = std::fs::metadata(path)
        .with_context(|| format!("Cannot read image: {}", path.display()))?
        .len();
    if size > MAX_IMAGE_BYTES {
        bail!("Image is too large ({size} bytes). Use one under 4 MB");
    }
    let bytes =
        std::fs::read(path).with_context(|| format!("Cannot read image: {}", path.display()))?;
    Ok(STANDARD.encode(bytes))
}

fn report_nothing(message: &str, json: bool) -> ! {
    if json {
        println!("{}", json_error(message));
    } else {
        eprintln!("{message}");
    }
    process::exit(2);
}

pub(crate) async fn cmd_scan(
    config: &Config,
    store: &SharedStore,
    image: &Path,
    log: bool,
    json: bool,
) -> Result<()> {
    let encoded = encode_image(image)?;
    let advisor = advisor(config)?;

    let Some(estimate) = advisor.detect_food_from_image(&encoded).await else {
        report_nothing("Could not recognise any food in that image", json);
    };

    if log {
        let entry = record_entry(store, estimate.into_new_food_entry())?;
        print_logged(store, &entry, json)?;
        autosync(config, store).await;
        return Ok(());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&estimate)?);
    } else {
        print_estimate_table(std::slice::from_ref(&estimate));
        eprintln!("\nRun again with --log to add it to today.");
    }
    Ok(())
}

fn pick(mut found: Vec<FoodEstimate>, n: usize) -> Result<FoodEstimate> {
    if n == 0 || n > found.len() {
        bail!("No result #{n}; choose between 1 and {}", found.len());
    }
    Ok(found.swap_remove(n - 1))
}

pub(crate) async fn cmd_search_ai(
    config: &Config,
    store: &SharedStore,
    query: &str,
    log: Option<usize>,
    json: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        bail!("Search query must not be empty");
    }
    let advisor = advisor(config)?;
    let found = advisor.search_food(query).await;

    if found.is_empty() {
        report_nothing(&format!("No foods found for '{query}'"), json);
    }

    if let Some(n) = log {
        let chosen = pick(found, n)?;
        let entry = record_entry(store, chosen.into_new_food_entry())?;
        print_logged(store, &entry, json)?;
        autosync(config, store).await;
        return Ok(());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
    } else {
        print_estimate_table(&found);
        eprintln!("\nLog one with: nourish search-ai \"{query}\" --log <#>");
    }
    Ok(())
}
