use anyhow::Result;

use crate::config::Config;
use nourish_core::models::{Preferences, Theme, Units};
use nourish_core::store::{self, SharedStore};

use super::autosync;

fn print_preferences(prefs: Preferences, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&prefs)?);
    } else {
        println!("Theme: {}", prefs.theme);
        println!("Units: {}", prefs.units);
    }
    Ok(())
}

pub(crate) async fn cmd_theme(
    config: &Config,
    store: &SharedStore,
    value: Option<String>,
    json: bool,
) -> Result<()> {
    let Some(value) = value else {
        return print_preferences(store::lock(store).preferences(), json);
    };
    let theme: Theme = value.parse()?;
    let prefs = {
        let mut store = store::lock(store);
        store.set_theme(theme);
        store.preferences()
    };
    print_preferences(prefs, json)?;
    autosync(config, store).await;
    Ok(())
}

pub(crate) async fn cmd_units(
    config: &Config,
    store: &SharedStore,
    value: Option<String>,
    json: bool,
) -> Result<()> {
    let Some(value) = value else {
        return print_preferences(store::lock(store).preferences(), json);
    };
    let units: Units = value.parse()?;
    let prefs = {
        let mut store = store::lock(store);
        store.set_units(units);
        store.preferences()
    };
    print_preferences(prefs, json)?;
    autosync(config, store).await;
    Ok(())
}
