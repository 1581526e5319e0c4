use anyhow::{Result, bail};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::config::Config;
use nourish_core::store::{self, Change, ChangeKind, Origin, SharedStore};

use super::{bridge, push_once};

#[derive(Serialize)]
struct ChangeLine<'a> {
    kind: &'a str,
    revision: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

/// One-line description of the state a remote change produced.
fn describe(store: &SharedStore, kind: ChangeKind) -> Option<String> {
    let store = store::lock(store);
    match kind {
        ChangeKind::TodayLog => {
            let log = store.today_log();
            Some(format!(
                "{:.0} kcal, {} entries, {:.0} ml water",
                log.calories_consumed,
                log.food_logs.len(),
                log.water_intake
            ))
        }
        ChangeKind::Profile => store.profile().map(|p| {
            format!(
                "{}: {:.0} kcal target",
                p.full_name, p.daily_calories_target
            )
        }),
        ChangeKind::Theme => Some(store.theme().to_string()),
        ChangeKind::Units => Some(store.units().to_string()),
        ChangeKind::History => Some(format!("{} days", store.history().len())),
        ChangeKind::Onboarded | ChangeKind::SelectedDate => None,
    }
}

fn print_change(store: &SharedStore, change: Change, json: bool) -> Result<()> {
    let detail = describe(store, change.kind);
    if json {
        let line = ChangeLine {
            kind: change.kind.as_str(),
            revision: change.revision,
            detail,
        };
        println!("{}", serde_json::to_string(&line)?);
    } else {
        let kind = change.kind.as_str();
        match detail {
            Some(detail) => println!("[{}] {kind}: {detail}", change.revision),
            None => println!("[{}] {kind}", change.revision),
        }
    }
    Ok(())
}

pub(crate) async fn cmd_sync_watch(config: &Config, store: &SharedStore, json: bool) -> Result<()> {
    let identity = config.identity()?;
    let mut changes = store::lock(store).subscribe();
    let mut bridge = bridge(config, store)?;
    bridge.attach(identity).await;

    if !json {
        match bridge.session() {
            Some(s) if s.anonymous => eprintln!("Attached anonymously as {}", s.uid),
            Some(s) => eprintln!("Attached as {}", s.uid),
            None => eprintln!("Attached without a session; the server may refuse requests"),
        }
        eprintln!("Watching for remote changes. Press Ctrl-C to stop.");
    }

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            received = changes.recv() => match received {
                Ok(change) if change.origin == Origin::Remote => {
                    if let Err(e) = print_change(store, change, json) {
                        break Err(e);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => log::warn!("Missed {n} change notifications"),
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    bridge.detach().await;
    result
}

pub(crate) async fn cmd_sync_push(config: &Config, store: &SharedStore, json: bool) -> Result<()> {
    if !config.sync_enabled() {
        bail!("Sync is not configured. Set NOURISH_REMOTE_URL and NOURISH_USER_ID");
    }
    push_once(config, store).await?;

    let (date, revision) = {
        let store = store::lock(store);
        (store.today(), store.revision())
    };
    if json {
        println!(
            "{}",
            serde_json::json!({ "pushed": true, "date": date.to_string(), "revision": revision })
        );
    } else {
        println!("Pushed profile, preferences and the log for {date}.");
    }
    Ok(())
}
