mod coach;
mod entries;
mod helpers;
mod onboard;
mod prefs;
mod profile;
mod summary;
mod sync;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use log::warn;

use crate::config::Config;
use crate::groq::GroqClient;
use crate::remote::HttpRemote;
use nourish_core::advisor::Advisor;
use nourish_core::bridge::{self, HISTORY_LIMIT, SyncBridge};
use nourish_core::remote::{Identity, RemoteStore};
use nourish_core::store::SharedStore;

pub(crate) use coach::{cmd_coach, cmd_scan, cmd_search_ai};
pub(crate) use entries::{cmd_log, cmd_water};
pub(crate) use onboard::{OnboardArgs, cmd_onboard};
pub(crate) use prefs::{cmd_theme, cmd_units};
pub(crate) use profile::{ProfileUpdate, cmd_profile_refresh, cmd_profile_set, cmd_profile_show};
pub(crate) use summary::{cmd_history, cmd_summary};
pub(crate) use sync::{cmd_sync_push, cmd_sync_watch};

pub(super) fn advisor(config: &Config) -> Result<Advisor<GroqClient>> {
    Ok(Advisor::new(GroqClient::from_config(config)?))
}

pub(super) fn bridge(config: &Config, store: &SharedStore) -> Result<SyncBridge<HttpRemote>> {
    let remote = HttpRemote::new(config.remote_url()?)?;
    Ok(SyncBridge::new(store.clone(), Arc::new(remote)))
}

/// Push local changes right away when sync is configured. Failures only warn;
/// the change is already saved locally.
pub(super) async fn autosync(config: &Config, store: &SharedStore) {
    if !config.sync_enabled() {
        return;
    }
    if let Err(e) = push_once(config, store).await {
        warn!("Sync failed, changes kept locally: {e:#}");
        eprintln!("Warning: could not sync ({e:#}). Run `nourish sync push` later.");
    }
}

pub(super) async fn push_once(config: &Config, store: &SharedStore) -> Result<()> {
    let identity = config.identity()?;
    let mut bridge = bridge(config, store)?;
    bridge.attach(identity).await;
    let result = bridge.flush().await;
    bridge.detach().await;
    result
}

/// Sign in the way the bridge does: identity token first, anonymous second.
async fn connect(remote: &HttpRemote, identity: &Identity) -> Result<()> {
    if identity.token.is_some() && remote.sign_in_with_token(identity).await.is_ok() {
        return Ok(());
    }
    remote
        .sign_in_anonymously()
        .await
        .map(|_| ())
        .context("Could not sign in to the remote store")
}

/// Load the recent daily logs from the remote store into the history.
pub(super) async fn fetch_history(config: &Config, store: &SharedStore) -> Result<()> {
    if !config.sync_enabled() {
        bail!("History lives in the remote store. Set NOURISH_REMOTE_URL and NOURISH_USER_ID");
    }
    let identity = config.identity()?;
    let remote = HttpRemote::new(config.remote_url()?)?;
    connect(&remote, &identity).await?;

    let mut rx = remote.watch_history(&identity.user_id, HISTORY_LIMIT).await?;
    let docs = rx
        .recv()
        .await
        .context("History watch closed before the first snapshot")??;
    bridge::apply_history_snapshot(store, docs);
    Ok(())
}
