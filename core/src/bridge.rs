use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::{NaiveDate, Utc};
use log::{debug, error, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};

use crate::models::{DailyLog, HistoryEntry, fingerprint};
use crate::remote::{DailyLogDocument, Identity, RemoteSession, RemoteStore, UserDocument, Watch};
use crate::store::{self, Change, ChangeKind, Origin, SharedStore};

/// Quiet period after the last local change before an upload is sent.
pub const UPLOAD_DEBOUNCE: Duration = Duration::from_secs(2);

/// Number of daily logs kept in the history watch.
pub const HISTORY_LIMIT: usize = 7;

struct Attachment {
    identity: Identity,
    session: Option<RemoteSession>,
    tasks: Vec<JoinHandle<()>>,
}

/// Keeps the local store and one identity's remote documents in step.
pub struct SyncBridge<R: RemoteStore> {
    store: SharedStore,
    remote: Arc<R>,
    active: Option<Attachment>,
}

impl<R: RemoteStore> SyncBridge<R> {
    pub fn new(store: SharedStore, remote: Arc<R>) -> Self {
        Self {
            store,
            remote,
            active: None,
        }
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.active.is_some()
    }

    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.active.as_ref().map(|a| &a.identity)
    }

    /// The remote credential obtained on attach; `None` when both sign-ins failed.
    #[must_use]
    pub fn session(&self) -> Option<&RemoteSession> {
        self.active.as_ref().and_then(|a| a.session.as_ref())
    }

    /// Authenticate, then start the three listeners and the uploader.
    ///
    /// Attaching the identity that is already active does nothing; any other
    /// identity replaces it.
    pub async fn attach(&mut self, identity: Identity) {
        if self.identity() == Some(&identity) {
            return;
        }
        self.detach().await;

        let session = self.authenticate(&identity).await;
        let user_id = identity.user_id.clone();
        let today = store::lock(&self.store).today();
        // Subscribe before anything is spawned so no local change is missed.
        let changes = store::lock(&self.store).subscribe();

        let mut tasks = Vec::with_capacity(4);

        match self.remote.watch_user(&user_id).await {
            Ok(rx) => tasks.push(tokio::spawn(listen_user(self.store.clone(), rx))),
            Err(e) => error!("Failed to watch user document: {e:#}"),
        }
        match self.remote.watch_daily_log(&user_id, today).await {
            Ok(rx) => tasks.push(tokio::spawn(listen_today_log(self.store.clone(), rx))),
            Err(e) => error!("Failed to watch today's log: {e:#}"),
        }
        match self.remote.watch_history(&user_id, HISTORY_LIMIT).await {
            Ok(rx) => tasks.push(tokio::spawn(listen_history(self.store.clone(), rx))),
            Err(e) => error!("Failed to watch log history: {e:#}"),
        }
        tasks.push(tokio::spawn(run_uploader(
            self.store.clone(),
            self.remote.clone(),
            user_id.clone(),
            changes,
        )));

        info!("Sync attached for {user_id}");
        self.active = Some(Attachment {
            identity,
            session,
            tasks,
        });
    }

    /// Cancel the listeners and any pending upload. Returns once every task
    /// has stopped, so no callback runs against the old identity afterwards.
    pub async fn detach(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        for handle in &active.tasks {
            handle.abort();
        }
        for handle in active.tasks {
            let _ = handle.await;
        }
        info!("Sync detached for {}", active.identity.user_id);
    }

    /// Upload the current state now, bypassing the debounce window.
    pub async fn flush(&self) -> Result<()> {
        let Some(active) = &self.active else {
            bail!("Sync is not attached");
        };
        let (user_doc, date, log) = snapshot_upload(&self.store);
        self.remote
            .merge_user(&active.identity.user_id, &user_doc)
            .await?;
        self.remote
            .merge_daily_log(&active.identity.user_id, date, &log)
            .await?;
        Ok(())
    }

    /// Exchange the identity token, falling back to an anonymous session.
    async fn authenticate(&self, identity: &Identity) -> Option<RemoteSession> {
        if identity.token.is_some() {
            match self.remote.sign_in_with_token(identity).await {
                Ok(session) => return Some(session),
                Err(e) => warn!("Token sign-in failed, falling back to anonymous: {e:#}"),
            }
        }
        match self.remote.sign_in_anonymously().await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("Anonymous sign-in failed, continuing without a session: {e:#}");
                None
            }
        }
    }
}

impl<R: RemoteStore> Drop for SyncBridge<R> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            for handle in active.tasks {
                handle.abort();
            }
        }
    }
}

// --- Incoming ---

/// Apply a user document. Returns whether anything in the store changed.
pub fn apply_user_snapshot(store: &SharedStore, doc: UserDocument) -> bool {
    let mut store = store::lock(store);
    let mut changed = false;
    if let Some(profile) = doc.profile {
        changed |= store.accept_remote_profile(profile, doc.last_sync);
    }
    if let Some(theme) = doc.theme {
        changed |= store.accept_remote_theme(theme, doc.last_sync);
    }
    if let Some(units) = doc.units {
        changed |= store.accept_remote_units(units, doc.last_sync);
    }
    changed
}

pub fn apply_today_log_snapshot(store: &SharedStore, log: DailyLog) -> bool {
    store::lock(store).accept_remote_today_log(log)
}

/// Replace the history with the snapshot. Documents whose id is not a date are skipped.
pub fn apply_history_snapshot(store: &SharedStore, docs: Vec<DailyLogDocument>) -> bool {
    let history: Vec<HistoryEntry> = docs
        .into_iter()
        .filter_map(|doc| match doc.id.parse::<NaiveDate>() {
            Ok(date) => Some(HistoryEntry {
                date,
                log: doc.log.normalized(date),
            }),
            Err(_) => {
                warn!("Skipping daily log with non-date id '{}'", doc.id);
                None
            }
        })
        .collect();

    let mut store = store::lock(store);
    if fingerprint(store.history()) == fingerprint(&history) {
        return false;
    }
    store.set_history(history);
    true
}

async fn listen_user(store: SharedStore, mut rx: Watch<Option<UserDocument>>) {
    while let Some(event) = rx.recv().await {
        match event {
            Ok(Some(doc)) => {
                if apply_user_snapshot(&store, doc) {
                    debug!("Applied remote user document");
                }
            }
            Ok(None) => debug!("No remote user document yet"),
            Err(e) => error!("User document subscription error: {e:#}"),
        }
    }
}

async fn listen_today_log(store: SharedStore, mut rx: Watch<Option<DailyLog>>) {
    while let Some(event) = rx.recv().await {
        match event {
            Ok(Some(log)) => {
                if apply_today_log_snapshot(&store, log) {
                    debug!("Applied remote daily log");
                }
            }
            Ok(None) => debug!("No remote daily log for today yet"),
            Err(e) => error!("Daily log subscription error: {e:#}"),
        }
    }
}

async fn listen_history(store: SharedStore, mut rx: Watch<Vec<DailyLogDocument>>) {
    while let Some(event) = rx.recv().await {
        match event {
            Ok(docs) => {
                apply_history_snapshot(&store, docs);
            }
            Err(e) => error!("History subscription error: {e:#}"),
        }
    }
}

// --- Outgoing ---

fn triggers_upload(change: Change) -> bool {
    change.origin == Origin::Local
        && matches!(
            change.kind,
            ChangeKind::Profile | ChangeKind::Theme | ChangeKind::Units | ChangeKind::TodayLog
        )
}

fn snapshot_upload(store: &SharedStore) -> (UserDocument, NaiveDate, DailyLog) {
    let store = store::lock(store);
    let user_doc = UserDocument {
        profile: store.profile().cloned(),
        theme: Some(store.theme()),
        units: Some(store.units()),
        last_sync: Some(Utc::now()),
    };
    let log = store.today_log().clone();
    let date = log.date.unwrap_or_else(|| store.today());
    (user_doc, date, log)
}

/// Trailing debounce over local changes. Each expiry spawns one write of the
/// latest state; a write already in flight is left to finish.
async fn run_uploader<R: RemoteStore>(
    store: SharedStore,
    remote: Arc<R>,
    user_id: String,
    mut changes: broadcast::Receiver<Change>,
) {
    let timer = sleep(UPLOAD_DEBOUNCE);
    tokio::pin!(timer);
    let mut pending = false;

    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(change) if triggers_upload(change) => {
                    timer.as_mut().reset(Instant::now() + UPLOAD_DEBOUNCE);
                    pending = true;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Uploader lagged by {skipped} changes");
                    timer.as_mut().reset(Instant::now() + UPLOAD_DEBOUNCE);
                    pending = true;
                }
                Err(RecvError::Closed) => break,
            },
            () = &mut timer, if pending => {
                pending = false;
                let (user_doc, date, log) = snapshot_upload(&store);
                tokio::spawn(upload(remote.clone(), user_id.clone(), user_doc, date, log));
            }
        }
    }
}

async fn upload<R: RemoteStore>(
    remote: Arc<R>,
    user_id: String,
    user_doc: UserDocument,
    date: NaiveDate,
    log: DailyLog,
) {
    if let Err(e) = remote.merge_user(&user_id, &user_doc).await {
        warn!("Failed to upload user document: {e:#}");
    }
    if let Err(e) = remote.merge_daily_log(&user_id, date, &log).await {
        warn!("Failed to upload daily log {date}: {e:#}");
    }
    debug!("Uploaded state for {user_id}");
}
