use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{DailyLog, Theme, Units, UserProfile};

/// Snapshot event delivered to a watcher. `Err` is a subscription error.
pub type WatchEvent<T> = Result<T>;

/// Dropping the receiver ends the watch.
pub type Watch<T> = mpsc::UnboundedReceiver<WatchEvent<T>>;

/// The per-identity root document: `users/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<UserProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<Units>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}

/// One document of the `users/{id}/dailyLogs` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLogDocument {
    pub id: String,
    pub log: DailyLog,
}

/// The external identity the bridge runs for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    /// Exchangeable credential issued by the identity provider.
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSession {
    pub uid: String,
    pub anonymous: bool,
    pub token: String,
}

/// A hosted document store with realtime watches and merge writes.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn sign_in_with_token(&self, identity: &Identity) -> Result<RemoteSession>;

    async fn sign_in_anonymously(&self) -> Result<RemoteSession>;

    async fn watch_user(&self, user_id: &str) -> Result<Watch<Option<UserDocument>>>;

    async fn watch_daily_log(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Watch<Option<DailyLog>>>;

    /// Daily logs ordered by date descending, at most `limit`.
    async fn watch_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Watch<Vec<DailyLogDocument>>>;

    async fn merge_user(&self, user_id: &str, patch: &UserDocument) -> Result<()>;

    async fn merge_daily_log(&self, user_id: &str, date: NaiveDate, log: &DailyLog)
    -> Result<()>;
}

/// Shallow merge: top-level keys of `patch` replace those of `target`.
pub fn merge_shallow(target: &mut Value, patch: Value) {
    match (target.as_object_mut(), patch) {
        (Some(existing), Value::Object(fields)) => {
            for (key, value) in fields {
                existing.insert(key, value);
            }
        }
        (_, patch) => *target = patch,
    }
}

pub fn decode_document<T: DeserializeOwned>(value: &Value) -> Result<T> {
    serde_json::from_value(value.clone()).map_err(|e| anyhow!("Malformed document: {e}"))
}

/// Newest first, at most `limit` entries.
pub fn history_from_documents<'a>(
    docs: impl DoubleEndedIterator<Item = (&'a String, &'a Value)>,
    limit: usize,
) -> Result<Vec<DailyLogDocument>> {
    docs.rev()
        .take(limit)
        .map(|(id, value)| {
            Ok(DailyLogDocument {
                id: id.clone(),
                log: decode_document(value)?,
            })
        })
        .collect()
}

enum Watcher {
    User {
        uid: String,
        tx: mpsc::UnboundedSender<WatchEvent<Option<UserDocument>>>,
    },
    Log {
        uid: String,
        date: String,
        tx: mpsc::UnboundedSender<WatchEvent<Option<DailyLog>>>,
    },
    History {
        uid: String,
        limit: usize,
        tx: mpsc::UnboundedSender<WatchEvent<Vec<DailyLogDocument>>>,
    },
}

impl Watcher {
    fn uid(&self) -> &str {
        match self {
            Self::User { uid, .. } | Self::Log { uid, .. } | Self::History { uid, .. } => uid,
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            Self::User { tx, .. } => tx.is_closed(),
            Self::Log { tx, .. } => tx.is_closed(),
            Self::History { tx, .. } => tx.is_closed(),
        }
    }
}

#[derive(Default)]
struct Documents {
    users: HashMap<String, Value>,
    logs: HashMap<String, BTreeMap<String, Value>>,
    watchers: Vec<Watcher>,
}

impl Documents {
    fn user_snapshot(&self, uid: &str) -> WatchEvent<Option<UserDocument>> {
        self.users.get(uid).map(decode_document).transpose()
    }

    fn log_snapshot(&self, uid: &str, date: &str) -> WatchEvent<Option<DailyLog>> {
        self.logs
            .get(uid)
            .and_then(|logs| logs.get(date))
            .map(decode_document)
            .transpose()
    }

    fn history_snapshot(&self, uid: &str, limit: usize) -> WatchEvent<Vec<DailyLogDocument>> {
        match self.logs.get(uid) {
            Some(logs) => history_from_documents(logs.iter(), limit),
            None => Ok(Vec::new()),
        }
    }

    /// Push fresh snapshots to every live watcher of `uid`; a `date` limits
    /// log watchers to that document.
    fn notify(&mut self, uid: &str, user_changed: bool, date: Option<&str>) {
        self.watchers.retain(|w| !w.is_closed());
        for watcher in &self.watchers {
            if watcher.uid() != uid {
                continue;
            }
            match watcher {
                Watcher::User { tx, .. } if user_changed => {
                    let _ = tx.send(self.user_snapshot(uid));
                }
                Watcher::Log { date: d, tx, .. } if date == Some(d.as_str()) => {
                    let _ = tx.send(self.log_snapshot(uid, d));
                }
                Watcher::History { limit, tx, .. } if date.is_some() => {
                    let _ = tx.send(self.history_snapshot(uid, *limit));
                }
                _ => {}
            }
        }
    }
}

/// In-process document store with the same merge and watch semantics as the
/// hosted one.
#[derive(Default)]
pub struct MemoryRemote {
    docs: Mutex<Documents>,
    fail_token_sign_in: AtomicBool,
    fail_anonymous_sign_in: AtomicBool,
    fail_writes: AtomicBool,
    user_writes: AtomicUsize,
    log_writes: AtomicUsize,
}

impl MemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_token_sign_in(&self, fail: bool) {
        self.fail_token_sign_in.store(fail, Ordering::SeqCst);
    }

    pub fn fail_anonymous_sign_in(&self, fail: bool) {
        self.fail_anonymous_sign_in.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn user_writes(&self) -> usize {
        self.user_writes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn log_writes(&self) -> usize {
        self.log_writes.load(Ordering::SeqCst)
    }

    /// Number of watches whose receiver is still alive.
    #[must_use]
    pub fn live_watchers(&self) -> usize {
        let mut docs = self.lock();
        docs.watchers.retain(|w| !w.is_closed());
        docs.watchers.len()
    }

    #[must_use]
    pub fn user_json(&self, uid: &str) -> Option<Value> {
        self.lock().users.get(uid).cloned()
    }

    #[must_use]
    pub fn daily_log_json(&self, uid: &str, date: NaiveDate) -> Option<Value> {
        self.lock()
            .logs
            .get(uid)
            .and_then(|logs| logs.get(&date.to_string()))
            .cloned()
    }

    /// Merge a raw JSON patch into a user document, as another device would.
    pub fn put_user_json(&self, uid: &str, patch: Value) {
        let mut docs = self.lock();
        merge_shallow(
            docs.users.entry(uid.to_string()).or_insert_with(|| Value::Object(Default::default())),
            patch,
        );
        docs.notify(uid, true, None);
    }

    /// Merge a raw JSON patch into a daily log document keyed by `id`.
    pub fn put_daily_log_json(&self, uid: &str, id: &str, patch: Value) {
        let mut docs = self.lock();
        merge_shallow(
            docs.logs
                .entry(uid.to_string())
                .or_default()
                .entry(id.to_string())
                .or_insert_with(|| Value::Object(Default::default())),
            patch,
        );
        docs.notify(uid, false, Some(id));
    }

    /// Deliver a subscription error to every watcher of `uid`.
    pub fn push_error(&self, uid: &str, message: &str) {
        let docs = self.lock();
        for watcher in docs.watchers.iter().filter(|w| w.uid() == uid) {
            match watcher {
                Watcher::User { tx, .. } => {
                    let _ = tx.send(Err(anyhow!("{message}")));
                }
                Watcher::Log { tx, .. } => {
                    let _ = tx.send(Err(anyhow!("{message}")));
                }
                Watcher::History { tx, .. } => {
                    let _ = tx.send(Err(anyhow!("{message}")));
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Documents> {
        self.docs.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("Remote store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn sign_in_with_token(&self, identity: &Identity) -> Result<RemoteSession> {
        if self.fail_token_sign_in.load(Ordering::SeqCst) {
            bail!("Token exchange rejected");
        }
        let Some(token) = identity.token.as_deref() else {
            bail!("No identity token available");
        };
        Ok(RemoteSession {
            uid: identity.user_id.clone(),
            anonymous: false,
            token: token.to_string(),
        })
    }

    async fn sign_in_anonymously(&self) -> Result<RemoteSession> {
        if self.fail_anonymous_sign_in.load(Ordering::SeqCst) {
            bail!("Anonymous sign-in disabled");
        }
        Ok(RemoteSession {
            uid: format!("anon-{}", Uuid::new_v4()),
            anonymous: true,
            token: Uuid::new_v4().to_string(),
        })
    }

    async fn watch_user(&self, user_id: &str) -> Result<Watch<Option<UserDocument>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut docs = self.lock();
        let _ = tx.send(docs.user_snapshot(user_id));
        docs.watchers.push(Watcher::User {
            uid: user_id.to_string(),
            tx,
        });
        Ok(rx)
    }

    async fn watch_daily_log(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Watch<Option<DailyLog>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let date = date.to_string();
        let mut docs = self.lock();
        let _ = tx.send(docs.log_snapshot(user_id, &date));
        docs.watchers.push(Watcher::Log {
            uid: user_id.to_string(),
            date,
            tx,
        });
        Ok(rx)
    }

    async fn watch_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Watch<Vec<DailyLogDocument>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut docs = self.lock();
        let _ = tx.send(docs.history_snapshot(user_id, limit));
        docs.watchers.push(Watcher::History {
            uid: user_id.to_string(),
            limit,
            tx,
        });
        Ok(rx)
    }

    async fn merge_user(&self, user_id: &str, patch: &UserDocument) -> Result<()> {
        self.check_writable()?;
        let patch = serde_json::to_value(patch)?;
        self.user_writes.fetch_add(1, Ordering::SeqCst);
        debug!("Merging user document for {user_id}");
        self.put_user_json(user_id, patch);
        Ok(())
    }

    async fn merge_daily_log(
        &self,
        user_id: &str,
        date: NaiveDate,
        log: &DailyLog,
    ) -> Result<()> {
        self.check_writable()?;
        let patch = serde_json::to_value(log)?;
        self.log_writes.fetch_add(1, Ordering::SeqCst);
        debug!("Merging daily log {date} for {user_id}");
        self.put_daily_log_json(user_id, &date.to_string(), patch);
        Ok(())
    }
}
