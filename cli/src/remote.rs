use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, info};
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use nourish_core::models::{DailyLog, fingerprint};
use nourish_core::remote::{
    DailyLogDocument, Identity, RemoteSession, RemoteStore, UserDocument, Watch, WatchEvent,
};

/// How often a watch re-reads its document.
pub const POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Clone)]
struct Endpoint {
    client: reqwest::Client,
    base_url: String,
    session: Arc<Mutex<Option<RemoteSession>>>,
}

impl Endpoint {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let token = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.token.clone());
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// GET a document; 404 means it does not exist yet.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let resp = self
            .authorize(self.client.get(self.url(path)))
            .send()
            .await
            .context("Failed to reach remote store")?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check_status(resp).await?;
        Ok(Some(resp.json().await.context("Failed to parse remote document")?))
    }

    async fn patch<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<()> {
        let resp = self
            .authorize(self.client.patch(self.url(path)))
            .json(body)
            .send()
            .await
            .context("Failed to reach remote store")?;
        check_status(resp).await?;
        Ok(())
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .context("Failed to reach remote store")?;
        let resp = check_status(resp).await?;
        resp.json().await.context("Failed to parse remote response")
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body: serde_json::Value = resp.json().await.unwrap_or_default();
    let message = body["error"].as_str().unwrap_or("no details");
    bail!("Remote store returned {status}: {message}");
}

/// Client for the `nourish serve` document store.
///
/// The server has no push channel, so each watch polls its document and only
/// reports snapshots whose content changed.
pub struct HttpRemote {
    endpoint: Endpoint,
    poll_interval: Duration,
}

impl HttpRemote {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("nourish-cli/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            endpoint: Endpoint {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
                session: Arc::new(Mutex::new(None)),
            },
            poll_interval: POLL_INTERVAL,
        })
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn remember(&self, session: &RemoteSession) {
        *self
            .endpoint
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
    }

    fn spawn_poll<T, F, Fut>(&self, fetch: F) -> Watch<T>
    where
        T: Serialize + Send + 'static,
        F: Fn(Endpoint) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send,
    {
        let (tx, rx) = mpsc::unbounded_channel::<WatchEvent<T>>();
        let endpoint = self.endpoint.clone();
        let interval = self.poll_interval;
        tokio::spawn(async move {
            let mut last: Option<String> = None;
            while !tx.is_closed() {
                let event = fetch(endpoint.clone()).await;
                let current = match &event {
                    Ok(value) => fingerprint(value),
                    Err(e) => format!("error: {e:#}"),
                };
                if last.as_deref() != Some(current.as_str()) {
                    last = Some(current);
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                tokio::time::sleep(interval).await;
            }
            debug!("Watch poller stopped");
        });
        rx
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    user_id: &'a str,
    token: &'a str,
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn sign_in_with_token(&self, identity: &Identity) -> Result<RemoteSession> {
        let Some(token) = identity.token.as_deref() else {
            bail!("No identity token available");
        };
        let session: RemoteSession = self
            .endpoint
            .post(
                "/v1/auth/token",
                &TokenRequest {
                    user_id: &identity.user_id,
                    token,
                },
            )
            .await?;
        info!("Signed in to remote store as {}", session.uid);
        self.remember(&session);
        Ok(session)
    }

    async fn sign_in_anonymously(&self) -> Result<RemoteSession> {
        let session: RemoteSession = self
            .endpoint
            .post("/v1/auth/anonymous", &serde_json::json!({}))
            .await?;
        info!("Signed in to remote store anonymously");
        self.remember(&session);
        Ok(session)
    }

    async fn watch_user(&self, user_id: &str) -> Result<Watch<Option<UserDocument>>> {
        let path = format!("/v1/users/{user_id}");
        Ok(self.spawn_poll(move |endpoint| {
            let path = path.clone();
            async move { endpoint.get::<UserDocument>(&path).await }
        }))
    }

    async fn watch_daily_log(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Watch<Option<DailyLog>>> {
        let path = format!("/v1/users/{user_id}/dailyLogs/{date}");
        Ok(self.spawn_poll(move |endpoint| {
            let path = path.clone();
            async move { endpoint.get::<DailyLog>(&path).await }
        }))
    }

    async fn watch_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Watch<Vec<DailyLogDocument>>> {
        let path = format!("/v1/users/{user_id}/dailyLogs?limit={limit}");
        Ok(self.spawn_poll(move |endpoint| {
            let path = path.clone();
            async move {
                Ok(endpoint
                    .get::<Vec<DailyLogDocument>>(&path)
                    .await?
                    .unwrap_or_default())
            }
        }))
    }

    async fn merge_user(&self, user_id: &str, patch: &UserDocument) -> Result<()> {
        self.endpoint
            .patch(&format!("/v1/users/{user_id}"), patch)
            .await
    }

    async fn merge_daily_log(
        &self,
        user_id: &str,
        date: NaiveDate,
        log: &DailyLog,
    ) -> Result<()> {
        self.endpoint
            .patch(&format!("/v1/users/{user_id}/dailyLogs/{date}"), log)
            .await
    }
}
