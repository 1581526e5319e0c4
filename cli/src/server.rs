use std::path::Path as FsPath;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use axum::{
    Extension, Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{NaiveDate, Utc};
use log::{error, info, warn};
use rusqlite::{Connection, OptionalExtension, params};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::limit::RequestBodyLimitLayer;

use nourish_core::models::DailyLog;
use nourish_core::remote::{
    DailyLogDocument, RemoteSession, UserDocument, decode_document, merge_shallow,
};

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB
const DEFAULT_HISTORY_LIMIT: usize = 7;
const MAX_HISTORY_LIMIT: usize = 100;
const MAX_UID_LEN: usize = 128;

// --- Document database ---

/// SQLite-backed home for the per-identity documents served over HTTP.
pub struct DocumentStore {
    conn: Connection,
}

impl DocumentStore {
    pub fn open(path: &FsPath) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open document database: {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = DocumentStore { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let store = DocumentStore {
            conn: Connection::open_in_memory()?,
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> anyhow::Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS sessions (
                    token TEXT PRIMARY KEY,
                    uid TEXT NOT NULL,
                    anonymous INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS users (
                    uid TEXT PRIMARY KEY,
                    doc TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS daily_logs (
                    uid TEXT NOT NULL,
                    date TEXT NOT NULL,
                    doc TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (uid, date)
                );

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    pub fn create_session(&self, uid: &str, anonymous: bool) -> anyhow::Result<RemoteSession> {
        let token = random_hex(32);
        self.conn.execute(
            "INSERT INTO sessions (token, uid, anonymous, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![token, uid, anonymous, Utc::now().to_rfc3339()],
        )?;
        Ok(RemoteSession {
            uid: uid.to_string(),
            anonymous,
            token,
        })
    }

    pub fn session(&self, token: &str) -> anyhow::Result<Option<RemoteSession>> {
        self.conn
            .query_row(
                "SELECT uid, anonymous FROM sessions WHERE token = ?1",
                params![token],
                |row| {
                    Ok(RemoteSession {
                        uid: row.get(0)?,
                        anonymous: row.get(1)?,
                        token: token.to_string(),
                    })
                },
            )
            .optional()
            .context("Failed to look up session")
    }

    pub fn user(&self, uid: &str) -> anyhow::Result<Option<Value>> {
        let doc: Option<String> = self
            .conn
            .query_row("SELECT doc FROM users WHERE uid = ?1", params![uid], |row| {
                row.get(0)
            })
            .optional()?;
        doc.map(|d| serde_json::from_str(&d).context("Corrupt user document"))
            .transpose()
    }

    pub fn put_user(&self, uid: &str, doc: &Value) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO users (uid, doc, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(uid) DO UPDATE SET doc = excluded.doc, updated_at = excluded.updated_at",
            params![uid, doc.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn daily_log(&self, uid: &str, date: NaiveDate) -> anyhow::Result<Option<Value>> {
        let doc: Option<String> = self
            .conn
            .query_row(
                "SELECT doc FROM daily_logs WHERE uid = ?1 AND date = ?2",
                params![uid, date.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        doc.map(|d| serde_json::from_str(&d).context("Corrupt daily log document"))
            .transpose()
    }

    pub fn put_daily_log(&self, uid: &str, date: NaiveDate, doc: &Value) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO daily_logs (uid, date, doc, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(uid, date) DO UPDATE SET doc = excluded.doc, updated_at = excluded.updated_at",
            params![uid, date.to_string(), doc.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Newest first, at most `limit` documents.
    pub fn history(&self, uid: &str, limit: usize) -> anyhow::Result<Vec<DailyLogDocument>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, doc FROM daily_logs WHERE uid = ?1 ORDER BY date DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![uid, i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, doc)| {
                let value: Value =
                    serde_json::from_str(&doc).context("Corrupt daily log document")?;
                Ok(DailyLogDocument {
                    log: decode_document(&value)?,
                    id,
                })
            })
            .collect()
    }
}

fn random_hex(len: usize) -> String {
    use rand::Rng;
    use std::fmt::Write;

    let mut rng = rand::rng();
    (0..len).fold(String::with_capacity(len * 2), |mut acc, _| {
        let byte: u8 = rng.random();
        let _ = write!(acc, "{byte:02x}");
        acc
    })
}

// --- State ---

#[derive(Clone, Default)]
pub struct ServerOptions {
    /// `None` disables authentication entirely.
    pub api_key: Option<String>,
    pub allow_anonymous: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    db: Arc<Mutex<DocumentStore>>,
    api_key: Option<String>,
    allow_anonymous: bool,
}

impl AppState {
    fn new(db: DocumentStore, options: ServerOptions) -> Self {
        AppState {
            db: Arc::new(Mutex::new(db)),
            api_key: options.api_key,
            allow_anonymous: options.allow_anonymous,
        }
    }

    fn db(&self) -> std::sync::MutexGuard<'_, DocumentStore> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Who is calling a protected route.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Access {
    /// Authentication disabled.
    Open,
    /// Bearer of the server API key.
    Admin,
    Session { uid: String, anonymous: bool },
}

impl Access {
    fn check(&self, uid: &str) -> Result<(), ApiError> {
        match self {
            Access::Open | Access::Admin | Access::Session { anonymous: true, .. } => Ok(()),
            Access::Session { uid: own, .. } if own == uid => Ok(()),
            Access::Session { .. } => Err(ApiError::Forbidden(format!(
                "Session may not access documents of '{uid}'"
            ))),
        }
    }
}

// --- Request / Response types ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest {
    user_id: String,
    token: String,
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Self::Internal(err) => {
                error!("Internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

fn validate_uid(uid: &str) -> Result<(), ApiError> {
    let valid = !uid.is_empty()
        && uid.len() <= MAX_UID_LEN
        && uid
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("Invalid user id '{uid}'")))
    }
}

fn parse_date(date: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("Invalid date '{date}', expected YYYY-MM-DD")))
}

/// Shallow-merge `patch` onto `existing` and make sure the result is still a
/// well-formed `T`.
fn merge_document<T: DeserializeOwned>(
    existing: Option<Value>,
    patch: Value,
) -> Result<Value, ApiError> {
    if !patch.is_object() {
        return Err(ApiError::BadRequest(
            "Document patch must be a JSON object".to_string(),
        ));
    }
    let mut doc = existing.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    merge_shallow(&mut doc, patch);
    decode_document::<T>(&doc).map_err(|e| ApiError::BadRequest(format!("{e:#}")))?;
    Ok(doc)
}

// --- Middleware ---

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let access = match state.api_key.as_deref() {
        None => Access::Open,
        Some(expected) => match bearer_token(&request) {
            Some(token) if token == expected => Access::Admin,
            Some(token) => match state.db().session(token) {
                Ok(Some(session)) => Access::Session {
                    uid: session.uid,
                    anonymous: session.anonymous,
                },
                Ok(None) => {
                    return ApiError::Unauthorized("Invalid or missing session".to_string())
                        .into_response();
                }
                Err(e) => return ApiError::Internal(e).into_response(),
            },
            None => {
                return ApiError::Unauthorized("Invalid or missing session".to_string())
                    .into_response();
            }
        },
    };
    request.extensions_mut().insert(access);
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

async fn sign_in_with_token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<RemoteSession>, ApiError> {
    validate_uid(&req.user_id)?;
    if let Some(ref expected) = state.api_key {
        if req.token != *expected {
            warn!("Rejected token sign-in for {}", req.user_id);
            return Err(ApiError::Unauthorized("Invalid identity token".to_string()));
        }
    }
    let session = state.db().create_session(&req.user_id, false)?;
    info!("Issued session for {}", session.uid);
    Ok(Json(session))
}

async fn sign_in_anonymously(
    State(state): State<AppState>,
) -> Result<Json<RemoteSession>, ApiError> {
    if !state.allow_anonymous && state.api_key.is_some() {
        return Err(ApiError::Forbidden(
            "Anonymous sign-in is disabled".to_string(),
        ));
    }
    let uid = format!("anon-{}", random_hex(8));
    let session = state.db().create_session(&uid, true)?;
    info!("Issued anonymous session {}", session.uid);
    Ok(Json(session))
}

async fn get_user(
    State(state): State<AppState>,
    Extension(access): Extension<Access>,
    Path(uid): Path<String>,
) -> Result<Json<Value>, ApiError> {
    validate_uid(&uid)?;
    access.check(&uid)?;
    let doc = state.db().user(&uid)?;
    doc.map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No document for user '{uid}'")))
}

async fn merge_user(
    State(state): State<AppState>,
    Extension(access): Extension<Access>,
    Path(uid): Path<String>,
    Json(patch): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    validate_uid(&uid)?;
    access.check(&uid)?;
    let db = state.db();
    let doc = merge_document::<UserDocument>(db.user(&uid)?, patch)?;
    db.put_user(&uid, &doc)?;
    Ok(Json(doc))
}

async fn get_daily_log(
    State(state): State<AppState>,
    Extension(access): Extension<Access>,
    Path((uid, date)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    validate_uid(&uid)?;
    access.check(&uid)?;
    let date = parse_date(&date)?;
    let doc = state.db().daily_log(&uid, date)?;
    doc.map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No log for {date}")))
}

async fn merge_daily_log(
    State(state): State<AppState>,
    Extension(access): Extension<Access>,
    Path((uid, date)): Path<(String, String)>,
    Json(patch): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    validate_uid(&uid)?;
    access.check(&uid)?;
    let date = parse_date(&date)?;
    let db = state.db();
    let doc = merge_document::<DailyLog>(db.daily_log(&uid, date)?, patch)?;
    db.put_daily_log(&uid, date, &doc)?;
    Ok(Json(doc))
}

async fn list_daily_logs(
    State(state): State<AppState>,
    Extension(access): Extension<Access>,
    Path(uid): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<DailyLogDocument>>, ApiError> {
    validate_uid(&uid)?;
    access.check(&uid)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(Json(state.db().history(&uid, limit)?))
}

pub(crate) fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/users/{uid}", get(get_user).patch(merge_user))
        .route("/v1/users/{uid}/dailyLogs", get(list_daily_logs))
        .route(
            "/v1/users/{uid}/dailyLogs/{date}",
            get(get_daily_log).patch(merge_daily_log),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    Router::new()
        .route("/v1/auth/token", post(sign_in_with_token))
        .route("/v1/auth/anonymous", post(sign_in_anonymously))
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

#[cfg(test)]
pub(crate) fn test_state(db: DocumentStore, options: ServerOptions) -> AppState {
    AppState::new(db, options)
}

// --- Server startup ---

fn startup_warnings(bind: &str, options: &ServerOptions) -> Vec<String> {
    let mut warnings = Vec::new();
    if options.api_key.is_none() {
        warnings.push("Authentication disabled (--no-auth). Documents are open to anyone.".to_string());
        if bind != "127.0.0.1" && bind != "localhost" {
            warnings.push(format!(
                "Listening on {bind} with no authentication. Any device on your network can read and write every document."
            ));
        }
    }
    if options.allow_anonymous {
        warnings.push(
            "Anonymous sign-in enabled (--allow-anonymous). Any anonymous session can read and write every user's documents."
                .to_string(),
        );
    }
    warnings
}

pub async fn start_server(
    db: DocumentStore,
    port: u16,
    bind: &str,
    options: ServerOptions,
) -> anyhow::Result<()> {
    if let Some(ref key) = options.api_key {
        eprintln!(
            "API key: {}...{} (see api_key file in data directory)",
            &key[..4.min(key.len())],
            &key[key.len().saturating_sub(4)..],
        );
    }
    for warning in startup_warnings(bind, &options) {
        eprintln!("Warning: {warning}");
    }

    let app = build_router(AppState::new(db, options));

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("Failed to bind {bind}:{port}"))?;
    eprintln!("Listening on http://{bind}:{port}");
    info!("Document store listening on {bind}:{port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down document store");
        })
        .await?;

    Ok(())
}
