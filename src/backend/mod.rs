//! The hosted backend as seen by the stores: table CRUD plus a session surface.
//!
//! Two implementations exist: [`crate::client::PostgrestClient`] talks HTTP to
//! a PostgREST/GoTrue deployment, [`memory::InMemoryBackend`] keeps everything
//! in process for tests and the offline demo.

pub mod memory;

use crate::query::Query;
use crate::utils::Subscription;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// PostgREST code for "JSON object requested, multiple (or no) rows returned".
pub const NO_ROWS_CODE: &str = "PGRST116";

pub mod pg_codes {
    pub const INSUFFICIENT_PRIVILEGE: &str = "42501";
    pub const INFINITE_RECURSION: &str = "42P17";
    pub const UNDEFINED_TABLE: &str = "42P01";
    pub const NOT_NULL_VIOLATION: &str = "23502";
    pub const INVALID_TEXT_REPRESENTATION: &str = "22P02";
    pub const SCHEMA_CACHE_TABLE_MISSING: &str = "PGRST205";
    pub const SCHEMA_CACHE_COLUMN_MISSING: &str = "PGRST204";
    pub const JWT_INVALID: &str = "PGRST301";
    pub const ANONYMOUS_DISABLED: &str = "PGRST302";
}

/// Error body returned by PostgREST (`{code, message, details, hint}`) plus the HTTP status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl ApiError {
    pub fn new(status: u16, code: &str, message: impl Into<String>) -> Self {
        ApiError {
            status,
            code: Some(code.to_string()),
            message: message.into(),
            details: None,
            hint: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn no_rows(found: usize) -> Self {
        ApiError::new(406, NO_ROWS_CODE, "JSON object requested, multiple (or no) rows returned")
            .with_details(format!("The result contains {} rows", found))
    }
}

/// Coarse classification callers can branch on without string matching.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Unauthorized,
    NotFound,
    MissingTable,
    InvalidData,
    Other,
}

#[derive(Debug)]
pub enum BackendError {
    Transport(String),
    Api(ApiError),
    Json(serde_json::Error),
    Decode(serde_path_to_error::Error<serde_json::Error>),
    Auth(String),
    Context {
        context: String,
        source: Box<BackendError>,
    },
}

impl core::fmt::Display for BackendError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BackendError::Transport(s) => write!(f, "transport error: {}", s),
            BackendError::Api(e) => match &e.code {
                Some(code) => write!(f, "http {} ({}): {}", e.status, code, e.message),
                None => write!(f, "http {}: {}", e.status, e.message),
            },
            BackendError::Json(e) => write!(f, "json error: {}", e),
            BackendError::Decode(e) => write!(f, "decode error at {}: {}", e.path(), e.inner()),
            BackendError::Auth(e) => write!(f, "auth error: {}", e),
            BackendError::Context { context, source } => write!(f, "{}: {}", context, source),
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackendError::Json(e) => Some(e),
            BackendError::Decode(e) => Some(e),
            BackendError::Context { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(value: serde_json::Error) -> Self {
        BackendError::Json(value)
    }
}

impl From<serde_path_to_error::Error<serde_json::Error>> for BackendError {
    fn from(value: serde_path_to_error::Error<serde_json::Error>) -> Self {
        BackendError::Decode(value)
    }
}

impl From<ApiError> for BackendError {
    fn from(value: ApiError) -> Self {
        BackendError::Api(value)
    }
}

impl BackendError {
    pub fn context(self, context: impl Into<String>) -> Self {
        BackendError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping context wrappers.
    pub fn root(&self) -> &BackendError {
        match self {
            BackendError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn api(&self) -> Option<&ApiError> {
        match self.root() {
            BackendError::Api(e) => Some(e),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.api().and_then(|e| e.code.as_deref())
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            BackendError::Transport(_) => ErrorKind::Network,
            BackendError::Auth(_) => ErrorKind::Unauthorized,
            BackendError::Json(_) | BackendError::Decode(_) => ErrorKind::InvalidData,
            BackendError::Api(e) => classify_api_error(e),
            BackendError::Context { .. } => ErrorKind::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind() == ErrorKind::Unauthorized
    }

    /// The message shown to users: the backend's own text, prefixed by any context.
    pub fn message(&self) -> String {
        match self {
            BackendError::Api(e) => e.message.clone(),
            BackendError::Auth(s) | BackendError::Transport(s) => s.clone(),
            BackendError::Context { context, source } => format!("{}: {}", context, source.message()),
            other => other.to_string(),
        }
    }

    /// Raw error payload for diagnostics output.
    pub fn to_payload(&self) -> Value {
        match self.api() {
            Some(e) => json!({
                "status": e.status,
                "code": e.code,
                "message": self.message(),
                "details": e.details,
                "hint": e.hint,
            }),
            None => json!({ "message": self.message() }),
        }
    }
}

fn classify_api_error(e: &ApiError) -> ErrorKind {
    use pg_codes::*;
    match e.code.as_deref() {
        Some(NO_ROWS_CODE) => return ErrorKind::NotFound,
        Some(INSUFFICIENT_PRIVILEGE | INFINITE_RECURSION | JWT_INVALID | ANONYMOUS_DISABLED) => {
            return ErrorKind::Unauthorized;
        }
        Some(UNDEFINED_TABLE | SCHEMA_CACHE_TABLE_MISSING) => return ErrorKind::MissingTable,
        Some(INVALID_TEXT_REPRESENTATION | SCHEMA_CACHE_COLUMN_MISSING) => return ErrorKind::InvalidData,
        Some(code) if code.starts_with("23") => return ErrorKind::InvalidData,
        _ => {}
    }
    // older deployments report policy recursion without a code
    if e.message.contains("infinite recursion") || e.message.contains("row-level security") {
        return ErrorKind::Unauthorized;
    }
    match e.status {
        401 | 403 => ErrorKind::Unauthorized,
        _ => ErrorKind::Other,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Database role claimed by the token (`authenticated`, `service_role`).
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub user: AuthUser,
}

impl Session {
    pub fn expires_within(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        now + margin >= self.expires_at
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

pub trait Backend {
    fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>, BackendError>;

    /// Exactly one row, or a [`NO_ROWS_CODE`] error.
    fn select_single(&self, table: &str, query: &Query) -> Result<Value, BackendError> {
        let mut rows = self.select(table, query)?;
        if rows.len() == 1 {
            Ok(rows.remove(0))
        } else {
            Err(ApiError::no_rows(rows.len()).into())
        }
    }

    fn insert(&self, table: &str, row: Value) -> Result<Value, BackendError>;

    fn update(&self, table: &str, id: &str, patch: Value) -> Result<Value, BackendError>;

    fn delete(&self, table: &str, id: &str) -> Result<(), BackendError>;

    fn session(&self) -> Option<Session>;

    fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError>;

    fn sign_out(&self) -> Result<(), BackendError>;

    fn on_auth_state_change(&self, listener: Box<dyn Fn(&AuthChange)>) -> Subscription;

    fn admin_create_user(&self, email: &str, full_name: &str) -> Result<AuthUser, BackendError>;
}

/// Decode one JSON row, keeping the failing path in the error.
pub fn decode_row<T: serde::de::DeserializeOwned>(row: Value) -> Result<T, BackendError> {
    serde_path_to_error::deserialize(row).map_err(BackendError::from)
}

pub fn decode_rows<T: serde::de::DeserializeOwned>(rows: Value) -> Result<Vec<T>, BackendError> {
    match rows {
        Value::Array(items) => items.into_iter().map(decode_row).collect(),
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![decode_row(other)?]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_postgrest_codes() {
        let no_rows: BackendError = ApiError::no_rows(0).into();
        assert!(no_rows.is_not_found());
        assert_eq!(no_rows.code(), Some(NO_ROWS_CODE));

        let rls: BackendError = ApiError::new(
            401,
            pg_codes::INSUFFICIENT_PRIVILEGE,
            "new row violates row-level security policy for table \"farms\"",
        )
        .into();
        assert!(rls.is_unauthorized());

        let missing: BackendError =
            ApiError::new(404, pg_codes::UNDEFINED_TABLE, "relation \"public.x\" does not exist").into();
        assert_eq!(missing.kind(), ErrorKind::MissingTable);

        let shape: BackendError = ApiError::new(400, pg_codes::NOT_NULL_VIOLATION, "null value").into();
        assert_eq!(shape.kind(), ErrorKind::InvalidData);

        assert_eq!(BackendError::Transport("dns".into()).kind(), ErrorKind::Network);
    }

    #[test]
    fn policy_recursion_without_code_is_unauthorized() {
        let err: BackendError = ApiError {
            status: 500,
            code: None,
            message: "infinite recursion detected in policy for relation \"profiles\"".into(),
            details: None,
            hint: None,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn context_keeps_kind_and_prefixes_message() {
        let err = BackendError::from(ApiError::no_rows(0)).context("Failed to find user");
        assert!(err.is_not_found());
        assert_eq!(
            err.message(),
            "Failed to find user: JSON object requested, multiple (or no) rows returned"
        );
        assert_eq!(err.to_payload()["code"], NO_ROWS_CODE);
    }

    #[test]
    fn decode_reports_failing_path() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Row {
            capacity: i64,
        }
        let err = decode_rows::<Row>(serde_json::json!([{"capacity": 1}, {"capacity": "lots"}])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(err.to_string().contains("capacity"), "{}", err);
    }
}
