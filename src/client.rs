//! Blocking HTTP client for a hosted PostgREST + GoTrue backend.
//!
//! - Table CRUD under `/rest/v1/<table>`, auth under `/auth/v1`.
//! - Uses `ureq` with status-as-error disabled so error bodies can be decoded.
//! - Requests carry the session token when signed in, the service-role key
//!   when configured, otherwise the anon key.
//!
//! Session handling
//! - Password grant on `sign_in`, refresh grant when the token is about to
//!   expire. No other automatic retry.

use crate::backend::{ApiError, AuthChange, AuthEvent, AuthUser, Backend, BackendError, Session};
use crate::query::Query;
use crate::utils::{Subscribers, Subscription};
use chrono::{DateTime, Duration, Utc};
use http::StatusCode;
use log::debug;
use serde::Deserialize;
use serde_json::{Value, json};
use std::cell::RefCell;

const REFRESH_MARGIN_SECS: i64 = 30;
const JSON: &str = "application/json";
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

pub struct PostgrestClient {
    agent: ureq::Agent,
    base_url: String,
    anon_key: String,
    service_role_key: Option<String>,
    session: RefCell<Option<Session>>,
    listeners: Subscribers<AuthChange>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
    user: AuthUser,
}

/// GoTrue has used several error shapes over time.
#[derive(Deserialize, Default)]
struct AuthErrorBody {
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl AuthErrorBody {
    fn into_message(self) -> Option<String> {
        self.msg.or(self.error_description).or(self.message).or(self.error)
    }
}

impl PostgrestClient {
    pub fn new(base_url: &str, anon_key: impl Into<String>, service_role_key: Option<String>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder().http_status_as_error(false).build().into();
        PostgrestClient {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            service_role_key,
            session: RefCell::new(None),
            listeners: Subscribers::new(),
        }
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Token for the `Authorization` header, refreshing the session if it is about to expire.
    fn bearer(&self) -> Result<String, BackendError> {
        let current = self.session.borrow().clone();
        match current {
            Some(s) if s.expires_within(Utc::now(), Duration::seconds(REFRESH_MARGIN_SECS)) => {
                let Some(refresh) = s.refresh_token.as_deref() else {
                    return Ok(s.access_token);
                };
                let refreshed = self.token_grant("refresh_token", json!({ "refresh_token": refresh }))?;
                let token = refreshed.access_token.clone();
                *self.session.borrow_mut() = Some(refreshed);
                debug!("Session token refreshed");
                self.emit(AuthEvent::TokenRefreshed);
                Ok(token)
            }
            Some(s) => Ok(s.access_token),
            None => Ok(self.service_role_key.clone().unwrap_or_else(|| self.anon_key.clone())),
        }
    }

    fn token_grant(&self, grant_type: &str, body: Value) -> Result<Session, BackendError> {
        let mut resp = self
            .agent
            .post(&self.auth_url("token"))
            .query("grant_type", grant_type)
            .header("apikey", &self.anon_key)
            .header("Accept", JSON)
            .send_json(&body)
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .body_mut()
            .read_to_string()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(auth_error(status, &text));
        }

        let TokenResponse {
            access_token,
            expires_in,
            refresh_token,
            user,
        } = serde_path_to_error::deserialize(&mut serde_json::Deserializer::from_str(&text))
            .map_err(|e| BackendError::Auth(format!("unexpected token response: {}", e)))?;
        Ok(Session {
            access_token,
            refresh_token,
            expires_at: token_expiry(Utc::now(), expires_in)?,
            user,
        })
    }

    fn emit(&self, event: AuthEvent) {
        let change = AuthChange {
            event,
            session: self.session.borrow().clone(),
        };
        self.listeners.emit(&change);
    }

    fn read_json(resp: Result<http::Response<ureq::Body>, ureq::Error>) -> Result<Value, BackendError> {
        let mut resp = resp.map_err(|e| BackendError::Transport(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .body_mut()
            .read_to_string()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(api_error(status, &text));
        }
        if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn filter_by_id(id: &str) -> String {
        format!("eq.{}", id)
    }
}

fn api_error(status: StatusCode, body: &str) -> BackendError {
    let mut err = serde_json::from_str::<ApiError>(body).unwrap_or_else(|_| ApiError {
        status: 0,
        code: None,
        message: if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            body.to_string()
        },
        details: None,
        hint: None,
    });
    err.status = status.as_u16();
    BackendError::Api(err)
}

fn token_expiry(now: DateTime<Utc>, expires_in: i64) -> Result<DateTime<Utc>, BackendError> {
    Duration::try_seconds(expires_in)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| BackendError::Auth(format!("token lifetime out of range: {}s", expires_in)))
}

fn auth_error(status: StatusCode, body: &str) -> BackendError {
    let message = serde_json::from_str::<AuthErrorBody>(body)
        .unwrap_or_default()
        .into_message()
        .unwrap_or_else(|| format!("http {}", status.as_u16()));
    BackendError::Auth(message)
}

/// PostgREST returns an array for `return=representation`; the stores want the single row.
fn first_row(value: Value) -> Result<Value, BackendError> {
    match value {
        Value::Array(mut rows) if rows.len() == 1 => Ok(rows.remove(0)),
        Value::Array(rows) => Err(ApiError::no_rows(rows.len()).into()),
        Value::Null => Err(ApiError::no_rows(0).into()),
        row => Ok(row),
    }
}

impl Backend for PostgrestClient {
    fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>, BackendError> {
        let token = self.bearer()?;
        let resp = self
            .agent
            .get(&self.rest_url(table))
            .query_pairs(query.to_params())
            .header("apikey", &self.anon_key)
            .header("Authorization", &format!("Bearer {}", token))
            .header("Accept", JSON)
            .call();
        match Self::read_json(resp)? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        }
    }

    fn select_single(&self, table: &str, query: &Query) -> Result<Value, BackendError> {
        let token = self.bearer()?;
        let resp = self
            .agent
            .get(&self.rest_url(table))
            .query_pairs(query.to_params())
            .header("apikey", &self.anon_key)
            .header("Authorization", &format!("Bearer {}", token))
            .header("Accept", SINGLE_OBJECT)
            .call();
        first_row(Self::read_json(resp)?)
    }

    fn insert(&self, table: &str, row: Value) -> Result<Value, BackendError> {
        let token = self.bearer()?;
        let resp = self
            .agent
            .post(&self.rest_url(table))
            .header("apikey", &self.anon_key)
            .header("Authorization", &format!("Bearer {}", token))
            .header("Accept", JSON)
            .header("Prefer", "return=representation")
            .send_json(&row);
        first_row(Self::read_json(resp)?)
    }

    fn update(&self, table: &str, id: &str, patch: Value) -> Result<Value, BackendError> {
        let token = self.bearer()?;
        let resp = self
            .agent
            .patch(&self.rest_url(table))
            .query("id", Self::filter_by_id(id))
            .header("apikey", &self.anon_key)
            .header("Authorization", &format!("Bearer {}", token))
            .header("Accept", JSON)
            .header("Prefer", "return=representation")
            .send_json(&patch);
        first_row(Self::read_json(resp)?)
    }

    fn delete(&self, table: &str, id: &str) -> Result<(), BackendError> {
        let token = self.bearer()?;
        let resp = self
            .agent
            .delete(&self.rest_url(table))
            .query("id", Self::filter_by_id(id))
            .header("apikey", &self.anon_key)
            .header("Authorization", &format!("Bearer {}", token))
            .call();
        Self::read_json(resp).map(|_| ())
    }

    fn session(&self) -> Option<Session> {
        self.session.borrow().clone()
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let session = self.token_grant("password", json!({ "email": email, "password": password }))?;
        debug!("Password grant succeeded for user {}", session.user.id);
        *self.session.borrow_mut() = Some(session.clone());
        self.emit(AuthEvent::SignedIn);
        Ok(session)
    }

    fn sign_out(&self) -> Result<(), BackendError> {
        let Some(session) = self.session.borrow_mut().take() else {
            return Ok(());
        };
        let resp = self
            .agent
            .post(&self.auth_url("logout"))
            .header("apikey", &self.anon_key)
            .header("Authorization", &format!("Bearer {}", session.access_token))
            .send_empty();
        // the local session is gone either way
        self.emit(AuthEvent::SignedOut);
        let mut resp = resp.map_err(|e| BackendError::Transport(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = resp.body_mut().read_to_string().unwrap_or_default();
            Err(auth_error(status, &text))
        }
    }

    fn on_auth_state_change(&self, listener: Box<dyn Fn(&AuthChange)>) -> Subscription {
        self.listeners.subscribe(listener)
    }

    fn admin_create_user(&self, email: &str, full_name: &str) -> Result<AuthUser, BackendError> {
        let key = self
            .service_role_key
            .as_deref()
            .ok_or_else(|| BackendError::Auth("service role key required to create users".to_string()))?;
        let mut resp = self
            .agent
            .post(&self.auth_url("admin/users"))
            .header("apikey", key)
            .header("Authorization", &format!("Bearer {}", key))
            .header("Accept", JSON)
            .send_json(&json!({
                "email": email,
                "email_confirm": true,
                "user_metadata": { "full_name": full_name },
            }))
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .body_mut()
            .read_to_string()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(auth_error(status, &text));
        }
        let user: AuthUser = serde_path_to_error::deserialize(&mut serde_json::Deserializer::from_str(&text))?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ErrorKind, NO_ROWS_CODE};

    #[test]
    fn token_lifetime_is_bounded() {
        let now = Utc::now();
        assert_eq!(token_expiry(now, 3600).unwrap(), now + Duration::hours(1));
        let err = token_expiry(now, i64::MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert!(err.to_string().contains("token lifetime out of range"));
        assert!(token_expiry(now, i64::MAX / 1000).is_err());
    }

    #[test]
    fn decodes_postgrest_error_body() {
        let body = std::fs::read_to_string("tests/data/postgrest-rls-error.json").expect("fixture present");
        let err = api_error(StatusCode::UNAUTHORIZED, &body);
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(err.code(), Some("42501"));
        assert_eq!(err.api().map(|e| e.status), Some(401));
        assert_eq!(
            err.message(),
            "new row violates row-level security policy for table \"farms\""
        );
    }

    #[test]
    fn non_json_error_body_keeps_text() {
        let err = api_error(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(err.message(), "upstream down");
        assert_eq!(err.kind(), ErrorKind::Other);

        let empty = api_error(StatusCode::SERVICE_UNAVAILABLE, "");
        assert_eq!(empty.message(), "Service Unavailable");
    }

    #[test]
    fn auth_error_accepts_old_and_new_shapes() {
        let old = auth_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        );
        assert_eq!(old.message(), "Invalid login credentials");
        let new = auth_error(
            StatusCode::BAD_REQUEST,
            r#"{"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}"#,
        );
        assert_eq!(new.message(), "Invalid login credentials");
        assert!(new.is_unauthorized());
    }

    #[test]
    fn representation_must_hold_exactly_one_row() {
        let row = first_row(json!([{"id": "a"}])).unwrap();
        assert_eq!(row["id"], "a");
        let err = first_row(json!([])).unwrap_err();
        assert_eq!(err.code(), Some(NO_ROWS_CODE));
    }

    #[test]
    fn anon_key_used_without_session() {
        let client = PostgrestClient::new("https://example.supabase.co/", "anon", None);
        assert_eq!(client.bearer().unwrap(), "anon");
        assert_eq!(client.rest_url("farms"), "https://example.supabase.co/rest/v1/farms");

        let service = PostgrestClient::new("https://example.supabase.co", "anon", Some("service".into()));
        assert_eq!(service.bearer().unwrap(), "service");
    }
}
