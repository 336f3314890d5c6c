//! In-process stand-in for the hosted backend.
//!
//! Mirrors the parts of the hosted contract the stores depend on: generated
//! ids and timestamps, column defaults, not-null checks, a simplified
//! row-level policy and PostgREST-style error codes.
//!
//! Policy
//! - No session: reads see nothing, inserts are rejected (42501), updates
//!   match no rows, deletes are no-ops.
//! - Signed in: full access, except `profiles` and `user_roles`, which only
//!   admins may write (users may still edit their own profile, minus `role`).
//! - Service role: no checks at all.

use crate::backend::{ApiError, AuthChange, AuthEvent, AuthUser, Backend, BackendError, Session, pg_codes};
use crate::query::Query;
use crate::utils::{Subscribers, Subscription};
use chrono::{Duration, SecondsFormat, Utc};
use log::debug;
use serde_json::{Map, Value};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use uuid::Uuid;

const SESSION_TTL_SECS: i64 = 3600;

#[derive(Debug, Copy, Clone)]
enum ColumnDefault {
    Null,
    Bool(bool),
    Int(i64),
    Text(&'static str),
    Now,
}

struct TableSpec {
    name: &'static str,
    required: &'static [&'static str],
    defaults: &'static [(&'static str, ColumnDefault)],
    has_updated_at: bool,
}

use ColumnDefault as D;

const TABLES: &[TableSpec] = &[
    TableSpec {
        name: "farms",
        required: &["name", "location", "manager", "capacity"],
        defaults: &[("status", D::Text("active")), ("coordinates", D::Null)],
        has_updated_at: true,
    },
    TableSpec {
        name: "farm_performance",
        required: &["farm_name", "fcr", "mortality", "avg_weight", "cost_per_kg"],
        defaults: &[("farm_id", D::Null)],
        has_updated_at: true,
    },
    TableSpec {
        name: "financial_data",
        required: &["month", "revenue", "cost", "profit", "margin"],
        defaults: &[],
        has_updated_at: false,
    },
    TableSpec {
        name: "cost_breakdown",
        required: &["name", "value", "amount"],
        defaults: &[],
        has_updated_at: false,
    },
    TableSpec {
        name: "dashboard_metrics",
        required: &["metric_name", "metric_value"],
        defaults: &[("change_percentage", D::Null), ("change_type", D::Null)],
        has_updated_at: true,
    },
    TableSpec {
        name: "alerts",
        required: &["type", "title", "message", "farm"],
        defaults: &[("read", D::Bool(false)), ("farm_id", D::Null)],
        has_updated_at: false,
    },
    TableSpec {
        name: "profiles",
        required: &["id", "email", "full_name", "role"],
        defaults: &[("avatar_url", D::Null)],
        has_updated_at: true,
    },
    TableSpec {
        name: "batches",
        required: &["farm_id", "breed", "bird_count", "start_date", "target_weight"],
        defaults: &[
            ("status", D::Text("active")),
            ("current_age", D::Int(0)),
            ("current_weight", D::Int(0)),
            ("end_date", D::Null),
        ],
        has_updated_at: true,
    },
    TableSpec {
        name: "reports",
        required: &["title", "type", "format"],
        defaults: &[
            ("status", D::Text("generating")),
            ("created_by", D::Null),
            ("file_url", D::Null),
            ("size", D::Null),
            ("parameters", D::Null),
            ("generated_at", D::Now),
        ],
        has_updated_at: false,
    },
    TableSpec {
        name: "user_roles",
        required: &["user_id", "role"],
        defaults: &[],
        has_updated_at: false,
    },
];

const ADMIN_ONLY_TABLES: &[&str] = &["profiles", "user_roles"];

impl TableSpec {
    fn find(name: &str) -> Option<&'static TableSpec> {
        TABLES.iter().find(|t| t.name == name)
    }

    fn has_column(&self, column: &str) -> bool {
        matches!(column, "id" | "created_at")
            || (self.has_updated_at && column == "updated_at")
            || self.required.contains(&column)
            || self.defaults.iter().any(|(c, _)| *c == column)
    }
}

fn now_text() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn default_value(d: ColumnDefault) -> Value {
    match d {
        ColumnDefault::Null => Value::Null,
        ColumnDefault::Bool(b) => Value::Bool(b),
        ColumnDefault::Int(i) => Value::from(i),
        ColumnDefault::Text(s) => Value::from(s),
        ColumnDefault::Now => Value::from(now_text()),
    }
}

#[derive(Debug, Clone)]
struct Account {
    user: AuthUser,
    password: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Access {
    Anonymous,
    User,
    Admin,
    Service,
}

pub struct InMemoryBackend {
    tables: RefCell<BTreeMap<String, Vec<Value>>>,
    accounts: RefCell<Vec<Account>>,
    session: RefCell<Option<Session>>,
    listeners: Subscribers<AuthChange>,
    service_role: bool,
    offline: Cell<bool>,
    recursive_policies: RefCell<Vec<String>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        let tables = TABLES.iter().map(|t| (t.name.to_string(), Vec::new())).collect();
        InMemoryBackend {
            tables: RefCell::new(tables),
            accounts: RefCell::new(Vec::new()),
            session: RefCell::new(None),
            listeners: Subscribers::new(),
            service_role: false,
            offline: Cell::new(false),
            recursive_policies: RefCell::new(Vec::new()),
        }
    }

    /// Backend that behaves as if called with the service-role key.
    pub fn service_role() -> Self {
        InMemoryBackend {
            service_role: true,
            ..Self::new()
        }
    }

    /// Simulate an unreachable backend for every table call.
    pub fn set_offline(&self, offline: bool) {
        self.offline.set(offline);
    }

    /// Make reads of `table` fail the way a self-referencing policy does,
    /// except reads filtered to the caller's own row.
    pub fn break_policy(&self, table: &str) {
        self.recursive_policies.borrow_mut().push(table.to_string());
    }

    pub fn drop_table(&self, table: &str) {
        self.tables.borrow_mut().remove(table);
    }

    /// Create a login and its profile row, bypassing policies.
    pub fn register_account(&self, email: &str, password: &str, full_name: &str, role: &str) -> AuthUser {
        let user = AuthUser {
            id: Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            role: Some("authenticated".to_string()),
        };
        self.accounts.borrow_mut().push(Account {
            user: user.clone(),
            password: password.to_string(),
        });
        let profile = serde_json::json!({
            "id": user.id,
            "email": email,
            "full_name": full_name,
            "role": role,
        });
        if let Ok(row) = self.materialize("profiles", profile) {
            self.push_row("profiles", row);
        }
        user
    }

    /// Insert without any policy check.
    pub fn seed_row(&self, table: &str, row: Value) -> Result<Value, BackendError> {
        let row = self.materialize(table, row)?;
        self.push_row(table, row.clone());
        Ok(row)
    }

    /// Raw table contents, bypassing policies.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables.borrow().get(table).cloned().unwrap_or_default()
    }

    fn push_row(&self, table: &str, row: Value) {
        if let Some(rows) = self.tables.borrow_mut().get_mut(table) {
            rows.push(row);
        }
    }

    fn access(&self) -> Access {
        if self.service_role {
            return Access::Service;
        }
        let Some(uid) = self.session.borrow().as_ref().map(|s| s.user.id.clone()) else {
            return Access::Anonymous;
        };
        let is_admin = self
            .rows("profiles")
            .iter()
            .any(|p| p.get("id").and_then(Value::as_str) == Some(uid.as_str()) && p.get("role") == Some(&Value::from("admin")));
        if is_admin { Access::Admin } else { Access::User }
    }

    fn caller_id(&self) -> Option<String> {
        self.session.borrow().as_ref().map(|s| s.user.id.clone())
    }

    fn check_reachable(&self) -> Result<(), BackendError> {
        if self.offline.get() {
            return Err(BackendError::Transport("connection refused".to_string()));
        }
        Ok(())
    }

    fn spec(&self, table: &str) -> Result<&'static TableSpec, BackendError> {
        match TableSpec::find(table) {
            Some(spec) if self.tables.borrow().contains_key(table) => Ok(spec),
            _ => Err(ApiError::new(
                404,
                pg_codes::UNDEFINED_TABLE,
                format!("relation \"public.{}\" does not exist", table),
            )
            .into()),
        }
    }

    fn rls_violation(table: &str) -> BackendError {
        ApiError::new(
            401,
            pg_codes::INSUFFICIENT_PRIVILEGE,
            format!("new row violates row-level security policy for table \"{}\"", table),
        )
        .into()
    }

    fn check_columns(spec: &TableSpec, obj: &Map<String, Value>) -> Result<(), BackendError> {
        if let Some(unknown) = obj.keys().find(|k| !spec.has_column(k)) {
            return Err(ApiError::new(
                400,
                pg_codes::SCHEMA_CACHE_COLUMN_MISSING,
                format!("Could not find the '{}' column of '{}' in the schema cache", unknown, spec.name),
            )
            .into());
        }
        Ok(())
    }

    /// Apply defaults, generated fields and not-null checks to an insert payload.
    fn materialize(&self, table: &str, row: Value) -> Result<Value, BackendError> {
        let spec = self.spec(table)?;
        let Value::Object(mut obj) = row else {
            return Err(ApiError::new(400, "PGRST102", "Empty or invalid json").into());
        };
        Self::check_columns(spec, &obj)?;

        for column in spec.required {
            if obj.get(*column).is_none_or(Value::is_null) {
                return Err(ApiError::new(
                    400,
                    pg_codes::NOT_NULL_VIOLATION,
                    format!(
                        "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                        column, table
                    ),
                )
                .into());
            }
        }
        for (column, default) in spec.defaults {
            obj.entry(column.to_string()).or_insert_with(|| default_value(*default));
        }
        obj.entry("id").or_insert_with(|| Value::from(Uuid::new_v4().to_string()));
        let now = now_text();
        obj.insert("created_at".to_string(), Value::from(now.clone()));
        if spec.has_updated_at {
            obj.insert("updated_at".to_string(), Value::from(now));
        }
        Ok(Value::Object(obj))
    }

    fn may_write(&self, table: &str, target_id: Option<&str>, touches_role: bool) -> bool {
        match self.access() {
            Access::Service | Access::Admin => true,
            Access::Anonymous => false,
            Access::User if !ADMIN_ONLY_TABLES.contains(&table) => true,
            Access::User => {
                table == "profiles" && !touches_role && target_id.is_some() && target_id == self.caller_id().as_deref()
            }
        }
    }

    fn check_policy(&self, table: &str, query: &Query) -> Result<(), BackendError> {
        if self.service_role || !self.recursive_policies.borrow().iter().any(|t| t == table) {
            return Ok(());
        }
        let caller = self.caller_id();
        let own_row = query
            .filters()
            .iter()
            .any(|(column, value)| column == "id" && value.as_str() == caller.as_deref());
        if own_row {
            return Ok(());
        }
        Err(ApiError::new(
            500,
            pg_codes::INFINITE_RECURSION,
            format!("infinite recursion detected in policy for relation \"{}\"", table),
        )
        .into())
    }

    fn emit(&self, event: AuthEvent) {
        let change = AuthChange {
            event,
            session: self.session.borrow().clone(),
        };
        self.listeners.emit(&change);
    }
}

impl Backend for InMemoryBackend {
    fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>, BackendError> {
        self.check_reachable()?;
        self.spec(table)?;
        if self.access() == Access::Anonymous {
            return Ok(Vec::new());
        }
        self.check_policy(table, query)?;
        let tables = self.tables.borrow();
        let rows = tables.get(table).map(Vec::as_slice).unwrap_or_default();
        Ok(query.apply(rows))
    }

    fn insert(&self, table: &str, row: Value) -> Result<Value, BackendError> {
        self.check_reachable()?;
        self.spec(table)?;
        let id = row.get("id").and_then(Value::as_str).map(str::to_string);
        if !self.may_write(table, id.as_deref(), false) {
            return Err(Self::rls_violation(table));
        }
        let row = self.materialize(table, row)?;
        debug!("memory: insert into {} id={}", table, row["id"]);
        self.push_row(table, row.clone());
        Ok(row)
    }

    fn update(&self, table: &str, id: &str, patch: Value) -> Result<Value, BackendError> {
        self.check_reachable()?;
        let spec = self.spec(table)?;
        let Value::Object(patch) = patch else {
            return Err(ApiError::new(400, "PGRST102", "Empty or invalid json").into());
        };
        Self::check_columns(spec, &patch)?;

        let visible = self.access() != Access::Anonymous;
        let touches_role = patch.contains_key("role");
        if visible && !self.may_write(table, Some(id), touches_role) {
            return Err(Self::rls_violation(table));
        }

        let mut tables = self.tables.borrow_mut();
        let rows = tables.get_mut(table).map(Vec::as_mut_slice).unwrap_or_default();
        let target = rows
            .iter_mut()
            .filter(|_| visible)
            .find(|r| r.get("id").and_then(Value::as_str) == Some(id));
        let Some(Value::Object(row)) = target else {
            return Err(ApiError::no_rows(0).into());
        };
        for (k, v) in patch {
            row.insert(k, v);
        }
        if spec.has_updated_at {
            row.insert("updated_at".to_string(), Value::from(now_text()));
        }
        Ok(Value::Object(row.clone()))
    }

    fn delete(&self, table: &str, id: &str) -> Result<(), BackendError> {
        self.check_reachable()?;
        self.spec(table)?;
        match self.access() {
            // rows invisible to the caller are simply not matched
            Access::Anonymous => return Ok(()),
            _ if !self.may_write(table, Some(id), false) => return Err(Self::rls_violation(table)),
            _ => {}
        }
        if let Some(rows) = self.tables.borrow_mut().get_mut(table) {
            rows.retain(|r| r.get("id").and_then(Value::as_str) != Some(id));
        }
        Ok(())
    }

    fn session(&self) -> Option<Session> {
        self.session.borrow().clone()
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let account = self
            .accounts
            .borrow()
            .iter()
            .find(|a| a.user.email.as_deref() == Some(email) && a.password == password)
            .cloned()
            .ok_or_else(|| BackendError::Auth("Invalid login credentials".to_string()))?;

        let session = Session {
            access_token: Uuid::new_v4().to_string(),
            refresh_token: Some(Uuid::new_v4().to_string()),
            expires_at: Utc::now() + Duration::seconds(SESSION_TTL_SECS),
            user: account.user,
        };
        *self.session.borrow_mut() = Some(session.clone());
        self.emit(AuthEvent::SignedIn);
        Ok(session)
    }

    fn sign_out(&self) -> Result<(), BackendError> {
        self.session.borrow_mut().take();
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    fn on_auth_state_change(&self, listener: Box<dyn Fn(&AuthChange)>) -> Subscription {
        self.listeners.subscribe(listener)
    }

    fn admin_create_user(&self, email: &str, _full_name: &str) -> Result<AuthUser, BackendError> {
        if !self.service_role {
            return Err(BackendError::Auth("User not allowed".to_string()));
        }
        if self.accounts.borrow().iter().any(|a| a.user.email.as_deref() == Some(email)) {
            return Err(BackendError::Auth(
                "A user with this email address has already been registered".to_string(),
            ));
        }
        let user = AuthUser {
            id: Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            role: Some("authenticated".to_string()),
        };
        self.accounts.borrow_mut().push(Account {
            user: user.clone(),
            password: Uuid::new_v4().to_string(),
        });
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ErrorKind;
    use serde_json::json;

    fn farm_payload() -> Value {
        json!({"name": "Test Farm", "location": "Test Loc", "manager": "Ana", "capacity": 1000, "status": "active"})
    }

    fn signed_in() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        backend.register_account("op@flockmate.test", "pw", "Operator", "manager");
        backend.sign_in("op@flockmate.test", "pw").unwrap();
        backend
    }

    #[test]
    fn insert_assigns_id_timestamps_and_defaults() {
        let backend = signed_in();
        let mut payload = farm_payload();
        payload.as_object_mut().unwrap().remove("status");
        let row = backend.insert("farms", payload).unwrap();
        assert!(row["id"].as_str().is_some_and(|s| !s.is_empty()));
        assert!(row["created_at"].is_string());
        assert!(row["updated_at"].is_string());
        assert_eq!(row["status"], "active");
    }

    #[test]
    fn anonymous_insert_violates_policy() {
        let backend = InMemoryBackend::new();
        let err = backend.insert("farms", farm_payload()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert!(backend.rows("farms").is_empty());
    }

    #[test]
    fn missing_required_column_is_a_data_error() {
        let backend = signed_in();
        let err = backend
            .insert("farms", json!({"name": "x", "location": "y", "capacity": 1}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(err.message().contains("\"manager\""));
    }

    #[test]
    fn update_of_unknown_id_reports_no_rows() {
        let backend = signed_in();
        let err = backend.update("farms", "nope", json!({"status": "inactive"})).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn delete_of_unknown_id_keeps_other_rows() {
        let backend = signed_in();
        backend.insert("farms", farm_payload()).unwrap();
        backend.delete("farms", "missing").unwrap();
        assert_eq!(backend.rows("farms").len(), 1);
    }

    #[test]
    fn non_admin_cannot_change_roles() {
        let backend = InMemoryBackend::new();
        let me = backend.register_account("tech@flockmate.test", "pw", "Tech", "technician");
        backend.sign_in("tech@flockmate.test", "pw").unwrap();

        backend.update("profiles", &me.id, json!({"full_name": "Tech Two"})).unwrap();
        let err = backend.update("profiles", &me.id, json!({"role": "admin"})).unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[test]
    fn dropped_table_is_reported_missing() {
        let backend = signed_in();
        backend.drop_table("batches");
        let err = backend.select("batches", &Query::all()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingTable);
    }

    #[test]
    fn auth_listeners_see_sign_in_and_out() {
        let backend = InMemoryBackend::new();
        backend.register_account("a@b.c", "pw", "A", "admin");
        let events = std::rc::Rc::new(RefCell::new(Vec::new()));
        let sink = std::rc::Rc::clone(&events);
        let sub = backend.on_auth_state_change(Box::new(move |c| sink.borrow_mut().push(c.event)));

        backend.sign_in("a@b.c", "pw").unwrap();
        backend.sign_out().unwrap();
        drop(sub);
        backend.sign_in("a@b.c", "pw").unwrap();

        assert_eq!(*events.borrow(), vec![AuthEvent::SignedIn, AuthEvent::SignedOut]);
    }
}
