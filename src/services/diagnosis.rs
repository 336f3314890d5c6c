//! Backend health probes.
//!
//! A [`ProbeRunner`] runs named steps in order, records what each one saw
//! and stops early when a step says so. Nothing is retried and nothing is
//! rolled back except what a later step cleans up explicitly.

use crate::backend::{Backend, BackendError, ErrorKind};
use crate::query::Query;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub step: String,
    pub status: StepStatus,
    pub data: Value,
    /// Raw backend error payload (`status, code, message, details, hint`).
    pub error: Option<Value>,
}

/// What a step reports back to the runner.
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    outcome: Option<(StepStatus, Value, Option<Value>)>,
    halt: Option<String>,
}

impl Probe {
    pub fn success(data: Value) -> Self {
        Probe {
            outcome: Some((StepStatus::Success, data, None)),
            halt: None,
        }
    }

    pub fn failure(data: Value, error: &BackendError) -> Self {
        Probe {
            outcome: Some((StepStatus::Failed, data, Some(error.to_payload()))),
            halt: None,
        }
    }

    /// Failed before reaching the backend, so there is no error payload.
    pub fn failed(data: Value) -> Self {
        Probe {
            outcome: Some((StepStatus::Failed, data, None)),
            halt: None,
        }
    }

    /// The step does not apply; nothing is recorded.
    pub fn skipped() -> Self {
        Probe {
            outcome: None,
            halt: None,
        }
    }

    /// Record this step, then stop the run with `reason`.
    pub fn halt(mut self, reason: impl Into<String>) -> Self {
        self.halt = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosisReport {
    pub timestamp: DateTime<Utc>,
    pub steps: Vec<StepResult>,
    /// Why the run stopped early, if it did.
    pub halted: Option<String>,
}

impl DiagnosisReport {
    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step == name)
    }

    pub fn is_healthy(&self) -> bool {
        self.halted.is_none() && self.steps.iter().all(|s| s.status == StepStatus::Success)
    }
}

type StepFn<'a, C> = Box<dyn FnOnce(&mut C) -> Probe + 'a>;

/// Ordered list of named steps sharing a mutable context `C`.
pub struct ProbeRunner<'a, C> {
    steps: Vec<(String, StepFn<'a, C>)>,
}

impl<'a, C> Default for ProbeRunner<'a, C> {
    fn default() -> Self {
        ProbeRunner { steps: Vec::new() }
    }
}

impl<'a, C> ProbeRunner<'a, C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, name: &str, f: impl FnOnce(&mut C) -> Probe + 'a) -> Self {
        self.steps.push((name.to_string(), Box::new(f)));
        self
    }

    pub fn run(self, ctx: &mut C) -> DiagnosisReport {
        let mut report = DiagnosisReport {
            timestamp: Utc::now(),
            steps: Vec::new(),
            halted: None,
        };
        for (name, f) in self.steps {
            let probe = f(ctx);
            if let Some((status, data, error)) = probe.outcome {
                info!("probe {}: {:?}", name, status);
                report.steps.push(StepResult {
                    step: name,
                    status,
                    data,
                    error,
                });
            }
            if let Some(reason) = probe.halt {
                warn!("diagnosis stopped: {}", reason);
                report.halted = Some(reason);
                break;
            }
        }
        report
    }
}

// =====================
// Farm addition
// =====================

pub const STEP_AUTH: &str = "Authentication Check";
pub const STEP_PROFILE: &str = "Profile Check";
pub const STEP_READ: &str = "RLS Read Test";
pub const STEP_INSERT: &str = "Insertion Test";
pub const STEP_CLEANUP: &str = "Cleanup Test";

#[derive(Default)]
struct FarmProbeState {
    user_id: Option<String>,
    inserted_id: Option<String>,
}

fn diagnosis_farm() -> Value {
    json!({
        "name": "Diagnosis Test Farm",
        "location": "Test Location",
        "manager": "Diagnosis",
        "capacity": 1000,
        "status": "active",
    })
}

/// Walk through everything adding a farm depends on: session, own profile,
/// read access, insert access, and delete access for the probe row.
pub fn farm_addition_diagnosis(backend: &dyn Backend) -> DiagnosisReport {
    let runner = ProbeRunner::<FarmProbeState>::new()
        .step(STEP_AUTH, |state| match backend.session() {
            Some(session) => {
                state.user_id = Some(session.user.id.clone());
                Probe::success(json!({"user": {"id": session.user.id, "email": session.user.email}}))
            }
            None => Probe::failed(json!({"user": null})).halt("Not authenticated"),
        })
        .step(STEP_PROFILE, |state| {
            let Some(user_id) = state.user_id.as_deref() else {
                return Probe::skipped();
            };
            let query = Query::columns("id, email, full_name, role").eq("id", user_id);
            match backend.select_single("profiles", &query) {
                Ok(profile) => Probe::success(profile),
                Err(e) => {
                    let reason = format!("Profile error: {}", e.message());
                    Probe::failure(Value::Null, &e).halt(reason)
                }
            }
        })
        .step(STEP_READ, |_| {
            match backend.select("farms", &Query::columns("id, name").limit(1)) {
                Ok(rows) => Probe::success(json!({"count": rows.len(), "sample": rows.first()})),
                Err(e) => Probe::failure(json!({"count": 0, "sample": null}), &e),
            }
        })
        .step(STEP_INSERT, |state| match backend.insert("farms", diagnosis_farm()) {
            Ok(row) => {
                state.inserted_id = row.get("id").and_then(Value::as_str).map(str::to_string);
                Probe::success(row)
            }
            Err(e) => Probe::failure(Value::Null, &e),
        })
        .step(STEP_CLEANUP, |state| {
            let Some(id) = state.inserted_id.as_deref() else {
                return Probe::skipped();
            };
            match backend.delete("farms", id) {
                Ok(()) => Probe::success(json!({"deleted": id})),
                Err(e) => Probe::failure(json!({"deleted": null}), &e),
            }
        });
    runner.run(&mut FarmProbeState::default())
}

// =====================
// Schema presence
// =====================

pub const REQUIRED_TABLES: [&str; 8] = [
    "farms",
    "profiles",
    "financial_data",
    "cost_breakdown",
    "farm_performance",
    "alerts",
    "dashboard_metrics",
    "batches",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableState {
    Present,
    Missing,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStatus {
    pub table: &'static str,
    pub state: TableState,
}

/// Probe each required table with `select id limit 1`.
pub fn database_status(backend: &dyn Backend) -> Vec<TableStatus> {
    REQUIRED_TABLES
        .iter()
        .map(|&table| {
            let state = match backend.select(table, &Query::columns("id").limit(1)) {
                Ok(_) => TableState::Present,
                Err(e) if e.kind() == ErrorKind::MissingTable => TableState::Missing,
                Err(e) => TableState::Error(e.message()),
            };
            TableStatus { table, state }
        })
        .collect()
}
