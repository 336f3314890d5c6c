//! Row types for the dashboard tables, plus their insert and patch payloads.
//!
//! Notes
//! - Rows mirror the backend tables 1:1; nothing here derives or enforces
//!   relationships between stored numbers (profit, margin, shares).
//! - `New*` payloads omit backend-assigned fields (`id`, `created_at`,
//!   `updated_at`); `*Patch` payloads only serialize the fields that are set.
//! - Timestamps use `chrono` (`DateTime<Utc>`), calendar dates `NaiveDate`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =====================
// Identity
// =====================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId(value.to_string())
    }
}

/// Table metadata a store needs to manage one entity collection.
pub trait Record: DeserializeOwned + Clone {
    const TABLE: &'static str;
    const CACHE_KEY: &'static str;
    /// Subject used in notifications, e.g. "Farm" in "Farm added successfully".
    const LABEL: &'static str;
    const CREATE_VERB: &'static str = "added";
    /// Column and direction (`true` = ascending) of the collection read.
    const ORDER: (&'static str, bool) = ("created_at", false);

    type New: Serialize;
    type Patch: Serialize;

    fn id(&self) -> &RecordId;

    /// Last chance to adjust an insert payload before it is sent.
    fn before_insert(_row: &mut Map<String, Value>) {}
}

// =====================
// Enums
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FarmStatus {
    Active,
    Inactive,
    Maintenance,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Critical,
    Warning,
    Info,
    Success,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Technician,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Active,
    Completed,
    Sold,
}

// =====================
// farms
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Farm {
    pub id: RecordId,
    pub name: String,
    pub location: String,
    pub manager: String,
    pub capacity: i64,
    pub status: FarmStatus,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewFarm {
    pub name: String,
    pub location: String,
    pub manager: String,
    pub capacity: i64,
    pub status: FarmStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FarmPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FarmStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

impl Record for Farm {
    const TABLE: &'static str = "farms";
    const CACHE_KEY: &'static str = "farms";
    const LABEL: &'static str = "Farm";
    const ORDER: (&'static str, bool) = ("name", true);
    type New = NewFarm;
    type Patch = FarmPatch;

    fn id(&self) -> &RecordId {
        &self.id
    }
}

// =====================
// farm_performance
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmPerformance {
    pub id: RecordId,
    #[serde(default)]
    pub farm_id: Option<RecordId>,
    pub farm_name: String,
    /// Feed conversion ratio; lower is better.
    pub fcr: f64,
    /// Percent of the flock lost.
    pub mortality: f64,
    pub avg_weight: f64,
    pub cost_per_kg: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewFarmPerformance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub farm_id: Option<RecordId>,
    pub farm_name: String,
    pub fcr: f64,
    pub mortality: f64,
    pub avg_weight: f64,
    pub cost_per_kg: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FarmPerformancePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub farm_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fcr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mortality: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_per_kg: Option<f64>,
}

impl Record for FarmPerformance {
    const TABLE: &'static str = "farm_performance";
    const CACHE_KEY: &'static str = "farm-performance";
    const LABEL: &'static str = "Farm performance data";
    type New = NewFarmPerformance;
    type Patch = FarmPerformancePatch;

    fn id(&self) -> &RecordId {
        &self.id
    }
}

// =====================
// financial_data / cost_breakdown
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialData {
    pub id: RecordId,
    pub month: String,
    pub revenue: f64,
    pub cost: f64,
    pub profit: f64,
    pub margin: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewFinancialData {
    pub month: String,
    pub revenue: f64,
    pub cost: f64,
    pub profit: f64,
    pub margin: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FinancialDataPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin: Option<f64>,
}

impl Record for FinancialData {
    const TABLE: &'static str = "financial_data";
    const CACHE_KEY: &'static str = "financial-data";
    const LABEL: &'static str = "Financial data";
    const ORDER: (&'static str, bool) = ("created_at", true);
    type New = NewFinancialData;
    type Patch = FinancialDataPatch;

    fn id(&self) -> &RecordId {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub id: RecordId,
    /// Cost category.
    pub name: String,
    /// Percent share of total cost, as stored.
    pub value: f64,
    pub amount: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCostBreakdown {
    pub name: String,
    pub value: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostBreakdownPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

impl Record for CostBreakdown {
    const TABLE: &'static str = "cost_breakdown";
    const CACHE_KEY: &'static str = "cost-breakdown";
    const LABEL: &'static str = "Cost breakdown";
    const ORDER: (&'static str, bool) = ("created_at", true);
    type New = NewCostBreakdown;
    type Patch = CostBreakdownPatch;

    fn id(&self) -> &RecordId {
        &self.id
    }
}

// =====================
// dashboard_metrics
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardMetric {
    pub id: RecordId,
    pub metric_name: String,
    /// Display value, stored as text ("1.62", "$24.5K").
    pub metric_value: String,
    #[serde(default)]
    pub change_percentage: Option<String>,
    #[serde(default)]
    pub change_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewDashboardMetric {
    pub metric_name: String,
    pub metric_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_percentage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardMetricPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_percentage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_type: Option<String>,
}

impl Record for DashboardMetric {
    const TABLE: &'static str = "dashboard_metrics";
    const CACHE_KEY: &'static str = "dashboard-metrics";
    const LABEL: &'static str = "Dashboard metric";
    type New = NewDashboardMetric;
    type Patch = DashboardMetricPatch;

    fn id(&self) -> &RecordId {
        &self.id
    }
}

// =====================
// alerts
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: RecordId,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub title: String,
    pub message: String,
    /// Farm label as displayed; `farm_id` links the row when known.
    pub farm: String,
    #[serde(default)]
    pub farm_id: Option<RecordId>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// New alerts are always stored unread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAlert {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub title: String,
    pub message: String,
    pub farm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub farm_id: Option<RecordId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertPatch {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub alert_type: Option<AlertType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
}

impl Record for Alert {
    const TABLE: &'static str = "alerts";
    const CACHE_KEY: &'static str = "alerts";
    const LABEL: &'static str = "Alert";
    const CREATE_VERB: &'static str = "created";
    type New = NewAlert;
    type Patch = AlertPatch;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn before_insert(row: &mut Map<String, Value>) {
        row.insert("read".to_string(), Value::Bool(false));
    }
}

// =====================
// profiles / user_roles
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: RecordId,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profiles share their id with the auth user, so the id is part of the payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewProfile {
    pub id: RecordId,
    pub email: String,
    pub full_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Record for Profile {
    const TABLE: &'static str = "profiles";
    const CACHE_KEY: &'static str = "users";
    const LABEL: &'static str = "User";
    const CREATE_VERB: &'static str = "created";
    type New = NewProfile;
    type Patch = ProfilePatch;

    fn id(&self) -> &RecordId {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRole {
    pub id: RecordId,
    pub user_id: RecordId,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewUserRole {
    pub user_id: RecordId,
    pub role: Role,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserRolePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl Record for UserRole {
    const TABLE: &'static str = "user_roles";
    const CACHE_KEY: &'static str = "user-roles";
    const LABEL: &'static str = "User role";
    const ORDER: (&'static str, bool) = ("created_at", true);
    type New = NewUserRole;
    type Patch = UserRolePatch;

    fn id(&self) -> &RecordId {
        &self.id
    }
}

// =====================
// batches
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: RecordId,
    pub farm_id: RecordId,
    pub breed: String,
    pub bird_count: i64,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub status: BatchStatus,
    /// Days since placement.
    pub current_age: i64,
    pub current_weight: f64,
    pub target_weight: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewBatch {
    pub farm_id: RecordId,
    pub breed: String,
    pub bird_count: i64,
    pub start_date: NaiveDate,
    pub target_weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BatchStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bird_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BatchStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_age: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_weight: Option<f64>,
}

impl Record for Batch {
    const TABLE: &'static str = "batches";
    const CACHE_KEY: &'static str = "batches";
    const LABEL: &'static str = "Batch";
    const ORDER: (&'static str, bool) = ("start_date", false);
    type New = NewBatch;
    type Patch = BatchPatch;

    fn id(&self) -> &RecordId {
        &self.id
    }
}

/// Serialize a payload into the JSON object sent to the backend.
pub fn to_row<T: Serialize>(payload: &T) -> Result<Value, serde_json::Error> {
    serde_json::to_value(payload)
}
