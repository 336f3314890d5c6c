//! Deterministic demo data for an empty backend.

use crate::backend::{Backend, BackendError, decode_row};
use crate::models::records::{
    AlertType, BatchStatus, Coordinates, Farm, FarmStatus, NewAlert, NewBatch, NewCostBreakdown, NewDashboardMetric,
    NewFarm, NewFarmPerformance, NewFinancialData, Record, RecordId, to_row,
};
use chrono::{Duration, NaiveDate, Utc};
use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

const SEED: u64 = 0x0F10_C4A7_E5EE_D001;
const FARMS: [(&str, &str, &str, f64, f64); 5] = [
    ("Greenfield Farm", "Bukidnon", "Maria Santos", 8.05, 124.92),
    ("Valley Farm", "Nueva Ecija", "Jose Reyes", 15.58, 121.02),
    ("Hillside Farm", "Batangas", "Ana Cruz", 13.94, 121.16),
    ("Sunrise Poultry", "Pampanga", "Luis Garcia", 15.08, 120.62),
    ("Riverside Farm", "Iloilo", "Carmen Lopez", 10.72, 122.56),
];
const MONTHS: [&str; 6] = ["Jan", "Feb", "Mar", "Apr", "May", "Jun"];
const COST_SHARES: [(&str, f64); 5] = [
    ("Feed", 65.0),
    ("Labor", 15.0),
    ("Healthcare", 8.0),
    ("Utilities", 7.0),
    ("Other", 5.0),
];
const BREEDS: [&str; 3] = ["Ross 308", "Cobb 500", "Hubbard Classic"];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub farms: usize,
    pub performance: usize,
    pub financial: usize,
    pub costs: usize,
    pub metrics: usize,
    pub alerts: usize,
    pub batches: usize,
}

impl SeedSummary {
    pub fn total(&self) -> usize {
        self.farms + self.performance + self.financial + self.costs + self.metrics + self.alerts + self.batches
    }
}

fn insert<T: Serialize>(backend: &dyn Backend, table: &str, payload: &T) -> Result<serde_json::Value, BackendError> {
    backend
        .insert(table, to_row(payload)?)
        .map_err(|e| e.context(format!("seeding {}", table)))
}

/// Insert one demo data set. Running it twice inserts everything twice.
pub fn run(backend: &dyn Backend) -> Result<SeedSummary, BackendError> {
    let mut rng = SmallRng::seed_from_u64(SEED);
    let mut summary = SeedSummary::default();
    let today = Utc::now().date_naive();

    let mut farms: Vec<Farm> = Vec::with_capacity(FARMS.len());
    for (index, (name, location, manager, lat, lng)) in FARMS.iter().enumerate() {
        let status = match index {
            3 => FarmStatus::Maintenance,
            4 => FarmStatus::Inactive,
            _ => FarmStatus::Active,
        };
        let farm = NewFarm {
            name: name.to_string(),
            location: location.to_string(),
            manager: manager.to_string(),
            capacity: rng.random_range(10..=30) * 1000,
            status,
            coordinates: Some(Coordinates { lat: *lat, lng: *lng }),
        };
        farms.push(decode_row(insert(backend, Farm::TABLE, &farm)?)?);
        summary.farms += 1;
    }

    for farm in &farms {
        let performance = NewFarmPerformance {
            farm_id: Some(farm.id.clone()),
            farm_name: farm.name.clone(),
            fcr: round2(rng.random_range(1.45..=1.85)),
            mortality: round2(rng.random_range(1.5..=5.5)),
            avg_weight: round2(rng.random_range(2.0..=2.6)),
            cost_per_kg: round2(rng.random_range(1.6..=2.2)),
        };
        insert(backend, "farm_performance", &performance)?;
        summary.performance += 1;

        for batch_index in 0..2 {
            let started = today - Duration::days(rng.random_range(5..=90) + batch_index * 45);
            insert(backend, "batches", &new_batch(&farm.id, started, &mut rng))?;
            summary.batches += 1;
        }
    }

    for month in MONTHS {
        let revenue = (rng.random_range(2_000.0..=3_200.0_f64) * 1000.0).round();
        let cost = (revenue * rng.random_range(0.72..=0.86)).round();
        let profit = revenue - cost;
        let record = NewFinancialData {
            month: month.to_string(),
            revenue,
            cost,
            profit,
            margin: round2(profit / revenue * 100.0),
        };
        insert(backend, "financial_data", &record)?;
        summary.financial += 1;
    }

    let total_cost = 1_900_000.0;
    for (name, share) in COST_SHARES {
        let record = NewCostBreakdown {
            name: name.to_string(),
            value: share,
            amount: (total_cost * share / 100.0_f64).round(),
        };
        insert(backend, "cost_breakdown", &record)?;
        summary.costs += 1;
    }

    let avg_fcr = format!("{:.2}", rng.random_range(1.5..=1.7_f64));
    let metrics = [
        ("Total Birds", format!("{}", rng.random_range(80..=120) * 1000), "+5.2%", "positive"),
        ("Average FCR", avg_fcr, "-2.1%", "positive"),
        ("Mortality Rate", format!("{:.1}%", rng.random_range(2.0..=4.5_f64)), "+0.4%", "negative"),
        ("Revenue", format!("${:.1}K", rng.random_range(20.0..=30.0_f64)), "+8.3%", "positive"),
    ];
    for (name, value, change, change_type) in metrics {
        let record = NewDashboardMetric {
            metric_name: name.to_string(),
            metric_value: value,
            change_percentage: Some(change.to_string()),
            change_type: Some(change_type.to_string()),
        };
        insert(backend, "dashboard_metrics", &record)?;
        summary.metrics += 1;
    }

    let alerts = [
        (AlertType::Critical, "High mortality detected", "Mortality above 5% in the last 24 hours"),
        (AlertType::Warning, "Feed stock low", "Feed inventory will last 3 more days"),
        (AlertType::Info, "Vaccination scheduled", "Newcastle booster due this week"),
        (AlertType::Success, "Batch target reached", "Average weight reached target ahead of schedule"),
    ];
    for (index, (alert_type, title, message)) in alerts.into_iter().enumerate() {
        let farm = &farms[index % farms.len()];
        let record = NewAlert {
            alert_type,
            title: title.to_string(),
            message: message.to_string(),
            farm: farm.name.clone(),
            farm_id: Some(farm.id.clone()),
        };
        let mut row = to_row(&record)?;
        if let serde_json::Value::Object(obj) = &mut row {
            crate::models::records::Alert::before_insert(obj);
        }
        backend.insert("alerts", row).map_err(|e| e.context("seeding alerts"))?;
        summary.alerts += 1;
    }

    info!(
        "Seed: inserted {} row(s) (farms={}, batches={}, financial={}, metrics={}, alerts={})",
        summary.total(),
        summary.farms,
        summary.batches,
        summary.financial,
        summary.metrics,
        summary.alerts
    );
    Ok(summary)
}

fn new_batch(farm_id: &RecordId, start_date: NaiveDate, rng: &mut SmallRng) -> NewBatch {
    NewBatch {
        farm_id: farm_id.clone(),
        breed: BREEDS[rng.random_range(0..BREEDS.len())].to_string(),
        bird_count: rng.random_range(4..=12) * 1000,
        start_date,
        target_weight: round2(rng.random_range(2.2..=2.8)),
        status: Some(BatchStatus::Active),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::InMemoryBackend;
    use crate::models::records::{Alert, DashboardMetric, FinancialData};
    use crate::services::metrics_audit::find_duplicate_metrics;
    use serde_json::Value;

    #[test]
    fn seeds_every_dashboard_table() {
        let backend = InMemoryBackend::service_role();
        let summary = run(&backend).unwrap();
        assert_eq!(summary.farms, FARMS.len());
        assert_eq!(backend.rows("batches").len(), summary.batches);
        assert_eq!(backend.rows("cost_breakdown").len(), COST_SHARES.len());

        let alerts: Vec<Alert> = backend.rows("alerts").into_iter().map(|r| decode_row(r).unwrap()).collect();
        assert!(alerts.iter().all(|a| !a.read));

        let financial: Vec<FinancialData> =
            backend.rows("financial_data").into_iter().map(|r| decode_row(r).unwrap()).collect();
        assert!(financial.iter().all(|f| f.revenue > f.cost));

        let metrics: Vec<DashboardMetric> =
            backend.rows("dashboard_metrics").into_iter().map(|r| decode_row(r).unwrap()).collect();
        assert!(find_duplicate_metrics(&metrics).is_empty());
    }

    #[test]
    fn same_seed_gives_same_numbers() {
        let a = InMemoryBackend::service_role();
        let b = InMemoryBackend::service_role();
        run(&a).unwrap();
        run(&b).unwrap();
        let capacities = |backend: &InMemoryBackend| -> Vec<Value> {
            backend.rows("farms").into_iter().map(|r| r["capacity"].clone()).collect()
        };
        assert_eq!(capacities(&a), capacities(&b));
    }

    #[test]
    fn anonymous_seed_fails_with_context() {
        let backend = InMemoryBackend::new();
        let err = run(&backend).unwrap_err();
        assert!(err.is_unauthorized());
        assert!(err.message().starts_with("seeding farms: "));
    }
}
