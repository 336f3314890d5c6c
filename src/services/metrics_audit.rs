use crate::models::records::DashboardMetric;
use std::collections::BTreeMap;

/// All rows sharing one `metric_name`.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    pub metric_name: String,
    pub rows: Vec<DashboardMetric>,
}

/// Groups of rows whose `metric_name` appears more than once.
///
/// Groups are ordered by name; rows keep their input order.
pub fn find_duplicate_metrics(rows: &[DashboardMetric]) -> Vec<DuplicateGroup> {
    let mut by_name: BTreeMap<&str, Vec<DashboardMetric>> = BTreeMap::new();
    for row in rows {
        by_name.entry(row.metric_name.as_str()).or_default().push(row.clone());
    }
    by_name
        .into_iter()
        .filter(|(_, rows)| rows.len() > 1)
        .map(|(name, rows)| DuplicateGroup {
            metric_name: name.to_string(),
            rows,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_duplicates_from_fixture() {
        let json = std::fs::read_to_string("tests/data/dashboard-metrics.json").expect("fixture present");
        let rows: Vec<DashboardMetric> = serde_json::from_str(&json).expect("parse metrics");

        let groups = find_duplicate_metrics(&rows);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].metric_name, "Average FCR");
        assert_eq!(groups[0].rows.len(), 2);
        assert_eq!(groups[0].rows[0].metric_value, "1.62");
        assert_eq!(groups[0].rows[1].metric_value, "1.58");
    }

    #[test]
    fn unique_names_yield_nothing() {
        assert!(find_duplicate_metrics(&[]).is_empty());
    }
}
