use crate::models::records::DashboardMetric;
use crate::services::metrics_audit::{DuplicateGroup, find_duplicate_metrics};
use crate::store::{EntityStore, QueryState};

impl EntityStore<DashboardMetric> {
    /// Metric names stored more than once in the current collection.
    /// A failed read keeps its error; the groups are then empty.
    pub fn duplicates(&self) -> QueryState<Vec<DuplicateGroup>> {
        self.query().map(|rows| find_duplicate_metrics(&rows))
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::ErrorKind;
    use crate::models::records::{DashboardMetric, NewDashboardMetric};
    use crate::store::testing::Harness;

    fn metric(name: &str, value: &str) -> NewDashboardMetric {
        NewDashboardMetric {
            metric_name: name.into(),
            metric_value: value.into(),
            change_percentage: None,
            change_type: None,
        }
    }

    #[test]
    fn reports_one_group_for_repeated_name() {
        let h = Harness::operator();
        let metrics = h.store::<DashboardMetric>();
        metrics.create(&metric("Average FCR", "1.62")).unwrap();
        metrics.create(&metric("Average FCR", "1.58")).unwrap();
        metrics.create(&metric("Mortality Rate", "3.2%")).unwrap();

        let groups = metrics.duplicates();
        assert!(!groups.is_error);
        assert_eq!(groups.data.len(), 1);
        assert_eq!(groups.data[0].metric_name, "Average FCR");
        assert_eq!(groups.data[0].rows.len(), 2);
    }

    #[test]
    fn failed_read_is_not_reported_as_clean() {
        let h = Harness::operator();
        let metrics = h.store::<DashboardMetric>();
        metrics.create(&metric("Average FCR", "1.62")).unwrap();
        metrics.create(&metric("Average FCR", "1.58")).unwrap();
        h.backend.set_offline(true);

        let groups = metrics.duplicates();
        assert!(groups.is_error);
        assert_eq!(groups.error.map(|e| e.kind), Some(ErrorKind::Network));
    }
}
