use crate::backend::BackendError;
use crate::models::records::{Alert, AlertPatch, RecordId};
use crate::store::{EntityStore, QueryState};

impl EntityStore<Alert> {
    /// Mark one alert read. Invalidates the list but raises no success toast.
    pub fn mark_read(&self, id: &RecordId) -> Result<Alert, BackendError> {
        let patch = AlertPatch {
            read: Some(true),
            ..Default::default()
        };
        self.update_with(id, &patch, None)
    }

    /// Unread alerts in the current (possibly cached) list.
    pub fn unread_count(&self) -> QueryState<usize> {
        self.query().map(|alerts| alerts.iter().filter(|a| !a.read).count())
    }
}

#[cfg(test)]
mod tests {
    use crate::models::records::{Alert, AlertType, NewAlert};
    use crate::store::testing::Harness;

    fn new_alert(title: &str) -> NewAlert {
        NewAlert {
            alert_type: AlertType::Warning,
            title: title.into(),
            message: "Water intake dropped 20%".into(),
            farm: "Valley Farm".into(),
            farm_id: None,
        }
    }

    #[test]
    fn alerts_are_created_unread_and_can_be_marked_read() {
        let h = Harness::operator();
        let alerts = h.store::<Alert>();
        let first = alerts.create(&new_alert("Low water intake")).unwrap();
        alerts.create(&new_alert("Feed delivery late")).unwrap();
        assert!(!first.read);
        assert_eq!(h.notifier.last().map(|t| t.description), Some("Alert created successfully".to_string()));
        assert_eq!(alerts.unread_count().data, 2);

        let toasts_before = h.notifier.toasts().len();
        alerts.mark_read(&first.id).unwrap();
        assert_eq!(alerts.unread_count().data, 1);
        assert_eq!(h.notifier.toasts().len(), toasts_before);

        h.backend.set_offline(true);
        let offline = alerts.refetch();
        assert!(offline.is_error);
        assert!(alerts.unread_count().is_error);
    }
}
