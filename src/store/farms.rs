use crate::backend::BackendError;
use crate::models::records::{Farm, FarmPatch, FarmStatus, RecordId};
use crate::store::{EntityStore, QueryState};

impl EntityStore<Farm> {
    pub fn set_status(&self, id: &RecordId, status: FarmStatus) -> Result<Farm, BackendError> {
        let patch = FarmPatch {
            status: Some(status),
            ..Default::default()
        };
        self.update(id, &patch)
    }

    /// Active farms go inactive; inactive and maintenance farms go back to active.
    pub fn toggle_status(&self, farm: &Farm) -> Result<Farm, BackendError> {
        let next = match farm.status {
            FarmStatus::Active => FarmStatus::Inactive,
            FarmStatus::Inactive | FarmStatus::Maintenance => FarmStatus::Active,
        };
        self.set_status(&farm.id, next)
    }

    /// Look up one farm in the cached collection. `None` data with no error
    /// means the farm is not there.
    pub fn find(&self, id: &RecordId) -> QueryState<Option<Farm>> {
        self.query().map(|farms| farms.into_iter().find(|f| &f.id == id))
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::ErrorKind;
    use crate::models::records::{Farm, FarmStatus, NewFarm, RecordId};
    use crate::store::testing::Harness;

    #[test]
    fn status_update_is_visible_and_toggles_back() {
        let h = Harness::operator();
        let farms = h.store::<Farm>();
        let x = farms
            .create(&NewFarm {
                name: "Hillside".into(),
                location: "Cagayan".into(),
                manager: "Jose".into(),
                capacity: 18000,
                status: FarmStatus::Active,
                coordinates: None,
            })
            .unwrap();

        farms.set_status(&x.id, FarmStatus::Inactive).unwrap();
        let read = farms.find(&x.id).data.unwrap();
        assert_eq!(read.status, FarmStatus::Inactive);

        farms.toggle_status(&read).unwrap();
        assert_eq!(farms.find(&x.id).data.map(|f| f.status), Some(FarmStatus::Active));
        assert_eq!(
            h.notifier.last().map(|t| t.description),
            Some("Farm updated successfully".to_string())
        );
    }

    #[test]
    fn maintenance_toggles_to_active() {
        let h = Harness::operator();
        let farms = h.store::<Farm>();
        let farm = farms
            .create(&NewFarm {
                name: "Valley".into(),
                location: "Bukidnon".into(),
                manager: "Maria".into(),
                capacity: 25000,
                status: FarmStatus::Maintenance,
                coordinates: None,
            })
            .unwrap();
        let toggled = farms.toggle_status(&farm).unwrap();
        assert_eq!(toggled.status, FarmStatus::Active);
    }

    #[test]
    fn lookup_separates_missing_from_unreachable() {
        let h = Harness::operator();
        let farms = h.store::<Farm>();
        let missing = farms.find(&RecordId::from("no-such-farm"));
        assert!(!missing.is_error);
        assert!(missing.data.is_none());

        h.backend.set_offline(true);
        let unreachable = farms.refetch();
        assert!(unreachable.is_error);
        let lookup = farms.find(&RecordId::from("no-such-farm"));
        assert!(lookup.is_error);
        assert_eq!(lookup.error.map(|e| e.kind), Some(ErrorKind::Network));
    }
}
