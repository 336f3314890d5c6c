//! Entity stores: cached reads and invalidating mutations, one per table.
//!
//! Every store reads its collection under a stable cache key and never
//! writes mutation results into the cache. A successful create/update/delete
//! only invalidates the key, so the next read goes back to the backend.
//! Failures are reported through the [`Notifier`] with the backend's own
//! message and leave the cached collection as it was.

pub mod alerts;
pub mod batches;
pub mod farms;
pub mod financial;
pub mod metrics;
pub mod reports;
pub mod users;

use crate::backend::{Backend, BackendError, decode_row, decode_rows};
use crate::cache::{CacheEntry, CacheEvent, CacheKey, FetchStatus, QueryCache, QueryError};
use crate::models::records::{Record, RecordId, to_row};
use crate::notify::{Notifier, Toast};
use crate::query::Query;
use crate::utils::Subscription;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde_json::Value;
use std::marker::PhantomData;
use std::rc::Rc;

/// Collaborators shared by every store.
#[derive(Clone)]
pub struct StoreContext {
    pub backend: Rc<dyn Backend>,
    pub cache: Rc<QueryCache>,
    pub notifier: Rc<dyn Notifier>,
}

impl StoreContext {
    pub fn new(backend: Rc<dyn Backend>, cache: Rc<QueryCache>, notifier: Rc<dyn Notifier>) -> Self {
        StoreContext {
            backend,
            cache,
            notifier,
        }
    }

    /// Run a write against the backend.
    ///
    /// On success every key under `invalidates` goes stale and `success`
    /// (if any) is shown. On failure the error message is shown and the
    /// cache is not touched.
    pub fn mutate<T>(
        &self,
        invalidates: &CacheKey,
        success: Option<String>,
        op: impl FnOnce(&dyn Backend) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        match op(self.backend.as_ref()) {
            Ok(value) => {
                self.cache.invalidate(invalidates);
                if let Some(message) = success {
                    self.notifier.notify(Toast::success(message));
                }
                Ok(value)
            }
            Err(e) => {
                warn!("mutation on {} failed: {}", invalidates, e);
                self.notifier.notify(Toast::error(e.message()));
                Err(e)
            }
        }
    }
}

/// Read-side view of one cache entry, decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: T,
    pub is_loading: bool,
    pub is_error: bool,
    pub error: Option<QueryError>,
    pub updated_at: Option<DateTime<Utc>>,
    pub is_stale: bool,
}

impl<T: Default> QueryState<T> {
    /// Nothing fetched yet.
    pub fn idle() -> Self {
        QueryState {
            data: T::default(),
            is_loading: false,
            is_error: false,
            error: None,
            updated_at: None,
            is_stale: true,
        }
    }

    pub(crate) fn from_entry(entry: &CacheEntry, decode: impl FnOnce(Value) -> Result<T, BackendError>) -> Self {
        let mut error = entry.error.clone();
        let data = match entry.data.clone().map(decode) {
            Some(Ok(data)) => data,
            Some(Err(e)) => {
                warn!("cached payload does not decode: {}", e);
                error = Some(QueryError::from(&e));
                T::default()
            }
            None => T::default(),
        };
        QueryState {
            data,
            is_loading: entry.status == FetchStatus::Fetching,
            is_error: error.is_some(),
            error,
            updated_at: entry.updated_at,
            is_stale: entry.stale,
        }
    }
}

impl<T> QueryState<T> {
    /// Derive a value from the rows, keeping the load and error flags.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> QueryState<U> {
        QueryState {
            data: f(self.data),
            is_loading: self.is_loading,
            is_error: self.is_error,
            error: self.error,
            updated_at: self.updated_at,
            is_stale: self.is_stale,
        }
    }

    /// Rewrite the error shown to callers, keeping everything else.
    pub fn map_error(mut self, f: impl FnOnce(QueryError) -> QueryError) -> Self {
        self.error = self.error.map(f);
        self
    }
}

/// Cached collection reads plus create/update/delete for one [`Record`] type.
pub struct EntityStore<R: Record> {
    ctx: StoreContext,
    _record: PhantomData<R>,
}

impl<R: Record> Clone for EntityStore<R> {
    fn clone(&self) -> Self {
        EntityStore::new(self.ctx.clone())
    }
}

impl<R: Record> EntityStore<R> {
    pub fn new(ctx: StoreContext) -> Self {
        EntityStore {
            ctx,
            _record: PhantomData,
        }
    }

    pub fn context(&self) -> &StoreContext {
        &self.ctx
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::new(R::CACHE_KEY)
    }

    fn collection_query() -> Query {
        let (column, ascending) = R::ORDER;
        Query::all().order(column, ascending)
    }

    /// Cached rows under `key`, fetched with `query` when missing or stale.
    pub(crate) fn query_with(&self, key: &CacheKey, query: Query) -> QueryState<Vec<R>> {
        let backend = Rc::clone(&self.ctx.backend);
        let entry = self.ctx.cache.fetch(key, move || backend.select(R::TABLE, &query).map(Value::Array));
        QueryState::from_entry(&entry, decode_rows)
    }

    /// The whole collection in its default order.
    pub fn query(&self) -> QueryState<Vec<R>> {
        self.query_with(&self.key(), Self::collection_query())
    }

    /// Force a round trip even if the cached collection is fresh.
    pub fn refetch(&self) -> QueryState<Vec<R>> {
        let backend = Rc::clone(&self.ctx.backend);
        let query = Self::collection_query();
        let entry = self
            .ctx
            .cache
            .refetch(&self.key(), move || backend.select(R::TABLE, &query).map(Value::Array));
        QueryState::from_entry(&entry, decode_rows)
    }

    /// Whatever is cached right now, without touching the backend.
    pub fn peek(&self) -> QueryState<Vec<R>> {
        match self.ctx.cache.peek(&self.key()) {
            Some(entry) => QueryState::from_entry(&entry, decode_rows),
            None => QueryState::idle(),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&CacheEvent) + 'static) -> Subscription {
        self.ctx.cache.subscribe(&self.key(), listener)
    }

    pub fn create(&self, payload: &R::New) -> Result<R, BackendError> {
        let success = format!("{} {} successfully", R::LABEL, R::CREATE_VERB);
        self.ctx.mutate(&self.key(), Some(success), |backend| {
            let mut row = to_row(payload)?;
            if let Value::Object(obj) = &mut row {
                R::before_insert(obj);
            }
            debug!("insert into {}", R::TABLE);
            decode_row(backend.insert(R::TABLE, row)?)
        })
    }

    pub fn update(&self, id: &RecordId, patch: &R::Patch) -> Result<R, BackendError> {
        self.update_with(id, patch, Some(format!("{} updated successfully", R::LABEL)))
    }

    pub(crate) fn update_with(
        &self,
        id: &RecordId,
        patch: &R::Patch,
        success: Option<String>,
    ) -> Result<R, BackendError> {
        self.ctx.mutate(&self.key(), success, |backend| {
            let patch = to_row(patch)?;
            debug!("update {} id={}", R::TABLE, id);
            decode_row(backend.update(R::TABLE, id.as_str(), patch)?)
        })
    }

    pub fn delete(&self, id: &RecordId) -> Result<(), BackendError> {
        let success = format!("{} deleted successfully", R::LABEL);
        self.ctx.mutate(&self.key(), Some(success), |backend| {
            debug!("delete from {} id={}", R::TABLE, id);
            backend.delete(R::TABLE, id.as_str())
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::backend::memory::InMemoryBackend;
    use crate::notify::testing::RecordingNotifier;

    pub const OPERATOR_EMAIL: &str = "operator@flockmate.test";
    pub const ADMIN_EMAIL: &str = "admin@flockmate.test";
    pub const PASSWORD: &str = "correct horse";

    pub struct Harness {
        pub backend: Rc<InMemoryBackend>,
        pub notifier: Rc<RecordingNotifier>,
        pub ctx: StoreContext,
    }

    impl Harness {
        pub fn with_backend(backend: InMemoryBackend) -> Self {
            let backend = Rc::new(backend);
            let notifier = Rc::new(RecordingNotifier::default());
            let ctx = StoreContext::new(
                Rc::clone(&backend) as Rc<dyn Backend>,
                Rc::new(QueryCache::new()),
                Rc::clone(&notifier) as Rc<dyn Notifier>,
            );
            Harness { backend, notifier, ctx }
        }

        /// Backend with a manager and an admin account; nobody signed in.
        pub fn anonymous() -> Self {
            let backend = InMemoryBackend::new();
            backend.register_account(OPERATOR_EMAIL, PASSWORD, "Farm Operator", "manager");
            backend.register_account(ADMIN_EMAIL, PASSWORD, "Site Admin", "admin");
            Self::with_backend(backend)
        }

        pub fn signed_in_as(email: &str) -> Self {
            let harness = Self::anonymous();
            harness.backend.sign_in(email, PASSWORD).expect("sign in");
            harness
        }

        pub fn operator() -> Self {
            Self::signed_in_as(OPERATOR_EMAIL)
        }

        pub fn admin() -> Self {
            Self::signed_in_as(ADMIN_EMAIL)
        }

        pub fn store<R: Record>(&self) -> EntityStore<R> {
            EntityStore::new(self.ctx.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Harness;
    use super::*;
    use crate::backend::ErrorKind;
    use crate::cache::CacheEventKind;
    use crate::models::records::{Farm, FarmStatus, FinancialData, NewFarm, NewFinancialData};
    use crate::notify::ToastVariant;
    use std::cell::RefCell;

    fn new_farm(name: &str) -> NewFarm {
        NewFarm {
            name: name.to_string(),
            location: "Test Loc".to_string(),
            manager: "Ana Cruz".to_string(),
            capacity: 1000,
            status: FarmStatus::Active,
            coordinates: None,
        }
    }

    #[test]
    fn empty_table_reads_as_empty_collection() {
        let h = Harness::operator();
        let state = h.store::<Farm>().query();
        assert!(state.data.is_empty());
        assert!(!state.is_error);
        assert!(!state.is_loading);
        assert!(state.updated_at.is_some());
    }

    #[test]
    fn created_record_shows_up_on_next_read() {
        let h = Harness::operator();
        let farms = h.store::<Farm>();
        assert!(farms.query().data.is_empty());

        let created = farms.create(&new_farm("Greenfield")).unwrap();
        assert!(farms.peek().is_stale);

        let state = farms.query();
        assert_eq!(state.data.len(), 1);
        let row = &state.data[0];
        assert_eq!(row.id, created.id);
        assert_eq!((row.name.as_str(), row.location.as_str(), row.capacity), ("Greenfield", "Test Loc", 1000));
        assert_eq!(row.status, FarmStatus::Active);
        assert_eq!(h.notifier.last().map(|t| t.description), Some("Farm added successfully".to_string()));
    }

    #[test]
    fn unauthenticated_insert_fails_and_leaves_cache_alone() {
        let h = Harness::anonymous();
        let farms = h.store::<Farm>();
        let before = farms.query();

        let err = farms.create(&new_farm("Test Farm")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let after = farms.peek();
        assert_eq!(after.data, before.data);
        assert!(!after.is_stale);
        let toast = h.notifier.last().unwrap();
        assert_eq!(toast.title, "Error");
        assert_eq!(toast.variant, ToastVariant::Destructive);
        assert!(toast.description.contains("row-level security"), "{}", toast.description);
    }

    #[test]
    fn deleting_unknown_id_keeps_other_records() {
        let h = Harness::operator();
        let farms = h.store::<Farm>();
        let kept = farms.create(&new_farm("Valley")).unwrap();

        farms.delete(&RecordId::from("does-not-exist")).unwrap();
        let state = farms.query();
        assert_eq!(state.data.iter().map(|f| &f.id).collect::<Vec<_>>(), vec![&kept.id]);
    }

    #[test]
    fn update_of_unknown_id_reports_no_rows_and_keeps_cache() {
        let h = Harness::operator();
        let farms = h.store::<Farm>();
        farms.create(&new_farm("Valley")).unwrap();
        let before = farms.query();

        let patch = crate::models::records::FarmPatch {
            status: Some(FarmStatus::Inactive),
            ..Default::default()
        };
        let err = farms.update(&RecordId::from("missing"), &patch).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(farms.peek().data, before.data);
        assert!(!farms.peek().is_stale);
    }

    #[test]
    fn read_failure_is_reported_in_state_not_raised() {
        let h = Harness::operator();
        h.backend.set_offline(true);
        let state = h.store::<Farm>().query();
        assert!(state.is_error);
        assert!(state.data.is_empty());
        assert_eq!(state.error.map(|e| e.kind), Some(ErrorKind::Network));
    }

    #[test]
    fn collection_uses_default_order() {
        let h = Harness::operator();
        let financial = h.store::<FinancialData>();
        for month in ["Jan", "Feb", "Mar"] {
            financial
                .create(&NewFinancialData {
                    month: month.to_string(),
                    revenue: 100.0,
                    cost: 60.0,
                    profit: 40.0,
                    margin: 40.0,
                })
                .unwrap();
        }
        let months: Vec<String> = financial.query().data.into_iter().map(|r| r.month).collect();
        assert_eq!(months, vec!["Jan", "Feb", "Mar"]);

        let farms = h.store::<Farm>();
        farms.create(&new_farm("Valley")).unwrap();
        farms.create(&new_farm("Greenfield")).unwrap();
        let names: Vec<String> = farms.query().data.into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["Greenfield", "Valley"]);
    }

    #[test]
    fn subscribers_see_invalidation_after_mutation() {
        let h = Harness::operator();
        let farms = h.store::<Farm>();
        farms.query();
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        let _sub = farms.subscribe(move |e| sink.borrow_mut().push(e.kind));

        farms.create(&new_farm("Valley")).unwrap();
        farms.query();
        assert_eq!(
            *events.borrow(),
            vec![CacheEventKind::Invalidated, CacheEventKind::Fetching, CacheEventKind::Updated]
        );
    }

    #[test]
    fn refetch_bypasses_a_fresh_entry() {
        let h = Harness::operator();
        let farms = h.store::<Farm>();
        farms.create(&new_farm("Valley")).unwrap();
        assert_eq!(farms.query().data.len(), 1);

        // written behind the cache's back, so nothing is invalidated
        h.backend
            .seed_row(
                "farms",
                serde_json::json!({"name": "Hillside", "location": "Batangas", "manager": "Luis", "capacity": 5000}),
            )
            .unwrap();
        assert_eq!(farms.query().data.len(), 1);

        let refreshed = farms.refetch();
        assert!(!refreshed.is_stale);
        let names: Vec<String> = refreshed.data.into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["Hillside", "Valley"]);
        assert_eq!(farms.peek().data.len(), 2);
    }
}
