//! Process-wide query cache shared by every store.
//!
//! Entries are keyed by a [`CacheKey`] (e.g. `["farms"]`,
//! `["current-user-profile", <id>]`) and hold the last successful payload,
//! the last error, the fetch timestamp and the entry's subscribers.
//! Mutations never write into the cache; they only invalidate keys so that
//! the next read goes back to the backend.

use crate::backend::{BackendError, ErrorKind};
use crate::utils::{Subscribers, Subscription};
use chrono::{DateTime, Duration, Utc};
use log::{debug, trace};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    pub fn new(root: &str) -> Self {
        CacheKey(vec![root.to_string()])
    }

    pub fn with(mut self, part: impl Into<String>) -> Self {
        self.0.push(part.into());
        self
    }

    pub fn starts_with(&self, prefix: &CacheKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Error as kept in the cache and shown to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryError {
    pub kind: ErrorKind,
    pub code: Option<String>,
    pub message: String,
}

impl QueryError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        QueryError {
            kind,
            code: None,
            message: message.into(),
        }
    }
}

impl From<&BackendError> for QueryError {
    fn from(value: &BackendError) -> Self {
        QueryError {
            kind: value.kind(),
            code: value.code().map(str::to_string),
            message: value.message(),
        }
    }
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Idle,
    Fetching,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub data: Option<Value>,
    pub error: Option<QueryError>,
    pub status: FetchStatus,
    pub updated_at: Option<DateTime<Utc>>,
    pub stale: bool,
}

impl CacheEntry {
    fn idle() -> Self {
        CacheEntry {
            data: None,
            error: None,
            status: FetchStatus::Idle,
            updated_at: None,
            stale: true,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CacheEventKind {
    Fetching,
    Updated,
    Failed,
    Invalidated,
    Cleared,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEvent {
    pub key: CacheKey,
    pub kind: CacheEventKind,
}

struct Slot {
    entry: CacheEntry,
    subscribers: Subscribers<CacheEvent>,
}

impl Slot {
    fn new() -> Self {
        Slot {
            entry: CacheEntry::idle(),
            subscribers: Subscribers::new(),
        }
    }
}

#[derive(Default)]
pub struct QueryCache {
    slots: RefCell<BTreeMap<CacheKey, Slot>>,
    stale_after: Option<Duration>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat successful entries older than `age` as stale even without invalidation.
    pub fn with_stale_after(age: Duration) -> Self {
        QueryCache {
            slots: RefCell::new(BTreeMap::new()),
            stale_after: Some(age),
        }
    }

    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.slots.borrow().get(key).map(|s| s.entry.clone())
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.slots.borrow().keys().cloned().collect()
    }

    pub fn is_fresh(&self, key: &CacheKey) -> bool {
        let slots = self.slots.borrow();
        let Some(entry) = slots.get(key).map(|s| &s.entry) else {
            return false;
        };
        if entry.status != FetchStatus::Success || entry.stale {
            return false;
        }
        match (self.stale_after, entry.updated_at) {
            (Some(age), Some(at)) => Utc::now() - at < age,
            _ => true,
        }
    }

    /// Serve a fresh entry as-is, otherwise run `fetcher` and store its outcome.
    pub fn fetch<F>(&self, key: &CacheKey, fetcher: F) -> CacheEntry
    where
        F: FnOnce() -> Result<Value, BackendError>,
    {
        if self.is_fresh(key) {
            trace!("cache hit {}", key);
            if let Some(entry) = self.peek(key) {
                return entry;
            }
        }
        self.refetch(key, fetcher)
    }

    /// Always go to the backend. A failed fetch keeps the previous data.
    pub fn refetch<F>(&self, key: &CacheKey, fetcher: F) -> CacheEntry
    where
        F: FnOnce() -> Result<Value, BackendError>,
    {
        self.transition(key, CacheEventKind::Fetching, |entry| {
            entry.status = FetchStatus::Fetching;
        });

        let outcome = fetcher();

        let kind = if outcome.is_ok() {
            CacheEventKind::Updated
        } else {
            CacheEventKind::Failed
        };
        self.transition(key, kind, move |entry| match outcome {
            Ok(data) => {
                entry.data = Some(data);
                entry.error = None;
                entry.status = FetchStatus::Success;
                entry.updated_at = Some(Utc::now());
                entry.stale = false;
            }
            Err(e) => {
                debug!("fetch {} failed: {}", key, e);
                entry.error = Some(QueryError::from(&e));
                entry.status = FetchStatus::Error;
            }
        })
    }

    /// Mark every entry under `prefix` stale. Returns how many entries were affected.
    pub fn invalidate(&self, prefix: &CacheKey) -> usize {
        let notified = self.update_matching(prefix, CacheEventKind::Invalidated, |entry| entry.stale = true);
        debug!("invalidated {} cache entr(ies) under {}", notified, prefix);
        notified
    }

    /// Drop cached payloads everywhere (e.g. after the session changes) while keeping subscribers.
    pub fn clear(&self) {
        let everything = CacheKey(Vec::new());
        self.update_matching(&everything, CacheEventKind::Cleared, |entry| *entry = CacheEntry::idle());
    }

    pub fn subscribe(&self, key: &CacheKey, listener: impl Fn(&CacheEvent) + 'static) -> Subscription {
        let mut slots = self.slots.borrow_mut();
        let slot = slots.entry(key.clone()).or_insert_with(Slot::new);
        slot.subscribers.subscribe(listener)
    }

    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        self.slots.borrow().get(key).map(|s| s.subscribers.len()).unwrap_or(0)
    }

    fn transition(&self, key: &CacheKey, kind: CacheEventKind, apply: impl FnOnce(&mut CacheEntry)) -> CacheEntry {
        let (entry, subscribers) = {
            let mut slots = self.slots.borrow_mut();
            let slot = slots.entry(key.clone()).or_insert_with(Slot::new);
            apply(&mut slot.entry);
            (slot.entry.clone(), slot.subscribers.clone())
        };
        // listeners run without the cache borrowed so they can read it
        subscribers.emit(&CacheEvent { key: key.clone(), kind });
        entry
    }

    fn update_matching(&self, prefix: &CacheKey, kind: CacheEventKind, apply: impl Fn(&mut CacheEntry)) -> usize {
        let pending: Vec<(CacheKey, Subscribers<CacheEvent>)> = {
            let mut slots = self.slots.borrow_mut();
            slots
                .iter_mut()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, slot)| {
                    apply(&mut slot.entry);
                    (k.clone(), slot.subscribers.clone())
                })
                .collect()
        };
        for (key, subscribers) in &pending {
            subscribers.emit(&CacheEvent { key: key.clone(), kind });
        }
        pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ApiError;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn fresh_entry_is_served_without_fetching() {
        let cache = QueryCache::new();
        let key = CacheKey::new("farms");
        let calls = Cell::new(0);

        let first = cache.fetch(&key, || {
            calls.set(calls.get() + 1);
            Ok(json!([{"id": "a"}]))
        });
        let second = cache.fetch(&key, || {
            calls.set(calls.get() + 1);
            Ok(json!([]))
        });

        assert_eq!(calls.get(), 1);
        assert_eq!(first.data, second.data);
        assert_eq!(second.status, FetchStatus::Success);
    }

    #[test]
    fn invalidation_is_prefix_based() {
        let cache = QueryCache::new();
        let users = CacheKey::new("users");
        let user_detail = CacheKey::new("users").with("42");
        let farms = CacheKey::new("farms");
        for key in [&users, &user_detail, &farms] {
            cache.fetch(key, || Ok(json!([])));
        }

        assert_eq!(cache.invalidate(&users), 2);
        assert!(!cache.is_fresh(&users));
        assert!(!cache.is_fresh(&user_detail));
        assert!(cache.is_fresh(&farms));
        // stale data stays readable until the refetch lands
        assert_eq!(cache.peek(&users).and_then(|e| e.data), Some(json!([])));
    }

    #[test]
    fn failed_fetch_keeps_previous_data() {
        let cache = QueryCache::new();
        let key = CacheKey::new("alerts");
        cache.fetch(&key, || Ok(json!([{"id": "1"}])));
        cache.invalidate(&key);

        let entry = cache.fetch(&key, || Err(ApiError::new(500, "XX000", "boom").into()));
        assert_eq!(entry.status, FetchStatus::Error);
        assert_eq!(entry.data, Some(json!([{"id": "1"}])));
        assert_eq!(entry.error.map(|e| e.message), Some("boom".to_string()));
    }

    #[test]
    fn subscribers_follow_the_fetch_lifecycle() {
        let cache = QueryCache::new();
        let key = CacheKey::new("dashboard-metrics");
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        let sub = cache.subscribe(&key, move |e| sink.borrow_mut().push(e.kind));

        cache.fetch(&key, || Ok(json!([])));
        cache.invalidate(&key);
        assert_eq!(cache.subscriber_count(&key), 1);
        drop(sub);
        assert_eq!(cache.subscriber_count(&key), 0);
        cache.invalidate(&key);

        assert_eq!(
            *events.borrow(),
            vec![CacheEventKind::Fetching, CacheEventKind::Updated, CacheEventKind::Invalidated]
        );
    }

    #[test]
    fn listener_can_read_cache_during_notification() {
        let cache = Rc::new(QueryCache::new());
        let key = CacheKey::new("farms");
        let observed = Rc::new(RefCell::new(None));

        let reader = Rc::clone(&cache);
        let sink = Rc::clone(&observed);
        let watched = key.clone();
        let _sub = cache.subscribe(&key, move |e| {
            if e.kind == CacheEventKind::Updated {
                *sink.borrow_mut() = reader.peek(&watched).and_then(|entry| entry.data);
            }
        });
        cache.fetch(&key, || Ok(json!([1, 2])));
        assert_eq!(*observed.borrow(), Some(json!([1, 2])));
    }

    #[test]
    fn entries_expire_after_stale_window() {
        let cache = QueryCache::with_stale_after(Duration::zero());
        let key = CacheKey::new("batches");
        cache.fetch(&key, || Ok(json!([])));
        assert!(!cache.is_fresh(&key));
    }
}
