use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

type Listener<E> = Rc<dyn Fn(&E)>;
type Slots<E> = RefCell<BTreeMap<u64, Listener<E>>>;

/// Registry of callbacks interested in events of type `E`.
///
/// Cloning shares the registry. Listeners are released when the
/// [`Subscription`] returned by [`Subscribers::subscribe`] is dropped.
pub struct Subscribers<E> {
    next_id: Rc<Cell<u64>>,
    slots: Rc<Slots<E>>,
}

impl<E> Clone for Subscribers<E> {
    fn clone(&self) -> Self {
        Subscribers {
            next_id: Rc::clone(&self.next_id),
            slots: Rc::clone(&self.slots),
        }
    }
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Subscribers {
            next_id: Rc::new(Cell::new(0)),
            slots: Rc::new(RefCell::new(BTreeMap::new())),
        }
    }
}

impl<E: 'static> Subscribers<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&E) + 'static) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.slots.borrow_mut().insert(id, Rc::new(listener));

        let weak: Weak<Slots<E>> = Rc::downgrade(&self.slots);
        Subscription::new(move || {
            if let Some(slots) = weak.upgrade() {
                slots.borrow_mut().remove(&id);
            }
        })
    }

    /// Call every registered listener in subscription order.
    ///
    /// The listener list is snapshotted first so a listener may subscribe or
    /// unsubscribe while the event is being delivered.
    pub fn emit(&self, event: &E) {
        let listeners: Vec<Listener<E>> = self.slots.borrow().values().cloned().collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle for a registered callback; dropping it unregisters the callback.
#[must_use = "dropping a Subscription immediately unregisters the listener"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + 'static) -> Self {
        Subscription {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// Serialize a serde-backed enum into its string name (e.g. lowercase).
pub fn serde_enum_name<T: Serialize>(val: &T) -> Option<String> {
    serde_json::to_value(val).ok()?.as_str().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropping_subscription_releases_listener() {
        let subs: Subscribers<u32> = Subscribers::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&seen);
        let handle = subs.subscribe(move |v| sink.borrow_mut().push(*v));
        subs.emit(&1);
        assert_eq!(subs.len(), 1);

        drop(handle);
        subs.emit(&2);
        assert!(subs.is_empty());
        assert_eq!(*seen.borrow(), vec![1]);
    }

    #[test]
    fn listener_may_unsubscribe_during_emit() {
        let subs: Subscribers<()> = Subscribers::new();
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let calls = Rc::new(Cell::new(0));

        let inner_slot = Rc::clone(&slot);
        let inner_calls = Rc::clone(&calls);
        let handle = subs.subscribe(move |_| {
            inner_calls.set(inner_calls.get() + 1);
            inner_slot.borrow_mut().take();
        });
        *slot.borrow_mut() = Some(handle);

        subs.emit(&());
        subs.emit(&());
        assert_eq!(calls.get(), 1);
    }
}
