//! Identity and reference registry.
//!
//! Every model object lives under exactly one [`Registry`], which issues its
//! id, resolves ids back to object kinds, and carries the observer lists used
//! for change notification. Ids are monotonically increasing and never
//! reused, so a stale id held by a collaborator resolves to nothing instead
//! of silently aliasing a newer object.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Registry-issued object identifier. Unique for the lifetime of the
/// registry, including across deletions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Coarse kind tag kept by the registry so a bare id can be classified
/// without reaching into the owning model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Node,
    Relation,
    Model,
    View,
}

/// Change notifications fanned out to observers of a registered object.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A new object was created in the observed model.
    Created(ObjectId),
    /// An object was deleted from the observed model.
    Deleted(ObjectId),
    /// The observed object's effective value for `name` may have changed.
    AttributeChanged { name: String },
    /// The observed object's display name changed.
    Renamed,
    /// An isa edge from the observed object was added.
    IsaAdded { sub: ObjectId, sup: ObjectId },
    /// An isa edge from the observed object was removed.
    IsaRemoved { sub: ObjectId, sup: ObjectId },
    /// The observed object is being unregistered. Sent before the id stops
    /// resolving, so observers may still look the object up.
    Destroyed,
}

/// Receiver side of change notification. Implementors are subscribed
/// non-owningly, via `Weak`, so an observer that goes away is simply pruned.
pub trait ModelObserver {
    fn model_changed(&self, target: ObjectId, event: &ChangeEvent);
}

struct Entry {
    kind: ObjectKind,
    observers: Vec<Weak<dyn ModelObserver>>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    entries: HashMap<ObjectId, Entry>,
}

/// The shared identity registry. Interior-mutable so that models, views and
/// observers can all hold `Rc<Registry>` handles; notification callbacks are
/// always invoked with no internal borrow held, so a callback may re-enter
/// the registry.
#[derive(Default)]
pub struct Registry {
    inner: RefCell<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh id and register it with the given kind.
    pub fn register(&self, kind: ObjectKind) -> ObjectId {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = ObjectId(inner.next_id);
        inner.entries.insert(
            id,
            Entry {
                kind,
                observers: Vec::new(),
            },
        );
        id
    }

    /// Resolve an id to its kind, or `NotFound` if it was never registered
    /// or has been unregistered since.
    pub fn resolve(&self, id: ObjectId) -> Result<ObjectKind> {
        self.inner
            .borrow()
            .entries
            .get(&id)
            .map(|entry| entry.kind)
            .ok_or(Error::NotFound(id))
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.inner.borrow().entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }

    /// Subscribe an observer to one object's change events.
    pub fn observe(&self, target: ObjectId, observer: Weak<dyn ModelObserver>) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let entry = inner.entries.get_mut(&target).ok_or(Error::NotFound(target))?;
        entry.observers.push(observer);
        Ok(())
    }

    /// Drop all subscriptions of the given observer on `target`. Missing
    /// targets and unknown observers are a no-op.
    pub fn unobserve(&self, target: ObjectId, observer: &Weak<dyn ModelObserver>) {
        if let Some(entry) = self.inner.borrow_mut().entries.get_mut(&target) {
            entry.observers.retain(|other| !other.ptr_eq(observer));
        }
    }

    /// Number of live subscriptions on `target`.
    pub fn observer_count(&self, target: ObjectId) -> usize {
        self.inner
            .borrow()
            .entries
            .get(&target)
            .map(|entry| {
                entry
                    .observers
                    .iter()
                    .filter(|weak| weak.strong_count() > 0)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Deliver an event to every live observer of `target`, in subscription
    /// order. Dead weak references are pruned on the way.
    pub fn notify(&self, target: ObjectId, event: &ChangeEvent) {
        for observer in self.live_observers(target) {
            observer.model_changed(target, event);
        }
    }

    /// Unregister an id: every observer receives `Destroyed` before the id
    /// stops resolving, then the entry (and its observer list) is removed.
    pub fn unregister(&self, id: ObjectId) -> Result<()> {
        self.resolve(id)?;
        let observers = self.live_observers(id);
        if !observers.is_empty() {
            tracing::debug!(%id, count = observers.len(), "notifying observers of destruction");
        }
        for observer in observers {
            observer.model_changed(id, &ChangeEvent::Destroyed);
        }
        self.inner.borrow_mut().entries.remove(&id);
        Ok(())
    }

    fn live_observers(&self, target: ObjectId) -> Vec<Rc<dyn ModelObserver>> {
        let mut inner = self.inner.borrow_mut();
        let Some(entry) = inner.entries.get_mut(&target) else {
            return Vec::new();
        };
        entry.observers.retain(|weak| weak.strong_count() > 0);
        entry.observers.iter().filter_map(Weak::upgrade).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Probe {
        events: RefCell<Vec<(ObjectId, ChangeEvent)>>,
    }

    impl Probe {
        fn new() -> Rc<Self> {
            Rc::new(Self::default())
        }
    }

    impl ModelObserver for Probe {
        fn model_changed(&self, target: ObjectId, event: &ChangeEvent) {
            self.events.borrow_mut().push((target, event.clone()));
        }
    }

    fn as_observer<T: ModelObserver + 'static>(observer: &Rc<T>) -> Weak<dyn ModelObserver> {
        let weak = Rc::downgrade(observer);
        weak
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = Registry::new();
        let a = registry.register(ObjectKind::Node);
        let b = registry.register(ObjectKind::Relation);
        assert_ne!(a, b);
        assert_eq!(registry.resolve(a).unwrap(), ObjectKind::Node);
        assert_eq!(registry.resolve(b).unwrap(), ObjectKind::Relation);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unregister_invalidates_id() {
        let registry = Registry::new();
        let a = registry.register(ObjectKind::Node);
        registry.unregister(a).unwrap();
        assert_eq!(registry.resolve(a), Err(Error::NotFound(a)));
        assert_eq!(registry.unregister(a), Err(Error::NotFound(a)));
    }

    #[test]
    fn test_ids_never_reused() {
        let registry = Registry::new();
        let a = registry.register(ObjectKind::Node);
        registry.unregister(a).unwrap();
        let b = registry.register(ObjectKind::Node);
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_destruction_notifies_each_observer_once() {
        let registry = Registry::new();
        let a = registry.register(ObjectKind::Node);
        let probe = Probe::new();
        let weak = as_observer(&probe);
        registry.observe(a, weak).unwrap();
        registry.unregister(a).unwrap();
        let events = probe.events.borrow();
        assert_eq!(events.as_slice(), &[(a, ChangeEvent::Destroyed)]);
    }

    #[test]
    fn test_target_still_resolvable_during_destruction_callback() {
        struct Checker {
            registry: Rc<Registry>,
            saw_live: RefCell<Option<bool>>,
        }

        impl ModelObserver for Checker {
            fn model_changed(&self, target: ObjectId, event: &ChangeEvent) {
                if *event == ChangeEvent::Destroyed {
                    *self.saw_live.borrow_mut() = Some(self.registry.resolve(target).is_ok());
                }
            }
        }

        let registry = Rc::new(Registry::new());
        let a = registry.register(ObjectKind::Node);
        let checker = Rc::new(Checker {
            registry: Rc::clone(&registry),
            saw_live: RefCell::new(None),
        });
        let weak = as_observer(&checker);
        registry.observe(a, weak).unwrap();
        registry.unregister(a).unwrap();
        assert_eq!(*checker.saw_live.borrow(), Some(true));
        assert!(registry.resolve(a).is_err());
    }

    #[test]
    fn test_dropped_observer_is_pruned() {
        let registry = Registry::new();
        let a = registry.register(ObjectKind::Node);
        {
            let probe = Probe::new();
            let weak = as_observer(&probe);
            registry.observe(a, weak).unwrap();
        }
        registry.notify(
            a,
            &ChangeEvent::AttributeChanged {
                name: "fill_color".into(),
            },
        );
        assert_eq!(registry.observer_count(a), 0);
    }

    #[test]
    fn test_unobserve_by_identity() {
        let registry = Registry::new();
        let a = registry.register(ObjectKind::Node);
        let first = Probe::new();
        let second = Probe::new();
        registry.observe(a, as_observer(&first)).unwrap();
        registry.observe(a, as_observer(&second)).unwrap();

        let again = as_observer(&first);
        registry.unobserve(a, &again);
        registry.notify(a, &ChangeEvent::Renamed);

        assert!(first.events.borrow().is_empty());
        assert_eq!(second.events.borrow().len(), 1);
    }

    #[test]
    fn test_observe_unknown_target_fails() {
        let registry = Registry::new();
        let probe = Probe::new();
        let weak = as_observer(&probe);
        assert_eq!(
            registry.observe(ObjectId(999), weak),
            Err(Error::NotFound(ObjectId(999)))
        );
    }
}
