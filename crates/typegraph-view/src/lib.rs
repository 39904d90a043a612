//! View projections over a typegraph model.
//!
//! A view is a named, partial, display-oriented window onto one model. It
//! never owns model objects: members are tracked by id through the shared
//! [`Registry`], and the view subscribes to each member as a weak observer.
//! When a member (or the whole model) is destroyed, the view hears about it
//! synchronously and drops its entry, so a dead view entry can never be
//! dereferenced. Several views over one model stay consistent without
//! coordinating with each other.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};

use typegraph_core::{
    ChangeEvent, Error, Model, ModelObserver, ObjectId, ObjectKind, Registry, Result,
};

/// Display state a view keeps per member. The model knows nothing of this;
/// two views may place the same object differently.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewItem {
    pub position: (f64, f64),
    pub visible: bool,
}

impl ViewItem {
    pub fn at(x: f64, y: f64) -> Self {
        Self {
            position: (x, y),
            visible: true,
        }
    }
}

impl Default for ViewItem {
    fn default() -> Self {
        Self::at(0.0, 0.0)
    }
}

/// A projection of one model. Constructed behind `Rc` because the view
/// itself is the observer it registers for its members.
pub struct View {
    id: ObjectId,
    name: RefCell<String>,
    registry: Rc<Registry>,
    model: ObjectId,
    items: RefCell<BTreeMap<ObjectId, ViewItem>>,
    dirty: RefCell<BTreeSet<ObjectId>>,
}

impl View {
    pub fn new(model: &Model, name: impl Into<String>) -> Rc<Self> {
        let registry = Rc::clone(model.registry());
        let id = registry.register(ObjectKind::View);
        tracing::debug!(view = %id, model = %model.id(), "created view");
        Rc::new(Self {
            id,
            name: RefCell::new(name.into()),
            registry,
            model: model.id(),
            items: RefCell::new(BTreeMap::new()),
            dirty: RefCell::new(BTreeSet::new()),
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn model_id(&self) -> ObjectId {
        self.model
    }

    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.borrow_mut() = name.into();
    }

    /// Whether the backing model still exists. A view outliving its model
    /// is empty but safe to use.
    pub fn is_live(&self) -> bool {
        self.registry.contains(self.model)
    }

    /// Add a model object to this view. The id is re-resolved through the
    /// registry, so stale ids are rejected rather than trusted.
    pub fn add(self: &Rc<Self>, target: ObjectId, item: ViewItem) -> Result<()> {
        if !self.is_live() {
            return Err(Error::NotFound(self.model));
        }
        self.registry.resolve(target)?;
        if self.items.borrow().contains_key(&target) {
            self.items.borrow_mut().insert(target, item);
            return Ok(());
        }
        let weak = Rc::downgrade(self);
        let observer: Weak<dyn ModelObserver> = weak;
        self.registry.observe(target, observer)?;
        self.items.borrow_mut().insert(target, item);
        Ok(())
    }

    /// Drop a member from the view. The model object itself is untouched.
    pub fn remove(self: &Rc<Self>, target: ObjectId) -> bool {
        let weak = Rc::downgrade(self);
        let observer: Weak<dyn ModelObserver> = weak;
        self.registry.unobserve(target, &observer);
        self.dirty.borrow_mut().remove(&target);
        self.items.borrow_mut().remove(&target).is_some()
    }

    pub fn contains(&self, target: ObjectId) -> bool {
        self.items.borrow().contains_key(&target)
    }

    pub fn item(&self, target: ObjectId) -> Option<ViewItem> {
        self.items.borrow().get(&target).copied()
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.items.borrow().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn set_position(&self, target: ObjectId, x: f64, y: f64) -> Result<()> {
        self.registry.resolve(target)?;
        match self.items.borrow_mut().get_mut(&target) {
            Some(item) => {
                item.position = (x, y);
                Ok(())
            }
            None => Err(Error::NotFound(target)),
        }
    }

    pub fn set_visible(&self, target: ObjectId, visible: bool) -> Result<()> {
        self.registry.resolve(target)?;
        match self.items.borrow_mut().get_mut(&target) {
            Some(item) => {
                item.visible = visible;
                Ok(())
            }
            None => Err(Error::NotFound(target)),
        }
    }

    /// Members whose model state changed since the last call. Cleared on
    /// read; display layers redraw exactly these.
    pub fn take_dirty(&self) -> BTreeSet<ObjectId> {
        std::mem::take(&mut *self.dirty.borrow_mut())
    }
}

impl ModelObserver for View {
    fn model_changed(&self, target: ObjectId, event: &ChangeEvent) {
        match event {
            ChangeEvent::Destroyed => {
                tracing::debug!(view = %self.id, %target, "member destroyed, dropping entry");
                self.items.borrow_mut().remove(&target);
                self.dirty.borrow_mut().remove(&target);
            }
            _ => {
                if self.items.borrow().contains_key(&target) {
                    self.dirty.borrow_mut().insert(target);
                }
            }
        }
    }
}

impl Drop for View {
    fn drop(&mut self) {
        // member subscriptions are weak and get pruned on their own
        let _ = self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use typegraph_core::AttrValue;

    fn model() -> Model {
        Model::new(Rc::new(Registry::new()), "viewed")
    }

    fn person_with_alice(model: &mut Model) -> (ObjectId, ObjectId) {
        let person = model.create_node("person", model.top_node()).unwrap();
        model.set_is_individual(person, false).unwrap();
        let alice = model.create_node("alice", person).unwrap();
        (person, alice)
    }

    #[test]
    fn test_add_and_place_members() {
        let mut model = model();
        let (_, alice) = person_with_alice(&mut model);
        let view = View::new(&model, "main");
        view.add(alice, ViewItem::at(10.0, 20.0)).unwrap();
        assert!(view.contains(alice));
        view.set_position(alice, 3.0, 4.0).unwrap();
        assert_eq!(view.item(alice).unwrap().position, (3.0, 4.0));
    }

    #[test]
    fn test_stale_id_rejected() {
        let mut model = model();
        let (_, alice) = person_with_alice(&mut model);
        model.delete_node(alice).unwrap();
        let view = View::new(&model, "main");
        assert_eq!(
            view.add(alice, ViewItem::default()),
            Err(Error::NotFound(alice))
        );
    }

    #[test]
    fn test_member_deletion_drops_entry_before_delete_returns() {
        let mut model = model();
        let (_, alice) = person_with_alice(&mut model);
        let view = View::new(&model, "main");
        view.add(alice, ViewItem::default()).unwrap();
        model.delete_node(alice).unwrap();
        assert!(!view.contains(alice));
        assert!(view.is_empty());
    }

    #[test]
    fn test_cascade_deletion_reaches_views() {
        let mut model = model();
        let (person, alice) = person_with_alice(&mut model);
        let bob = model.create_node("bob", person).unwrap();
        let knows = model
            .create_relation("knows", model.top_relation(), person, person)
            .unwrap();
        model.set_is_individual(knows, false).unwrap();
        let k1 = model.create_relation("k1", knows, alice, bob).unwrap();

        let view = View::new(&model, "main");
        view.add(alice, ViewItem::default()).unwrap();
        view.add(k1, ViewItem::default()).unwrap();
        model.delete_node(alice).unwrap();
        assert!(!view.contains(alice));
        assert!(!view.contains(k1));
    }

    #[test]
    fn test_attribute_edits_mark_members_dirty() {
        let mut model = model();
        let (person, alice) = person_with_alice(&mut model);
        let view = View::new(&model, "main");
        view.add(alice, ViewItem::default()).unwrap();
        assert!(view.take_dirty().is_empty());

        // change on the supertype reaches the non-overriding member
        model
            .set_local(person, "fill_color", AttrValue::color("blue"))
            .unwrap();
        assert_eq!(view.take_dirty(), BTreeSet::from([alice]));
        // cleared on read
        assert!(view.take_dirty().is_empty());
    }

    #[test]
    fn test_two_views_place_one_object_independently() {
        let mut model = model();
        let (_, alice) = person_with_alice(&mut model);
        let first = View::new(&model, "first");
        let second = View::new(&model, "second");
        first.add(alice, ViewItem::at(1.0, 1.0)).unwrap();
        second.add(alice, ViewItem::at(9.0, 9.0)).unwrap();
        first.set_position(alice, 2.0, 2.0).unwrap();
        assert_eq!(second.item(alice).unwrap().position, (9.0, 9.0));
    }

    #[test]
    fn test_view_survives_model_drop() {
        let registry = Rc::new(Registry::new());
        let view;
        let alice;
        {
            let mut model = Model::new(Rc::clone(&registry), "scoped");
            let (_, member) = person_with_alice(&mut model);
            alice = member;
            view = View::new(&model, "outliving");
            view.add(alice, ViewItem::default()).unwrap();
            assert!(view.is_live());
        }
        assert!(!view.is_live());
        assert!(view.is_empty());
        assert_eq!(
            view.add(alice, ViewItem::default()),
            Err(Error::NotFound(view.model_id()))
        );
    }

    #[test]
    fn test_remove_member_leaves_model_untouched() {
        let mut model = model();
        let (_, alice) = person_with_alice(&mut model);
        let view = View::new(&model, "main");
        view.add(alice, ViewItem::default()).unwrap();
        assert!(view.remove(alice));
        assert!(!view.remove(alice));
        assert!(model.node(alice).is_ok());
        // no further notifications after removal
        model
            .set_local(alice, "fill_color", AttrValue::color("red"))
            .unwrap();
        assert!(view.take_dirty().is_empty());
    }
}
