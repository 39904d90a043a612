//! Model persistence.
//!
//! A snapshot captures the user-created portion of a model in a plain serde
//! document. Builtin objects are referenced symbolically rather than by id,
//! because a restoring model re-creates its own builtins and issues fresh
//! ids for everything; object relationships survive a round trip, raw ids
//! do not. Restore replays the snapshot through the ordinary validated
//! operations, so a document that violates model invariants is rejected
//! rather than materialized.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::attributes::{AttrMap, AttrValue};
use crate::error::{Error, Result};
use crate::lattice::Membership;
use crate::model::Model;
use crate::registry::{ObjectId, Registry};

/// Symbolic handle for the objects every model bootstraps itself.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinRef {
    TopNode,
    TopRelation,
    Reflexive,
    Symmetric,
    Transitive,
}

/// A reference inside a snapshot: a captured user-object id, or a builtin.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotRef {
    Builtin(BuiltinRef),
    Object(ObjectId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: ObjectId,
    pub name: String,
    pub membership: Membership,
    pub attrs: AttrMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationSnapshot {
    pub id: ObjectId,
    pub name: String,
    pub membership: Membership,
    pub source: SnapshotRef,
    pub target: SnapshotRef,
    pub attrs: AttrMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub name: String,
    pub defaults: BTreeMap<String, AttrValue>,
    pub nodes: Vec<NodeSnapshot>,
    pub relations: Vec<RelationSnapshot>,
    /// Isa edges of user objects, each sub's supertypes in declaration
    /// order so tie-break order survives restore.
    pub isa_edges: Vec<(ObjectId, SnapshotRef)>,
    /// Local attribute state of the builtin objects, which users may
    /// customize (lattice-wide cosmetics live on `T` and `REL`).
    pub builtin_attrs: BTreeMap<BuiltinRef, AttrMap>,
}

impl Model {
    /// Capture the user-created contents of this model.
    pub fn snapshot(&self) -> ModelSnapshot {
        let nodes = self
            .nodes()
            .filter(|node| !self.is_builtin(node.id))
            .map(|node| NodeSnapshot {
                id: node.id,
                name: node.name.clone(),
                membership: self.membership_snapshot(node.id),
                attrs: node.attrs.clone(),
            })
            .collect();
        let relations = self
            .relations()
            .filter(|relation| !self.is_builtin(relation.id))
            .map(|relation| RelationSnapshot {
                id: relation.id,
                name: relation.name.clone(),
                membership: self.membership_snapshot(relation.id),
                source: self.snapshot_ref(relation.source),
                target: self.snapshot_ref(relation.target),
                attrs: relation.attrs.clone(),
            })
            .collect();
        let isa_edges = self
            .isa_edges()
            .into_iter()
            .filter(|(sub, _)| !self.is_builtin(*sub))
            .map(|(sub, sup)| (sub, self.snapshot_ref(sup)))
            .collect();
        let builtin_attrs = self
            .builtin_refs()
            .into_iter()
            .filter_map(|(builtin, id)| {
                self.local_attrs(id).ok().map(|attrs| (builtin, attrs.clone()))
            })
            .collect();
        ModelSnapshot {
            name: self.name().to_string(),
            defaults: self.defaults().clone(),
            nodes,
            relations,
            isa_edges,
            builtin_attrs,
        }
    }

    /// Rebuild a model from a snapshot by replaying it through the normal
    /// operations. Ids are issued fresh; relationships are preserved.
    pub fn restore(registry: Rc<Registry>, snapshot: &ModelSnapshot) -> Result<Model> {
        let mut model = Model::new(registry, snapshot.name.clone());
        let mut ids: BTreeMap<ObjectId, ObjectId> = BTreeMap::new();

        let mut nodes = snapshot.nodes.clone();
        nodes.sort_by_key(|node| node.id);
        for node in &nodes {
            let new_id = model.create_node(node.name.clone(), model.top_node())?;
            ids.insert(node.id, new_id);
        }

        // Ascending id order guarantees a relation's endpoints were captured
        // (and thus re-created) before the relation itself.
        let mut relations = snapshot.relations.clone();
        relations.sort_by_key(|relation| relation.id);
        for relation in &relations {
            let source = resolve_ref(&model, &ids, relation.source)?;
            let target = resolve_ref(&model, &ids, relation.target)?;
            let new_id =
                model.create_relation(relation.name.clone(), model.top_relation(), source, target)?;
            ids.insert(relation.id, new_id);
        }

        // promotions before isa edges: edge targets must be types
        for node in &nodes {
            if node.membership.is_type() {
                let id = resolve_ref(&model, &ids, SnapshotRef::Object(node.id))?;
                model.set_is_individual(id, false)?;
            }
        }
        for relation in &relations {
            if relation.membership.is_type() {
                let id = resolve_ref(&model, &ids, SnapshotRef::Object(relation.id))?;
                model.set_is_individual(id, false)?;
            }
        }

        for &(snapshot_sub, sup_ref) in &snapshot.isa_edges {
            let sub = resolve_ref(&model, &ids, SnapshotRef::Object(snapshot_sub))?;
            let sup = resolve_ref(&model, &ids, sup_ref)?;
            // the bootstrap edge to the class root may already cover this
            if model.is_ancestor(sup, sub) {
                continue;
            }
            model.add_isa_edge(sub, sup)?;
        }

        for node in &nodes {
            let id = resolve_ref(&model, &ids, SnapshotRef::Object(node.id))?;
            for (name, value) in node.attrs.iter() {
                model.set_local(id, name, value.clone())?;
            }
        }
        for relation in &relations {
            let id = resolve_ref(&model, &ids, SnapshotRef::Object(relation.id))?;
            for (name, value) in relation.attrs.iter() {
                model.set_local(id, name, value.clone())?;
            }
        }

        // builtin attribute state replaces the bootstrap values wholesale,
        // so cleared bootstrap attributes stay cleared
        for (builtin, attrs) in &snapshot.builtin_attrs {
            let id = resolve_ref(&model, &ids, SnapshotRef::Builtin(*builtin))?;
            let stale: Vec<String> = model
                .local_attrs(id)?
                .keys()
                .filter(|name| !attrs.contains(name))
                .map(str::to_string)
                .collect();
            for name in stale {
                model.clear_local(id, &name)?;
            }
            for (name, value) in attrs.iter() {
                model.set_local(id, name, value.clone())?;
            }
        }

        for (name, value) in &snapshot.defaults {
            model.define_default(name.clone(), value.clone());
        }

        tracing::debug!(
            nodes = nodes.len(),
            relations = relations.len(),
            "restored model"
        );
        Ok(model)
    }

    fn membership_snapshot(&self, id: ObjectId) -> Membership {
        match self.is_individual(id) {
            Ok(true) => Membership::Individual,
            _ => Membership::Type,
        }
    }

    fn builtin_refs(&self) -> [(BuiltinRef, ObjectId); 5] {
        [
            (BuiltinRef::TopNode, self.top_node()),
            (BuiltinRef::TopRelation, self.top_relation()),
            (BuiltinRef::Reflexive, self.reflexive_relation()),
            (BuiltinRef::Symmetric, self.symmetric_relation()),
            (BuiltinRef::Transitive, self.transitive_relation()),
        ]
    }

    fn snapshot_ref(&self, id: ObjectId) -> SnapshotRef {
        if id == self.top_node() {
            SnapshotRef::Builtin(BuiltinRef::TopNode)
        } else if id == self.top_relation() {
            SnapshotRef::Builtin(BuiltinRef::TopRelation)
        } else if id == self.reflexive_relation() {
            SnapshotRef::Builtin(BuiltinRef::Reflexive)
        } else if id == self.symmetric_relation() {
            SnapshotRef::Builtin(BuiltinRef::Symmetric)
        } else if id == self.transitive_relation() {
            SnapshotRef::Builtin(BuiltinRef::Transitive)
        } else {
            SnapshotRef::Object(id)
        }
    }
}

fn resolve_ref(
    model: &Model,
    ids: &BTreeMap<ObjectId, ObjectId>,
    reference: SnapshotRef,
) -> Result<ObjectId> {
    match reference {
        SnapshotRef::Builtin(builtin) => Ok(match builtin {
            BuiltinRef::TopNode => model.top_node(),
            BuiltinRef::TopRelation => model.top_relation(),
            BuiltinRef::Reflexive => model.reflexive_relation(),
            BuiltinRef::Symmetric => model.symmetric_relation(),
            BuiltinRef::Transitive => model.transitive_relation(),
        }),
        SnapshotRef::Object(old) => ids.get(&old).copied().ok_or_else(|| {
            Error::Validation(format!("snapshot references unknown object {old}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::attributes::AttrSource;
    use crate::relation::RelationProperty;

    fn build_sample() -> Model {
        let mut model = Model::new(Rc::new(Registry::new()), "sample");
        let person = model.create_node("person", model.top_node()).unwrap();
        model.set_is_individual(person, false).unwrap();
        model
            .set_local(person, "fill_color", AttrValue::color("blue"))
            .unwrap();
        let alice = model.create_node("alice", person).unwrap();
        let bob = model.create_node("bob", person).unwrap();
        model
            .set_local(alice, "fill_color", AttrValue::color("red"))
            .unwrap();
        let knows = model
            .create_relation("knows", model.top_relation(), person, person)
            .unwrap();
        model.set_is_individual(knows, false).unwrap();
        model.add_isa_edge(knows, model.symmetric_relation()).unwrap();
        model.create_relation("k1", knows, alice, bob).unwrap();
        model.define_default("border_width", AttrValue::Int(1));
        model
    }

    fn node_named(model: &Model, name: &str) -> ObjectId {
        model
            .nodes()
            .find(|node| node.name == name)
            .map(|node| node.id)
            .unwrap()
    }

    fn relation_named(model: &Model, name: &str) -> ObjectId {
        model
            .relations()
            .find(|relation| relation.name == name)
            .map(|relation| relation.id)
            .unwrap()
    }

    #[test]
    fn test_snapshot_skips_builtins() {
        let model = build_sample();
        let snapshot = model.snapshot();
        assert_eq!(snapshot.nodes.len(), 3);
        assert_eq!(snapshot.relations.len(), 2);
        assert!(snapshot
            .isa_edges
            .iter()
            .all(|(sub, _)| !model.is_builtin(*sub)));
    }

    #[test]
    fn test_restore_preserves_relationships() {
        let snapshot = build_sample().snapshot();
        let restored = Model::restore(Rc::new(Registry::new()), &snapshot).unwrap();

        let person = node_named(&restored, "person");
        let alice = node_named(&restored, "alice");
        let bob = node_named(&restored, "bob");
        let knows = relation_named(&restored, "knows");
        let k1 = relation_named(&restored, "k1");

        assert!(!restored.is_individual(person).unwrap());
        assert!(restored.is_individual(alice).unwrap());
        assert_eq!(restored.direct_supertypes(alice), vec![person]);
        assert_eq!(restored.relation(k1).unwrap().endpoints(), (alice, bob));
        assert_eq!(
            restored.resolve_attr(alice, "fill_color").unwrap(),
            (AttrValue::color("red"), AttrSource::Local)
        );
        assert_eq!(
            restored.resolve_attr(bob, "fill_color").unwrap(),
            (AttrValue::color("blue"), AttrSource::Inherited(person))
        );
        assert_eq!(
            restored.resolve_attr(bob, "border_width").unwrap().1,
            AttrSource::Default
        );
        // symmetric property and its implied edges survive
        assert_eq!(
            restored.effective_properties(knows).unwrap(),
            BTreeSet::from([RelationProperty::Symmetric])
        );
        assert!(restored.is_related_to(bob, knows, alice).unwrap());
    }

    #[test]
    fn test_snapshot_round_trips_through_json() {
        let snapshot = build_sample().snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: ModelSnapshot = serde_json::from_str(&json).unwrap();
        let restored = Model::restore(Rc::new(Registry::new()), &parsed).unwrap();
        assert_eq!(restored.nodes().count(), 4); // T + 3 user nodes
        assert_eq!(restored.relations().count(), 6); // 4 builtins + 2 user
    }

    #[test]
    fn test_restore_rejects_dangling_reference() {
        let mut snapshot = build_sample().snapshot();
        snapshot.relations.push(RelationSnapshot {
            id: ObjectId(9999),
            name: "dangling".into(),
            membership: Membership::Individual,
            source: SnapshotRef::Object(ObjectId(4242)),
            target: SnapshotRef::Builtin(BuiltinRef::TopNode),
            attrs: AttrMap::new(),
        });
        assert!(matches!(
            Model::restore(Rc::new(Registry::new()), &snapshot),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_builtin_attribute_overrides_survive_restore() {
        let mut model = build_sample();
        let top = model.top_node();
        model
            .set_local(top, "border_color", AttrValue::color("pink"))
            .unwrap();
        model.clear_local(top, "shape").unwrap();

        let restored = Model::restore(Rc::new(Registry::new()), &model.snapshot()).unwrap();
        let top = restored.top_node();
        assert_eq!(
            restored.resolve_attr(top, "border_color").unwrap().0,
            AttrValue::color("pink")
        );
        assert!(matches!(
            restored.resolve_attr(top, "shape"),
            Err(Error::UndefinedAttribute { .. })
        ));
        // the customization still reaches user objects through inheritance
        let bob = node_named(&restored, "bob");
        assert_eq!(
            restored.resolve_attr(bob, "border_color").unwrap().0,
            AttrValue::color("pink")
        );
    }

    #[test]
    fn test_restore_rejects_nonconforming_retype() {
        let mut model = build_sample();
        let city = model.create_node("city", model.top_node()).unwrap();
        model.set_is_individual(city, false).unwrap();
        let paris = model.create_node("paris", city).unwrap();

        // re-point k1's target outside the template of knows
        let mut snapshot = model.snapshot();
        for relation in &mut snapshot.relations {
            if relation.name == "k1" {
                relation.target = SnapshotRef::Object(paris);
            }
        }
        assert!(matches!(
            Model::restore(Rc::new(Registry::new()), &snapshot),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_restore_preserves_supertype_declaration_order() {
        let mut model = Model::new(Rc::new(Registry::new()), "ordered");
        let s1 = model.create_node("s1", model.top_node()).unwrap();
        model.set_is_individual(s1, false).unwrap();
        let s2 = model.create_node("s2", model.top_node()).unwrap();
        model.set_is_individual(s2, false).unwrap();
        model
            .set_local(s1, "shape", AttrValue::text("rectangle"))
            .unwrap();
        model.set_local(s2, "shape", AttrValue::text("oval")).unwrap();
        let x = model.create_node("x", s1).unwrap();
        model.add_isa_edge(x, s2).unwrap();
        assert_eq!(
            model.resolve_attr(x, "shape").unwrap().0,
            AttrValue::text("rectangle")
        );

        let restored = Model::restore(Rc::new(Registry::new()), &model.snapshot()).unwrap();
        let x = node_named(&restored, "x");
        let s1 = node_named(&restored, "s1");
        let s2 = node_named(&restored, "s2");
        assert_eq!(restored.direct_supertypes(x), vec![s1, s2]);
        assert_eq!(
            restored.resolve_attr(x, "shape").unwrap().0,
            AttrValue::text("rectangle")
        );
    }
}
