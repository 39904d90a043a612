//! The graph model facade.
//!
//! A `Model` owns its nodes and relations, the ISA lattice over them, and
//! the model-wide attribute defaults, and composes the registry, resolver
//! and semantics engines behind one API. Every mutating operation validates
//! fully before changing anything, so a failed edit leaves the model as it
//! was.
//!
//! On construction the model bootstraps its builtin objects: the root node
//! type `T`, the root relation type `REL`, and the three property-carrier
//! relation types `REFLEXIVE`, `SYMMETRIC` and `TRANSITIVE`. Everything a
//! user creates descends from these roots, which is what makes lattice-wide
//! attribute defaults (set on `T` or `REL`) reach every object.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::attributes::{self, AttrMap, AttrSource, AttrValue};
use crate::error::{Error, Result};
use crate::lattice::{EndpointClass, Membership, TypeLattice};
use crate::node::Node;
use crate::registry::{ChangeEvent, ObjectId, ObjectKind, Registry};
use crate::relation::{Relation, RelationProperty, RELATION_PROPERTIES_ATTR};
use crate::semantics::SemanticsEngine;

/// Display name of the root node type.
pub const TOP_NODE_NAME: &str = "T";
/// Display name of the root relation type.
pub const TOP_RELATION_NAME: &str = "REL";

pub struct Model {
    id: ObjectId,
    name: String,
    registry: Rc<Registry>,
    nodes: BTreeMap<ObjectId, Node>,
    relations: BTreeMap<ObjectId, Relation>,
    lattice: TypeLattice,
    defaults: BTreeMap<String, AttrValue>,
    top_node: ObjectId,
    top_relation: ObjectId,
    reflexive_relation: ObjectId,
    symmetric_relation: ObjectId,
    transitive_relation: ObjectId,
    builtins: BTreeSet<ObjectId>,
}

impl Model {
    /// Create an empty model with its builtin objects bootstrapped.
    pub fn new(registry: Rc<Registry>, name: impl Into<String>) -> Self {
        let id = registry.register(ObjectKind::Model);
        let top_node = registry.register(ObjectKind::Node);
        let top_relation = registry.register(ObjectKind::Relation);
        let reflexive_relation = registry.register(ObjectKind::Relation);
        let symmetric_relation = registry.register(ObjectKind::Relation);
        let transitive_relation = registry.register(ObjectKind::Relation);

        let mut nodes = BTreeMap::new();
        let mut relations = BTreeMap::new();
        let mut lattice = TypeLattice::new();

        let mut top = Node::new(top_node, TOP_NODE_NAME);
        top.attrs.set("fill_color", AttrValue::color("white"));
        top.attrs.set("border_color", AttrValue::color("black"));
        top.attrs.set("text_color", AttrValue::color("black"));
        top.attrs.set("shape", AttrValue::text("rectangle"));
        nodes.insert(top_node, top);
        lattice.insert(top_node, EndpointClass::Node, Membership::Type);

        let mut root_relation =
            Relation::new(top_relation, TOP_RELATION_NAME, top_node, top_node);
        root_relation.attrs.set("fill_color", AttrValue::color("white"));
        root_relation.attrs.set("border_color", AttrValue::color("black"));
        root_relation.attrs.set("text_color", AttrValue::color("black"));
        root_relation.attrs.set("shape", AttrValue::text("oval"));
        relations.insert(top_relation, root_relation);
        lattice.insert(top_relation, EndpointClass::Relation, Membership::Type);

        let carriers = [
            (reflexive_relation, "REFLEXIVE", RelationProperty::Reflexive),
            (symmetric_relation, "SYMMETRIC", RelationProperty::Symmetric),
            (transitive_relation, "TRANSITIVE", RelationProperty::Transitive),
        ];
        for (carrier_id, carrier_name, property) in carriers {
            let mut carrier = Relation::new(carrier_id, carrier_name, top_node, top_node);
            carrier
                .attrs
                .set(RELATION_PROPERTIES_ATTR, AttrValue::set([property.as_str()]));
            relations.insert(carrier_id, carrier);
            lattice.insert(carrier_id, EndpointClass::Relation, Membership::Type);
            if let Err(err) = lattice.add_isa_edge(carrier_id, top_relation) {
                tracing::error!(%carrier_id, %err, "bootstrap isa edge failed");
            }
        }

        let builtins = BTreeSet::from([
            top_node,
            top_relation,
            reflexive_relation,
            symmetric_relation,
            transitive_relation,
        ]);

        tracing::debug!(%id, "bootstrapped model");
        Self {
            id,
            name: name.into(),
            registry,
            nodes,
            relations,
            lattice,
            defaults: BTreeMap::new(),
            top_node,
            top_relation,
            reflexive_relation,
            symmetric_relation,
            transitive_relation,
            builtins,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.registry.notify(self.id, &ChangeEvent::Renamed);
    }

    pub fn registry(&self) -> &Rc<Registry> {
        &self.registry
    }

    pub fn top_node(&self) -> ObjectId {
        self.top_node
    }

    pub fn top_relation(&self) -> ObjectId {
        self.top_relation
    }

    pub fn reflexive_relation(&self) -> ObjectId {
        self.reflexive_relation
    }

    pub fn symmetric_relation(&self) -> ObjectId {
        self.symmetric_relation
    }

    pub fn transitive_relation(&self) -> ObjectId {
        self.transitive_relation
    }

    /// Whether `id` is one of the bootstrapped objects, which cannot be
    /// deleted, re-parented away from, or downgraded.
    pub fn is_builtin(&self, id: ObjectId) -> bool {
        self.builtins.contains(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.lattice.contains(id)
    }

    pub fn node(&self, id: ObjectId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(Error::NotFound(id))
    }

    pub fn relation(&self, id: ObjectId) -> Result<&Relation> {
        self.relations.get(&id).ok_or(Error::NotFound(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    pub fn endpoint_class(&self, id: ObjectId) -> Result<EndpointClass> {
        self.lattice.class_of(id)
    }

    pub fn is_individual(&self, id: ObjectId) -> Result<bool> {
        Ok(self.lattice.membership_of(id)?.is_individual())
    }

    pub fn display_name(&self, id: ObjectId) -> Result<&str> {
        if let Some(node) = self.nodes.get(&id) {
            return Ok(&node.name);
        }
        if let Some(relation) = self.relations.get(&id) {
            return Ok(&relation.name);
        }
        Err(Error::NotFound(id))
    }

    pub fn set_display_name(&mut self, id: ObjectId, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if let Some(node) = self.nodes.get_mut(&id) {
            node.name = name;
        } else if let Some(relation) = self.relations.get_mut(&id) {
            relation.name = name;
        } else {
            return Err(Error::NotFound(id));
        }
        self.registry.notify(id, &ChangeEvent::Renamed);
        Ok(())
    }

    // ----- creation and deletion -------------------------------------------

    /// Create a node as an individual under `type_parent`.
    pub fn create_node(
        &mut self,
        name: impl Into<String>,
        type_parent: ObjectId,
    ) -> Result<ObjectId> {
        if self.relations.contains_key(&type_parent) {
            return Err(Error::ClassMismatch {
                id: type_parent,
                expected: EndpointClass::Node,
                found: EndpointClass::Relation,
            });
        }
        self.node(type_parent)?;
        if self.is_individual(type_parent)? {
            return Err(Error::IndividualTarget(type_parent));
        }
        let id = self.registry.register(ObjectKind::Node);
        self.nodes.insert(id, Node::new(id, name));
        self.lattice
            .insert(id, EndpointClass::Node, Membership::Individual);
        self.link_isa(id, type_parent);
        tracing::debug!(%id, %type_parent, "created node");
        self.registry.notify(self.id, &ChangeEvent::Created(id));
        Ok(id)
    }

    /// Create a relation as an individual under `type_parent`, connecting
    /// `source` to `target`. Both endpoints must be in the same endpoint
    /// class, and unless the parent is the root relation each endpoint must
    /// be a subtype (or instance) of the parent's corresponding endpoint.
    pub fn create_relation(
        &mut self,
        name: impl Into<String>,
        type_parent: ObjectId,
        source: ObjectId,
        target: ObjectId,
    ) -> Result<ObjectId> {
        if self.nodes.contains_key(&type_parent) {
            return Err(Error::ClassMismatch {
                id: type_parent,
                expected: EndpointClass::Relation,
                found: EndpointClass::Node,
            });
        }
        let (parent_source, parent_target) = {
            let parent = self.relation(type_parent)?;
            (parent.source, parent.target)
        };
        if self.is_individual(type_parent)? {
            return Err(Error::IndividualTarget(type_parent));
        }
        let source_class = self.endpoint_class(source)?;
        let target_class = self.endpoint_class(target)?;
        if source_class != target_class {
            return Err(Error::ClassMismatch {
                id: target,
                expected: source_class,
                found: target_class,
            });
        }
        // The root relation is endpoint-agnostic; that is what admits
        // relations between relations under the single relation root.
        if type_parent != self.top_relation {
            let template_class = self.endpoint_class(parent_source)?;
            if template_class != source_class {
                return Err(Error::ClassMismatch {
                    id: source,
                    expected: template_class,
                    found: source_class,
                });
            }
            if !self.lattice.is_ancestor(parent_source, source) {
                return Err(Error::Validation(format!(
                    "source {source} does not conform to the type's source {parent_source}"
                )));
            }
            if !self.lattice.is_ancestor(parent_target, target) {
                return Err(Error::Validation(format!(
                    "target {target} does not conform to the type's target {parent_target}"
                )));
            }
        }
        let id = self.registry.register(ObjectKind::Relation);
        self.relations.insert(id, Relation::new(id, name, source, target));
        self.lattice
            .insert(id, EndpointClass::Relation, Membership::Individual);
        self.link_isa(id, type_parent);
        tracing::debug!(%id, %type_parent, %source, %target, "created relation");
        self.registry.notify(self.id, &ChangeEvent::Created(id));
        Ok(id)
    }

    pub fn delete_node(&mut self, id: ObjectId) -> Result<()> {
        self.node(id)?;
        self.delete_object(id)
    }

    pub fn delete_relation(&mut self, id: ObjectId) -> Result<()> {
        self.relation(id)?;
        self.delete_object(id)
    }

    /// Delete an object plus, transitively, every relation with a deleted
    /// endpoint. Objects orphaned in the lattice by the deletion are
    /// re-parented to their class root. Observers of each deleted object
    /// receive `Destroyed` before this returns.
    fn delete_object(&mut self, root: ObjectId) -> Result<()> {
        if self.is_builtin(root) {
            return Err(Error::Validation(format!(
                "{root} is a builtin object and cannot be deleted"
            )));
        }
        let mut doomed: Vec<ObjectId> = vec![root];
        let mut doomed_set: BTreeSet<ObjectId> = BTreeSet::from([root]);
        let mut cursor = 0;
        while cursor < doomed.len() {
            let current = doomed[cursor];
            cursor += 1;
            for relation in self.relations.values() {
                if relation.has_endpoint(current) && doomed_set.insert(relation.id) {
                    doomed.push(relation.id);
                }
            }
        }

        let mut orphan_checks: BTreeSet<ObjectId> = BTreeSet::new();
        for &id in &doomed {
            for sub in self.lattice.remove(id) {
                if !doomed_set.contains(&sub) {
                    orphan_checks.insert(sub);
                }
            }
        }
        for &id in &doomed {
            self.nodes.remove(&id);
            self.relations.remove(&id);
        }
        for sub in orphan_checks {
            self.reparent_if_orphaned(sub);
        }
        for &id in &doomed {
            if let Err(err) = self.registry.unregister(id) {
                tracing::warn!(%id, %err, "unregister during delete");
            }
            self.registry.notify(self.id, &ChangeEvent::Deleted(id));
        }
        tracing::debug!(%root, cascade = doomed.len(), "deleted object");
        Ok(())
    }

    // ----- lattice edits ---------------------------------------------------

    /// Add the isa edge `sub -> sup`, then drop any of `sub`'s direct edges
    /// the new edge made redundant. Re-typing a relation under a
    /// non-builtin relation type re-checks that its endpoints fit the new
    /// supertype's template.
    pub fn add_isa_edge(&mut self, sub: ObjectId, sup: ObjectId) -> Result<()> {
        if self.is_builtin(sub) {
            return Err(Error::Validation(format!(
                "{sub} is a builtin object and cannot be re-parented"
            )));
        }
        if !self.is_builtin(sup) {
            if let (Ok(sub_relation), Ok(sup_relation)) = (self.relation(sub), self.relation(sup))
            {
                let (sub_source, sub_target) = sub_relation.endpoints();
                let (sup_source, sup_target) = sup_relation.endpoints();
                if !self.lattice.is_ancestor(sup_source, sub_source) {
                    return Err(Error::Validation(format!(
                        "source {sub_source} does not conform to the type's source {sup_source}"
                    )));
                }
                if !self.lattice.is_ancestor(sup_target, sub_target) {
                    return Err(Error::Validation(format!(
                        "target {sub_target} does not conform to the type's target {sup_target}"
                    )));
                }
            }
        }
        self.lattice.add_isa_edge(sub, sup)?;
        self.prune_redundant_isa(sub, sup);
        self.registry
            .notify(sub, &ChangeEvent::IsaAdded { sub, sup });
        Ok(())
    }

    /// Remove a direct isa edge. An object left with no supertype is
    /// re-parented to its class root.
    pub fn remove_isa_edge(&mut self, sub: ObjectId, sup: ObjectId) -> Result<()> {
        if self.is_builtin(sub) {
            return Err(Error::Validation(format!(
                "{sub} is a builtin object and cannot be re-parented"
            )));
        }
        self.lattice.remove_isa_edge(sub, sup)?;
        self.registry
            .notify(sub, &ChangeEvent::IsaRemoved { sub, sup });
        self.reparent_if_orphaned(sub);
        Ok(())
    }

    pub fn set_is_individual(&mut self, id: ObjectId, individual: bool) -> Result<()> {
        if self.is_builtin(id) {
            return Err(Error::Validation(format!(
                "{id} is a builtin object and cannot change membership"
            )));
        }
        let membership = if individual {
            Membership::Individual
        } else {
            Membership::Type
        };
        self.lattice.set_membership(id, membership)
    }

    pub fn direct_supertypes(&self, id: ObjectId) -> Vec<ObjectId> {
        self.lattice.direct_supertypes(id).to_vec()
    }

    pub fn direct_subtypes(&self, id: ObjectId) -> Vec<ObjectId> {
        self.lattice.direct_subtypes(id).to_vec()
    }

    pub fn ancestors_of(&self, id: ObjectId) -> Result<Vec<ObjectId>> {
        self.lattice.class_of(id)?;
        Ok(self.lattice.ancestors_of(id))
    }

    pub fn descendants_of(&self, id: ObjectId) -> Result<Vec<ObjectId>> {
        self.lattice.class_of(id)?;
        Ok(self.lattice.descendants_of(id))
    }

    pub fn is_ancestor(&self, ancestor: ObjectId, id: ObjectId) -> bool {
        self.lattice.is_ancestor(ancestor, id)
    }

    pub fn isa_edges(&self) -> Vec<(ObjectId, ObjectId)> {
        self.lattice.isa_edges()
    }

    fn link_isa(&mut self, sub: ObjectId, sup: ObjectId) {
        if let Err(err) = self.lattice.add_isa_edge(sub, sup) {
            tracing::error!(%sub, %sup, %err, "internal isa link failed");
            return;
        }
        self.prune_redundant_isa(sub, sup);
    }

    fn prune_redundant_isa(&mut self, sub: ObjectId, sup: ObjectId) {
        let covered: BTreeSet<ObjectId> = self.lattice.ancestors_of(sup).into_iter().collect();
        let redundant: Vec<ObjectId> = self
            .lattice
            .direct_supertypes(sub)
            .iter()
            .copied()
            .filter(|other| *other != sup && covered.contains(other))
            .collect();
        for other in redundant {
            tracing::debug!(%sub, sup = %other, "dropping redundant isa edge");
            if let Err(err) = self.lattice.remove_isa_edge(sub, other) {
                tracing::warn!(%sub, sup = %other, %err, "redundant edge removal failed");
                continue;
            }
            self.registry
                .notify(sub, &ChangeEvent::IsaRemoved { sub, sup: other });
        }
    }

    fn reparent_if_orphaned(&mut self, id: ObjectId) {
        if self.is_builtin(id) || !self.lattice.contains(id) {
            return;
        }
        if !self.lattice.direct_supertypes(id).is_empty() {
            return;
        }
        let root = match self.lattice.class_of(id) {
            Ok(EndpointClass::Node) => self.top_node,
            Ok(EndpointClass::Relation) => self.top_relation,
            Err(_) => return,
        };
        tracing::debug!(%id, %root, "re-parenting orphaned object to class root");
        if let Err(err) = self.lattice.add_isa_edge(id, root) {
            tracing::warn!(%id, %root, %err, "re-parenting failed");
            return;
        }
        self.registry
            .notify(id, &ChangeEvent::IsaAdded { sub: id, sup: root });
    }

    // ----- attributes ------------------------------------------------------

    /// Set a local attribute binding. Always succeeds for a known object;
    /// observers of the object and of non-overriding descendants are
    /// notified.
    pub fn set_local(&mut self, id: ObjectId, name: impl Into<String>, value: AttrValue) -> Result<()> {
        let name = name.into();
        self.attrs_mut(id)?.set(name.clone(), value);
        self.notify_attr_changed(id, &name);
        Ok(())
    }

    /// Remove a local binding, exposing whatever the chain beneath it
    /// resolves to. Removing a binding that is not there is a no-op.
    pub fn clear_local(&mut self, id: ObjectId, name: &str) -> Result<()> {
        let removed = self.attrs_mut(id)?.remove(name);
        if removed {
            self.notify_attr_changed(id, name);
        }
        Ok(())
    }

    pub fn local_attrs(&self, id: ObjectId) -> Result<&AttrMap> {
        self.attrs_of(id).ok_or(Error::NotFound(id))
    }

    /// Resolve an attribute against the inheritance chain. Uncached: always
    /// reflects the current lattice and local values.
    pub fn resolve_attr(&self, id: ObjectId, name: &str) -> Result<(AttrValue, AttrSource)> {
        self.lattice.class_of(id)?;
        attributes::resolve_with(
            id,
            name,
            &self.lattice,
            |object| self.attrs_of(object),
            &self.defaults,
        )
    }

    /// Every attribute name with a defined value for `id`.
    pub fn effective_keys(&self, id: ObjectId) -> Result<Vec<String>> {
        self.lattice.class_of(id)?;
        Ok(attributes::effective_keys(
            id,
            &self.lattice,
            |object| self.attrs_of(object),
            &self.defaults,
        ))
    }

    /// Define a lattice-wide default, visible from every object that has no
    /// nearer value.
    pub fn define_default(&mut self, name: impl Into<String>, value: AttrValue) {
        self.defaults.insert(name.into(), value);
    }

    pub fn clear_default(&mut self, name: &str) -> bool {
        self.defaults.remove(name).is_some()
    }

    pub fn defaults(&self) -> &BTreeMap<String, AttrValue> {
        &self.defaults
    }

    fn attrs_of(&self, id: ObjectId) -> Option<&AttrMap> {
        if let Some(node) = self.nodes.get(&id) {
            return Some(&node.attrs);
        }
        self.relations.get(&id).map(|relation| &relation.attrs)
    }

    fn attrs_mut(&mut self, id: ObjectId) -> Result<&mut AttrMap> {
        if let Some(node) = self.nodes.get_mut(&id) {
            return Ok(&mut node.attrs);
        }
        if let Some(relation) = self.relations.get_mut(&id) {
            return Ok(&mut relation.attrs);
        }
        Err(Error::NotFound(id))
    }

    fn notify_attr_changed(&self, id: ObjectId, name: &str) {
        let event = ChangeEvent::AttributeChanged {
            name: name.to_string(),
        };
        self.registry.notify(id, &event);
        for descendant in self.lattice.descendants_of(id) {
            let overridden = self
                .attrs_of(descendant)
                .map(|attrs| attrs.contains(name))
                .unwrap_or(false);
            if !overridden {
                self.registry.notify(descendant, &event);
            }
        }
    }

    // ----- relation semantics ----------------------------------------------

    /// Declare a property on a relation type by inserting it into the
    /// reserved property set attribute.
    pub fn declare_property(
        &mut self,
        rel_type: ObjectId,
        property: RelationProperty,
    ) -> Result<()> {
        self.relation(rel_type)?;
        let attrs = self.attrs_mut(rel_type)?;
        let mut names = match attrs.get(RELATION_PROPERTIES_ATTR) {
            Some(AttrValue::Set(existing)) => existing.clone(),
            _ => BTreeSet::new(),
        };
        names.insert(property.as_str().to_string());
        attrs.set(RELATION_PROPERTIES_ATTR, AttrValue::Set(names));
        self.notify_attr_changed(rel_type, RELATION_PROPERTIES_ATTR);
        Ok(())
    }

    /// The union of properties declared on `rel_type` and inherited from
    /// its supertypes.
    pub fn effective_properties(&self, rel_type: ObjectId) -> Result<BTreeSet<RelationProperty>> {
        self.relation(rel_type)?;
        match self.resolve_attr(rel_type, RELATION_PROPERTIES_ATTR) {
            Ok((AttrValue::Set(names), _)) => Ok(SemanticsEngine::parse_properties(&names)),
            Ok(_) => Ok(BTreeSet::new()),
            Err(Error::UndefinedAttribute { .. }) => Ok(BTreeSet::new()),
            Err(err) => Err(err),
        }
    }

    /// Project the declared edges of `rel_type` through its effective
    /// properties. The result is computed fresh on every call and never
    /// stored. Reflexive self-edges cover every non-builtin object of the
    /// type's endpoint class.
    pub fn implied_edges(&self, rel_type: ObjectId) -> Result<BTreeSet<(ObjectId, ObjectId)>> {
        let template_source = self.relation(rel_type)?.source;
        if self.is_individual(rel_type)? {
            return Err(Error::Validation(format!(
                "{rel_type} is an individual relation, not a relation type"
            )));
        }
        let properties = self.effective_properties(rel_type)?;
        let base: Vec<(ObjectId, ObjectId)> = self
            .relations
            .values()
            .filter(|relation| {
                self.lattice.is_ancestor(rel_type, relation.id)
                    && matches!(
                        self.lattice.membership_of(relation.id),
                        Ok(membership) if membership.is_individual()
                    )
            })
            .map(|relation| (relation.source, relation.target))
            .collect();
        let members: Vec<ObjectId> = match self.endpoint_class(template_source)? {
            EndpointClass::Node => self
                .nodes
                .keys()
                .copied()
                .filter(|id| !self.is_builtin(*id))
                .collect(),
            EndpointClass::Relation => self
                .relations
                .keys()
                .copied()
                .filter(|id| !self.is_builtin(*id))
                .collect(),
        };
        Ok(SemanticsEngine::implied_edges(&properties, &base, &members))
    }

    /// Whether `from` relates to `to` under `rel_type`, counting implied
    /// edges.
    pub fn is_related_to(&self, from: ObjectId, rel_type: ObjectId, to: ObjectId) -> Result<bool> {
        Ok(self.implied_edges(rel_type)?.contains(&(from, to)))
    }

    /// Everything `from` relates to under `rel_type`, counting implied
    /// edges.
    pub fn related_to(&self, from: ObjectId, rel_type: ObjectId) -> Result<BTreeSet<ObjectId>> {
        Ok(self
            .implied_edges(rel_type)?
            .into_iter()
            .filter(|(source, _)| *source == from)
            .map(|(_, target)| target)
            .collect())
    }
}

impl Drop for Model {
    fn drop(&mut self) {
        // Unregister everything so observers (views) see each object die.
        let ids: Vec<ObjectId> = self
            .relations
            .keys()
            .chain(self.nodes.keys())
            .copied()
            .collect();
        for id in ids {
            let _ = self.registry.unregister(id);
        }
        let _ = self.registry.unregister(self.id);
    }
}
