//! The ISA type lattice.
//!
//! A directed acyclic graph of isa edges over two disjoint endpoint classes
//! (nodes and relations). Direct supertypes keep declaration order, which
//! fixes the ancestor enumeration order and therefore attribute-resolution
//! tie-breaks. All mutations validate fully before touching the structure,
//! so a rejected edit leaves the lattice exactly as it was.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::registry::ObjectId;

/// Which half of the lattice an object lives in. Isa edges never cross
/// classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointClass {
    Node,
    Relation,
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointClass::Node => write!(f, "node"),
            EndpointClass::Relation => write!(f, "relation"),
        }
    }
}

/// Whether an object is a type (may have subtypes) or an individual (a leaf
/// that nothing may isa into).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    Type,
    Individual,
}

impl Membership {
    pub fn is_type(self) -> bool {
        self == Membership::Type
    }

    pub fn is_individual(self) -> bool {
        self == Membership::Individual
    }
}

#[derive(Debug)]
struct TypeRecord {
    class: EndpointClass,
    membership: Membership,
    /// Direct supertypes in declaration order.
    supers: Vec<ObjectId>,
    /// Direct subtypes in declaration order.
    subs: Vec<ObjectId>,
}

#[derive(Debug, Default)]
pub struct TypeLattice {
    records: HashMap<ObjectId, TypeRecord>,
}

impl TypeLattice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object to the lattice with no isa edges.
    pub fn insert(&mut self, id: ObjectId, class: EndpointClass, membership: Membership) {
        self.records.insert(
            id,
            TypeRecord {
                class,
                membership,
                supers: Vec::new(),
                subs: Vec::new(),
            },
        );
    }

    /// Remove an object and every isa edge touching it. Returns the former
    /// direct subtypes, which may now need a new supertype.
    pub fn remove(&mut self, id: ObjectId) -> Vec<ObjectId> {
        let Some(record) = self.records.remove(&id) else {
            return Vec::new();
        };
        for sup in &record.supers {
            if let Some(sup_record) = self.records.get_mut(sup) {
                sup_record.subs.retain(|&other| other != id);
            }
        }
        for sub in &record.subs {
            if let Some(sub_record) = self.records.get_mut(sub) {
                sub_record.supers.retain(|&other| other != id);
            }
        }
        record.subs
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.records.contains_key(&id)
    }

    fn record(&self, id: ObjectId) -> Result<&TypeRecord> {
        self.records.get(&id).ok_or(Error::NotFound(id))
    }

    pub fn class_of(&self, id: ObjectId) -> Result<EndpointClass> {
        Ok(self.record(id)?.class)
    }

    pub fn membership_of(&self, id: ObjectId) -> Result<Membership> {
        Ok(self.record(id)?.membership)
    }

    /// Change an object's membership. Downgrading a type to an individual is
    /// rejected while it still has direct subtypes.
    pub fn set_membership(&mut self, id: ObjectId, membership: Membership) -> Result<()> {
        let record = self.records.get_mut(&id).ok_or(Error::NotFound(id))?;
        if membership.is_individual() && !record.subs.is_empty() {
            return Err(Error::TypeDowngrade(id));
        }
        record.membership = membership;
        Ok(())
    }

    /// Add the isa edge `sub -> sup`. Rejected (leaving the lattice
    /// unchanged) if either end is unknown, the classes differ, `sup` is an
    /// individual, the edge would close a cycle, or `sup` is already an
    /// ancestor of `sub`.
    pub fn add_isa_edge(&mut self, sub: ObjectId, sup: ObjectId) -> Result<()> {
        let sub_record = self.record(sub)?;
        let sup_record = self.record(sup)?;
        if sub_record.class != sup_record.class {
            return Err(Error::ClassMismatch {
                id: sup,
                expected: sub_record.class,
                found: sup_record.class,
            });
        }
        if sup_record.membership.is_individual() {
            return Err(Error::IndividualTarget(sup));
        }
        if self.is_ancestor(sub, sup) {
            tracing::debug!(%sub, %sup, "rejected isa edge: would close a cycle");
            return Err(Error::Cycle { sub, sup });
        }
        if self.is_ancestor(sup, sub) {
            return Err(Error::Validation(format!(
                "{sub} is already a subtype of {sup}"
            )));
        }
        if let Some(record) = self.records.get_mut(&sub) {
            record.supers.push(sup);
        }
        if let Some(record) = self.records.get_mut(&sup) {
            record.subs.push(sub);
        }
        Ok(())
    }

    /// Remove the direct isa edge `sub -> sup`.
    pub fn remove_isa_edge(&mut self, sub: ObjectId, sup: ObjectId) -> Result<()> {
        self.record(sup)?;
        let record = self.records.get_mut(&sub).ok_or(Error::NotFound(sub))?;
        let Some(position) = record.supers.iter().position(|&other| other == sup) else {
            return Err(Error::Validation(format!("no isa edge {sub} -> {sup}")));
        };
        record.supers.remove(position);
        if let Some(sup_record) = self.records.get_mut(&sup) {
            sup_record.subs.retain(|&other| other != sub);
        }
        Ok(())
    }

    pub fn direct_supertypes(&self, id: ObjectId) -> &[ObjectId] {
        self.records
            .get(&id)
            .map(|record| record.supers.as_slice())
            .unwrap_or(&[])
    }

    pub fn direct_subtypes(&self, id: ObjectId) -> &[ObjectId] {
        self.records
            .get(&id)
            .map(|record| record.subs.as_slice())
            .unwrap_or(&[])
    }

    /// All strict ancestors of `id`, breadth-first, direct supertypes in
    /// declaration order, first visit wins on diamonds.
    pub fn ancestors_of(&self, id: ObjectId) -> Vec<ObjectId> {
        self.walk(id, |record| &record.supers)
    }

    /// All strict descendants of `id`, breadth-first.
    pub fn descendants_of(&self, id: ObjectId) -> Vec<ObjectId> {
        self.walk(id, |record| &record.subs)
    }

    fn walk(&self, id: ObjectId, next: impl Fn(&TypeRecord) -> &Vec<ObjectId>) -> Vec<ObjectId> {
        let mut order = Vec::new();
        let mut seen: HashSet<ObjectId> = HashSet::from([id]);
        let mut queue: VecDeque<ObjectId> = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            let Some(record) = self.records.get(&current) else {
                continue;
            };
            for &neighbor in next(record) {
                if seen.insert(neighbor) {
                    order.push(neighbor);
                    queue.push_back(neighbor);
                }
            }
        }
        order
    }

    /// `true` when `ancestor` is `id` itself or reachable from `id` along
    /// isa edges.
    pub fn is_ancestor(&self, ancestor: ObjectId, id: ObjectId) -> bool {
        if ancestor == id {
            return true;
        }
        let mut seen: HashSet<ObjectId> = HashSet::from([id]);
        let mut queue: VecDeque<ObjectId> = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            let Some(record) = self.records.get(&current) else {
                continue;
            };
            for &sup in &record.supers {
                if sup == ancestor {
                    return true;
                }
                if seen.insert(sup) {
                    queue.push_back(sup);
                }
            }
        }
        false
    }

    /// Every isa edge as `(sub, sup)` pairs: subs in ascending id order,
    /// each sub's supertypes in declaration order.
    pub fn isa_edges(&self) -> Vec<(ObjectId, ObjectId)> {
        let mut ids: Vec<ObjectId> = self.records.keys().copied().collect();
        ids.sort();
        ids.into_iter()
            .flat_map(|sub| {
                self.direct_supertypes(sub)
                    .iter()
                    .map(move |&sup| (sub, sup))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
