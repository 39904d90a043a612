//! Relation-property semantics.
//!
//! Properties never materialize edges in the model. The engine projects the
//! declared edges of a relation type through its effective properties and
//! returns the implied edge set, computed to a fixpoint.

use std::collections::BTreeSet;

use crate::registry::ObjectId;
use crate::relation::RelationProperty;

pub struct SemanticsEngine;

impl SemanticsEngine {
    /// Close `base` under the given properties. `members` is the universe
    /// of objects granted a self-edge when `Reflexive` is present.
    pub fn implied_edges(
        properties: &BTreeSet<RelationProperty>,
        base: &[(ObjectId, ObjectId)],
        members: &[ObjectId],
    ) -> BTreeSet<(ObjectId, ObjectId)> {
        let mut edges: BTreeSet<(ObjectId, ObjectId)> = base.iter().copied().collect();
        if properties.contains(&RelationProperty::Reflexive) {
            for &member in members {
                edges.insert((member, member));
            }
        }
        let symmetric = properties.contains(&RelationProperty::Symmetric);
        let transitive = properties.contains(&RelationProperty::Transitive);
        loop {
            let mut added: Vec<(ObjectId, ObjectId)> = Vec::new();
            if symmetric {
                for &(from, to) in &edges {
                    if !edges.contains(&(to, from)) {
                        added.push((to, from));
                    }
                }
            }
            if transitive {
                for &(from, mid) in &edges {
                    for &(mid2, to) in &edges {
                        if mid == mid2 && !edges.contains(&(from, to)) {
                            added.push((from, to));
                        }
                    }
                }
            }
            if added.is_empty() {
                break;
            }
            edges.extend(added);
        }
        tracing::trace!(
            base = base.len(),
            implied = edges.len(),
            "projected implied edges"
        );
        edges
    }

    /// Decode the stored property-name set, ignoring unknown names.
    pub fn parse_properties(names: &BTreeSet<String>) -> BTreeSet<RelationProperty> {
        names
            .iter()
            .filter_map(|name| RelationProperty::parse(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> ObjectId {
        ObjectId(n)
    }

    fn edge(a: u64, b: u64) -> (ObjectId, ObjectId) {
        (id(a), id(b))
    }

    fn properties(list: &[RelationProperty]) -> BTreeSet<RelationProperty> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_no_properties_is_identity() {
        let edges = SemanticsEngine::implied_edges(
            &BTreeSet::new(),
            &[edge(1, 2), edge(2, 3)],
            &[id(1), id(2), id(3)],
        );
        assert_eq!(edges, BTreeSet::from([edge(1, 2), edge(2, 3)]));
    }

    #[test]
    fn test_transitive_chain_closes() {
        let edges = SemanticsEngine::implied_edges(
            &properties(&[RelationProperty::Transitive]),
            &[edge(1, 2), edge(2, 3), edge(3, 4)],
            &[],
        );
        assert!(edges.contains(&edge(1, 3)));
        assert!(edges.contains(&edge(1, 4)));
        assert!(edges.contains(&edge(2, 4)));
        assert!(!edges.contains(&edge(2, 1)));
    }

    #[test]
    fn test_reflexive_and_symmetric_compose() {
        let edges = SemanticsEngine::implied_edges(
            &properties(&[RelationProperty::Reflexive, RelationProperty::Symmetric]),
            &[edge(1, 2)],
            &[id(1), id(2)],
        );
        assert_eq!(
            edges,
            BTreeSet::from([edge(1, 1), edge(1, 2), edge(2, 1), edge(2, 2)])
        );
    }

    #[test]
    fn test_symmetric_and_transitive_reach_fixpoint() {
        // (1,2) symmetric gives (2,1); transitive over both gives (1,1), (2,2)
        let edges = SemanticsEngine::implied_edges(
            &properties(&[RelationProperty::Symmetric, RelationProperty::Transitive]),
            &[edge(1, 2)],
            &[],
        );
        assert_eq!(
            edges,
            BTreeSet::from([edge(1, 1), edge(1, 2), edge(2, 1), edge(2, 2)])
        );
    }

    #[test]
    fn test_parse_properties_ignores_unknown_names() {
        let names: BTreeSet<String> = ["transitive", "shiny"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            SemanticsEngine::parse_properties(&names),
            properties(&[RelationProperty::Transitive])
        );
    }
}
