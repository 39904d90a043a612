//! Typegraph Core - a typed-graph modeling engine.
//!
//! Models are graphs whose nodes and relations are simultaneously data and
//! types: every object sits in an ISA lattice rooted at the builtin node
//! type `T` or relation type `REL`, inherits attribute values along it, and
//! relation types may carry reflexive/symmetric/transitive semantics that
//! project implied edges without materializing them.
//!
//! The engine is synchronous and single-threaded. A shared [`Registry`]
//! issues never-reused ids and carries weak observer lists, so display
//! layers can track objects by id and degrade gracefully when the model or
//! any object goes away.

pub mod attributes;
pub mod error;
pub mod lattice;
pub mod model;
pub mod node;
pub mod registry;
pub mod relation;
pub mod semantics;
pub mod snapshot;

pub use attributes::{AttrMap, AttrSource, AttrValue};
pub use error::{Error, Result};
pub use lattice::{EndpointClass, Membership, TypeLattice};
pub use model::{Model, TOP_NODE_NAME, TOP_RELATION_NAME};
pub use node::Node;
pub use registry::{ChangeEvent, ModelObserver, ObjectId, ObjectKind, Registry};
pub use relation::{Relation, RelationProperty, RELATION_PROPERTIES_ATTR};
pub use semantics::SemanticsEngine;
pub use snapshot::{BuiltinRef, ModelSnapshot, NodeSnapshot, RelationSnapshot, SnapshotRef};
