//! Node records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attributes::AttrMap;
use crate::registry::ObjectId;

/// A node in the graph: a type or an individual in the node endpoint class.
/// Lattice position and membership are held by the owning model; the record
/// carries identity, display name, and local attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: ObjectId,
    pub name: String,
    pub attrs: AttrMap,
    pub created_at: DateTime<Utc>,
}

impl Node {
    pub(crate) fn new(id: ObjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            attrs: AttrMap::new(),
            created_at: Utc::now(),
        }
    }
}
