//! Relation records and relation properties.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attributes::AttrMap;
use crate::registry::ObjectId;

/// Reserved attribute name holding a relation type's declared properties as
/// a `Set` value, so properties inherit (and union) through the ordinary
/// attribute machinery.
pub const RELATION_PROPERTIES_ATTR: &str = "relation_properties";

/// Semantic properties a relation type may carry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RelationProperty {
    Reflexive,
    Symmetric,
    Transitive,
}

impl RelationProperty {
    pub const ALL: [RelationProperty; 3] = [
        RelationProperty::Reflexive,
        RelationProperty::Symmetric,
        RelationProperty::Transitive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RelationProperty::Reflexive => "reflexive",
            RelationProperty::Symmetric => "symmetric",
            RelationProperty::Transitive => "transitive",
        }
    }

    /// Parse a stored property name. Unknown names yield `None` so stray
    /// set members are ignored rather than rejected.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "reflexive" => Some(RelationProperty::Reflexive),
            "symmetric" => Some(RelationProperty::Symmetric),
            "transitive" => Some(RelationProperty::Transitive),
            _ => None,
        }
    }
}

impl fmt::Display for RelationProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A directed edge between two objects of the same endpoint class. Relation
/// types double as templates: their endpoints bound the endpoints of every
/// relation typed under them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: ObjectId,
    pub name: String,
    pub source: ObjectId,
    pub target: ObjectId,
    pub attrs: AttrMap,
    pub created_at: DateTime<Utc>,
}

impl Relation {
    pub(crate) fn new(
        id: ObjectId,
        name: impl Into<String>,
        source: ObjectId,
        target: ObjectId,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            source,
            target,
            attrs: AttrMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn endpoints(&self) -> (ObjectId, ObjectId) {
        (self.source, self.target)
    }

    pub fn has_endpoint(&self, id: ObjectId) -> bool {
        self.source == id || self.target == id
    }
}
