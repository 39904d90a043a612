//! Error types for the typegraph engine.

use thiserror::Error;

use crate::lattice::EndpointClass;
use crate::registry::ObjectId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("isa edge {sub} -> {sup} would close a cycle")]
    Cycle { sub: ObjectId, sup: ObjectId },

    #[error("{id} is in the {found} class where {expected} was required")]
    ClassMismatch {
        id: ObjectId,
        expected: EndpointClass,
        found: EndpointClass,
    },

    #[error("isa target {0} is an individual; only types may have subtypes")]
    IndividualTarget(ObjectId),

    #[error("{0} has subtypes and cannot become an individual")]
    TypeDowngrade(ObjectId),

    #[error("attribute \"{name}\" is not defined for {id}")]
    UndefinedAttribute { id: ObjectId, name: String },

    #[error("object not found: {0}")]
    NotFound(ObjectId),

    #[error("validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
