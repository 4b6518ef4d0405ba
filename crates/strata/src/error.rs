//! Error kinds surfaced by the runtime.
//!
//! Every fallible operation reports one of these synchronously at the call
//! site. They describe programmer errors: callers that need tolerance must
//! pre-check (`is_alive`, `is_empty`, `len`, `has_none`) instead of relying on
//! a silent default.

use crate::ecs::entity::{Entity, UniqueTag};

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, EcsError>;

/// Every error kind the runtime can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcsError {
    /// A component type was used without being registered on the [`App`](crate::app::App).
    #[error("unknown component type `{0}`")]
    UnknownComponentType(&'static str),

    /// The entity handle refers to a destroyed (or recycled) entity.
    #[error("invalid entity {0:?}")]
    InvalidEntity(Entity),

    /// A global resource was accessed without being registered.
    #[error("unknown global resource `{0}`")]
    UnknownGlobalAccess(&'static str),

    /// An event channel was used without being declared.
    #[error("unknown event channel `{0}`")]
    UnknownEventChannel(&'static str),

    /// `expect_single` was called on a query with no matches.
    #[error("no results available in query")]
    NoResultsInQuery,

    /// `expect_single` was called on a query with more than one match.
    #[error("more than one result available in query ({0} matches)")]
    MultipleResultsInQuery(usize),

    /// A symbolic tag is already held by another live entity.
    #[error("unique tag {0} is already applied to {1:?}")]
    DuplicateUniqueTag(UniqueTag, Entity),

    /// The identifier space is exhausted.
    #[error("no entity ids left")]
    AllocatorExhausted,

    /// Re-parenting would make an entity its own ancestor.
    #[error("attaching {child:?} to {parent:?} would create a cycle")]
    HierarchyCycle { child: Entity, parent: Entity },

    /// A fetch tuple names the same component type twice.
    #[error("component `{0}` is accessed more than once in a single query")]
    ConflictingQueryAccess(&'static str),

    /// Runtime configuration failed validation or parsing.
    #[error("invalid runtime configuration: {0}")]
    InvalidConfig(String),

    /// The runtime has already run its shutdown phase.
    #[error("runtime has been stopped")]
    RuntimeStopped,
}

impl From<serde_json::Error> for EcsError {
    fn from(err: serde_json::Error) -> Self {
        EcsError::InvalidConfig(err.to_string())
    }
}
