use crate::ecs::{Entity, EntityId, Pid};
use thiserror::Error;

pub type EcsResult<T> = Result<T, EcsError>;

/// Errors returned by entity store operations.
///
/// Every variant carries enough context to render a precise diagnostic.
/// Operations fail fast and leave the store unchanged when they return one
/// of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcsError {
    #[error("{entity} is not alive")]
    UnknownEntity { entity: Entity },

    #[error("pid {pid} is already bound to entity id {holder}")]
    DuplicatePid { pid: Pid, holder: EntityId },

    #[error("pid {pid} is invalid: {reason}")]
    InvalidPid { pid: Pid, reason: &'static str },

    #[error("{entity} has no component '{component}'")]
    ComponentNotFound {
        entity: Entity,
        component: &'static str,
    },

    #[error("adding entity id {child} as child of entity id {parent} would create a cycle")]
    CycleDetected { parent: EntityId, child: EntityId },

    #[error("invalid record for {entity}: {reason} (path: '{path}', line {line}, column {column})")]
    InvalidRecord {
        entity: Entity,
        path: String,
        line: usize,
        column: usize,
        reason: String,
    },

    #[error("unique key '{key}' is already held by entity id {holder}")]
    DuplicateUniqueKey { key: String, holder: EntityId },

    #[error("value does not match the registered type of component '{component}'")]
    TypeMismatch { component: &'static str },

    #[error("component '{component}' is maintained by the store and cannot be changed directly")]
    ManagedComponent { component: &'static str },
}

impl EcsError {
    /// Build an `InvalidRecord` error that is not tied to a text position.
    pub(crate) fn record(entity: Entity, path: impl Into<String>, reason: impl Into<String>) -> Self {
        EcsError::InvalidRecord {
            entity,
            path: path.into(),
            line: 0,
            column: 0,
            reason: reason.into(),
        }
    }
}
