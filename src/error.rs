//! Error types for the rotation engine.

use thiserror::Error;

use crate::model::{SolicitorId, Status, WorkItemId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("solicitor {solicitor} is not the current assignee of work item {work_item}")]
    NotCurrentAssignee {
        work_item: WorkItemId,
        solicitor: SolicitorId,
    },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: Status, to: Status },

    #[error("concurrency conflict on {entity} after {attempts} attempts")]
    ConcurrencyConflict { entity: String, attempts: u32 },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("notification error: {0}")]
    Notification(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether an external job runner should retry the operation that
    /// produced this error. Input and invariant errors never are.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Storage(_) | Error::Io(_) | Error::ConcurrencyConflict { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
