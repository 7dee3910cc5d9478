use thiserror::Error;

use crate::core::task::TaskStatus;

/// Failures of the on-device task store. Always fatal to the triggering
/// operation and handed back to the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("task store data is malformed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("task {0} not found")]
    NotFound(String),
    #[error("task store lock poisoned")]
    Poisoned,
}

/// Failures talking to the remote ledger. Never surfaced to command callers;
/// the engine logs them and carries on with local state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote ledger unreachable: {0}")]
    Unreachable(String),
    #[error("task {0} has no owner and cannot be stored remotely")]
    MissingOwner(String),
    #[error("remote ledger rejected the request: {0}")]
    Rejected(String),
}

/// Input rejected before it reaches the store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("task name must not be empty")]
    EmptyName,
    #[error("recurrence ends before the task's anchor date")]
    ValidUntilBeforeAnchor,
}

/// Error returned by task commands (add, delete, status changes).
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("task {0} not found")]
    NotFound(String),
    #[error("task {id} is {from:?} and cannot become {to:?}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}

impl TaskError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
