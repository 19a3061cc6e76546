use std::time::Duration;

use thiserror::Error;

use crate::ids::RelationId;

/// Failure reported by a storage or index backend.
///
/// Every collaborator trait in [`crate::storage`] returns this type. The
/// transaction wraps it into a [`SeshatError`] before it reaches the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The operation may succeed if retried.
    #[error("Temporary backend failure: {0}")]
    Temporary(String),

    /// The operation will not succeed on retry.
    #[error("Permanent backend failure: {0}")]
    Permanent(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[derive(Error, Debug)]
pub enum SeshatError {
    #[error("Cannot create new entities in read-only transaction")]
    ReadOnlyTransaction,

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation cannot be executed because the enclosing transaction is closed")]
    TransactionClosed,

    #[error("Could not acquire lock on {tuple} within {timeout:?}")]
    LockTimeout { tuple: String, timeout: Duration },

    /// Linking a relation into one of its vertices failed. Not retryable.
    #[error("Could not connect relation {0}")]
    ConnectRelation(RelationId),

    #[error("Could not commit transaction due to exception during persistence")]
    CommitFailed(#[source] Box<SeshatError>),

    #[error("Could not rollback after a failed commit ({commit})")]
    RollbackAfterFailedCommit {
        commit: Box<SeshatError>,
        #[source]
        rollback: BackendError,
    },

    #[error("Could not rollback transaction due to exception")]
    RollbackFailed(#[source] BackendError),

    #[error("Could not call index {index}")]
    IndexQuery {
        index: String,
        #[source]
        source: BackendError,
    },

    #[error("Could not find a suitable index to answer graph query and graph scans are disabled: {0}")]
    FullScanDisabled(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, SeshatError>;
