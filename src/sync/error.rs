//! Reconciler error definitions.

use thiserror::Error;

use crate::store::StoreError;
use crate::sync::apply::ApplyError;

/// Errors that stop the reconciler.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Subscribing or taking the snapshot failed; the table state is unknown.
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[source] StoreError),

    /// A snapshot row does not decode.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(#[source] ApplyError),

    /// A live or replayed record does not decode under the strict policy.
    #[error("undecodable record: {0}")]
    Decode(#[source] ApplyError),

    /// A notification does not parse under the strict policy.
    #[error("malformed notification: {0}")]
    Malformed(String),

    /// The reconciler task panicked or was aborted.
    #[error("reconciler task failed: {0}")]
    Task(String),
}

/// Result type for reconciler operations.
pub type SyncResult<T> = Result<T, SyncError>;
