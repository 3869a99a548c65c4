use thiserror::Error;

use parley_db::StoreError;

/// Failure taxonomy for the synchronization service. Delivery failures are
/// deliberately absent: a broker publish that fails after a committed write
/// is logged per-topic and never fails the operation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed or incomplete request; rejected before any write.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The acting user is not a participant of the target conversation.
    #[error("not a participant of this conversation")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Durable-store failure; fatal to the triggering operation.
    #[error("repository error: {0}")]
    Repository(#[from] StoreError),
}
