use thiserror::Error;

/// Failures surfaced by the durable store. Every repository operation the
/// core invokes reports through this type; callers treat any variant other
/// than `Conflict` as fatal to the triggering request.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("uniqueness conflict: {0}")]
    Conflict(String),

    #[error("connection lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// True when the underlying failure is a SQLite constraint violation
    /// (e.g. the normalized participant-pair uniqueness on conversations).
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::ConstraintViolation
            }
            StoreError::Conflict(_) => true,
            _ => false,
        }
    }
}
