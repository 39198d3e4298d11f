//! Argument errors raised by the reconciliation engine.
//!
//! These are all raised before any database is touched. Per-item problems
//! inside a batch (an id that does not resolve) are never errors; they are
//! counted as skipped in the operation's outcome.

/// Errors for malformed caller input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("invalid import mode `{0}`: expected skip-existing, selected or all")]
    InvalidMode(String),

    #[error("invalid duplicate criteria `{0}`: expected username+url or title+username")]
    InvalidCriteria(String),

    #[error("invalid transfer action `{0}`: expected copy or overwrite")]
    InvalidAction(String),

    #[error("invalid transfer direction `{0}`: expected toA or toB")]
    InvalidDirection(String),

    #[error("invalid entry uuid `{0}`")]
    InvalidUuid(String),

    #[error("invalid field name `{0}`")]
    InvalidField(String),
}

/// Convenience alias for engine results.
pub type ReconcileResult<T> = Result<T, ReconcileError>;
