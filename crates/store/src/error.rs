//! Store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("domain error: {0}")]
    Domain(#[from] cofre_core::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
