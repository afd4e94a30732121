//! Vault error types.

use thiserror::Error;

/// Payload vault operation errors.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("payload not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// Result type for vault operations.
pub type VaultResult<T> = std::result::Result<T, VaultError>;
