//! Client error taxonomy.
//!
//! Per-document and per-package failures are aggregated into batch reports
//! by the callers; only identity- or protocol-level failures abort a full
//! retrieval run.

use thiserror::Error;

/// Protocol engine errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Explicit non-success status from submit or poll. Not retried.
    #[error("remote rejected request: {code} {message}")]
    RemoteRejected { code: String, message: String },

    /// The submission quota for this identity is exhausted. Triggers the
    /// cache-reuse fallback before surfacing.
    #[error("submission quota exhausted")]
    QuotaExceeded,

    /// Polling exceeded the attempt budget. Retryable by the caller.
    #[error("polling timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    /// Unparsable CFDI payload. Skipped and counted, never aborts a batch.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// Network or parse failure during a status check. The record stays
    /// unverified.
    #[error("status verification failed: {0}")]
    VerificationError(String),

    #[error("envelope error: {0}")]
    Envelope(String),

    #[error("package error: {0}")]
    Package(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] cofre_store::StoreError),

    #[error(transparent)]
    Vault(#[from] cofre_storage::VaultError),

    #[error(transparent)]
    Signer(#[from] cofre_signer::SignerError),

    #[error(transparent)]
    Domain(#[from] cofre_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for protocol operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;
