//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid RFC: {0}")]
    InvalidRfc(String),

    #[error("invalid fiscal UUID: {0}")]
    InvalidFiscalUuid(String),

    #[error("invalid document kind code: {0}")]
    InvalidKindCode(String),

    #[error("invalid flow direction: {0}")]
    InvalidFlowDirection(String),

    #[error("invalid verification state: {0}")]
    InvalidVerificationState(String),

    #[error("invalid period: start {start} is after end {end}")]
    InvalidPeriod { start: String, end: String },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
