//! Core domain types and shared logic for the Cofre CFDI engine.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Taxpayer identity (RFC) and fiscal UUID newtypes
//! - Document records, kinds, and verification states
//! - Retrieval jobs, cache keys, and the remote job lifecycle
//! - Per-taxpayer ledger and statistics types
//! - Shared configuration

pub mod config;
pub mod document;
pub mod error;
pub mod identity;
pub mod job;
pub mod ledger;

pub use config::{CofreConfig, OrchestratorConfig, PollConfig, VerifyConfig};
pub use document::{
    DocumentKind, DocumentRecord, LineItem, Party, StatusCheck, VerificationState, record_id,
};
pub use error::{Error, Result};
pub use identity::{FiscalUuid, Rfc};
pub use job::{CacheKey, FlowDirection, JOB_TTL, RemoteJobState, RetrievalJob};
pub use ledger::{
    CachedJobInfo, CounterpartyEntry, CounterpartySummary, PeriodStats, TaxpayerLedger,
};
