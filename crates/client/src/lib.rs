//! Protocol engine for bulk CFDI retrieval.
//!
//! This crate implements the remote side of the pipeline:
//! - Signed request envelopes for the download web service
//! - `ProtocolClient`: submit / poll / fetch and the `run_full` state
//!   machine with cache reuse, backoff, and the zero-result short-circuit
//! - `PackageUnpacker`: delivered archives into individual XML files
//! - `DocumentAnalyzer`: CFDI XML into classified records
//! - `StatusVerifier`: concurrent, rate-limited cancellation-status checks
//! - `BatchOrchestrator`: the same pipeline across several taxpayers

pub mod analyzer;
pub mod envelope;
pub mod error;
pub mod orchestrator;
pub mod package;
pub mod protocol;
pub mod verify;

pub use analyzer::{DocumentAnalyzer, ParsedDocument};
pub use error::{ClientError, ClientResult};
pub use orchestrator::{BatchOrchestrator, TaxpayerRun};
pub use package::PackageUnpacker;
pub use protocol::{PollResult, ProtocolClient, RetrievalOutcome};
pub use verify::{StatusVerifier, VerifiedDocument, VerifyReport};
