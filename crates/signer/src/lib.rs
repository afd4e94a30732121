//! Request-signing capability for the Cofre CFDI engine.
//!
//! This crate provides:
//! - The `Signer` trait: the injected capability that yields the caller's
//!   taxpayer identity, a certificate blob for request envelopes, and
//!   detached signatures over arbitrary byte strings
//! - An in-memory Ed25519 implementation for tests and local development
//!
//! Production deployments plug in a CSD-certificate signer from the
//! credential-management service; protocol code only ever sees the trait.

pub mod error;
pub mod key;
pub mod signer;

pub use error::{SignerError, SignerResult};
pub use key::KeyPair;
pub use signer::{MemorySigner, Signer};
