//! Vault trait definitions.

use crate::error::VaultResult;
use async_trait::async_trait;
use bytes::Bytes;
use cofre_core::{FiscalUuid, Rfc};

/// Storage for raw CFDI payloads, addressed by (identity, uuid).
///
/// One payload per document; writes are atomic per payload.
#[async_trait]
pub trait DocumentVault: Send + Sync {
    /// Store a payload, overwriting any previous content under the same key.
    /// Returns the backend key the payload is reachable under.
    async fn put(&self, owner: &Rfc, uuid: &FiscalUuid, data: Bytes) -> VaultResult<String>;

    /// Fetch a payload.
    async fn get(&self, owner: &Rfc, uuid: &FiscalUuid) -> VaultResult<Bytes>;

    /// Check existence without reading.
    async fn exists(&self, owner: &Rfc, uuid: &FiscalUuid) -> VaultResult<bool>;

    /// Remove a payload. Errors with `NotFound` if absent.
    async fn delete(&self, owner: &Rfc, uuid: &FiscalUuid) -> VaultResult<()>;

    /// List the uuids stored for one identity.
    async fn list(&self, owner: &Rfc) -> VaultResult<Vec<FiscalUuid>>;
}
