//! Retrieval-job cache repository trait.

use crate::error::StoreResult;
use async_trait::async_trait;
use cofre_core::{CachedJobInfo, FlowDirection, RetrievalJob, Rfc};
use time::OffsetDateTime;

/// Repository for cached retrieval jobs, shared across identities.
///
/// The remote service enforces a small daily quota of new jobs per
/// taxpayer; reusing an unexpired job for an identical period avoids
/// wasting quota on retries and re-imports.
#[async_trait]
pub trait JobCacheRepo: Send + Sync {
    /// Exact-key lookup. Returns the job only if it is younger than the
    /// service's 72-hour validity window.
    async fn find(
        &self,
        rfc: &Rfc,
        flow: FlowDirection,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> StoreResult<Option<RetrievalJob>>;

    /// Store a job, overwriting any prior entry under the same key.
    async fn store(&self, job: &RetrievalJob) -> StoreResult<()>;

    /// Among unexpired jobs for (rfc, flow), the most recently created one
    /// whose period fully contains [start, end]. Used as the fallback when
    /// the submission quota is exhausted.
    async fn find_covering(
        &self,
        rfc: &Rfc,
        flow: FlowDirection,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> StoreResult<Option<RetrievalJob>>;

    /// Delete entries older than the validity window; returns the count.
    async fn purge_expired(&self) -> StoreResult<usize>;

    /// Every entry annotated with validity and age, for diagnostics.
    async fn list_all(&self) -> StoreResult<Vec<CachedJobInfo>>;
}
