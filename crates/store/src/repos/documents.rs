//! Document repository trait and its request/response types.

use crate::error::StoreResult;
use async_trait::async_trait;
use cofre_core::{
    CounterpartySummary, DocumentKind, DocumentRecord, FiscalUuid, PeriodStats, Rfc, StatusCheck,
    TaxpayerLedger, VerificationState,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Filters for document queries. All fields are conjunctive.
#[derive(Clone, Debug, Default)]
pub struct DocumentFilter {
    pub kind: Option<DocumentKind>,
    pub is_payroll: Option<bool>,
    pub status: Option<VerificationState>,
    pub date_from: Option<OffsetDateTime>,
    pub date_to: Option<OffsetDateTime>,
    /// Matches either the issuer or the receiver RFC.
    pub counterparty: Option<Rfc>,
}

/// One page of query results, sorted by issue date descending.
#[derive(Clone, Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
}

/// Outcome of a single upsert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub is_new: bool,
}

/// Outcome of a bulk upsert. Individual failures never abort the batch.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub created: u64,
    pub updated: u64,
    pub failed: u64,
    /// Failure reasons keyed by document uuid.
    pub failures: Vec<(String, String)>,
}

/// Repository for one taxpayer's document records and ledger.
#[async_trait]
pub trait DocumentRepo: Send + Sync {
    /// Idempotent insert-or-overwrite by (owner, uuid); recomputes the
    /// ledger synchronously after the write.
    async fn upsert(&self, record: &DocumentRecord) -> StoreResult<UpsertOutcome>;

    /// Apply `upsert` to each record, tolerating individual failures, with a
    /// single ledger recompute at the end.
    async fn upsert_batch(&self, records: &[DocumentRecord]) -> StoreResult<BatchReport>;

    /// Filtered, paginated query sorted by issue date descending.
    async fn query(
        &self,
        filter: &DocumentFilter,
        page: u32,
        page_size: u32,
    ) -> StoreResult<Page<DocumentRecord>>;

    /// Look up one record by fiscal uuid.
    async fn find_by_uuid(&self, uuid: &FiscalUuid) -> StoreResult<Option<DocumentRecord>>;

    /// Persist a re-verification outcome. Classification fields are
    /// untouched; recomputes the ledger.
    async fn update_status(&self, uuid: &FiscalUuid, check: &StatusCheck) -> StoreResult<()>;

    /// Remove a record. Returns false if absent. Recomputes the ledger.
    /// Callers also delete the vault payload.
    async fn delete(&self, uuid: &FiscalUuid) -> StoreResult<bool>;

    /// The stored aggregate ledger.
    async fn ledger(&self) -> StoreResult<TaxpayerLedger>;

    /// On-demand statistics for one calendar year or month.
    async fn period_statistics(&self, year: i32, month: Option<u8>) -> StoreResult<PeriodStats>;

    /// Clients and suppliers with running totals and percentage shares.
    async fn counterparty_summary(
        &self,
        year: Option<i32>,
        month: Option<u8>,
    ) -> StoreResult<CounterpartySummary>;
}
