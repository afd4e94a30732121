//! Database rows mapping to the store schema.
//!
//! Timestamps are RFC-3339 TEXT normalized to UTC so lexicographic order is
//! chronological order; amounts are decimal TEXT parsed with `rust_decimal`.

use crate::error::{StoreError, StoreResult};
use cofre_core::{
    DocumentKind, DocumentRecord, FiscalUuid, FlowDirection, LineItem, Party, RetrievalJob, Rfc,
    StatusCheck, VerificationState,
};
use rust_decimal::Decimal;
use sqlx::FromRow;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Encode a timestamp as UTC RFC-3339 text.
pub fn encode_ts(ts: OffsetDateTime) -> String {
    ts.to_offset(time::UtcOffset::UTC)
        .format(&Rfc3339)
        .expect("RFC-3339 formatting of a UTC timestamp cannot fail")
}

/// Decode a stored RFC-3339 timestamp.
pub fn decode_ts(s: &str) -> StoreResult<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339)
        .map_err(|e| StoreError::CorruptRow(format!("bad timestamp {s:?}: {e}")))
}

fn decode_decimal(s: &str) -> StoreResult<Decimal> {
    s.parse()
        .map_err(|e| StoreError::CorruptRow(format!("bad amount {s:?}: {e}")))
}

/// Document record row.
#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub record_id: String,
    pub owner_rfc: String,
    pub uuid: String,
    pub kind: String,
    pub is_payroll: bool,
    pub issue_date: String,
    pub total: String,
    pub subtotal: Option<String>,
    pub currency: String,
    pub payment_method: Option<String>,
    pub issuer_rfc: String,
    pub issuer_name: String,
    pub receiver_rfc: String,
    pub receiver_name: String,
    /// JSON array of line items.
    pub line_items: String,
    pub status: String,
    pub status_raw: String,
    pub cancellation_status: Option<String>,
    pub checked_at: String,
    pub storage_path: String,
    pub stored_at: String,
    pub updated_at: String,
}

impl DocumentRow {
    pub fn from_record(owner: &Rfc, record: &DocumentRecord) -> StoreResult<Self> {
        let line_items = serde_json::to_string(&record.line_items)
            .map_err(|e| StoreError::CorruptRow(format!("line items encode: {e}")))?;
        Ok(Self {
            record_id: cofre_core::record_id(owner, &record.uuid),
            owner_rfc: owner.to_string(),
            uuid: record.uuid.to_string(),
            kind: record.kind.as_str().to_string(),
            is_payroll: record.is_payroll_complement,
            issue_date: encode_ts(record.issue_date),
            total: record.total.to_string(),
            subtotal: record.subtotal.map(|d| d.to_string()),
            currency: record.currency.clone(),
            payment_method: record.payment_method.clone(),
            issuer_rfc: record.issuer.rfc.to_string(),
            issuer_name: record.issuer.name.clone(),
            receiver_rfc: record.receiver.rfc.to_string(),
            receiver_name: record.receiver.name.clone(),
            line_items,
            status: record.status.state.as_str().to_string(),
            status_raw: record.status.raw_state.clone(),
            cancellation_status: record.status.cancellation_status.clone(),
            checked_at: encode_ts(record.status.checked_at),
            storage_path: record.storage_path.clone(),
            stored_at: encode_ts(record.stored_at),
            updated_at: encode_ts(record.updated_at),
        })
    }

    pub fn into_record(self) -> StoreResult<DocumentRecord> {
        let line_items: Vec<LineItem> = serde_json::from_str(&self.line_items)
            .map_err(|e| StoreError::CorruptRow(format!("line items decode: {e}")))?;
        Ok(DocumentRecord {
            uuid: FiscalUuid::parse(&self.uuid)?,
            kind: DocumentKind::parse(&self.kind)?,
            is_payroll_complement: self.is_payroll,
            issue_date: decode_ts(&self.issue_date)?,
            total: decode_decimal(&self.total)?,
            subtotal: self.subtotal.as_deref().map(decode_decimal).transpose()?,
            currency: self.currency,
            payment_method: self.payment_method,
            issuer: Party {
                rfc: Rfc::parse(&self.issuer_rfc)?,
                name: self.issuer_name,
            },
            receiver: Party {
                rfc: Rfc::parse(&self.receiver_rfc)?,
                name: self.receiver_name,
            },
            line_items,
            status: StatusCheck {
                state: VerificationState::parse(&self.status)?,
                raw_state: self.status_raw,
                cancellation_status: self.cancellation_status,
                checked_at: decode_ts(&self.checked_at)?,
            },
            storage_path: self.storage_path,
            stored_at: decode_ts(&self.stored_at)?,
            updated_at: decode_ts(&self.updated_at)?,
        })
    }
}

/// Cached retrieval-job row.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub cache_key: String,
    pub rfc: String,
    pub flow: String,
    pub period_start: String,
    pub period_end: String,
    pub remote_job_id: String,
    pub created_at: String,
}

impl JobRow {
    pub fn from_job(job: &RetrievalJob) -> Self {
        Self {
            cache_key: job.cache_key().to_string(),
            rfc: job.rfc.to_string(),
            flow: job.flow.as_str().to_string(),
            period_start: encode_ts(job.period_start),
            period_end: encode_ts(job.period_end),
            remote_job_id: job.remote_job_id.clone(),
            created_at: encode_ts(job.created_at),
        }
    }

    pub fn into_job(self) -> StoreResult<RetrievalJob> {
        Ok(RetrievalJob {
            rfc: Rfc::parse(&self.rfc)?,
            flow: FlowDirection::parse(&self.flow)?,
            period_start: decode_ts(&self.period_start)?,
            period_end: decode_ts(&self.period_end)?,
            remote_job_id: self.remote_job_id,
            created_at: decode_ts(&self.created_at)?,
        })
    }
}
