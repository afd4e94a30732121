//! Per-taxpayer SQLite document store.

use crate::error::{StoreError, StoreResult};
use crate::models::{DocumentRow, encode_ts};
use crate::repos::{BatchReport, DocumentFilter, DocumentRepo, Page, UpsertOutcome};
use async_trait::async_trait;
use cofre_core::{
    CounterpartyEntry, CounterpartySummary, DocumentKind, DocumentRecord, FiscalUuid, PeriodStats,
    Rfc, StatusCheck, TaxpayerLedger, VerificationState,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, QueryBuilder, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::{Date, Month, OffsetDateTime, Time};

/// One taxpayer's document store: records plus the derived ledger.
///
/// Backed by a single SQLite file per identity. The pool is capped at one
/// connection, which serializes all writes to this identity's store while
/// still allowing concurrent readers through WAL snapshots from other
/// handles.
pub struct LedgerStore {
    owner: Rfc,
    pool: Pool<Sqlite>,
}

impl LedgerStore {
    /// Open (creating if missing) the store for one identity.
    pub async fn open(data_dir: impl AsRef<Path>, owner: Rfc) -> StoreResult<Self> {
        let dir = data_dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{owner}.db"));

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { owner, pool };
        store.migrate().await?;
        Ok(store)
    }

    /// The identity this store belongs to.
    pub fn owner(&self) -> &Rfc {
        &self.owner
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch_all_records(&self) -> StoreResult<Vec<DocumentRecord>> {
        let rows = sqlx::query_as::<_, DocumentRow>("SELECT * FROM documents")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(DocumentRow::into_record).collect()
    }

    /// Recompute the ledger from the full record set and persist it.
    ///
    /// Deliberately not incremental: recomputation after every bulk write is
    /// cheap at this scale and cannot drift from the rows.
    async fn recompute_ledger(&self) -> StoreResult<TaxpayerLedger> {
        let records = self.fetch_all_records().await?;
        let ledger = TaxpayerLedger::compute(&records);
        let payload = serde_json::to_string(&ledger)
            .map_err(|e| StoreError::CorruptRow(format!("ledger encode: {e}")))?;
        sqlx::query(
            "INSERT INTO ledger (id, payload, updated_at) VALUES (1, $1, $2)
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
        )
        .bind(&payload)
        .bind(encode_ts(OffsetDateTime::now_utc()))
        .execute(&self.pool)
        .await?;
        Ok(ledger)
    }

    async fn upsert_row(&self, record: &DocumentRecord) -> StoreResult<UpsertOutcome> {
        let row = DocumentRow::from_record(&self.owner, record)?;
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT record_id FROM documents WHERE record_id = $1")
                .bind(&row.record_id)
                .fetch_optional(&self.pool)
                .await?;

        sqlx::query(
            "INSERT INTO documents (
                record_id, owner_rfc, uuid, kind, is_payroll, issue_date,
                total, subtotal, currency, payment_method,
                issuer_rfc, issuer_name, receiver_rfc, receiver_name,
                line_items, status, status_raw, cancellation_status, checked_at,
                storage_path, stored_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
            ON CONFLICT(record_id) DO UPDATE SET
                kind = excluded.kind,
                is_payroll = excluded.is_payroll,
                issue_date = excluded.issue_date,
                total = excluded.total,
                subtotal = excluded.subtotal,
                currency = excluded.currency,
                payment_method = excluded.payment_method,
                issuer_rfc = excluded.issuer_rfc,
                issuer_name = excluded.issuer_name,
                receiver_rfc = excluded.receiver_rfc,
                receiver_name = excluded.receiver_name,
                line_items = excluded.line_items,
                status = excluded.status,
                status_raw = excluded.status_raw,
                cancellation_status = excluded.cancellation_status,
                checked_at = excluded.checked_at,
                storage_path = excluded.storage_path,
                updated_at = excluded.updated_at",
        )
        .bind(&row.record_id)
        .bind(&row.owner_rfc)
        .bind(&row.uuid)
        .bind(&row.kind)
        .bind(row.is_payroll)
        .bind(&row.issue_date)
        .bind(&row.total)
        .bind(&row.subtotal)
        .bind(&row.currency)
        .bind(&row.payment_method)
        .bind(&row.issuer_rfc)
        .bind(&row.issuer_name)
        .bind(&row.receiver_rfc)
        .bind(&row.receiver_name)
        .bind(&row.line_items)
        .bind(&row.status)
        .bind(&row.status_raw)
        .bind(&row.cancellation_status)
        .bind(&row.checked_at)
        .bind(&row.storage_path)
        .bind(&row.stored_at)
        .bind(&row.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(UpsertOutcome {
            is_new: existing.is_none(),
        })
    }

    fn apply_filter<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filter: &'a DocumentFilter) {
        if let Some(kind) = filter.kind {
            builder.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(is_payroll) = filter.is_payroll {
            builder.push(" AND is_payroll = ").push_bind(is_payroll);
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(from) = filter.date_from {
            builder.push(" AND issue_date >= ").push_bind(encode_ts(from));
        }
        if let Some(to) = filter.date_to {
            builder.push(" AND issue_date <= ").push_bind(encode_ts(to));
        }
        if let Some(counterparty) = &filter.counterparty {
            builder
                .push(" AND (issuer_rfc = ")
                .push_bind(counterparty.as_str())
                .push(" OR receiver_rfc = ")
                .push_bind(counterparty.as_str())
                .push(")");
        }
    }

    async fn fetch_period(&self, year: i32, month: Option<u8>) -> StoreResult<Vec<DocumentRecord>> {
        let (start, end) = period_bounds(year, month)?;
        let rows = sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE issue_date >= $1 AND issue_date < $2",
        )
        .bind(encode_ts(start))
        .bind(encode_ts(end))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DocumentRow::into_record).collect()
    }
}

/// UTC bounds [start, end) of a calendar year or month.
fn period_bounds(year: i32, month: Option<u8>) -> StoreResult<(OffsetDateTime, OffsetDateTime)> {
    let to_dt = |date: Date| OffsetDateTime::new_utc(date, Time::MIDNIGHT);
    let start_month = month.unwrap_or(1);
    let month_enum = Month::try_from(start_month)
        .map_err(|e| StoreError::CorruptRow(format!("bad month {start_month}: {e}")))?;
    let start = Date::from_calendar_date(year, month_enum, 1)
        .map_err(|e| StoreError::CorruptRow(format!("bad period: {e}")))?;
    let end = match month {
        Some(m) if m < 12 => Date::from_calendar_date(year, Month::try_from(m + 1).unwrap(), 1),
        Some(_) => Date::from_calendar_date(year + 1, Month::January, 1),
        None => Date::from_calendar_date(year + 1, Month::January, 1),
    }
    .map_err(|e| StoreError::CorruptRow(format!("bad period: {e}")))?;
    Ok((to_dt(start), to_dt(end)))
}

fn summarize(
    records: impl IntoIterator<Item = (String, String, Decimal)>,
) -> Vec<CounterpartyEntry> {
    let mut grouped: HashMap<String, (String, Decimal)> = HashMap::new();
    for (rfc, name, amount) in records {
        let entry = grouped.entry(rfc).or_insert_with(|| (name, Decimal::ZERO));
        entry.1 += amount;
    }
    let grand_total: Decimal = grouped.values().map(|(_, t)| *t).sum();
    let mut entries: Vec<CounterpartyEntry> = grouped
        .into_iter()
        .map(|(rfc, (name, total))| {
            let share_pct = if grand_total.is_zero() {
                0.0
            } else {
                let ratio = (total / grand_total).to_f64().unwrap_or(0.0);
                (ratio * 10_000.0).round() / 100.0
            };
            CounterpartyEntry {
                rfc,
                name,
                total,
                share_pct,
            }
        })
        .collect();
    entries.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.rfc.cmp(&b.rfc)));
    entries
}

#[async_trait]
impl DocumentRepo for LedgerStore {
    async fn upsert(&self, record: &DocumentRecord) -> StoreResult<UpsertOutcome> {
        let outcome = self.upsert_row(record).await?;
        self.recompute_ledger().await?;
        Ok(outcome)
    }

    async fn upsert_batch(&self, records: &[DocumentRecord]) -> StoreResult<BatchReport> {
        let mut report = BatchReport::default();
        for record in records {
            match self.upsert_row(record).await {
                Ok(UpsertOutcome { is_new: true }) => report.created += 1,
                Ok(UpsertOutcome { is_new: false }) => report.updated += 1,
                Err(e) => {
                    tracing::warn!(uuid = %record.uuid, error = %e, "record upsert failed");
                    report.failed += 1;
                    report.failures.push((record.uuid.to_string(), e.to_string()));
                }
            }
        }
        self.recompute_ledger().await?;
        Ok(report)
    }

    async fn query(
        &self,
        filter: &DocumentFilter,
        page: u32,
        page_size: u32,
    ) -> StoreResult<Page<DocumentRecord>> {
        let page_size = page_size.clamp(1, 500);

        let mut count_builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM documents WHERE 1=1");
        Self::apply_filter(&mut count_builder, filter);
        let total_count: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM documents WHERE 1=1");
        Self::apply_filter(&mut builder, filter);
        builder
            .push(" ORDER BY issue_date DESC, uuid ASC LIMIT ")
            .push_bind(i64::from(page_size))
            .push(" OFFSET ")
            .push_bind(i64::from(page) * i64::from(page_size));

        let rows: Vec<DocumentRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        let items = rows
            .into_iter()
            .map(DocumentRow::into_record)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Page {
            items,
            page,
            page_size,
            total_count: total_count as u64,
        })
    }

    async fn find_by_uuid(&self, uuid: &FiscalUuid) -> StoreResult<Option<DocumentRecord>> {
        let row = sqlx::query_as::<_, DocumentRow>("SELECT * FROM documents WHERE uuid = $1")
            .bind(uuid.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(DocumentRow::into_record).transpose()
    }

    async fn update_status(&self, uuid: &FiscalUuid, check: &StatusCheck) -> StoreResult<()> {
        let now = encode_ts(OffsetDateTime::now_utc());
        let result = sqlx::query(
            "UPDATE documents SET status = $1, status_raw = $2, cancellation_status = $3,
             checked_at = $4, updated_at = $5 WHERE uuid = $6",
        )
        .bind(check.state.as_str())
        .bind(&check.raw_state)
        .bind(&check.cancellation_status)
        .bind(encode_ts(check.checked_at))
        .bind(&now)
        .bind(uuid.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(uuid.to_string()));
        }
        self.recompute_ledger().await?;
        Ok(())
    }

    async fn delete(&self, uuid: &FiscalUuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE uuid = $1")
            .bind(uuid.as_str())
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            self.recompute_ledger().await?;
        }
        Ok(deleted)
    }

    async fn ledger(&self) -> StoreResult<TaxpayerLedger> {
        let row: Option<(String,)> = sqlx::query_as("SELECT payload FROM ledger WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some((payload,)) => serde_json::from_str(&payload)
                .map_err(|e| StoreError::CorruptRow(format!("ledger decode: {e}"))),
            None => self.recompute_ledger().await,
        }
    }

    async fn period_statistics(&self, year: i32, month: Option<u8>) -> StoreResult<PeriodStats> {
        let records = self.fetch_period(year, month).await?;
        let mut stats = PeriodStats {
            count: records.len() as u64,
            ..PeriodStats::default()
        };
        for record in &records {
            match record.status.state {
                VerificationState::Active => stats.active += 1,
                VerificationState::Cancelled => stats.cancelled += 1,
                _ => {}
            }
            if record.status.state == VerificationState::Active
                && !record.kind.excluded_from_totals()
            {
                match record.kind {
                    DocumentKind::Income => stats.income_total += record.taxable_amount(),
                    DocumentKind::Expense => stats.expense_total += record.taxable_amount(),
                    _ => {}
                }
            }
        }
        Ok(stats)
    }

    async fn counterparty_summary(
        &self,
        year: Option<i32>,
        month: Option<u8>,
    ) -> StoreResult<CounterpartySummary> {
        let records = match year {
            Some(y) => self.fetch_period(y, month).await?,
            None => self.fetch_all_records().await?,
        };

        let active = |r: &&DocumentRecord| r.status.state == VerificationState::Active;
        let clients = summarize(
            records
                .iter()
                .filter(active)
                .filter(|r| r.kind == DocumentKind::Income && !r.is_payroll_complement)
                .map(|r| (r.receiver.rfc.to_string(), r.receiver.name.clone(), r.total)),
        );
        let suppliers = summarize(
            records
                .iter()
                .filter(active)
                .filter(|r| r.kind == DocumentKind::Expense)
                .map(|r| (r.issuer.rfc.to_string(), r.issuer.name.clone(), r.total)),
        );

        Ok(CounterpartySummary { clients, suppliers })
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    record_id TEXT PRIMARY KEY,
    owner_rfc TEXT NOT NULL,
    uuid TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    is_payroll INTEGER NOT NULL DEFAULT 0,
    issue_date TEXT NOT NULL,
    total TEXT NOT NULL,
    subtotal TEXT,
    currency TEXT NOT NULL,
    payment_method TEXT,
    issuer_rfc TEXT NOT NULL,
    issuer_name TEXT NOT NULL,
    receiver_rfc TEXT NOT NULL,
    receiver_name TEXT NOT NULL,
    line_items TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'unverified',
    status_raw TEXT NOT NULL DEFAULT '',
    cancellation_status TEXT,
    checked_at TEXT NOT NULL,
    storage_path TEXT NOT NULL,
    stored_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_issue_date ON documents(issue_date DESC);
CREATE INDEX IF NOT EXISTS idx_documents_kind ON documents(kind);
CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
CREATE INDEX IF NOT EXISTS idx_documents_issuer ON documents(issuer_rfc);
CREATE INDEX IF NOT EXISTS idx_documents_receiver ON documents(receiver_rfc);

CREATE TABLE IF NOT EXISTS ledger (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    payload TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;
