//! Shared retrieval-job cache.

use crate::error::StoreResult;
use crate::models::{JobRow, encode_ts};
use crate::repos::JobCacheRepo;
use async_trait::async_trait;
use cofre_core::{CacheKey, CachedJobInfo, FlowDirection, JOB_TTL, RetrievalJob, Rfc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// SQLite-backed job cache, one database shared across all identities.
pub struct JobCache {
    pool: Pool<Sqlite>,
}

impl JobCache {
    /// Open (creating if missing) the shared cache under `data_dir`.
    pub async fn open(data_dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = data_dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join("jobs.db");

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let cache = Self { pool };
        cache.migrate().await?;
        Ok(cache)
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl JobCacheRepo for JobCache {
    async fn find(
        &self,
        rfc: &Rfc,
        flow: FlowDirection,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> StoreResult<Option<RetrievalJob>> {
        let key = CacheKey::new(rfc, flow, start, end);
        let row =
            sqlx::query_as::<_, JobRow>("SELECT * FROM retrieval_jobs WHERE cache_key = $1")
                .bind(key.as_str())
                .fetch_optional(&self.pool)
                .await?;
        let Some(row) = row else { return Ok(None) };
        let job = row.into_job()?;
        if job.is_expired(OffsetDateTime::now_utc()) {
            return Ok(None);
        }
        Ok(Some(job))
    }

    async fn store(&self, job: &RetrievalJob) -> StoreResult<()> {
        let row = JobRow::from_job(job);
        sqlx::query(
            "INSERT OR REPLACE INTO retrieval_jobs
             (cache_key, rfc, flow, period_start, period_end, remote_job_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&row.cache_key)
        .bind(&row.rfc)
        .bind(&row.flow)
        .bind(&row.period_start)
        .bind(&row.period_end)
        .bind(&row.remote_job_id)
        .bind(&row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_covering(
        &self,
        rfc: &Rfc,
        flow: FlowDirection,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> StoreResult<Option<RetrievalJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM retrieval_jobs WHERE rfc = $1 AND flow = $2
             ORDER BY created_at DESC",
        )
        .bind(rfc.as_str())
        .bind(flow.as_str())
        .fetch_all(&self.pool)
        .await?;

        let now = OffsetDateTime::now_utc();
        for row in rows {
            let job = row.into_job()?;
            if !job.is_expired(now) && job.covers(start, end) {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    async fn purge_expired(&self) -> StoreResult<usize> {
        let cutoff = encode_ts(OffsetDateTime::now_utc() - JOB_TTL);
        let result = sqlx::query("DELETE FROM retrieval_jobs WHERE created_at <= $1")
            .bind(&cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn list_all(&self) -> StoreResult<Vec<CachedJobInfo>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM retrieval_jobs ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        let now = OffsetDateTime::now_utc();
        rows.into_iter()
            .map(|row| Ok(CachedJobInfo::annotate(row.into_job()?, now)))
            .collect()
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS retrieval_jobs (
    cache_key TEXT PRIMARY KEY,
    rfc TEXT NOT NULL,
    flow TEXT NOT NULL,
    period_start TEXT NOT NULL,
    period_end TEXT NOT NULL,
    remote_job_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_retrieval_jobs_identity ON retrieval_jobs(rfc, flow);
"#;
