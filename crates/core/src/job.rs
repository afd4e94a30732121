//! Retrieval job types and the remote job lifecycle.

use crate::identity::Rfc;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::{Duration, OffsetDateTime};

/// How long the remote service keeps a submitted job reusable.
///
/// Past this window the service no longer serves the job's packages and a
/// fresh submission is required.
pub const JOB_TTL: Duration = Duration::hours(72);

/// Whether documents were issued by or received by the taxpayer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowDirection {
    Issued,
    Received,
}

impl FlowDirection {
    /// Stable lowercase form used in cache keys and database rows.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Issued => "issued",
            Self::Received => "received",
        }
    }

    /// Parse the stable form back.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "issued" => Ok(Self::Issued),
            "received" => Ok(Self::Received),
            other => Err(crate::Error::InvalidFlowDirection(other.to_string())),
        }
    }
}

impl fmt::Display for FlowDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Remote job state as reported by the poll operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteJobState {
    /// Accepted, not yet picked up by the remote worker.
    Accepted,
    /// Being processed remotely.
    InProgress,
    /// Completed; packages are available.
    Finished,
    /// The remote reported a processing error.
    Failed,
    /// Explicitly rejected.
    Rejected,
    /// The job aged out server-side before completion.
    Expired,
}

impl RemoteJobState {
    /// Map the service's numeric EstadoSolicitud code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Accepted),
            2 => Some(Self::InProgress),
            3 => Some(Self::Finished),
            4 => Some(Self::Failed),
            5 => Some(Self::Rejected),
            6 => Some(Self::Expired),
            _ => None,
        }
    }

    /// Whether polling should stop at this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Rejected | Self::Expired)
    }
}

/// A cache key identifying one (identity, flow, period) request shape.
///
/// Period bounds are truncated to dates so that identical inputs always
/// produce the identical key, enabling exact-match reuse lookups.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(rfc: &Rfc, flow: FlowDirection, start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self(format!(
            "{}:{}:{}:{}",
            rfc,
            flow.as_str(),
            start.date(),
            end.date()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One submitted bulk-retrieval request. Immutable once created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalJob {
    pub rfc: Rfc,
    pub flow: FlowDirection,
    #[serde(with = "time::serde::rfc3339")]
    pub period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub period_end: OffsetDateTime,
    /// Opaque job id assigned by the remote service.
    pub remote_job_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl RetrievalJob {
    pub fn new(
        rfc: Rfc,
        flow: FlowDirection,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
        remote_job_id: impl Into<String>,
    ) -> Self {
        Self {
            rfc,
            flow,
            period_start,
            period_end,
            remote_job_id: remote_job_id.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// The cache key this job is stored under.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.rfc, self.flow, self.period_start, self.period_end)
    }

    /// A job past the service's validity window must not be reused.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now - self.created_at >= JOB_TTL
    }

    pub fn age_hours(&self, now: OffsetDateTime) -> f64 {
        (now - self.created_at).as_seconds_f64() / 3600.0
    }

    /// Whether this job's period fully contains the given period.
    pub fn covers(&self, start: OffsetDateTime, end: OffsetDateTime) -> bool {
        self.period_start.date() <= start.date() && self.period_end.date() >= end.date()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn rfc() -> Rfc {
        Rfc::parse("XAXX010101000").unwrap()
    }

    #[test]
    fn cache_key_is_deterministic_and_date_truncated() {
        let a = CacheKey::new(
            &rfc(),
            FlowDirection::Issued,
            datetime!(2024-01-01 00:00:00 UTC),
            datetime!(2024-01-31 23:59:59 UTC),
        );
        let b = CacheKey::new(
            &rfc(),
            FlowDirection::Issued,
            datetime!(2024-01-01 08:15:00 UTC),
            datetime!(2024-01-31 00:00:00 UTC),
        );
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "XAXX010101000:issued:2024-01-01:2024-01-31");
    }

    #[test]
    fn differing_flow_or_period_changes_key() {
        let start = datetime!(2024-01-01 00:00:00 UTC);
        let end = datetime!(2024-01-31 00:00:00 UTC);
        let issued = CacheKey::new(&rfc(), FlowDirection::Issued, start, end);
        let received = CacheKey::new(&rfc(), FlowDirection::Received, start, end);
        assert_ne!(issued, received);
    }

    #[test]
    fn job_expiry_window() {
        let mut job = RetrievalJob::new(
            rfc(),
            FlowDirection::Issued,
            datetime!(2024-01-01 00:00:00 UTC),
            datetime!(2024-01-31 00:00:00 UTC),
            "job-1",
        );
        job.created_at = datetime!(2024-02-01 00:00:00 UTC);
        assert!(!job.is_expired(datetime!(2024-02-03 23:59:00 UTC)));
        assert!(job.is_expired(datetime!(2024-02-04 00:00:00 UTC)));
    }

    #[test]
    fn job_period_containment() {
        let job = RetrievalJob::new(
            rfc(),
            FlowDirection::Issued,
            datetime!(2024-01-01 00:00:00 UTC),
            datetime!(2024-03-31 00:00:00 UTC),
            "job-1",
        );
        assert!(job.covers(
            datetime!(2024-02-01 00:00:00 UTC),
            datetime!(2024-02-29 00:00:00 UTC)
        ));
        assert!(!job.covers(
            datetime!(2024-02-01 00:00:00 UTC),
            datetime!(2024-04-01 00:00:00 UTC)
        ));
    }

    #[test]
    fn remote_state_codes() {
        assert_eq!(RemoteJobState::from_code(3), Some(RemoteJobState::Finished));
        assert!(RemoteJobState::from_code(3).unwrap().is_terminal());
        assert!(!RemoteJobState::from_code(2).unwrap().is_terminal());
        assert_eq!(RemoteJobState::from_code(9), None);
    }
}
