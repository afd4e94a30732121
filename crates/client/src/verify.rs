//! Concurrent, rate-limited cancellation-status verification.

use crate::envelope;
use crate::error::{ClientError, ClientResult};
use cofre_core::{DocumentRecord, FiscalUuid, Rfc, StatusCheck, VerificationState, VerifyConfig};
use reqwest::Url;
use rust_decimal::Decimal;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, warn};

/// One verified document with its outcome.
#[derive(Clone, Debug)]
pub struct VerifiedDocument {
    pub uuid: FiscalUuid,
    pub check: StatusCheck,
}

/// Partitioned outcome of a verification batch. Errored verifications land
/// in `unverified`, never dropped.
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub active: Vec<VerifiedDocument>,
    pub cancelled: Vec<VerifiedDocument>,
    pub unverified: Vec<VerifiedDocument>,
}

impl VerifyReport {
    pub fn total(&self) -> usize {
        self.active.len() + self.cancelled.len() + self.unverified.len()
    }

    /// Every outcome in one stream, for bulk status persistence.
    pub fn all(&self) -> impl Iterator<Item = &VerifiedDocument> {
        self.active
            .iter()
            .chain(self.cancelled.iter())
            .chain(self.unverified.iter())
    }
}

/// Client for the document-status query service.
///
/// Batch verification runs chunks of `concurrency` requests fully in
/// parallel, waits out each whole chunk, then pauses before the next. The
/// ceiling is a throttle the remote expects, not an optimization knob.
pub struct StatusVerifier {
    http: reqwest::Client,
    base_url: Url,
    cfg: VerifyConfig,
}

impl StatusVerifier {
    pub fn new(base_url: &str, timeout: Duration, cfg: VerifyConfig) -> ClientResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Envelope(format!("invalid service URL: {e}")))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            cfg,
        })
    }

    /// The printed-expression key the service looks a document up by.
    /// The total is fixed at six decimal places.
    pub fn expression(uuid: &FiscalUuid, issuer: &Rfc, receiver: &Rfc, total: Decimal) -> String {
        format!("?re={issuer}&rr={receiver}&tt={total:.6}&id={uuid}")
    }

    /// Query one document's status.
    ///
    /// Network and envelope failures surface as `VerificationError`; the
    /// caller keeps the record unverified rather than failing the batch.
    pub async fn verify_status(
        &self,
        uuid: &FiscalUuid,
        issuer: &Rfc,
        receiver: &Rfc,
        total: Decimal,
    ) -> ClientResult<StatusCheck> {
        let expression = Self::expression(uuid, issuer, receiver, total);
        let body = envelope::verify_envelope(&expression);
        let url = self
            .base_url
            .join("/ConsultaCFDIService.svc")
            .map_err(|e| ClientError::Envelope(format!("invalid endpoint path: {e}")))?;

        let response = self
            .http
            .post(url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", envelope::VERIFY_ACTION)
            .body(body)
            .send()
            .await
            .map_err(|e| ClientError::VerificationError(format!("{uuid}: {e}")))?;
        if !response.status().is_success() {
            return Err(ClientError::VerificationError(format!(
                "{uuid}: HTTP {}",
                response.status()
            )));
        }
        let xml = response
            .text()
            .await
            .map_err(|e| ClientError::VerificationError(format!("{uuid}: {e}")))?;

        // The numeric CodigoEstatus only says found/not-found; the textual
        // Estado field is the authoritative state.
        let raw_state = envelope::element_text(&xml, "Estado")
            .ok_or_else(|| ClientError::VerificationError(format!("{uuid}: missing Estado")))?;
        let cancellation_status =
            envelope::element_text(&xml, "EstatusCancelacion").filter(|s| !s.trim().is_empty());

        let mut state = match raw_state.trim() {
            "Vigente" => VerificationState::Active,
            "Cancelado" => VerificationState::Cancelled,
            _ => VerificationState::Error,
        };
        if let Some(cancellation) = &cancellation_status
            && indicates_cancellation(cancellation)
        {
            state = VerificationState::Cancelled;
        }

        debug!(%uuid, ?state, raw_state, "status verified");
        Ok(StatusCheck {
            state,
            raw_state,
            cancellation_status,
            checked_at: OffsetDateTime::now_utc(),
        })
    }

    /// Verify a set of records in bounded-concurrency batches.
    pub async fn verify_batch(&self, records: &[DocumentRecord]) -> VerifyReport {
        let mut report = VerifyReport::default();
        let concurrency = self.cfg.concurrency.max(1);

        let mut first = true;
        for chunk in records.chunks(concurrency) {
            if !first {
                tokio::time::sleep(Duration::from_millis(self.cfg.inter_batch_delay_ms)).await;
            }
            first = false;

            let results = futures::future::join_all(chunk.iter().map(|record| {
                self.verify_status(
                    &record.uuid,
                    &record.issuer.rfc,
                    &record.receiver.rfc,
                    record.total,
                )
            }))
            .await;

            for (record, result) in chunk.iter().zip(results) {
                let verified = match result {
                    Ok(check) => VerifiedDocument {
                        uuid: record.uuid.clone(),
                        check,
                    },
                    Err(e) => {
                        warn!(uuid = %record.uuid, error = %e, "verification failed");
                        VerifiedDocument {
                            uuid: record.uuid.clone(),
                            check: StatusCheck::unverified(),
                        }
                    }
                };
                match verified.check.state {
                    VerificationState::Active => report.active.push(verified),
                    VerificationState::Cancelled => report.cancelled.push(verified),
                    _ => report.unverified.push(verified),
                }
            }
        }
        report
    }
}

/// Whether a secondary cancellation-status value indicates cancellation.
fn indicates_cancellation(status: &str) -> bool {
    let s = status.to_lowercase();
    s.contains("cancelad") || s.contains("plazo vencido")
}
