//! The three-phase retrieval protocol: submit, poll, fetch.

use crate::envelope;
use crate::error::{ClientError, ClientResult};
use crate::package::PackageUnpacker;
use cofre_core::{FlowDirection, PollConfig, RemoteJobState, RetrievalJob, Rfc};
use cofre_signer::Signer;
use cofre_store::JobCacheRepo;
use rand::Rng;
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Status code meaning the request was accepted.
const CODE_ACCEPTED: &str = "5000";
/// Status code meaning the daily submission quota is exhausted.
const CODE_QUOTA: &str = "5002";
/// Status code meaning the requested period holds no documents.
const CODE_NO_DATA: &str = "5004";

/// Result of one poll call.
#[derive(Clone, Debug)]
pub struct PollResult {
    pub state: RemoteJobState,
    pub package_ids: Vec<String>,
    pub cfdi_count: u64,
    pub status_code: String,
    pub message: String,
}

impl PollResult {
    /// The remote reports no documents for the requested period.
    pub fn is_no_data(&self) -> bool {
        self.status_code == CODE_NO_DATA
    }

    /// Whether the job should be treated as finished.
    ///
    /// The service has been observed to hand out package ids before (or
    /// without) flipping its finished flag, so the presence of packages
    /// counts as completion too.
    pub fn is_finished(&self) -> bool {
        self.state == RemoteJobState::Finished || !self.package_ids.is_empty()
    }
}

/// Outcome of a full retrieval run.
#[derive(Debug)]
pub struct RetrievalOutcome {
    pub job: RetrievalJob,
    /// Whether an already-cached job was reused instead of submitting.
    pub reused_job: bool,
    /// The period held no documents (short-circuit or explicit no-data).
    pub zero_results: bool,
    pub cfdi_count: u64,
    pub packages_total: usize,
    pub packages_fetched: usize,
    /// Per-package failure reasons; sibling fetches continue past them.
    pub package_failures: Vec<(String, String)>,
    /// Extracted XML files, in extraction order.
    pub xml_files: Vec<PathBuf>,
}

impl RetrievalOutcome {
    fn empty(job: RetrievalJob, reused_job: bool) -> Self {
        Self {
            job,
            reused_job,
            zero_results: true,
            cfdi_count: 0,
            packages_total: 0,
            packages_fetched: 0,
            package_failures: Vec::new(),
            xml_files: Vec::new(),
        }
    }
}

/// Client for the bulk download web service.
pub struct ProtocolClient {
    http: reqwest::Client,
    base_url: Url,
    poll_cfg: PollConfig,
}

impl ProtocolClient {
    pub fn new(base_url: &str, timeout: Duration, poll_cfg: PollConfig) -> ClientResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Envelope(format!("invalid service URL: {e}")))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            poll_cfg,
        })
    }

    fn endpoint(&self, path: &str) -> ClientResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::Envelope(format!("invalid endpoint path: {e}")))
    }

    async fn send_soap(&self, path: &str, action: &str, body: String) -> ClientResult<String> {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .post(url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", action)
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::RemoteRejected {
                code: status.as_str().to_string(),
                message: truncate(&text, 200),
            });
        }
        Ok(text)
    }

    /// Submit a new retrieval job. On success the caller must persist the
    /// job in the request cache.
    pub async fn submit(
        &self,
        signer: &dyn Signer,
        flow: FlowDirection,
        start: OffsetDateTime,
        end: OffsetDateTime,
        counterparty: Option<&Rfc>,
    ) -> ClientResult<RetrievalJob> {
        let body = envelope::submit_envelope(signer, flow, start, end, counterparty)?;
        let xml = self
            .send_soap("/SolicitaDescargaService.svc", envelope::SUBMIT_ACTION, body)
            .await?;

        let code = envelope::attr_value(&xml, "SolicitaDescargaResult", "CodEstatus")
            .ok_or_else(|| ClientError::Envelope("submit response missing CodEstatus".into()))?;
        let message =
            envelope::attr_value(&xml, "SolicitaDescargaResult", "Mensaje").unwrap_or_default();

        match code.as_str() {
            CODE_ACCEPTED => {
                let job_id = envelope::attr_value(&xml, "SolicitaDescargaResult", "IdSolicitud")
                    .ok_or_else(|| {
                        ClientError::Envelope("accepted submit missing IdSolicitud".into())
                    })?;
                info!(rfc = %signer.rfc(), %flow, job_id, "retrieval job accepted");
                Ok(RetrievalJob::new(
                    signer.rfc().clone(),
                    flow,
                    start,
                    end,
                    job_id,
                ))
            }
            CODE_QUOTA => Err(ClientError::QuotaExceeded),
            _ => Err(ClientError::RemoteRejected { code, message }),
        }
    }

    /// Query the status of a submitted job.
    pub async fn poll(&self, signer: &dyn Signer, job_id: &str) -> ClientResult<PollResult> {
        let body = envelope::poll_envelope(signer, job_id)?;
        let xml = self
            .send_soap(
                "/VerificaSolicitudDescargaService.svc",
                envelope::POLL_ACTION,
                body,
            )
            .await?;

        let result_el = "VerificaSolicitudDescargaResult";
        let status_code = envelope::attr_value(&xml, result_el, "CodigoEstadoSolicitud")
            .or_else(|| envelope::attr_value(&xml, result_el, "CodEstatus"))
            .unwrap_or_default();
        let message = envelope::attr_value(&xml, result_el, "Mensaje").unwrap_or_default();
        let state_code: u8 = envelope::attr_value(&xml, result_el, "EstadoSolicitud")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ClientError::Envelope("poll response missing EstadoSolicitud".into()))?;
        let state = RemoteJobState::from_code(state_code).ok_or_else(|| {
            ClientError::Envelope(format!("unknown EstadoSolicitud: {state_code}"))
        })?;
        let cfdi_count = envelope::attr_value(&xml, result_el, "NumeroCFDIs")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let package_ids = envelope::element_texts(&xml, "IdsPaquetes");

        debug!(job_id, ?state, cfdi_count, packages = package_ids.len(), "poll");
        Ok(PollResult {
            state,
            package_ids,
            cfdi_count,
            status_code,
            message,
        })
    }

    /// Download one package and return its decoded archive bytes.
    pub async fn fetch_package(
        &self,
        signer: &dyn Signer,
        package_id: &str,
    ) -> ClientResult<Vec<u8>> {
        use base64::Engine;

        let body = envelope::fetch_envelope(signer, package_id)?;
        let xml = self
            .send_soap("/DescargaMasivaService.svc", envelope::FETCH_ACTION, body)
            .await?;

        let blob = envelope::element_text(&xml, "Paquete")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ClientError::Package(format!("package {package_id} is empty")))?;
        base64::engine::general_purpose::STANDARD
            .decode(blob.trim())
            .map_err(|e| ClientError::Package(format!("package {package_id} bad base64: {e}")))
    }

    /// Full retrieval: submit-or-reuse, poll to completion, fetch and
    /// unpack every package into `dest`.
    ///
    /// Cancellation is honored between poll iterations; a package fetch
    /// already in flight runs to completion or failure.
    pub async fn run_full(
        &self,
        signer: &dyn Signer,
        cache: &dyn JobCacheRepo,
        flow: FlowDirection,
        start: OffsetDateTime,
        end: OffsetDateTime,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> ClientResult<RetrievalOutcome> {
        let rfc = signer.rfc();
        let (job, reused_job) = match cache.find(rfc, flow, start, end).await? {
            Some(job) => {
                info!(%rfc, %flow, job_id = %job.remote_job_id, "reusing cached retrieval job");
                (job, true)
            }
            None => match self.submit(signer, flow, start, end, None).await {
                Ok(job) => {
                    cache.store(&job).await?;
                    (job, false)
                }
                Err(ClientError::QuotaExceeded) => {
                    // Quota is spent; fall back to any unexpired job whose
                    // period contains the requested one.
                    match cache.find_covering(rfc, flow, start, end).await? {
                        Some(job) => {
                            warn!(%rfc, job_id = %job.remote_job_id,
                                "quota exhausted, reusing covering cached job");
                            (job, true)
                        }
                        None => return Err(ClientError::QuotaExceeded),
                    }
                }
                Err(e) => return Err(e),
            },
        };

        let poll = self.poll_until_done(signer, &job, cancel).await?;
        if poll.is_no_data() || poll.package_ids.is_empty() {
            info!(%rfc, job_id = %job.remote_job_id, "period holds no documents");
            return Ok(RetrievalOutcome::empty(job, reused_job));
        }

        let unpacker = PackageUnpacker::new();
        let mut outcome = RetrievalOutcome {
            packages_total: poll.package_ids.len(),
            cfdi_count: poll.cfdi_count,
            zero_results: false,
            packages_fetched: 0,
            package_failures: Vec::new(),
            xml_files: Vec::new(),
            reused_job,
            job,
        };

        for package_id in &poll.package_ids {
            match self.fetch_package(signer, package_id).await {
                Ok(bytes) => match unpacker.unpack(&bytes, dest).await {
                    Ok(files) => {
                        outcome.packages_fetched += 1;
                        outcome.xml_files.extend(files);
                    }
                    Err(e) => {
                        warn!(%package_id, error = %e, "package unpack failed");
                        outcome.package_failures.push((package_id.clone(), e.to_string()));
                    }
                },
                Err(e) => {
                    warn!(%package_id, error = %e, "package fetch failed");
                    outcome.package_failures.push((package_id.clone(), e.to_string()));
                }
            }
        }

        info!(
            rfc = %outcome.job.rfc,
            packages = outcome.packages_fetched,
            xml_files = outcome.xml_files.len(),
            "retrieval complete"
        );
        Ok(outcome)
    }

    /// Poll until the job reaches a terminal state, the empty-period
    /// short-circuit fires, or the attempt budget runs out.
    async fn poll_until_done(
        &self,
        signer: &dyn Signer,
        job: &RetrievalJob,
        cancel: &CancellationToken,
    ) -> ClientResult<PollResult> {
        let mut empty_polls = 0u32;
        for attempt in 1..=self.poll_cfg.max_attempts {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }

            match self.poll(signer, &job.remote_job_id).await {
                Ok(poll) => {
                    if poll.is_no_data() {
                        return Ok(poll);
                    }
                    if poll.is_finished() {
                        return Ok(poll);
                    }
                    match poll.state {
                        RemoteJobState::Failed | RemoteJobState::Rejected
                        | RemoteJobState::Expired => {
                            return Err(ClientError::RemoteRejected {
                                code: poll.status_code,
                                message: format!("job entered state {:?}: {}", poll.state, poll.message),
                            });
                        }
                        _ => {}
                    }
                    if poll.package_ids.is_empty() && poll.cfdi_count == 0 {
                        empty_polls += 1;
                        if empty_polls >= self.poll_cfg.empty_poll_limit {
                            debug!(job_id = %job.remote_job_id, empty_polls,
                                "empty-period short-circuit");
                            return Ok(poll);
                        }
                    } else {
                        empty_polls = 0;
                    }
                }
                // Transient network faults ride the same backoff; the
                // attempt budget still bounds the loop.
                Err(ClientError::Http(e)) => {
                    warn!(job_id = %job.remote_job_id, attempt, error = %e, "poll failed, will retry");
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(jittered(self.poll_cfg.delay_for_attempt(attempt))).await;
        }
        Err(ClientError::Timeout {
            attempts: self.poll_cfg.max_attempts,
        })
    }
}

/// Apply ±25% jitter so synchronized clients fan out their polls.
fn jittered(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.75..=1.25);
    delay.mul_f64(factor)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}
