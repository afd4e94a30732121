//! Multi-taxpayer batch orchestration.

use crate::analyzer::DocumentAnalyzer;
use crate::error::ClientResult;
use crate::protocol::{ProtocolClient, RetrievalOutcome};
use crate::verify::StatusVerifier;
use cofre_core::{DocumentRecord, FlowDirection, OrchestratorConfig, Rfc, VerificationState};
use cofre_signer::Signer;
use cofre_storage::DocumentVault;
use cofre_store::{BatchReport, DocumentRepo, JobCacheRepo, LedgerStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Verification counts for one taxpayer run.
#[derive(Clone, Copy, Debug, Default)]
pub struct VerifyCounts {
    pub active: usize,
    pub cancelled: usize,
    pub unverified: usize,
}

/// Outcome of the pipeline for one taxpayer. Failures are recorded here and
/// never abort the remaining taxpayers.
#[derive(Debug)]
pub struct TaxpayerRun {
    pub rfc: Rfc,
    pub flow: FlowDirection,
    pub retrieval: Option<RetrievalOutcome>,
    pub analyzed: u64,
    pub malformed: u64,
    /// Parse-failure reasons keyed by file name.
    pub malformed_files: Vec<(String, String)>,
    pub import: Option<BatchReport>,
    pub verified: Option<VerifyCounts>,
    pub error: Option<String>,
}

impl TaxpayerRun {
    fn started(rfc: Rfc, flow: FlowDirection) -> Self {
        Self {
            rfc,
            flow,
            retrieval: None,
            analyzed: 0,
            malformed: 0,
            malformed_files: Vec::new(),
            import: None,
            verified: None,
            error: None,
        }
    }
}

/// Drives several taxpayers through retrieve → analyze → verify → store,
/// strictly sequentially with a fixed pause in between. Concurrency across
/// taxpayers is deliberately avoided: the remote service enforces
/// per-identity and per-source-IP quotas.
pub struct BatchOrchestrator {
    client: Arc<ProtocolClient>,
    verifier: Arc<StatusVerifier>,
    cache: Arc<dyn JobCacheRepo>,
    vault: Arc<dyn DocumentVault>,
    analyzer: DocumentAnalyzer,
    cfg: OrchestratorConfig,
    data_dir: PathBuf,
    work_dir: PathBuf,
}

impl BatchOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<ProtocolClient>,
        verifier: Arc<StatusVerifier>,
        cache: Arc<dyn JobCacheRepo>,
        vault: Arc<dyn DocumentVault>,
        cfg: OrchestratorConfig,
        data_dir: PathBuf,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            client,
            verifier,
            cache,
            vault,
            analyzer: DocumentAnalyzer::new(),
            cfg,
            data_dir,
            work_dir,
        }
    }

    /// Run the full pipeline for every signer, in order.
    pub async fn run(
        &self,
        signers: &[Arc<dyn Signer>],
        flow: FlowDirection,
        start: OffsetDateTime,
        end: OffsetDateTime,
        cancel: &CancellationToken,
    ) -> Vec<TaxpayerRun> {
        let mut runs = Vec::with_capacity(signers.len());
        for (index, signer) in signers.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            if index > 0 {
                tokio::time::sleep(Duration::from_secs(self.cfg.inter_taxpayer_pause_secs)).await;
            }
            runs.push(self.run_one(signer.as_ref(), flow, start, end, cancel).await);
        }
        runs
    }

    async fn run_one(
        &self,
        signer: &dyn Signer,
        flow: FlowDirection,
        start: OffsetDateTime,
        end: OffsetDateTime,
        cancel: &CancellationToken,
    ) -> TaxpayerRun {
        let rfc = signer.rfc().clone();
        let mut run = TaxpayerRun::started(rfc.clone(), flow);
        info!(%rfc, %flow, "starting taxpayer pipeline");

        let dest = self.work_dir.join(rfc.as_str());
        let outcome = match self
            .client
            .run_full(signer, self.cache.as_ref(), flow, start, end, &dest, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%rfc, error = %e, "retrieval failed");
                run.error = Some(e.to_string());
                return run;
            }
        };

        if let Err(e) = self.import(signer, &outcome, &mut run).await {
            warn!(%rfc, error = %e, "import failed");
            run.error = Some(e.to_string());
        }
        run.retrieval = Some(outcome);
        run
    }

    async fn import(
        &self,
        signer: &dyn Signer,
        outcome: &RetrievalOutcome,
        run: &mut TaxpayerRun,
    ) -> ClientResult<()> {
        if outcome.xml_files.is_empty() {
            return Ok(());
        }
        let rfc = signer.rfc();
        let store = LedgerStore::open(&self.data_dir, rfc.clone()).await?;

        let mut records: Vec<DocumentRecord> = Vec::with_capacity(outcome.xml_files.len());
        for path in &outcome.xml_files {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let bytes = tokio::fs::read(path).await?;
            match self.analyzer.parse(&bytes) {
                Ok(parsed) => {
                    let storage_path = self
                        .vault
                        .put(rfc, &parsed.uuid, bytes::Bytes::from(bytes))
                        .await?;
                    records.push(parsed.into_record(storage_path));
                    run.analyzed += 1;
                }
                Err(e) => {
                    warn!(%rfc, file = %file_name, error = %e, "skipping malformed document");
                    run.malformed += 1;
                    run.malformed_files.push((file_name, e.to_string()));
                }
            }
        }

        let report = store.upsert_batch(&records).await?;
        info!(%rfc, created = report.created, updated = report.updated,
            failed = report.failed, "import complete");
        run.import = Some(report);

        if self.cfg.verify_after_import && !records.is_empty() {
            let verify = self.verifier.verify_batch(&records).await;
            for verified in verify.all() {
                if verified.check.state == VerificationState::Unverified {
                    continue;
                }
                if let Err(e) = store.update_status(&verified.uuid, &verified.check).await {
                    warn!(%rfc, uuid = %verified.uuid, error = %e, "status update failed");
                }
            }
            run.verified = Some(VerifyCounts {
                active: verify.active.len(),
                cancelled: verify.cancelled.len(),
                unverified: verify.unverified.len(),
            });
        }
        Ok(())
    }
}
