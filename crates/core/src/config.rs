//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Poll-loop tuning for the bulk-retrieval protocol.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollConfig {
    /// First inter-poll delay; later delays back off exponentially.
    #[serde(default = "default_poll_base_ms")]
    pub base_delay_ms: u64,
    /// Backoff ceiling.
    #[serde(default = "default_poll_max_ms")]
    pub max_delay_ms: u64,
    /// Give up with a Timeout after this many polls without a terminal state.
    #[serde(default = "default_poll_max_attempts")]
    pub max_attempts: u32,
    /// Consecutive zero-package, zero-count polls before reporting an empty
    /// period instead of waiting out the full attempt budget.
    #[serde(default = "default_empty_poll_limit")]
    pub empty_poll_limit: u32,
}

impl PollConfig {
    /// Delay before the given 1-based attempt, without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms.max(self.base_delay_ms));
        Duration::from_millis(ms)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_poll_base_ms(),
            max_delay_ms: default_poll_max_ms(),
            max_attempts: default_poll_max_attempts(),
            empty_poll_limit: default_empty_poll_limit(),
        }
    }
}

/// Status-verification pipeline tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Hard ceiling on simultaneous outbound verification requests.
    #[serde(default = "default_verify_concurrency")]
    pub concurrency: usize,
    /// Pause between verification batches, in milliseconds.
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            concurrency: default_verify_concurrency(),
            inter_batch_delay_ms: default_inter_batch_delay_ms(),
        }
    }
}

/// Multi-taxpayer batch pacing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Pause between taxpayers, in seconds. Taxpayers run strictly
    /// sequentially to respect per-identity and per-source-IP quotas.
    #[serde(default = "default_inter_taxpayer_pause_secs")]
    pub inter_taxpayer_pause_secs: u64,
    /// Whether to run status verification after each import.
    #[serde(default = "default_true")]
    pub verify_after_import: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            inter_taxpayer_pause_secs: default_inter_taxpayer_pause_secs(),
            verify_after_import: default_true(),
        }
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CofreConfig {
    /// Directory holding per-identity store databases and the job cache.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory holding raw XML payloads.
    #[serde(default = "default_vault_dir")]
    pub vault_dir: PathBuf,
    /// Remote request endpoint base URL.
    #[serde(default = "default_request_url")]
    pub request_url: String,
    /// Remote verification endpoint base URL.
    #[serde(default = "default_verify_url")]
    pub verify_url: String,
    /// Per-call network timeout in seconds.
    #[serde(default = "default_network_timeout_secs")]
    pub network_timeout_secs: u64,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl Default for CofreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            vault_dir: default_vault_dir(),
            request_url: default_request_url(),
            verify_url: default_verify_url(),
            network_timeout_secs: default_network_timeout_secs(),
            poll: PollConfig::default(),
            verify: VerifyConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

fn default_poll_base_ms() -> u64 {
    5_000
}

fn default_poll_max_ms() -> u64 {
    60_000
}

fn default_poll_max_attempts() -> u32 {
    30
}

fn default_empty_poll_limit() -> u32 {
    6
}

fn default_verify_concurrency() -> usize {
    10
}

fn default_inter_batch_delay_ms() -> u64 {
    100
}

fn default_inter_taxpayer_pause_secs() -> u64 {
    2
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_vault_dir() -> PathBuf {
    PathBuf::from("data/vault")
}

fn default_request_url() -> String {
    "https://srvsolicituddescarga.clouda.sat.gob.mx".to_string()
}

fn default_verify_url() -> String {
    "https://consultaqr.facturaelectronica.sat.gob.mx".to_string()
}

fn default_network_timeout_secs() -> u64 {
    30
}
