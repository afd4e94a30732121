//! Operator CLI for Cofre.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use cofre_client::{BatchOrchestrator, ProtocolClient, StatusVerifier};
use cofre_core::{CofreConfig, DocumentKind, FiscalUuid, FlowDirection, Rfc, VerificationState};
use cofre_signer::{KeyPair, MemorySigner, Signer};
use cofre_storage::{DocumentVault, FilesystemVault};
use cofre_store::{DocumentFilter, DocumentRepo, JobCache, JobCacheRepo, LedgerStore};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, Time};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "cofrectl")]
#[command(about = "Bulk CFDI retrieval, verification, and indexing")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(long, global = true, env = "COFRE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct IdentityArgs {
    /// Taxpayer RFC
    #[arg(long)]
    rfc: String,
}

#[derive(Args, Clone)]
struct SignerArgs {
    /// Base64 seed for the in-memory dev signer. Production deployments
    /// drive the library with a credential-service signer instead.
    #[arg(long, env = "COFRE_SIGNER_SEED")]
    seed: Option<String>,
}

#[derive(Args, Clone)]
struct PeriodArgs {
    /// Period start date (YYYY-MM-DD)
    #[arg(long)]
    from: String,
    /// Period end date (YYYY-MM-DD), inclusive
    #[arg(long)]
    to: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve, analyze, verify, and store documents for one or more RFCs
    Pull {
        /// Taxpayer RFCs, in processing order
        #[arg(long, required = true)]
        rfc: Vec<String>,
        /// issued or received
        #[arg(long, default_value = "issued")]
        flow: String,
        #[command(flatten)]
        period: PeriodArgs,
        /// Skip the post-import verification pass
        #[arg(long, default_value_t = false)]
        no_verify: bool,
        #[command(flatten)]
        signer: SignerArgs,
    },
    /// Re-verify stored documents' cancellation status
    Verify {
        #[command(flatten)]
        identity: IdentityArgs,
        /// Re-check every record, not just unverified ones
        #[arg(long, default_value_t = false)]
        all: bool,
    },
    /// Query stored documents
    Query {
        #[command(flatten)]
        identity: IdentityArgs,
        /// income | expense | transfer | payroll | payment
        #[arg(long)]
        kind: Option<String>,
        /// unverified | active | cancelled | error
        #[arg(long)]
        status: Option<String>,
        /// Counterparty RFC (issuer or receiver)
        #[arg(long)]
        counterparty: Option<String>,
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },
    /// Ledger totals and per-period statistics
    Stats {
        #[command(flatten)]
        identity: IdentityArgs,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        month: Option<u8>,
    },
    /// Client and supplier ranking by monetary share
    Counterparties {
        #[command(flatten)]
        identity: IdentityArgs,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        month: Option<u8>,
    },
    /// Delete one stored document and its payload
    Delete {
        #[command(flatten)]
        identity: IdentityArgs,
        /// Fiscal UUID of the document
        #[arg(long)]
        uuid: String,
    },
    /// Retrieval-job cache inspection and maintenance
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List cached jobs with validity and age
    List,
    /// Remove entries past the 72-hour validity window
    Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Pull {
            rfc,
            flow,
            period,
            no_verify,
            signer,
        } => handle_pull(&config, &rfc, &flow, &period, no_verify, &signer).await,
        Commands::Verify { identity, all } => handle_verify(&config, &identity, all).await,
        Commands::Query {
            identity,
            kind,
            status,
            counterparty,
            page,
            page_size,
        } => handle_query(&config, &identity, kind, status, counterparty, page, page_size).await,
        Commands::Stats {
            identity,
            year,
            month,
        } => handle_stats(&config, &identity, year, month).await,
        Commands::Counterparties {
            identity,
            year,
            month,
        } => handle_counterparties(&config, &identity, year, month).await,
        Commands::Delete { identity, uuid } => handle_delete(&config, &identity, &uuid).await,
        Commands::Cache { command } => handle_cache(&config, command).await,
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<CofreConfig> {
    let mut figment = Figment::from(figment::providers::Serialized::defaults(
        CofreConfig::default(),
    ));
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    } else {
        figment = figment.merge(Toml::file("cofre.toml"));
    }
    figment = figment.merge(Env::prefixed("COFRE_").split("__"));
    figment.extract().context("invalid configuration")
}

/// Parse an inclusive date range into the period's datetime bounds.
fn parse_period(period: &PeriodArgs) -> Result<(OffsetDateTime, OffsetDateTime)> {
    let fmt = format_description!("[year]-[month]-[day]");
    let from = Date::parse(&period.from, &fmt)
        .with_context(|| format!("invalid --from date: {}", period.from))?;
    let to = Date::parse(&period.to, &fmt)
        .with_context(|| format!("invalid --to date: {}", period.to))?;
    if from > to {
        bail!("--from {} is after --to {}", period.from, period.to);
    }
    Ok((
        OffsetDateTime::new_utc(from, Time::MIDNIGHT),
        OffsetDateTime::new_utc(to, Time::from_hms(23, 59, 59).unwrap()),
    ))
}

fn build_signer(rfc: &Rfc, args: &SignerArgs) -> Result<MemorySigner> {
    match &args.seed {
        Some(seed) => {
            let keypair = KeyPair::from_base64_seed(seed).context("invalid signer seed")?;
            Ok(MemorySigner::new(rfc.clone(), keypair))
        }
        None => {
            tracing::warn!("no signer seed supplied, generating an ephemeral dev key");
            Ok(MemorySigner::generate(rfc.clone()))
        }
    }
}

async fn handle_pull(
    config: &CofreConfig,
    rfcs: &[String],
    flow: &str,
    period: &PeriodArgs,
    no_verify: bool,
    signer_args: &SignerArgs,
) -> Result<()> {
    let flow = FlowDirection::parse(flow).context("invalid --flow")?;
    let (start, end) = parse_period(period)?;

    let timeout = Duration::from_secs(config.network_timeout_secs);
    let client = Arc::new(ProtocolClient::new(
        &config.request_url,
        timeout,
        config.poll.clone(),
    )?);
    let verifier = Arc::new(StatusVerifier::new(
        &config.verify_url,
        timeout,
        config.verify.clone(),
    )?);
    let cache = Arc::new(JobCache::open(&config.data_dir).await?);
    let vault = Arc::new(FilesystemVault::new(&config.vault_dir).await?);

    let mut orchestrator_cfg = config.orchestrator.clone();
    if no_verify {
        orchestrator_cfg.verify_after_import = false;
    }
    let orchestrator = BatchOrchestrator::new(
        client,
        verifier,
        cache,
        vault,
        orchestrator_cfg,
        config.data_dir.clone(),
        config.data_dir.join("incoming"),
    );

    let mut signers: Vec<Arc<dyn Signer>> = Vec::with_capacity(rfcs.len());
    for raw in rfcs {
        let rfc = Rfc::parse(raw).with_context(|| format!("invalid RFC: {raw}"))?;
        signers.push(Arc::new(build_signer(&rfc, signer_args)?));
    }

    let cancel = CancellationToken::new();
    let runs = orchestrator.run(&signers, flow, start, end, &cancel).await;

    let mut failed = 0usize;
    for run in &runs {
        match &run.error {
            Some(error) => {
                failed += 1;
                println!("{}: FAILED: {error}", run.rfc);
            }
            None => {
                let (created, updated) = run
                    .import
                    .as_ref()
                    .map(|r| (r.created, r.updated))
                    .unwrap_or((0, 0));
                println!(
                    "{}: analyzed {} (malformed {}), created {}, updated {}",
                    run.rfc, run.analyzed, run.malformed, created, updated
                );
                if let Some(v) = run.verified {
                    println!(
                        "  verified: {} active, {} cancelled, {} unverified",
                        v.active, v.cancelled, v.unverified
                    );
                }
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} taxpayers failed", runs.len());
    }
    Ok(())
}

async fn handle_verify(config: &CofreConfig, identity: &IdentityArgs, all: bool) -> Result<()> {
    let rfc = Rfc::parse(&identity.rfc).context("invalid RFC")?;
    let store = LedgerStore::open(&config.data_dir, rfc).await?;
    let verifier = StatusVerifier::new(
        &config.verify_url,
        Duration::from_secs(config.network_timeout_secs),
        config.verify.clone(),
    )?;

    let filter = DocumentFilter {
        status: (!all).then_some(VerificationState::Unverified),
        ..Default::default()
    };
    let page = store.query(&filter, 0, 500).await?;
    if page.items.is_empty() {
        println!("nothing to verify");
        return Ok(());
    }

    let report = verifier.verify_batch(&page.items).await;
    for verified in report.all() {
        if verified.check.state == VerificationState::Unverified {
            continue;
        }
        store.update_status(&verified.uuid, &verified.check).await?;
    }
    println!(
        "verified {}: {} active, {} cancelled, {} unverified",
        report.total(),
        report.active.len(),
        report.cancelled.len(),
        report.unverified.len()
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_query(
    config: &CofreConfig,
    identity: &IdentityArgs,
    kind: Option<String>,
    status: Option<String>,
    counterparty: Option<String>,
    page: u32,
    page_size: u32,
) -> Result<()> {
    let rfc = Rfc::parse(&identity.rfc).context("invalid RFC")?;
    let store = LedgerStore::open(&config.data_dir, rfc).await?;

    let filter = DocumentFilter {
        kind: kind.as_deref().map(DocumentKind::parse).transpose()?,
        status: status
            .as_deref()
            .map(VerificationState::parse)
            .transpose()?,
        counterparty: counterparty.as_deref().map(Rfc::parse).transpose()?,
        ..Default::default()
    };
    let results = store.query(&filter, page, page_size).await?;

    println!(
        "page {} of {} records",
        results.page,
        results.total_count
    );
    for record in &results.items {
        println!(
            "{}  {:>8}  {:>12} {}  {}  {} -> {}",
            record.issue_date.format(&Rfc3339).unwrap_or_default(),
            record.kind,
            record.total,
            record.currency,
            record.status.state,
            record.issuer.rfc,
            record.receiver.rfc
        );
    }
    Ok(())
}

async fn handle_stats(
    config: &CofreConfig,
    identity: &IdentityArgs,
    year: Option<i32>,
    month: Option<u8>,
) -> Result<()> {
    let rfc = Rfc::parse(&identity.rfc).context("invalid RFC")?;
    let store = LedgerStore::open(&config.data_dir, rfc).await?;

    let ledger = store.ledger().await?;
    println!("{}", serde_json::to_string_pretty(&ledger)?);

    if let Some(year) = year {
        let stats = store.period_statistics(year, month).await?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}

async fn handle_counterparties(
    config: &CofreConfig,
    identity: &IdentityArgs,
    year: Option<i32>,
    month: Option<u8>,
) -> Result<()> {
    let rfc = Rfc::parse(&identity.rfc).context("invalid RFC")?;
    let store = LedgerStore::open(&config.data_dir, rfc).await?;
    let summary = store.counterparty_summary(year, month).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn handle_delete(config: &CofreConfig, identity: &IdentityArgs, uuid: &str) -> Result<()> {
    let rfc = Rfc::parse(&identity.rfc).context("invalid RFC")?;
    let uuid = FiscalUuid::parse(uuid).context("invalid fiscal UUID")?;
    let store = LedgerStore::open(&config.data_dir, rfc.clone()).await?;
    let vault = FilesystemVault::new(&config.vault_dir).await?;

    if !store.delete(&uuid).await? {
        bail!("no record with uuid {uuid}");
    }
    // The payload may already be gone if the vault was cleaned manually
    if let Err(e) = vault.delete(&rfc, &uuid).await {
        tracing::warn!(error = %e, "payload delete failed");
    }
    println!("deleted {uuid}");
    Ok(())
}

async fn handle_cache(config: &CofreConfig, command: CacheCommands) -> Result<()> {
    let cache = JobCache::open(&config.data_dir).await?;
    match command {
        CacheCommands::List => {
            let jobs = cache.list_all().await?;
            if jobs.is_empty() {
                println!("cache is empty");
            }
            for info in jobs {
                println!(
                    "{}  {}  {} -> {}  job {}  {:.1}h  {}",
                    info.job.rfc,
                    info.job.flow,
                    info.job.period_start.date(),
                    info.job.period_end.date(),
                    info.job.remote_job_id,
                    info.age_hours,
                    if info.valid { "valid" } else { "expired" }
                );
            }
        }
        CacheCommands::Purge => {
            let removed = cache.purge_expired().await?;
            println!("removed {removed} expired entries");
        }
    }
    Ok(())
}
