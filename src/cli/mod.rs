//! Command-line interface for dealscout.
//!
//! Provides commands for discovery runs, ad-hoc verification, feedback,
//! weight evolution, audit history and financial projection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use crate::adapters::SourceRegistry;
use crate::config::{self, AuditBackend, ResolvedConfig};
use crate::core::audit_log::append_decision_with_retry;
use crate::core::orchestrator::{self, candidate_from_texts};
use crate::core::{
    financial, AuditSink, BatchVerifier, CandidateSeed, Discovery, DiscoveryReport, FallbackGuarantee, JsonlAuditLog,
    Projection, SignalClassifier, SqliteAuditLog, VerificationEngine, WeightEvolutionTracker, WeightStore,
};
use crate::domain::{DecisionRecord, VerificationResult};

/// dealscout - Multi-source signal verification for investment discovery
#[derive(Parser, Debug)]
#[command(name = "dealscout")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run discovery over a list of candidates using the configured sources
    Run {
        /// YAML or JSON file with a list of candidates
        seeds: PathBuf,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Score one candidate from signal texts given on the command line
    Verify {
        /// Candidate name
        name: String,

        /// Signal as SOURCE=TEXT (repeatable)
        #[arg(short, long = "signal", required = true)]
        signals: Vec<String>,

        /// Declared monthly recurring revenue
        #[arg(long)]
        mrr: Option<i64>,

        /// Declared team size
        #[arg(long)]
        team: Option<u32>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record outcome feedback for the latest decision on a candidate
    Feedback {
        /// Candidate name
        name: String,

        /// Outcome score in [0, 1]
        score: f64,
    },

    /// Analyze feedback trends and commit weight adjustments
    Evolve,

    /// Show current weights, thresholds and evolution phases
    Weights,

    /// Show recorded decisions
    History {
        /// Only show decisions for this candidate
        #[arg(short, long)]
        candidate: Option<String>,

        /// Maximum number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Project payout and payback for a monthly revenue figure
    Project {
        /// Monthly recurring revenue
        mrr: f64,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cfg = config::config()?;

        match self.command {
            Commands::Run { seeds, json } => run_discovery(cfg, &seeds, json).await,
            Commands::Verify {
                name,
                signals,
                mrr,
                team,
                json,
            } => verify_candidate(cfg, name, &signals, mrr, team, json).await,
            Commands::Feedback { name, score } => record_feedback(cfg, &name, score).await,
            Commands::Evolve => evolve_weights(cfg).await,
            Commands::Weights => show_weights(cfg).await,
            Commands::History { candidate, limit } => show_history(cfg, candidate.as_deref(), limit).await,
            Commands::Project { mrr } => show_projection(cfg, mrr),
            Commands::Config => show_config(cfg),
        }
    }
}

/// Open the configured audit backend
pub async fn open_audit(cfg: &ResolvedConfig) -> Result<Arc<dyn AuditSink>> {
    let sink: Arc<dyn AuditSink> = match cfg.engine.audit_backend {
        AuditBackend::Jsonl => Arc::new(
            JsonlAuditLog::open(cfg.audit_dir())
                .await
                .with_context(|| format!("Failed to open audit log at {}", cfg.audit_dir().display()))?,
        ),
        AuditBackend::Sqlite => {
            std::fs::create_dir_all(&cfg.home)
                .with_context(|| format!("Failed to create {}", cfg.home.display()))?;
            Arc::new(
                SqliteAuditLog::open(cfg.sqlite_path())
                    .with_context(|| format!("Failed to open audit database {}", cfg.sqlite_path().display()))?,
            )
        }
    };
    Ok(sink)
}

/// Audit log plus weight state replayed from it
struct Engine {
    audit: Arc<dyn AuditSink>,
    store: Arc<WeightStore>,
    tracker: WeightEvolutionTracker,
}

async fn load_engine(cfg: &ResolvedConfig) -> Result<Engine> {
    let audit = open_audit(cfg).await?;
    let (store, tracker) =
        orchestrator::restore(audit.as_ref(), cfg.engine.initial_weights()?, cfg.engine.evolution.clone()).await?;
    Ok(Engine { audit, store, tracker })
}

fn load_seeds(path: &Path) -> Result<Vec<CandidateSeed>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read seeds file: {}", path.display()))?;

    let seeds: Vec<CandidateSeed> = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))?
    } else {
        serde_yaml::from_str(&content).with_context(|| format!("Invalid YAML in {}", path.display()))?
    };

    if seeds.is_empty() {
        anyhow::bail!("No candidates in {}", path.display());
    }
    Ok(seeds)
}

/// Split `SOURCE=TEXT`; bare text is attributed to `cli`
fn parse_signal_arg(arg: &str) -> (String, String) {
    match arg.split_once('=') {
        Some((source, text)) if !source.trim().is_empty() && !source.contains(' ') => {
            (source.trim().to_string(), text.to_string())
        }
        _ => ("cli".to_string(), arg.to_string()),
    }
}

fn print_results(results: &[VerificationResult]) {
    println!("{:<28} {:<10} {:>7} {:>9}  {}", "CANDIDATE", "STATUS", "SCORE", "COMPOSITE", "FLAGS");
    println!("{}", "-".repeat(90));
    for result in results {
        let flags: Vec<&str> = result.risk_flags.iter().map(String::as_str).collect();
        println!(
            "{:<28} {:<10} {:>7.3} {:>9.3}  {}",
            result.candidate_name,
            result.status,
            result.authenticity_score,
            result.composite_score,
            flags.join(", ")
        );
    }
}

fn print_report(report: &DiscoveryReport) {
    println!("Run {} (weights v{}, input {})", report.run_id, report.weight_version, report.input_digest);
    println!();
    println!("Accepted:");
    print_results(&report.batch.accepted);
    if !report.batch.rejected.is_empty() {
        println!();
        println!("Rejected:");
        print_results(&report.batch.rejected);
    }

    if !report.projections.is_empty() {
        println!();
        println!("Projections:");
        for (name, projection) in &report.projections {
            println!("  {:<28} {}", name, describe_projection(projection));
        }
    }

    println!();
    println!(
        "{} live, {} fallback (fixtures {}), {} audit failures",
        report.batch.live_count(),
        report.batch.fallback_used,
        report.batch.fixture_version,
        report.audit_failures
    );
    if report.batch.shortfall > 0 {
        eprintln!("Warning: {} results short of the minimum", report.batch.shortfall);
    }
}

fn describe_projection(projection: &Projection) -> String {
    match projection {
        Projection::Payback(p) => format!(
            "payout {:.2}/month, payback {:.1} months, {:.1}% annualized",
            p.monthly_payout, p.payback_months, p.annualized_return_pct
        ),
        Projection::NoPayback { monthly_payout } => format!("payout {:.2}/month, no payback", monthly_payout),
    }
}

/// Run discovery over the seeds file
async fn run_discovery(cfg: &ResolvedConfig, seeds_path: &Path, json: bool) -> Result<()> {
    let seeds = load_seeds(seeds_path)?;
    let settings = &cfg.engine;

    let registry = SourceRegistry::from_config(
        &cfg.sources,
        settings.retry.clone(),
        Duration::from_secs(settings.collection_timeout_seconds),
    )
    .context("Failed to build signal sources")?;
    if registry.is_empty() {
        eprintln!("Warning: no sources configured; only reference candidates can be returned");
    }

    let Engine { audit, store, .. } = load_engine(cfg).await?;
    let verifier = BatchVerifier::new(
        Arc::new(VerificationEngine::with_settings(settings.plausibility.clone())),
        settings.concurrency_limit,
    )
    .with_timeout(Duration::from_secs(settings.batch_timeout_seconds));

    let discovery = Discovery::new(registry, verifier, store, audit)
        .with_fallback(FallbackGuarantee::new(settings.fallback_minimum))
        .with_financial(settings.financial)
        .with_collection_concurrency(settings.concurrency_limit);

    let report = discovery.run(&seeds).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Score one candidate from command-line signal texts
async fn verify_candidate(
    cfg: &ResolvedConfig,
    name: String,
    signal_args: &[String],
    mrr: Option<i64>,
    team: Option<u32>,
    json: bool,
) -> Result<()> {
    let Engine { audit, store, .. } = load_engine(cfg).await?;
    let seed = CandidateSeed::new(name).with_metrics(mrr, team);
    let texts: Vec<(String, String)> = signal_args.iter().map(|a| parse_signal_arg(a)).collect();

    let now = Utc::now();
    let candidate = candidate_from_texts(&SignalClassifier::new(), &seed, &texts, now);
    let weights = store.snapshot();
    let engine = VerificationEngine::with_settings(cfg.engine.plausibility.clone());
    let mut result = engine.verify(&candidate, &weights, now);

    let record = DecisionRecord::from_result(&result, &weights);
    if append_decision_with_retry(audit.as_ref(), &record).await.is_err() {
        result.risk_flags.insert(crate::domain::flags::AUDIT_WRITE_FAILED.to_string());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    print_results(std::slice::from_ref(&result));
    println!();
    for score in &result.per_signal_scores {
        println!(
            "  [{}] {:<22} {:.2} {}  {}",
            score.signal.source(),
            score.signal.signal_type().to_string(),
            score.score,
            if score.verified { "verified" } else { "unverified" },
            score.signal.content()
        );
    }
    Ok(())
}

async fn record_feedback(cfg: &ResolvedConfig, name: &str, score: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&score) {
        anyhow::bail!("Feedback score must be within [0, 1], got {}", score);
    }

    let Engine { audit, tracker, .. } = load_engine(cfg).await?;
    let row = orchestrator::record_feedback(audit.as_ref(), &tracker, name, score, Utc::now()).await?;

    eprintln!(
        "Recorded feedback {:.2} for {} (decision {} at weights v{})",
        score, row.candidate_name, row.status, row.weight_version
    );
    Ok(())
}

async fn evolve_weights(cfg: &ResolvedConfig) -> Result<()> {
    let Engine { audit, store, tracker } = load_engine(cfg).await?;
    let before = store.version();
    let mutations = orchestrator::evolve(audit.as_ref(), &tracker, Utc::now()).await?;

    if mutations.is_empty() {
        println!("No adjustment (weights v{})", before);
        return Ok(());
    }

    println!("Weights v{} -> v{}", before, store.version());
    for mutation in &mutations {
        println!(
            "  {:<22} {:.4} -> {:.4}  {}",
            mutation.parameter.to_string(),
            mutation.old_value,
            mutation.new_value,
            mutation.trigger
        );
    }
    Ok(())
}

async fn show_weights(cfg: &ResolvedConfig) -> Result<()> {
    let Engine { store, tracker, .. } = load_engine(cfg).await?;
    let weights = store.snapshot();
    let phases = tracker.phases();
    let thresholds = weights.thresholds();

    println!("Weights v{} (sum {:.4})", weights.version(), weights.weight_sum());
    println!("{:<22} {:>8}  {:<10} {:>7}", "SIGNAL", "WEIGHT", "PHASE", "SAMPLES");
    println!("{}", "-".repeat(52));
    for (signal_type, weight) in weights.signal_weights() {
        let phase = phases.get(signal_type).copied().unwrap_or_default();
        println!(
            "{:<22} {:>8.4}  {:<10} {:>7}",
            signal_type.to_string(),
            weight,
            format!("{:?}", phase).to_lowercase(),
            tracker.window_len(*signal_type)
        );
    }
    println!();
    println!("Thresholds: verified >= {}, uncertain >= {}", thresholds.verified, thresholds.uncertain);
    Ok(())
}

async fn show_history(cfg: &ResolvedConfig, candidate: Option<&str>, limit: usize) -> Result<()> {
    let audit = open_audit(cfg).await?;
    let decisions = audit.decisions().await.context("Failed to read decision records")?;

    let rows: Vec<&DecisionRecord> = decisions
        .iter()
        .filter(|d| candidate.map_or(true, |c| d.candidate_name == c))
        .collect();
    if rows.is_empty() {
        println!("No decisions recorded");
        return Ok(());
    }

    println!("{:<26} {:<28} {:<10} {:>7} {:>9} {:>4}", "TIMESTAMP", "CANDIDATE", "STATUS", "SCORE", "FEEDBACK", "V");
    println!("{}", "-".repeat(90));
    for row in rows.iter().skip(rows.len().saturating_sub(limit)) {
        println!(
            "{:<26} {:<28} {:<10} {:>7.3} {:>9} {:>4}",
            row.timestamp.to_rfc3339(),
            row.candidate_name,
            row.status,
            row.authenticity_score,
            row.feedback_score.map(|f| format!("{:.2}", f)).unwrap_or_else(|| "-".to_string()),
            row.weight_version
        );
    }
    Ok(())
}

fn show_projection(cfg: &ResolvedConfig, mrr: f64) -> Result<()> {
    let projection = financial::compute(&cfg.engine.financial, mrr)?;
    let financial = &cfg.engine.financial;
    println!(
        "Investment {:.0}, payout share {:.1}%, fx {}",
        financial.investment_amount,
        financial.payout_share_pct * 100.0,
        financial.fx_rate
    );
    println!("{}", describe_projection(&projection));
    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    let engine = &cfg.engine;

    println!("DealScout Configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:      {}", cfg.home.display());
    match engine.audit_backend {
        AuditBackend::Jsonl => println!("  Audit:     {} (jsonl)", cfg.audit_dir().display()),
        AuditBackend::Sqlite => println!("  Audit:     {} (sqlite)", cfg.sqlite_path().display()),
    }
    println!();
    println!("Sources:");
    if cfg.sources.is_empty() {
        println!("  (none)");
    }
    for source in &cfg.sources {
        println!("  {}", source.name());
    }
    println!();
    println!("Engine:");
    println!("  Concurrency:        {}", engine.concurrency_limit);
    println!("  Fallback minimum:   {}", engine.fallback_minimum);
    println!("  Batch timeout:      {}s", engine.batch_timeout_seconds);
    println!("  Collection timeout: {}s", engine.collection_timeout_seconds);
    println!("  Retry attempts:     {}", engine.retry.max_attempts);
    println!(
        "  Thresholds:         verified {}, uncertain {}",
        engine.thresholds.verified, engine.thresholds.uncertain
    );
    println!("  Mutation rate:      {}", engine.evolution.mutation_rate);
    println!();
    println!("Initial weights:");
    for (signal_type, weight) in &engine.signal_weights {
        println!("  {:<22} {:.4}", signal_type.to_string(), weight);
    }

    Ok(())
}
