//! Discovery run orchestration.
//!
//! One run: collect signals for every seed, classify them, verify the batch
//! under a single weight snapshot, apply collection flags, log every
//! decision, guarantee the minimum result set, and project the accepted
//! live candidates. Feedback and evolution are separate entry points that
//! share the same audit log.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::audit_log::{append_decision_with_retry, append_mutations_with_retry, AuditSink};
use super::batch::BatchVerifier;
use super::classifier::SignalClassifier;
use super::evolution::{EvolutionSettings, WeightEvolutionTracker};
use super::fallback::{FallbackGuarantee, GuaranteedBatch};
use super::financial::{self, FinancialConfig, Projection, ProjectionError};
use super::verification::apply_collection_timeout;
use super::weight_store::WeightStore;
use crate::adapters::{CollectionOutcome, SourceRegistry};
use crate::domain::{flags, Candidate, DecisionRecord, Metadata, Signal, WeightMutation, WeightState};

/// A candidate to discover, with caller-declared metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSeed {
    pub name: String,

    #[serde(default)]
    pub estimated_mrr: Option<i64>,

    #[serde(default)]
    pub team_size: Option<u32>,
}

impl CandidateSeed {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            estimated_mrr: None,
            team_size: None,
        }
    }

    pub fn with_metrics(mut self, estimated_mrr: Option<i64>, team_size: Option<u32>) -> Self {
        self.estimated_mrr = estimated_mrr;
        self.team_size = team_size;
        self
    }
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub run_id: Uuid,
    /// Digest of the seed names and weight version
    pub input_digest: String,
    pub weight_version: u64,
    pub batch: GuaranteedBatch,
    /// Projections for accepted live candidates with declared MRR
    pub projections: BTreeMap<String, Projection>,
    /// Decisions that could not be persisted
    pub audit_failures: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Wires sources, scoring and persistence into one run
pub struct Discovery {
    classifier: SignalClassifier,
    registry: SourceRegistry,
    verifier: BatchVerifier,
    store: Arc<WeightStore>,
    audit: Arc<dyn AuditSink>,
    fallback: FallbackGuarantee,
    financial: FinancialConfig,
    collection_concurrency: usize,
}

impl Discovery {
    pub fn new(
        registry: SourceRegistry,
        verifier: BatchVerifier,
        store: Arc<WeightStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            classifier: SignalClassifier::new(),
            registry,
            verifier,
            store,
            audit,
            fallback: FallbackGuarantee::new(3),
            financial: FinancialConfig::default(),
            collection_concurrency: 4,
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackGuarantee) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_financial(mut self, financial: FinancialConfig) -> Self {
        self.financial = financial;
        self
    }

    pub fn with_collection_concurrency(mut self, concurrency: usize) -> Self {
        self.collection_concurrency = concurrency.max(1);
        self
    }

    pub fn with_classifier(mut self, classifier: SignalClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    #[instrument(skip_all, fields(seeds = seeds.len()))]
    pub async fn run(&self, seeds: &[CandidateSeed]) -> DiscoveryReport {
        let run_id = Uuid::new_v4();
        let started_at = self.verifier.clock().now();
        let weights = self.store.snapshot();
        let seeds = dedupe(seeds);
        info!(%run_id, weight_version = weights.version(), "Starting discovery run");

        // Collection is I/O-bound; results stay in seed order
        let outcomes: Vec<CollectionOutcome> = stream::iter(seeds.iter())
            .map(|seed| self.registry.collect(&seed.name))
            .buffered(self.collection_concurrency)
            .collect()
            .await;

        let candidates: Vec<Candidate> = seeds
            .iter()
            .zip(&outcomes)
            .map(|(seed, outcome)| self.build_candidate(seed, outcome))
            .collect();

        let mut results = self.verifier.verify_batch(&candidates, Arc::clone(&weights)).await;

        for (result, outcome) in results.iter_mut().zip(&outcomes) {
            if outcome.timed_out() {
                *result = apply_collection_timeout(result.clone());
            }
            result.risk_flags.extend(outcome.risk_flags());
        }

        let mut audit_failures = 0;
        for result in results.iter_mut() {
            let record = DecisionRecord::from_result(result, &weights);
            if append_decision_with_retry(self.audit.as_ref(), &record).await.is_err() {
                result.risk_flags.insert(flags::AUDIT_WRITE_FAILED.to_string());
                audit_failures += 1;
            }
        }

        let by_name: BTreeMap<&str, &Candidate> = candidates.iter().map(|c| (c.name.as_str(), c)).collect();
        let batch = self
            .fallback
            .apply(results, self.verifier.engine(), &weights, self.verifier.clock().now());

        let mut projections = BTreeMap::new();
        for result in batch.accepted.iter().filter(|r| !r.is_fallback()) {
            let Some(candidate) = by_name.get(result.candidate_name.as_str()) else { continue };
            match financial::project(candidate, result, &self.financial) {
                Ok(projection) => {
                    projections.insert(result.candidate_name.clone(), projection);
                }
                Err(ProjectionError::MissingMrr(name)) => debug!(candidate = %name, "No MRR declared, not projected"),
                Err(e) => warn!(error = %e, "Projection failed"),
            }
        }

        let report = DiscoveryReport {
            run_id,
            input_digest: input_digest(&seeds, weights.version()),
            weight_version: weights.version(),
            batch,
            projections,
            audit_failures,
            started_at,
            finished_at: self.verifier.clock().now(),
        };

        info!(
            %run_id,
            accepted = report.batch.accepted.len(),
            rejected = report.batch.rejected.len(),
            fallback_used = report.batch.fallback_used,
            "Discovery run finished"
        );
        report
    }

    fn build_candidate(&self, seed: &CandidateSeed, outcome: &CollectionOutcome) -> Candidate {
        let mut candidate =
            Candidate::without_signals(seed.name.clone()).with_metrics(seed.estimated_mrr, seed.team_size);
        for raw in &outcome.signals {
            candidate.push_signal(self.classifier.classify(raw, Some(&seed.name)));
        }
        candidate
    }
}

fn dedupe(seeds: &[CandidateSeed]) -> Vec<CandidateSeed> {
    let mut seen = BTreeSet::new();
    seeds
        .iter()
        .filter(|seed| {
            let fresh = seen.insert(seed.name.clone());
            if !fresh {
                warn!(candidate = %seed.name, "Duplicate seed ignored");
            }
            fresh
        })
        .cloned()
        .collect()
}

/// 16 hex chars of SHA-256 over the seed names and weight version
pub fn input_digest(seeds: &[CandidateSeed], weight_version: u64) -> String {
    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed.name.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(weight_version.to_le_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// Record feedback on the latest scored decision for a candidate
pub async fn record_feedback(
    audit: &dyn AuditSink,
    tracker: &WeightEvolutionTracker,
    candidate_name: &str,
    feedback_score: f64,
    now: DateTime<Utc>,
) -> Result<DecisionRecord> {
    let decisions = audit.decisions().await.context("Failed to read decision records")?;
    let latest = decisions
        .iter()
        .rev()
        .find(|d| d.candidate_name == candidate_name && d.feedback_score.is_none())
        .with_context(|| format!("No scored decision found for '{}'", candidate_name))?;

    let row = latest.with_feedback(feedback_score, now);
    append_decision_with_retry(audit, &row)
        .await
        .context("Failed to persist feedback")?;
    tracker.record(&row);

    info!(candidate = candidate_name, feedback = ?row.feedback_score, "Feedback recorded");
    Ok(row)
}

/// Run one evolution step and persist the committed mutations
pub async fn evolve(
    audit: &dyn AuditSink,
    tracker: &WeightEvolutionTracker,
    now: DateTime<Utc>,
) -> Result<Vec<WeightMutation>> {
    let mutations = tracker.analyze(now).context("Weight evolution failed")?;
    append_mutations_with_retry(audit, &mutations)
        .await
        .context("Failed to persist weight mutations")?;
    Ok(mutations)
}

/// Rebuild the weight store and tracker from the audit log
pub async fn restore(
    audit: &dyn AuditSink,
    initial: WeightState,
    settings: EvolutionSettings,
) -> Result<(Arc<WeightStore>, WeightEvolutionTracker)> {
    let history = audit.mutations().await.context("Failed to read weight evolution")?;
    let store = Arc::new(WeightStore::from_history(initial, &history).context("Failed to replay weight history")?);

    let tracker = WeightEvolutionTracker::new(Arc::clone(&store), settings);
    tracker.ingest(&audit.decisions().await.context("Failed to read decision records")?);
    tracker.restore_phases(&history);

    Ok((store, tracker))
}

/// Classify ad-hoc text signals for a single candidate
pub fn candidate_from_texts(
    classifier: &SignalClassifier,
    seed: &CandidateSeed,
    texts: &[(String, String)],
    observed_at: DateTime<Utc>,
) -> Candidate {
    let mut candidate =
        Candidate::without_signals(seed.name.clone()).with_metrics(seed.estimated_mrr, seed.team_size);
    for (source, text) in texts {
        let raw = crate::domain::RawSignal {
            source: source.clone(),
            text: text.clone(),
            metadata: Metadata::new(),
            timestamp: observed_at,
        };
        let signal: Signal = classifier.classify(&raw, Some(&seed.name));
        candidate.push_signal(signal);
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::StaticSource;
    use crate::core::audit_log::MemoryAuditLog;
    use crate::core::batch::Clock;
    use crate::core::retry::RetryPolicy;
    use crate::core::verification::VerificationEngine;
    use crate::domain::{RawSignal, VerificationStatus};
    use chrono::TimeZone;
    use std::time::Duration;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap()
    }

    fn discovery(audit: Arc<MemoryAuditLog>) -> Discovery {
        let source = StaticSource::new("registry")
            .with_signal("Northwind", RawSignal::new("registry", "Northwind raised $3M Seed", at()))
            .with_signal("Northwind", RawSignal::new("accelerator", "Northwind, YC W24", at()))
            .with_signal("Northwind", RawSignal::new("social", "Northwind is hiring 4 engineers", at()));
        let registry = SourceRegistry::new(RetryPolicy::none(), Duration::from_secs(5)).with_source(Arc::new(source));
        let verifier =
            BatchVerifier::new(Arc::new(VerificationEngine::default()), 2).with_clock(Clock::Fixed(at()));

        Discovery::new(registry, verifier, Arc::new(WeightStore::default()), audit)
    }

    #[tokio::test]
    async fn test_run_scores_logs_and_fills() {
        let audit = Arc::new(MemoryAuditLog::new());
        let report = discovery(Arc::clone(&audit))
            .run(&[
                CandidateSeed::new("Northwind").with_metrics(Some(40_000), Some(8)),
                CandidateSeed::new("Ghost"),
            ])
            .await;

        assert_eq!(report.batch.accepted[0].candidate_name, "Northwind");
        assert_eq!(report.batch.accepted[0].status, VerificationStatus::Verified);
        assert_eq!(report.batch.rejected[0].candidate_name, "Ghost");
        assert!(report.batch.rejected[0].has_flag(flags::NO_SIGNALS));
        assert_eq!(report.batch.accepted.len(), 3);
        assert_eq!(report.batch.fallback_used, 2);
        assert!(report.projections.contains_key("Northwind"));
        assert_eq!(audit.decisions().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_audit_failure_flags_result() {
        let audit = Arc::new(MemoryAuditLog::new());
        audit.fail_next_writes(2);
        let report = discovery(Arc::clone(&audit))
            .run(&[CandidateSeed::new("Northwind").with_metrics(Some(40_000), Some(8))])
            .await;

        assert_eq!(report.audit_failures, 1);
        assert!(report.batch.accepted[0].has_flag(flags::AUDIT_WRITE_FAILED));
    }

    #[tokio::test]
    async fn test_feedback_appends_new_row() {
        let audit = Arc::new(MemoryAuditLog::new());
        discovery(Arc::clone(&audit))
            .run(&[CandidateSeed::new("Northwind").with_metrics(Some(40_000), Some(8))])
            .await;

        let tracker = WeightEvolutionTracker::new(Arc::new(WeightStore::default()), EvolutionSettings::default());
        let row = record_feedback(audit.as_ref(), &tracker, "Northwind", 0.9, at()).await.unwrap();

        assert_eq!(row.feedback_score, Some(0.9));
        let decisions = audit.decisions().await.unwrap();
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].feedback_score, None);
        assert!(record_feedback(audit.as_ref(), &tracker, "Unknown", 0.5, at()).await.is_err());
    }

    #[test]
    fn test_input_digest_is_stable() {
        let seeds = vec![CandidateSeed::new("A"), CandidateSeed::new("B")];
        assert_eq!(input_digest(&seeds, 1), input_digest(&seeds, 1));
        assert_ne!(input_digest(&seeds, 1), input_digest(&seeds, 2));
        assert_eq!(input_digest(&seeds, 1).len(), 16);
    }

    #[test]
    fn test_duplicate_seeds_dropped() {
        let seeds = vec![CandidateSeed::new("A"), CandidateSeed::new("A"), CandidateSeed::new("B")];
        assert_eq!(dedupe(&seeds).len(), 2);
    }
}
