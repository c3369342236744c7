//! Concurrent batch verification.
//!
//! Candidates are scored on the blocking pool with at most
//! `concurrency_limit` in flight. Every candidate in a batch uses the same
//! weight snapshot and the same `computed_at`, and results come back in
//! submission order. When the batch deadline passes, candidates still
//! unfinished are reported as Uncertain with the `timeout` flag.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use super::verification::VerificationEngine;
use crate::domain::{flags, Candidate, VerificationResult, VerificationStatus, WeightState};

/// Source of `computed_at` timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Clock {
    #[default]
    System,
    /// Always returns the same instant
    Fixed(DateTime<Utc>),
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(at) => *at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchVerifier {
    engine: Arc<VerificationEngine>,
    concurrency_limit: usize,
    batch_timeout: Option<Duration>,
    clock: Clock,
}

impl BatchVerifier {
    pub fn new(engine: Arc<VerificationEngine>, concurrency_limit: usize) -> Self {
        Self {
            engine,
            concurrency_limit: concurrency_limit.max(1),
            batch_timeout: None,
            clock: Clock::System,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = Some(timeout);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn engine(&self) -> &Arc<VerificationEngine> {
        &self.engine
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    #[instrument(skip_all, fields(candidates = candidates.len(), weight_version = weights.version()))]
    pub async fn verify_batch(&self, candidates: &[Candidate], weights: Arc<WeightState>) -> Vec<VerificationResult> {
        let computed_at = self.clock.now();
        let deadline = self.batch_timeout.map(|t| Instant::now() + t);
        let mut slots: Vec<Option<VerificationResult>> = vec![None; candidates.len()];

        let tasks = candidates.iter().cloned().enumerate().map(|(index, candidate)| {
            let engine = Arc::clone(&self.engine);
            let weights = Arc::clone(&weights);
            async move {
                let name = candidate.name.clone();
                let version = candidate.version;
                // past the deadline nothing new is started
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    return (index, name, version, None);
                }
                let joined =
                    tokio::task::spawn_blocking(move || engine.verify(&candidate, &weights, computed_at)).await;
                (index, name, version, Some(joined))
            }
        });
        let mut pending = stream::iter(tasks).buffer_unordered(self.concurrency_limit);

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, pending.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!("Batch deadline reached");
                        break;
                    }
                },
                None => pending.next().await,
            };

            let Some((index, name, version, joined)) = next else { break };
            let Some(joined) = joined else { continue };
            slots[index] = Some(match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(candidate = %name, error = %e, "Scoring task failed");
                    VerificationResult::unscored(name, version, VerificationStatus::Rejected, weights.version(), computed_at)
                        .with_flag(flags::SCORING_FAILED)
                }
            });
        }

        let mut timed_out = 0;
        let results: Vec<VerificationResult> = slots
            .into_iter()
            .zip(candidates)
            .map(|(slot, candidate)| {
                slot.unwrap_or_else(|| {
                    timed_out += 1;
                    VerificationResult::unscored(
                        candidate.name.clone(),
                        candidate.version,
                        VerificationStatus::Uncertain,
                        weights.version(),
                        computed_at,
                    )
                    .with_flag(flags::TIMEOUT)
                })
            })
            .collect();

        info!(
            total = results.len(),
            verified = results.iter().filter(|r| r.status == VerificationStatus::Verified).count(),
            timed_out,
            "Batch verified"
        );
        results
    }
}
