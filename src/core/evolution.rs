//! Feedback-driven weight evolution.
//!
//! Decisions that received feedback are kept in a bounded window per
//! signal type. `analyze` fits a least-squares trend to authenticity over
//! each window; a declining type has its weight nudged toward the value it
//! held in the best-rated decisions, then all weights are renormalized.
//!
//! Every committed change is a compare-and-swap on the `WeightStore`
//! version. A lost race re-plans against the new state, up to
//! `max_commit_attempts` times.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::weight_store::{WeightStore, WeightStoreError};
use crate::domain::weights::normalize;
use crate::domain::{DecisionRecord, SignalType, WeightMutation, WeightState, MAX_WEIGHT, MIN_WEIGHT};

/// Mutation eligibility of one signal type's weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeightPhase {
    /// Never mutated
    #[default]
    Stable,
    /// Mutated, still away from the best-seen value
    Exploring,
    /// Within epsilon of the best-seen value
    Converged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionSettings {
    /// Feedback records kept per signal type
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Records needed before a trend is computed
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Slope below the negative of this triggers a nudge
    #[serde(default = "default_trend_threshold")]
    pub trend_threshold: f64,

    /// Best-rated records averaged for the best-seen weight
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Fraction of the gap closed per nudge, in (0, 1]
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,

    #[serde(default = "default_convergence_epsilon")]
    pub convergence_epsilon: f64,

    #[serde(default = "default_max_commit_attempts")]
    pub max_commit_attempts: u32,
}

fn default_window_size() -> usize {
    100
}
fn default_min_samples() -> usize {
    5
}
fn default_trend_threshold() -> f64 {
    0.001
}
fn default_top_k() -> usize {
    5
}
fn default_mutation_rate() -> f64 {
    0.1
}
fn default_convergence_epsilon() -> f64 {
    0.005
}
fn default_max_commit_attempts() -> u32 {
    3
}

impl Default for EvolutionSettings {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            min_samples: default_min_samples(),
            trend_threshold: default_trend_threshold(),
            top_k: default_top_k(),
            mutation_rate: default_mutation_rate(),
            convergence_epsilon: default_convergence_epsilon(),
            max_commit_attempts: default_max_commit_attempts(),
        }
    }
}

/// Least-squares slope of `values` over their index
pub fn trend_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let n_f = n as f64;
    let x_mean = (n_f - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n_f;

    let (num, den) = values.iter().enumerate().fold((0.0, 0.0), |(num, den), (i, y)| {
        let dx = i as f64 - x_mean;
        (num + dx * (y - y_mean), den + dx * dx)
    });

    Some(num / den)
}

/// One type's planned nudge
#[derive(Debug, Clone)]
struct Nudge {
    signal_type: SignalType,
    slope: f64,
    best_seen: f64,
    gap: f64,
}

#[derive(Debug, Default)]
struct Plan {
    nudges: Vec<Nudge>,
    converged: Vec<SignalType>,
}

/// Tracks feedback and evolves weights in a `WeightStore`
#[derive(Debug)]
pub struct WeightEvolutionTracker {
    settings: EvolutionSettings,
    store: Arc<WeightStore>,
    windows: Mutex<BTreeMap<SignalType, VecDeque<DecisionRecord>>>,
    phases: Mutex<BTreeMap<SignalType, WeightPhase>>,
}

impl WeightEvolutionTracker {
    pub fn new(store: Arc<WeightStore>, settings: EvolutionSettings) -> Self {
        let phases = SignalType::ALL.iter().map(|t| (*t, WeightPhase::Stable)).collect();
        Self {
            settings,
            store,
            windows: Mutex::new(BTreeMap::new()),
            phases: Mutex::new(phases),
        }
    }

    pub fn store(&self) -> &Arc<WeightStore> {
        &self.store
    }

    pub fn settings(&self) -> &EvolutionSettings {
        &self.settings
    }

    /// Add a decision; only rows with feedback join the windows
    pub fn record(&self, record: &DecisionRecord) {
        if record.feedback_score.is_none() {
            return;
        }
        let mut windows = self.windows.lock();
        for signal_type in &record.signal_types {
            let window = windows.entry(*signal_type).or_default();
            window.push_back(record.clone());
            while window.len() > self.settings.window_size {
                window.pop_front();
            }
        }
    }

    /// Feed persisted decisions, oldest first
    pub fn ingest<'a>(&self, records: impl IntoIterator<Item = &'a DecisionRecord>) {
        for record in records {
            self.record(record);
        }
    }

    /// Mark types named in persisted mutations as explored
    pub fn restore_phases(&self, history: &[WeightMutation]) {
        let mut phases = self.phases.lock();
        for mutation in history {
            phases.insert(mutation.parameter, WeightPhase::Exploring);
        }
    }

    pub fn window_len(&self, signal_type: SignalType) -> usize {
        self.windows.lock().get(&signal_type).map_or(0, VecDeque::len)
    }

    pub fn phase(&self, signal_type: SignalType) -> WeightPhase {
        self.phases.lock().get(&signal_type).copied().unwrap_or_default()
    }

    pub fn phases(&self) -> BTreeMap<SignalType, WeightPhase> {
        self.phases.lock().clone()
    }

    /// Run one evolution step; returns the mutations that were committed
    #[instrument(skip(self))]
    pub fn analyze(&self, now: DateTime<Utc>) -> Result<Vec<WeightMutation>, WeightStoreError> {
        let mut attempt = 1;
        loop {
            let current = self.store.snapshot();
            let plan = self.plan(&current);

            {
                let mut phases = self.phases.lock();
                for signal_type in &plan.converged {
                    phases.insert(*signal_type, WeightPhase::Converged);
                }
            }

            if plan.nudges.is_empty() {
                debug!(version = current.version(), "No weight change warranted");
                return Ok(Vec::new());
            }

            let Some(weights) = self.apply(&current, &plan) else {
                return Ok(Vec::new());
            };
            let next = current.with_weights(weights)?;

            match self.store.compare_and_swap(current.version(), next) {
                Ok(committed) => {
                    let mutations = self.mutations(&current, &committed, &plan, now);
                    let mut phases = self.phases.lock();
                    for nudge in &plan.nudges {
                        phases.insert(nudge.signal_type, WeightPhase::Exploring);
                    }
                    info!(
                        version = committed.version(),
                        changed = mutations.len(),
                        "Weights evolved"
                    );
                    return Ok(mutations);
                }
                Err(e @ WeightStoreError::Conflict { .. }) if attempt < self.settings.max_commit_attempts => {
                    debug!(attempt, error = %e, "Retrying weight commit against latest state");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn plan(&self, current: &WeightState) -> Plan {
        let windows = self.windows.lock();
        let mut plan = Plan::default();

        for (signal_type, window) in windows.iter() {
            if window.len() < self.settings.min_samples {
                continue;
            }
            let scores: Vec<f64> = window.iter().map(|r| r.authenticity_score).collect();
            let Some(slope) = trend_slope(&scores) else { continue };
            if slope >= -self.settings.trend_threshold {
                continue;
            }
            let Some(best_seen) = self.best_seen(*signal_type, window) else { continue };

            let gap = best_seen - current.weight(*signal_type);
            if gap.abs() < self.settings.convergence_epsilon {
                plan.converged.push(*signal_type);
                continue;
            }

            plan.nudges.push(Nudge {
                signal_type: *signal_type,
                slope,
                best_seen,
                gap,
            });
        }

        plan
    }

    /// Mean weight of `signal_type` across the top-k decisions by feedback
    fn best_seen(&self, signal_type: SignalType, window: &VecDeque<DecisionRecord>) -> Option<f64> {
        let mut rated: Vec<&DecisionRecord> = window
            .iter()
            .filter(|r| r.feedback_score.is_some() && r.weights.contains_key(&signal_type))
            .collect();
        // Highest feedback first; earlier decisions win ties
        rated.sort_by(|a, b| {
            b.feedback_score
                .partial_cmp(&a.feedback_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.timestamp.cmp(&b.timestamp))
        });

        let top: Vec<f64> = rated
            .iter()
            .take(self.settings.top_k.max(1))
            .filter_map(|r| r.weights.get(&signal_type).copied())
            .collect();
        if top.is_empty() {
            return None;
        }
        Some(top.iter().sum::<f64>() / top.len() as f64)
    }

    fn apply(&self, current: &WeightState, plan: &Plan) -> Option<BTreeMap<SignalType, f64>> {
        let mut weights = current.signal_weights().clone();
        for nudge in &plan.nudges {
            if let Some(value) = weights.get_mut(&nudge.signal_type) {
                *value += self.settings.mutation_rate * nudge.gap;
            }
        }
        normalize(&mut weights);

        if let Some((signal_type, value)) = weights
            .iter()
            .find(|(_, v)| !(MIN_WEIGHT..=MAX_WEIGHT).contains(*v))
        {
            warn!(%signal_type, value, "Evolved weight out of bounds, mutation skipped");
            return None;
        }
        Some(weights)
    }

    fn mutations(
        &self,
        before: &WeightState,
        after: &WeightState,
        plan: &Plan,
        now: DateTime<Utc>,
    ) -> Vec<WeightMutation> {
        let nudged: BTreeMap<SignalType, &Nudge> = plan.nudges.iter().map(|n| (n.signal_type, n)).collect();
        let nudged_names: Vec<&str> = plan.nudges.iter().map(|n| n.signal_type.as_str()).collect();

        after
            .signal_weights()
            .iter()
            .filter_map(|(signal_type, new_value)| {
                let old_value = before.weight(*signal_type);
                if old_value == *new_value {
                    return None;
                }
                let trigger = match nudged.get(signal_type) {
                    Some(n) => format!(
                        "trend slope {:.4} below -{}, best-seen {:.4}, gap {:.4}",
                        n.slope, self.settings.trend_threshold, n.best_seen, n.gap
                    ),
                    None => format!("renormalized after nudging {}", nudged_names.join(",")),
                };
                Some(WeightMutation {
                    parameter: *signal_type,
                    old_value,
                    new_value: *new_value,
                    trigger,
                    version: after.version(),
                    timestamp: now,
                })
            })
            .collect()
    }
}
