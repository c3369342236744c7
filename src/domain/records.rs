//! Append-only audit records.
//!
//! Two logical tables: `decision_records` and `weight_evolution`. Rows are
//! only ever appended; feedback arrives as a new decision row that repeats
//! the scored decision with `feedback_score` set.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::signal::SignalType;
use super::verification::{VerificationResult, VerificationStatus};
use super::weights::WeightState;

/// One scoring decision (or later feedback on it)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub candidate_name: String,

    pub weight_version: u64,

    pub authenticity_score: f64,

    pub status: VerificationStatus,

    /// Outcome feedback, if any has been given
    #[serde(default)]
    pub feedback_score: Option<f64>,

    pub timestamp: DateTime<Utc>,

    /// Signal types present in the scored candidate
    #[serde(default)]
    pub signal_types: Vec<SignalType>,

    /// Weights in force when the decision was made
    #[serde(default)]
    pub weights: BTreeMap<SignalType, f64>,
}

impl DecisionRecord {
    /// Record a verification outcome under the weights that produced it
    pub fn from_result(result: &VerificationResult, weights: &WeightState) -> Self {
        let mut signal_types: Vec<SignalType> = result.signals().map(|s| s.signal_type()).collect();
        signal_types.sort();
        signal_types.dedup();

        Self {
            candidate_name: result.candidate_name.clone(),
            weight_version: result.weight_version,
            authenticity_score: result.authenticity_score,
            status: result.status,
            feedback_score: None,
            timestamp: result.computed_at,
            signal_types,
            weights: weights.signal_weights().clone(),
        }
    }

    /// A follow-up row carrying feedback for this decision
    pub fn with_feedback(&self, feedback_score: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            feedback_score: Some(feedback_score.clamp(0.0, 1.0)),
            timestamp,
            ..self.clone()
        }
    }
}

/// One parameter change made by weight evolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightMutation {
    /// Signal type whose weight changed
    pub parameter: SignalType,

    pub old_value: f64,

    pub new_value: f64,

    /// Why the change was made (trend, best-seen target)
    pub trigger: String,

    /// WeightState version produced by this change
    pub version: u64,

    pub timestamp: DateTime<Utc>,
}
