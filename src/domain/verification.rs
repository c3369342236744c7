//! Output of one verification pass over a candidate.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::signal::Signal;

/// Risk flags surfaced for human review
pub mod flags {
    pub const NO_SIGNALS: &str = "no_signals";
    pub const FEWER_THAN_3_VERIFIED: &str = "fewer_than_3_verified_signals";
    pub const MISSING_DECLARED_METRICS: &str = "missing_declared_metrics";
    pub const SINGLE_SOURCE_ONLY: &str = "single_source_only";
    pub const TIMEOUT: &str = "timeout";
    pub const FALLBACK_REFERENCE: &str = "fallback_reference";
    pub const AUDIT_WRITE_FAILED: &str = "audit_write_failed";
    pub const PARSE_FAILURE: &str = "parse_failure";
    pub const SCORING_FAILED: &str = "scoring_failed";

    pub fn fake_pattern(label: &str) -> String {
        format!("fake_pattern:{}", label)
    }

    pub fn collection_failed(source: &str) -> String {
        format!("collection_failed:{}", source)
    }

    pub fn implausible(rule: &str) -> String {
        format!("implausible:{}", rule)
    }
}

/// Verification decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Rejected,
    Uncertain,
    Verified,
}

impl VerificationStatus {
    /// Verified or Uncertain
    pub fn is_accepted(&self) -> bool {
        !matches!(self, VerificationStatus::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Rejected => "rejected",
            VerificationStatus::Uncertain => "uncertain",
            VerificationStatus::Verified => "verified",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "rejected" => Some(VerificationStatus::Rejected),
            "uncertain" => Some(VerificationStatus::Uncertain),
            "verified" => Some(VerificationStatus::Verified),
            _ => None,
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-signal outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalScore {
    pub signal: Signal,
    pub verified: bool,
    pub score: f64,
}

/// Result of verifying one candidate version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub candidate_name: String,

    pub candidate_version: u32,

    /// Decision score: zero for every rejection
    pub authenticity_score: f64,

    /// Composite before the status decision
    pub composite_score: f64,

    pub status: VerificationStatus,

    pub per_signal_scores: Vec<SignalScore>,

    pub risk_flags: BTreeSet<String>,

    pub fake_pattern_matched: bool,

    /// WeightState version the score was computed under
    pub weight_version: u64,

    pub computed_at: DateTime<Utc>,
}

impl VerificationResult {
    /// A result for a candidate that was never scored
    pub fn unscored(
        candidate_name: impl Into<String>,
        candidate_version: u32,
        status: VerificationStatus,
        weight_version: u64,
        computed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            candidate_name: candidate_name.into(),
            candidate_version,
            authenticity_score: 0.0,
            composite_score: 0.0,
            status,
            per_signal_scores: Vec::new(),
            risk_flags: BTreeSet::new(),
            fake_pattern_matched: false,
            weight_version,
            computed_at,
        }
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.risk_flags.insert(flag.into());
        self
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.risk_flags.contains(flag)
    }

    pub fn signals(&self) -> impl Iterator<Item = &Signal> {
        self.per_signal_scores.iter().map(|s| &s.signal)
    }

    /// True when every signal behind this result came from fixtures
    pub fn is_fallback(&self) -> bool {
        !self.per_signal_scores.is_empty() && self.signals().all(|s| s.is_fallback())
    }

    pub fn verified_signal_count(&self) -> usize {
        self.per_signal_scores.iter().filter(|s| s.verified).count()
    }
}
