//! Candidate: the aggregate of signals about one entity.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::signal::{Signal, SignalType};

/// Metrics declared by the caller (never inferred from signals)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclaredMetrics {
    /// Estimated monthly recurring revenue
    #[serde(default)]
    pub estimated_mrr: Option<i64>,

    /// Team headcount
    #[serde(default)]
    pub team_size: Option<u32>,
}

impl DeclaredMetrics {
    pub fn is_complete(&self) -> bool {
        self.estimated_mrr.is_some() && self.team_size.is_some()
    }
}

/// A candidate company under evaluation.
///
/// Signals are append-only and kept in discovery order. Once a candidate
/// has been verified, further evidence goes into `next_version()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Identity key
    pub name: String,

    /// Version, bumped on every re-verification
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    signals: Vec<Signal>,

    #[serde(default)]
    pub declared_metrics: DeclaredMetrics,
}

fn default_version() -> u32 {
    1
}

impl Candidate {
    /// Create a candidate from its first signal
    pub fn new(name: impl Into<String>, first_signal: Signal) -> Self {
        Self {
            name: name.into(),
            version: 1,
            signals: vec![first_signal],
            declared_metrics: DeclaredMetrics::default(),
        }
    }

    /// Create a candidate that has no evidence yet
    pub fn without_signals(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 1,
            signals: Vec::new(),
            declared_metrics: DeclaredMetrics::default(),
        }
    }

    pub fn with_metrics(mut self, estimated_mrr: Option<i64>, team_size: Option<u32>) -> Self {
        self.declared_metrics = DeclaredMetrics {
            estimated_mrr,
            team_size,
        };
        self
    }

    /// Append a signal (discovery order)
    pub fn push_signal(&mut self, signal: Signal) {
        self.signals.push(signal);
    }

    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.push_signal(signal);
        self
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// A copy for re-verification; the current version stays untouched
    pub fn next_version(&self) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next
    }

    pub fn distinct_sources(&self) -> BTreeSet<&str> {
        self.signals.iter().map(|s| s.source()).collect()
    }

    pub fn distinct_types(&self) -> BTreeSet<SignalType> {
        self.signals.iter().map(|s| s.signal_type()).collect()
    }

    pub fn has_type(&self, signal_type: SignalType) -> bool {
        self.signals.iter().any(|s| s.signal_type() == signal_type)
    }

    /// All signal text joined, used for deny-list scanning
    pub fn combined_text(&self) -> String {
        self.signals
            .iter()
            .map(|s| s.content())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
