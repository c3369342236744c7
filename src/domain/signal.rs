//! Signals: single observed facts about a candidate.
//!
//! A `RawSignal` is what an external collector hands us. A `Signal` is the
//! classified form; its type and confidence are fixed at construction.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form extracted fields (amount, headcount, round, ...)
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Source tag carried by reference fixtures
pub const FALLBACK_SOURCE: &str = "fallback";

/// Category of evidence a signal represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    /// Accelerator / incubator batch membership
    BatchMembership,
    /// Announced funding round
    FundingRound,
    /// Job posts, open roles
    HiringActivity,
    /// Launches and releases
    ProductAnnouncement,
    /// Public repository activity
    CodeActivity,
    /// Anything unclassified
    Other,
}

impl SignalType {
    /// All signal types in canonical order
    pub const ALL: [SignalType; 6] = [
        SignalType::BatchMembership,
        SignalType::FundingRound,
        SignalType::HiringActivity,
        SignalType::ProductAnnouncement,
        SignalType::CodeActivity,
        SignalType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::BatchMembership => "batch_membership",
            SignalType::FundingRound => "funding_round",
            SignalType::HiringActivity => "hiring_activity",
            SignalType::ProductAnnouncement => "product_announcement",
            SignalType::CodeActivity => "code_activity",
            SignalType::Other => "other",
        }
    }

    /// Parse from the snake_case name used in config and logs
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unclassified record from the ingestion boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSignal {
    /// Origin identifier ("social", "registry", "listing", ...)
    pub source: String,

    /// Raw text as collected
    pub text: String,

    /// Fields the collector already extracted
    #[serde(default)]
    pub metadata: Metadata,

    /// When the collector observed it
    pub timestamp: DateTime<Utc>,
}

impl RawSignal {
    pub fn new(source: impl Into<String>, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
            metadata: Metadata::new(),
            timestamp,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// A classified signal.
///
/// Fields are private so that content and confidence cannot change after
/// classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    source: String,
    signal_type: SignalType,
    content: String,
    confidence: f64,
    observed_at: DateTime<Utc>,
    #[serde(default)]
    metadata: Metadata,
}

impl Signal {
    pub fn new(
        source: impl Into<String>,
        signal_type: SignalType,
        content: impl Into<String>,
        confidence: f64,
        observed_at: DateTime<Utc>,
        metadata: Metadata,
    ) -> Self {
        Self {
            source: source.into(),
            signal_type,
            content: content.into(),
            confidence: confidence.clamp(0.0, 1.0),
            observed_at,
            metadata,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn signal_type(&self) -> SignalType {
        self.signal_type
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Numeric metadata value, if present and numeric
    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(|v| v.as_f64())
    }

    /// String metadata value, if present
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    pub fn is_fallback(&self) -> bool {
        self.source == FALLBACK_SOURCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_type_names_round_trip() {
        for t in SignalType::ALL {
            assert_eq!(SignalType::parse(t.as_str()), Some(t));
        }
        assert_eq!(SignalType::parse("unknown"), None);
    }

    #[test]
    fn test_signal_type_serializes_snake_case() {
        let json = serde_json::to_string(&SignalType::FundingRound).unwrap();
        assert_eq!(json, "\"funding_round\"");
    }

    #[test]
    fn test_confidence_is_clamped() {
        let signal = Signal::new(
            "social",
            SignalType::Other,
            "text",
            1.7,
            Utc::now(),
            Metadata::new(),
        );
        assert_eq!(signal.confidence(), 1.0);
    }

    #[test]
    fn test_metadata_accessors() {
        let mut metadata = Metadata::new();
        metadata.insert("amount_usd".to_string(), serde_json::json!(5_000_000.0));
        metadata.insert("round".to_string(), serde_json::json!("seed"));

        let signal = Signal::new("registry", SignalType::FundingRound, "x", 0.8, Utc::now(), metadata);
        assert_eq!(signal.metadata_f64("amount_usd"), Some(5_000_000.0));
        assert_eq!(signal.metadata_str("round"), Some("seed"));
        assert_eq!(signal.metadata_f64("round"), None);
    }
}
