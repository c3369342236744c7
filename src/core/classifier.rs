//! Signal classification.
//!
//! An ordered table of (regex, signal type, base confidence) entries is
//! matched against the raw text; the first match wins. Classification is a
//! pure function of its input so audits can reproduce any score.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::domain::{Metadata, RawSignal, Signal, SignalType};

/// Confidence for text that matched no rule
pub const UNMATCHED_CONFIDENCE: f64 = 0.3;

/// Confidence for malformed input
pub const PARSE_FAILURE_CONFIDENCE: f64 = 0.1;

/// Bonus when the candidate name appears verbatim in the text
pub const NAME_CONSISTENCY_BONUS: f64 = 0.2;

/// Longest text accepted as a signal
pub const MAX_SIGNAL_BYTES: usize = 16 * 1024;

static BATCH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:y\s?combinator|yc\s*\(?[wsfx]\d{2}\)?|techstars|500\s?startups|accelerator\s+batch|demo\s+day)")
        .expect("batch regex")
});

static FUNDING_ROUND_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$\d+(?:\.\d+)?[MK]?\s*(?:Series\s*[ABC]|Seed|Pre-seed)").expect("funding regex")
});

static FUNDING_RAISED_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:raised|closes?|secured)\s+(?:a\s+)?\$\d+(?:\.\d+)?\s*[MKB]?").expect("raised regex")
});

static HIRING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:we'?re\s+hiring|hiring|join\s+our\s+team|open\s+roles?|job\s+openings?)\b|招聘")
        .expect("hiring regex")
});

static PRODUCT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:launch(?:ed|es|ing)?|product\s+hunt|released|now\s+available|public\s+beta)\b|发布|上线")
        .expect("product regex")
});

static CODE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)github\.com/|\b\d+\s*(?:stars|commits|contributors)\b|\bopen[- ]sourced?\b")
        .expect("code regex")
});

static AMOUNT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$(\d+(?:\.\d+)?)\s*([MKB])?").expect("amount regex")
});

static ROUND_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(pre-?seed|seed|series\s*[abc])\b").expect("round regex")
});

static HEADCOUNT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:hiring\s+(\d{1,4})\b|\b(\d{1,4})\s+(?:open\s+)?(?:roles|positions|engineers))")
        .expect("headcount regex")
});

/// One row of the classification table
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pub pattern: Regex,
    pub signal_type: SignalType,
    pub base_confidence: f64,
}

impl ClassificationRule {
    pub fn new(pattern: Regex, signal_type: SignalType, base_confidence: f64) -> Self {
        Self {
            pattern,
            signal_type,
            base_confidence: base_confidence.clamp(0.0, 1.0),
        }
    }
}

/// Maps raw signals to typed, confidence-scored signals
#[derive(Debug, Clone)]
pub struct SignalClassifier {
    rules: Vec<ClassificationRule>,
}

impl Default for SignalClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalClassifier {
    /// Classifier with the default table
    pub fn new() -> Self {
        Self::with_rules(default_rules())
    }

    /// Classifier with a custom table (evaluated in order)
    pub fn with_rules(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// Classify a raw signal for the named candidate
    pub fn classify(&self, raw: &RawSignal, candidate_name: Option<&str>) -> Signal {
        if let Some(reason) = malformed_reason(&raw.text) {
            debug!(source = %raw.source, reason, "Malformed signal, classifying as other");
            let mut metadata = raw.metadata.clone();
            metadata.insert("parse_error".to_string(), serde_json::json!(reason));
            return Signal::new(
                raw.source.clone(),
                SignalType::Other,
                raw.text.clone(),
                PARSE_FAILURE_CONFIDENCE,
                raw.timestamp,
                metadata,
            );
        }

        let (signal_type, base) = self
            .rules
            .iter()
            .find(|rule| rule.pattern.is_match(&raw.text))
            .map(|rule| (rule.signal_type, rule.base_confidence))
            .unwrap_or((SignalType::Other, UNMATCHED_CONFIDENCE));

        let confidence = match candidate_name {
            Some(name) if !name.is_empty() && raw.text.contains(name) => {
                (base + NAME_CONSISTENCY_BONUS).min(1.0)
            }
            _ => base,
        };

        // Caller-supplied fields take precedence over extracted ones
        let mut metadata = extract_metadata(signal_type, &raw.text);
        metadata.extend(raw.metadata.clone());

        Signal::new(
            raw.source.clone(),
            signal_type,
            raw.text.clone(),
            confidence,
            raw.timestamp,
            metadata,
        )
    }
}

/// The default classification table
pub fn default_rules() -> Vec<ClassificationRule> {
    vec![
        ClassificationRule::new(BATCH_REGEX.clone(), SignalType::BatchMembership, 0.9),
        ClassificationRule::new(FUNDING_ROUND_REGEX.clone(), SignalType::FundingRound, 0.8),
        ClassificationRule::new(FUNDING_RAISED_REGEX.clone(), SignalType::FundingRound, 0.75),
        ClassificationRule::new(HIRING_REGEX.clone(), SignalType::HiringActivity, 0.6),
        ClassificationRule::new(PRODUCT_REGEX.clone(), SignalType::ProductAnnouncement, 0.7),
        ClassificationRule::new(CODE_REGEX.clone(), SignalType::CodeActivity, 0.7),
    ]
}

fn malformed_reason(text: &str) -> Option<&'static str> {
    if text.trim().is_empty() {
        Some("empty")
    } else if text.len() > MAX_SIGNAL_BYTES {
        Some("too_long")
    } else if text.contains('\0') {
        Some("nul_byte")
    } else {
        None
    }
}

fn extract_metadata(signal_type: SignalType, text: &str) -> Metadata {
    let mut metadata = Metadata::new();

    match signal_type {
        SignalType::FundingRound => {
            if let Some(amount) = parse_amount(text) {
                metadata.insert("amount_usd".to_string(), serde_json::json!(amount));
            }
            if let Some(round) = parse_round(text) {
                metadata.insert("round".to_string(), serde_json::json!(round));
            }
        }
        SignalType::HiringActivity => {
            if let Some(headcount) = parse_headcount(text) {
                metadata.insert("headcount".to_string(), serde_json::json!(headcount));
            }
        }
        _ => {}
    }

    metadata
}

/// Parse the first dollar amount ("$5M", "$2.5K") into a number
pub fn parse_amount(text: &str) -> Option<f64> {
    let caps = AMOUNT_REGEX.captures(text)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2).map(|m| m.as_str().to_ascii_uppercase());
    let multiplier = match unit.as_deref() {
        Some("K") => 1e3,
        Some("M") => 1e6,
        Some("B") => 1e9,
        _ => 1.0,
    };
    Some(value * multiplier)
}

/// Normalized round name: pre_seed, seed, series_a, series_b, series_c
pub fn parse_round(text: &str) -> Option<String> {
    let caps = ROUND_REGEX.captures(text)?;
    let raw = caps.get(1)?.as_str().to_ascii_lowercase();
    let compact: String = raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect();

    let round = match compact.as_str() {
        "preseed" => "pre_seed",
        "seed" => "seed",
        "seriesa" => "series_a",
        "seriesb" => "series_b",
        "seriesc" => "series_c",
        _ => return None,
    };
    Some(round.to_string())
}

fn parse_headcount(text: &str) -> Option<u64> {
    let caps = HEADCOUNT_REGEX.captures(text)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .and_then(|m| m.as_str().parse().ok())
}
