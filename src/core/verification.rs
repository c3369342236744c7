//! Authenticity scoring.
//!
//! `VerificationEngine::verify` is a pure function of the candidate, the
//! weight snapshot and the timestamp it is handed. It never panics and never
//! returns an error: every failure mode is expressed as a status plus risk
//! flags on the result.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::consistency::{ConsistencyAnalyzer, ConsistencySettings};
use super::fake_patterns::FakePatternDetector;
use crate::domain::{
    flags, Candidate, SignalScore, SignalType, VerificationResult, VerificationStatus, WeightState,
};

/// Confidence at which a single signal counts as verified
pub const SIGNAL_VERIFIED_CONFIDENCE: f64 = 0.6;

const CONTRIBUTION_WEIGHT: f64 = 0.5;
const CONSISTENCY_WEIGHT: f64 = 0.3;
const CROSS_VALIDATION_WEIGHT: f64 = 0.2;

/// Verified signals below this count raise a flag
const MIN_VERIFIED_SIGNALS: usize = 3;

/// Scores candidates against a weight snapshot
#[derive(Debug, Clone, Default)]
pub struct VerificationEngine {
    detector: FakePatternDetector,
    analyzer: ConsistencyAnalyzer,
}

impl VerificationEngine {
    pub fn new(detector: FakePatternDetector, analyzer: ConsistencyAnalyzer) -> Self {
        Self { detector, analyzer }
    }

    pub fn with_settings(settings: ConsistencySettings) -> Self {
        Self::new(FakePatternDetector::new(), ConsistencyAnalyzer::new(settings))
    }

    pub fn verify(
        &self,
        candidate: &Candidate,
        weights: &WeightState,
        computed_at: DateTime<Utc>,
    ) -> VerificationResult {
        let mut result = VerificationResult::unscored(
            candidate.name.clone(),
            candidate.version,
            VerificationStatus::Rejected,
            weights.version(),
            computed_at,
        );

        let fake = self.detector.check_candidate(candidate);
        if fake.is_fake {
            result.fake_pattern_matched = true;
            result
                .risk_flags
                .extend(fake.matched.iter().map(|label| flags::fake_pattern(label)));
            debug!(candidate = %candidate.name, "Rejected by deny-list");
            return result;
        }

        if candidate.signals().is_empty() {
            return result.with_flag(flags::NO_SIGNALS);
        }

        result.per_signal_scores = candidate
            .signals()
            .iter()
            .map(|signal| SignalScore {
                signal: signal.clone(),
                verified: signal.confidence() >= SIGNAL_VERIFIED_CONFIDENCE,
                score: signal.confidence(),
            })
            .collect();

        let (weighted, weight_total) = result
            .per_signal_scores
            .iter()
            .fold((0.0, 0.0), |(sum, total), s| {
                let w = weights.weight(s.signal.signal_type());
                (sum + s.score * w, total + w)
            });
        let contribution = if weight_total > 0.0 {
            weighted / weight_total
        } else {
            0.0
        };

        let consistency = self.analyzer.analyze(candidate);

        let cross_validated =
            candidate.has_type(SignalType::BatchMembership) && candidate.has_type(SignalType::FundingRound);
        let bonus = if cross_validated { 1.0 } else { 0.0 };

        let composite = (CONTRIBUTION_WEIGHT * contribution
            + CONSISTENCY_WEIGHT * consistency.score
            + CROSS_VALIDATION_WEIGHT * bonus)
            .clamp(0.0, 1.0);

        let thresholds = weights.thresholds();
        result.composite_score = composite;
        result.status = if composite >= thresholds.verified {
            VerificationStatus::Verified
        } else if composite >= thresholds.uncertain {
            VerificationStatus::Uncertain
        } else {
            VerificationStatus::Rejected
        };
        result.authenticity_score = if result.status.is_accepted() { composite } else { 0.0 };

        if result.verified_signal_count() < MIN_VERIFIED_SIGNALS {
            result.risk_flags.insert(flags::FEWER_THAN_3_VERIFIED.to_string());
        }
        if !candidate.declared_metrics.is_complete() {
            result.risk_flags.insert(flags::MISSING_DECLARED_METRICS.to_string());
        }
        if candidate.distinct_sources().len() == 1 {
            result.risk_flags.insert(flags::SINGLE_SOURCE_ONLY.to_string());
        }
        if candidate.signals().iter().any(|s| s.metadata().contains_key("parse_error")) {
            result.risk_flags.insert(flags::PARSE_FAILURE.to_string());
        }
        result
            .risk_flags
            .extend(consistency.violations.iter().map(|rule| flags::implausible(rule)));

        debug!(
            candidate = %candidate.name,
            composite,
            contribution,
            consistency = consistency.score,
            status = %result.status,
            "Candidate scored"
        );

        result
    }
}

/// Apply a collection timeout to an already computed result.
///
/// A timed-out candidate is never rejected on score alone; only a deny-list
/// match keeps it rejected.
pub fn apply_collection_timeout(mut result: VerificationResult) -> VerificationResult {
    result.risk_flags.insert(flags::TIMEOUT.to_string());
    if result.status == VerificationStatus::Rejected && !result.fake_pattern_matched {
        result.status = VerificationStatus::Uncertain;
        result.authenticity_score = result.composite_score;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Metadata, Signal};
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn signal(source: &str, signal_type: SignalType, confidence: f64) -> Signal {
        Signal::new(source, signal_type, "evidence", confidence, at(), Metadata::new())
    }

    fn strong_candidate() -> Candidate {
        Candidate::new("Northwind", signal("accelerator", SignalType::BatchMembership, 1.0))
            .with_signal(signal("registry", SignalType::FundingRound, 1.0))
            .with_signal(signal("social", SignalType::HiringActivity, 0.8))
            .with_metrics(Some(60_000), Some(8))
    }

    #[test]
    fn test_fake_pattern_short_circuits() {
        let engine = VerificationEngine::default();
        let candidate = Candidate::new("智聊AI客服", signal("social", SignalType::BatchMembership, 1.0));

        let result = engine.verify(&candidate, &WeightState::default(), at());
        assert_eq!(result.status, VerificationStatus::Rejected);
        assert_eq!(result.authenticity_score, 0.0);
        assert!(result.fake_pattern_matched);
        assert!(result.has_flag("fake_pattern:known_fabricated_name"));
        assert!(result.per_signal_scores.is_empty());
    }

    #[test]
    fn test_no_signals() {
        let engine = VerificationEngine::default();
        let result = engine.verify(&Candidate::without_signals("Ghost"), &WeightState::default(), at());

        assert_eq!(result.status, VerificationStatus::Rejected);
        assert_eq!(result.authenticity_score, 0.0);
        assert!(result.has_flag(flags::NO_SIGNALS));
        assert!(!result.fake_pattern_matched);
    }

    #[test]
    fn test_strong_candidate_verified() {
        let engine = VerificationEngine::default();
        let result = engine.verify(&strong_candidate(), &WeightState::default(), at());

        assert_eq!(result.status, VerificationStatus::Verified);
        assert!(result.authenticity_score >= 0.7);
        assert_eq!(result.authenticity_score, result.composite_score);
        assert_eq!(result.verified_signal_count(), 3);
        assert!(!result.has_flag(flags::FEWER_THAN_3_VERIFIED));
        assert!(!result.has_flag(flags::SINGLE_SOURCE_ONLY));
        assert!(!result.has_flag(flags::MISSING_DECLARED_METRICS));
    }

    #[test]
    fn test_composite_formula() {
        let engine = VerificationEngine::default();
        let candidate = Candidate::new("Solo", signal("social", SignalType::HiringActivity, 0.6));
        let result = engine.verify(&candidate, &WeightState::default(), at());

        // contribution 0.6, consistency 0.4/3 + 0.3/3 + 0.3, no bonus
        let expected = 0.5 * 0.6 + 0.3 * (0.7 / 3.0 + 0.3);
        assert!((result.composite_score - expected).abs() < 1e-9);
        assert_eq!(result.status, VerificationStatus::Uncertain);
        assert!(result.has_flag(flags::SINGLE_SOURCE_ONLY));
        assert!(result.has_flag(flags::MISSING_DECLARED_METRICS));
        assert!(result.has_flag(flags::FEWER_THAN_3_VERIFIED));
    }

    #[test]
    fn test_low_score_rejected_keeps_composite() {
        let engine = VerificationEngine::default();
        let candidate = Candidate::new("Faint", signal("social", SignalType::Other, 0.1));
        let result = engine.verify(&candidate, &WeightState::default(), at());

        assert_eq!(result.status, VerificationStatus::Rejected);
        assert_eq!(result.authenticity_score, 0.0);
        assert!(result.composite_score > 0.0);
    }

    #[test]
    fn test_weight_version_recorded() {
        let engine = VerificationEngine::default();
        let state = WeightState::default()
            .with_weights(crate::domain::weights::default_signal_weights())
            .unwrap();
        let result = engine.verify(&strong_candidate(), &state, at());
        assert_eq!(result.weight_version, 1);
    }

    #[test]
    fn test_collection_timeout_raises_rejected() {
        let engine = VerificationEngine::default();
        let candidate = Candidate::new("Faint", signal("social", SignalType::Other, 0.1));
        let result = apply_collection_timeout(engine.verify(&candidate, &WeightState::default(), at()));

        assert_eq!(result.status, VerificationStatus::Uncertain);
        assert!(result.has_flag(flags::TIMEOUT));
    }

    #[test]
    fn test_collection_timeout_keeps_fake_rejection() {
        let engine = VerificationEngine::default();
        let candidate = Candidate::new("智聊AI客服", signal("social", SignalType::Other, 0.5));
        let result = apply_collection_timeout(engine.verify(&candidate, &WeightState::default(), at()));

        assert_eq!(result.status, VerificationStatus::Rejected);
        assert!(result.has_flag(flags::TIMEOUT));
    }
}
