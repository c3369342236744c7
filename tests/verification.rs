//! Verification Integration Tests
//!
//! Scoring determinism, deny-list rejection, and score monotonicity.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use dealscout::core::{BatchVerifier, Clock, VerificationEngine};
use dealscout::domain::{flags, Candidate, Metadata, Signal, SignalType, VerificationStatus, WeightState};

fn at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
}

fn signal(source: &str, signal_type: SignalType, text: &str, confidence: f64) -> Signal {
    Signal::new(source, signal_type, text, confidence, at(), Metadata::new())
}

fn strong(name: &str) -> Candidate {
    Candidate::new(name, signal("yc", SignalType::BatchMembership, "YC W24", 0.9))
        .with_signal(signal("news", SignalType::FundingRound, "raised $2M Seed", 0.8))
        .with_signal(signal("jobs", SignalType::HiringActivity, "hiring engineers", 0.7))
        .with_signal(signal("producthunt", SignalType::ProductAnnouncement, "launched", 0.7))
        .with_metrics(Some(30_000), Some(6))
}

fn weak(name: &str) -> Candidate {
    Candidate::new(name, signal("social", SignalType::HiringActivity, "hiring", 0.7))
}

fn verifier() -> BatchVerifier {
    BatchVerifier::new(Arc::new(VerificationEngine::default()), 4).with_clock(Clock::Fixed(at()))
}

#[test]
fn test_strong_candidate_is_verified() {
    let result = VerificationEngine::default().verify(&strong("Acme"), &WeightState::default(), at());

    assert_eq!(result.status, VerificationStatus::Verified);
    // 0.5 * 0.635 / 0.8 + 0.3 * 1.0 + 0.2
    assert!((result.authenticity_score - 0.896875).abs() < 1e-9);
    assert!(result.risk_flags.is_empty(), "unexpected flags {:?}", result.risk_flags);
    assert_eq!(result.weight_version, 0);
    assert_eq!(result.computed_at, at());
}

#[test]
fn test_known_fabricated_name_rejected() {
    let result = VerificationEngine::default().verify(&strong("智聊AI客服"), &WeightState::default(), at());

    assert_eq!(result.status, VerificationStatus::Rejected);
    assert_eq!(result.authenticity_score, 0.0);
    assert!(result.fake_pattern_matched);
    assert!(result.has_flag("fake_pattern:known_fabricated_name"));
}

#[test]
fn test_fabricated_name_in_signal_text_rejected() {
    let candidate = strong("Acme").with_signal(signal("social", SignalType::Other, "Acme partners with 智聊AI客服", 0.9));
    let result = VerificationEngine::default().verify(&candidate, &WeightState::default(), at());

    assert_eq!(result.status, VerificationStatus::Rejected);
    assert!(result.fake_pattern_matched);
}

#[test]
fn test_no_signals_rejected() {
    let result = VerificationEngine::default().verify(&Candidate::without_signals("Empty"), &WeightState::default(), at());

    assert_eq!(result.status, VerificationStatus::Rejected);
    assert_eq!(result.authenticity_score, 0.0);
    assert!(result.has_flag(flags::NO_SIGNALS));
}

#[test]
fn test_new_full_confidence_type_never_lowers_score() {
    let engine = VerificationEngine::default();
    let weights = WeightState::default();

    let base = weak("Acme");
    let before = engine.verify(&base, &weights, at());
    assert_eq!(before.status, VerificationStatus::Uncertain);

    let mut current = base;
    let mut previous = before.composite_score;
    for (source, signal_type) in [
        ("producthunt", SignalType::ProductAnnouncement),
        ("github", SignalType::CodeActivity),
        ("news", SignalType::FundingRound),
        ("yc", SignalType::BatchMembership),
    ] {
        current = current.with_signal(signal(source, signal_type, "evidence", 1.0));
        let score = engine.verify(&current, &weights, at()).composite_score;
        assert!(score >= previous, "{} lowered score {} -> {}", signal_type, previous, score);
        previous = score;
    }
}

#[test]
fn test_partial_confidence_type_can_lower_saturated_score() {
    let engine = VerificationEngine::default();
    let weights = WeightState::default();

    let saturated = Candidate::new("Acme", signal("yc", SignalType::BatchMembership, "YC W24", 1.0))
        .with_signal(signal("news", SignalType::FundingRound, "raised $2M Seed", 1.0))
        .with_signal(signal("jobs", SignalType::HiringActivity, "hiring engineers", 1.0))
        .with_metrics(Some(30_000), Some(6));
    let before = engine.verify(&saturated, &weights, at());
    assert!((before.composite_score - 1.0).abs() < 1e-9);

    // monotonicity holds only for full-confidence additions; a signal at the
    // verified floor dilutes the weighted contribution to 0.74 / 0.80
    let diluted = saturated.with_signal(signal("producthunt", SignalType::ProductAnnouncement, "launched", 0.6));
    let after = engine.verify(&diluted, &weights, at());
    assert!((after.composite_score - 0.9625).abs() < 1e-9);
    assert!(after.composite_score < before.composite_score);
    assert_eq!(after.status, VerificationStatus::Verified);
}

#[test]
fn test_weak_single_source_flags() {
    let result = VerificationEngine::default().verify(&weak("Acme"), &WeightState::default(), at());

    assert!(result.has_flag(flags::FEWER_THAN_3_VERIFIED));
    assert!(result.has_flag(flags::MISSING_DECLARED_METRICS));
    assert!(result.has_flag(flags::SINGLE_SOURCE_ONLY));
}

#[test]
fn test_implausible_revenue_per_head_flagged() {
    let candidate = strong("Acme").with_metrics(Some(10_000_000), Some(2));
    let result = VerificationEngine::default().verify(&candidate, &WeightState::default(), at());

    assert!(result.has_flag("implausible:mrr_per_head_band"));
    assert!(result.composite_score < 0.896875);
}

#[tokio::test]
async fn test_batch_is_deterministic_under_fixed_clock() {
    let candidates: Vec<Candidate> = (0..12)
        .map(|i| if i % 3 == 0 { weak(&format!("c{}", i)) } else { strong(&format!("c{}", i)) })
        .collect();
    let weights = Arc::new(WeightState::default());

    let first = verifier().verify_batch(&candidates, Arc::clone(&weights)).await;
    let second = verifier().verify_batch(&candidates, Arc::clone(&weights)).await;
    assert_eq!(first, second);

    // Same candidate scores the same regardless of position or concurrency
    let mut reversed = candidates.clone();
    reversed.reverse();
    let serial = BatchVerifier::new(Arc::new(VerificationEngine::default()), 1).with_clock(Clock::Fixed(at()));
    let mut third = serial.verify_batch(&reversed, weights).await;
    third.reverse();
    assert_eq!(first, third);
}

#[tokio::test]
async fn test_batch_matches_single_verification() {
    let engine = VerificationEngine::default();
    let weights = WeightState::default();
    let candidates = vec![strong("Acme"), weak("Globex"), strong("智聊AI客服")];

    let batch = verifier().verify_batch(&candidates, Arc::new(weights.clone())).await;
    for (candidate, result) in candidates.iter().zip(&batch) {
        assert_eq!(result, &engine.verify(candidate, &weights, at()));
    }
}
