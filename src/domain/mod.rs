//! Domain types for the discovery engine.
//!
//! This module contains the core data structures:
//! - Signal: one classified piece of evidence
//! - Candidate: the signals gathered about one entity
//! - VerificationResult: the outcome of scoring a candidate
//! - WeightState: versioned signal weights and thresholds
//! - Records: append-only audit rows

pub mod candidate;
pub mod records;
pub mod signal;
pub mod verification;
pub mod weights;

// Re-export commonly used types
pub use candidate::{Candidate, DeclaredMetrics};
pub use records::{DecisionRecord, WeightMutation};
pub use signal::{Metadata, RawSignal, Signal, SignalType, FALLBACK_SOURCE};
pub use verification::{flags, SignalScore, VerificationResult, VerificationStatus};
pub use weights::{InvalidWeights, Thresholds, WeightState, MAX_WEIGHT, MIN_WEIGHT};
