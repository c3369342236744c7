//! dealscout - Multi-source signal verification and adaptive scoring
//!
//! Collects evidence about candidate companies from independent sources,
//! rejects known fake patterns, checks cross-signal consistency, and scores
//! authenticity under versioned weights that adapt to outcome feedback.
//!
//! # Architecture
//!
//! - Every decision and weight change is appended to an audit log
//! - Current weights are derived by replaying logged mutations
//! - A batch is scored under one weight snapshot, so results are
//!   reproducible from (candidate, weight version)
//!
//! # Modules
//!
//! - `adapters`: Signal sources (JSONL exports, HTTP collectors)
//! - `core`: Scoring, evolution, fallback, projection and orchestration
//! - `domain`: Data structures (Signal, Candidate, VerificationResult, WeightState)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Discover over a list of candidates
//! dealscout run seeds.yaml
//!
//! # Score ad-hoc evidence
//! dealscout verify "Acme" -s "yc=Acme (YC W24)" -s "news=Acme raised \$2M Seed"
//!
//! # Feed outcomes back and adapt weights
//! dealscout feedback "Acme" 0.8
//! dealscout evolve
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{SignalSource, SourceRegistry};
pub use core::{BatchVerifier, Discovery, VerificationEngine, WeightEvolutionTracker, WeightStore};
pub use domain::{Candidate, Signal, SignalType, VerificationResult, VerificationStatus, WeightState};
