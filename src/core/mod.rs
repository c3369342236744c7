//! Core scoring and orchestration logic.
//!
//! This module contains:
//! - Classifier: raw text to typed signals
//! - FakePatternDetector and ConsistencyAnalyzer: authenticity checks
//! - VerificationEngine and BatchVerifier: scoring
//! - WeightStore and WeightEvolutionTracker: adaptive weights
//! - FallbackGuarantee: minimum result set
//! - Financial projection
//! - Audit logs: append-only decisions and weight mutations
//! - Discovery: full run orchestration

pub mod audit_log;
pub mod batch;
pub mod classifier;
pub mod consistency;
pub mod evolution;
pub mod fake_patterns;
pub mod fallback;
pub mod financial;
pub mod orchestrator;
pub mod retry;
pub mod rules;
pub mod verification;
pub mod weight_store;

// Re-export commonly used types
pub use audit_log::{AuditError, AuditSink, JsonlAuditLog, MemoryAuditLog, SqliteAuditLog};
pub use batch::{BatchVerifier, Clock};
pub use classifier::SignalClassifier;
pub use consistency::{ConsistencyAnalyzer, ConsistencyReport, ConsistencySettings};
pub use evolution::{EvolutionSettings, WeightEvolutionTracker, WeightPhase};
pub use fake_patterns::FakePatternDetector;
pub use fallback::{FallbackGuarantee, GuaranteedBatch};
pub use financial::{FinancialConfig, FinancialProjection, Projection, ProjectionError};
pub use orchestrator::{CandidateSeed, Discovery, DiscoveryReport};
pub use retry::RetryPolicy;
pub use rules::{PlausibilityRule, RuleError};
pub use verification::VerificationEngine;
pub use weight_store::{WeightStore, WeightStoreError};
