//! Cross-signal consistency.
//!
//! Three sub-scores in [0, 1]: source diversity, type diversity and metric
//! plausibility. Plausibility starts at 1.0 and loses a fixed penalty for
//! every violated rule.

use serde::{Deserialize, Serialize};

use super::rules::{CompareOp, Expr, Features, PlausibilityRule, RuleError};
use crate::domain::{Candidate, Signal, SignalType};

const SOURCE_WEIGHT: f64 = 0.4;
const TYPE_WEIGHT: f64 = 0.3;
const PLAUSIBILITY_WEIGHT: f64 = 0.3;

/// Distinct sources/types needed for a full diversity score
const DIVERSITY_TARGET: f64 = 3.0;

/// Tunable plausibility checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencySettings {
    /// Lowest plausible monthly revenue per team member
    #[serde(default = "default_per_head_min")]
    pub per_head_min: f64,

    /// Highest plausible monthly revenue per team member
    #[serde(default = "default_per_head_max")]
    pub per_head_max: f64,

    /// Subtracted per violated rule
    #[serde(default = "default_penalty")]
    pub penalty: f64,

    /// Open roles may not exceed this multiple of the team
    #[serde(default = "default_hiring_multiple")]
    pub max_hiring_multiple: f64,

    /// Additional rules over the candidate-level features
    #[serde(default)]
    pub extra_rules: Vec<PlausibilityRule>,
}

fn default_per_head_min() -> f64 {
    500.0
}
fn default_per_head_max() -> f64 {
    100_000.0
}
fn default_penalty() -> f64 {
    0.2
}
fn default_hiring_multiple() -> f64 {
    10.0
}

impl Default for ConsistencySettings {
    fn default() -> Self {
        Self {
            per_head_min: default_per_head_min(),
            per_head_max: default_per_head_max(),
            penalty: default_penalty(),
            max_hiring_multiple: default_hiring_multiple(),
            extra_rules: Vec::new(),
        }
    }
}

impl ConsistencySettings {
    pub fn validate(&self) -> Result<(), RuleError> {
        self.extra_rules.iter().try_for_each(|r| r.validate())
    }
}

/// Revenue band a funding round implies (monthly, inclusive)
pub fn round_mrr_band(round: &str) -> Option<(f64, f64)> {
    match round {
        "pre_seed" => Some((0.0, 50_000.0)),
        "seed" => Some((0.0, 250_000.0)),
        "series_a" => Some((10_000.0, 2_000_000.0)),
        "series_b" => Some((100_000.0, 10_000_000.0)),
        "series_c" => Some((500_000.0, f64::MAX)),
        _ => None,
    }
}

/// Breakdown of a consistency computation
#[derive(Debug, Clone, PartialEq)]
pub struct ConsistencyReport {
    pub source_diversity: f64,
    pub type_diversity: f64,
    pub metric_plausibility: f64,
    pub score: f64,
    /// Names of violated rules, in evaluation order
    pub violations: Vec<String>,
}

/// Measures agreement across a candidate's signals
#[derive(Debug, Clone)]
pub struct ConsistencyAnalyzer {
    settings: ConsistencySettings,
    candidate_rules: Vec<PlausibilityRule>,
}

impl Default for ConsistencyAnalyzer {
    fn default() -> Self {
        Self::new(ConsistencySettings::default())
    }
}

impl ConsistencyAnalyzer {
    pub fn new(settings: ConsistencySettings) -> Self {
        let mut candidate_rules = vec![
            PlausibilityRule::new(
                "mrr_per_head_band",
                Expr::All {
                    of: vec![
                        Expr::feature("mrr_per_head", CompareOp::Ge, settings.per_head_min),
                        Expr::feature("mrr_per_head", CompareOp::Le, settings.per_head_max),
                    ],
                },
            ),
            PlausibilityRule::new(
                "non_negative_mrr",
                Expr::feature("estimated_mrr", CompareOp::Ge, 0.0),
            ),
        ];
        candidate_rules.extend(settings.extra_rules.iter().cloned());

        Self {
            settings,
            candidate_rules,
        }
    }

    pub fn settings(&self) -> &ConsistencySettings {
        &self.settings
    }

    pub fn analyze(&self, candidate: &Candidate) -> ConsistencyReport {
        let source_diversity = (candidate.distinct_sources().len() as f64 / DIVERSITY_TARGET).min(1.0);
        let type_diversity = (candidate.distinct_types().len() as f64 / DIVERSITY_TARGET).min(1.0);

        let violations = self.violations(candidate);
        let metric_plausibility = (1.0 - violations.len() as f64 * self.settings.penalty).max(0.0);

        let score = SOURCE_WEIGHT * source_diversity
            + TYPE_WEIGHT * type_diversity
            + PLAUSIBILITY_WEIGHT * metric_plausibility;

        ConsistencyReport {
            source_diversity,
            type_diversity,
            metric_plausibility,
            score,
            violations,
        }
    }

    pub fn score(&self, candidate: &Candidate) -> f64 {
        self.analyze(candidate).score
    }

    fn violations(&self, candidate: &Candidate) -> Vec<String> {
        let base = candidate_features(candidate);
        let mut violations: Vec<String> = self
            .candidate_rules
            .iter()
            .filter(|rule| rule.is_violated(&base))
            .map(|rule| rule.name.clone())
            .collect();

        let round_rule = PlausibilityRule::new(
            "funding_round_vs_mrr",
            Expr::All {
                of: vec![
                    Expr::features("estimated_mrr", CompareOp::Ge, "round_min_mrr"),
                    Expr::features("estimated_mrr", CompareOp::Le, "round_max_mrr"),
                ],
            },
        );
        let hiring_rule = PlausibilityRule::new(
            "hiring_vs_team_size",
            Expr::features("headcount", CompareOp::Le, "max_headcount"),
        );

        for signal in candidate.signals() {
            let features = match signal.signal_type() {
                SignalType::FundingRound => round_features(&base, signal),
                SignalType::HiringActivity => hiring_features(&base, signal, self.settings.max_hiring_multiple),
                _ => None,
            };
            let Some(features) = features else { continue };

            for rule in [&round_rule, &hiring_rule] {
                if rule.is_violated(&features) {
                    violations.push(rule.name.clone());
                }
            }
        }

        violations
    }
}

/// Candidate-level features from declared metrics
pub fn candidate_features(candidate: &Candidate) -> Features {
    let mut features = Features::new();
    let metrics = candidate.declared_metrics;

    if let Some(mrr) = metrics.estimated_mrr {
        features.insert("estimated_mrr".to_string(), mrr as f64);
    }
    if let Some(team) = metrics.team_size {
        features.insert("team_size".to_string(), team as f64);
    }
    if let (Some(mrr), Some(team)) = (metrics.estimated_mrr, metrics.team_size) {
        if team > 0 {
            features.insert("mrr_per_head".to_string(), mrr as f64 / team as f64);
        }
    }

    features
}

fn round_features(base: &Features, signal: &Signal) -> Option<Features> {
    let (min, max) = signal.metadata_str("round").and_then(round_mrr_band)?;
    let mut features = base.clone();
    features.insert("round_min_mrr".to_string(), min);
    features.insert("round_max_mrr".to_string(), max);
    Some(features)
}

fn hiring_features(base: &Features, signal: &Signal, multiple: f64) -> Option<Features> {
    let headcount = signal.metadata_f64("headcount")?;
    let team = base.get("team_size").copied()?;
    let mut features = base.clone();
    features.insert("headcount".to_string(), headcount);
    features.insert("max_headcount".to_string(), team * multiple);
    Some(features)
}
