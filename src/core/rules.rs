//! Closed-form rule expressions over named numeric features.
//!
//! Rules are plain data (serde-tagged) and are evaluated by a small
//! interpreter. A comparison that references a missing feature makes the
//! whole rule inapplicable rather than false.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Named feature values a rule is evaluated against
pub type Features = BTreeMap<String, f64>;

/// Errors from rule validation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("rule '{0}' has an empty condition list")]
    EmptyCondition(String),

    #[error("rule '{rule}' references empty feature name")]
    EmptyFeature { rule: String },
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    fn apply(&self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::Eq => (left - right).abs() < f64::EPSILON,
            CompareOp::Ne => (left - right).abs() >= f64::EPSILON,
        }
    }
}

/// Comparison operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Feature(String),
    Const(f64),
}

impl Operand {
    fn resolve(&self, features: &Features) -> Option<f64> {
        match self {
            Operand::Feature(name) => features.get(name).copied(),
            Operand::Const(value) => Some(*value),
        }
    }
}

/// Rule expression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    All {
        of: Vec<Expr>,
    },
    Any {
        of: Vec<Expr>,
    },
    Not {
        expr: Box<Expr>,
    },
}

impl Expr {
    /// `feature op constant`
    pub fn feature(name: &str, op: CompareOp, value: f64) -> Self {
        Expr::Compare {
            left: Operand::Feature(name.to_string()),
            op,
            right: Operand::Const(value),
        }
    }

    /// `feature op other_feature`
    pub fn features(left: &str, op: CompareOp, right: &str) -> Self {
        Expr::Compare {
            left: Operand::Feature(left.to_string()),
            op,
            right: Operand::Feature(right.to_string()),
        }
    }

    /// Evaluate; `None` when a referenced feature is missing
    pub fn eval(&self, features: &Features) -> Option<bool> {
        match self {
            Expr::Compare { left, op, right } => {
                let l = left.resolve(features)?;
                let r = right.resolve(features)?;
                Some(op.apply(l, r))
            }
            Expr::All { of } => {
                let mut result = true;
                for expr in of {
                    result &= expr.eval(features)?;
                }
                Some(result)
            }
            Expr::Any { of } => {
                let mut result = false;
                for expr in of {
                    result |= expr.eval(features)?;
                }
                Some(result)
            }
            Expr::Not { expr } => expr.eval(features).map(|v| !v),
        }
    }

    fn check(&self, rule: &str) -> Result<(), RuleError> {
        match self {
            Expr::Compare { left, right, .. } => {
                for operand in [left, right] {
                    if matches!(operand, Operand::Feature(name) if name.is_empty()) {
                        return Err(RuleError::EmptyFeature {
                            rule: rule.to_string(),
                        });
                    }
                }
                Ok(())
            }
            Expr::All { of } | Expr::Any { of } => {
                if of.is_empty() {
                    return Err(RuleError::EmptyCondition(rule.to_string()));
                }
                of.iter().try_for_each(|e| e.check(rule))
            }
            Expr::Not { expr } => expr.check(rule),
        }
    }
}

/// A named condition that plausible data must satisfy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlausibilityRule {
    pub name: String,
    pub condition: Expr,
}

impl PlausibilityRule {
    pub fn new(name: &str, condition: Expr) -> Self {
        Self {
            name: name.to_string(),
            condition,
        }
    }

    pub fn validate(&self) -> Result<(), RuleError> {
        self.condition.check(&self.name)
    }

    /// True only when the rule applies and its condition fails
    pub fn is_violated(&self, features: &Features) -> bool {
        matches!(self.condition.eval(features), Some(false))
    }
}
