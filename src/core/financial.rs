//! Payout-share financial projection.
//!
//! All amounts are monthly. `fx_rate` converts the candidate's revenue
//! currency into the investment currency.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Candidate, VerificationResult, VerificationStatus};

/// Errors from `project`
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectionError {
    #[error("candidate '{0}' was rejected; no projection is made")]
    Rejected(String),

    #[error("candidate '{0}' has no declared MRR")]
    MissingMrr(String),

    #[error("investment amount must be positive, got {0}")]
    InvalidInvestment(f64),
}

/// Deal terms
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinancialConfig {
    #[serde(default = "default_investment_amount")]
    pub investment_amount: f64,

    /// Share of revenue paid back to the investor, in [0, 1]
    #[serde(default = "default_payout_share_pct")]
    pub payout_share_pct: f64,

    #[serde(default = "default_fx_rate")]
    pub fx_rate: f64,
}

fn default_investment_amount() -> f64 {
    500_000.0
}
fn default_payout_share_pct() -> f64 {
    0.15
}
fn default_fx_rate() -> f64 {
    7.0
}

impl Default for FinancialConfig {
    fn default() -> Self {
        Self {
            investment_amount: default_investment_amount(),
            payout_share_pct: default_payout_share_pct(),
            fx_rate: default_fx_rate(),
        }
    }
}

/// Figures for a deal that pays back
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinancialProjection {
    pub monthly_payout: f64,
    pub payback_months: f64,
    pub annualized_return_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Projection {
    Payback(FinancialProjection),
    /// Payout is zero or negative; there is no payback horizon
    NoPayback { monthly_payout: f64 },
}

impl Projection {
    pub fn monthly_payout(&self) -> f64 {
        match self {
            Projection::Payback(p) => p.monthly_payout,
            Projection::NoPayback { monthly_payout } => *monthly_payout,
        }
    }
}

pub fn monthly_payout(estimated_mrr: f64, payout_share_pct: f64, fx_rate: f64) -> f64 {
    estimated_mrr * payout_share_pct * fx_rate
}

/// Pure projection from deal terms and revenue
pub fn compute(config: &FinancialConfig, estimated_mrr: f64) -> Result<Projection, ProjectionError> {
    if config.investment_amount <= 0.0 {
        return Err(ProjectionError::InvalidInvestment(config.investment_amount));
    }

    let payout = monthly_payout(estimated_mrr, config.payout_share_pct, config.fx_rate);
    if payout <= 0.0 {
        return Ok(Projection::NoPayback { monthly_payout: payout });
    }

    Ok(Projection::Payback(FinancialProjection {
        monthly_payout: payout,
        payback_months: config.investment_amount / payout,
        annualized_return_pct: payout * 12.0 / config.investment_amount * 100.0,
    }))
}

/// Project a verified or uncertain candidate
pub fn project(
    candidate: &Candidate,
    result: &VerificationResult,
    config: &FinancialConfig,
) -> Result<Projection, ProjectionError> {
    if result.status == VerificationStatus::Rejected {
        return Err(ProjectionError::Rejected(candidate.name.clone()));
    }
    let mrr = candidate
        .declared_metrics
        .estimated_mrr
        .ok_or_else(|| ProjectionError::MissingMrr(candidate.name.clone()))?;

    compute(config, mrr as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn terms() -> FinancialConfig {
        FinancialConfig {
            investment_amount: 500_000.0,
            payout_share_pct: 0.15,
            fx_rate: 7.0,
        }
    }

    #[test]
    fn test_reference_deal() {
        let Projection::Payback(p) = compute(&terms(), 30_000.0).unwrap() else {
            panic!("expected payback");
        };
        assert!((p.monthly_payout - 31_500.0).abs() < 1e-9);
        assert!((p.payback_months - 15.873).abs() < 1e-3);
        assert!((p.annualized_return_pct - 75.6).abs() < 1e-9);
    }

    #[test]
    fn test_zero_mrr_has_no_payback() {
        let projection = compute(&terms(), 0.0).unwrap();
        assert_eq!(projection, Projection::NoPayback { monthly_payout: 0.0 });
    }

    #[test]
    fn test_invalid_investment() {
        let config = FinancialConfig {
            investment_amount: 0.0,
            ..terms()
        };
        assert_eq!(compute(&config, 10.0), Err(ProjectionError::InvalidInvestment(0.0)));
    }

    #[test]
    fn test_project_refuses_rejected() {
        let candidate = Candidate::without_signals("Ghost").with_metrics(Some(30_000), Some(5));
        let result = VerificationResult::unscored("Ghost", 1, VerificationStatus::Rejected, 0, Utc::now());
        assert_eq!(
            project(&candidate, &result, &terms()),
            Err(ProjectionError::Rejected("Ghost".to_string()))
        );
    }

    #[test]
    fn test_project_requires_mrr() {
        let candidate = Candidate::without_signals("Acme").with_metrics(None, Some(5));
        let result = VerificationResult::unscored("Acme", 1, VerificationStatus::Uncertain, 0, Utc::now());
        assert_eq!(
            project(&candidate, &result, &terms()),
            Err(ProjectionError::MissingMrr("Acme".to_string()))
        );
    }

    #[test]
    fn test_project_accepted_candidate() {
        let candidate = Candidate::without_signals("Acme").with_metrics(Some(30_000), Some(5));
        let result = VerificationResult::unscored("Acme", 1, VerificationStatus::Verified, 0, Utc::now());
        let projection = project(&candidate, &result, &terms()).unwrap();
        assert!((projection.monthly_payout() - 31_500.0).abs() < 1e-9);
    }
}
