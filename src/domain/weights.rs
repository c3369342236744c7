//! Versioned signal-type weights and decision thresholds.
//!
//! `WeightState` is an immutable value. Every change produces a new value
//! with `version + 1`; readers hold an `Arc` snapshot for a whole batch.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::signal::SignalType;

/// Allowed slack on the weight sum
pub const WEIGHT_SUM_EPSILON: f64 = 1e-6;

/// No signal type may fall below this weight
pub const MIN_WEIGHT: f64 = 0.05;

/// No signal type may exceed this weight
pub const MAX_WEIGHT: f64 = 0.95;

/// Why a weight configuration is unusable
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidWeights {
    #[error("signal weights sum to {sum}, expected 1.0")]
    BadSum { sum: f64 },

    #[error("weight for {signal_type} is {value}, outside [0.05, 0.95]")]
    OutOfBounds { signal_type: SignalType, value: f64 },

    #[error("missing weight for {0}")]
    Missing(SignalType),

    #[error("thresholds must satisfy 0 < uncertain ({uncertain}) < verified ({verified}) <= 1")]
    Thresholds { verified: f64, uncertain: f64 },
}

/// Decision thresholds on the composite score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_verified")]
    pub verified: f64,

    #[serde(default = "default_uncertain")]
    pub uncertain: f64,
}

fn default_verified() -> f64 {
    0.7
}
fn default_uncertain() -> f64 {
    0.4
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            verified: default_verified(),
            uncertain: default_uncertain(),
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), InvalidWeights> {
        let ok = self.uncertain > 0.0 && self.uncertain < self.verified && self.verified <= 1.0;
        if ok {
            Ok(())
        } else {
            Err(InvalidWeights::Thresholds {
                verified: self.verified,
                uncertain: self.uncertain,
            })
        }
    }
}

/// Initial weights used when configuration does not override them
pub fn default_signal_weights() -> BTreeMap<SignalType, f64> {
    [
        (SignalType::BatchMembership, 0.25),
        (SignalType::FundingRound, 0.25),
        (SignalType::HiringActivity, 0.15),
        (SignalType::ProductAnnouncement, 0.15),
        (SignalType::CodeActivity, 0.12),
        (SignalType::Other, 0.08),
    ]
    .into_iter()
    .collect()
}

/// A versioned weight configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightState {
    signal_weights: BTreeMap<SignalType, f64>,
    thresholds: Thresholds,
    version: u64,
}

impl Default for WeightState {
    fn default() -> Self {
        Self {
            signal_weights: default_signal_weights(),
            thresholds: Thresholds::default(),
            version: 0,
        }
    }
}

impl WeightState {
    /// Build the initial state, validating weights and thresholds
    pub fn new(
        signal_weights: BTreeMap<SignalType, f64>,
        thresholds: Thresholds,
    ) -> Result<Self, InvalidWeights> {
        let state = Self {
            signal_weights,
            thresholds,
            version: 0,
        };
        state.validate()?;
        Ok(state)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn signal_weights(&self) -> &BTreeMap<SignalType, f64> {
        &self.signal_weights
    }

    /// Weight for a type (0 if absent, which validation rules out)
    pub fn weight(&self, signal_type: SignalType) -> f64 {
        self.signal_weights.get(&signal_type).copied().unwrap_or(0.0)
    }

    pub fn weight_sum(&self) -> f64 {
        self.signal_weights.values().sum()
    }

    /// Successor state with new weights; validated before it is returned
    pub fn with_weights(&self, signal_weights: BTreeMap<SignalType, f64>) -> Result<Self, InvalidWeights> {
        let next = Self {
            signal_weights,
            thresholds: self.thresholds,
            version: self.version + 1,
        };
        next.validate()?;
        Ok(next)
    }

    /// Restore a persisted state at a specific version
    pub fn restore(
        signal_weights: BTreeMap<SignalType, f64>,
        thresholds: Thresholds,
        version: u64,
    ) -> Result<Self, InvalidWeights> {
        let state = Self {
            signal_weights,
            thresholds,
            version,
        };
        state.validate()?;
        Ok(state)
    }

    pub fn validate(&self) -> Result<(), InvalidWeights> {
        for signal_type in SignalType::ALL {
            let value = self
                .signal_weights
                .get(&signal_type)
                .copied()
                .ok_or(InvalidWeights::Missing(signal_type))?;
            if !(MIN_WEIGHT..=MAX_WEIGHT).contains(&value) {
                return Err(InvalidWeights::OutOfBounds { signal_type, value });
            }
        }

        let sum = self.weight_sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
            return Err(InvalidWeights::BadSum { sum });
        }

        self.thresholds.validate()
    }
}

/// Scale weights so they sum to 1.0
pub fn normalize(weights: &mut BTreeMap<SignalType, f64>) {
    let sum: f64 = weights.values().sum();
    if sum > 0.0 {
        for value in weights.values_mut() {
            *value /= sum;
        }
    }
}
