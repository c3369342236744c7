//! Shared, versioned weight state.
//!
//! Readers take an `Arc<WeightState>` snapshot and keep it for a whole
//! batch. Writers commit a successor state with compare-and-swap on the
//! version; the lock is held only for the pointer swap.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{InvalidWeights, WeightMutation, WeightState};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WeightStoreError {
    #[error("weight version conflict: expected {expected}, current is {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("successor must have version {expected}, got {found}")]
    BadSuccessor { expected: u64, found: u64 },

    #[error("mutation history is not sequential: expected version {expected}, found {found}")]
    NonSequentialHistory { expected: u64, found: u64 },

    #[error(transparent)]
    Invalid(#[from] InvalidWeights),
}

/// Holder of the current `WeightState`
#[derive(Debug)]
pub struct WeightStore {
    current: RwLock<Arc<WeightState>>,
}

impl Default for WeightStore {
    fn default() -> Self {
        Self::new(WeightState::default())
    }
}

impl WeightStore {
    pub fn new(state: WeightState) -> Self {
        Self {
            current: RwLock::new(Arc::new(state)),
        }
    }

    /// Current state; cheap to clone and never changes under the holder
    pub fn snapshot(&self) -> Arc<WeightState> {
        self.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.current.read().version()
    }

    /// Install `next` if the current version is still `expected`
    pub fn compare_and_swap(
        &self,
        expected: u64,
        next: WeightState,
    ) -> Result<Arc<WeightState>, WeightStoreError> {
        if next.version() != expected + 1 {
            return Err(WeightStoreError::BadSuccessor {
                expected: expected + 1,
                found: next.version(),
            });
        }
        next.validate()?;

        let mut current = self.current.write();
        if current.version() != expected {
            debug!(expected, actual = current.version(), "Weight CAS conflict");
            return Err(WeightStoreError::Conflict {
                expected,
                actual: current.version(),
            });
        }

        let next = Arc::new(next);
        *current = Arc::clone(&next);
        Ok(next)
    }

    /// Rebuild the store by replaying persisted mutations over `initial`.
    ///
    /// Mutations sharing a version were committed together. Versions at or
    /// below the initial one are already reflected and are skipped.
    pub fn from_history(initial: WeightState, history: &[WeightMutation]) -> Result<Self, WeightStoreError> {
        let mut state = initial;
        let mut i = 0;

        while i < history.len() {
            let version = history[i].version;
            let end = history[i..]
                .iter()
                .position(|m| m.version != version)
                .map_or(history.len(), |offset| i + offset);

            if version > state.version() {
                if version != state.version() + 1 {
                    return Err(WeightStoreError::NonSequentialHistory {
                        expected: state.version() + 1,
                        found: version,
                    });
                }

                let mut weights = state.signal_weights().clone();
                for mutation in &history[i..end] {
                    weights.insert(mutation.parameter, mutation.new_value);
                }
                state = WeightState::restore(weights, state.thresholds(), version)?;
            }

            i = end;
        }

        info!(version = state.version(), replayed = history.len(), "Weight state rebuilt");
        Ok(Self::new(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::weights::default_signal_weights;
    use crate::domain::SignalType;
    use chrono::Utc;

    fn shifted() -> std::collections::BTreeMap<SignalType, f64> {
        let mut weights = default_signal_weights();
        weights.insert(SignalType::HiringActivity, 0.20);
        weights.insert(SignalType::CodeActivity, 0.07);
        weights
    }

    #[test]
    fn test_snapshot_is_stable_across_swap() {
        let store = WeightStore::default();
        let before = store.snapshot();

        let next = before.with_weights(shifted()).unwrap();
        store.compare_and_swap(0, next).unwrap();

        assert_eq!(before.version(), 0);
        assert_eq!(store.snapshot().version(), 1);
    }

    #[test]
    fn test_stale_writer_conflicts() {
        let store = WeightStore::default();
        let base = store.snapshot();

        store.compare_and_swap(0, base.with_weights(shifted()).unwrap()).unwrap();
        let stale = store.compare_and_swap(0, base.with_weights(default_signal_weights()).unwrap());

        assert_eq!(stale, Err(WeightStoreError::Conflict { expected: 0, actual: 1 }));
        assert_eq!(store.snapshot().weight(SignalType::HiringActivity), 0.20);
    }

    #[test]
    fn test_successor_version_checked() {
        let store = WeightStore::default();
        let state = WeightState::default();
        assert!(matches!(
            store.compare_and_swap(0, state),
            Err(WeightStoreError::BadSuccessor { expected: 1, found: 0 })
        ));
    }

    #[test]
    fn test_replay_history() {
        let now = Utc::now();
        let mutation = |parameter, old_value, new_value, version| WeightMutation {
            parameter,
            old_value,
            new_value,
            trigger: "test".to_string(),
            version,
            timestamp: now,
        };
        let history = vec![
            mutation(SignalType::HiringActivity, 0.15, 0.20, 1),
            mutation(SignalType::CodeActivity, 0.12, 0.07, 1),
            mutation(SignalType::HiringActivity, 0.20, 0.17, 2),
            mutation(SignalType::ProductAnnouncement, 0.15, 0.18, 2),
        ];

        let store = WeightStore::from_history(WeightState::default(), &history).unwrap();
        let state = store.snapshot();
        assert_eq!(state.version(), 2);
        assert_eq!(state.weight(SignalType::HiringActivity), 0.17);
        assert_eq!(state.weight(SignalType::ProductAnnouncement), 0.18);
        assert_eq!(state.weight(SignalType::CodeActivity), 0.07);
    }

    #[test]
    fn test_replay_rejects_gaps() {
        let history = vec![WeightMutation {
            parameter: SignalType::Other,
            old_value: 0.08,
            new_value: 0.08,
            trigger: "test".to_string(),
            version: 3,
            timestamp: Utc::now(),
        }];
        assert!(matches!(
            WeightStore::from_history(WeightState::default(), &history),
            Err(WeightStoreError::NonSequentialHistory { expected: 1, found: 3 })
        ));
    }
}
