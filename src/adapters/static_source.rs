//! In-memory source with fixed signals per candidate.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{CollectionError, SignalSource};
use crate::domain::RawSignal;

#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    name: String,
    signals: BTreeMap<String, Vec<RawSignal>>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signals: BTreeMap::new(),
        }
    }

    pub fn with_signal(mut self, candidate: &str, signal: RawSignal) -> Self {
        self.push(candidate, signal);
        self
    }

    pub fn push(&mut self, candidate: &str, signal: RawSignal) {
        self.signals.entry(candidate.to_string()).or_default().push(signal);
    }

    /// Candidate names with at least one signal
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        self.signals.keys().map(String::as_str)
    }
}

#[async_trait]
impl SignalSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, candidate: &str) -> Result<Vec<RawSignal>, CollectionError> {
        Ok(self.signals.get(candidate).cloned().unwrap_or_default())
    }
}
