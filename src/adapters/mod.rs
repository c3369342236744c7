//! Signal sources.
//!
//! Each collector is a `SignalSource`: given a candidate name it returns the
//! raw signals it knows about. A `SourceRegistry` holds the configured
//! sources and collects from all of them concurrently, retrying transient
//! failures under a `RetryPolicy` and bounding each source by a timeout.

pub mod http;
pub mod jsonl;
pub mod static_source;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::retry::RetryPolicy;
use crate::domain::{flags, Metadata, RawSignal, FALLBACK_SOURCE};

pub use http::HttpSource;
pub use jsonl::JsonlSource;
pub use static_source::StaticSource;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollectionError {
    #[error("source '{source_name}' timed out after {timeout_ms}ms")]
    Timeout { source_name: String, timeout_ms: u64 },

    #[error("source '{source_name}' unavailable: {message}")]
    Unavailable { source_name: String, message: String },

    #[error("source '{source_name}' refused the request: {message}")]
    Refused { source_name: String, message: String },

    #[error("source '{source_name}' returned malformed data: {message}")]
    Malformed { source_name: String, message: String },
}

impl CollectionError {
    /// Worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, CollectionError::Timeout { .. } | CollectionError::Unavailable { .. })
    }

    pub fn unavailable(source_name: &str, message: impl Into<String>) -> Self {
        CollectionError::Unavailable {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }
}

/// A collector of raw signals
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Registry name; also the default `source` of returned signals
    fn name(&self) -> &str;

    async fn fetch(&self, candidate: &str) -> Result<Vec<RawSignal>, CollectionError>;
}

/// Wire format shared by the JSONL and HTTP sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRecord {
    pub candidate: String,

    /// Overrides the source name when set
    #[serde(default)]
    pub source: Option<String>,

    pub text: String,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl IngestRecord {
    /// Convert to a raw signal. The reference-set tag is reserved and an
    /// explicit `source` carrying it is replaced by `default_source`.
    pub fn into_raw(self, default_source: &str, received_at: DateTime<Utc>) -> RawSignal {
        let source = match self.source {
            Some(source) if source != FALLBACK_SOURCE => source,
            _ => default_source.to_string(),
        };
        RawSignal {
            source,
            text: self.text,
            metadata: self.metadata,
            timestamp: self.timestamp.unwrap_or(received_at),
        }
    }
}

/// Configured source, as written in `config.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Jsonl { name: String, path: PathBuf },
    Http { name: String, base_url: String },
}

impl SourceConfig {
    pub fn name(&self) -> &str {
        match self {
            SourceConfig::Jsonl { name, .. } | SourceConfig::Http { name, .. } => name,
        }
    }

    pub fn build(&self, request_timeout: Duration) -> Result<Arc<dyn SignalSource>, CollectionError> {
        let source: Arc<dyn SignalSource> = match self {
            SourceConfig::Jsonl { name, path } => Arc::new(JsonlSource::new(name, path)),
            SourceConfig::Http { name, base_url } => Arc::new(HttpSource::new(name, base_url, request_timeout)?),
        };
        Ok(source)
    }
}

/// Signals gathered for one candidate across every source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionOutcome {
    /// In source registration order
    pub signals: Vec<RawSignal>,
    /// Sources that failed for a reason other than timeout
    pub failed_sources: Vec<String>,
    /// Sources that timed out
    pub timed_out_sources: Vec<String>,
}

impl CollectionOutcome {
    pub fn timed_out(&self) -> bool {
        !self.timed_out_sources.is_empty()
    }

    /// Risk flags describing collection problems
    pub fn risk_flags(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .failed_sources
            .iter()
            .map(|s| flags::collection_failed(s))
            .collect();
        if self.timed_out() {
            out.push(flags::TIMEOUT.to_string());
        }
        out
    }
}

/// Named signal sources with a shared retry policy and timeout
#[derive(Clone)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn SignalSource>>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.names())
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SourceRegistry {
    pub fn new(retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            sources: Vec::new(),
            retry,
            timeout,
        }
    }

    /// Build every configured source
    pub fn from_config(
        configs: &[SourceConfig],
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self, CollectionError> {
        let mut registry = Self::new(retry, timeout);
        for config in configs {
            registry.register(config.build(timeout)?);
        }
        Ok(registry)
    }

    pub fn register(&mut self, source: Arc<dyn SignalSource>) {
        self.sources.push(source);
    }

    pub fn with_source(mut self, source: Arc<dyn SignalSource>) -> Self {
        self.register(source);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Fetch from every source; failures are reported, never propagated
    pub async fn collect(&self, candidate: &str) -> CollectionOutcome {
        let fetches = self.sources.iter().map(|source| self.fetch_one(source.as_ref(), candidate));
        let results = join_all(fetches).await;

        let mut outcome = CollectionOutcome::default();
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(mut signals) => {
                    debug!(source = source.name(), candidate, count = signals.len(), "Collected signals");
                    for signal in &mut signals {
                        untag_reserved(signal, source.name());
                    }
                    outcome.signals.extend(signals);
                }
                Err(CollectionError::Timeout { .. }) => {
                    warn!(source = source.name(), candidate, "Collection timed out");
                    outcome.timed_out_sources.push(source.name().to_string());
                }
                Err(e) => {
                    warn!(source = source.name(), candidate, error = %e, "Collection failed");
                    outcome.failed_sources.push(source.name().to_string());
                }
            }
        }
        outcome
    }

    async fn fetch_one(&self, source: &dyn SignalSource, candidate: &str) -> Result<Vec<RawSignal>, CollectionError> {
        let label = format!("collect.{}", source.name());
        let attempts = self.retry.run(
            &label,
            |_| source.fetch(candidate),
            CollectionError::is_transient,
        );

        match tokio::time::timeout(self.timeout, attempts).await {
            Ok(result) => result,
            Err(_) => Err(CollectionError::Timeout {
                source_name: source.name().to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

/// Live signals never carry the reference-set source tag
fn untag_reserved(signal: &mut RawSignal, source_name: &str) {
    if signal.source != FALLBACK_SOURCE {
        return;
    }
    warn!(source = source_name, "Live signal used the reserved source tag; renaming");
    signal.source = if source_name == FALLBACK_SOURCE {
        format!("{}-live", source_name)
    } else {
        source_name.to_string()
    };
}
