//! HTTP collector client.
//!
//! `GET {base_url}/signals?candidate=<name>` returning a JSON array of
//! `IngestRecord`. Server errors and throttling are transient; other 4xx
//! responses are refused and not retried.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;

use super::{CollectionError, IngestRecord, SignalSource};
use crate::domain::RawSignal;

#[derive(Debug, Clone)]
pub struct HttpSource {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(name: impl Into<String>, base_url: &str, request_timeout: Duration) -> Result<Self, CollectionError> {
        let name = name.into();
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CollectionError::unavailable(&name, e.to_string()))?;

        Ok(Self {
            name,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn signals_url(&self) -> String {
        format!("{}/signals", self.base_url)
    }

    fn classify_status(&self, status: StatusCode) -> Result<(), CollectionError> {
        if status.is_success() {
            return Ok(());
        }
        let message = format!("HTTP {}", status);
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(CollectionError::unavailable(&self.name, message))
        } else {
            Err(CollectionError::Refused {
                source_name: self.name.clone(),
                message,
            })
        }
    }
}

#[async_trait]
impl SignalSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, candidate: &str) -> Result<Vec<RawSignal>, CollectionError> {
        let response = self
            .client
            .get(self.signals_url())
            .query(&[("candidate", candidate)])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CollectionError::Timeout {
                        source_name: self.name.clone(),
                        timeout_ms: 0,
                    }
                } else {
                    CollectionError::unavailable(&self.name, e.to_string())
                }
            })?;

        self.classify_status(response.status())?;

        let records: Vec<IngestRecord> = response.json().await.map_err(|e| CollectionError::Malformed {
            source_name: self.name.clone(),
            message: e.to_string(),
        })?;

        let received_at = Utc::now();
        Ok(records
            .into_iter()
            .filter(|r| r.candidate == candidate)
            .map(|r| r.into_raw(&self.name, received_at))
            .collect())
    }
}
