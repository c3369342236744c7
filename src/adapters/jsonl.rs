//! Source backed by a JSONL export from an external collector.
//!
//! Each line is an `IngestRecord`. The file is re-read on every fetch so a
//! collector can keep appending while the engine runs. Lines that do not
//! parse are skipped with a warning.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use super::{CollectionError, IngestRecord, SignalSource};
use crate::domain::RawSignal;

#[derive(Debug, Clone)]
pub struct JsonlSource {
    name: String,
    path: PathBuf,
}

impl JsonlSource {
    pub fn new(name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every parseable record in the file
    pub async fn records(&self) -> Result<Vec<IngestRecord>, CollectionError> {
        let file = File::open(&self.path).await.map_err(|e| {
            CollectionError::unavailable(&self.name, format!("{}: {}", self.path.display(), e))
        })?;

        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();
        let mut line_no = 0usize;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| CollectionError::unavailable(&self.name, e.to_string()))?
        {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<IngestRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(source = %self.name, line = line_no, error = %e, "Skipping malformed record"),
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl SignalSource for JsonlSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, candidate: &str) -> Result<Vec<RawSignal>, CollectionError> {
        let received_at = Utc::now();
        Ok(self
            .records()
            .await?
            .into_iter()
            .filter(|r| r.candidate == candidate)
            .map(|r| r.into_raw(&self.name, received_at))
            .collect())
    }
}
