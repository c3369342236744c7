//! Engine configuration.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (DEALSCOUT_HOME, DEALSCOUT_CONCURRENCY,
//!    DEALSCOUT_FALLBACK_MINIMUM, DEALSCOUT_MUTATION_RATE)
//! 2. Config file (.dealscout/config.yaml)
//! 3. Defaults (~/.dealscout)
//!
//! Config file discovery:
//! - Searches current directory and parents for .dealscout/config.yaml
//! - `paths.home` is relative to the .dealscout/ directory
//! - Source file paths are relative to the project root
//!
//! Everything is validated once, at load. A configuration that loads is
//! one the engine can run with.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapters::SourceConfig;
use crate::core::consistency::ConsistencySettings;
use crate::core::evolution::EvolutionSettings;
use crate::core::financial::FinancialConfig;
use crate::core::retry::RetryPolicy;
use crate::core::rules::RuleError;
use crate::domain::weights::default_signal_weights;
use crate::domain::{InvalidWeights, SignalType, Thresholds, WeightState};

pub const CONFIG_DIR: &str = ".dealscout";
pub const CONFIG_FILE: &str = "config.yaml";

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid weights: {0}")]
    Weights(#[from] InvalidWeights),

    #[error("invalid plausibility rule: {0}")]
    Rule(#[from] RuleError),

    #[error("{key} = {value} is out of range ({expected})")]
    OutOfRange {
        key: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("environment variable {var} has invalid value '{value}'")]
    Env { var: &'static str, value: String },

    #[error("failed to determine home directory")]
    NoHome,
}

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .dealscout/)
    pub home: Option<String>,
}

/// Where decisions and weight mutations are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditBackend {
    #[default]
    Jsonl,
    Sqlite,
}

/// Tunables for scoring, evolution and runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    #[serde(default = "default_fallback_minimum")]
    pub fallback_minimum: usize,

    #[serde(default = "default_batch_timeout")]
    pub batch_timeout_seconds: u64,

    #[serde(default = "default_collection_timeout")]
    pub collection_timeout_seconds: u64,

    #[serde(default)]
    pub thresholds: Thresholds,

    #[serde(default = "default_signal_weights")]
    pub signal_weights: BTreeMap<SignalType, f64>,

    #[serde(default)]
    pub financial: FinancialConfig,

    #[serde(default)]
    pub evolution: EvolutionSettings,

    #[serde(default)]
    pub plausibility: ConsistencySettings,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub audit_backend: AuditBackend,
}

fn default_concurrency_limit() -> usize {
    8
}
fn default_fallback_minimum() -> usize {
    3
}
fn default_batch_timeout() -> u64 {
    120
}
fn default_collection_timeout() -> u64 {
    15
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            fallback_minimum: default_fallback_minimum(),
            batch_timeout_seconds: default_batch_timeout(),
            collection_timeout_seconds: default_collection_timeout(),
            thresholds: Thresholds::default(),
            signal_weights: default_signal_weights(),
            financial: FinancialConfig::default(),
            evolution: EvolutionSettings::default(),
            plausibility: ConsistencySettings::default(),
            retry: RetryPolicy::default(),
            audit_backend: AuditBackend::default(),
        }
    }
}

fn out_of_range(key: &'static str, value: impl ToString, expected: &'static str) -> ConfigError {
    ConfigError::OutOfRange {
        key,
        value: value.to_string(),
        expected,
    }
}

impl EngineSettings {
    /// Initial weight state from the configured weights and thresholds
    pub fn initial_weights(&self) -> Result<WeightState, ConfigError> {
        Ok(WeightState::new(self.signal_weights.clone(), self.thresholds)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 {
            return Err(out_of_range("concurrency_limit", 0, "at least 1"));
        }
        if self.batch_timeout_seconds == 0 {
            return Err(out_of_range("batch_timeout_seconds", 0, "at least 1"));
        }
        if self.collection_timeout_seconds == 0 {
            return Err(out_of_range("collection_timeout_seconds", 0, "at least 1"));
        }

        let evolution = &self.evolution;
        if !(evolution.mutation_rate > 0.0 && evolution.mutation_rate < 1.0) {
            return Err(out_of_range("evolution.mutation_rate", evolution.mutation_rate, "(0, 1)"));
        }
        if evolution.min_samples < 2 {
            return Err(out_of_range("evolution.min_samples", evolution.min_samples, "at least 2"));
        }
        if evolution.window_size < evolution.min_samples {
            return Err(out_of_range("evolution.window_size", evolution.window_size, "at least min_samples"));
        }
        if evolution.top_k == 0 {
            return Err(out_of_range("evolution.top_k", 0, "at least 1"));
        }
        if evolution.trend_threshold < 0.0 || evolution.convergence_epsilon < 0.0 {
            return Err(out_of_range(
                "evolution.trend_threshold",
                evolution.trend_threshold,
                "thresholds must be non-negative",
            ));
        }
        if evolution.max_commit_attempts == 0 {
            return Err(out_of_range("evolution.max_commit_attempts", 0, "at least 1"));
        }

        let financial = &self.financial;
        if !(0.0..=1.0).contains(&financial.payout_share_pct) {
            return Err(out_of_range("financial.payout_share_pct", financial.payout_share_pct, "[0, 1]"));
        }
        if financial.fx_rate <= 0.0 {
            return Err(out_of_range("financial.fx_rate", financial.fx_rate, "positive"));
        }
        if financial.investment_amount <= 0.0 {
            return Err(out_of_range("financial.investment_amount", financial.investment_amount, "positive"));
        }

        let plausibility = &self.plausibility;
        if plausibility.per_head_min < 0.0 || plausibility.per_head_min > plausibility.per_head_max {
            return Err(out_of_range(
                "plausibility.per_head_min",
                plausibility.per_head_min,
                "0 <= per_head_min <= per_head_max",
            ));
        }
        if !(0.0..=1.0).contains(&plausibility.penalty) {
            return Err(out_of_range("plausibility.penalty", plausibility.penalty, "[0, 1]"));
        }
        plausibility.validate()?;

        if self.retry.max_attempts == 0 {
            return Err(out_of_range("retry.max_attempts", 0, "at least 1"));
        }

        self.initial_weights()?;
        Ok(())
    }

    /// Apply DEALSCOUT_* overrides read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = lookup("DEALSCOUT_CONCURRENCY") {
            self.concurrency_limit = value.trim().parse().map_err(|_| ConfigError::Env {
                var: "DEALSCOUT_CONCURRENCY",
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup("DEALSCOUT_FALLBACK_MINIMUM") {
            self.fallback_minimum = value.trim().parse().map_err(|_| ConfigError::Env {
                var: "DEALSCOUT_FALLBACK_MINIMUM",
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup("DEALSCOUT_MUTATION_RATE") {
            self.evolution.mutation_rate = value.trim().parse().map_err(|_| ConfigError::Env {
                var: "DEALSCOUT_MUTATION_RATE",
                value: value.clone(),
            })?;
        }
        Ok(())
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to engine state
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub engine: EngineSettings,
    pub sources: Vec<SourceConfig>,
}

impl ResolvedConfig {
    /// JSONL audit directory ($DEALSCOUT_HOME/audit)
    pub fn audit_dir(&self) -> PathBuf {
        self.home.join("audit")
    }

    /// SQLite audit database ($DEALSCOUT_HOME/audit.db)
    pub fn sqlite_path(&self) -> PathBuf {
        self.home.join("audit.db")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Build the resolved configuration from an optional file and an env lookup
pub fn resolve(
    config_file: Option<PathBuf>,
    default_home: PathBuf,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig, ConfigError> {
    let file = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    // .dealscout/ and the project root above it
    let config_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."))
        .to_path_buf();
    let project_root = config_dir.parent().unwrap_or(Path::new(".")).to_path_buf();

    let home = if let Some(env_home) = lookup("DEALSCOUT_HOME") {
        PathBuf::from(env_home)
    } else if let Some(home) = &file.paths.home {
        resolve_path(&config_dir, Path::new(home))
    } else {
        default_home
    };

    let sources = file
        .sources
        .into_iter()
        .map(|source| match source {
            SourceConfig::Jsonl { name, path } => SourceConfig::Jsonl {
                name,
                path: resolve_path(&project_root, &path),
            },
            other => other,
        })
        .collect();

    let mut engine = file.engine;
    engine.apply_env(&lookup)?;
    engine.validate()?;

    Ok(ResolvedConfig {
        home,
        config_file,
        engine,
        sources,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig, ConfigError> {
    let default_home = dirs::home_dir().ok_or(ConfigError::NoHome)?.join(CONFIG_DIR);
    resolve(find_config_file(), default_home, env_var)
}

/// Load configuration from an explicit file, still honouring env overrides
pub fn load_from(path: &Path) -> Result<ResolvedConfig, ConfigError> {
    let default_home = dirs::home_dir().ok_or(ConfigError::NoHome)?.join(CONFIG_DIR);
    resolve(Some(path.to_path_buf()), default_home, env_var)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> anyhow::Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the engine home directory
pub fn dealscout_home() -> anyhow::Result<PathBuf> {
    Ok(config()?.home.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(temp: &TempDir, body: &str) -> PathBuf {
        let dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", body).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(None, PathBuf::from("/home/u/.dealscout"), no_env).unwrap();

        assert_eq!(config.home, PathBuf::from("/home/u/.dealscout"));
        assert!(config.config_file.is_none());
        assert_eq!(config.engine, EngineSettings::default());
        assert_eq!(config.audit_dir(), PathBuf::from("/home/u/.dealscout/audit"));
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            &temp,
            r#"
version: "1.0"
paths:
  home: state
engine:
  concurrency_limit: 4
  fallback_minimum: 5
  thresholds:
    verified: 0.75
  financial:
    payout_share_pct: 0.2
  evolution:
    mutation_rate: 0.05
  audit_backend: sqlite
sources:
  - kind: jsonl
    name: social
    path: data/social.jsonl
"#,
        );

        let config = resolve(Some(path), PathBuf::from("/unused"), no_env).unwrap();
        assert_eq!(config.home, temp.path().join(CONFIG_DIR).join("state"));
        assert_eq!(config.engine.concurrency_limit, 4);
        assert_eq!(config.engine.fallback_minimum, 5);
        assert_eq!(config.engine.thresholds.verified, 0.75);
        assert_eq!(config.engine.thresholds.uncertain, 0.4);
        assert_eq!(config.engine.financial.payout_share_pct, 0.2);
        assert_eq!(config.engine.financial.fx_rate, 7.0);
        assert_eq!(config.engine.evolution.mutation_rate, 0.05);
        assert_eq!(config.engine.audit_backend, AuditBackend::Sqlite);

        match &config.sources[0] {
            SourceConfig::Jsonl { path, .. } => assert_eq!(path, &temp.path().join("data/social.jsonl")),
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("DEALSCOUT_HOME", "/srv/dealscout"),
            ("DEALSCOUT_CONCURRENCY", "16"),
            ("DEALSCOUT_FALLBACK_MINIMUM", "0"),
            ("DEALSCOUT_MUTATION_RATE", "0.25"),
        ]
        .into_iter()
        .collect();
        let lookup = |k: &str| env.get(k).map(|v| v.to_string());

        let config = resolve(None, PathBuf::from("/unused"), lookup).unwrap();
        assert_eq!(config.home, PathBuf::from("/srv/dealscout"));
        assert_eq!(config.engine.concurrency_limit, 16);
        assert_eq!(config.engine.fallback_minimum, 0);
        assert_eq!(config.engine.evolution.mutation_rate, 0.25);
    }

    #[test]
    fn test_bad_env_value() {
        let lookup = |k: &str| (k == "DEALSCOUT_CONCURRENCY").then(|| "many".to_string());
        assert!(matches!(
            resolve(None, PathBuf::from("/unused"), lookup),
            Err(ConfigError::Env {
                var: "DEALSCOUT_CONCURRENCY",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let lookup = |k: &str| (k == "DEALSCOUT_CONCURRENCY").then(|| "0".to_string());
        assert!(matches!(
            resolve(None, PathBuf::from("/unused"), lookup),
            Err(ConfigError::OutOfRange {
                key: "concurrency_limit",
                ..
            })
        ));
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            &temp,
            r#"
engine:
  signal_weights:
    batch_membership: 0.5
    funding_round: 0.5
    hiring_activity: 0.15
    product_announcement: 0.15
    code_activity: 0.12
    other: 0.08
"#,
        );
        assert!(matches!(
            resolve(Some(path), PathBuf::from("/unused"), no_env),
            Err(ConfigError::Weights(InvalidWeights::BadSum { .. }))
        ));
    }

    #[test]
    fn test_threshold_ordering_rejected() {
        let mut engine = EngineSettings::default();
        engine.thresholds = Thresholds {
            verified: 0.3,
            uncertain: 0.5,
        };
        assert!(matches!(engine.validate(), Err(ConfigError::Weights(_))));
    }

    #[test]
    fn test_mutation_rate_range() {
        let mut engine = EngineSettings::default();
        for rate in [0.0, 1.0, 1.5] {
            engine.evolution.mutation_rate = rate;
            assert!(
                matches!(engine.validate(), Err(ConfigError::OutOfRange { key: "evolution.mutation_rate", .. })),
                "rate {} accepted",
                rate
            );
        }
        engine.evolution.mutation_rate = 0.99;
        assert!(engine.validate().is_ok());
    }

    #[test]
    fn test_unreadable_config() {
        let result = resolve(
            Some(PathBuf::from("/nonexistent/.dealscout/config.yaml")),
            PathBuf::from("/unused"),
            no_env,
        );
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
