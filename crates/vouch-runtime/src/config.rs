//! Runtime configuration.
//!
//! Loaded from YAML. Every section has defaults, so a file only needs the
//! parts it changes. Durations use human-readable strings (`"30s"`, `"500ms"`).
//!
//! ```yaml
//! provider:
//!   type: anthropic
//!   options:
//!     api_key_env: ANTHROPIC_API_KEY
//! classifier:
//!   model: claude-haiku-4-5
//! judges:
//!   - judge_id: judge-1
//!     model_id: claude-sonnet-4-5
//!   - judge_id: judge-2
//!     model_id: gpt-4.1
//! stability:
//!   temperatures: [0.1, 0.5, 0.9]
//!   runs_per_temperature: 3
//! call_timeout: 30s
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use vouch_core::{Difficulty, ProbeKind};

use crate::resilience::{CircuitBreakerConfig, RetryConfig};

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde adapter for `Duration` as a humantime string.
pub(crate) mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Which provider serves model calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: String,

    /// Passed to the provider factory
    #[serde(default = "empty_options")]
    pub options: JsonValue,
}

fn empty_options() -> JsonValue {
    JsonValue::Object(Default::default())
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: "anthropic".to_string(),
            options: empty_options(),
        }
    }
}

/// Sampling settings for one model role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: String,

    #[serde(default = "default_classifier_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_classifier_temperature() -> f64 {
    0.1
}

fn default_max_output_tokens() -> u32 {
    2000
}

impl ModelConfig {
    /// Low-temperature profile for the classifier under test.
    pub fn classifier() -> Self {
        Self {
            model: "claude-haiku-4-5".to_string(),
            temperature: default_classifier_temperature(),
            max_output_tokens: 1000,
        }
    }

    /// Higher-temperature profile for synthetic example generation.
    pub fn generator() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_string(),
            temperature: 0.7,
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::classifier()
    }
}

/// One member of the judge panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeSpec {
    pub judge_id: String,

    pub model_id: String,

    #[serde(default = "default_judge_temperature")]
    pub temperature: f64,

    #[serde(default = "default_judge_max_tokens")]
    pub max_output_tokens: u32,
}

fn default_judge_temperature() -> f64 {
    0.1
}

fn default_judge_max_tokens() -> u32 {
    1000
}

impl JudgeSpec {
    pub fn new(judge_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            judge_id: judge_id.into(),
            model_id: model_id.into(),
            temperature: default_judge_temperature(),
            max_output_tokens: default_judge_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub temperatures: Vec<f64>,
    pub runs_per_temperature: u32,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            temperatures: vec![0.1, 0.5, 0.9],
            runs_per_temperature: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub num_examples: usize,
    pub difficulty_levels: Vec<Difficulty>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            num_examples: 5,
            difficulty_levels: Difficulty::ALL.to_vec(),
        }
    }
}

/// Token budgets. Probes without an entry share the global budget.
///
/// Both are unlimited unless set. Usage accumulates over the evaluator's
/// lifetime until [`crate::Evaluator::reset_usage`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub global_max_tokens: Option<u32>,
    pub per_probe: BTreeMap<ProbeKind, u32>,
}

/// Judge verdict cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: u64,
    #[serde(with = "humantime_duration")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub provider: ProviderConfig,

    /// Classifier under test, when the CLI drives one
    pub classifier: ModelConfig,

    /// Model that writes synthetic examples
    pub generator: ModelConfig,

    pub judges: Vec<JudgeSpec>,

    pub stability: StabilityConfig,

    pub synthetic: SyntheticConfig,

    pub retry: RetryConfig,

    pub circuit_breaker: CircuitBreakerConfig,

    pub budgets: BudgetConfig,

    pub cache: CacheConfig,

    /// In-flight calls per probe
    pub max_concurrency: usize,

    #[serde(with = "humantime_duration")]
    pub call_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            classifier: ModelConfig::classifier(),
            generator: ModelConfig::generator(),
            judges: vec![JudgeSpec::new("judge-1", "claude-sonnet-4-5")],
            stability: StabilityConfig::default(),
            synthetic: SyntheticConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            budgets: BudgetConfig::default(),
            cache: CacheConfig::default(),
            max_concurrency: 4,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.provider_type.trim().is_empty() {
            return Err(ConfigError::Invalid("provider.type must not be empty".into()));
        }

        for (role, model) in [("classifier", &self.classifier), ("generator", &self.generator)] {
            if model.model.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{}.model must not be empty", role)));
            }
            check_temperature(&format!("{}.temperature", role), model.temperature)?;
        }

        if self.judges.is_empty() {
            return Err(ConfigError::Invalid("at least one judge is required".into()));
        }
        let mut seen = HashSet::new();
        for judge in &self.judges {
            if judge.judge_id.trim().is_empty() || judge.model_id.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "judge_id and model_id must not be empty".into(),
                ));
            }
            if !seen.insert(judge.judge_id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate judge_id '{}'",
                    judge.judge_id
                )));
            }
            check_temperature("judges.temperature", judge.temperature)?;
        }

        if self.stability.temperatures.is_empty() {
            return Err(ConfigError::Invalid("stability.temperatures must not be empty".into()));
        }
        for t in &self.stability.temperatures {
            check_temperature("stability.temperatures", *t)?;
        }
        if self.stability.runs_per_temperature == 0 {
            return Err(ConfigError::Invalid("stability.runs_per_temperature must be > 0".into()));
        }

        if self.synthetic.num_examples == 0 {
            return Err(ConfigError::Invalid("synthetic.num_examples must be > 0".into()));
        }
        if self.synthetic.difficulty_levels.is_empty() {
            return Err(ConfigError::Invalid(
                "synthetic.difficulty_levels must not be empty".into(),
            ));
        }

        if self.retry.min_delay > self.retry.max_delay {
            return Err(ConfigError::Invalid("retry.min_delay exceeds retry.max_delay".into()));
        }
        if self.circuit_breaker.failure_threshold == 0 || self.circuit_breaker.success_threshold == 0 {
            return Err(ConfigError::Invalid("circuit_breaker thresholds must be > 0".into()));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be > 0".into()));
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::Invalid("call_timeout must be > 0".into()));
        }

        Ok(())
    }
}

fn check_temperature(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=2.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{} must be within [0, 2], got {}",
            field, value
        )))
    }
}
