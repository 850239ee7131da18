//! Configuration system for ragcheck.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from the user config dir (`ragcheck/config.toml`) and/or
//! `.ragcheck/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Top-level configuration for an evaluation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
}

/// Execution envelope for the standard, custom and fallback strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Deadline for the primary strategy (seconds). The fallback gets half of it.
    #[serde(default = "default_standard_timeout")]
    pub standard_timeout_secs: u64,
    /// Timeout handed to the scorer by the fallback strategy (seconds).
    #[serde(default = "default_fallback_timeout")]
    pub fallback_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_fallback_concurrency")]
    pub fallback_concurrency: usize,
    /// Also request answer correctness (needs a reference answer and embeddings).
    #[serde(default)]
    pub include_answer_correctness: bool,
    /// Domain for the custom strategy; `None` selects the standard strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Per-metric instruction overrides for the custom strategy, keyed by metric id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instructions: BTreeMap<String, String>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            standard_timeout_secs: default_standard_timeout(),
            fallback_timeout_secs: default_fallback_timeout(),
            max_retries: default_max_retries(),
            concurrency: default_concurrency(),
            fallback_concurrency: default_fallback_concurrency(),
            include_answer_correctness: false,
            domain: None,
            instructions: BTreeMap::new(),
        }
    }
}

fn default_standard_timeout() -> u64 {
    300
}

fn default_fallback_timeout() -> u64 {
    180
}

fn default_max_retries() -> u32 {
    3
}

fn default_concurrency() -> usize {
    4
}

fn default_fallback_concurrency() -> usize {
    2
}

/// Chunking, pacing and partial-metric settings for checkpointed runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Trailing window for partial metrics. `None` keeps an exact running mean.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_window: Option<usize>,
    /// Courtesy delay per record in the chunk just scored (milliseconds).
    #[serde(default = "default_delay_per_record")]
    pub delay_per_record_ms: u64,
    /// Delay multiplier applied after a chunk that errored.
    #[serde(default = "default_backoff_factor")]
    pub error_backoff_factor: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
    /// Score written for every metric of a synthesized placeholder result.
    #[serde(default = "default_placeholder_score")]
    pub placeholder_score: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            partial_window: None,
            delay_per_record_ms: default_delay_per_record(),
            error_backoff_factor: default_backoff_factor(),
            max_delay_secs: default_max_delay(),
            placeholder_score: default_placeholder_score(),
        }
    }
}

fn default_chunk_size() -> usize {
    10
}

fn default_delay_per_record() -> u64 {
    500
}

/// Upper bound for `batch.error_backoff_factor`.
pub const MAX_BACKOFF_FACTOR: f64 = 100.0;

fn default_backoff_factor() -> f64 {
    3.0
}

fn default_max_delay() -> u64 {
    30
}

fn default_placeholder_score() -> f64 {
    0.5
}

/// Advisory resource limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory utilization (percent) above which buffers are reclaimed before a chunk.
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold_percent: f64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory_threshold_percent: default_memory_threshold(),
        }
    }
}

fn default_memory_threshold() -> f64 {
    85.0
}

/// Where checkpoints are stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Checkpoint directory, relative to the workspace unless absolute.
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
        }
    }
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".ragcheck/checkpoints")
}

impl CheckpointConfig {
    /// Resolve the checkpoint directory against a workspace root.
    pub fn resolve(&self, workspace: &Path) -> PathBuf {
        if self.dir.is_absolute() {
            self.dir.clone()
        } else {
            workspace.join(&self.dir)
        }
    }
}

/// Judge and embedding models reported in run metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            llm_model: default_llm_model(),
            embedding_model: default_embedding_model(),
        }
    }
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// Connection settings for the HTTP scoring service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Client-side request limit (0 = unlimited).
    #[serde(default)]
    pub requests_per_minute: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            requests_per_minute: 0,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8765".to_string()
}

fn default_request_timeout() -> u64 {
    600
}

impl EvalConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.chunk_size == 0 {
            return Err(ConfigError::invalid("batch.chunk_size must be > 0"));
        }
        if self.batch.partial_window == Some(0) {
            return Err(ConfigError::invalid("batch.partial_window must be > 0"));
        }
        if self.strategy.standard_timeout_secs == 0 || self.strategy.fallback_timeout_secs == 0 {
            return Err(ConfigError::invalid("strategy timeouts must be > 0"));
        }
        if !(0.0..=100.0).contains(&self.resources.memory_threshold_percent) {
            return Err(ConfigError::invalid(
                "resources.memory_threshold_percent must be within 0..=100",
            ));
        }
        if !crate::metrics::is_valid_score(self.batch.placeholder_score) {
            return Err(ConfigError::invalid(
                "batch.placeholder_score must be within [0, 1]",
            ));
        }
        if !(1.0..=MAX_BACKOFF_FACTOR).contains(&self.batch.error_backoff_factor) {
            return Err(ConfigError::invalid(format!(
                "batch.error_backoff_factor must be within 1..={MAX_BACKOFF_FACTOR}"
            )));
        }
        for key in self.strategy.instructions.keys() {
            key.parse::<crate::metrics::Metric>()
                .map_err(ConfigError::invalid)?;
        }
        Ok(())
    }
}

impl EvalConfig {
    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }
}

/// Load configuration with layered sources.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&EvalConfig>,
) -> Result<EvalConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(EvalConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "ragcheck", "ragcheck") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".ragcheck").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (RAGCHECK_BATCH__CHUNK_SIZE, RAGCHECK_SCORER__ENDPOINT, etc.)
    figment = figment.merge(Env::prefixed("RAGCHECK_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether any config file exists for the workspace.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    let user = directories::ProjectDirs::from("dev", "ragcheck", "ragcheck")
        .is_some_and(|d| d.config_dir().join("config.toml").exists());
    let ws = workspace.is_some_and(|w| w.join(".ragcheck").join("config.toml").exists());
    user || ws
}
