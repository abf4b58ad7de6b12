//! Configuration management with file persistence
//!
//! Every tunable the pipeline depends on (similarity threshold, cluster
//! size, publish threshold, gate bands, retry policy, scorer weights) lives
//! here rather than as a constant at a use site.

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Ticketlore configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub llm: LlmConfig,
    pub learning: LearningConfig,
    pub retrieval: RetrievalConfig,
    pub gate: GateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    pub default_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
}

/// Tunables for the learning pipeline (queue, clustering, synthesis, scoring)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Cosine similarity at or above which two tickets merge into a cluster
    pub similarity_threshold: f32,
    /// Clusters smaller than this never become articles
    pub min_cluster_size: usize,
    /// Generated effectiveness estimate at or above which a draft publishes
    pub publish_threshold: f64,
    /// Whether qualifying drafts are published automatically
    pub auto_publish: bool,
    /// Retry policy for failed queue items
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Jitter fraction applied to retry delays (0.1 = up to 10% extra)
    pub retry_jitter: f64,
    /// Maximum queue items claimed per worker tick
    pub worker_batch_size: usize,
    /// Seconds between worker polls when the queue is empty
    pub worker_poll_secs: u64,
    /// Concurrent synthesis calls in flight (1 respects provider rate limits)
    pub worker_concurrency: usize,
    /// Seconds between the worker's effectiveness score sweeps
    pub score_recompute_secs: u64,
    /// Effectiveness score weights: votes, usage trend, resolution correlation
    pub weight_votes: f64,
    pub weight_usage: f64,
    pub weight_resolution: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Results below this similarity are dropped entirely
    pub min_similarity: f64,
    /// Default result count when the caller does not specify one
    pub default_limit: usize,
    /// Seconds to wait for a query embedding before degrading to no results
    pub embed_timeout_secs: u64,
}

/// Confidence bands for the auto-response gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Similarity at or above this is eligible for an automatic response
    pub t_high: f64,
    /// Similarity at or above this (but below t_high) is surfaced as a suggestion
    pub t_med: f64,
    /// Feature flag: whether `auto` decisions may actually be sent
    pub auto_respond_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                api_key: None,
                default_model: "anthropic/claude-3-5-haiku-latest".to_string(),
                embedding_model: "openai/text-embedding-3-small".to_string(),
                temperature: 0.3,
                max_tokens: 2048,
                timeout_secs: 30,
            },
            learning: LearningConfig {
                similarity_threshold: 0.78,
                min_cluster_size: 2,
                publish_threshold: 0.75,
                auto_publish: true,
                retry_max_attempts: 3,
                retry_base_delay_ms: 1000,
                retry_jitter: 0.1,
                worker_batch_size: 10,
                worker_poll_secs: 30,
                worker_concurrency: 1,
                score_recompute_secs: 3600,
                weight_votes: 0.5,
                weight_usage: 0.25,
                weight_resolution: 0.25,
            },
            retrieval: RetrievalConfig {
                min_similarity: 0.3,
                default_limit: 10,
                embed_timeout_secs: 10,
            },
            gate: GateConfig {
                t_high: 0.85,
                t_med: 0.6,
                auto_respond_enabled: false,
            },
        }
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(env::var("TICKETLORE_API_KEY")
            .or_else(|_| env::var("OPENROUTER_API_KEY"))
            .ok())
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| {
            opt.map(|key| {
                if key.len() <= 4 {
                    "***".to_string()
                } else {
                    let suffix = &key[key.len() - 4..];
                    format!("***{}", suffix)
                }
            })
        })
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "LLM API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("TICKETLORE_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("ticketlore")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or create default if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.enforce_env_only()?;

        if self.gate.t_med > self.gate.t_high {
            return Err(anyhow!(
                "gate.t_med ({}) must not exceed gate.t_high ({})",
                self.gate.t_med,
                self.gate.t_high
            ));
        }
        if self.learning.min_cluster_size < 2 {
            return Err(anyhow!(
                "learning.min_cluster_size must be at least 2 (a single incident never becomes an article)"
            ));
        }
        if !(0.0..=1.0).contains(&self.learning.publish_threshold) {
            return Err(anyhow!("learning.publish_threshold must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.learning.similarity_threshold) {
            return Err(anyhow!("learning.similarity_threshold must be in [0, 1]"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            // LLM settings
            "llm.default_model" => Ok(self.llm.default_model.clone()),
            "llm.embedding_model" => Ok(self.llm.embedding_model.clone()),
            "llm.temperature" => Ok(self.llm.temperature.to_string()),
            "llm.max_tokens" => Ok(self.llm.max_tokens.to_string()),
            "llm.timeout_secs" => Ok(self.llm.timeout_secs.to_string()),

            // Learning settings
            "learning.similarity_threshold" => Ok(self.learning.similarity_threshold.to_string()),
            "learning.min_cluster_size" => Ok(self.learning.min_cluster_size.to_string()),
            "learning.publish_threshold" => Ok(self.learning.publish_threshold.to_string()),
            "learning.auto_publish" => Ok(self.learning.auto_publish.to_string()),
            "learning.retry_max_attempts" => Ok(self.learning.retry_max_attempts.to_string()),
            "learning.retry_base_delay_ms" => Ok(self.learning.retry_base_delay_ms.to_string()),
            "learning.retry_jitter" => Ok(self.learning.retry_jitter.to_string()),
            "learning.worker_batch_size" => Ok(self.learning.worker_batch_size.to_string()),
            "learning.worker_poll_secs" => Ok(self.learning.worker_poll_secs.to_string()),
            "learning.worker_concurrency" => Ok(self.learning.worker_concurrency.to_string()),
            "learning.score_recompute_secs" => Ok(self.learning.score_recompute_secs.to_string()),

            // Retrieval settings
            "retrieval.min_similarity" => Ok(self.retrieval.min_similarity.to_string()),
            "retrieval.default_limit" => Ok(self.retrieval.default_limit.to_string()),
            "retrieval.embed_timeout_secs" => Ok(self.retrieval.embed_timeout_secs.to_string()),

            // Gate settings
            "gate.t_high" => Ok(self.gate.t_high.to_string()),
            "gate.t_med" => Ok(self.gate.t_med.to_string()),
            "gate.auto_respond_enabled" => Ok(self.gate.auto_respond_enabled.to_string()),

            // API key (special handling - show redacted)
            "llm.api_key" | "api_key" => match self.llm.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok(
                    "(not set - use TICKETLORE_API_KEY or OPENROUTER_API_KEY env var)".to_string(),
                ),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `ticketlore config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "llm.default_model" => self.llm.default_model = value.to_string(),
            "llm.embedding_model" => self.llm.embedding_model = value.to_string(),
            "llm.temperature" => self.llm.temperature = value.parse()?,
            "llm.max_tokens" => self.llm.max_tokens = value.parse()?,
            "llm.timeout_secs" => self.llm.timeout_secs = value.parse()?,

            "learning.similarity_threshold" => self.learning.similarity_threshold = value.parse()?,
            "learning.min_cluster_size" => self.learning.min_cluster_size = value.parse()?,
            "learning.publish_threshold" => self.learning.publish_threshold = value.parse()?,
            "learning.auto_publish" => self.learning.auto_publish = value.parse()?,
            "learning.retry_max_attempts" => self.learning.retry_max_attempts = value.parse()?,
            "learning.retry_base_delay_ms" => self.learning.retry_base_delay_ms = value.parse()?,
            "learning.retry_jitter" => self.learning.retry_jitter = value.parse()?,
            "learning.worker_batch_size" => self.learning.worker_batch_size = value.parse()?,
            "learning.worker_poll_secs" => self.learning.worker_poll_secs = value.parse()?,
            "learning.worker_concurrency" => self.learning.worker_concurrency = value.parse()?,
            "learning.score_recompute_secs" => self.learning.score_recompute_secs = value.parse()?,

            "retrieval.min_similarity" => self.retrieval.min_similarity = value.parse()?,
            "retrieval.default_limit" => self.retrieval.default_limit = value.parse()?,
            "retrieval.embed_timeout_secs" => self.retrieval.embed_timeout_secs = value.parse()?,

            "gate.t_high" => self.gate.t_high = value.parse()?,
            "gate.t_med" => self.gate.t_med = value.parse()?,
            "gate.auto_respond_enabled" => self.gate.auto_respond_enabled = value.parse()?,

            "llm.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys are environment-only. Set TICKETLORE_API_KEY or OPENROUTER_API_KEY."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `ticketlore config list` to see available keys.",
                    key
                ));
            }
        }

        self.validate()?;
        Ok(())
    }

    /// All settable configuration keys
    pub fn list_keys() -> Vec<&'static str> {
        vec![
            "llm.default_model",
            "llm.embedding_model",
            "llm.temperature",
            "llm.max_tokens",
            "llm.timeout_secs",
            "learning.similarity_threshold",
            "learning.min_cluster_size",
            "learning.publish_threshold",
            "learning.auto_publish",
            "learning.retry_max_attempts",
            "learning.retry_base_delay_ms",
            "learning.retry_jitter",
            "learning.worker_batch_size",
            "learning.worker_poll_secs",
            "learning.worker_concurrency",
            "learning.score_recompute_secs",
            "retrieval.min_similarity",
            "retrieval.default_limit",
            "retrieval.embed_timeout_secs",
            "gate.t_high",
            "gate.t_med",
            "gate.auto_respond_enabled",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let config = Config::default();
        assert_eq!(config.gate.t_high, 0.85);
        assert_eq!(config.gate.t_med, 0.6);
        assert_eq!(config.learning.publish_threshold, 0.75);
        assert_eq!(config.learning.min_cluster_size, 2);
        assert_eq!(config.learning.retry_max_attempts, 3);
        assert_eq!(config.learning.score_recompute_secs, 3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_score_weights_sum_to_one() {
        let config = Config::default();
        let sum = config.learning.weight_votes
            + config.learning.weight_usage
            + config.learning.weight_resolution;
        assert!((sum - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_get_set_roundtrip() {
        let mut config = Config::default();
        config.set("gate.t_high", "0.9").unwrap();
        assert_eq!(config.get("gate.t_high").unwrap(), "0.9");

        config.set("learning.min_cluster_size", "3").unwrap();
        assert_eq!(config.get("learning.min_cluster_size").unwrap(), "3");
    }

    #[test]
    fn test_invalid_band_ordering_rejected() {
        let mut config = Config::default();
        let result = config.set("gate.t_med", "0.95");
        assert!(result.is_err());
    }

    #[test]
    fn test_min_cluster_size_floor() {
        let mut config = Config::default();
        assert!(config.set("learning.min_cluster_size", "1").is_err());
    }

    #[test]
    fn test_api_key_never_settable() {
        let mut config = Config::default();
        assert!(config.set("api_key", "sk-secret").is_err());
        assert!(config.set("llm.api_key", "sk-secret").is_err());
    }

    #[test]
    fn test_unknown_key() {
        let config = Config::default();
        assert!(config.get("nope.nothing").is_err());
    }

    #[test]
    fn test_enforce_env_only() {
        let mut config = Config::default();
        config.llm.api_key = Some("leaked".into());
        assert!(config.validate().is_err());
    }
}
