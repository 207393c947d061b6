// SPDX-License-Identifier: MIT

//! Workflow configuration
//!
//! Values are layered with figment, later layers winning:
//! 1. Built-in defaults
//! 2. An optional YAML file
//! 3. Environment variables prefixed `POLICY_EVAL_`, with `__` separating
//!    nested keys (`POLICY_EVAL_CACHE__TTL_SECS=60`)

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::flow::cache::{CacheManager, FileCacheStore};
use crate::flow::error::ConfigurationError;
use crate::flow::node::LlmSettings;
use crate::flow::rate_limiter::{RateLimiter, ThrottleMode};

pub const ENV_PREFIX: &str = "POLICY_EVAL_";

pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4-20250514";

/// Top-level configuration shared by every node of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub temperature: f32,
    /// Attempts per LLM request for transient failures
    pub max_retries: u32,
    /// Wait before the first retry, doubled after each failure
    pub retry_wait_ms: u64,
    pub llm_timeout_secs: u64,
    /// Router cycle guard
    pub max_steps: usize,
    pub confidence_gate: ConfidenceGateConfig,
    pub cache: CacheConfig,
    pub throttle: ThrottleConfig,
    pub models: ModelConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_retries: 3,
            retry_wait_ms: 2000,
            llm_timeout_secs: 60,
            max_steps: 100,
            confidence_gate: ConfidenceGateConfig::default(),
            cache: CacheConfig::default(),
            throttle: ThrottleConfig::default(),
            models: ModelConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceGateConfig {
    /// At or above: high confidence
    pub high: f64,
    /// Below: low confidence
    pub low: f64,
}

impl Default for ConfidenceGateConfig {
    fn default() -> Self {
        Self {
            high: 0.8,
            low: 0.5,
        }
    }
}

impl ConfidenceGateConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let in_range = (0.0..=1.0).contains(&self.low) && (0.0..=1.0).contains(&self.high);
        if !in_range || self.high <= self.low {
            return Err(ConfigurationError::InvalidThresholds {
                high: self.high,
                low: self.low,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Entry lifetime; zero disables caching
    pub ttl_secs: u64,
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
            dir: PathBuf::from(".cache"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub enabled: bool,
    /// Requests per minute per node instance
    pub rpm: u32,
    pub mode: ThrottleMode,
    pub max_wait_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rpm: 60,
            mode: ThrottleMode::Block,
            max_wait_secs: 30,
        }
    }
}

/// What a model is used for; each role may override the default model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Classifier,
    DataExtractor,
    Sentiment,
    Criterion,
    Analyze,
    Hypothesize,
    Optimize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub default_model: String,
    pub classifier_model: Option<String>,
    pub data_extractor_model: Option<String>,
    pub sentiment_model: Option<String>,
    pub criterion_model: Option<String>,
    pub analyze_model: Option<String>,
    pub hypothesize_model: Option<String>,
    pub optimize_model: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            classifier_model: None,
            data_extractor_model: None,
            sentiment_model: None,
            criterion_model: None,
            analyze_model: None,
            hypothesize_model: None,
            optimize_model: None,
        }
    }
}

impl ModelConfig {
    /// Model for a role, falling back to the default model
    pub fn model_for(&self, role: ModelRole) -> &str {
        let specific = match role {
            ModelRole::Classifier => &self.classifier_model,
            ModelRole::DataExtractor => &self.data_extractor_model,
            ModelRole::Sentiment => &self.sentiment_model,
            ModelRole::Criterion => &self.criterion_model,
            ModelRole::Analyze => &self.analyze_model,
            ModelRole::Hypothesize => &self.hypothesize_model,
            ModelRole::Optimize => &self.optimize_model,
        };
        specific.as_deref().unwrap_or(&self.default_model)
    }
}

impl WorkflowConfig {
    /// The layered provider stack, without extracting
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(WorkflowConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load defaults, an optional YAML file and environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let config: WorkflowConfig = Self::figment(path).extract().map_err(|e| {
            ConfigurationError::Invalid(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document over the defaults, ignoring the environment
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigurationError> {
        let config: WorkflowConfig = Figment::from(Serialized::defaults(WorkflowConfig::default()))
            .merge(Yaml::string(content))
            .extract()
            .map_err(|e| {
                ConfigurationError::Invalid(format!("Failed to parse configuration: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.confidence_gate.validate()?;

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigurationError::Invalid(format!(
                "temperature must be within [0, 2], got {}",
                self.temperature
            )));
        }
        if self.max_steps == 0 {
            return Err(ConfigurationError::Invalid(
                "max_steps must be at least 1".to_string(),
            ));
        }
        if self.throttle.rpm == 0 {
            return Err(ConfigurationError::Invalid(
                "throttle.rpm must be at least 1".to_string(),
            ));
        }
        if self.models.default_model.trim().is_empty() {
            return Err(ConfigurationError::Invalid(
                "models.default_model must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// LLM settings for a role, with an optional per-node model override
    pub fn llm_settings(&self, role: ModelRole, model_override: Option<&str>) -> LlmSettings {
        LlmSettings {
            model: model_override
                .unwrap_or_else(|| self.models.model_for(role))
                .to_string(),
            temperature: self.temperature,
            max_retries: self.max_retries,
            retry_wait: Duration::from_millis(self.retry_wait_ms),
            timeout: Duration::from_secs(self.llm_timeout_secs),
        }
    }

    /// A fresh file-backed cache for one node instance
    pub fn cache_manager(&self) -> Result<CacheManager, ConfigurationError> {
        if !self.cache.enabled || self.cache.ttl_secs == 0 {
            return Ok(CacheManager::disabled());
        }
        let store = FileCacheStore::new(&self.cache.dir).map_err(|e| {
            ConfigurationError::Invalid(format!(
                "Cannot use cache directory {}: {}",
                self.cache.dir.display(),
                e
            ))
        })?;
        Ok(CacheManager::new(
            Arc::new(store),
            Duration::from_secs(self.cache.ttl_secs),
        ))
    }

    /// A fresh token bucket for one node instance
    pub fn rate_limiter(&self) -> RateLimiter {
        if !self.throttle.enabled {
            return RateLimiter::unlimited();
        }
        RateLimiter::per_minute(self.throttle.rpm)
            .with_mode(self.throttle.mode)
            .with_max_wait(Duration::from_secs(self.throttle.max_wait_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = WorkflowConfig::default();
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.confidence_gate.high, 0.8);
        assert_eq!(config.confidence_gate.low, 0.5);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert!(!config.throttle.enabled);
        assert_eq!(config.throttle.rpm, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let config = WorkflowConfig::from_yaml_str(
            r#"
temperature: 0.2
confidence_gate:
  high: 0.9
throttle:
  enabled: true
  rpm: 10
  mode: fail_fast
models:
  default_model: "test/base"
  classifier_model: "test/fast"
"#,
        )
        .unwrap();

        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.confidence_gate.high, 0.9);
        assert_eq!(config.confidence_gate.low, 0.5);
        assert_eq!(config.throttle.mode, ThrottleMode::FailFast);
        assert_eq!(config.max_steps, 100);
        assert_eq!(config.models.model_for(ModelRole::Classifier), "test/fast");
        assert_eq!(config.models.model_for(ModelRole::Sentiment), "test/base");
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let err = WorkflowConfig::from_yaml_str("confidence_gate:\n  high: 0.4\n  low: 0.6\n")
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::InvalidThresholds {
                high: 0.4,
                low: 0.6
            }
        );

        let equal = ConfidenceGateConfig {
            high: 0.5,
            low: 0.5,
        };
        assert!(equal.validate().is_err());
    }

    #[test]
    fn test_zero_rpm_rejected() {
        assert!(WorkflowConfig::from_yaml_str("throttle:\n  rpm: 0\n").is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("policy.yaml", "max_retries: 5\ncache:\n  ttl_secs: 10\n")?;
            jail.set_env("POLICY_EVAL_CACHE__TTL_SECS", "60");
            jail.set_env("POLICY_EVAL_MODELS__SENTIMENT_MODEL", "test/sentiment");

            let config = WorkflowConfig::load(Some(Path::new("policy.yaml")))
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(config.max_retries, 5);
            assert_eq!(config.cache.ttl_secs, 60);
            assert_eq!(
                config.models.model_for(ModelRole::Sentiment),
                "test/sentiment"
            );
            Ok(())
        });
    }

    #[test]
    fn test_llm_settings_use_role_and_override() {
        let mut config = WorkflowConfig::default();
        config.models.criterion_model = Some("test/criterion".to_string());
        config.retry_wait_ms = 500;

        let settings = config.llm_settings(ModelRole::Criterion, None);
        assert_eq!(settings.model, "test/criterion");
        assert_eq!(settings.retry_wait, Duration::from_millis(500));

        let settings = config.llm_settings(ModelRole::Criterion, Some("test/pinned"));
        assert_eq!(settings.model, "test/pinned");
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let mut config = WorkflowConfig::default();
        config.cache.ttl_secs = 0;
        assert!(!config.cache_manager().unwrap().is_enabled());
    }

    #[test]
    fn test_cache_manager_uses_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WorkflowConfig::default();
        config.cache.dir = dir.path().join("llm");
        assert!(config.cache_manager().unwrap().is_enabled());
        assert!(dir.path().join("llm").is_dir());
    }

    #[test]
    fn test_rate_limiter_follows_throttle_section() {
        let mut config = WorkflowConfig::default();
        assert!(!config.rate_limiter().is_limited());

        config.throttle.enabled = true;
        config.throttle.mode = ThrottleMode::FailFast;
        let limiter = config.rate_limiter();
        assert!(limiter.is_limited());
        assert_eq!(limiter.mode(), ThrottleMode::FailFast);
    }
}
