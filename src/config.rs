//! Runtime configuration
//!
//! Values come from the environment (a `.env` file is loaded by the binary)
//! and can be overridden by command-line flags. Everything is validated once
//! at startup and then passed by value; nothing here is global.

use crate::error::{NlqError, Result};
use crate::retry::RetryPolicy;
use clap::ValueEnum;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_DATASET: &str = "data/processed/healthcare_dataset.csv";
pub const DEFAULT_TRUNCATION_LIMIT: usize = 200;

/// Model presets offered to end users
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModelTier {
    Smart,
    Smarter,
    EvenSmarter,
}

impl ModelTier {
    pub fn model_name(self) -> &'static str {
        match self {
            ModelTier::Smart => "gpt-4o",
            ModelTier::Smarter => "gpt-4.1",
            ModelTier::EvenSmarter => "o4-mini",
        }
    }
}

/// Pipeline behaviour, fixed per agent instance
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Review generated SQL (and regenerate it) before execution
    pub double_check: bool,
    /// Maximum rows returned to the caller
    pub truncation_limit: usize,
    /// Whole-invocation attempts when query generation keeps faulting
    pub pipeline_attempts: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            double_check: false,
            truncation_limit: DEFAULT_TRUNCATION_LIMIT,
            pipeline_attempts: 3,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.truncation_limit == 0 {
            return Err(NlqError::Config(
                "truncation limit must be greater than 0".to_string(),
            ));
        }
        if self.pipeline_attempts == 0 {
            return Err(NlqError::Config(
                "pipeline attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection settings for the language model
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    /// Per-call timeout
    pub timeout: Duration,
    /// Retry policy applied at every model call
    pub retry: RetryPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(NlqError::Config(
                "stage retries must allow at least 1 attempt".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(NlqError::Config("LLM timeout must be positive".to_string()));
        }
        Ok(())
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                NlqError::Config("OPENAI_API_KEY is not set (use --api-key or .env)".to_string())
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub dataset_path: PathBuf,
    pub log_file: Option<PathBuf>,
    pub gateway: GatewayConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let gateway_defaults = GatewayConfig::default();
        let pipeline_defaults = PipelineConfig::default();

        // LLM_RETRIES counts retries after the first call, NLQ_STAGE_RETRIES counts attempts.
        let stage_attempts = match lookup("NLQ_STAGE_RETRIES") {
            Some(_) => parse_or(&lookup, "NLQ_STAGE_RETRIES", gateway_defaults.retry.max_attempts)?,
            None => match lookup("LLM_RETRIES") {
                Some(_) => parse_or(&lookup, "LLM_RETRIES", gateway_defaults.retry.max_attempts.saturating_sub(1))?
                    .saturating_add(1),
                None => gateway_defaults.retry.max_attempts,
            },
        };
        let timeout_secs = parse_or(&lookup, "NLQ_LLM_TIMEOUT_SECS", gateway_defaults.timeout.as_secs())?;

        let config = Self {
            dataset_path: lookup("NLQ_DATASET")
                .or_else(|| lookup("DATA_PATH"))
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATASET)),
            log_file: lookup("NLQ_LOG_FILE").filter(|v| !v.is_empty()).map(PathBuf::from),
            gateway: GatewayConfig {
                api_key: lookup("OPENAI_API_KEY"),
                model: lookup("OPENAI_MODEL").unwrap_or(gateway_defaults.model),
                base_url: lookup("OPENAI_BASE_URL").unwrap_or(gateway_defaults.base_url),
                timeout: Duration::from_secs(timeout_secs),
                retry: RetryPolicy {
                    max_attempts: stage_attempts,
                    ..gateway_defaults.retry
                },
            },
            pipeline: PipelineConfig {
                double_check: parse_bool_or(&lookup, "NLQ_DOUBLE_CHECK", pipeline_defaults.double_check)?,
                truncation_limit: parse_or(
                    &lookup,
                    "NLQ_TRUNCATION_LIMIT",
                    pipeline_defaults.truncation_limit,
                )?,
                pipeline_attempts: parse_or(
                    &lookup,
                    "NLQ_PIPELINE_ATTEMPTS",
                    pipeline_defaults.pipeline_attempts,
                )?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.gateway.validate()?;
        self.pipeline.validate()
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| NlqError::Config(format!("invalid {}={:?}: {}", key, raw, e))),
        _ => Ok(default),
    }
}

fn parse_bool_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(NlqError::Config(format!("invalid {}={:?}: expected a boolean", key, v))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.dataset_path, PathBuf::from(DEFAULT_DATASET));
        assert_eq!(config.gateway.model, DEFAULT_MODEL);
        assert_eq!(config.pipeline, PipelineConfig::default());
        assert!(config.gateway.require_api_key().is_err());
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "gpt-4.1"),
            ("NLQ_DOUBLE_CHECK", "yes"),
            ("NLQ_TRUNCATION_LIMIT", "50"),
            ("NLQ_STAGE_RETRIES", "5"),
            ("NLQ_LOG_FILE", "db_agent.log"),
        ]))
        .unwrap();

        assert_eq!(config.gateway.require_api_key().unwrap(), "sk-test");
        assert_eq!(config.gateway.model, "gpt-4.1");
        assert_eq!(config.gateway.retry.max_attempts, 5);
        assert!(config.pipeline.double_check);
        assert_eq!(config.pipeline.truncation_limit, 50);
        assert_eq!(config.log_file, Some(PathBuf::from("db_agent.log")));
    }

    #[test]
    fn test_legacy_variable_names() {
        let config = AppConfig::from_lookup(lookup(&[
            ("DATA_PATH", "data/other.csv"),
            ("LLM_RETRIES", "2"),
        ]))
        .unwrap();
        assert_eq!(config.dataset_path, PathBuf::from("data/other.csv"));
        assert_eq!(config.gateway.retry.max_attempts, 3);

        let config = AppConfig::from_lookup(lookup(&[
            ("NLQ_DATASET", "data/new.csv"),
            ("DATA_PATH", "data/other.csv"),
            ("NLQ_STAGE_RETRIES", "4"),
            ("LLM_RETRIES", "9"),
        ]))
        .unwrap();
        assert_eq!(config.dataset_path, PathBuf::from("data/new.csv"));
        assert_eq!(config.gateway.retry.max_attempts, 4);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[("NLQ_TRUNCATION_LIMIT", "0")])),
            Err(NlqError::Config(_))
        ));
        assert!(AppConfig::from_lookup(lookup(&[("NLQ_TRUNCATION_LIMIT", "-5")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("NLQ_DOUBLE_CHECK", "maybe")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("NLQ_PIPELINE_ATTEMPTS", "0")])).is_err());
    }

    #[test]
    fn test_model_tiers() {
        assert_eq!(ModelTier::Smart.model_name(), "gpt-4o");
        assert_eq!(ModelTier::Smarter.model_name(), "gpt-4.1");
        assert_eq!(ModelTier::EvenSmarter.model_name(), "o4-mini");
    }
}
