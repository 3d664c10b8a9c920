//! Run configuration and provider-readiness checks (C11). `RunConfig` is
//! loaded from an optional YAML file, then has `LONGEVITY_*` environment
//! overrides layered on top, following this codebase's existing
//! `load_or_default` / `apply_env_overrides` / `load_with_env` idiom.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "model '{model}' looks like an OpenAI model but no usable API key was found (set OPENAI_API_KEY)"
    )]
    MissingOpenAiKey { model: String },
    #[error(
        "model '{model}' looks like a managed-ecosystem model but team-id/api-token credentials were not found"
    )]
    MissingManagedCredentials { model: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_turn_limit")]
    pub turn_limit: u32,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_validator_url")]
    pub validator_url: String,
    #[serde(default = "default_true")]
    pub enable_validator: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_tool_concurrency")]
    pub tool_concurrency: usize,
    #[serde(default = "default_validator_timeout_secs")]
    pub validator_timeout_secs: u64,
    #[serde(default = "default_validator_retries")]
    pub validator_retries: u32,
}

fn default_turn_limit() -> u32 {
    9
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_validator_url() -> String {
    "http://127.0.0.1:8787/validate".to_string()
}
fn default_true() -> bool {
    true
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./longevity_runs")
}
fn default_seed() -> u64 {
    42
}
fn default_tool_concurrency() -> usize {
    5
}
fn default_validator_timeout_secs() -> u64 {
    12
}
fn default_validator_retries() -> u32 {
    2
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            turn_limit: default_turn_limit(),
            model: default_model(),
            validator_url: default_validator_url(),
            enable_validator: default_true(),
            output_dir: default_output_dir(),
            seed: default_seed(),
            tool_concurrency: default_tool_concurrency(),
            validator_timeout_secs: default_validator_timeout_secs(),
            validator_retries: default_validator_retries(),
        }
    }
}

impl RunConfig {
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RunConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        match path {
            Some(p) if p.exists() => Self::from_file(p),
            _ => Ok(Self::default()),
        }
    }

    /// Apply `LONGEVITY_*` environment variable overrides.
    ///
    /// Supported: `LONGEVITY_TURN_LIMIT`, `LONGEVITY_MODEL`,
    /// `LONGEVITY_VALIDATOR_URL`, `LONGEVITY_ENABLE_VALIDATOR`,
    /// `LONGEVITY_OUTPUT_DIR`, `LONGEVITY_SEED`,
    /// `LONGEVITY_TOOL_CONCURRENCY`.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("LONGEVITY_TURN_LIMIT")
            && let Ok(n) = val.parse::<u32>()
        {
            self.turn_limit = n;
        }

        if let Ok(val) = std::env::var("LONGEVITY_MODEL")
            && !val.is_empty()
        {
            self.model = val;
        }

        if let Ok(val) = std::env::var("LONGEVITY_VALIDATOR_URL")
            && !val.is_empty()
        {
            self.validator_url = val;
        }

        if let Ok(val) = std::env::var("LONGEVITY_ENABLE_VALIDATOR")
            && !val.is_empty()
        {
            self.enable_validator = val.eq_ignore_ascii_case("true") || val == "1";
        }

        if let Ok(val) = std::env::var("LONGEVITY_OUTPUT_DIR")
            && !val.is_empty()
        {
            self.output_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("LONGEVITY_SEED")
            && let Ok(n) = val.parse::<u64>()
        {
            self.seed = n;
        }

        if let Ok(val) = std::env::var("LONGEVITY_TOOL_CONCURRENCY")
            && let Ok(n) = val.parse::<usize>()
        {
            self.tool_concurrency = n;
        }

        self
    }

    /// Load configuration with environment variable overrides applied.
    /// Priority: config file > env vars > defaults (CLI args win over all,
    /// applied separately by the caller).
    pub fn load_with_env(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        Self::load_or_default(path).map(|c| c.apply_env_overrides())
    }
}

fn is_placeholder(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.starts_with("sk-your") || lower.ends_with("here") || lower.contains("your-")
}

fn has_usable_env(key: &str) -> bool {
    std::env::var(key)
        .map(|v| !v.is_empty() && !is_placeholder(&v))
        .unwrap_or(false)
}

/// Fail fast if the configured model needs credentials that aren't present,
/// before any expensive conversation work starts (SPEC_FULL.md §4.11).
pub fn check_provider_readiness(model: &str) -> Result<(), ConfigError> {
    let lower = model.to_ascii_lowercase();

    if (lower.starts_with("gpt-") || lower.starts_with("o3") || lower.starts_with("o4"))
        && !has_usable_env("OPENAI_API_KEY")
    {
        return Err(ConfigError::MissingOpenAiKey {
            model: model.to_string(),
        });
    }

    let looks_managed = lower.contains("claude")
        || lower.contains("llama")
        || lower.contains("nova")
        || lower.starts_with("us.")
        || lower.starts_with("mistral.");

    if looks_managed
        && !(has_usable_env("HOLISTIC_AI_TEAM_ID") && has_usable_env("HOLISTIC_AI_API_TOKEN"))
    {
        return Err(ConfigError::MissingManagedCredentials {
            model: model.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_are_sane() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.turn_limit, 9);
        assert_eq!(cfg.seed, 42);
    }

    #[test]
    fn env_override_changes_turn_limit() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::set_var("LONGEVITY_TURN_LIMIT", "3") };
        let cfg = RunConfig::default().apply_env_overrides();
        assert_eq!(cfg.turn_limit, 3);
        unsafe { std::env::remove_var("LONGEVITY_TURN_LIMIT") };
    }

    #[test]
    fn gpt_model_without_key_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::remove_var("OPENAI_API_KEY") };
        assert!(matches!(
            check_provider_readiness("gpt-4o-mini"),
            Err(ConfigError::MissingOpenAiKey { .. })
        ));
    }

    #[test]
    fn gpt_model_with_placeholder_key_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::set_var("OPENAI_API_KEY", "sk-your-key-here") };
        assert!(check_provider_readiness("gpt-4o-mini").is_err());
        unsafe { std::env::remove_var("OPENAI_API_KEY") };
    }

    #[test]
    fn gpt_model_with_real_looking_key_passes() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::set_var("OPENAI_API_KEY", "sk-abcdef1234567890") };
        assert!(check_provider_readiness("gpt-4o-mini").is_ok());
        unsafe { std::env::remove_var("OPENAI_API_KEY") };
    }

    #[test]
    fn managed_model_requires_both_team_id_and_token() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::remove_var("HOLISTIC_AI_TEAM_ID");
            std::env::remove_var("HOLISTIC_AI_API_TOKEN");
        }
        assert!(check_provider_readiness("us.anthropic.claude-3").is_err());
        unsafe {
            std::env::set_var("HOLISTIC_AI_TEAM_ID", "team-1");
            std::env::set_var("HOLISTIC_AI_API_TOKEN", "token-1");
        }
        assert!(check_provider_readiness("us.anthropic.claude-3").is_ok());
        unsafe {
            std::env::remove_var("HOLISTIC_AI_TEAM_ID");
            std::env::remove_var("HOLISTIC_AI_API_TOKEN");
        }
    }

    #[test]
    fn unrecognized_model_needs_no_credentials() {
        assert!(check_provider_readiness("local-mock-model").is_ok());
    }
}
