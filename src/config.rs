//! Environment-driven configuration.

use std::env;

use thiserror::Error;

use agent_core::planner::cerebras::{DEFAULT_API_BASE, DEFAULT_MODEL};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("CEREBRAS_API_KEY is not set; export it or add it to your environment")]
    MissingApiKey,
}

/// Runtime configuration resolved from the environment.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = env::var("CEREBRAS_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        Ok(Self {
            api_key,
            model: env::var("LLM_MODEL_NAME")
                .ok()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_base: env::var("LLM_API_BASE")
                .ok()
                .filter(|base| !base.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        })
    }
}

/// True when running under CI without an explicit opt-in: the agent must
/// not burn LLM tokens from unattended pipelines.
pub fn ai_disabled_in_ci() -> bool {
    let in_ci = env::var("CI").map(|v| v == "true" || v == "1").unwrap_or(false);
    let allowed = env::var("ALLOW_AI_IN_CI").map(|v| !v.is_empty()).unwrap_or(false);
    in_ci && !allowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn missing_key_is_a_config_error() {
        std::env::remove_var("CEREBRAS_API_KEY");
        assert!(matches!(AppConfig::from_env(), Err(ConfigError::MissingApiKey)));
    }

    #[test]
    #[serial]
    fn defaults_apply_when_only_key_is_set() {
        std::env::set_var("CEREBRAS_API_KEY", "k");
        std::env::remove_var("LLM_MODEL_NAME");
        std::env::remove_var("LLM_API_BASE");
        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.model, "llama3.1-70b");
        assert_eq!(config.api_base, "https://api.cerebras.ai/v1");
        std::env::remove_var("CEREBRAS_API_KEY");
    }

    #[test]
    #[serial]
    fn ci_guard_requires_opt_in() {
        std::env::set_var("CI", "true");
        std::env::remove_var("ALLOW_AI_IN_CI");
        assert!(ai_disabled_in_ci());
        std::env::set_var("ALLOW_AI_IN_CI", "1");
        assert!(!ai_disabled_in_ci());
        std::env::remove_var("CI");
        std::env::remove_var("ALLOW_AI_IN_CI");
    }
}
