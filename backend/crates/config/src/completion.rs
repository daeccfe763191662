use labelcheck_common::error::{LabelError, LabelResult};
use serde::Deserialize;

use crate::env::{get_var, get_var_or, parse_var_or};

/// Upper bound on `COMPLETION_MAX_RETRIES`; backoff doubles per attempt.
pub const MAX_COMPLETION_RETRIES: u32 = 10;

/// Completion service endpoint and request policy.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// Per attempt; a timed-out attempt is not retried.
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl CompletionConfig {
    pub fn from_env() -> LabelResult<Self> {
        let _ = dotenvy::dotenv();

        let api_key = get_var("ANTHROPIC_API_KEY")?;
        if api_key.trim().is_empty() {
            return Err(LabelError::Config("ANTHROPIC_API_KEY is empty".to_string()));
        }

        let config = Self {
            api_key,
            base_url: get_var_or("COMPLETION_BASE_URL", "https://api.anthropic.com")
                .trim_end_matches('/')
                .to_string(),
            model: get_var_or("COMPLETION_MODEL", "claude-sonnet-4-5"),
            max_tokens: parse_var_or("COMPLETION_MAX_TOKENS", 4096)?,
            timeout_secs: parse_var_or("COMPLETION_TIMEOUT_SECS", 90)?,
            max_retries: parse_var_or("COMPLETION_MAX_RETRIES", 2)?,
            retry_backoff_ms: parse_var_or("COMPLETION_RETRY_BACKOFF_MS", 500)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LabelResult<()> {
        if self.max_tokens == 0 {
            return Err(LabelError::Config(
                "COMPLETION_MAX_TOKENS must be greater than zero".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(LabelError::Config(
                "COMPLETION_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        if self.max_retries > MAX_COMPLETION_RETRIES {
            return Err(LabelError::Config(format!(
                "COMPLETION_MAX_RETRIES must be at most {MAX_COMPLETION_RETRIES}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::tests::ENV_LOCK;
    use std::env;

    const KEYS: [&str; 5] = [
        "ANTHROPIC_API_KEY",
        "COMPLETION_MODEL",
        "COMPLETION_TIMEOUT_SECS",
        "COMPLETION_MAX_RETRIES",
        "COMPLETION_BASE_URL",
    ];

    fn clear() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    fn from_env_applies_defaults() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        clear();
        env::set_var("ANTHROPIC_API_KEY", "sk-test");
        env::set_var("COMPLETION_BASE_URL", "http://localhost:9000/");

        let config = CompletionConfig::from_env().expect("config");
        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.timeout_secs, 90);
        assert_eq!(config.max_retries, 2);

        clear();
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        clear();

        let err = CompletionConfig::from_env().unwrap_err();
        assert!(matches!(err, LabelError::Config(_)));
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"), "got: {err}");
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        clear();
        env::set_var("ANTHROPIC_API_KEY", "sk-test");
        env::set_var("COMPLETION_TIMEOUT_SECS", "abc");

        let err = CompletionConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("COMPLETION_TIMEOUT_SECS"), "got: {err}");

        env::remove_var("COMPLETION_TIMEOUT_SECS");
        env::set_var("COMPLETION_MAX_RETRIES", "two");
        let err = CompletionConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("COMPLETION_MAX_RETRIES"), "got: {err}");

        clear();
    }

    #[test]
    fn retry_count_is_bounded() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        clear();
        env::set_var("ANTHROPIC_API_KEY", "sk-test");
        env::set_var("COMPLETION_MAX_RETRIES", "65");

        let err = CompletionConfig::from_env().unwrap_err();
        assert!(matches!(err, LabelError::Config(_)));

        clear();
    }
}
