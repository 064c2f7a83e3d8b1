use anyhow::Result;

use crate::error::NeedScoopError;

/// Secrets and environment-specific values. Everything tunable lives in the
/// TOML [`PipelineConfig`](crate::file_config::PipelineConfig).
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Providers
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub embedding_base_url: Option<String>,

    // Files
    pub config_path: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            openai_api_key: non_empty_env("OPENAI_API_KEY"),
            anthropic_api_key: non_empty_env("ANTHROPIC_API_KEY"),
            embedding_base_url: non_empty_env("EMBEDDING_BASE_URL"),
            config_path: non_empty_env("NEEDSCOOP_CONFIG"),
        };

        config.log_keys();
        Ok(config)
    }

    pub fn require_openai_key(&self) -> Result<&str, NeedScoopError> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| NeedScoopError::Config("OPENAI_API_KEY is required".into()))
    }

    pub fn require_anthropic_key(&self) -> Result<&str, NeedScoopError> {
        self.anthropic_api_key
            .as_deref()
            .ok_or_else(|| NeedScoopError::Config("ANTHROPIC_API_KEY is required".into()))
    }

    fn log_keys(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  OPENAI_API_KEY: {}", preview_opt(&self.openai_api_key));
        tracing::info!("  ANTHROPIC_API_KEY: {}", preview_opt(&self.anthropic_api_key));
        tracing::info!(
            "  EMBEDDING_BASE_URL: {}",
            self.embedding_base_url.as_deref().unwrap_or("<default>")
        );
        tracing::info!(
            "  NEEDSCOOP_CONFIG: {}",
            self.config_path.as_deref().unwrap_or("<not set>")
        );
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn preview(val: &str) -> String {
    let n = val
        .char_indices()
        .nth(5)
        .map(|(i, _)| i)
        .unwrap_or(val.len());
    format!("{}...({} chars)", &val[..n], val.chars().count())
}

fn preview_opt(val: &Option<String>) -> String {
    match val {
        Some(v) if !v.is_empty() => preview(v),
        _ => "<not set>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_redacts_all_but_prefix() {
        assert_eq!(preview("sk-abcdefghij"), "sk-ab...(13 chars)");
        assert_eq!(preview("abc"), "abc...(3 chars)");
    }

    #[test]
    fn missing_keys_are_config_errors() {
        let config = AppConfig {
            openai_api_key: None,
            anthropic_api_key: Some("sk-ant".into()),
            embedding_base_url: None,
            config_path: None,
        };
        assert!(matches!(
            config.require_openai_key(),
            Err(NeedScoopError::Config(_))
        ));
        assert_eq!(config.require_anthropic_key().unwrap(), "sk-ant");
    }
}
