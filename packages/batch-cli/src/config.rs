use anyhow::{Context, Result};
use dotenvy::dotenv;
use form_extraction::security::ProviderCredentials;
use std::env;

const DEFAULT_MODELS: &str = "gpt-4o,gpt-4o-mini";

/// Provider configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: ProviderCredentials,
    /// Extractor chain, in fallback order
    pub models: Vec<String>,
    pub max_content_bytes: Option<usize>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let api_key = env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?;
        if api_key.trim().is_empty() {
            anyhow::bail!("OPENAI_API_KEY is empty");
        }

        let mut credentials = ProviderCredentials::new(api_key);
        if let Ok(url) = env::var("OPENAI_BASE_URL") {
            credentials = credentials.with_base_url(url);
        }

        let models = parse_models(
            &env::var("EXTRACTOR_MODELS").unwrap_or_else(|_| DEFAULT_MODELS.to_string()),
        );
        if models.is_empty() {
            anyhow::bail!("EXTRACTOR_MODELS names no models");
        }

        let max_content_bytes = env::var("EXTRACTOR_MAX_CONTENT_BYTES")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("EXTRACTOR_MAX_CONTENT_BYTES must be a valid number")?;

        Ok(Self {
            credentials,
            models,
            max_content_bytes,
        })
    }
}

/// Split a comma-separated model list, dropping blanks and repeats.
pub fn parse_models(raw: &str) -> Vec<String> {
    let mut models: Vec<String> = Vec::new();
    for model in raw.split(',').map(str::trim).filter(|m| !m.is_empty()) {
        if !models.iter().any(|m| m == model) {
            models.push(model.to_string());
        }
    }
    models
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_models() {
        assert_eq!(parse_models("o4-mini, gpt-4o ,,o4-mini"), vec!["o4-mini", "gpt-4o"]);
        assert!(parse_models(" , ").is_empty());
    }
}
