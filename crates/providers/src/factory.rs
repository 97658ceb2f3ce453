//! Provider factory: builds the configured upstream.

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;
use marginalia_config::AppConfig;
use marginalia_core::provider::Provider;
use std::sync::Arc;
use tracing::debug;

/// Build the provider named in the configuration.
///
/// `anthropic` gets the native Messages API client; every other name is
/// treated as an OpenAI-compatible endpoint.
pub fn build_from_config(config: &AppConfig) -> Arc<dyn Provider> {
    let name = config.provider.as_str();
    let base_url = config
        .base_url
        .clone()
        .unwrap_or_else(|| default_base_url(name));

    debug!(provider = %name, base_url = %base_url, "Building provider");

    if name == "anthropic" {
        let mut provider = AnthropicProvider::new(config.api_key.clone());
        if config.base_url.is_some() {
            provider = provider.with_base_url(base_url);
        }
        Arc::new(provider)
    } else {
        Arc::new(OpenAiCompatProvider::new(
            name,
            base_url,
            config.api_key.clone(),
        ))
    }
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "anthropic" => "https://api.anthropic.com".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => "http://localhost:8080/v1".into(),
    }
}
