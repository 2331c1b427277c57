//! Materializes provider adapters from configuration entries.

use crate::{AnthropicProvider, GoogleProvider, LlamaCppHttpProvider, OllamaProvider, OpenAiCompatProvider};
use aurarouter_abstraction::{Provider, ProviderError};
use aurarouter_core::{ModelEntry, ProviderKind};
use std::sync::Arc;
use tracing::debug;

/// Conventional key variables consulted when an entry names neither
/// `api_key` nor `api_key_env`.
const GOOGLE_KEY_ENV: &str = "GOOGLE_API_KEY";
const ANTHROPIC_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Builds adapters, enforcing the kind/field matrix fail-fast.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderFactory;

impl ProviderFactory {
    /// Creates the adapter for one configuration entry.
    ///
    /// # Errors
    /// `adapter_build` when the entry violates the field matrix, a required
    /// API key cannot be resolved, or the backing feature is not compiled in.
    pub fn build(
        id: &str,
        entry: &ModelEntry,
        min_chars: usize,
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        entry.validate(id).map_err(|e| ProviderError::Build {
            model_id: id.to_string(),
            reason: e.to_string(),
        })?;
        debug!(model_id = %id, provider = %entry.provider, "building adapter");

        match entry.provider {
            ProviderKind::Ollama => {
                Ok(Arc::new(OllamaProvider::from_entry(id, entry, min_chars)?))
            }
            ProviderKind::LlamaCppHttp => {
                Ok(Arc::new(LlamaCppHttpProvider::from_entry(id, entry, min_chars)?))
            }
            ProviderKind::LlamaCppEmbedded => build_embedded(id, entry, min_chars),
            ProviderKind::OpenAiCompatible => {
                let api_key = resolve_api_key(entry, None);
                Ok(Arc::new(OpenAiCompatProvider::from_entry(id, entry, api_key, min_chars)?))
            }
            ProviderKind::Google => {
                let api_key = require_api_key(id, entry, GOOGLE_KEY_ENV)?;
                Ok(Arc::new(GoogleProvider::from_entry(id, entry, api_key, min_chars)?))
            }
            ProviderKind::Anthropic => {
                let api_key = require_api_key(id, entry, ANTHROPIC_KEY_ENV)?;
                Ok(Arc::new(AnthropicProvider::from_entry(id, entry, api_key, min_chars)?))
            }
        }
    }
}

#[cfg(feature = "embedded-llama")]
fn build_embedded(
    id: &str,
    entry: &ModelEntry,
    min_chars: usize,
) -> Result<Arc<dyn Provider>, ProviderError> {
    Ok(Arc::new(crate::LlamaCppServerProvider::from_entry(id, entry, min_chars)?))
}

#[cfg(not(feature = "embedded-llama"))]
fn build_embedded(
    id: &str,
    _entry: &ModelEntry,
    _min_chars: usize,
) -> Result<Arc<dyn Provider>, ProviderError> {
    Err(ProviderError::Build {
        model_id: id.to_string(),
        reason: "feature_not_compiled".to_string(),
    })
}

/// Resolves an entry's API key: inline value first (placeholders rejected),
/// then the named environment variable, then the conventional one.
fn resolve_api_key(entry: &ModelEntry, conventional_env: Option<&str>) -> Option<String> {
    if let Some(key) = entry.api_key.as_deref() {
        let looks_placeholder = key.contains("YOUR_API_KEY") || key.contains("YOUR_PASTED_KEY");
        if !key.trim().is_empty() && !looks_placeholder {
            return Some(key.to_string());
        }
    }
    if let Some(env_name) = entry.api_key_env.as_deref() {
        if let Ok(value) = std::env::var(env_name) {
            if !value.trim().is_empty() {
                return Some(value);
            }
        }
    }
    if let Some(env_name) = conventional_env {
        if let Ok(value) = std::env::var(env_name) {
            if !value.trim().is_empty() {
                return Some(value);
            }
        }
    }
    None
}

fn require_api_key(
    id: &str,
    entry: &ModelEntry,
    conventional_env: &str,
) -> Result<String, ProviderError> {
    resolve_api_key(entry, Some(conventional_env)).ok_or_else(|| ProviderError::Build {
        model_id: id.to_string(),
        reason: format!(
            "no API key: set 'api_key', 'api_key_env', or the {conventional_env} environment variable"
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ollama_entry() -> ModelEntry {
        let mut entry = ModelEntry::new(ProviderKind::Ollama);
        entry.endpoint = Some("http://localhost:11434".into());
        entry.model_name = Some("qwen".into());
        entry
    }

    #[test]
    fn builds_http_adapters() {
        let provider = ProviderFactory::build("m", &ollama_entry(), 1).unwrap();
        assert_eq!(provider.model_id(), "m");
    }

    #[test]
    fn field_matrix_is_enforced() {
        let mut entry = ollama_entry();
        entry.endpoint = None;
        let err = ProviderFactory::build("m", &entry, 1).unwrap_err();
        assert_eq!(err.kind(), "adapter_build");
        assert!(err.to_string().contains("endpoint"));
    }

    #[test]
    fn cloud_kind_without_key_fails_fast() {
        std::env::remove_var(ANTHROPIC_KEY_ENV);
        let mut entry = ModelEntry::new(ProviderKind::Anthropic);
        entry.model_name = Some("claude-sonnet-4-5".into());
        entry.api_key_env = Some("AURAROUTER_TEST_KEY_THAT_IS_NOT_SET".into());
        let err = ProviderFactory::build("cloud_claude", &entry, 1).unwrap_err();
        assert_eq!(err.kind(), "adapter_build");
        assert!(err.to_string().contains("no API key"));
    }

    #[test]
    fn placeholder_keys_are_rejected() {
        let mut entry = ModelEntry::new(ProviderKind::Anthropic);
        entry.model_name = Some("claude-sonnet-4-5".into());
        entry.api_key = Some("YOUR_API_KEY_HERE".into());
        assert_eq!(resolve_api_key(&entry, None), None);

        entry.api_key = Some("sk-real".into());
        assert_eq!(resolve_api_key(&entry, None).as_deref(), Some("sk-real"));
    }

    #[test]
    fn api_key_env_is_consulted() {
        std::env::set_var("AURAROUTER_FACTORY_TEST_KEY", "from-env");
        let mut entry = ModelEntry::new(ProviderKind::Google);
        entry.model_name = Some("gemini-2.0-flash".into());
        entry.api_key_env = Some("AURAROUTER_FACTORY_TEST_KEY".into());
        assert_eq!(resolve_api_key(&entry, None).as_deref(), Some("from-env"));
        std::env::remove_var("AURAROUTER_FACTORY_TEST_KEY");
    }

    #[cfg(not(feature = "embedded-llama"))]
    #[test]
    fn embedded_without_feature_reports_not_compiled() {
        let mut entry = ModelEntry::new(ProviderKind::LlamaCppEmbedded);
        entry.model_path = Some("/models/q.gguf".into());
        let err = ProviderFactory::build("emb", &entry, 1).unwrap_err();
        assert!(err.to_string().contains("feature_not_compiled"));
    }

    #[cfg(feature = "embedded-llama")]
    #[test]
    fn embedded_with_feature_builds() {
        let mut entry = ModelEntry::new(ProviderKind::LlamaCppEmbedded);
        entry.model_path = Some("/models/q.gguf".into());
        let provider = ProviderFactory::build("emb", &entry, 1).unwrap();
        assert_eq!(provider.model_id(), "emb");
    }
}
