//! Configuration data model and validation.
//!
//! `auraconfig.yaml` deserializes into [`SystemConfig`]; [`ConfigStore`]
//! (in [`store`]) owns the live copy and the save protocol, while
//! [`loader`] handles the search order, layering, and environment overrides.

mod loader;
mod store;

pub use store::ConfigStore;

use aurarouter_abstraction::Locality;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading, validating, or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration is structurally wrong at `path`; no partial state
    /// is exposed when this is returned.
    #[error("config_invalid at '{path}': {reason}")]
    Invalid { path: String, reason: String },

    /// No configuration file could be found in any searched location.
    #[error("could not find 'auraconfig.yaml'; searched:\n{searched}")]
    NotFound { searched: String },

    /// Reading or writing the file failed.
    #[error("configuration I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid YAML.
    #[error("configuration is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    pub(crate) fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid { path: path.into(), reason: reason.into() }
    }
}

/// The closed set of backend kinds an entry can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "ollama")]
    Ollama,
    #[serde(rename = "llamacpp-http")]
    LlamaCppHttp,
    #[serde(rename = "llamacpp-embedded")]
    LlamaCppEmbedded,
    #[serde(rename = "openai-compatible")]
    OpenAiCompatible,
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "anthropic")]
    Anthropic,
}

impl ProviderKind {
    /// The stable config-file spelling of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::LlamaCppHttp => "llamacpp-http",
            ProviderKind::LlamaCppEmbedded => "llamacpp-embedded",
            ProviderKind::OpenAiCompatible => "openai-compatible",
            ProviderKind::Google => "google",
            ProviderKind::Anthropic => "anthropic",
        }
    }

    /// Whether this kind talks to a remote third-party service by default.
    pub fn is_cloud(&self) -> bool {
        matches!(self, ProviderKind::Google | ProviderKind::Anthropic)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured model backend.
///
/// Entries are created on config load, replaced wholesale on reload, and
/// never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Which adapter services this entry.
    pub provider: ProviderKind,

    /// Base URL for HTTP-backed kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Backend-side model name (e.g. an Ollama tag or a cloud model id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    /// Path to a local GGUF file, for the embedded kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,

    /// Inline API key. Placeholder values are treated as absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Name of an environment variable holding the API key.
    #[serde(default, alias = "env_key", skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Opaque capability tags. Only `private` is interpreted by the core.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Provider-specific generation parameters (temperature, n_ctx, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, serde_yaml::Value>,

    /// Explicit locality override; defaulted from the endpoint when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality: Option<Locality>,
}

impl ModelEntry {
    /// Minimal entry for a given kind; used by the asset registry and tests.
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            endpoint: None,
            model_name: None,
            model_path: None,
            api_key: None,
            api_key_env: None,
            tags: Vec::new(),
            parameters: BTreeMap::new(),
            locality: None,
        }
    }

    /// Effective locality: the explicit override, else defaulted from the
    /// provider kind and endpoint host.
    pub fn locality(&self) -> Locality {
        if let Some(locality) = self.locality {
            return locality;
        }
        match self.provider {
            ProviderKind::LlamaCppEmbedded => Locality::Local,
            ProviderKind::Google | ProviderKind::Anthropic => Locality::Cloud,
            _ => match self.endpoint.as_deref() {
                Some(endpoint) if is_local_endpoint(endpoint) => Locality::Local,
                Some(_) => Locality::Cloud,
                None => Locality::Local,
            },
        }
    }

    /// Whether this entry carries the `private` tag.
    pub fn is_private(&self) -> bool {
        self.tags.iter().any(|t| t == "private")
    }

    /// Reads a numeric parameter.
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(serde_yaml::Value::as_f64)
    }

    /// Reads an integer parameter.
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.parameters.get(key).and_then(serde_yaml::Value::as_u64)
    }

    /// Reads a string parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(serde_yaml::Value::as_str)
    }

    /// Checks the kind/field matrix for this entry.
    ///
    /// # Errors
    /// Returns `config_invalid` naming the offending field. The same rules
    /// are enforced again (fail-fast) when the registry builds the adapter.
    pub fn validate(&self, id: &str) -> Result<(), ConfigError> {
        let at = |field: &str| format!("models.{id}.{field}");
        let require = |present: bool, field: &str| {
            if present {
                Ok(())
            } else {
                Err(ConfigError::invalid(
                    at(field),
                    format!("'{field}' is required for provider '{}'", self.provider),
                ))
            }
        };
        let forbid = |absent: bool, field: &str| {
            if absent {
                Ok(())
            } else {
                Err(ConfigError::invalid(
                    at(field),
                    format!("'{field}' is not allowed for provider '{}'", self.provider),
                ))
            }
        };

        match self.provider {
            ProviderKind::Ollama => {
                require(self.endpoint.is_some(), "endpoint")?;
                require(self.model_name.is_some(), "model_name")?;
                forbid(self.model_path.is_none(), "model_path")?;
            }
            ProviderKind::LlamaCppHttp => {
                require(self.endpoint.is_some(), "endpoint")?;
                forbid(self.model_path.is_none(), "model_path")?;
            }
            ProviderKind::LlamaCppEmbedded => {
                require(self.model_path.is_some(), "model_path")?;
                forbid(self.endpoint.is_none(), "endpoint")?;
            }
            ProviderKind::OpenAiCompatible => {
                require(self.endpoint.is_some(), "endpoint")?;
                require(self.model_name.is_some(), "model_name")?;
                forbid(self.model_path.is_none(), "model_path")?;
            }
            ProviderKind::Google | ProviderKind::Anthropic => {
                require(self.model_name.is_some(), "model_name")?;
                forbid(self.model_path.is_none(), "model_path")?;
            }
        }
        Ok(())
    }
}

fn is_local_endpoint(endpoint: &str) -> bool {
    let endpoint = endpoint.to_ascii_lowercase();
    endpoint.starts_with("unix:")
        || endpoint.contains("://localhost")
        || endpoint.contains("://127.0.0.1")
        || endpoint.contains("://[::1]")
}

/// The `system:` section of the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSection {
    /// Log verbosity hint for the host application.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Per-call deadline applied when the caller does not supply one.
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,

    /// Responses shorter than this (after trimming) count as empty.
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,

    /// Upper bound on planner output length.
    #[serde(default = "default_max_plan_steps")]
    pub max_plan_steps: usize,

    /// Storage root for downloaded GGUF assets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_seconds() -> u64 {
    120
}

fn default_min_chars() -> usize {
    1
}

fn default_max_plan_steps() -> usize {
    12
}

impl Default for SystemSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            default_timeout_seconds: default_timeout_seconds(),
            min_chars: default_min_chars(),
            max_plan_steps: default_max_plan_steps(),
            models_dir: None,
        }
    }
}

/// A user-supplied privacy detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomPattern {
    /// Stable detector name, reported in audit reasons.
    pub name: String,
    /// The regular expression to scan with.
    pub pattern: String,
}

/// The `privacy:` section of the configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrivacySection {
    /// Built-in detectors to switch off, by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_detectors: Vec<String>,

    /// Additional detectors to run alongside the built-ins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_patterns: Vec<CustomPattern>,
}

impl PrivacySection {
    fn is_default(&self) -> bool {
        self.disabled_detectors.is_empty() && self.custom_patterns.is_empty()
    }
}

/// The full configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub system: SystemSection,

    /// Configured backends, keyed by stable id.
    #[serde(default)]
    pub models: BTreeMap<String, ModelEntry>,

    /// Role -> ordered fallback chain of model ids. The nested
    /// `{role: {models: [...]}}` layout is accepted on read and
    /// normalized to the flat form on write.
    #[serde(default, deserialize_with = "de_role_chains")]
    pub roles: BTreeMap<String, Vec<String>>,

    /// Role -> synonym list, extending the built-in verb table.
    #[serde(default)]
    pub semantic_verbs: BTreeMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "PrivacySection::is_default")]
    pub privacy: PrivacySection,

    /// Unknown top-level keys: ignored by the core, preserved on save.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

fn de_role_chains<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ChainForm {
        Flat(Vec<String>),
        Nested { models: Vec<String> },
    }

    let raw = BTreeMap::<String, ChainForm>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(role, form)| {
            let chain = match form {
                ChainForm::Flat(ids) => ids,
                ChainForm::Nested { models } => models,
            };
            (role, chain)
        })
        .collect())
}

impl SystemConfig {
    /// Validates the whole tree: the kind/field matrix for every model,
    /// presence of the required roles, and chain integrity.
    ///
    /// # Errors
    /// `config_invalid` naming the first offending path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (id, entry) in &self.models {
            entry.validate(id)?;
        }

        for role in crate::roles::REQUIRED_ROLES {
            match self.roles.get(role) {
                Some(chain) if !chain.is_empty() => {}
                Some(_) => {
                    return Err(ConfigError::invalid(
                        format!("roles.{role}"),
                        "required role has an empty chain",
                    ))
                }
                None => {
                    return Err(ConfigError::invalid(
                        format!("roles.{role}"),
                        "required role is not configured",
                    ))
                }
            }
        }

        for pattern in &self.privacy.custom_patterns {
            if let Err(e) = regex::Regex::new(&pattern.pattern) {
                return Err(ConfigError::invalid(
                    format!("privacy.custom_patterns.{}", pattern.name),
                    format!("pattern does not compile: {e}"),
                ));
            }
        }

        for (role, chain) in &self.roles {
            let mut seen = std::collections::BTreeSet::new();
            for id in chain {
                if !self.models.contains_key(id) {
                    return Err(ConfigError::invalid(
                        format!("roles.{role}"),
                        format!("chain references unknown model '{id}'"),
                    ));
                }
                if !seen.insert(id) {
                    return Err(ConfigError::invalid(
                        format!("roles.{role}"),
                        format!("chain lists model '{id}' more than once"),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Serializes with the documented top-level key order: `system`,
    /// `models`, `roles`, `semantic_verbs`, then preserved unknown keys.
    /// YAML comments are not preserved.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        let mut root = serde_yaml::Mapping::new();
        root.insert("system".into(), serde_yaml::to_value(&self.system)?);
        root.insert("models".into(), serde_yaml::to_value(&self.models)?);
        root.insert("roles".into(), serde_yaml::to_value(&self.roles)?);
        root.insert(
            "semantic_verbs".into(),
            serde_yaml::to_value(&self.semantic_verbs)?,
        );
        if !self.privacy.is_default() {
            root.insert("privacy".into(), serde_yaml::to_value(&self.privacy)?);
        }
        for (key, value) in &self.extra {
            root.insert(key.clone().into(), value.clone());
        }
        Ok(serde_yaml::to_string(&serde_yaml::Value::Mapping(root))?)
    }
}
