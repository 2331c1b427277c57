//! Configuration discovery and layering.
//!
//! Load order, lowest precedence first: built-in defaults (serde field
//! defaults) -> YAML file -> optional manifest overlay -> `AURAROUTER_*`
//! environment overrides.
//!
//! Environment override naming: strip the `AURAROUTER_` prefix, split the
//! rest on `__` (each `__` descends one level), lowercase each segment, and
//! parse the value as JSON, falling back to a plain string. Single
//! underscores are literal within a segment, so
//! `AURAROUTER_SYSTEM__DEFAULT_TIMEOUT_SECONDS=30` sets
//! `system.default_timeout_seconds` to the number 30.

use super::{ConfigError, SystemConfig};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const ENV_CONFIG_PATH: &str = "AURACORE_ROUTER_CONFIG";
const ENV_OVERRIDE_PREFIX: &str = "AURAROUTER_";

/// Searches for `auraconfig.yaml` in priority order: explicit path,
/// `AURACORE_ROUTER_CONFIG`, then `~/.auracore/aurarouter/auraconfig.yaml`.
pub(super) fn find_config(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let mut searched: Vec<String> = Vec::new();

    if let Some(path) = explicit {
        debug!(path = %path.display(), "trying explicit config path");
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        warn!(path = %path.display(), "config not found at explicit path");
        searched.push(format!("  - explicit path: {}", path.display()));
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(&env_path);
        debug!(path = %path.display(), "trying config path from {ENV_CONFIG_PATH}");
        if path.is_file() {
            return Ok(path);
        }
        warn!(path = %path.display(), "config not found at {ENV_CONFIG_PATH} path");
        searched.push(format!("  - {ENV_CONFIG_PATH}: {}", path.display()));
    }

    if let Some(home) = dirs::home_dir() {
        let path = home.join(".auracore").join("aurarouter").join("auraconfig.yaml");
        if path.is_file() {
            return Ok(path);
        }
        searched.push(format!("  - user home: {}", path.display()));
    }

    Err(ConfigError::NotFound { searched: searched.join("\n") })
}

/// Reads and layers a config file into a validated [`SystemConfig`].
pub(super) fn load_file(
    path: &Path,
    manifest: Option<&BTreeMap<String, Value>>,
) -> Result<SystemConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let mut tree: Value = serde_yaml::from_str(&raw)?;
    if tree.is_null() {
        tree = Value::Mapping(Mapping::new());
    }

    if let Some(manifest) = manifest {
        for (key, value) in manifest {
            merge_value(&mut tree, &[key.clone()], value.clone());
        }
    }

    apply_env_overrides(&mut tree, std::env::vars());

    let config: SystemConfig = serde_yaml::from_value(tree)?;
    config.validate()?;
    info!(path = %path.display(), models = config.models.len(), "loaded configuration");
    Ok(config)
}

/// Applies every `AURAROUTER_*` variable from `vars` onto the tree.
pub(super) fn apply_env_overrides(tree: &mut Value, vars: impl Iterator<Item = (String, String)>) {
    for (name, raw) in vars {
        let Some(rest) = name.strip_prefix(ENV_OVERRIDE_PREFIX) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        let segments: Vec<String> = rest.split("__").map(str::to_lowercase).collect();
        if segments.iter().any(String::is_empty) {
            warn!(var = %name, "ignoring malformed override variable");
            continue;
        }
        debug!(var = %name, path = %segments.join("."), "applying environment override");
        merge_value(tree, &segments, parse_scalar(&raw));
    }
}

/// Parses an override value as JSON, falling back to a plain string.
fn parse_scalar(raw: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => serde_yaml::to_value(json).unwrap_or(Value::String(raw.to_string())),
        Err(_) => Value::String(raw.to_string()),
    }
}

/// Sets `value` at `path` inside `tree`, materializing intermediate
/// mappings as needed. Non-mapping intermediates are replaced.
fn merge_value(tree: &mut Value, path: &[String], value: Value) {
    debug_assert!(!path.is_empty());
    if !tree.is_mapping() {
        *tree = Value::Mapping(Mapping::new());
    }
    let map = tree.as_mapping_mut().expect("just materialized");
    let key = Value::String(path[0].clone());
    if path.len() == 1 {
        map.insert(key, value);
        return;
    }
    let child = map.entry(key).or_insert_with(|| Value::Mapping(Mapping::new()));
    merge_value(child, &path[1..], value);
}
