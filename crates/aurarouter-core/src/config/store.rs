//! The live configuration handle.
//!
//! [`ConfigStore`] owns the committed [`SystemConfig`] plus a mutable draft.
//! Mutations edit the draft; `save()` validates it, writes the file
//! atomically (temp file in the same directory, fsync, rename), commits the
//! draft, and bumps the generation counter the provider registry watches.

use super::loader;
use super::{ConfigError, ModelEntry, SystemConfig};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

struct Inner {
    committed: Arc<SystemConfig>,
    draft: SystemConfig,
    generation: u64,
}

/// Owner of the current configuration.
///
/// Cheap to share behind `Arc`; readers take immutable snapshots, mutations
/// and saves are serialized by an internal mutex.
pub struct ConfigStore {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl ConfigStore {
    /// Loads configuration from the standard search locations.
    ///
    /// # Errors
    /// `NotFound` when no file exists in any searched location, or
    /// `config_invalid` when the file fails validation.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_manifest(explicit, None)
    }

    /// Loads configuration with an optional manifest overlay (metadata
    /// supplied by the grid collaborator, merged between the file and the
    /// environment overrides).
    pub fn load_with_manifest(
        explicit: Option<&Path>,
        manifest: Option<&BTreeMap<String, Value>>,
    ) -> Result<Self, ConfigError> {
        let path = loader::find_config(explicit)?;
        let config = loader::load_file(&path, manifest)?;
        Ok(Self::new(config, Some(path)))
    }

    /// Wraps an already-built configuration, validating it first. The store
    /// has no backing file until [`ConfigStore::with_path`] assigns one.
    pub fn from_config(config: SystemConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config, None))
    }

    /// Sets the file `save()` writes to.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    fn new(config: SystemConfig, path: Option<PathBuf>) -> Self {
        Self {
            path,
            inner: Mutex::new(Inner {
                committed: Arc::new(config.clone()),
                draft: config,
                generation: 0,
            }),
        }
    }

    /// The committed configuration. In-flight requests keep the `Arc` they
    /// captured; later saves do not affect them.
    pub fn snapshot(&self) -> Arc<SystemConfig> {
        self.inner.lock().expect("config store poisoned").committed.clone()
    }

    /// Monotonic counter, bumped by every successful `save()`.
    pub fn generation(&self) -> u64 {
        self.inner.lock().expect("config store poisoned").generation
    }

    /// Inserts or replaces a model entry in the draft.
    pub fn set_model(&self, id: &str, entry: ModelEntry) {
        let mut inner = self.inner.lock().expect("config store poisoned");
        inner.draft.models.insert(id.to_string(), entry);
    }

    /// Removes a model entry from the draft. Dangling chain references are
    /// caught by `save()` validation, so no partial state is ever persisted.
    pub fn remove_model(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().expect("config store poisoned");
        inner.draft.models.remove(id).is_some()
    }

    /// Replaces a role's fallback chain in the draft.
    pub fn set_role_chain(&self, role: &str, ids: Vec<String>) {
        let mut inner = self.inner.lock().expect("config store poisoned");
        inner.draft.roles.insert(role.to_string(), ids);
    }

    /// Replaces a role's synonym list in the draft.
    pub fn set_semantic_verbs(&self, role: &str, synonyms: Vec<String>) {
        let mut inner = self.inner.lock().expect("config store poisoned");
        inner.draft.semantic_verbs.insert(role.to_string(), synonyms);
    }

    /// Validates and commits the draft: atomic write to the backing file,
    /// then generation bump. Concurrent saves are serialized.
    ///
    /// # Errors
    /// `config_invalid` when the draft fails validation (the file and the
    /// committed snapshot are left untouched), or an I/O error from the
    /// write itself.
    pub fn save(&self) -> Result<(), ConfigError> {
        let mut inner = self.inner.lock().expect("config store poisoned");
        inner.draft.validate()?;

        let path = self.path.as_ref().ok_or_else(|| {
            ConfigError::invalid("", "config store has no backing file to save to")
        })?;
        let yaml = inner.draft.to_yaml_string()?;
        write_atomic(path, yaml.as_bytes())?;

        inner.committed = Arc::new(inner.draft.clone());
        inner.generation += 1;
        info!(path = %path.display(), generation = inner.generation, "configuration saved");
        Ok(())
    }
}

/// Writes `bytes` to `path` via a sibling temp file, fsync, and rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ConfigError> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ConfigError::Io(e.error))?;
    Ok(())
}
