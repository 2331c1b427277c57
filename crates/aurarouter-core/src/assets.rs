//! Local GGUF asset registry.
//!
//! Tracks downloaded model files in `<models_dir>/models.json` and mirrors
//! each registered file into the configuration store as an
//! `llamacpp-embedded` model entry. Registered models are never inserted
//! into role chains; wiring them up is the caller's concern.

use crate::config::{ConfigStore, ModelEntry, ProviderKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{info, warn};

const REGISTRY_FILE: &str = "models.json";
const REGISTRY_VERSION: u32 = 1;

/// Errors from asset registry operations.
#[derive(Debug, Error)]
pub enum AssetError {
    /// The file being registered does not exist.
    #[error("asset file not found: {0}")]
    Missing(PathBuf),

    /// Reading or writing the registry failed.
    #[error("asset registry I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The registry file exists but cannot be parsed.
    #[error("asset registry is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// One tracked GGUF file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetEntry {
    /// Source repository id, or `"unknown"` for scanned files.
    pub repo: String,
    /// File name; unique within the storage root.
    pub filename: String,
    /// Resolved path to the file.
    pub absolute_path: PathBuf,
    /// File size at registration time.
    pub size_bytes: u64,
    /// When the entry was (last) registered.
    pub registered_at: DateTime<Utc>,
    /// Tags copied onto the generated model entry.
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    version: u32,
    entries: Vec<AssetEntry>,
}

/// JSON-backed registry of locally stored model files.
pub struct AssetRegistry {
    models_dir: PathBuf,
    entries: Mutex<Vec<AssetEntry>>,
}

impl AssetRegistry {
    /// Opens (or initializes) the registry under `models_dir`.
    ///
    /// A malformed registry file is treated as empty rather than fatal, so
    /// a corrupted file never bricks asset management.
    pub fn open(models_dir: impl Into<PathBuf>) -> Result<Self, AssetError> {
        let models_dir = models_dir.into();
        let registry_path = models_dir.join(REGISTRY_FILE);
        let entries = if registry_path.is_file() {
            let raw = std::fs::read_to_string(&registry_path)?;
            match serde_json::from_str::<RegistryFile>(&raw) {
                Ok(file) => file.entries,
                Err(e) => {
                    warn!(path = %registry_path.display(), error = %e, "asset registry unreadable, starting fresh");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        Ok(Self { models_dir, entries: Mutex::new(entries) })
    }

    /// The managed storage root.
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Returns all registered assets.
    pub fn list(&self) -> Vec<AssetEntry> {
        self.entries.lock().expect("asset registry poisoned").clone()
    }

    /// Registers a file and mirrors it into the configuration store as an
    /// `llamacpp-embedded` model entry named `id` (default: the file stem).
    ///
    /// Idempotent on filename: re-registering updates the existing record.
    ///
    /// # Errors
    /// [`AssetError::Missing`] when the file does not exist, or an I/O
    /// error from persisting the registry.
    pub fn register(
        &self,
        config: &ConfigStore,
        path: &Path,
        repo: &str,
        tags: Vec<String>,
        id: Option<&str>,
    ) -> Result<AssetEntry, AssetError> {
        if !path.is_file() {
            return Err(AssetError::Missing(path.to_path_buf()));
        }
        let absolute_path = path.canonicalize()?;
        let filename = absolute_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let size_bytes = absolute_path.metadata()?.len();

        let entry = AssetEntry {
            repo: repo.to_string(),
            filename: filename.clone(),
            absolute_path: absolute_path.clone(),
            size_bytes,
            registered_at: Utc::now(),
            tags: tags.clone(),
        };

        {
            let mut entries = self.entries.lock().expect("asset registry poisoned");
            if let Some(existing) = entries.iter_mut().find(|e| e.filename == filename) {
                *existing = entry.clone();
                info!(filename = %filename, "updated asset registry entry");
            } else {
                entries.push(entry.clone());
                info!(filename = %filename, size_bytes, "registered asset");
            }
            self.persist(&entries)?;
        }

        let model_id = id
            .map(str::to_string)
            .unwrap_or_else(|| {
                absolute_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or(filename)
            });
        let mut model = ModelEntry::new(ProviderKind::LlamaCppEmbedded);
        model.model_path = Some(absolute_path);
        model.tags = tags;
        config.set_model(&model_id, model);

        Ok(entry)
    }

    /// Removes an asset from the registry; deletes the file too unless
    /// `keep_file`. Returns whether an entry was found.
    pub fn remove(&self, filename: &str, keep_file: bool) -> Result<bool, AssetError> {
        let mut entries = self.entries.lock().expect("asset registry poisoned");
        let Some(index) = entries.iter().position(|e| e.filename == filename) else {
            return Ok(false);
        };
        let entry = entries.remove(index);
        self.persist(&entries)?;

        if !keep_file && entry.absolute_path.is_file() {
            std::fs::remove_file(&entry.absolute_path)?;
            info!(path = %entry.absolute_path.display(), "deleted asset file");
        }
        Ok(true)
    }

    /// Scans the storage root for `.gguf` files missing from the registry
    /// and records them with `repo = "unknown"`. Returns how many were added.
    pub fn scan(&self) -> Result<usize, AssetError> {
        if !self.models_dir.is_dir() {
            return Ok(0);
        }
        let mut entries = self.entries.lock().expect("asset registry poisoned");
        let mut added = 0;
        for dirent in std::fs::read_dir(&self.models_dir)? {
            let path = dirent?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("gguf") {
                continue;
            }
            let filename = match path.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };
            if entries.iter().any(|e| e.filename == filename) {
                continue;
            }
            info!(filename = %filename, "discovered unregistered asset");
            entries.push(AssetEntry {
                repo: "unknown".to_string(),
                filename,
                size_bytes: path.metadata()?.len(),
                absolute_path: path,
                registered_at: Utc::now(),
                tags: Vec::new(),
            });
            added += 1;
        }
        if added > 0 {
            self.persist(&entries)?;
        }
        Ok(added)
    }

    /// Atomic write of the registry file (temp file, fsync, rename).
    fn persist(&self, entries: &[AssetEntry]) -> Result<(), AssetError> {
        std::fs::create_dir_all(&self.models_dir)?;
        let file = RegistryFile { version: REGISTRY_VERSION, entries: entries.to_vec() };
        let json = serde_json::to_string_pretty(&file)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.models_dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.models_dir.join(REGISTRY_FILE))
            .map_err(|e| AssetError::Io(e.error))?;
        Ok(())
    }
}
