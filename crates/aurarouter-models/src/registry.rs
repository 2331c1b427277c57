//! The id -> adapter registry.
//!
//! Adapters are built lazily on first use and cached. Each request captures
//! a [`RegistryView`] pinned to the configuration generation it started
//! under; a reload clears the cache for *future* requests while in-flight
//! views keep servicing their captured `Arc` handles (and can still build
//! from their own config snapshot without repopulating the stale cache).

use crate::factory::ProviderFactory;
use aurarouter_abstraction::{Provider, ProviderError};
use aurarouter_core::SystemConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info};

/// Why a model id could not be served.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The id appears in no configuration entry and no dynamic registration.
    #[error("model '{0}' is not configured")]
    Unknown(String),

    /// The configuration entry exists but the adapter could not be built.
    #[error(transparent)]
    Build(ProviderError),
}

struct Inner {
    generation: u64,
    cache: HashMap<String, Arc<dyn Provider>>,
    /// Dynamically registered providers; they survive config reloads.
    overrides: HashMap<String, Arc<dyn Provider>>,
}

/// Shared provider cache with atomic swap-on-reload semantics.
pub struct ProviderRegistry {
    inner: RwLock<Inner>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                generation: 0,
                cache: HashMap::new(),
                overrides: HashMap::new(),
            }),
        }
    }

    /// Registers a provider instance directly, bypassing the factory.
    /// Dynamic registrations shadow configuration entries with the same id
    /// and persist across reloads.
    pub fn register(&self, id: impl Into<String>, provider: Arc<dyn Provider>) {
        let id = id.into();
        info!(model_id = %id, "dynamically registered provider");
        self.inner.write().expect("registry poisoned").overrides.insert(id, provider);
    }

    /// Captures a view pinned to `generation`. When the registry's cache
    /// belongs to an older generation it is dropped wholesale; adapters held
    /// by in-flight views stay alive until their last `Arc` drops.
    pub fn view(self: &Arc<Self>, config: Arc<SystemConfig>, generation: u64) -> RegistryView {
        {
            let inner = self.inner.read().expect("registry poisoned");
            if inner.generation == generation {
                return RegistryView { registry: self.clone(), config, generation };
            }
        }
        let mut inner = self.inner.write().expect("registry poisoned");
        if inner.generation != generation {
            debug!(
                old = inner.generation,
                new = generation,
                dropped = inner.cache.len(),
                "configuration reloaded, dropping cached adapters"
            );
            inner.cache.clear();
            inner.generation = generation;
        }
        drop(inner);
        RegistryView { registry: self.clone(), config, generation }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A registry handle pinned to one configuration snapshot.
#[derive(Clone)]
pub struct RegistryView {
    registry: Arc<ProviderRegistry>,
    config: Arc<SystemConfig>,
    generation: u64,
}

impl RegistryView {
    /// The configuration snapshot this view was captured against.
    pub fn config(&self) -> &Arc<SystemConfig> {
        &self.config
    }

    /// Every id this view can serve: configured models plus dynamic
    /// registrations.
    pub fn model_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.config.models.keys().cloned().collect();
        let inner = self.registry.inner.read().expect("registry poisoned");
        for id in inner.overrides.keys() {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    /// Returns the adapter for `id`, building and caching it on first use.
    ///
    /// # Errors
    /// [`LookupError::Unknown`] for unconfigured ids,
    /// [`LookupError::Build`] when construction fails.
    pub fn provider(&self, id: &str) -> Result<Arc<dyn Provider>, LookupError> {
        {
            let inner = self.registry.inner.read().expect("registry poisoned");
            if let Some(provider) = inner.overrides.get(id) {
                return Ok(provider.clone());
            }
            if inner.generation == self.generation {
                if let Some(provider) = inner.cache.get(id) {
                    return Ok(provider.clone());
                }
            }
        }

        let entry = self
            .config
            .models
            .get(id)
            .ok_or_else(|| LookupError::Unknown(id.to_string()))?;
        let provider = ProviderFactory::build(id, entry, self.config.system.min_chars)
            .map_err(LookupError::Build)?;

        let mut inner = self.registry.inner.write().expect("registry poisoned");
        // Cache only when the registry still belongs to this view's
        // generation; a stale view keeps its adapter private.
        if inner.generation == self.generation {
            inner.cache.entry(id.to_string()).or_insert_with(|| provider.clone());
        }
        Ok(provider)
    }
}
