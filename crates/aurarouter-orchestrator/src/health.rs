//! Concurrent health probing with a TTL cache.
//!
//! `probe_all` fans out over every configured model with bounded
//! concurrency. Results land in a cache the fallback executor consults
//! before each attempt; on a cache miss the executor assumes the model is
//! healthy and lets the real call surface failures; probes are never run
//! inline on the request path.
//!
//! Probing is state-aware: when the owning service is not `Running`, the
//! prober reports the service state for every model without touching the
//! network, so a stopped service never shows a misleading all-green board.

use crate::executor::HealthGate;
use aurarouter_abstraction::HealthStatus;
use aurarouter_models::{LookupError, RegistryView};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info};

const DEFAULT_TTL: Duration = Duration::from_secs(30);
const DEFAULT_PROBE_DEADLINE: Duration = Duration::from_secs(5);
const MAX_CONCURRENT_PROBES: usize = 8;

/// Lifecycle state of the service that owns the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Running,
    Starting,
    Stopping,
    Stopped,
    Paused,
    Error,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceState::Running => "running",
            ServiceState::Starting => "starting",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
            ServiceState::Paused => "paused",
            ServiceState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Accessor for the owning service's state, supplied by the host.
pub type ServiceStateFn = Arc<dyn Fn() -> ServiceState + Send + Sync>;

/// What a probe round reports for one model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// The backend was actually probed.
    Probed(HealthStatus),
    /// The owning service is not running; no probe was attempted.
    ServiceNotRunning(ServiceState),
}

/// Per-model result of a probe round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub model_id: String,
    pub outcome: ProbeOutcome,
    pub checked_at: DateTime<Utc>,
}

struct CacheEntry {
    status: HealthStatus,
    at: Instant,
}

/// Probes configured models and caches the results.
pub struct HealthProber {
    ttl: Duration,
    probe_deadline: Duration,
    state_fn: ServiceStateFn,
    cache: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl HealthProber {
    pub fn new() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            probe_deadline: DEFAULT_PROBE_DEADLINE,
            state_fn: Arc::new(|| ServiceState::Running),
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_probe_deadline(mut self, deadline: Duration) -> Self {
        self.probe_deadline = deadline;
        self
    }

    /// Installs the owning service's state accessor.
    #[must_use]
    pub fn with_service_state(mut self, state_fn: ServiceStateFn) -> Self {
        self.state_fn = state_fn;
        self
    }

    /// Probes every model this view can serve, concurrently, with a bounded
    /// fan-out of `min(8, models)` and a per-probe deadline.
    pub async fn probe_all(&self, view: &RegistryView) -> HashMap<String, HealthReport> {
        let ids = view.model_ids();

        let state = (self.state_fn)();
        if state != ServiceState::Running {
            info!(%state, "service not running, skipping health probes");
            return ids
                .into_iter()
                .map(|model_id| {
                    let report = HealthReport {
                        model_id: model_id.clone(),
                        outcome: ProbeOutcome::ServiceNotRunning(state),
                        checked_at: Utc::now(),
                    };
                    (model_id, report)
                })
                .collect();
        }

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_PROBES.min(ids.len().max(1))));
        let probes = ids.into_iter().map(|model_id| {
            let semaphore = semaphore.clone();
            let deadline = self.probe_deadline;
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let status = match view.provider(&model_id) {
                    Ok(provider) => {
                        match tokio::time::timeout(deadline, provider.health_probe(deadline)).await
                        {
                            Ok(status) => status,
                            Err(_) => HealthStatus::Down("probe deadline exceeded".to_string()),
                        }
                    }
                    Err(LookupError::Unknown(_)) => {
                        HealthStatus::Down("no adapter".to_string())
                    }
                    Err(LookupError::Build(error)) => HealthStatus::Down(error.to_string()),
                };
                debug!(model_id = %model_id, ?status, "probe finished");
                (model_id, status)
            }
        });

        let results = futures::future::join_all(probes).await;

        let mut cache = self.cache.lock().expect("health cache poisoned");
        let now = Instant::now();
        let mut reports = HashMap::new();
        for (model_id, status) in results {
            cache.insert(model_id.clone(), CacheEntry { status: status.clone(), at: now });
            reports.insert(
                model_id.clone(),
                HealthReport {
                    model_id,
                    outcome: ProbeOutcome::Probed(status),
                    checked_at: Utc::now(),
                },
            );
        }
        reports
    }

    /// A health gate for the fallback executor: `Some(reason)` only when a
    /// fresh cache entry marks the model down. Misses and stale entries
    /// return `None`.
    pub fn gate(&self) -> HealthGate {
        let cache = self.cache.clone();
        let ttl = self.ttl;
        Arc::new(move |model_id: &str| {
            let cache = cache.lock().expect("health cache poisoned");
            match cache.get(model_id) {
                Some(entry) if entry.at.elapsed() <= ttl => match &entry.status {
                    HealthStatus::Down(reason) => Some(reason.clone()),
                    _ => None,
                },
                _ => None,
            }
        })
    }
}

impl Default for HealthProber {
    fn default() -> Self {
        Self::new()
    }
}
