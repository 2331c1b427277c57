//! Managed local llama.cpp inference.
//!
//! Supervises a `llama-server` child process over the configured GGUF file
//! and routes inference to it through the same `/completion` protocol the
//! external-server adapter speaks. The child is started lazily on first
//! use, reused across requests, and killed when the adapter is dropped.

use crate::llamacpp_http;
use async_trait::async_trait;
use aurarouter_abstraction::{
    GenerateOutput, GenerateParams, HealthStatus, Locality, Provider, ProviderError,
};
use aurarouter_core::ModelEntry;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug)]
struct ServerHandle {
    child: Child,
    endpoint: String,
}

/// Adapter that owns one `llama-server` instance per configured model.
#[derive(Debug)]
pub struct LlamaCppServerProvider {
    model_id: String,
    model_path: PathBuf,
    server_binary: String,
    n_ctx: u64,
    n_gpu_layers: u64,
    startup_timeout: Duration,
    tags: Vec<String>,
    locality: Locality,
    min_chars: usize,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
    client: Client,
    server: tokio::sync::Mutex<Option<ServerHandle>>,
}

impl LlamaCppServerProvider {
    /// Builds the adapter from a validated configuration entry.
    ///
    /// Recognized parameters: `n_ctx` (default 4096), `n_gpu_layers`
    /// (default 0), `server_binary` (default `llama-server` on `PATH`),
    /// `server_timeout` startup seconds (default 120), plus the usual
    /// sampling parameters.
    pub fn from_entry(id: &str, entry: &ModelEntry, min_chars: usize) -> Result<Self, ProviderError> {
        let model_path = entry.model_path.clone().ok_or_else(|| ProviderError::Build {
            model_id: id.to_string(),
            reason: "model_path is required".to_string(),
        })?;
        Ok(Self {
            model_id: id.to_string(),
            model_path,
            server_binary: entry
                .param_str("server_binary")
                .unwrap_or("llama-server")
                .to_string(),
            n_ctx: entry.param_u64("n_ctx").unwrap_or(4096),
            n_gpu_layers: entry.param_u64("n_gpu_layers").unwrap_or(0),
            startup_timeout: Duration::from_secs(entry.param_u64("server_timeout").unwrap_or(120)),
            tags: entry.tags.clone(),
            locality: entry.locality(),
            min_chars,
            temperature: entry.param_f64("temperature").map(|v| v as f32),
            top_p: entry.param_f64("top_p").map(|v| v as f32),
            max_tokens: entry.param_u64("max_tokens").map(|v| v as u32),
            client: Client::new(),
            server: tokio::sync::Mutex::new(None),
        })
    }

    /// Starts the server if needed and returns its endpoint.
    async fn ensure_started(&self) -> Result<String, ProviderError> {
        let mut slot = self.server.lock().await;

        if let Some(handle) = slot.as_mut() {
            match handle.child.try_wait() {
                Ok(None) => return Ok(handle.endpoint.clone()),
                Ok(Some(status)) => {
                    warn!(model_id = %self.model_id, %status, "llama-server exited, restarting");
                    *slot = None;
                }
                Err(e) => {
                    warn!(model_id = %self.model_id, error = %e, "cannot poll llama-server, restarting");
                    *slot = None;
                }
            }
        }

        if !self.model_path.is_file() {
            return Err(ProviderError::Build {
                model_id: self.model_id.clone(),
                reason: format!("GGUF model not found: {}", self.model_path.display()),
            });
        }

        let port = free_port(&self.model_id)?;
        let endpoint = format!("http://127.0.0.1:{port}");
        info!(
            model_id = %self.model_id,
            model = %self.model_path.display(),
            %endpoint,
            "starting llama-server"
        );

        let child = Command::new(&self.server_binary)
            .arg("-m")
            .arg(&self.model_path)
            .args(["--host", "127.0.0.1", "--port"])
            .arg(port.to_string())
            .args(["-c", &self.n_ctx.to_string(), "-ngl", &self.n_gpu_layers.to_string()])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::Build {
                model_id: self.model_id.clone(),
                reason: format!("cannot spawn '{}': {e}", self.server_binary),
            })?;

        let mut handle = ServerHandle { child, endpoint: endpoint.clone() };
        self.wait_ready(&mut handle).await?;
        *slot = Some(handle);
        Ok(endpoint)
    }

    /// Polls `/health` until the server answers or the startup deadline
    /// passes.
    async fn wait_ready(&self, handle: &mut ServerHandle) -> Result<(), ProviderError> {
        let deadline = tokio::time::Instant::now() + self.startup_timeout;
        loop {
            if let Ok(Some(status)) = handle.child.try_wait() {
                return Err(ProviderError::Network {
                    model_id: self.model_id.clone(),
                    cause: format!("llama-server exited during startup: {status}"),
                });
            }
            let probe =
                llamacpp_http::health_call(&self.client, &handle.endpoint, READY_POLL_INTERVAL)
                    .await;
            match probe {
                HealthStatus::Healthy => return Ok(()),
                HealthStatus::Degraded(_) | HealthStatus::Down(_) => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ProviderError::Timeout { model_id: self.model_id.clone() });
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

/// Asks the OS for a free loopback port.
fn free_port(model_id: &str) -> Result<u16, ProviderError> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).map_err(|e| {
        ProviderError::Build {
            model_id: model_id.to_string(),
            reason: format!("cannot reserve a local port: {e}"),
        }
    })?;
    let port = listener
        .local_addr()
        .map_err(|e| ProviderError::Build {
            model_id: model_id.to_string(),
            reason: format!("cannot read reserved port: {e}"),
        })?
        .port();
    Ok(port)
}

#[async_trait]
impl Provider for LlamaCppServerProvider {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerateParams,
    ) -> Result<GenerateOutput, ProviderError> {
        let endpoint = self.ensure_started().await?;
        debug!(model_id = %self.model_id, %endpoint, "managed llama.cpp completion");
        llamacpp_http::completion_call(
            &self.client,
            &self.model_id,
            &endpoint,
            prompt,
            params,
            (self.temperature, self.top_p, self.max_tokens),
            self.min_chars,
        )
        .await
    }

    async fn health_probe(&self, _deadline: Duration) -> HealthStatus {
        // Availability means the weights are on disk; the server itself is
        // started on demand.
        match std::fs::File::open(&self.model_path) {
            Ok(_) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Down(format!(
                "model file unreadable at {}: {e}",
                self.model_path.display()
            )),
        }
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn locality(&self) -> Locality {
        self.locality
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }
}

// kill_on_drop tears the child down; nothing else to release.
impl Drop for LlamaCppServerProvider {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.server.try_lock() {
            if let Some(handle) = slot.as_mut() {
                let _ = handle.child.start_kill();
            }
        }
    }
}
