//! Provider abstraction layer for AuraRouter.
//!
//! This crate defines the uniform contract every model backend implements:
//! the [`Provider`] trait, the request/response types that cross it, and the
//! closed set of failure kinds the routing layers reason about.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Where a backend's inference actually runs.
///
/// Consulted by the privacy skip logic: prompts flagged as containing
/// sensitive data may only reach `Local` backends or backends carrying the
/// `private` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locality {
    /// Host-local endpoint or in-process inference.
    Local,
    /// Remote third-party service.
    Cloud,
}

impl std::fmt::Display for Locality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locality::Local => write!(f, "local"),
            Locality::Cloud => write!(f, "cloud"),
        }
    }
}

/// An error that can occur when calling or constructing a provider.
///
/// The variant names form a closed, stable vocabulary; [`ProviderError::kind`]
/// returns the wire-stable string used in attempt records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The request never produced an HTTP response (DNS, connect, send).
    #[error("network error for model '{model_id}': {cause}")]
    Network { model_id: String, cause: String },

    /// The per-call deadline elapsed before a response arrived.
    #[error("timeout for model '{model_id}'")]
    Timeout { model_id: String },

    /// The backend answered with a non-2xx status.
    #[error("HTTP {code} from model '{model_id}'")]
    HttpStatus { model_id: String, code: u16 },

    /// The response arrived but did not match the expected schema.
    #[error("protocol error from model '{model_id}': {detail}")]
    Protocol { model_id: String, detail: String },

    /// The backend answered with fewer characters than the configured minimum.
    #[error("empty response from model '{model_id}'")]
    EmptyResponse { model_id: String },

    /// The backend rejected the configured credentials.
    #[error("authentication failed for model '{model_id}'")]
    Auth { model_id: String },

    /// The adapter could not be materialized from its configuration entry.
    #[error("cannot build adapter for model '{model_id}': {reason}")]
    Build { model_id: String, reason: String },

    /// The caller's cancellation signal fired while the call was in flight.
    #[error("call to model '{model_id}' was cancelled")]
    Cancelled { model_id: String },
}

impl ProviderError {
    /// The stable error-kind string recorded in attempt telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Network { .. } => "network",
            ProviderError::Timeout { .. } => "timeout",
            ProviderError::HttpStatus { .. } => "http_status",
            ProviderError::Protocol { .. } => "protocol",
            ProviderError::EmptyResponse { .. } => "empty_response",
            ProviderError::Auth { .. } => "auth",
            ProviderError::Build { .. } => "adapter_build",
            ProviderError::Cancelled { .. } => "cancelled",
        }
    }

    /// The id of the model the error belongs to.
    pub fn model_id(&self) -> &str {
        match self {
            ProviderError::Network { model_id, .. }
            | ProviderError::Timeout { model_id }
            | ProviderError::HttpStatus { model_id, .. }
            | ProviderError::Protocol { model_id, .. }
            | ProviderError::EmptyResponse { model_id }
            | ProviderError::Auth { model_id }
            | ProviderError::Build { model_id, .. }
            | ProviderError::Cancelled { model_id } => model_id,
        }
    }
}

/// Per-call generation parameters.
///
/// Values set here override the adapter's configured defaults; `None` leaves
/// the configured (or provider-native) default in place.
#[derive(Debug, Clone)]
pub struct GenerateParams {
    /// Sampling temperature override.
    pub temperature: Option<f32>,
    /// Nucleus sampling override.
    pub top_p: Option<f32>,
    /// Completion length cap override.
    pub max_tokens: Option<u32>,
    /// Ask the backend for JSON output where the wire protocol supports it.
    pub json_mode: bool,
    /// Hard deadline for the whole call, connection included.
    pub timeout: Duration,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            temperature: None,
            top_p: None,
            max_tokens: None,
            json_mode: false,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Token accounting reported by a backend, when it reports any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub input_tokens: u32,
    /// Tokens produced in the completion.
    pub output_tokens: u32,
}

/// The outcome of a successful generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOutput {
    /// The full response text. Never empty: adapters map sub-minimum
    /// responses to [`ProviderError::EmptyResponse`] instead.
    pub text: String,
    /// Token usage, if the backend reported it.
    pub usage: Option<TokenUsage>,
}

/// Result of probing a backend's availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status", content = "reason")]
pub enum HealthStatus {
    /// The backend answered its probe and looks serviceable.
    Healthy,
    /// The backend answered but in a reduced state (e.g. still loading).
    Degraded(String),
    /// The backend is unreachable or refused the probe.
    Down(String),
}

impl HealthStatus {
    /// Whether a fallback chain should skip this backend outright.
    pub fn is_down(&self) -> bool {
        matches!(self, HealthStatus::Down(_))
    }
}

/// The uniform contract every model backend implements.
///
/// All providers must be `Send + Sync`; the registry shares them across
/// concurrent requests behind `Arc`.
#[async_trait]
pub trait Provider: Send + Sync + std::fmt::Debug {
    /// Sends a prompt and returns the full response text with usage.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] classifying the failure; adapters never
    /// panic across this boundary.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerateParams,
    ) -> Result<GenerateOutput, ProviderError>;

    /// Probes the backend's availability within `deadline`.
    ///
    /// Probes are best-effort and must not panic; unreachable backends
    /// report [`HealthStatus::Down`] with a reason.
    async fn health_probe(&self, deadline: Duration) -> HealthStatus;

    /// The configured model id this adapter serves.
    fn model_id(&self) -> &str;

    /// Where this backend's inference runs, unchanged from configuration.
    fn locality(&self) -> Locality;

    /// The opaque capability tags configured on this backend.
    fn tags(&self) -> &[String];

    /// Whether the backend carries the `private` tag the privacy logic
    /// interprets.
    fn is_private(&self) -> bool {
        self.tags().iter().any(|t| t == "private")
    }
}
