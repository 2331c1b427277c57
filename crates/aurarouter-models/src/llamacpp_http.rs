//! Adapter for an externally managed llama.cpp server.
//!
//! Talks to the native `/completion` endpoint; `/health` is the probe.

use crate::util;
use async_trait::async_trait;
use aurarouter_abstraction::{
    GenerateOutput, GenerateParams, HealthStatus, Locality, Provider, ProviderError, TokenUsage,
};
use aurarouter_core::ModelEntry;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LlamaCppHttpProvider {
    model_id: String,
    endpoint: String,
    tags: Vec<String>,
    locality: Locality,
    min_chars: usize,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
    client: Client,
}

impl LlamaCppHttpProvider {
    /// Builds the adapter from a validated configuration entry.
    pub fn from_entry(id: &str, entry: &ModelEntry, min_chars: usize) -> Result<Self, ProviderError> {
        let endpoint = entry.endpoint.as_deref().ok_or_else(|| ProviderError::Build {
            model_id: id.to_string(),
            reason: "endpoint is required".to_string(),
        })?;
        Ok(Self {
            model_id: id.to_string(),
            endpoint: util::trim_endpoint(endpoint),
            tags: entry.tags.clone(),
            locality: entry.locality(),
            min_chars,
            temperature: entry.param_f64("temperature").map(|v| v as f32),
            top_p: entry.param_f64("top_p").map(|v| v as f32),
            max_tokens: entry.param_u64("max_tokens").map(|v| v as u32),
            client: Client::new(),
        })
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    n_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    json_schema: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    content: String,
    tokens_evaluated: Option<u32>,
    tokens_predicted: Option<u32>,
}

pub(crate) async fn completion_call(
    client: &Client,
    model_id: &str,
    endpoint: &str,
    prompt: &str,
    params: &GenerateParams,
    defaults: (Option<f32>, Option<f32>, Option<u32>),
    min_chars: usize,
) -> Result<GenerateOutput, ProviderError> {
    let url = format!("{endpoint}/completion");
    debug!(model_id = %model_id, url = %url, prompt_len = prompt.len(), "llama.cpp completion");

    // Permissive schema: constrains output to a JSON object without
    // dictating its shape, matching what callers asking for json_mode need.
    let json_schema = params.json_mode.then(|| {
        serde_json::json!({"type": "object", "properties": {}, "additionalProperties": true})
    });

    let (temperature, top_p, max_tokens) = defaults;
    let body = CompletionRequest {
        prompt,
        stream: false,
        n_predict: params.max_tokens.or(max_tokens),
        temperature: params.temperature.or(temperature),
        top_p: params.top_p.or(top_p),
        json_schema,
    };

    let response = client
        .post(&url)
        .timeout(params.timeout)
        .json(&body)
        .send()
        .await
        .map_err(|e| util::send_error(model_id, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(util::status_error(model_id, status.as_u16()));
    }

    let parsed: CompletionResponse =
        response.json().await.map_err(|e| util::decode_error(model_id, e))?;

    let text = util::require_min_chars(parsed.content, min_chars, model_id)?;
    let usage = match (parsed.tokens_evaluated, parsed.tokens_predicted) {
        (None, None) => None,
        (input, output) => Some(TokenUsage {
            input_tokens: input.unwrap_or(0),
            output_tokens: output.unwrap_or(0),
        }),
    };
    Ok(GenerateOutput { text, usage })
}

/// Probes a llama.cpp server's `/health` endpoint.
pub(crate) async fn health_call(client: &Client, endpoint: &str, deadline: Duration) -> HealthStatus {
    let url = format!("{endpoint}/health");
    match client.get(&url).timeout(deadline).send().await {
        Ok(r) if r.status().is_success() => HealthStatus::Healthy,
        Ok(r) if r.status().as_u16() == 503 => {
            HealthStatus::Degraded("model still loading".to_string())
        }
        Ok(r) => HealthStatus::Down(format!("HTTP {}", r.status().as_u16())),
        Err(e) => HealthStatus::Down(e.to_string()),
    }
}

#[async_trait]
impl Provider for LlamaCppHttpProvider {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerateParams,
    ) -> Result<GenerateOutput, ProviderError> {
        completion_call(
            &self.client,
            &self.model_id,
            &self.endpoint,
            prompt,
            params,
            (self.temperature, self.top_p, self.max_tokens),
            self.min_chars,
        )
        .await
    }

    async fn health_probe(&self, deadline: Duration) -> HealthStatus {
        health_call(&self.client, &self.endpoint, deadline).await
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
