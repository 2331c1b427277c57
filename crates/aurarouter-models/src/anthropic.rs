//! Anthropic Messages API adapter.

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

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
// The Messages API requires max_tokens on every request.
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    model_id: String,
    model_name: String,
    base_url: String,
    api_key: String,
    tags: Vec<String>,
    locality: Locality,
    min_chars: usize,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
    client: Client,
}

impl AnthropicProvider {
    /// Builds the adapter from a validated configuration entry and a
    /// resolved API key.
    pub fn from_entry(
        id: &str,
        entry: &ModelEntry,
        api_key: String,
        min_chars: usize,
    ) -> Result<Self, ProviderError> {
        let model_name = entry.model_name.clone().ok_or_else(|| ProviderError::Build {
            model_id: id.to_string(),
            reason: "model_name is required".to_string(),
        })?;
        Ok(Self {
            model_id: id.to_string(),
            model_name,
            base_url: entry
                .endpoint
                .as_deref()
                .map(util::trim_endpoint)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
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
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerateParams,
    ) -> Result<GenerateOutput, ProviderError> {
        let url = format!("{}/messages", self.base_url);
        debug!(model_id = %self.model_id, model = %self.model_name, "anthropic messages call");

        // The Messages API has no structured-output switch at this level;
        // json_mode callers get an explicit instruction instead.
        let prompt_owned;
        let prompt = if params.json_mode {
            prompt_owned = format!("{prompt}\n\nRespond with valid JSON only.");
            prompt_owned.as_str()
        } else {
            prompt
        };

        let body = MessagesRequest {
            model: &self.model_name,
            max_tokens: params.max_tokens.or(self.max_tokens).unwrap_or(DEFAULT_MAX_TOKENS),
            messages: vec![Message { role: "user", content: prompt }],
            temperature: params.temperature.or(self.temperature),
            top_p: params.top_p.or(self.top_p),
        };

        let response = self
            .client
            .post(&url)
            .timeout(params.timeout)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| util::send_error(&self.model_id, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(util::status_error(&self.model_id, status.as_u16()));
        }

        let parsed: MessagesResponse =
            response.json().await.map_err(|e| util::decode_error(&self.model_id, e))?;

        let text = parsed
            .content
            .into_iter()
            .find(|block| block.block_type == "text")
            .map(|block| block.text)
            .ok_or_else(|| ProviderError::Protocol {
                model_id: self.model_id.clone(),
                detail: "no text block in response".to_string(),
            })?;

        let text = util::require_min_chars(text, self.min_chars, &self.model_id)?;
        let usage = parsed.usage.map(|u| TokenUsage {
            input_tokens: u.input_tokens.unwrap_or(0),
            output_tokens: u.output_tokens.unwrap_or(0),
        });
        Ok(GenerateOutput { text, usage })
    }

    async fn health_probe(&self, _deadline: Duration) -> HealthStatus {
        // No free probe endpoint; a configured key is the availability signal.
        if self.api_key.trim().is_empty() {
            HealthStatus::Down("api key not configured".to_string())
        } else {
            HealthStatus::Healthy
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
