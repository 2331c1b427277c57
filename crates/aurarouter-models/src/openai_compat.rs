//! OpenAI-compatible chat/completions adapter.
//!
//! Works with vLLM, LocalAI, LM Studio, llama.cpp's OpenAI endpoint, and
//! anything else implementing `/chat/completions`. Bearer auth is applied
//! only when a key is configured; most local servers run without one.

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
pub struct OpenAiCompatProvider {
    model_id: String,
    model_name: String,
    endpoint: String,
    api_key: Option<String>,
    tags: Vec<String>,
    locality: Locality,
    min_chars: usize,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
    client: Client,
}

impl OpenAiCompatProvider {
    /// Builds the adapter from a validated configuration entry.
    pub fn from_entry(
        id: &str,
        entry: &ModelEntry,
        api_key: Option<String>,
        min_chars: usize,
    ) -> Result<Self, ProviderError> {
        let endpoint = entry.endpoint.as_deref().ok_or_else(|| ProviderError::Build {
            model_id: id.to_string(),
            reason: "endpoint is required".to_string(),
        })?;
        let model_name = entry.model_name.clone().ok_or_else(|| ProviderError::Build {
            model_id: id.to_string(),
            reason: "model_name is required".to_string(),
        })?;
        Ok(Self {
            model_id: id.to_string(),
            model_name,
            endpoint: util::trim_endpoint(endpoint),
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
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

/// Chat servers answer with `message.content`; legacy completion servers
/// answer with a bare `text` field. Both are accepted.
#[derive(Deserialize)]
struct Choice {
    message: Option<MessageBody>,
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessageBody {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerateParams,
    ) -> Result<GenerateOutput, ProviderError> {
        let url = format!("{}/chat/completions", self.endpoint);
        debug!(model_id = %self.model_id, url = %url, "openai-compatible chat completion");

        let body = ChatRequest {
            model: &self.model_name,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            stream: false,
            temperature: params.temperature.or(self.temperature),
            top_p: params.top_p.or(self.top_p),
            max_tokens: params.max_tokens.or(self.max_tokens),
            response_format: params
                .json_mode
                .then(|| serde_json::json!({"type": "json_object"})),
        };

        let mut request = self.client.post(&url).timeout(params.timeout).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| util::send_error(&self.model_id, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(util::status_error(&self.model_id, status.as_u16()));
        }

        let parsed: ChatResponse =
            response.json().await.map_err(|e| util::decode_error(&self.model_id, e))?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| ProviderError::Protocol {
            model_id: self.model_id.clone(),
            detail: "response carries no choices".to_string(),
        })?;
        let text = choice
            .message
            .and_then(|m| m.content)
            .or(choice.text)
            .ok_or_else(|| ProviderError::Protocol {
                model_id: self.model_id.clone(),
                detail: "choice carries neither message content nor text".to_string(),
            })?;

        let text = util::require_min_chars(text, self.min_chars, &self.model_id)?;
        let usage = parsed.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens.unwrap_or(0),
            output_tokens: u.completion_tokens.unwrap_or(0),
        });
        Ok(GenerateOutput { text, usage })
    }

    async fn health_probe(&self, deadline: Duration) -> HealthStatus {
        let url = format!("{}/models", self.endpoint);
        let mut request = self.client.get(&url).timeout(deadline);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        match request.send().await {
            Ok(r) if r.status().is_success() => HealthStatus::Healthy,
            Ok(r) => HealthStatus::Down(format!("HTTP {}", r.status().as_u16())),
            Err(e) => HealthStatus::Down(e.to_string()),
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
