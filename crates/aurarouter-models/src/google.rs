//! Google Generative Language API adapter (Gemini models).

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

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GoogleProvider {
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

impl GoogleProvider {
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
struct GenerateContentRequest<'a> {
    contents: Vec<ContentOut<'a>>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct ContentOut<'a> {
    parts: Vec<PartOut<'a>>,
}

#[derive(Serialize)]
struct PartOut<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(rename = "topP", skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ContentIn>,
}

#[derive(Deserialize)]
struct ContentIn {
    #[serde(default)]
    parts: Vec<PartIn>,
}

#[derive(Deserialize)]
struct PartIn {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u32>,
}

#[async_trait]
impl Provider for GoogleProvider {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerateParams,
    ) -> Result<GenerateOutput, ProviderError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model_name, self.api_key
        );
        debug!(model_id = %self.model_id, model = %self.model_name, "google generateContent call");

        let body = GenerateContentRequest {
            contents: vec![ContentOut { parts: vec![PartOut { text: prompt }] }],
            generation_config: Some(GenerationConfig {
                temperature: params.temperature.or(self.temperature),
                top_p: params.top_p.or(self.top_p),
                max_output_tokens: params.max_tokens.or(self.max_tokens),
                response_mime_type: params.json_mode.then_some("application/json"),
            }),
        };

        let response = self
            .client
            .post(&url)
            .timeout(params.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| util::send_error(&self.model_id, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(util::status_error(&self.model_id, status.as_u16()));
        }

        let parsed: GenerateContentResponse =
            response.json().await.map_err(|e| util::decode_error(&self.model_id, e))?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join("")
            })
            .ok_or_else(|| ProviderError::Protocol {
                model_id: self.model_id.clone(),
                detail: "no candidates in response".to_string(),
            })?;

        let text = util::require_min_chars(text, self.min_chars, &self.model_id)?;
        let usage = parsed.usage_metadata.map(|u| TokenUsage {
            input_tokens: u.prompt_token_count.unwrap_or(0),
            output_tokens: u.candidates_token_count.unwrap_or(0),
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
