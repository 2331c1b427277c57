//! Ollama adapter.
//!
//! Speaks Ollama's native `/api/generate` endpoint; the health probe lists
//! installed models via `/api/tags`.

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

/// Adapter for a local (or remote) Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    model_id: String,
    model_name: String,
    endpoint: String,
    tags: Vec<String>,
    locality: Locality,
    min_chars: usize,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
    client: Client,
}

impl OllamaProvider {
    /// Builds the adapter from a validated configuration entry.
    ///
    /// Accepts both a bare base URL and the legacy full-generate-URL form
    /// (`.../api/generate`), which older configs carry.
    pub fn from_entry(id: &str, entry: &ModelEntry, min_chars: usize) -> Result<Self, ProviderError> {
        let endpoint = entry.endpoint.as_deref().ok_or_else(|| ProviderError::Build {
            model_id: id.to_string(),
            reason: "endpoint is required".to_string(),
        })?;
        let endpoint = util::trim_endpoint(endpoint);
        let endpoint = endpoint.strip_suffix("/api/generate").unwrap_or(&endpoint).to_string();
        let model_name = entry.model_name.clone().ok_or_else(|| ProviderError::Build {
            model_id: id.to_string(),
            reason: "model_name is required".to_string(),
        })?;

        Ok(Self {
            model_id: id.to_string(),
            model_name,
            endpoint,
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
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: Options,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

#[derive(Serialize)]
struct Options {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<serde_json::Value>,
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerateParams,
    ) -> Result<GenerateOutput, ProviderError> {
        let url = format!("{}/api/generate", self.endpoint);
        debug!(model_id = %self.model_id, url = %url, prompt_len = prompt.len(), "ollama generate");

        let body = GenerateRequest {
            model: &self.model_name,
            prompt,
            stream: false,
            options: Options {
                temperature: params.temperature.or(self.temperature),
                top_p: params.top_p.or(self.top_p),
                num_predict: params.max_tokens.or(self.max_tokens),
            },
            format: params.json_mode.then_some("json"),
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

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| util::decode_error(&self.model_id, e))?;

        let text = util::require_min_chars(parsed.response, self.min_chars, &self.model_id)?;
        let usage = match (parsed.prompt_eval_count, parsed.eval_count) {
            (None, None) => None,
            (input, output) => Some(TokenUsage {
                input_tokens: input.unwrap_or(0),
                output_tokens: output.unwrap_or(0),
            }),
        };
        Ok(GenerateOutput { text, usage })
    }

    async fn health_probe(&self, deadline: Duration) -> HealthStatus {
        let url = format!("{}/api/tags", self.endpoint);
        let response = match self.client.get(&url).timeout(deadline).send().await {
            Ok(r) => r,
            Err(e) => return HealthStatus::Down(e.to_string()),
        };
        if !response.status().is_success() {
            return HealthStatus::Down(format!("HTTP {}", response.status().as_u16()));
        }
        match response.json::<TagsResponse>().await {
            Ok(tags) if tags.models.is_empty() => {
                HealthStatus::Degraded("no models installed".to_string())
            }
            Ok(_) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Down(format!("unexpected tags payload: {e}")),
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

#[cfg(test)]
mod tests {
    use super::*;
    use aurarouter_core::ProviderKind;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn entry(endpoint: &str) -> ModelEntry {
        let mut entry = ModelEntry::new(ProviderKind::Ollama);
        entry.endpoint = Some(endpoint.to_string());
        entry.model_name = Some("qwen2.5-coder".to_string());
        entry
    }

    #[tokio::test]
    async fn generate_hits_api_generate_and_reads_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({
                "model": "qwen2.5-coder",
                "stream": false,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "4",
                "prompt_eval_count": 12,
                "eval_count": 1,
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::from_entry("local_q", &entry(&server.uri()), 1).unwrap();
        let out = provider.generate("sum 2+2", &GenerateParams::default()).await.unwrap();
        assert_eq!(out.text, "4");
        assert_eq!(out.usage.unwrap().input_tokens, 12);
    }

    #[tokio::test]
    async fn json_mode_sets_format_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({"format": "json"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"response": "{\"ok\":true}"})),
            )
            .mount(&server)
            .await;

        let provider = OllamaProvider::from_entry("local_q", &entry(&server.uri()), 1).unwrap();
        let params = GenerateParams { json_mode: true, ..GenerateParams::default() };
        let out = provider.generate("classify", &params).await.unwrap();
        assert_eq!(out.text, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn legacy_generate_url_is_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "ok"})))
            .mount(&server)
            .await;

        let legacy = format!("{}/api/generate", server.uri());
        let provider = OllamaProvider::from_entry("local_q", &entry(&legacy), 1).unwrap();
        assert!(provider.generate("hi", &GenerateParams::default()).await.is_ok());
    }

    #[tokio::test]
    async fn http_error_maps_to_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider = OllamaProvider::from_entry("local_q", &entry(&server.uri()), 1).unwrap();
        let err = provider.generate("hi", &GenerateParams::default()).await.unwrap_err();
        assert_eq!(err, ProviderError::HttpStatus { model_id: "local_q".into(), code: 500 });
    }

    #[tokio::test]
    async fn short_response_maps_to_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "  "})))
            .mount(&server)
            .await;

        let provider = OllamaProvider::from_entry("local_q", &entry(&server.uri()), 1).unwrap();
        let err = provider.generate("hi", &GenerateParams::default()).await.unwrap_err();
        assert_eq!(err.kind(), "empty_response");
    }

    #[tokio::test]
    async fn garbage_body_maps_to_protocol() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let provider = OllamaProvider::from_entry("local_q", &entry(&server.uri()), 1).unwrap();
        let err = provider.generate("hi", &GenerateParams::default()).await.unwrap_err();
        assert_eq!(err.kind(), "protocol");
    }

    #[tokio::test]
    async fn slow_server_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"response": "late"}))
                    .set_delay(Duration::from_millis(400)),
            )
            .mount(&server)
            .await;

        let provider = OllamaProvider::from_entry("local_q", &entry(&server.uri()), 1).unwrap();
        let params = GenerateParams { timeout: Duration::from_millis(50), ..Default::default() };
        let err = provider.generate("hi", &params).await.unwrap_err();
        assert_eq!(err, ProviderError::Timeout { model_id: "local_q".into() });
    }

    #[tokio::test]
    async fn probe_reads_installed_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"models": [{"name": "qwen"}]})),
            )
            .mount(&server)
            .await;

        let provider = OllamaProvider::from_entry("local_q", &entry(&server.uri()), 1).unwrap();
        let status = provider.health_probe(Duration::from_secs(2)).await;
        assert_eq!(status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn probe_with_no_models_is_degraded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
            .mount(&server)
            .await;

        let provider = OllamaProvider::from_entry("local_q", &entry(&server.uri()), 1).unwrap();
        let status = provider.health_probe(Duration::from_secs(2)).await;
        assert!(matches!(status, HealthStatus::Degraded(_)));
    }

    #[tokio::test]
    async fn probe_unreachable_is_down() {
        let provider =
            OllamaProvider::from_entry("local_q", &entry("http://127.0.0.1:1"), 1).unwrap();
        let status = provider.health_probe(Duration::from_millis(200)).await;
        assert!(status.is_down());
    }
}
