//! Scriptable in-memory provider for tests and dry runs.

use async_trait::async_trait;
use aurarouter_abstraction::{
    GenerateOutput, GenerateParams, HealthStatus, Locality, Provider, ProviderError,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug)]
enum Replies {
    /// The same reply for every call.
    Always(Result<GenerateOutput, ProviderError>),
    /// One scripted reply per call, in order.
    Script(Mutex<VecDeque<Result<GenerateOutput, ProviderError>>>),
}

/// A provider whose replies are scripted up front.
///
/// Records every prompt it receives so tests can assert on what reached the
/// backend.
#[derive(Debug)]
pub struct MockProvider {
    model_id: String,
    tags: Vec<String>,
    locality: Locality,
    health: HealthStatus,
    delay: Option<Duration>,
    replies: Replies,
    prompts: Mutex<Vec<String>>,
}

impl MockProvider {
    /// A provider that always answers `text`.
    pub fn always(model_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::build(
            model_id,
            Replies::Always(Ok(GenerateOutput { text: text.into(), usage: None })),
        )
    }

    /// A provider that always fails with `error`.
    pub fn failing(model_id: impl Into<String>, error: ProviderError) -> Self {
        Self::build(model_id, Replies::Always(Err(error)))
    }

    /// A provider that plays back `replies` one call at a time. Calls past
    /// the end of the script fail with a protocol error.
    pub fn scripted(
        model_id: impl Into<String>,
        replies: Vec<Result<GenerateOutput, ProviderError>>,
    ) -> Self {
        Self::build(model_id, Replies::Script(Mutex::new(replies.into())))
    }

    /// Convenience: a scripted provider answering plain strings.
    pub fn scripted_texts(model_id: impl Into<String>, texts: &[&str]) -> Self {
        Self::scripted(
            model_id,
            texts
                .iter()
                .map(|t| Ok(GenerateOutput { text: t.to_string(), usage: None }))
                .collect(),
        )
    }

    fn build(model_id: impl Into<String>, replies: Replies) -> Self {
        Self {
            model_id: model_id.into(),
            tags: Vec::new(),
            locality: Locality::Local,
            health: HealthStatus::Healthy,
            delay: None,
            replies,
            prompts: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_locality(mut self, locality: Locality) -> Self {
        self.locality = locality;
        self
    }

    #[must_use]
    pub fn with_health(mut self, health: HealthStatus) -> Self {
        self.health = health;
        self
    }

    /// Simulated latency per call; replies with `timeout` when it exceeds
    /// the caller's deadline.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every prompt this provider has been called with, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("mock poisoned").clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerateParams,
    ) -> Result<GenerateOutput, ProviderError> {
        self.prompts.lock().expect("mock poisoned").push(prompt.to_string());

        if let Some(delay) = self.delay {
            if delay > params.timeout {
                tokio::time::sleep(params.timeout).await;
                return Err(ProviderError::Timeout { model_id: self.model_id.clone() });
            }
            tokio::time::sleep(delay).await;
        }

        match &self.replies {
            Replies::Always(reply) => reply.clone(),
            Replies::Script(script) => script
                .lock()
                .expect("mock poisoned")
                .pop_front()
                .unwrap_or_else(|| {
                    Err(ProviderError::Protocol {
                        model_id: self.model_id.clone(),
                        detail: "mock script exhausted".to_string(),
                    })
                }),
        }
    }

    async fn health_probe(&self, _deadline: Duration) -> HealthStatus {
        self.health.clone()
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
