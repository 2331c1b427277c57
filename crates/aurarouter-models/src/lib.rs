//! Provider adapters for AuraRouter.
//!
//! Each backend kind gets one adapter implementing the uniform
//! [`Provider`](aurarouter_abstraction::Provider) contract;
//! [`ProviderFactory`] materializes adapters from configuration entries and
//! [`ProviderRegistry`] caches them per id, swapping atomically on reload.

mod anthropic;
mod factory;
mod google;
#[cfg(feature = "embedded-llama")]
mod llamacpp_embedded;
mod llamacpp_http;
mod mock;
mod ollama;
mod openai_compat;
mod registry;
mod util;

pub use anthropic::AnthropicProvider;
pub use factory::ProviderFactory;
pub use google::GoogleProvider;
#[cfg(feature = "embedded-llama")]
pub use llamacpp_embedded::LlamaCppServerProvider;
pub use llamacpp_http::LlamaCppHttpProvider;
pub use mock::MockProvider;
pub use ollama::OllamaProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use registry::{LookupError, ProviderRegistry, RegistryView};
