//! LLM provider implementations.
//!
//! Every supported backend speaks the OpenAI chat-completions protocol, so a
//! single provider covers hosted and local endpoints.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatibleProvider;

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::gateway::LlmProvider;
use std::sync::Arc;

/// Known provider names routed to [`OpenAiCompatibleProvider`].
const OPENAI_COMPATIBLE: &[&str] = &["openai", "ollama", "vllm", "lmstudio", "local", "azure"];

/// Create an LLM provider based on the configuration.
///
/// Unknown provider names are still routed to the OpenAI-compatible provider
/// when a `base_url` is set; otherwise they are rejected.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let name = config.provider.to_ascii_lowercase();
    if OPENAI_COMPATIBLE.contains(&name.as_str()) || config.base_url.is_some() {
        tracing::debug!(provider = %config.provider, model = %config.model, "Creating LLM provider");
        return Ok(Arc::new(OpenAiCompatibleProvider::new(config)?));
    }
    Err(LlmError::ApiRequest {
        message: format!(
            "Unsupported LLM provider '{}'; set llm.base_url for OpenAI-compatible endpoints",
            config.provider
        ),
    })
}
