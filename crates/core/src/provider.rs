//! Provider trait - the abstraction over text-generation backends.
//!
//! A Provider knows how to send a list of chat messages to an LLM and get
//! a complete response back. The memory layer only ever needs the
//! single-prompt form, exposed as [`Provider::generate`].
//!
//! Implementations: OpenAI-compatible endpoints (OpenAI, OpenRouter, Ollama,
//! vLLM, Gemini's OpenAI surface, ...).

use crate::error::ProviderError;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "google/gemini-2.0-flash-001", "gpt-4o-mini")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderRequest {
    /// A request carrying a single user prompt.
    pub fn prompt(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message::user(prompt)],
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core Provider trait.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter", "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a single prompt and return the generated text.
    ///
    /// Callers are responsible for bounding this with a timeout.
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
    ) -> std::result::Result<String, ProviderError> {
        let response = self.complete(ProviderRequest::prompt(model, prompt)).await?;
        Ok(response.message.content)
    }
}
