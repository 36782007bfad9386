//! Chat-completion backends.
//!
//! A backend takes role-tagged messages plus a reply token budget and returns the
//! generated text with usage counts. Two providers are supported: a hosted
//! OpenAI-compatible `/chat/completions` endpoint and a local Ollama `/api/chat`.

use crate::conversation::{Role, Turn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod ollama;
pub mod openai;

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

/// Chat message as sent to a completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        Self::new(turn.role(), turn.content())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

/// Token usage as reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} returned {status}: {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },
    #[error("malformed {provider} response: {message}")]
    Malformed {
        provider: &'static str,
        message: String,
    },
}

/// A chat-completion provider.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Short provider name for logs and records.
    fn name(&self) -> &'static str;

    /// Model the backend sends requests to.
    fn model(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, BackendError>;
}

/// Build an HTTP client with the given request timeout.
pub(crate) fn http_client(timeout: std::time::Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(format!("parakeet/{}", env!("CARGO_PKG_VERSION")))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_serializes_lowercase_role() {
        let m = ChatMessage::new(Role::Assistant, "hi");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hi"}));
    }

    #[test]
    fn chat_message_from_turn() {
        let turn = Turn::new(Role::User, "Hello, bot!", Some(7));
        let m = ChatMessage::from(&turn);
        assert_eq!(m.role, Role::User);
        assert_eq!(m.content, "Hello, bot!");
    }
}
