//! Reply generation for a leased conversation.
//!
//! The prompt is the conversation's turns (oldest non-system turns dropped when the
//! estimate exceeds the model context) plus an optional trailing system hint. One
//! completion call per lease; the lease already excludes concurrent calls for the
//! same conversation. Only a successful, non-empty reply is recorded.

use crate::conversation::{ConversationLease, Role, Turn};
use crate::llm::{BackendError, ChatMessage, CompletionBackend, CompletionRequest};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Rough characters-per-token ratio for prompt size estimates.
pub const CHARS_PER_TOKEN: usize = 4;

/// Per-message framing overhead in tokens.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

fn message_tokens(m: &ChatMessage) -> usize {
    estimate_tokens(&m.content) + MESSAGE_OVERHEAD_TOKENS
}

/// Build the prompt, dropping the oldest non-system turns until the estimate fits in
/// `budget_tokens`. The newest turn is always kept.
pub fn build_prompt(turns: &[Turn], hint: Option<&str>, budget_tokens: usize) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = turns.iter().map(ChatMessage::from).collect();
    let hint = hint.map(|h| ChatMessage::new(Role::System, h));

    let mut total: usize = messages.iter().map(message_tokens).sum::<usize>()
        + hint.as_ref().map(message_tokens).unwrap_or(0);
    let mut dropped = 0usize;
    while total > budget_tokens {
        let last = messages.len().saturating_sub(1);
        let Some(idx) = messages[..last].iter().position(|m| m.role != Role::System) else {
            break;
        };
        total -= message_tokens(&messages[idx]);
        messages.remove(idx);
        dropped += 1;
    }
    if dropped > 0 {
        debug!(
            "Generator: dropped {} old turn(s) to fit {} tokens (est. {})",
            dropped, budget_tokens, total
        );
    }
    messages.extend(hint);
    messages
}

/// A generated reply with its metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub text: String,
    pub latency: Duration,
    /// Completion tokens: provider usage when reported, else estimated from the text.
    pub token_count: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("empty reply")]
    EmptyResponse,
}

pub struct ResponseGenerator {
    backend: Arc<dyn CompletionBackend>,
    max_tokens: u32,
    context_tokens: u32,
    temperature: Option<f32>,
    timeout: Duration,
}

impl ResponseGenerator {
    pub fn new(backend: Arc<dyn CompletionBackend>, max_tokens: u32, context_tokens: u32, timeout: Duration) -> Self {
        Self {
            backend,
            max_tokens,
            context_tokens,
            temperature: None,
            timeout,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    fn prompt_budget(&self) -> usize {
        (self.context_tokens as usize).saturating_sub(self.max_tokens as usize)
    }

    /// Generate a reply for the leased conversation and record it as an assistant turn.
    /// On error the conversation is left untouched.
    pub async fn generate(
        &self,
        lease: &mut ConversationLease,
        hint: Option<&str>,
    ) -> Result<Generated, GenerationError> {
        let turns = lease.snapshot();
        let request = CompletionRequest {
            messages: build_prompt(&turns, hint, self.prompt_budget()),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        info!(
            "Generator: {} ({}) for conversation {} with {} message(s)",
            self.backend.name(),
            self.backend.model(),
            lease.root_id(),
            request.messages.len()
        );

        let start = Instant::now();
        let response = match tokio::time::timeout(self.timeout, self.backend.complete(&request)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "Generator: no reply for conversation {} within {:?}",
                    lease.root_id(),
                    self.timeout
                );
                return Err(GenerationError::Timeout(self.timeout));
            }
        };
        let latency = start.elapsed();

        let text = response.content.trim().to_string();
        if text.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        let token_count = response
            .usage
            .map(|u| u.completion_tokens)
            .unwrap_or_else(|| estimate_tokens(&text) as u32);

        lease.record_reply(text.clone());
        info!(
            "Generator: reply for conversation {} in {:?} ({} tokens, {} chars)",
            lease.root_id(),
            latency,
            token_count,
            text.chars().count()
        );
        Ok(Generated {
            text,
            latency,
            token_count,
        })
    }
}
