//! parakeet Library
//!
//! A Discord bot that relays messages to an LLM chat completion API, with
//! short-term per-thread memory, an opt-in role gate and feedback capture.
//!
//! ## Architecture
//!
//! The codebase is organized into modules:
//! - `conversation`: Turns, conversation histories and the time-boxed manager
//! - `llm`: Completion backends (OpenAI-compatible, Ollama)
//! - `generator`: Prompt fitting and one completion per conversation lease
//! - `discord`: Gateway event handler, commands, opt-in gate, chunked messaging
//! - `feedback`: 👍/👎 kinds and the tracker of replies that carry them
//! - `records`: Append-only JSON-lines records (feedback, interactions)
//! - `config`: Paths, build info and bot settings
//! - `security`: `.config.env` parsing and credential masking
//! - `logging`: Structured logging with tracing
//!
//! ## Main Entry Points
//!
//! - `build_backend()`: Completion backend for the configured provider
//! - `run()`: Start the bot with a loaded configuration

pub mod config;
pub mod conversation;
pub mod discord;
pub mod feedback;
pub mod generator;
pub mod llm;
pub mod logging;
pub mod records;
pub mod security;

pub use config::{BotConfig, Config, Provider};
pub use conversation::{ConversationManager, Role, SeedPolicy, Turn};
pub use generator::{Generated, GenerationError, ResponseGenerator};
pub use logging::init_tracing;

use anyhow::{Context, Result};
use llm::ollama::OllamaConfig;
use llm::{CompletionBackend, OllamaClient, OpenAiClient};
use std::sync::Arc;
use tracing::{info, warn};

/// Completion backend for the configured provider, plus the context window to fit prompts into.
///
/// For Ollama the window is read from the model (`/api/show`) when available.
pub async fn build_backend(config: &BotConfig) -> Result<(Arc<dyn CompletionBackend>, u32)> {
    let llm = &config.llm;
    match llm.provider {
        Provider::OpenAi => {
            let api_key = llm.api_key.clone().context("OPENAI_API_KEY is not set")?;
            let client = OpenAiClient::new(api_key, &llm.model, &llm.base_url, config.response_timeout())
                .context("Failed to build OpenAI HTTP client")?;
            Ok((Arc::new(client), llm.context_tokens))
        }
        Provider::Ollama => {
            let client = OllamaClient::new(
                OllamaConfig {
                    endpoint: llm.ollama_endpoint.clone(),
                    model: llm.model.clone(),
                    api_key: None,
                    num_ctx: None,
                },
                config.response_timeout(),
            )?;
            if !client.check_connection().await {
                warn!("Ollama: {} is not reachable yet", llm.ollama_endpoint);
            }
            let context_tokens = client.context_size().await.unwrap_or(llm.context_tokens);
            Ok((Arc::new(client), context_tokens))
        }
    }
}

/// Run the bot until the gateway stops.
pub async fn run(config: BotConfig) -> Result<()> {
    let token = config.discord_token.clone().context("DISCORD_BOT_TOKEN is not set")?;

    let (backend, context_tokens) = build_backend(&config).await?;
    info!(
        "parakeet {}: {} model {} (context {} tokens, reply {} tokens)",
        Config::version(),
        backend.name(),
        backend.model(),
        context_tokens,
        config.llm.max_tokens
    );
    let generator = ResponseGenerator::new(backend, config.llm.max_tokens, context_tokens, config.response_timeout())
        .with_temperature(config.llm.temperature);

    let conversations = Arc::new(ConversationManager::new(
        config.conversation_timeout(),
        config.seed_policy(),
    ));
    let sweeper = ConversationManager::spawn_sweeper(conversations.clone(), config.sweep_interval());

    let handler = discord::Handler::new(&config, conversations, generator);
    let result = discord::run_discord_client(&token, handler).await;
    sweeper.abort();
    result.context("Discord gateway error")?;
    info!("parakeet: gateway stopped");
    Ok(())
}
