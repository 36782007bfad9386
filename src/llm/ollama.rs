//! Ollama backend
//!
//! Local LLM chat using the Ollama API (`POST /api/chat`, non-streaming).
//! Also reads the model's context size via `POST /api/show`.

use super::{BackendError, ChatMessage, CompletionBackend, CompletionRequest, CompletionResponse, TokenUsage};
use crate::security;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const PROVIDER: &str = "ollama";

/// Ollama configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub endpoint: String, // e.g., "http://localhost:11434"
    pub model: String,
    /// Bearer token for remote instances.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub num_ctx: Option<u32>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            api_key: None,
            num_ctx: None,
        }
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.endpoint).context("Invalid Ollama endpoint URL")?;
        Ok(())
    }
}

/// Per-request options. Serializes to the Ollama `options` object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
    /// Max tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

fn parse_chat_response(body: &str) -> Result<CompletionResponse, BackendError> {
    let response: ChatResponse = serde_json::from_str(body).map_err(|e| BackendError::Malformed {
        provider: PROVIDER,
        message: e.to_string(),
    })?;
    let usage = match (response.prompt_eval_count, response.eval_count) {
        (None, None) => None,
        (prompt, completion) => Some(TokenUsage {
            prompt_tokens: prompt.unwrap_or(0),
            completion_tokens: completion.unwrap_or(0),
        }),
    };
    Ok(CompletionResponse {
        content: response.message.content,
        usage,
    })
}

/// Parse context size from /api/show response: "parameters" string (num_ctx N) or model_info.
fn parse_context_size_from_show(response: &serde_json::Value) -> Option<u32> {
    if let Some(params_str) = response.get("parameters").and_then(|p| p.as_str()) {
        for line in params_str.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("num_ctx") {
                if let Ok(n) = rest.trim().parse::<u32>() {
                    return Some(n);
                }
            }
        }
    }
    if let Some(info) = response.get("model_info").and_then(|m| m.as_object()) {
        for (k, v) in info {
            if k.ends_with("context_length") {
                if let Some(n) = v.as_u64() {
                    return Some(n as u32);
                }
            }
        }
    }
    None
}

/// Ollama client
pub struct OllamaClient {
    config: OllamaConfig,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig, request_timeout: Duration) -> Result<Self> {
        config.validate()?;
        info!("Ollama: Initializing client with endpoint: {}", config.endpoint);

        let client = super::http_client(request_timeout)?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key.as_deref() {
            Some(key) if !key.is_empty() => {
                debug!("Ollama: Using API key (masked: {})", security::mask_credential(key));
                request.bearer_auth(key)
            }
            _ => request,
        }
    }

    /// Check if Ollama is reachable.
    pub async fn check_connection(&self) -> bool {
        let url = self.url("/api/tags");
        debug!("Ollama: Checking connection to {}", url);
        match self.authorize(self.client.get(&url)).send().await {
            Ok(response) => {
                let success = response.status().is_success();
                if success {
                    info!("Ollama: Connection successful to {}", self.config.endpoint);
                } else {
                    debug!("Ollama: Connection failed - HTTP status: {}", response.status());
                }
                success
            }
            Err(e) => {
                debug!("Ollama: Connection error: {}", e);
                false
            }
        }
    }

    /// Context window of the configured model: `num_ctx` from config, else POST /api/show.
    pub async fn context_size(&self) -> Option<u32> {
        if let Some(n) = self.config.num_ctx {
            return Some(n);
        }
        let url = self.url("/api/show");
        let body = serde_json::json!({ "name": self.config.model });
        let response: serde_json::Value = match self.authorize(self.client.post(&url).json(&body)).send().await {
            Ok(r) => match r.json().await {
                Ok(v) => v,
                Err(e) => {
                    debug!("Ollama: Show model response parse: {}", e);
                    return None;
                }
            },
            Err(e) => {
                debug!("Ollama: Show model request failed: {}", e);
                return None;
            }
        };
        let size = parse_context_size_from_show(&response);
        info!("Ollama: Model {} context size {:?}", self.config.model, size);
        size
    }
}

#[async_trait]
impl CompletionBackend for OllamaClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, BackendError> {
        let url = self.url("/api/chat");
        let chat_request = ChatRequest {
            model: &self.config.model,
            messages: &request.messages,
            stream: false,
            options: ChatOptions {
                temperature: request.temperature,
                num_ctx: self.config.num_ctx,
                num_predict: Some(request.max_tokens),
            },
        };
        debug!("Ollama: POST {} ({} messages)", url, request.messages.len());

        let response = self
            .authorize(self.client.post(&url).json(&chat_request))
            .send()
            .await
            .map_err(|source| BackendError::Http {
                endpoint: url.clone(),
                source,
            })?;
        let status = response.status();
        let text = response.text().await.map_err(|source| BackendError::Http {
            endpoint: url.clone(),
            source,
        })?;
        if !status.is_success() {
            return Err(BackendError::Api {
                provider: PROVIDER,
                status: status.as_u16(),
                message: text.chars().take(500).collect(),
            });
        }
        parse_chat_response(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_size_from_parameters() {
        let v = serde_json::json!({ "parameters": "stop \"<|eot|>\"\nnum_ctx 8192\n" });
        assert_eq!(parse_context_size_from_show(&v), Some(8192));
    }

    #[test]
    fn context_size_from_model_info() {
        let v = serde_json::json!({ "model_info": { "llama.context_length": 131072 } });
        assert_eq!(parse_context_size_from_show(&v), Some(131072));
        assert_eq!(parse_context_size_from_show(&serde_json::json!({})), None);
    }

    #[test]
    fn chat_response_with_eval_counts() {
        let body = r#"{"model":"llama3","message":{"role":"assistant","content":"Hi there"},"done":true,"prompt_eval_count":20,"eval_count":4}"#;
        let r = parse_chat_response(body).unwrap();
        assert_eq!(r.content, "Hi there");
        assert_eq!(r.usage.map(|u| u.completion_tokens), Some(4));
    }

    #[test]
    fn chat_response_without_counts() {
        let r = parse_chat_response(r#"{"message":{"role":"assistant","content":"ok"},"done":true}"#).unwrap();
        assert!(r.usage.is_none());
    }

    #[test]
    fn invalid_endpoint_rejected() {
        let config = OllamaConfig {
            endpoint: "not a url".to_string(),
            ..OllamaConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(OllamaConfig::default().validate().is_ok());
    }
}
