//! OpenAI-compatible chat completions (`POST {base_url}/chat/completions`).

use super::{BackendError, ChatMessage, CompletionBackend, CompletionRequest, CompletionResponse, TokenUsage};
use crate::security;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const PROVIDER: &str = "openai";

pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> reqwest::Result<Self> {
        let api_key = api_key.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!(
            "OpenAI: client for {} (key {})",
            base_url,
            security::mask_credential(&api_key)
        );
        Ok(Self {
            client: super::http_client(request_timeout)?,
            api_key,
            model: model.into(),
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Decode a successful `/chat/completions` body.
pub(crate) fn parse_response(body: &str) -> Result<CompletionResponse, BackendError> {
    let parsed: ApiResponse = serde_json::from_str(body).map_err(|e| BackendError::Malformed {
        provider: PROVIDER,
        message: e.to_string(),
    })?;
    let choice = parsed.choices.into_iter().next().ok_or_else(|| BackendError::Malformed {
        provider: PROVIDER,
        message: "no choices".to_string(),
    })?;
    Ok(CompletionResponse {
        content: choice.message.content.unwrap_or_default(),
        usage: parsed.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        }),
    })
}

/// Best message from an error body: the API's `error.message` if present, else the raw text.
pub(crate) fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(err) => err.error.message,
        Err(_) => body.chars().take(500).collect(),
    }
}

#[async_trait]
impl CompletionBackend for OpenAiClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ApiRequest {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };
        debug!(
            "OpenAI: POST {} ({} messages, max_tokens {})",
            url,
            request.messages.len(),
            request.max_tokens
        );

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
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
        debug!("OpenAI: {} in {:?}", status, start.elapsed());

        if !status.is_success() {
            return Err(BackendError::Api {
                provider: PROVIDER,
                status: status.as_u16(),
                message: error_message(&text),
            });
        }
        parse_response(&text)
    }
}
