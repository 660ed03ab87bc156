//! # Chat Completion Client
//!
//! Sends the whole transcript to an OpenAI-compatible `/chat/completions`
//! endpoint and returns the text of the first choice.
//!
//! ## Request:
//! `{"model": ..., "messages": [{"role", "content"}, ...], "n": 1}`
//!
//! ## Failures:
//! Transport errors, non-2xx statuses, malformed bodies and empty choices all
//! become `SessionError::Completion`; the status code is kept when the
//! service answered.

use crate::config::CompletionConfig;
use crate::error::{SessionError, SessionResult};
use crate::session::transcript::{Role, Turn};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A service that continues a conversation.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Return the assistant reply to the conversation in `turns`.
    async fn complete(&self, turns: &[Turn]) -> SessionResult<String>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    n: u8,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

pub struct OpenAiCompletion {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
}

impl OpenAiCompletion {
    pub fn new(config: &CompletionConfig) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

fn build_request<'a>(model: &'a str, turns: &'a [Turn]) -> ChatCompletionRequest<'a> {
    ChatCompletionRequest {
        model,
        messages: turns
            .iter()
            .map(|turn| ChatMessage {
                role: turn.role,
                content: &turn.content,
            })
            .collect(),
        n: 1,
    }
}

/// First choice's content from a successful response body.
fn parse_reply(body: &str) -> SessionResult<String> {
    let response: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| SessionError::completion(format!("malformed response: {}", e)))?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| SessionError::completion("response contained no reply"))
}

/// Best human-readable message from an error response body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

#[async_trait]
impl ChatCompletion for OpenAiCompletion {
    async fn complete(&self, turns: &[Turn]) -> SessionResult<String> {
        if self.api_key.is_empty() {
            return Err(SessionError::completion("OPENAI_API_KEY is not configured"));
        }

        debug!(url = %self.url, turns = turns.len(), "Sending chat completion request");

        let response = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&build_request(&self.model, turns))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SessionError::completion("request timed out")
                } else {
                    SessionError::completion(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SessionError::completion(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(SessionError::Completion {
                status: Some(status.as_u16()),
                message: error_message(&body),
            });
        }

        parse_reply(&body)
    }
}
