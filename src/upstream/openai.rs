// OpenAI-compatible provider client
//
// Works against anything that speaks the chat-completions wire format:
// OpenAI itself, Ollama, vLLM, LM Studio, and the like.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use super::{ChatBackend, Completion, CompletionRequest};

const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Parse an API error body and return a human-friendly message with hints.
///
/// Most providers return `{"error": {"message": "...", "type": "..."}}`.
fn friendly_api_error(status: reqwest::StatusCode, body: &str) -> String {
    let extracted = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        });

    let msg = extracted.as_deref().unwrap_or(body.trim());

    let hint = match status.as_u16() {
        401 => " — check API_KEY / OPENAI_API_KEY",
        404 => " — model not found; check --model / AGENT_MODEL",
        429 => " — rate limited; wait a moment before retrying",
        500 | 502 | 503 => " — the provider is having issues; try again in a moment",
        _ => "",
    };

    format!("API error {}{}: {}", status, hint, msg)
}

/// Chat client for an OpenAI-shaped endpoint.
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    /// `base_url` includes the API prefix, e.g. `http://host:11434/v1`.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.base_url);

        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.as_ref().map(Vec::len).unwrap_or(0),
            "sending chat completion"
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("send chat completion request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{}", friendly_api_error(status, &body));
        }

        response
            .json::<Completion>()
            .await
            .context("parse chat completion response")
    }
}
