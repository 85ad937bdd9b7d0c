// External chat API types
//
// These match the OpenAI Chat Completions wire format so any
// OpenAI-compatible UI can talk to the orchestrator unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mediator::ToolDescriptor;

/// Request body for POST /v1/chat/completions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<RequestMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Streaming is refused; the flag is decoded so the refusal can be
    /// deliberate.
    #[serde(default)]
    pub stream: bool,
    /// Client-supplied tools are accepted for shape compatibility; the
    /// roster is built from discovery instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ChatCompletionRequest {
    /// Lightweight admission checks on the decoded request.
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("model is required".to_string());
        }
        if self.messages.is_empty() {
            return Err("at least one message is required".to_string());
        }
        for (i, message) in self.messages.iter().enumerate() {
            if message.role.trim().is_empty() {
                return Err(format!("message {i} missing role"));
            }
        }
        Ok(())
    }
}

/// Incoming chat message; content is treated as text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Response body for POST /v1/chat/completions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub finish_reason: String,
    pub message: AssistantMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
}

/// Token accounting mirrored from the upstream provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Response body for GET /v1/models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<ModelDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub object: String,
    pub owned_by: String,
}

/// Response body for GET /v1/tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsResponse {
    pub object: String,
    pub data: Vec<ToolDescriptor>,
}

/// OpenAI-style error envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
}
