// Agent delegation tool server
//
// An agent wrapper exposes itself to the fabric as a single tool named
// agent_<slug(instance)>. Invoking it runs the wrapper's own upstream
// chat completion, so the orchestrator can delegate a prompt into a
// specialised child agent through the ordinary tool-call mechanism.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::types::RequestMessage;
use crate::mcp::{ToolCallRequest, ToolDefinition, ToolList};
use crate::mediator::slug;
use crate::upstream::{ChatBackend, ChatMessage, CompletionRequest};

use super::{error_response, handle_healthz};

/// Arguments accepted by the delegation tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentToolArgs {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub messages: Vec<RequestMessage>,
}

/// MCP tool server wrapping this process's upstream model.
pub struct AgentToolServer {
    backend: Arc<dyn ChatBackend>,
    model: String,
    tool_name: String,
    description: String,
    parameters: Value,
}

impl AgentToolServer {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        model: impl Into<String>,
        instance: &str,
        description: impl Into<String>,
    ) -> Self {
        let model = model.into();
        Self {
            backend,
            tool_name: format!("agent_{}", slug(instance)),
            description: compose_description(&description.into(), &model),
            model,
            parameters: json!({
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "Primary user prompt to send to the agent.",
                    },
                    "messages": {
                        "type": "array",
                        "description": "Optional chat history as an array of {role, content}.",
                        "items": {
                            "type": "object",
                            "properties": {
                                "role": {
                                    "type": "string",
                                    "description": "Role of the message (system, user, assistant).",
                                },
                                "content": {
                                    "type": "string",
                                    "description": "Message text.",
                                },
                            },
                            "required": ["role", "content"],
                        },
                    },
                },
                "required": ["prompt"],
            }),
        }
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.tool_name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/healthz", get(handle_healthz))
            .route("/tools/list", get(handle_list))
            .route("/tools/call", post(handle_call))
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(self)
    }
}

/// Tool description advertised to the fabric.
fn compose_description(user_description: &str, model: &str) -> String {
    let mut parts = Vec::new();
    let trimmed = user_description.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_string());
    }
    parts.push(format!(
        "Invokes the dedicated agent wrapper backed by model {model}."
    ));
    parts.push(
        "Use to delegate complex multi-step reasoning or conversations that should run on this \
         specialised agent."
            .to_string(),
    );
    parts.push(
        "Accepts `prompt` (string) and optional `messages` (chat history) mirroring OpenAI Chat \
         payloads."
            .to_string(),
    );
    parts.join(" ")
}

async fn handle_list(State(server): State<Arc<AgentToolServer>>) -> Json<ToolList> {
    Json(ToolList {
        tools: vec![server.definition()],
    })
}

async fn handle_call(State(server): State<Arc<AgentToolServer>>, body: String) -> Response {
    let request: ToolCallRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err),
    };
    if request.name != server.tool_name {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("tool {:?} not found", request.name),
        );
    }
    let args: AgentToolArgs = match serde_json::from_value(normalize_arguments(request.arguments))
    {
        Ok(args) => args,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err),
    };
    if args.prompt.trim().is_empty() && args.messages.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "prompt or messages are required");
    }

    let submitted = args.messages.len() + 1;
    let messages = build_messages(&server.description, &args);

    let completion = match server
        .backend
        .complete(CompletionRequest {
            model: server.model.clone(),
            messages,
            tools: None,
        })
        .await
    {
        Ok(completion) => completion,
        Err(err) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
        }
    };
    let Some(choice) = completion.choices.first() else {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "empty response from provider",
        );
    };

    tracing::info!(
        tool = %server.tool_name,
        prompt_tokens = completion.usage.prompt_tokens,
        completion_tokens = completion.usage.completion_tokens,
        "agent tool invocation complete"
    );

    (
        StatusCode::OK,
        Json(json!({
            "tool": server.tool_name,
            "result": {
                "content": choice.message.content.clone().unwrap_or_default(),
                "model": server.model,
                "prompt_tokens": completion.usage.prompt_tokens,
                "completion_tokens": completion.usage.completion_tokens,
                "total_tokens": completion.usage.total_tokens,
                "messages_submitted": submitted,
            },
        })),
    )
        .into_response()
}

/// A null argument object decodes as empty args.
fn normalize_arguments(arguments: Value) -> Value {
    if arguments.is_null() {
        json!({})
    } else {
        arguments
    }
}

fn build_messages(description: &str, args: &AgentToolArgs) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(args.messages.len() + 2);
    if !description.trim().is_empty() {
        messages.push(ChatMessage::system(description));
    }
    for message in &args.messages {
        let role = message.role.trim().to_lowercase();
        messages.push(match role.as_str() {
            "system" => ChatMessage::system(&message.content),
            "assistant" => ChatMessage::assistant(&message.content),
            _ => ChatMessage::user(&message.content),
        });
    }
    if !args.prompt.trim().is_empty() {
        messages.push(ChatMessage::user(&args.prompt));
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{Completion, CompletionChoice, Usage};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct EchoBackend {
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl ChatBackend for EchoBackend {
        async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
            self.seen.lock().unwrap().push(request);
            Ok(Completion {
                choices: vec![CompletionChoice {
                    index: 0,
                    message: ChatMessage::assistant("delegated answer"),
                    finish_reason: Some("stop".to_string()),
                }],
                usage: Usage {
                    prompt_tokens: 10,
                    completion_tokens: 4,
                    total_tokens: 14,
                },
                ..Default::default()
            })
        }
    }

    fn server() -> (Arc<AgentToolServer>, Arc<EchoBackend>) {
        let backend = Arc::new(EchoBackend {
            seen: Mutex::new(Vec::new()),
        });
        let server = Arc::new(AgentToolServer::new(
            Arc::clone(&backend) as Arc<dyn ChatBackend>,
            "llama3",
            "Mac Studio.local",
            "House agent",
        ));
        (server, backend)
    }

    async fn spawn(server: Arc<AgentToolServer>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, server.router()).await.unwrap() });
        format!("http://{addr}")
    }

    #[test]
    fn test_tool_name_sluggified() {
        let (server, _) = server();
        assert_eq!(server.tool_name(), "agent_mac_studio_local");
    }

    #[test]
    fn test_definition_schema_requires_prompt() {
        let (server, _) = server();
        let def = server.definition();
        assert_eq!(def.parameters["required"][0], "prompt");
        assert!(def.description.contains("llama3"));
        assert!(def.description.starts_with("House agent"));
    }

    #[tokio::test]
    async fn test_list_exposes_single_tool() {
        let (server, _) = server();
        let base = spawn(server).await;

        let list: ToolList = reqwest::get(format!("{base}/tools/list"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list.tools.len(), 1);
        assert_eq!(list.tools[0].name, "agent_mac_studio_local");
    }

    #[tokio::test]
    async fn test_call_runs_upstream_completion() {
        let (server, backend) = server();
        let base = spawn(server).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/tools/call"))
            .json(&json!({
                "name": "agent_mac_studio_local",
                "arguments": {"prompt": "what is the weather"},
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["tool"], "agent_mac_studio_local");
        assert_eq!(body["result"]["content"], "delegated answer");
        assert_eq!(body["result"]["model"], "llama3");
        assert_eq!(body["result"]["total_tokens"], 14);
        assert_eq!(body["result"]["messages_submitted"], 1);

        // The wrapper's description acts as the system prompt.
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].messages[0].role, "system");
        assert_eq!(seen[0].messages.last().unwrap().role, "user");
    }

    #[tokio::test]
    async fn test_call_with_history_counts_messages() {
        let (server, _) = server();
        let base = spawn(server).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/tools/call"))
            .json(&json!({
                "name": "agent_mac_studio_local",
                "arguments": {
                    "prompt": "continue",
                    "messages": [
                        {"role": "user", "content": "hello"},
                        {"role": "assistant", "content": "hi"},
                    ],
                },
            }))
            .send()
            .await
            .unwrap();
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["result"]["messages_submitted"], 3);
    }

    #[tokio::test]
    async fn test_unknown_tool_name_rejected() {
        let (server, _) = server();
        let base = spawn(server).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/tools/call"))
            .json(&json!({"name": "agent_other", "arguments": {"prompt": "x"}}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_empty_prompt_and_history_rejected() {
        let (server, _) = server();
        let base = spawn(server).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/tools/call"))
            .json(&json!({"name": "agent_mac_studio_local", "arguments": {}}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("prompt or messages"));
    }

    #[test]
    fn test_build_messages_role_mapping() {
        let args = AgentToolArgs {
            prompt: "go".to_string(),
            messages: vec![
                RequestMessage {
                    role: "weird".to_string(),
                    content: "x".to_string(),
                    name: None,
                },
            ],
        };
        let messages = build_messages("desc", &args);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[2].role, "user");
        assert_eq!(messages[2].content.as_deref(), Some("go"));
    }
}
