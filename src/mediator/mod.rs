// Mediator - tool aggregation and the completion/tool-call loop
//
// One chat turn: snapshot the registry, fetch every tool host's
// catalogue into a namespaced roster, then alternate between upstream
// completions and remote tool invocations until the model answers
// without tool calls. One peer failing to list degrades to a warning;
// a failing tool call fails the turn.

pub mod roster;

pub use roster::{slug, ToolDescriptor, ToolServerRef};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use thiserror::Error;

use crate::api::types::{
    AssistantMessage, ChatCompletionRequest, ChatCompletionResponse, Choice, Usage,
};
use crate::discovery::{Registry, ServerKind};
use crate::mcp;
use crate::upstream::{
    ChatBackend, ChatMessage, Completion, CompletionChoice, CompletionRequest, FunctionSpec,
    ToolSpec,
};

use roster::{Roster, ToolBinding};

/// Model name exposed to API clients when none is configured.
pub const DEFAULT_MODEL_NAME: &str = "go-agent-1";

/// Deadline for one peer's /tools/list during aggregation.
const LIST_TOOLS_DEADLINE: Duration = Duration::from_secs(10);

/// Ceiling on one whole chat turn; bounds a model that never stops
/// emitting tool calls.
const DEFAULT_TURN_DEADLINE: Duration = Duration::from_secs(300);

/// Observable failure taxonomy for a chat turn. The API layer maps these
/// to HTTP statuses.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("model not supported: {0}")]
    UnsupportedModel(String),
    #[error("streaming is not supported")]
    StreamingUnsupported,
    #[error("{0}")]
    InvalidRequest(String),
    #[error("chat backend not configured")]
    BackendNotConfigured,
    #[error("chat turn deadline exceeded")]
    DeadlineExceeded,
    #[error("empty completion response")]
    EmptyCompletion,
    #[error("upstream completion failed: {0}")]
    Upstream(String),
    #[error("tool discovery failed: {0}")]
    ToolDiscovery(String),
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("invalid tool arguments for {name}: {reason}")]
    InvalidToolArguments { name: String, reason: String },
    #[error("tool {name} failed: {reason}")]
    ToolCallFailed { name: String, reason: String },
}

/// Construction-time configuration for the mediator.
#[derive(Default)]
pub struct MediatorOptions {
    /// Model name exposed to API clients. Empty falls back to the default.
    pub model_name: String,
    /// Model name submitted upstream. Empty falls back to `model_name`.
    pub provider_model: String,
    /// Peer kinds eligible for tool aggregation. Empty means no
    /// restriction beyond tool hosts.
    pub allowed_kinds: Vec<String>,
    pub backend: Option<Arc<dyn ChatBackend>>,
    pub tool_client: Option<Arc<mcp::Client>>,
    pub turn_deadline: Option<Duration>,
}

/// Routes chat requests, consults discovery, and orchestrates MCP tool
/// usage.
pub struct Mediator {
    registry: Arc<Registry>,
    backend: Option<Arc<dyn ChatBackend>>,
    model_name: String,
    provider_model: String,
    allowed_kinds: HashSet<ServerKind>,
    tool_client: Arc<mcp::Client>,
    turn_deadline: Duration,
}

impl Mediator {
    pub fn new(registry: Arc<Registry>, opts: MediatorOptions) -> Result<Self> {
        let model_name = if opts.model_name.trim().is_empty() {
            DEFAULT_MODEL_NAME.to_string()
        } else {
            opts.model_name.trim().to_string()
        };
        let allowed_kinds = opts
            .allowed_kinds
            .iter()
            .map(|kind| kind.trim())
            .filter(|kind| !kind.is_empty())
            .map(ServerKind::classify)
            .collect();
        let tool_client = match opts.tool_client {
            Some(client) => client,
            None => Arc::new(mcp::Client::new(mcp::ClientOptions::default())?),
        };
        Ok(Self {
            registry,
            backend: opts.backend,
            model_name,
            provider_model: opts.provider_model.trim().to_string(),
            allowed_kinds,
            tool_client,
            turn_deadline: opts.turn_deadline.unwrap_or(DEFAULT_TURN_DEADLINE),
        })
    }

    /// Models understood by this mediator.
    pub fn supported_models(&self) -> Vec<String> {
        vec![self.model_name.clone()]
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Main entry point used by the API layer: run one full chat turn.
    pub async fn handle_chat(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ChatError> {
        request.validate().map_err(ChatError::InvalidRequest)?;
        if request.stream {
            return Err(ChatError::StreamingUnsupported);
        }
        if !request.model.is_empty() && request.model != self.model_name {
            return Err(ChatError::UnsupportedModel(request.model));
        }
        let backend = self
            .backend
            .as_ref()
            .ok_or(ChatError::BackendNotConfigured)?;

        match tokio::time::timeout(self.turn_deadline, self.run_turn(backend.as_ref(), &request))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ChatError::DeadlineExceeded),
        }
    }

    /// Aggregate all tools exposed by discovered MCP servers.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ChatError> {
        let (roster, warning) = self.collect_tools().await;
        if roster.descriptors.is_empty() {
            if let Some(warning) = warning {
                return Err(ChatError::ToolDiscovery(warning));
            }
        }
        Ok(roster.descriptors)
    }

    async fn run_turn(
        &self,
        backend: &dyn ChatBackend,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ChatError> {
        let mut conversation = convert_messages(request);
        let (roster, warning) = self.collect_tools().await;

        if let Some(warning) = &warning {
            tracing::warn!(%warning, "tool discovery degraded");
            conversation.push(ChatMessage::system(format!(
                "Warning: tool discovery error: {warning}"
            )));
        }

        let tools = if roster.specs.is_empty() {
            None
        } else {
            Some(roster.specs.clone())
        };

        loop {
            let completion = backend
                .complete(CompletionRequest {
                    model: self.provider_model_or_default().to_string(),
                    messages: conversation.clone(),
                    tools: tools.clone(),
                })
                .await
                .map_err(|err| ChatError::Upstream(format!("{err:#}")))?;

            let Some(choice) = completion.choices.first().cloned() else {
                return Err(ChatError::EmptyCompletion);
            };
            conversation.push(choice.message.clone());

            let calls = choice.message.tool_calls().to_vec();
            if calls.is_empty() {
                return Ok(build_response(&self.model_name, &completion, &choice));
            }

            for call in &calls {
                let name = call.function.name.as_str();
                let binding = roster
                    .bindings
                    .get(name)
                    .ok_or_else(|| ChatError::UnknownTool(name.to_string()))?;
                let arguments = parse_arguments(name, &call.function.arguments)?;

                tracing::info!(
                    function = name,
                    tool = %binding.tool,
                    server = %binding.server.instance,
                    "dispatching tool call"
                );
                let result = self
                    .tool_client
                    .call_tool(&binding.server, &binding.tool, arguments)
                    .await
                    .map_err(|err| ChatError::ToolCallFailed {
                        name: name.to_string(),
                        reason: format!("{err:#}"),
                    })?;

                let payload = serde_json::json!({
                    "tool": binding.tool,
                    "server": binding.server.instance,
                    "description": binding.description,
                    "result": result.result,
                });
                conversation.push(ChatMessage::tool(payload.to_string(), call.id.clone()));
            }
        }
    }

    /// Build this turn's roster from the current registry snapshot. A
    /// peer that fails to list is skipped; the last such failure comes
    /// back as a soft warning.
    pub(crate) async fn collect_tools(&self) -> (Roster, Option<String>) {
        let servers = self.registry.snapshot();
        let mut roster = Roster::default();
        if servers.is_empty() {
            return (roster, None);
        }

        let mut last_error: Option<String> = None;

        // Sorted iteration keeps collision-suffix assignment stable
        // across turns.
        let mut ordered: Vec<_> = servers.into_values().collect();
        ordered.sort_by(|a, b| a.instance.cmp(&b.instance));

        for server in ordered {
            if !self.allowed_kinds.is_empty() && !self.allowed_kinds.contains(&server.kind) {
                continue;
            }
            if !server.kind.is_tool_host() {
                continue;
            }

            let tools = match tokio::time::timeout(
                LIST_TOOLS_DEADLINE,
                self.tool_client.list_tools(&server),
            )
            .await
            {
                Ok(Ok(tools)) => tools,
                Ok(Err(err)) => {
                    tracing::warn!(instance = %server.instance, error = %format!("{err:#}"), "tool listing failed");
                    last_error = Some(format!("{err:#}"));
                    continue;
                }
                Err(_) => {
                    tracing::warn!(instance = %server.instance, "tool listing timed out");
                    last_error = Some(format!(
                        "list tools from {}: deadline exceeded",
                        server.instance
                    ));
                    continue;
                }
            };

            for tool in tools {
                let name = roster::function_name(&server.instance, &tool.name, &roster.bindings);
                let description = roster::compose_description(&tool.description, &server);
                roster.specs.push(ToolSpec::function(FunctionSpec {
                    name: name.clone(),
                    description: Some(description.clone()),
                    parameters: tool.parameters.clone(),
                }));
                roster.descriptors.push(ToolDescriptor {
                    name: name.clone(),
                    original_tool: tool.name.clone(),
                    description: description.clone(),
                    parameters: tool.parameters,
                    server: ToolServerRef {
                        instance: server.instance.clone(),
                        address: server.address.clone(),
                        kind: server.kind.clone(),
                        metadata: server.text.clone(),
                    },
                });
                roster.bindings.insert(
                    name,
                    ToolBinding {
                        server: server.clone(),
                        tool: tool.name,
                        description,
                    },
                );
            }
        }

        roster
            .specs
            .sort_by(|a, b| a.function.name.cmp(&b.function.name));
        roster.descriptors.sort_by(|a, b| a.name.cmp(&b.name));

        (roster, last_error)
    }

    fn provider_model_or_default(&self) -> &str {
        if self.provider_model.is_empty() {
            &self.model_name
        } else {
            &self.provider_model
        }
    }
}

/// Map incoming messages to upstream roles; anything unrecognised is
/// coerced to `user`.
fn convert_messages(request: &ChatCompletionRequest) -> Vec<ChatMessage> {
    request
        .messages
        .iter()
        .map(|message| {
            let role = message.role.trim().to_lowercase();
            match role.as_str() {
                "system" => ChatMessage::system(&message.content),
                "assistant" => ChatMessage::assistant(&message.content),
                _ => ChatMessage::user(&message.content),
            }
        })
        .collect()
}

/// Parse a tool call's JSON argument string. Empty means no arguments;
/// anything else must decode to an object.
fn parse_arguments(name: &str, raw: &str) -> Result<Value, ChatError> {
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str::<serde_json::Map<String, Value>>(raw)
        .map(Value::Object)
        .map_err(|err| ChatError::InvalidToolArguments {
            name: name.to_string(),
            reason: err.to_string(),
        })
}

fn build_response(
    model: &str,
    completion: &Completion,
    choice: &CompletionChoice,
) -> ChatCompletionResponse {
    let object = if completion.object.is_empty() {
        "chat.completion".to_string()
    } else {
        completion.object.clone()
    };
    ChatCompletionResponse {
        id: completion.id.clone(),
        object,
        created: completion.created,
        model: model.to_string(),
        choices: vec![Choice {
            index: choice.index,
            finish_reason: choice
                .finish_reason
                .clone()
                .unwrap_or_else(|| "stop".to_string()),
            message: AssistantMessage {
                role: "assistant".to_string(),
                content: choice.message.content.clone().unwrap_or_default(),
            },
        }],
        usage: Usage {
            prompt_tokens: completion.usage.prompt_tokens,
            completion_tokens: completion.usage.completion_tokens,
            total_tokens: completion.usage.total_tokens,
        },
    }
}
