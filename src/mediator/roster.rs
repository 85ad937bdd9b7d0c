// Per-turn tool roster
//
// Every discovered tool becomes a namespaced function: the peer instance
// and tool name are slugged and joined with `__`; collisions inside one
// roster get a `__2`, `__3`, ... suffix. A side index maps each function
// name back to the owning peer; the function definitions sent upstream
// stay pure JSON.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::discovery::{ServerInfo, ServerKind};
use crate::upstream::ToolSpec;

/// Lowercase, trim, and replace separator characters with `_`. Empty
/// input slugs to `tool`.
pub fn slug(input: &str) -> String {
    let normalized = input.trim().to_lowercase();
    if normalized.is_empty() {
        return "tool".to_string();
    }
    normalized
        .chars()
        .map(|c| match c {
            ' ' | '-' | '.' | '/' | ':' => '_',
            other => other,
        })
        .collect()
}

/// Roster-unique function name for a peer tool.
pub(crate) fn function_name(
    instance: &str,
    tool: &str,
    taken: &HashMap<String, ToolBinding>,
) -> String {
    let base = format!("{}__{}", slug(instance), slug(tool));
    if !taken.contains_key(&base) {
        return base;
    }
    let mut suffix = 2;
    loop {
        let candidate = format!("{base}__{suffix}");
        if !taken.contains_key(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

/// Description shown to the upstream model: the tool's own text plus the
/// originating peer, with the peer's advertised description appended when
/// present.
pub(crate) fn compose_description(tool_description: &str, server: &ServerInfo) -> String {
    let mut parts = Vec::new();
    let trimmed = tool_description.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_string());
    }

    let mut origin = format!("Provided by {} ({})", server.instance, server.kind);
    if let Some(desc) = server
        .text
        .get("description")
        .map(|d| d.trim())
        .filter(|d| !d.is_empty())
    {
        origin = format!("{origin} - {desc}");
    }
    parts.push(origin);

    parts.join(" | ")
}

/// Back-reference from a roster function name to the peer that owns the
/// tool. Never serialized outward.
#[derive(Debug, Clone)]
pub(crate) struct ToolBinding {
    pub server: ServerInfo,
    pub tool: String,
    pub description: String,
}

/// Discovered tool in an OpenAI-style shape, for operator inspection via
/// GET /v1/tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub original_tool: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub parameters: Value,
    pub server: ToolServerRef,
}

/// Contextual information about the MCP server hosting a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerRef {
    pub instance: String,
    pub address: String,
    pub kind: ServerKind,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Everything one chat turn needs: the function definitions for the
/// upstream request, the back-reference index, and the inspection view.
#[derive(Debug, Default)]
pub(crate) struct Roster {
    pub specs: Vec<ToolSpec>,
    pub bindings: HashMap<String, ToolBinding>,
    pub descriptors: Vec<ToolDescriptor>,
}
