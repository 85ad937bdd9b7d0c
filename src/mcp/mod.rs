// MCP peer wire contract
//
// Peers speak JSON over HTTP: GET /tools/list, POST /tools/call, and
// GET /healthz. These types are shared by the client and the tool
// servers so both sides stay on one envelope shape.

pub mod client;

pub use client::{Client, ClientOptions};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool metadata as returned by a peer's /tools/list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON-schema-shaped object describing call arguments.
    #[serde(default)]
    pub parameters: Value,
}

/// Envelope around /tools/list responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolList {
    pub tools: Vec<ToolDefinition>,
}

/// Body of a /tools/call request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Envelope around /tools/call responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    pub tool: String,
    #[serde(default)]
    pub result: Value,
}
