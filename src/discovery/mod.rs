// Peer discovery over link-local multicast DNS
//
// A peer is any process on the local segment advertising the fabric's
// service label. TXT metadata classifies the peer's role and carries
// model names and URL hints for the MCP client.

pub mod announcer;
pub mod monitor;
pub mod registry;

pub use announcer::{AnnounceOptions, Announcer};
pub use registry::{EventStream, Observation, Registry, RegistryOptions};

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Service label browsed and advertised on the local segment.
pub const DEFAULT_SERVICE: &str = "_mcp-http._tcp";

/// mDNS browse domain. Link-local only.
pub const DEFAULT_DOMAIN: &str = "local.";

/// Peers unseen for this long are dropped from the snapshot.
pub const DEFAULT_ENTRY_TTL: Duration = Duration::from_secs(45);

/// Cadence of the stale-entry sweep.
pub const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(15);

/// Instance name of last resort when no hostname is available.
pub const FALLBACK_INSTANCE: &str = "mcp-agent";

/// Peer role advertised in the TXT `role` record.
///
/// Anything outside the three known roles is carried through verbatim
/// (lowercased) so operators can introduce new roles without a version
/// bump on every peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServerKind {
    Tool,
    AgentWrapper,
    Orchestrator,
    Other(String),
}

impl ServerKind {
    /// Classify a raw TXT `role` value. Empty means `tool`.
    pub fn classify(role: &str) -> Self {
        let role = role.trim().to_lowercase();
        match role.as_str() {
            "" | "tool" => ServerKind::Tool,
            "agent-wrapper" => ServerKind::AgentWrapper,
            "orchestrator" => ServerKind::Orchestrator,
            _ => ServerKind::Other(role),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ServerKind::Tool => "tool",
            ServerKind::AgentWrapper => "agent-wrapper",
            ServerKind::Orchestrator => "orchestrator",
            ServerKind::Other(role) => role,
        }
    }

    /// Tool hosts are the peers the mediator aggregates tools from.
    pub fn is_tool_host(&self) -> bool {
        matches!(self, ServerKind::Tool | ServerKind::AgentWrapper)
    }
}

impl From<String> for ServerKind {
    fn from(role: String) -> Self {
        ServerKind::classify(&role)
    }
}

impl From<ServerKind> for String {
    fn from(kind: ServerKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata the mediator needs to connect to a discovered MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub instance: String,
    pub host: String,
    pub port: u16,
    /// Resolved `host:port` endpoint. First IPv4 wins, then IPv6, then
    /// the bare hostname.
    pub address: String,
    pub kind: ServerKind,
    pub last_seen: DateTime<Utc>,
    /// Parsed TXT records. Unknown keys pass through untouched.
    pub text: HashMap<String, String>,
}

/// Change type emitted to registry subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Added,
    Updated,
    Removed,
}

/// A change in the discovered peer set. Carries an owned copy of the
/// record; subscribers never hold references into registry storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub server: ServerInfo,
}

/// Materialise TXT metadata as wire `k=v` records. Keys are trimmed;
/// empty keys are skipped.
pub fn encode_txt(text: &HashMap<String, String>) -> Vec<String> {
    let mut records: Vec<String> = text
        .iter()
        .filter_map(|(k, v)| {
            let key = k.trim();
            if key.is_empty() {
                return None;
            }
            Some(format!("{}={}", key, v.trim()))
        })
        .collect();
    records.sort();
    records
}

/// Split a wire TXT record at the first `=`. Records without one are
/// malformed and yield `None`.
pub fn parse_txt_record(record: &str) -> Option<(String, String)> {
    let idx = record.find('=')?;
    Some((record[..idx].to_string(), record[idx + 1..].to_string()))
}
