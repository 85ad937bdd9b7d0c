// Loom - local-network fabric for MCP tool servers and LLM agent wrappers
// Library exports
//
// An orchestrator exposes a single OpenAI-compatible chat endpoint,
// discovers peer MCP services over link-local mDNS, attaches every remote
// tool to each chat turn, and feeds tool results back to the upstream
// model until it answers without tool calls.

pub mod api; // External chat API (OpenAI-shaped orchestrator surface)
pub mod config; // Flag/env configuration for the binaries
pub mod discovery; // mDNS registry, announcer, diagnostics monitor
pub mod logging; // Tracing bootstrap shared by the binaries
pub mod mcp; // Peer-to-peer MCP HTTP client and wire types
pub mod mediator; // Tool aggregation and the completion/tool-call loop
pub mod toolserver; // Peer tool servers (HTTP verbs, agent delegation)
pub mod upstream; // Upstream chat-completions provider contract
