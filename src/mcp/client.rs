// HTTP JSON client for discovered MCP peers
//
// Stateless; the target endpoint is derived per call from the peer's
// discovery record. TXT `url` overrides the whole base URL (its path is
// replaced), TXT `scheme` overrides just the scheme.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::StatusCode;
use serde_json::Value;

use crate::discovery::ServerInfo;

use super::{CallResult, ToolCallRequest, ToolDefinition, ToolList};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const LIST_BODY_LIMIT: usize = 1024;
const CALL_BODY_LIMIT: usize = 2048;

/// Client behaviour knobs.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Per-call deadline. Zero falls back to the 30 s default.
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Minimal MCP HTTP client.
pub struct Client {
    http: reqwest::Client,
}

impl Client {
    pub fn new(opts: ClientOptions) -> Result<Self> {
        let timeout = if opts.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            opts.timeout
        };
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build HTTP client")?;
        Ok(Self { http })
    }

    /// Query the peer for its available tools.
    pub async fn list_tools(&self, server: &ServerInfo) -> Result<Vec<ToolDefinition>> {
        let endpoint = build_url(server, "/tools/list")?;

        let response = self
            .http
            .get(&endpoint)
            .send()
            .await
            .with_context(|| format!("list tools from {}", server.instance))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = read_truncated(response, LIST_BODY_LIMIT).await;
            bail!("list tools failed: {status} ({body})");
        }

        let payload: ToolList = response.json().await.context("decode tools")?;
        Ok(payload.tools)
    }

    /// Invoke a specific tool on the peer. `arguments` may be null.
    pub async fn call_tool(
        &self,
        server: &ServerInfo,
        tool: &str,
        arguments: Value,
    ) -> Result<CallResult> {
        if tool.trim().is_empty() {
            bail!("tool name is required");
        }
        let endpoint = build_url(server, "/tools/call")?;

        let response = self
            .http
            .post(&endpoint)
            .json(&ToolCallRequest {
                name: tool.to_string(),
                arguments,
            })
            .send()
            .await
            .with_context(|| format!("call tool {tool} on {}", server.instance))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = read_truncated(response, CALL_BODY_LIMIT).await;
            bail!("call tool failed: {status} ({body})");
        }

        response.json().await.context("decode call result")
    }
}

/// Target URL for a peer endpoint. Precedence: TXT `url` (authority kept,
/// path replaced), then `scheme://address`, then `scheme://host:port`.
pub(crate) fn build_url(server: &ServerInfo, path: &str) -> Result<String> {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    let target = server.text.get("url").map(|s| s.trim()).unwrap_or_default();
    if !target.is_empty() {
        let mut base = reqwest::Url::parse(target)
            .with_context(|| format!("invalid server url {target:?}"))?;
        base.set_path(&path);
        return Ok(base.to_string());
    }

    let mut address = server.address.trim().to_string();
    if address.is_empty() {
        let host = if server.host.trim().is_empty() {
            server.instance.trim()
        } else {
            server.host.trim()
        };
        if host.is_empty() {
            bail!("server {} missing address", server.instance);
        }
        address = format!("{}:{}", host.trim_end_matches('.'), server.port);
    }

    let scheme = server
        .text
        .get("scheme")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("http");

    Ok(format!("{scheme}://{address}{path}"))
}

async fn read_truncated(response: reqwest::Response, limit: usize) -> String {
    let text = response.text().await.unwrap_or_default();
    truncate(text.trim(), limit)
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
