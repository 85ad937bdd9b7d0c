// Peer tool servers
//
// Every MCP peer serves GET /healthz, GET /tools/list, and
// POST /tools/call with JSON bodies. Unknown tool names and malformed
// arguments come back as 400 with the peer error envelope
// {"error": {"message", "code"}}.

pub mod agent_tool;
pub mod http_tools;

pub use agent_tool::AgentToolServer;
pub use http_tools::HttpToolServer;

use std::fmt::Display;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tokio_util::sync::CancellationToken;

pub(crate) async fn handle_healthz() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

pub(crate) fn error_response(status: StatusCode, message: impl Display) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "message": message.to_string(),
                "code": status.as_u16(),
            }
        })),
    )
        .into_response()
}

/// Serve a peer router on all interfaces until the token is cancelled.
pub async fn serve(port: u16, router: Router, cancel: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, "tool server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("serve tools")?;
    Ok(())
}
