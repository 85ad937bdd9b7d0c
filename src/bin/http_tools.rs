// HTTP tools server - a standalone MCP tool peer
//
// Serves one tool per HTTP verb and advertises itself over mDNS so any
// orchestrator on the segment can pick the tools up.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use loom::config::ToolServerConfig;
use loom::discovery::{AnnounceOptions, Announcer};
use loom::toolserver::{self, HttpToolServer};

#[tokio::main]
async fn main() {
    loom::logging::init("http-tools");
    if let Err(err) = run().await {
        tracing::error!(error = %format!("{err:#}"), "http tools server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cfg = ToolServerConfig::load()?;
    tracing::info!(
        port = cfg.port,
        advertise = cfg.advertise,
        instance = %cfg.instance,
        role = %cfg.role,
        "configuration loaded"
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                cancel.cancel();
            }
        });
    }

    let server = Arc::new(HttpToolServer::new()?);
    tracing::info!(tools = ?server.tool_names(), "tools registered");

    let mut announcer = None;
    if cfg.advertise {
        let mut text = HashMap::new();
        text.insert("role".to_string(), cfg.role.clone());
        if !cfg.description.is_empty() {
            text.insert("description".to_string(), cfg.description.clone());
        }
        announcer = Some(Announcer::new(AnnounceOptions {
            instance: cfg.instance.clone(),
            port: cfg.port,
            text,
            ..Default::default()
        })?);
    }

    let result = toolserver::serve(cfg.port, server.router(), cancel.clone()).await;

    cancel.cancel();
    if let Some(mut announcer) = announcer.take() {
        announcer.stop();
    }

    result?;
    tracing::info!("http tools server stopped");
    Ok(())
}
