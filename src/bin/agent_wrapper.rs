// Agent wrapper - a specialised child agent on the fabric
//
// Exposes its own upstream model as a single delegation tool, advertises
// itself over mDNS, and follows the fabric for diagnostics, including
// health probes of discovered tool servers.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use loom::config::AgentConfig;
use loom::discovery::monitor::{self, MonitorOptions};
use loom::discovery::{AnnounceOptions, Announcer, Registry, RegistryOptions};
use loom::mcp;
use loom::toolserver::{self, AgentToolServer};
use loom::upstream::{ChatBackend, OpenAiClient};

#[tokio::main]
async fn main() {
    loom::logging::init("agent-wrapper");
    if let Err(err) = run().await {
        tracing::error!(error = %format!("{err:#}"), "agent wrapper failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cfg = AgentConfig::load_wrapper()?;
    tracing::info!(
        port = cfg.port,
        backend_model = %cfg.backend_model,
        api_model = %cfg.api_model,
        base_url = %cfg.base_url,
        api_key_set = !cfg.api_key.is_empty(),
        advertise = cfg.advertise,
        instance = %cfg.instance,
        role = %cfg.role,
        description = %cfg.description,
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

    let tool_client = Arc::new(mcp::Client::new(mcp::ClientOptions::default())?);
    let backend: Arc<dyn ChatBackend> = Arc::new(OpenAiClient::new(&cfg.base_url, &cfg.api_key)?);

    let registry = Arc::new(Registry::new(RegistryOptions::default()));
    registry.start()?;

    let monitor_task = tokio::spawn(monitor::run(
        Arc::clone(&registry),
        Arc::clone(&tool_client),
        cancel.clone(),
        MonitorOptions { probe_health: true },
    ));

    let server = Arc::new(AgentToolServer::new(
        backend,
        cfg.backend_model.clone(),
        &cfg.instance,
        cfg.description.clone(),
    ));
    tracing::info!(tool = server.tool_name(), "agent tool registered");

    let mut announcer = None;
    if cfg.advertise {
        let mut text = HashMap::new();
        text.insert("role".to_string(), cfg.role.clone());
        text.insert("model".to_string(), cfg.backend_model.clone());
        text.insert("api_model".to_string(), cfg.api_model.clone());
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

    tracing::info!(
        backend_model = %cfg.backend_model,
        api_model = %cfg.api_model,
        "agent wrapper ready"
    );
    let result = toolserver::serve(cfg.port, server.router(), cancel.clone()).await;

    cancel.cancel();
    if let Some(mut announcer) = announcer.take() {
        announcer.stop();
    }
    registry.stop().await;
    let _ = monitor_task.await;

    result?;
    tracing::info!("agent wrapper stopped");
    Ok(())
}
