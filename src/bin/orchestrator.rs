// Orchestrator - the parent agent of the fabric
//
// Discovers peers over mDNS, aggregates their tools into each chat turn,
// and serves the OpenAI-compatible chat API to external clients.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use loom::api;
use loom::config::{AgentConfig, ROLE_AGENT_WRAPPER, ROLE_TOOL};
use loom::discovery::monitor::{self, MonitorOptions};
use loom::discovery::{AnnounceOptions, Announcer, Registry, RegistryOptions};
use loom::mcp;
use loom::mediator::{Mediator, MediatorOptions};
use loom::upstream::OpenAiClient;

#[tokio::main]
async fn main() {
    loom::logging::init("orchestrator");
    if let Err(err) = run().await {
        tracing::error!(error = %format!("{err:#}"), "orchestrator failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cfg = AgentConfig::load_orchestrator()?;
    tracing::info!(
        port = cfg.port,
        backend_model = %cfg.backend_model,
        api_model = %cfg.api_model,
        base_url = %cfg.base_url,
        api_key_set = !cfg.api_key.is_empty(),
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

    let tool_client = Arc::new(mcp::Client::new(mcp::ClientOptions::default())?);
    let backend = Arc::new(OpenAiClient::new(&cfg.base_url, &cfg.api_key)?);

    let registry = Arc::new(Registry::new(RegistryOptions::default()));
    registry.start()?;

    let monitor_task = tokio::spawn(monitor::run(
        Arc::clone(&registry),
        Arc::clone(&tool_client),
        cancel.clone(),
        MonitorOptions::default(),
    ));

    let mediator = Arc::new(Mediator::new(
        Arc::clone(&registry),
        MediatorOptions {
            model_name: cfg.api_model.clone(),
            provider_model: cfg.backend_model.clone(),
            allowed_kinds: vec![ROLE_TOOL.to_string(), ROLE_AGENT_WRAPPER.to_string()],
            backend: Some(backend),
            tool_client: Some(Arc::clone(&tool_client)),
            turn_deadline: None,
        },
    )?);

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

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    tracing::info!(
        %addr,
        api_model = %cfg.api_model,
        backend_model = %cfg.backend_model,
        "API server starting"
    );
    let result = api::serve(addr, mediator, cancel.clone()).await;

    cancel.cancel();
    if let Some(mut announcer) = announcer.take() {
        announcer.stop();
    }
    registry.stop().await;
    let _ = monitor_task.await;

    result?;
    tracing::info!("API server stopped");
    Ok(())
}
