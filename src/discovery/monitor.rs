// Discovery diagnostics
//
// Follows the registry event stream, logs membership changes per peer
// kind, and emits a half-minute heartbeat summarising what is visible.
// Newly added tool servers get their inventory fetched and logged;
// optionally their /healthz is probed through their own http_get tool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::mcp;

use super::{Event, EventType, Registry, ServerInfo, ServerKind};

const SUMMARY_INTERVAL: Duration = Duration::from_secs(30);
const INVENTORY_DEADLINE: Duration = Duration::from_secs(10);
const PROBE_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default)]
pub struct MonitorOptions {
    /// Probe newly added tool servers through their own `http_get` tool.
    pub probe_health: bool,
}

/// Run the diagnostics loop until the token is cancelled or the registry
/// stops.
pub async fn run(
    registry: Arc<Registry>,
    client: Arc<mcp::Client>,
    cancel: CancellationToken,
    opts: MonitorOptions,
) {
    let mut events = registry.subscribe(64);
    let mut known: HashMap<String, ServerInfo> = HashMap::new();
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + SUMMARY_INTERVAL,
        SUMMARY_INTERVAL,
    );
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                handle_event(&client, &mut known, event, opts).await;
            }
            _ = ticker.tick() => log_summary(&known),
        }
    }

    registry.unsubscribe(events);
}

async fn handle_event(
    client: &mcp::Client,
    known: &mut HashMap<String, ServerInfo>,
    event: Event,
    opts: MonitorOptions,
) {
    let info = event.server;
    let label = match info.kind {
        ServerKind::Orchestrator => "orchestrator",
        ServerKind::AgentWrapper => "agent wrapper",
        ServerKind::Tool => "tool server",
        ServerKind::Other(_) => "service",
    };

    match event.event_type {
        EventType::Added => {
            known.insert(info.instance.clone(), info.clone());
            tracing::info!(
                kind = %info.kind,
                instance = %info.instance,
                host = %info.host,
                address = %info.address,
                model = info.text.get("model").map(String::as_str).unwrap_or(""),
                "{label} discovered"
            );
            if info.kind == ServerKind::Tool {
                inspect_tools(client, &info, opts.probe_health).await;
            }
        }
        EventType::Updated => {
            known.insert(info.instance.clone(), info.clone());
            tracing::debug!(
                kind = %info.kind,
                instance = %info.instance,
                address = %info.address,
                "{label} heartbeat"
            );
        }
        EventType::Removed => {
            known.remove(&info.instance);
            tracing::warn!(
                kind = %info.kind,
                instance = %info.instance,
                address = %info.address,
                "{label} lost"
            );
        }
    }
}

async fn inspect_tools(client: &mcp::Client, info: &ServerInfo, probe_health: bool) {
    let tools =
        match tokio::time::timeout(INVENTORY_DEADLINE, client.list_tools(info)).await {
            Ok(Ok(tools)) => tools,
            Ok(Err(err)) => {
                tracing::warn!(instance = %info.instance, error = %format!("{err:#}"), "failed to list tools");
                return;
            }
            Err(_) => {
                tracing::warn!(instance = %info.instance, "tool listing timed out");
                return;
            }
        };

    let names: Vec<&str> = tools.iter().map(|tool| tool.name.as_str()).collect();
    tracing::info!(instance = %info.instance, tools = ?names, "tool inventory updated");

    if !probe_health || !tools.iter().any(|tool| tool.name.eq_ignore_ascii_case("http_get")) {
        return;
    }

    let scheme = info
        .text
        .get("scheme")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("http");
    let target = format!("{scheme}://{}/healthz", info.address);
    let arguments = serde_json::json!({ "url": target });

    match tokio::time::timeout(
        PROBE_DEADLINE,
        client.call_tool(info, "http_get", arguments),
    )
    .await
    {
        Ok(Ok(result)) => {
            tracing::info!(
                instance = %info.instance,
                url = %target,
                status = ?result.result.get("status"),
                status_text = ?result.result.get("status_text"),
                "tool health probe succeeded"
            );
        }
        Ok(Err(err)) => {
            tracing::warn!(instance = %info.instance, error = %format!("{err:#}"), "tool health probe failed");
        }
        Err(_) => {
            tracing::warn!(instance = %info.instance, "tool health probe timed out");
        }
    }
}

fn log_summary(known: &HashMap<String, ServerInfo>) {
    let mut orchestrators = 0;
    let mut agent_wrappers = 0;
    let mut tools = 0;
    let mut other = 0;
    for info in known.values() {
        match info.kind {
            ServerKind::Orchestrator => orchestrators += 1,
            ServerKind::AgentWrapper => agent_wrappers += 1,
            ServerKind::Tool => tools += 1,
            ServerKind::Other(_) => other += 1,
        }
    }
    tracing::info!(
        services = known.len(),
        orchestrators,
        agent_wrappers,
        tool_servers = tools,
        other,
        "discovery heartbeat"
    );
}
