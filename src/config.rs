// Flag/env configuration for the fabric binaries
//
// Resolution order: flags override environment, environment overrides
// built-in defaults. The binaries exit with code 1 when resolution
// fails.

use anyhow::{Context, Result};
use clap::Parser;

use crate::discovery::announcer::default_instance;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_API_MODEL: &str = "go-agent-1";
pub const DEFAULT_BASE_URL: &str = "http://ollama:11434/v1";
pub const DEFAULT_API_KEY: &str = "ollama";

/// Role strings advertised over mDNS.
pub const ROLE_ORCHESTRATOR: &str = "orchestrator";
pub const ROLE_AGENT_WRAPPER: &str = "agent-wrapper";
pub const ROLE_TOOL: &str = "tool";

/// Command line for the orchestrator and agent-wrapper binaries.
#[derive(Parser, Debug, Default)]
#[command(version, about)]
pub struct AgentArgs {
    /// ID of the base model used against the upstream provider (required)
    #[arg(long = "model", env = "AGENT_MODEL")]
    pub model: Option<String>,

    /// Model name exposed to API clients
    #[arg(long = "api-model", env = "API_MODEL")]
    pub api_model: Option<String>,

    /// HTTP listen port
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Base URL for the upstream OpenAI-compatible endpoint (e.g. http://host:port/v1)
    #[arg(long = "base-url", env = "BASE_URL")]
    pub base_url: Option<String>,

    /// API key for the upstream endpoint
    #[arg(long = "api-key", env = "API_KEY")]
    pub api_key: Option<String>,

    /// Publish this process over mDNS
    #[arg(long, env = "ADVERTISE", num_args = 0..=1, default_missing_value = "true")]
    pub advertise: Option<bool>,

    /// Instance name advertised over mDNS
    #[arg(long, env = "INSTANCE_NAME")]
    pub instance: Option<String>,

    /// Role advertised over mDNS (orchestrator, agent-wrapper, ...)
    #[arg(long, env = "ROLE")]
    pub role: Option<String>,

    /// Human readable description for this agent
    #[arg(long, env = "DESCRIPTION")]
    pub description: Option<String>,
}

/// Resolved configuration for the orchestrator and agent-wrapper.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub port: u16,
    pub backend_model: String,
    pub api_model: String,
    pub base_url: String,
    pub api_key: String,
    pub advertise: bool,
    pub instance: String,
    pub role: String,
    pub description: String,
}

impl AgentConfig {
    /// Parse the process arguments with orchestrator defaults
    /// (advertise off).
    pub fn load_orchestrator() -> Result<Self> {
        Self::resolve(AgentArgs::parse(), ROLE_ORCHESTRATOR, false)
    }

    /// Parse the process arguments with agent-wrapper defaults
    /// (advertise on).
    pub fn load_wrapper() -> Result<Self> {
        Self::resolve(AgentArgs::parse(), ROLE_AGENT_WRAPPER, true)
    }

    fn resolve(args: AgentArgs, default_role: &str, default_advertise: bool) -> Result<Self> {
        let backend_model = args
            .model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .context("base model is required (pass --model or set AGENT_MODEL)")?
            .to_string();

        Ok(Self {
            port: args.port.unwrap_or(DEFAULT_PORT),
            backend_model,
            api_model: non_empty_or(args.api_model, DEFAULT_API_MODEL),
            base_url: resolve_base_url(args.base_url),
            api_key: resolve_api_key(args.api_key),
            advertise: args.advertise.unwrap_or(default_advertise),
            instance: non_empty_or_else(args.instance, default_instance),
            role: non_empty_or(args.role, default_role),
            description: args.description.unwrap_or_default().trim().to_string(),
        })
    }
}

/// Command line for standalone MCP tool servers.
#[derive(Parser, Debug, Default)]
#[command(version, about)]
pub struct ToolServerArgs {
    /// HTTP listen port
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Publish this tool server over mDNS
    #[arg(long, env = "ADVERTISE", num_args = 0..=1, default_missing_value = "true")]
    pub advertise: Option<bool>,

    /// Instance name advertised over mDNS
    #[arg(long, env = "INSTANCE_NAME")]
    pub instance: Option<String>,

    /// Role advertised over mDNS
    #[arg(long, env = "ROLE")]
    pub role: Option<String>,

    /// Human readable description for this tool server
    #[arg(long, env = "DESCRIPTION")]
    pub description: Option<String>,
}

/// Resolved configuration for a standalone tool server.
#[derive(Debug, Clone)]
pub struct ToolServerConfig {
    pub port: u16,
    pub advertise: bool,
    pub instance: String,
    pub role: String,
    pub description: String,
}

impl ToolServerConfig {
    pub fn load() -> Result<Self> {
        Self::resolve(ToolServerArgs::parse())
    }

    fn resolve(args: ToolServerArgs) -> Result<Self> {
        Ok(Self {
            port: args.port.unwrap_or(DEFAULT_PORT),
            advertise: args.advertise.unwrap_or(true),
            instance: non_empty_or_else(args.instance, default_instance),
            role: non_empty_or(args.role, ROLE_TOOL),
            description: args.description.unwrap_or_default().trim().to_string(),
        })
    }
}

fn resolve_base_url(value: Option<String>) -> String {
    let url = non_empty_or(value, DEFAULT_BASE_URL);
    let trimmed = url.trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_BASE_URL.to_string()
    } else {
        trimmed.to_string()
    }
}

/// API key precedence: --api-key / API_KEY, then OPENAI_API_KEY, then the
/// built-in default.
fn resolve_api_key(value: Option<String>) -> String {
    if let Some(key) = value.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()) {
        return key;
    }
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        let key = key.trim().to_string();
        if !key.is_empty() {
            return key;
        }
    }
    DEFAULT_API_KEY.to_string()
}

fn non_empty_or(value: Option<String>, fallback: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn non_empty_or_else(value: Option<String>, fallback: impl FnOnce() -> String) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_args(argv: &[&str]) -> AgentArgs {
        let mut full = vec!["loom-test"];
        full.extend_from_slice(argv);
        AgentArgs::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_orchestrator_defaults() {
        let cfg = AgentConfig::resolve(
            agent_args(&["--model", "llama3", "--api-key", "k"]),
            ROLE_ORCHESTRATOR,
            false,
        )
        .unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.backend_model, "llama3");
        assert_eq!(cfg.api_model, DEFAULT_API_MODEL);
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert!(!cfg.advertise);
        assert_eq!(cfg.role, ROLE_ORCHESTRATOR);
        assert!(!cfg.instance.is_empty());
    }

    #[test]
    fn test_wrapper_advertises_by_default() {
        let cfg = AgentConfig::resolve(
            agent_args(&["--model", "llama3", "--api-key", "k"]),
            ROLE_AGENT_WRAPPER,
            true,
        )
        .unwrap();
        assert!(cfg.advertise);
        assert_eq!(cfg.role, ROLE_AGENT_WRAPPER);
    }

    #[test]
    fn test_model_required() {
        let err = AgentConfig::resolve(
            agent_args(&["--api-key", "k"]),
            ROLE_ORCHESTRATOR,
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("base model is required"));
    }

    #[test]
    fn test_flags_override_defaults() {
        let cfg = AgentConfig::resolve(
            agent_args(&[
                "--model",
                "llama3",
                "--api-model",
                "house-agent",
                "--port",
                "9090",
                "--base-url",
                "http://10.0.0.4:8000/v1/",
                "--api-key",
                "secret",
                "--advertise",
                "false",
                "--instance",
                "den",
                "--role",
                "relay",
                "--description",
                "  den agent  ",
            ]),
            ROLE_ORCHESTRATOR,
            true,
        )
        .unwrap();
        assert_eq!(cfg.api_model, "house-agent");
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.base_url, "http://10.0.0.4:8000/v1");
        assert_eq!(cfg.api_key, "secret");
        assert!(!cfg.advertise);
        assert_eq!(cfg.instance, "den");
        assert_eq!(cfg.role, "relay");
        assert_eq!(cfg.description, "den agent");
    }

    #[test]
    fn test_bare_advertise_flag_enables() {
        let cfg = AgentConfig::resolve(
            agent_args(&["--model", "llama3", "--api-key", "k", "--advertise"]),
            ROLE_ORCHESTRATOR,
            false,
        )
        .unwrap();
        assert!(cfg.advertise);
    }

    #[test]
    fn test_tool_server_defaults() {
        let cfg = ToolServerConfig::resolve(
            ToolServerArgs::try_parse_from(["loom-test"]).unwrap(),
        )
        .unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert!(cfg.advertise);
        assert_eq!(cfg.role, ROLE_TOOL);
    }

    #[test]
    fn test_base_url_trailing_slashes_trimmed() {
        assert_eq!(
            resolve_base_url(Some("http://host:1234/v1///".to_string())),
            "http://host:1234/v1"
        );
        assert_eq!(resolve_base_url(Some("   ".to_string())), DEFAULT_BASE_URL);
        assert_eq!(resolve_base_url(None), DEFAULT_BASE_URL);
    }

    #[test]
    fn test_api_key_explicit_wins() {
        assert_eq!(resolve_api_key(Some(" secret ".to_string())), "secret");
    }
}
