// HTTP-methods tool server
//
// Exposes one tool per HTTP verb (http_get, http_post, http_put,
// http_patch, http_delete). Each call validates the target URL, issues
// the request with a 120 s deadline, and returns status, headers, and a
// body capped at 1 MiB.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::mcp::{ToolCallRequest, ToolDefinition, ToolList};

use super::{error_response, handle_healthz};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_RESPONSE_BYTES: usize = 1 << 20;

/// Outcome of one proxied HTTP request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpToolResult {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, Vec<String>>,
    pub body: String,
}

struct HttpTool {
    definition: ToolDefinition,
    method: Method,
}

/// MCP tool server proxying HTTP requests on behalf of the model.
pub struct HttpToolServer {
    http: reqwest::Client,
    tools: Vec<HttpTool>,
}

impl HttpToolServer {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build HTTP client")?;
        let tools = [
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ]
        .into_iter()
        .map(|method| HttpTool {
            definition: make_definition(&method),
            method,
        })
        .collect();
        Ok(Self { http, tools })
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools
            .iter()
            .map(|tool| tool.definition.name.clone())
            .collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|tool| tool.definition.clone())
            .collect()
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/healthz", get(handle_healthz))
            .route("/tools/list", get(handle_list))
            .route("/tools/call", post(handle_call))
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(self)
    }

    fn lookup(&self, name: &str) -> Option<&HttpTool> {
        self.tools.iter().find(|tool| tool.definition.name == name)
    }

    async fn execute(&self, method: &Method, target: &str, args: &Value) -> Result<HttpToolResult> {
        let url = reqwest::Url::parse(target).context("invalid url")?;

        let mut request = self.http.request(method.clone(), url);
        for (key, value) in string_map(args, "headers") {
            request = request.header(key.as_str(), value.as_str());
        }
        let body = optional_string(args, "body");
        if !body.is_empty() && *method != Method::GET && *method != Method::DELETE {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("http {method} request failed"))?;

        let status = response.status();
        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in response.headers() {
            headers
                .entry(name.to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        let mut body = Vec::new();
        let mut response = response;
        while let Some(chunk) = response.chunk().await.context("read response body")? {
            let remaining = MAX_RESPONSE_BYTES - body.len();
            if chunk.len() >= remaining {
                body.extend_from_slice(&chunk[..remaining]);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(HttpToolResult {
            status: status.as_u16(),
            status_text: format!(
                "{} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or_default()
            )
            .trim_end()
            .to_string(),
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

async fn handle_list(State(server): State<Arc<HttpToolServer>>) -> Json<ToolList> {
    Json(ToolList {
        tools: server.definitions(),
    })
}

async fn handle_call(State(server): State<Arc<HttpToolServer>>, body: String) -> Response {
    let request: ToolCallRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err),
    };

    let Some(tool) = server.lookup(&request.name) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("tool {:?} not found", request.name),
        );
    };

    let target = match required_string(&request.arguments, "url") {
        Ok(target) => target,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err),
    };

    let start = std::time::Instant::now();
    let result = match server
        .execute(&tool.method, &target, &request.arguments)
        .await
    {
        Ok(result) => result,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, format!("{err:#}")),
    };

    tracing::info!(
        tool = %request.name,
        method = %tool.method,
        url = %target,
        status = result.status,
        duration_ms = start.elapsed().as_millis() as u64,
        "tool invocation complete"
    );

    (
        StatusCode::OK,
        Json(json!({
            "tool": request.name,
            "result": result,
        })),
    )
        .into_response()
}

fn make_definition(method: &Method) -> ToolDefinition {
    ToolDefinition {
        name: format!("http_{}", method.as_str().to_lowercase()),
        description: format!("Performs an HTTP {method} request to a target URL."),
        parameters: json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Fully qualified URL to request.",
                },
                "headers": {
                    "type": "object",
                    "description": "Optional HTTP headers.",
                    "additionalProperties": {"type": "string"},
                },
                "body": {
                    "type": "string",
                    "description": "Optional request body (ignored for GET/DELETE).",
                },
            },
            "required": ["url"],
        }),
    }
}

fn required_string(args: &Value, key: &str) -> Result<String, String> {
    match args.get(key).and_then(Value::as_str) {
        Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
        Some(_) => Err(format!("{key} must be a non-empty string")),
        None => Err(format!("missing {key}")),
    }
}

fn optional_string(args: &Value, key: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn string_map(args: &Value, key: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    if let Some(map) = args.get(key).and_then(Value::as_object) {
        for (k, v) in map {
            if let Some(value) = v.as_str() {
                result.insert(k.clone(), value.to_string());
            }
        }
    }
    result
}
