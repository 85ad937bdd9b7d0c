// External chat API
//
// The OpenAI-compatible face of the orchestrator: GET /v1/models,
// POST /v1/chat/completions, GET /v1/tools. Mediator error kinds map to
// HTTP statuses; bodies use the OpenAI error envelope with the status
// text as the error type.

pub mod types;

pub use types::*;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::mediator::{ChatError, Mediator};

/// Owner label reported by GET /v1/models.
pub const OWNED_BY: &str = "go-agent";

/// Guard against oversized foreign payloads; generous for chat requests.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Clone)]
struct ApiState {
    mediator: Arc<Mediator>,
}

/// Build the orchestrator's public router.
pub fn router(mediator: Arc<Mediator>) -> Router {
    Router::new()
        .route("/v1/models", get(handle_models))
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/tools", get(handle_tools))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(ApiState { mediator })
}

/// Serve the router until the token is cancelled.
pub async fn serve(
    addr: SocketAddr,
    mediator: Arc<Mediator>,
    cancel: CancellationToken,
) -> Result<()> {
    let app = router(mediator);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, "chat API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("serve chat API")?;
    Ok(())
}

async fn handle_models(State(state): State<ApiState>) -> Json<ModelsResponse> {
    let data = state
        .mediator
        .supported_models()
        .into_iter()
        .map(|id| ModelDescriptor {
            id,
            object: "model".to_string(),
            owned_by: OWNED_BY.to_string(),
        })
        .collect();
    Json(ModelsResponse {
        object: "list".to_string(),
        data,
    })
}

async fn handle_chat_completions(State(state): State<ApiState>, body: String) -> Response {
    let request: ChatCompletionRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err),
    };

    match state.mediator.handle_chat(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => {
            let status = status_for(&err);
            if status.is_server_error() {
                tracing::error!(error = %err, "chat turn failed");
            }
            error_response(status, &err)
        }
    }
}

async fn handle_tools(State(state): State<ApiState>) -> Response {
    match state.mediator.list_tools().await {
        Ok(tools) => (
            StatusCode::OK,
            Json(ToolsResponse {
                object: "list".to_string(),
                data: tools,
            }),
        )
            .into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err),
    }
}

fn status_for(err: &ChatError) -> StatusCode {
    match err {
        ChatError::UnsupportedModel(_) => StatusCode::NOT_FOUND,
        ChatError::StreamingUnsupported | ChatError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, err: &dyn std::fmt::Display) -> Response {
    let body = ErrorResponse {
        error: ErrorDetails {
            message: err.to_string(),
            error_type: status.canonical_reason().unwrap_or("Unknown").to_string(),
        },
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&ChatError::UnsupportedModel("other".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&ChatError::StreamingUnsupported),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ChatError::InvalidRequest("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ChatError::Upstream("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&ChatError::ToolCallFailed {
                name: "f".into(),
                reason: "x".into()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
