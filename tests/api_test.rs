// Integration tests for the external chat API surface

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use loom::api;
use loom::discovery::{Registry, RegistryOptions};
use loom::mediator::{Mediator, MediatorOptions};
use loom::upstream::{
    ChatBackend, ChatMessage, Completion, CompletionChoice, CompletionRequest, Usage,
};

/// Replays a fixed list of completions.
struct ScriptedBackend {
    replies: Mutex<Vec<Completion>>,
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn complete(&self, _request: CompletionRequest) -> Result<Completion> {
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            anyhow::bail!("script exhausted");
        }
        Ok(replies.remove(0))
    }
}

fn hello_completion() -> Completion {
    Completion {
        id: "chatcmpl-s1".to_string(),
        object: "chat.completion".to_string(),
        created: 1700000000,
        model: "provider-model".to_string(),
        choices: vec![CompletionChoice {
            index: 0,
            message: ChatMessage::assistant("hello"),
            finish_reason: Some("stop".to_string()),
        }],
        usage: Usage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
        },
    }
}

/// Serve a fresh orchestrator API on an ephemeral port; returns its base
/// URL.
async fn spawn_api(replies: Vec<Completion>) -> String {
    let registry = Arc::new(Registry::new(RegistryOptions::default()));
    let mediator = Arc::new(
        Mediator::new(
            registry,
            MediatorOptions {
                model_name: "go-agent-1".to_string(),
                provider_model: "provider-model".to_string(),
                backend: Some(Arc::new(ScriptedBackend {
                    replies: Mutex::new(replies),
                })),
                ..Default::default()
            },
        )
        .unwrap(),
    );

    let app = api::router(mediator);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_chat_completion_without_tools() {
    let base = spawn_api(vec![hello_completion()]).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({
            "model": "go-agent-1",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "hello");
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["total_tokens"], 2);
    assert_eq!(body["model"], "go-agent-1");
}

#[tokio::test]
async fn test_unknown_model_is_404_not_found() {
    let base = spawn_api(vec![hello_completion()]).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({
            "model": "other",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "Not Found");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("model not supported"));
}

#[tokio::test]
async fn test_streaming_is_refused_with_400() {
    let base = spawn_api(vec![hello_completion()]).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({
            "model": "go-agent-1",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "Bad Request");
}

#[tokio::test]
async fn test_shape_validation_is_400() {
    let base = spawn_api(vec![]).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"model": "go-agent-1", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_malformed_body_is_400() {
    let base = spawn_api(vec![]).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_upstream_failure_is_500() {
    // Empty script: the backend errors on the first completion.
    let base = spawn_api(vec![]).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({
            "model": "go-agent-1",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "Internal Server Error");
}

#[tokio::test]
async fn test_models_endpoint_lists_the_exposed_model() {
    let base = spawn_api(vec![]).await;

    let response = reqwest::get(format!("{base}/v1/models")).await.unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["object"], "list");
    assert_eq!(body["data"][0]["id"], "go-agent-1");
    assert_eq!(body["data"][0]["object"], "model");
    assert_eq!(body["data"][0]["owned_by"], "go-agent");
}

#[tokio::test]
async fn test_tools_endpoint_empty_fabric() {
    let base = spawn_api(vec![]).await;

    let response = reqwest::get(format!("{base}/v1/tools")).await.unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["object"], "list");
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_responses_are_json() {
    let base = spawn_api(vec![hello_completion()]).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({
            "model": "go-agent-1",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("application/json"));
}
