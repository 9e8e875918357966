//! End-to-end tests for the relaymind runtime.
//!
//! These tests wire the full stack from a TOML config: command catalog, agent
//! directory, orchestrator, chains and the HTTP router, with a scripted
//! provider standing in for the model.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{HeaderValue, Request as HttpRequest, StatusCode};
use http_body_util::BodyExt;
use relaymind_config::AppConfig;
use relaymind_core::error::ProviderError;
use relaymind_core::event::DomainEvent;
use relaymind_core::provider::{
    Provider, ProviderRequest, ProviderResponse, StreamChunk, TokenStream,
};
use tokio::sync::mpsc;
use tower::ServiceExt;

// ── Mock Provider ────────────────────────────────────────────────────────

/// Replays one scripted response per `stream` call.
struct ScriptedProvider {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn system_prompt_of_call(&self, n: usize) -> String {
        self.requests.lock().unwrap()[n].messages[0].text()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("e2e mock only streams".into()))
    }

    async fn stream(&self, request: ProviderRequest) -> Result<TokenStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedProvider exhausted"));
        let (tx, rx) = mpsc::channel(4);
        // Split mid-tag to exercise the streaming parser across chunks
        let cut = response.len() / 2;
        let cut = (cut..response.len())
            .find(|i| response.is_char_boundary(*i))
            .unwrap_or(response.len());
        tx.send(Ok(StreamChunk::delta(&response[..cut]))).await.unwrap();
        tx.send(Ok(StreamChunk::delta(&response[cut..]))).await.unwrap();
        tx.send(Ok(StreamChunk::finished(None))).await.unwrap();
        Ok(rx)
    }
}

const CONFIG: &str = r#"
temperature = 0.3

[models]
default = "mini"
advanced = "large"

[memory]
snippets = ["Invoices are totalled in euros."]

[[agents]]
id = "accountant"
name = "Accountant"
persona = "You keep the books."
enabled_commands = ["Calculate"]

[[chains]]
name = "total"
description = "Compute then phrase a total"

[[chains.steps]]
type = "command"
command = "Calculate"
arguments = { expression = "{input}" }

[[chains.steps]]
type = "prompt"
prompt = "State the total {previous}"
"#;

fn config(workspace: &std::path::Path) -> AppConfig {
    let mut config: AppConfig = toml::from_str(CONFIG).unwrap();
    config.validate().unwrap();
    config.workspace_dir = Some(workspace.to_path_buf());
    config
}

fn app(config: &AppConfig, provider: Arc<ScriptedProvider>) -> (axum::Router, relaymind_gateway::SharedApiState) {
    let state = relaymind_gateway::build_state(config, provider);
    let router = relaymind_gateway::build_router(
        state.clone(),
        HeaderValue::from_static("http://localhost:7410"),
    );
    (router, state)
}

fn post(uri: &str, body: serde_json::Value) -> HttpRequest<Body> {
    HttpRequest::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-owner-id", "e2e")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_chat_executes_local_command_then_answers() {
    let workspace = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(&[
        r#"<execute>{"name": "Calculate", "arguments": {"expression": "12 * 3"}}</execute>"#,
        "<answer>The invoice total is 36 euros.</answer>",
    ]);
    let (router, state) = app(&config(workspace.path()), provider.clone());
    let mut events = state.event_bus.subscribe();

    let response = router
        .oneshot(post(
            "/v1/chat",
            serde_json::json!({"agent_id": "accountant", "message": "What do the invoices add up to?"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let summary = json_body(response).await;
    assert_eq!(summary["outcome"], "completed");
    assert_eq!(summary["commands_executed"], 1);
    assert_eq!(summary["answer"], "The invoice total is 36 euros.");
    let outputs: Vec<&str> = summary["activities"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|a| a["kind"] == "output")
        .filter_map(|a| a["content"].as_str())
        .collect();
    assert!(outputs.iter().any(|o| o.contains("36")));

    assert_eq!(provider.calls(), 2);
    let system = provider.system_prompt_of_call(0);
    assert!(system.contains("You keep the books."));
    assert!(system.contains("Invoices are totalled in euros."));

    let mut executed = false;
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::CommandExecuted { command, success, .. } = event.as_ref() {
            assert_eq!(command, "Calculate");
            assert!(*success);
            executed = true;
        }
    }
    assert!(executed);
}

#[tokio::test]
async fn e2e_agent_overlay_hides_other_commands() {
    let workspace = tempfile::tempdir().unwrap();
    std::fs::write(workspace.path().join("ledger.txt"), "secret").unwrap();
    let provider = ScriptedProvider::new(&[
        "<execute><name>Read File</name><path>ledger.txt</path></execute>",
        "<answer>I cannot read files.</answer>",
    ]);
    let (router, _state) = app(&config(workspace.path()), provider.clone());

    let response = router
        .clone()
        .oneshot(post(
            "/v1/chat",
            serde_json::json!({"agent_id": "accountant", "message": "Show the ledger"}),
        ))
        .await
        .unwrap();
    let summary = json_body(response).await;
    assert_eq!(summary["outcome"], "completed");
    let text = summary["activities"].to_string();
    assert!(text.contains("Command not found: Read File"));
    assert!(!text.contains("secret"));

    let response = router
        .oneshot(
            HttpRequest::builder()
                .uri("/v1/commands?agent=accountant")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let list = json_body(response).await;
    assert_eq!(list["count"], 1);
}

#[tokio::test]
async fn e2e_chain_feeds_command_output_into_prompt() {
    let workspace = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(&["<answer>Total: 42</answer>"]);
    let (router, _state) = app(&config(workspace.path()), provider.clone());

    let response = router
        .oneshot(post(
            "/v1/chains/total/run",
            serde_json::json!({"input": "40 + 2", "agent_id": "accountant"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let run = json_body(response).await;
    assert_eq!(run["output"], "Total: 42");
    assert_eq!(run["steps"].as_array().unwrap().len(), 2);
    assert_eq!(run["steps"][0]["output"], "42");

    let requests = provider.requests.lock().unwrap();
    let last_user = requests[0].messages.last().unwrap().text();
    assert_eq!(last_user, "State the total 42");
}

#[tokio::test]
async fn e2e_health_and_complexity() {
    let workspace = tempfile::tempdir().unwrap();
    let (router, _state) = app(&config(workspace.path()), ScriptedProvider::new(&[]));

    let response = router
        .clone()
        .oneshot(HttpRequest::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(post(
            "/v1/complexity",
            serde_json::json!({"text": "Write a Python function to compute the integral of a polynomial, then deploy it with docker"}),
        ))
        .await
        .unwrap();
    let score = json_body(response).await;
    assert_eq!(score["tier"], "HIGH");
}

#[test]
fn e2e_config_rejects_duplicate_agents() {
    let toml = r#"
[[agents]]
id = "a"

[[agents]]
id = "a"
"#;
    let config: AppConfig = toml::from_str(toml).unwrap();
    assert!(config.validate().is_err());
}
