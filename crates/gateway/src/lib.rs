//! HTTP gateway for relaymind.
//!
//! Carries the event protocol to callers (SSE for one-shot streams, a
//! WebSocket for the bidirectional "single connection" mode) and exposes the
//! inbound control surface: remote results, stop, stop-all, list-active.
//!
//! Built on Axum. Owner identity comes from the `X-Owner-Id` header.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderMap, HeaderValue, Method, header};
use axum::{Router, response::Json, routing::get};
use chrono::{DateTime, Utc};
use relaymind_agent::{
    AgentDirectory, ChainRunner, ConfigAgentStore, Orchestrator, OrchestratorSettings,
};
use relaymind_config::AppConfig;
use relaymind_core::command::Credentials;
use relaymind_core::event::EventBus;
use relaymind_core::memory::KeywordRecall;
use relaymind_core::provider::Provider;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

/// Header carrying the caller's owner identity.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Owner used when the header is absent.
pub const ANONYMOUS_OWNER: &str = "anonymous";

/// Shared state behind every route.
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub chains: Arc<ChainRunner>,
    pub event_bus: Arc<EventBus>,
    pub started_at: DateTime<Utc>,
}

pub type SharedApiState = Arc<ApiState>;

/// Owner identity of a request.
pub fn owner_of(headers: &HeaderMap) -> String {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_OWNER)
        .to_string()
}

/// Assemble the runtime from configuration around an already-built provider.
///
/// Builds the command catalog, the agent directory, keyword recall seeded
/// from `[memory]`, the event bus, the orchestrator and the chain runner.
pub fn build_state(config: &AppConfig, provider: Arc<dyn Provider>) -> SharedApiState {
    let commands = Arc::new(relaymind_tools::default_registry(Duration::from_secs(
        config.orchestrator.command_timeout_secs,
    )));
    let directory = Arc::new(AgentDirectory::new(
        Arc::new(ConfigAgentStore::new(&config.agents)),
        commands.clone(),
        Duration::from_secs(config.cache.agent_ttl_secs),
        config.cache.agent_capacity,
    ));

    let memory = KeywordRecall::new();
    for snippet in &config.memory.snippets {
        memory.remember(snippet.clone(), Some("config".into()));
    }

    let event_bus = Arc::new(EventBus::default());
    let orchestrator = Arc::new(
        Orchestrator::new(provider, commands)
            .with_settings(OrchestratorSettings::from_config(config))
            .with_directory(directory)
            .with_memory(Arc::new(memory))
            .with_events(event_bus.clone())
            .with_workspace(config.workspace())
            .with_credentials(Credentials::new(config.credentials.clone())),
    );
    let chains = Arc::new(ChainRunner::new(
        &config.chains,
        orchestrator.clone(),
        config.orchestrator.max_chain_depth,
    ));

    Arc::new(ApiState {
        orchestrator,
        chains,
        event_bus,
        started_at: Utc::now(),
    })
}

/// Build the full router: `/health` plus the v1 API under `/v1`.
///
/// Layers: 1 MB body limit, CORS restricted to the local web origin, and
/// HTTP trace logging.
pub fn build_router(state: SharedApiState, allowed_origin: HeaderValue) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::exact(allowed_origin))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static(OWNER_HEADER),
        ])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let router = relaymind_providers::router::build_from_config(&config);
    let provider = router.default().ok_or_else(|| {
        format!(
            "provider '{}' is not configured; set an API key",
            config.default_provider
        )
    })?;
    let state = build_state(&config, provider);

    let origin = HeaderValue::from_str(&format!("http://localhost:{}", config.gateway.port))?;
    let app = build_router(state, origin);

    info!(addr = %addr, "Gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> SharedApiState {
        let config = AppConfig::default();
        let provider = relaymind_providers::router::build_from_config(&config)
            .default()
            .expect("default provider is always registered");
        build_state(&config, provider)
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state(), HeaderValue::from_static("http://localhost:7410"));

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn owner_defaults_to_anonymous() {
        let mut headers = HeaderMap::new();
        assert_eq!(owner_of(&headers), "anonymous");
        headers.insert(OWNER_HEADER, HeaderValue::from_static("alice"));
        assert_eq!(owner_of(&headers), "alice");
        headers.insert(OWNER_HEADER, HeaderValue::from_static("  "));
        assert_eq!(owner_of(&headers), "anonymous");
    }

    #[test]
    fn state_seeds_catalog_and_chains() {
        let mut config = AppConfig::default();
        config.chains.push(relaymind_config::ChainConfig {
            name: "summarize".into(),
            description: String::new(),
            steps: vec![],
        });
        let provider = relaymind_providers::router::build_from_config(&config)
            .default()
            .unwrap();
        let state = build_state(&config, provider);
        assert_eq!(state.chains.names(), vec!["summarize"]);
        assert!(state.orchestrator.commands().catalog().names().contains(&"Search Files"));
    }
}
