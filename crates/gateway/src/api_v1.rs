//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `POST /v1/chat`                                 - run a request; SSE when `stream` is true, else a JSON summary
//! - `GET  /v1/ws`                                   - WebSocket: chat, remote results and stop on one connection
//! - `POST /v1/conversations/{id}/remote-results`    - deliver a remote tool result
//! - `POST /v1/conversations/{id}/stop`              - stop one conversation
//! - `POST /v1/conversations/stop-all`               - stop every conversation of the owner
//! - `GET  /v1/conversations/active`                 - list the owner's running conversations
//! - `GET  /v1/commands?agent=`                      - commands enabled for an agent
//! - `POST /v1/complexity`                           - score a text without running it
//! - `GET  /v1/chains`                               - configured chains
//! - `POST /v1/chains/{name}/run`                    - run a chain
//! - `GET  /v1/logs`                                 - SSE stream of domain events
//! - `GET  /v1/status`                               - uptime and load

use axum::{
    Router,
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tracing::{debug, info, warn};

use relaymind_agent::{
    ChainError, ComplexityScore, ConversationHandle, ConversationTask,
    OrchestratorError, RemoteResult,
};
use relaymind_core::command::{CommandDescriptor, RemoteToolDescriptor};
use relaymind_core::error::RegistryError;
use relaymind_core::event::DomainEvent;
use relaymind_core::message::{Message, Request};

use crate::{SharedApiState, owner_of};

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/ws", get(ws_handler))
        .route("/conversations/active", get(active_handler))
        .route("/conversations/stop-all", post(stop_all_handler))
        .route("/conversations/{id}/stop", post(stop_handler))
        .route(
            "/conversations/{id}/remote-results",
            post(remote_result_handler),
        )
        .route("/commands", get(commands_handler))
        .route("/complexity", post(complexity_handler))
        .route("/chains", get(list_chains_handler))
        .route("/chains/{name}/run", post(run_chain_handler))
        .route("/logs", get(log_stream_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Single user turn; appended after `messages` when both are given
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default = "default_agent")]
    pub agent_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub remote_tools: Vec<RemoteToolDescriptor>,
}

fn default_agent() -> String {
    "default".into()
}

impl ChatRequest {
    fn into_request(self) -> Result<Request, String> {
        let mut messages = self.messages;
        if let Some(text) = self.message {
            messages.push(Message::user(text));
        }
        if messages.is_empty() {
            return Err("request has no messages".into());
        }
        Ok(Request {
            messages,
            agent_id: self.agent_id,
            conversation_id: self.conversation_id,
            stream: self.stream,
            remote_tools: self.remote_tools,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into() }))
}

fn orchestrator_error(e: OrchestratorError) -> ApiError {
    match e {
        OrchestratorError::Registry(RegistryError::AlreadyActive(_)) => {
            api_error(StatusCode::CONFLICT, e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct RemoteResultRequest {
    request_id: String,
    #[serde(flatten)]
    result: RemoteResult,
}

#[derive(Debug, Serialize, Deserialize)]
struct AcceptedResponse {
    accepted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct StopResponse {
    conversation_id: String,
    stopped: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct StopAllResponse {
    owner: String,
    stopped: usize,
}

#[derive(Debug, Serialize)]
struct ActiveResponse {
    owner: String,
    count: usize,
    conversations: Vec<ConversationTask>,
}

#[derive(Debug, Deserialize)]
struct CommandsQuery {
    #[serde(default = "default_agent")]
    agent: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CommandListResponse {
    agent: String,
    count: usize,
    commands: Vec<CommandDescriptor>,
}

#[derive(Debug, Deserialize)]
struct ComplexityRequest {
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChainDto {
    name: String,
    description: String,
    steps: usize,
}

#[derive(Debug, Deserialize)]
struct RunChainRequest {
    #[serde(default)]
    input: String,
    #[serde(default = "default_agent")]
    agent_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StatusResponse {
    version: String,
    uptime_secs: i64,
    active_conversations: usize,
    pending_remote_calls: usize,
}

// ── Chat ──────────────────────────────────────────────────────────────────

/// `POST /v1/chat`
async fn chat_handler(
    State(state): State<SharedApiState>,
    headers: HeaderMap,
    Json(payload): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let owner = owner_of(&headers);
    let stream = payload.stream;
    let request = payload
        .into_request()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
    info!(owner = %owner, agent = %request.agent_id, stream, "v1/chat request");

    let handle = state
        .orchestrator
        .start(request, &owner)
        .map_err(orchestrator_error)?;

    if stream {
        Ok(sse_response(handle).into_response())
    } else {
        Ok(Json(handle.collect().await).into_response())
    }
}

fn sse_response(
    handle: ConversationHandle,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = ReceiverStream::new(handle.events).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event.event_type()).data(data))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ── WebSocket ─────────────────────────────────────────────────────────────

/// `GET /v1/ws`: one connection for events and control.
///
/// Client frames:
/// - `{ "type": "chat", ...ChatRequest }`
/// - `{ "type": "remote-result", "conversation_id", "request_id", "output", "success", "data" }`
/// - `{ "type": "stop", "conversation_id" }`
///
/// Server frames are `AgentStreamEvent`s of every conversation started on
/// the socket, plus `rejected` / `stopped` notices.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<SharedApiState>,
) -> impl IntoResponse {
    let owner = owner_of(&headers);
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, owner))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum WsClientMessage {
    Chat(ChatRequest),
    RemoteResult {
        conversation_id: String,
        request_id: String,
        #[serde(flatten)]
        result: RemoteResult,
    },
    Stop {
        conversation_id: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum WsNotice {
    Rejected { reason: String },
    Stopped { conversation_id: String, stopped: bool },
}

async fn handle_ws_connection(mut socket: WebSocket, state: SharedApiState, owner: String) {
    info!(owner = %owner, "WebSocket connection established");
    let (outbound_tx, mut outbound) = mpsc::channel::<String>(64);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if socket.send(WsMessage::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                let text = match incoming {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                if let Some(notice) = handle_ws_message(&state, &owner, text.as_str(), &outbound_tx) {
                    let json = serde_json::to_string(&notice).unwrap_or_default();
                    if socket.send(WsMessage::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    // Forwarders notice the closed channel and drop their streams, which
    // cancels the conversations started on this socket.
    drop(outbound);
    info!(owner = %owner, "WebSocket connection closed");
}

fn handle_ws_message(
    state: &SharedApiState,
    owner: &str,
    text: &str,
    outbound: &mpsc::Sender<String>,
) -> Option<WsNotice> {
    let message: WsClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            return Some(WsNotice::Rejected {
                reason: format!("Invalid message: {e}"),
            });
        }
    };

    match message {
        WsClientMessage::Chat(chat) => {
            let request = match chat.into_request() {
                Ok(r) => r,
                Err(reason) => return Some(WsNotice::Rejected { reason }),
            };
            match state.orchestrator.start(request, owner) {
                Ok(handle) => {
                    tokio::spawn(forward_events(handle, outbound.clone()));
                    None
                }
                Err(e) => Some(WsNotice::Rejected {
                    reason: e.to_string(),
                }),
            }
        }
        WsClientMessage::RemoteResult {
            conversation_id,
            request_id,
            result,
        } => {
            if state
                .orchestrator
                .submit_remote_result(&conversation_id, &request_id, result)
            {
                None
            } else {
                Some(WsNotice::Rejected {
                    reason: format!("No pending remote call {request_id} for {conversation_id}"),
                })
            }
        }
        WsClientMessage::Stop { conversation_id } => {
            let stopped = state.orchestrator.stop(&conversation_id);
            Some(WsNotice::Stopped {
                conversation_id,
                stopped,
            })
        }
    }
}

async fn forward_events(mut handle: ConversationHandle, outbound: mpsc::Sender<String>) {
    while let Some(event) = handle.events.recv().await {
        let json = serde_json::to_string(&event).unwrap_or_default();
        if outbound.send(json).await.is_err() {
            debug!(conversation_id = %handle.conversation_id, "Socket gone, dropping event stream");
            return;
        }
    }
}

// ── Control surface ───────────────────────────────────────────────────────

/// `POST /v1/conversations/{id}/remote-results`
async fn remote_result_handler(
    State(state): State<SharedApiState>,
    Path(conversation_id): Path<String>,
    Json(payload): Json<RemoteResultRequest>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let accepted = state.orchestrator.submit_remote_result(
        &conversation_id,
        &payload.request_id,
        payload.result,
    );
    if accepted {
        Ok(Json(AcceptedResponse { accepted }))
    } else {
        warn!(conversation_id = %conversation_id, request_id = %payload.request_id, "Remote result for unknown call");
        Err(api_error(
            StatusCode::NOT_FOUND,
            format!(
                "No pending remote call {} for conversation {conversation_id}",
                payload.request_id
            ),
        ))
    }
}

/// `POST /v1/conversations/{id}/stop`
async fn stop_handler(
    State(state): State<SharedApiState>,
    Path(conversation_id): Path<String>,
) -> (StatusCode, Json<StopResponse>) {
    let stopped = state.orchestrator.stop(&conversation_id);
    let status = if stopped {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (
        status,
        Json(StopResponse {
            conversation_id,
            stopped,
        }),
    )
}

/// `POST /v1/conversations/stop-all`
async fn stop_all_handler(
    State(state): State<SharedApiState>,
    headers: HeaderMap,
) -> Json<StopAllResponse> {
    let owner = owner_of(&headers);
    let stopped = state.orchestrator.stop_all(&owner);
    info!(owner = %owner, stopped, "Stopped all conversations");
    Json(StopAllResponse { owner, stopped })
}

/// `GET /v1/conversations/active`
async fn active_handler(
    State(state): State<SharedApiState>,
    headers: HeaderMap,
) -> Json<ActiveResponse> {
    let owner = owner_of(&headers);
    let conversations = state.orchestrator.active(&owner);
    Json(ActiveResponse {
        owner,
        count: conversations.len(),
        conversations,
    })
}

// ── Catalog and analysis ──────────────────────────────────────────────────

/// `GET /v1/commands?agent=`
async fn commands_handler(
    State(state): State<SharedApiState>,
    Query(query): Query<CommandsQuery>,
) -> Json<CommandListResponse> {
    // Loading the profile applies its enablement overlay.
    if let Some(directory) = state.orchestrator.directory() {
        directory.get(&query.agent).await;
    }
    let commands = state
        .orchestrator
        .commands()
        .enabled_descriptors(&query.agent);
    Json(CommandListResponse {
        agent: query.agent,
        count: commands.len(),
        commands,
    })
}

/// `POST /v1/complexity`
async fn complexity_handler(
    State(state): State<SharedApiState>,
    Json(payload): Json<ComplexityRequest>,
) -> Json<ComplexityScore> {
    Json(state.orchestrator.analyzer().analyze_text(&payload.text))
}

// ── Chains ────────────────────────────────────────────────────────────────

/// `GET /v1/chains`
async fn list_chains_handler(State(state): State<SharedApiState>) -> Json<Vec<ChainDto>> {
    let chains = state
        .chains
        .names()
        .into_iter()
        .filter_map(|name| state.chains.get(name))
        .map(|c| ChainDto {
            name: c.name.clone(),
            description: c.description.clone(),
            steps: c.steps.len(),
        })
        .collect();
    Json(chains)
}

/// `POST /v1/chains/{name}/run`
async fn run_chain_handler(
    State(state): State<SharedApiState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<RunChainRequest>,
) -> Result<Json<relaymind_agent::ChainRun>, ApiError> {
    let owner = owner_of(&headers);
    state
        .chains
        .run(&name, &payload.input, &payload.agent_id, &owner)
        .await
        .map(Json)
        .map_err(|e| {
            let status = match &e {
                ChainError::NotFound(_) => StatusCode::NOT_FOUND,
                ChainError::RecursionLimitExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                ChainError::StepFailed { .. } => StatusCode::BAD_GATEWAY,
                ChainError::Orchestrator(_) => StatusCode::CONFLICT,
            };
            warn!(chain = %name, error = %e, "Chain run failed");
            api_error(status, e.to_string())
        })
}

// ── Observability ─────────────────────────────────────────────────────────

/// `GET /v1/logs`: SSE stream of domain events.
async fn log_stream_handler(
    State(state): State<SharedApiState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.event_bus.subscribe();
    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event| {
            let data = serde_json::to_string(event.as_ref()).unwrap_or_default();
            let event_name = match event.as_ref() {
                DomainEvent::ConversationStarted { .. } => "conversation_started",
                DomainEvent::ConversationFinished { .. } => "conversation_finished",
                DomainEvent::CommandExecuted { .. } => "command_executed",
                DomainEvent::RemoteCommandResolved { .. } => "remote_command_resolved",
                DomainEvent::InterventionInjected { .. } => "intervention_injected",
                DomainEvent::ErrorOccurred { .. } => "error_occurred",
            };
            Ok(SseEvent::default().event(event_name).data(data))
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `GET /v1/status`
async fn status_handler(State(state): State<SharedApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
        active_conversations: state.orchestrator.conversations().len(),
        pending_remote_calls: state.orchestrator.bridge().pending_count(),
    })
}
