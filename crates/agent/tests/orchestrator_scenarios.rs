//! End-to-end orchestration scenarios against scripted providers.
//!
//! Covers the tier scenarios, local and remote command dispatch, the
//! registry's leak-freedom and stop-all behavior, and mid-stream cancellation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relaymind_agent::{
    ActivityKind, AgentStreamEvent, ConversationHandle, Orchestrator, OrchestratorSettings,
    Outcome, RemoteResult, Tier,
};
use relaymind_core::command::{CommandRegistry, ParamSpec, ParamType, RemoteToolDescriptor};
use relaymind_core::error::ProviderError;
use relaymind_core::message::{Request, Role};
use relaymind_core::provider::{
    Provider, ProviderRequest, ProviderResponse, StreamChunk, TokenStream,
};
use relaymind_tools::FilesModule;
use tokio::sync::mpsc;

// ── Mock providers ───────────────────────────────────────────────────────

/// Replays one scripted list of deltas per `stream` call.
struct ScriptedProvider {
    scripts: Mutex<VecDeque<Vec<String>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(scripts: &[&[&str]]) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(
                scripts
                    .iter()
                    .map(|s| s.iter().map(|d| d.to_string()).collect())
                    .collect(),
            ),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The working transcript replayed to the model on call `n`.
    fn transcript_of_call(&self, n: usize) -> String {
        self.requests.lock().unwrap()[n]
            .messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.text())
            .collect()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("scripted provider only streams".into()))
    }

    async fn stream(&self, request: ProviderRequest) -> Result<TokenStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedProvider exhausted"));
        let (tx, rx) = mpsc::channel(script.len() + 1);
        for delta in script {
            tx.send(Ok(StreamChunk::delta(delta))).await.unwrap();
        }
        tx.send(Ok(StreamChunk::finished(None))).await.unwrap();
        Ok(rx)
    }
}

/// Always adds one thinking step and then tries to answer.
struct EagerProvider;

#[async_trait]
impl Provider for EagerProvider {
    fn name(&self) -> &str {
        "eager"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            content: "<answer>reviewed</answer>".into(),
            usage: None,
            model: request.model,
        })
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<TokenStream, ProviderError> {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(StreamChunk::delta("<thinking>one more step</thinking>")))
            .await
            .unwrap();
        tx.send(Ok(StreamChunk::delta("<answer>done</answer>")))
            .await
            .unwrap();
        tx.send(Ok(StreamChunk::finished(None))).await.unwrap();
        Ok(rx)
    }
}

/// Opens an answer and then drips a word every 10ms until the reader goes away.
struct DripProvider;

#[async_trait]
impl Provider for DripProvider {
    fn name(&self) -> &str {
        "drip"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("drip provider only streams".into()))
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<TokenStream, ProviderError> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            if tx.send(Ok(StreamChunk::delta("<answer>"))).await.is_err() {
                return;
            }
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if tx.send(Ok(StreamChunk::delta("tick "))).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

const MEDIUM_FILE_SEARCH: &str = "Search the files in my repo for the deploy script, then show me how to run it in bash, or something like that";
const HIGH_CODE_TASK: &str =
    "Write a Python function to compute the integral of a polynomial, then deploy it with docker";

fn empty_registry() -> Arc<CommandRegistry> {
    Arc::new(CommandRegistry::new(vec![]))
}

async fn drain(handle: &mut ConversationHandle) -> Vec<AgentStreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = handle.events.recv().await {
        events.push(event);
    }
    events
}

fn answer_of(events: &[AgentStreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            AgentStreamEvent::TextDelta { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

fn done_of(events: &[AgentStreamEvent]) -> (Outcome, usize, usize) {
    match events.last() {
        Some(AgentStreamEvent::Done {
            outcome,
            reasoning_steps,
            commands_executed,
            ..
        }) => (*outcome, *reasoning_steps, *commands_executed),
        other => panic!("expected done as the last event, got {other:?}"),
    }
}

fn activities(events: &[AgentStreamEvent], wanted: ActivityKind) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            AgentStreamEvent::Activity { kind, content, .. } if *kind == wanted => {
                Some(content.clone())
            }
            _ => None,
        })
        .collect()
}

fn system_info_tool() -> RemoteToolDescriptor {
    RemoteToolDescriptor {
        name: "get_system_info".into(),
        description: "Report the device's operating system".into(),
        parameters: vec![ParamSpec::optional(
            "detail",
            ParamType::String,
            "brief or full",
        )],
    }
}

// ── Tier scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn low_tier_answers_in_a_single_pass() {
    let provider = ScriptedProvider::new(&[&["<answer>", "4", "</answer>"]]);
    let orch = Arc::new(Orchestrator::new(provider.clone(), empty_registry()));

    let mut handle = orch
        .start(Request::single("default", "What is 2+2?"), "alice")
        .unwrap();
    assert_eq!(handle.score.tier, Tier::Low);
    assert_eq!(handle.score.min_steps, 0);

    let events = drain(&mut handle).await;
    assert_eq!(answer_of(&events), "4");
    assert!(activities(&events, ActivityKind::Execution).is_empty());
    assert_eq!(done_of(&events), (Outcome::Completed, 0, 0));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn medium_tier_file_search_reasons_executes_then_answers() {
    let workspace = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(workspace.path().join("scripts")).unwrap();
    std::fs::write(workspace.path().join("scripts/deploy.sh"), "echo shipping\n").unwrap();

    let provider = ScriptedProvider::new(&[
        &[
            "<thinking>The user wants the deploy script.</thinking>",
            "<thinking>I should search the workspace.</thinking>",
            "<reflection>Searching for 'deploy' is enough.</reflection>",
            "<execute><name>Search Files</name><query>deploy</query></execute>",
        ],
        &["<answer>Run it with: bash scripts/deploy.sh</answer>"],
    ]);
    let registry = Arc::new(CommandRegistry::new(vec![Arc::new(FilesModule)]));
    let orch = Arc::new(
        Orchestrator::new(provider.clone(), registry).with_workspace(workspace.path()),
    );

    let mut handle = orch
        .start(Request::single("default", MEDIUM_FILE_SEARCH), "alice")
        .unwrap();
    assert_eq!(handle.score.tier, Tier::Medium);
    assert_eq!(handle.score.min_steps, 3);

    let events = drain(&mut handle).await;
    let (outcome, steps, commands) = done_of(&events);
    assert_eq!(outcome, Outcome::Completed);
    assert!(steps >= 3);
    assert_eq!(commands, 1);

    let executions = activities(&events, ActivityKind::Execution);
    assert_eq!(executions.len(), 1);
    assert!(executions[0].starts_with("Search Files"));
    let outputs = activities(&events, ActivityKind::Output);
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].contains("scripts/deploy.sh"));

    let transcript = provider.transcript_of_call(1);
    assert!(transcript.contains("<execute>"));
    assert!(transcript.contains("<output>"));
    assert!(transcript.contains("deploy.sh"));
    assert_eq!(answer_of(&events), "Run it with: bash scripts/deploy.sh");
}

#[tokio::test]
async fn reasoning_budget_holds_before_any_answer() {
    for (text, tier) in [(MEDIUM_FILE_SEARCH, Tier::Medium), (HIGH_CODE_TASK, Tier::High)] {
        let settings = OrchestratorSettings {
            max_interventions: 20,
            ..OrchestratorSettings::default()
        };
        let orch = Arc::new(
            Orchestrator::new(Arc::new(EagerProvider), empty_registry()).with_settings(settings),
        );
        let mut handle = orch.start(Request::single("default", text), "alice").unwrap();
        assert_eq!(handle.score.tier, tier);
        let min_steps = handle.score.min_steps;

        let events = drain(&mut handle).await;
        let first_answer = events
            .iter()
            .position(|e| matches!(e, AgentStreamEvent::TextDelta { .. }))
            .expect("an answer is eventually accepted");
        let steps_before: std::collections::HashSet<usize> = events[..first_answer]
            .iter()
            .filter_map(|e| match e {
                AgentStreamEvent::Activity {
                    kind: ActivityKind::Thinking,
                    step: Some(step),
                    ..
                } => Some(*step),
                _ => None,
            })
            .collect();
        assert!(
            steps_before.len() >= min_steps,
            "{tier}: {} steps before answer, {min_steps} required",
            steps_before.len()
        );
        let interventions = activities(&events, ActivityKind::Intervention).len();
        assert_eq!(interventions, min_steps - 1);
        let (outcome, steps, _) = done_of(&events);
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(steps, min_steps);
    }
}

// ── Remote tools ─────────────────────────────────────────────────────────

#[tokio::test]
async fn remote_tool_result_resumes_orchestration() {
    let provider = ScriptedProvider::new(&[
        &["<execute><name>get_system_info</name><detail>full</detail></execute>"],
        &["<answer>You are running Linux.</answer>"],
    ]);
    let orch = Arc::new(Orchestrator::new(provider.clone(), empty_registry()));
    let mut request = Request::single("default", "Which OS am I on?");
    request.remote_tools = vec![system_info_tool()];
    let mut handle = orch.start(request, "alice").unwrap();
    let conversation_id = handle.conversation_id.clone();

    let request_id = loop {
        match handle.events.recv().await.expect("stream ended early") {
            AgentStreamEvent::RemoteCommandRequest {
                request_id,
                conversation_id: conv,
                tool,
                arguments,
            } => {
                assert_eq!(conv, conversation_id);
                assert_eq!(tool, "get_system_info");
                assert_eq!(arguments, serde_json::json!({"detail": "full"}));
                break request_id;
            }
            AgentStreamEvent::TextDelta { .. } | AgentStreamEvent::Done { .. } => {
                panic!("answered before the remote tool ran")
            }
            _ => {}
        }
    };
    match handle.events.recv().await {
        Some(AgentStreamEvent::RemoteCommandPending {
            request_id: pending,
            tool,
            timeout_secs,
        }) => {
            assert_eq!(pending, request_id);
            assert_eq!(tool, "get_system_info");
            assert_eq!(timeout_secs, 120);
        }
        other => panic!("expected remote-command-pending, got {other:?}"),
    }
    assert!(orch.bridge().is_pending(&request_id));

    assert!(!orch.submit_remote_result("someone-else", &request_id, RemoteResult::ok("x")));
    assert!(orch.submit_remote_result(
        &conversation_id,
        &request_id,
        RemoteResult::ok("Linux 6.8 x86_64")
    ));
    assert!(!orch.submit_remote_result(&conversation_id, &request_id, RemoteResult::ok("again")));

    let rest = drain(&mut handle).await;
    assert_eq!(answer_of(&rest), "You are running Linux.");
    assert_eq!(done_of(&rest).0, Outcome::Completed);
    assert!(provider
        .transcript_of_call(1)
        .contains("<output>Linux 6.8 x86_64</output>"));
    assert_eq!(orch.bridge().pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn unanswered_remote_tool_times_out_into_the_transcript() {
    let provider = ScriptedProvider::new(&[
        &["<execute><name>get_system_info</name></execute>"],
        &["<answer>I could not reach your device.</answer>"],
    ]);
    let settings = OrchestratorSettings {
        remote_timeout: Duration::from_secs(5),
        ..OrchestratorSettings::default()
    };
    let orch = Arc::new(
        Orchestrator::new(provider.clone(), empty_registry()).with_settings(settings),
    );
    let mut request = Request::single("default", "Which OS am I on?");
    request.remote_tools = vec![system_info_tool()];
    let mut handle = orch.start(request, "alice").unwrap();

    let events = drain(&mut handle).await;
    let kinds: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
    let requested = kinds.iter().position(|k| *k == "remote-command-request").unwrap();
    assert_eq!(kinds[requested + 1], "remote-command-pending");

    let outputs = activities(&events, ActivityKind::Output);
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].contains("did not respond within 5s"));
    assert!(provider
        .transcript_of_call(1)
        .contains("did not respond within 5s"));
    assert_eq!(answer_of(&events), "I could not reach your device.");
    assert_eq!(done_of(&events).0, Outcome::Completed);
    assert_eq!(orch.bridge().pending_count(), 0);
}

async fn next_remote_request(handle: &mut ConversationHandle) -> String {
    loop {
        match handle.events.recv().await.expect("stream ended early") {
            AgentStreamEvent::RemoteCommandRequest { request_id, .. } => return request_id,
            AgentStreamEvent::Done { .. } => panic!("finished before the remote tool ran"),
            _ => {}
        }
    }
}

#[tokio::test]
async fn restarted_conversation_keeps_its_remote_call_when_old_task_unwinds() {
    let provider = ScriptedProvider::new(&[
        &["<execute><name>get_system_info</name></execute>"],
        &["<execute><name>get_system_info</name></execute>"],
        &["<answer>Linux it is.</answer>"],
    ]);
    let orch = Arc::new(Orchestrator::new(provider, empty_registry()));
    let mut request = Request::single("default", "Which OS am I on?");
    request.conversation_id = Some("conv-1".into());
    request.remote_tools = vec![system_info_tool()];

    let mut old = orch.start(request.clone(), "alice").unwrap();
    let old_request = next_remote_request(&mut old).await;
    assert!(orch.stop("conv-1"));
    assert!(!orch.bridge().is_pending(&old_request));

    let mut new = orch.start(request, "alice").unwrap();
    let new_request = next_remote_request(&mut new).await;
    assert_eq!(done_of(&drain(&mut old).await).0, Outcome::Cancelled);

    assert!(orch.bridge().is_pending(&new_request));
    assert!(orch.submit_remote_result("conv-1", &new_request, RemoteResult::ok("Linux")));
    let rest = drain(&mut new).await;
    assert_eq!(answer_of(&rest), "Linux it is.");
    assert_eq!(done_of(&rest).0, Outcome::Completed);
    assert_eq!(orch.bridge().pending_count(), 0);
}

// ── Registry and cancellation ────────────────────────────────────────────

#[tokio::test]
async fn stop_all_cancels_every_conversation_of_the_owner() {
    let orch = Arc::new(Orchestrator::new(Arc::new(DripProvider), empty_registry()));
    let mut handles: Vec<ConversationHandle> = (0..3)
        .map(|i| {
            orch.start(Request::single("default", format!("question {i}")), "alice")
                .unwrap()
        })
        .collect();
    let mut bobs = orch.start(Request::single("default", "mine"), "bob").unwrap();

    assert_eq!(orch.active("alice").len(), 3);
    assert_eq!(orch.stop_all("alice"), 3);
    assert!(orch.active("alice").is_empty());
    assert_eq!(orch.active("bob").len(), 1);

    for handle in &mut handles {
        let events = drain(handle).await;
        assert_eq!(done_of(&events).0, Outcome::Cancelled);
    }

    assert!(orch.stop(&bobs.conversation_id));
    assert_eq!(done_of(&drain(&mut bobs).await).0, Outcome::Cancelled);
    assert!(orch.conversations().is_empty());
}

#[tokio::test]
async fn stopping_mid_stream_halts_output() {
    let settings = OrchestratorSettings {
        event_buffer: 1,
        ..OrchestratorSettings::default()
    };
    let orch = Arc::new(
        Orchestrator::new(Arc::new(DripProvider), empty_registry()).with_settings(settings),
    );
    let mut handle = orch.start(Request::single("default", "hi"), "alice").unwrap();

    let mut deltas = 0;
    while deltas < 3 {
        if let Some(AgentStreamEvent::TextDelta { .. }) = handle.events.recv().await {
            deltas += 1;
        }
    }
    assert!(orch.stop(&handle.conversation_id));
    assert!(!orch.conversations().contains(&handle.conversation_id));

    let rest = drain(&mut handle).await;
    let late_deltas = rest
        .iter()
        .filter(|e| matches!(e, AgentStreamEvent::TextDelta { .. }))
        .count();
    assert!(late_deltas <= 1, "{late_deltas} deltas after stop");
    assert_eq!(done_of(&rest).0, Outcome::Cancelled);
}

#[tokio::test]
async fn registry_is_empty_after_every_terminal_state() {
    let completed = ScriptedProvider::new(&[&["<answer>ok</answer>"]]);
    let failed = ScriptedProvider::new(&[]);

    let orch = Arc::new(Orchestrator::new(completed, empty_registry()));
    let mut handle = orch.start(Request::single("default", "hi"), "alice").unwrap();
    let id = handle.conversation_id.clone();
    let events = drain(&mut handle).await;
    assert_eq!(done_of(&events).0, Outcome::Completed);
    assert!(orch.conversations().get(&id).is_none());

    let orch = Arc::new(Orchestrator::new(failed, empty_registry()));
    let mut handle = orch.start(Request::single("default", "hi"), "alice").unwrap();
    let id = handle.conversation_id.clone();
    let events = drain(&mut handle).await;
    assert_eq!(done_of(&events).0, Outcome::Failed);
    assert!(orch.conversations().get(&id).is_none());

    let orch = Arc::new(Orchestrator::new(Arc::new(DripProvider), empty_registry()));
    let mut handle = orch.start(Request::single("default", "hi"), "alice").unwrap();
    let id = handle.conversation_id.clone();
    handle.events.recv().await;
    orch.stop(&id);
    let events = drain(&mut handle).await;
    assert_eq!(done_of(&events).0, Outcome::Cancelled);
    assert!(orch.conversations().get(&id).is_none());
}

#[tokio::test]
async fn conversation_can_be_reused_after_it_finishes() {
    let provider = ScriptedProvider::new(&[&["<answer>one</answer>"], &["<answer>two</answer>"]]);
    let orch = Arc::new(Orchestrator::new(provider, empty_registry()));
    let mut request = Request::single("default", "hi");
    request.conversation_id = Some("conv-1".into());

    let first = orch.start(request.clone(), "alice").unwrap().collect().await;
    assert_eq!(first.answer, "one");
    let second = orch.start(request, "alice").unwrap().collect().await;
    assert_eq!(second.answer, "two");
    assert_eq!(second.conversation_id, "conv-1");
}
