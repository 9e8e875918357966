//! The stream orchestrator: drives one conversation from request to `done`.
//!
//! Each request runs as its own task registered in the
//! [`ConversationRegistry`]. Within a task everything is sequential: the
//! orchestrator pulls token deltas from the provider, feeds them through the
//! [`TagParser`], and reacts to tag events:
//!
//! - `thinking` / `reflection` content becomes `activity` events; each closed
//!   block is one reasoning step
//! - an `answer` or `execute` opened before the tier's step budget is met is
//!   abandoned and an intervention directive is injected; past
//!   `max_interventions` the run fails
//! - a complete `execute` block runs locally or on the caller's device; the
//!   result is appended to the working transcript inside `output` and the
//!   provider is re-invoked with the augmented context
//! - `answer` content streams as `text-delta` (HIGH tier buffers it for review),
//!   even when the answer is nested in a reasoning span; an `execute` inside an
//!   open answer is dropped and never run
//! - `speak` content feeds the speech side channel
//!
//! Cancellation is checked at every token, tag and await boundary. Every run
//! ends with exactly one `done` event.

use chrono::Utc;
use futures::FutureExt;
use relaymind_config::AppConfig;
use relaymind_core::coerce::coerce_arguments;
use relaymind_core::command::{
    CommandOutput, CommandRegistry, Credentials, ExecutionRequest, ExecutionResult,
    InjectedContext, RemoteToolDescriptor,
};
use relaymind_core::error::{CommandError, RegistryError};
use relaymind_core::event::{DomainEvent, EventBus};
use relaymind_core::memory::{MemoryRecall, Snippet};
use relaymind_core::message::{Message, Request};
use relaymind_core::provider::{Provider, ProviderRequest, Usage};
use relaymind_core::speech::SpeechSynthesizer;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bridge::{RemoteCommandBridge, RemoteResolution, RemoteResult};
use crate::complexity::{ComplexityAnalyzer, ComplexityScore, Tier};
use crate::conversations::{ConversationRegistry, ConversationTask, TaskGuard};
use crate::directory::{AgentDirectory, AgentProfile};
use crate::prompt;
use crate::speech::SpeechChannel;
use crate::stream_event::{ActivityKind, AgentStreamEvent, Outcome};
use crate::tags::{self, Tag, TagEvent, TagParser};

/// Errors that prevent a conversation from starting.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Tunables for the orchestration loop.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub default_model: String,
    /// Used for HIGH tier requests
    pub advanced_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// How long a remote tool may take before a synthetic failure is injected
    pub remote_timeout: Duration,
    /// Interventions per request before the run is terminated
    pub max_interventions: u32,
    /// Provider invocations per request before the run fails
    pub max_rounds: u32,
    pub review_enabled: bool,
    pub recall_limit: usize,
    /// Capacity of each conversation's event channel
    pub event_buffer: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o-mini".into(),
            advanced_model: "gpt-4o".into(),
            temperature: 0.7,
            max_tokens: 4096,
            remote_timeout: Duration::from_secs(120),
            max_interventions: 5,
            max_rounds: 25,
            review_enabled: true,
            recall_limit: 5,
            event_buffer: 64,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let orchestrator = &config.orchestrator;
        Self {
            default_model: config.models.default.clone(),
            advanced_model: config.models.advanced.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            remote_timeout: Duration::from_secs(orchestrator.remote_timeout_secs),
            max_interventions: orchestrator.max_interventions,
            max_rounds: orchestrator.max_rounds,
            review_enabled: orchestrator.review_enabled,
            recall_limit: orchestrator.recall_limit,
            ..Self::default()
        }
    }
}

/// A started conversation: its id, score, and ordered event stream.
pub struct ConversationHandle {
    pub conversation_id: String,
    pub score: ComplexityScore,
    pub events: mpsc::Receiver<AgentStreamEvent>,
}

/// One activity block as seen in a collected run.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityRecord {
    pub kind: ActivityKind,
    pub content: String,
}

/// A whole run folded into one value, for non-streaming callers.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub answer: String,
    pub outcome: Outcome,
    pub tier: Tier,
    pub reasoning_steps: usize,
    pub commands_executed: usize,
    pub activities: Vec<ActivityRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ConversationHandle {
    /// Drain the event stream into a summary.
    ///
    /// Consecutive activity fragments of the same kind are merged.
    pub async fn collect(mut self) -> ConversationSummary {
        let mut summary = ConversationSummary {
            conversation_id: self.conversation_id,
            answer: String::new(),
            outcome: Outcome::Failed,
            tier: self.score.tier,
            reasoning_steps: 0,
            commands_executed: 0,
            activities: Vec::new(),
            error: None,
            usage: None,
        };
        while let Some(event) = self.events.recv().await {
            match event {
                AgentStreamEvent::TextDelta { content } => summary.answer.push_str(&content),
                AgentStreamEvent::Activity { kind, content, .. } => match summary.activities.last_mut() {
                    Some(last) if last.kind == kind && kind.is_streamed() => {
                        last.content.push_str(&content)
                    }
                    _ => summary.activities.push(ActivityRecord { kind, content }),
                },
                AgentStreamEvent::Error { message } => summary.error = Some(message),
                AgentStreamEvent::Done {
                    outcome,
                    reasoning_steps,
                    commands_executed,
                    usage,
                    ..
                } => {
                    summary.outcome = outcome;
                    summary.reasoning_steps = reasoning_steps;
                    summary.commands_executed = commands_executed;
                    summary.usage = usage;
                    break;
                }
                _ => {}
            }
        }
        summary
    }
}

/// Why a run stopped early.
enum Halt {
    Cancelled,
    Failed(String),
}

/// How one provider round ended.
enum RoundOutcome {
    Answered,
    Executed,
    Intervened,
    Continue,
}

/// Sends events to the caller, turning a closed channel into cancellation.
struct Emitter {
    tx: mpsc::Sender<AgentStreamEvent>,
    cancel: CancellationToken,
}

impl Emitter {
    async fn send(&self, event: AgentStreamEvent) -> Result<(), Halt> {
        if self.cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Halt::Cancelled),
            sent = self.tx.send(event) => match sent {
                Ok(()) => Ok(()),
                Err(_) => {
                    debug!("Event receiver dropped, cancelling conversation");
                    self.cancel.cancel();
                    Err(Halt::Cancelled)
                }
            },
        }
    }

    /// Send regardless of cancellation. Used for terminal events only.
    async fn deliver(&self, event: AgentStreamEvent) {
        let _ = self.tx.send(event).await;
    }
}

/// Fixed inputs of one run.
struct Run {
    conversation_id: String,
    task_id: Uuid,
    agent_id: String,
    score: ComplexityScore,
    model: String,
    question: String,
    system_prompt: String,
    messages: Vec<Message>,
    remote_tools: Vec<RemoteToolDescriptor>,
    injected: InjectedContext,
    cancel: CancellationToken,
    review: bool,
}

impl Run {
    fn remote_tool(&self, name: &str) -> Option<&RemoteToolDescriptor> {
        self.remote_tools.iter().find(|t| t.name == name)
    }
}

/// Mutable state carried across rounds.
#[derive(Default)]
struct Progress {
    steps: usize,
    interventions: u32,
    commands_executed: usize,
    rounds: u32,
    usage: Option<Usage>,
    /// Reasoning and command results so far, replayed as an assistant turn
    transcript: String,
    directive: Option<String>,
    speech: Option<SpeechChannel>,
}

impl Progress {
    fn add_usage(&mut self, usage: Usage) {
        let total = self.usage.get_or_insert_with(Usage::default);
        total.prompt_tokens += usage.prompt_tokens;
        total.completion_tokens += usage.completion_tokens;
        total.total_tokens += usage.total_tokens;
    }
}

/// State of a single provider round.
#[derive(Default)]
struct RoundState {
    /// Untagged text, the implicit answer if no tagged one arrives
    plain: String,
    /// Accepted answer text, once an `answer` block opens
    answer: Option<String>,
}

/// Runs conversations.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    commands: Arc<CommandRegistry>,
    conversations: Arc<ConversationRegistry>,
    bridge: Arc<RemoteCommandBridge>,
    analyzer: ComplexityAnalyzer,
    directory: Option<Arc<AgentDirectory>>,
    memory: Option<Arc<dyn MemoryRecall>>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    events: Option<Arc<EventBus>>,
    settings: OrchestratorSettings,
    workspace: PathBuf,
    credentials: Credentials,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn Provider>, commands: Arc<CommandRegistry>) -> Self {
        Self {
            provider,
            commands,
            conversations: Arc::new(ConversationRegistry::new()),
            bridge: Arc::new(RemoteCommandBridge::new()),
            analyzer: ComplexityAnalyzer::new(),
            directory: None,
            memory: None,
            speech: None,
            events: None,
            settings: OrchestratorSettings::default(),
            workspace: PathBuf::from("."),
            credentials: Credentials::default(),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_directory(mut self, directory: Arc<AgentDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryRecall>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn commands(&self) -> &Arc<CommandRegistry> {
        &self.commands
    }

    pub fn conversations(&self) -> &Arc<ConversationRegistry> {
        &self.conversations
    }

    pub fn bridge(&self) -> &Arc<RemoteCommandBridge> {
        &self.bridge
    }

    pub fn analyzer(&self) -> &ComplexityAnalyzer {
        &self.analyzer
    }

    pub fn directory(&self) -> Option<&Arc<AgentDirectory>> {
        self.directory.as_ref()
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Context injected into local command calls.
    pub fn injected_context(&self, agent_id: &str, conversation_id: &str) -> InjectedContext {
        InjectedContext::new(agent_id, conversation_id, &self.workspace)
            .with_credentials(self.credentials.clone())
    }

    /// Score, register and spawn a conversation.
    ///
    /// Fails if the conversation already has a running task.
    pub fn start(
        self: &Arc<Self>,
        request: Request,
        owner: &str,
    ) -> Result<ConversationHandle, OrchestratorError> {
        let conversation_id = request.conversation_or_new().0;
        let score = self.analyzer.analyze(&request);
        let guard = self
            .conversations
            .register(&conversation_id, owner, &request.agent_id)?;
        let (tx, rx) = mpsc::channel(self.settings.event_buffer.max(1));

        info!(
            conversation_id = %conversation_id,
            owner,
            agent = %request.agent_id,
            tier = %score.tier,
            score = score.score,
            min_steps = score.min_steps,
            "Conversation started"
        );
        self.publish(DomainEvent::ConversationStarted {
            conversation_id: conversation_id.clone(),
            owner: owner.to_string(),
            agent_id: request.agent_id.clone(),
            tier: score.tier.to_string(),
            timestamp: Utc::now(),
        });

        let this = Arc::clone(self);
        let task_score = score.clone();
        tokio::spawn(async move { this.run(request, task_score, guard, tx).await });

        Ok(ConversationHandle {
            conversation_id,
            score,
            events: rx,
        })
    }

    /// Stop one conversation and discard its pending remote calls.
    pub fn stop(&self, conversation_id: &str) -> bool {
        match self.conversations.cancel(conversation_id) {
            Some(task) => {
                self.bridge.cancel_task(task.task_id());
                true
            }
            None => false,
        }
    }

    /// Stop every conversation of `owner`. Returns how many were stopped.
    pub fn stop_all(&self, owner: &str) -> usize {
        let stopped = self.conversations.cancel_all(owner);
        for task in &stopped {
            self.bridge.cancel_task(task.task_id());
        }
        stopped.len()
    }

    pub fn active(&self, owner: &str) -> Vec<ConversationTask> {
        self.conversations.list(owner)
    }

    /// Deliver a remote tool result. False if the id is unknown or already used.
    pub fn submit_remote_result(
        &self,
        conversation_id: &str,
        request_id: &str,
        result: RemoteResult,
    ) -> bool {
        self.bridge.resolve(conversation_id, request_id, result)
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    async fn run(
        self: Arc<Self>,
        request: Request,
        score: ComplexityScore,
        guard: TaskGuard,
        tx: mpsc::Sender<AgentStreamEvent>,
    ) {
        let conversation_id = guard.conversation_id().to_string();
        let task_id = guard.task_id();
        let tier = score.tier;
        let emit = Emitter {
            tx,
            cancel: guard.token().clone(),
        };
        let mut progress = Progress::default();

        let driven = AssertUnwindSafe(self.drive(&request, score, &conversation_id, task_id, &mut progress, &emit))
            .catch_unwind()
            .await;

        let outcome = match driven {
            Ok(Ok(())) => Outcome::Completed,
            Ok(Err(Halt::Cancelled)) => Outcome::Cancelled,
            Ok(Err(Halt::Failed(message))) => {
                error!(conversation_id = %conversation_id, error = %message, "Conversation failed");
                self.publish(DomainEvent::ErrorOccurred {
                    context: format!("conversation {conversation_id}"),
                    error_message: message.clone(),
                    timestamp: Utc::now(),
                });
                emit.deliver(AgentStreamEvent::Error { message }).await;
                Outcome::Failed
            }
            Err(_) => {
                error!(conversation_id = %conversation_id, "Orchestration panicked");
                emit.deliver(AgentStreamEvent::Error {
                    message: "internal error during orchestration".into(),
                })
                .await;
                Outcome::Failed
            }
        };

        if let Some(speech) = progress.speech.take() {
            if outcome == Outcome::Completed {
                speech.finish().await;
            } else {
                speech.abort();
            }
        }
        if outcome != Outcome::Completed {
            self.bridge.cancel_task(task_id);
        }

        info!(
            conversation_id = %conversation_id,
            outcome = ?outcome,
            steps = progress.steps,
            commands = progress.commands_executed,
            rounds = progress.rounds,
            "Conversation finished"
        );
        self.publish(DomainEvent::ConversationFinished {
            conversation_id: conversation_id.clone(),
            outcome: outcome.as_str().to_string(),
            reasoning_steps: progress.steps,
            timestamp: Utc::now(),
        });

        // Unregister before `done` so a caller that saw `done` never finds the entry.
        drop(guard);
        emit.deliver(AgentStreamEvent::Done {
            conversation_id,
            outcome,
            tier,
            reasoning_steps: progress.steps,
            commands_executed: progress.commands_executed,
            usage: progress.usage,
        })
        .await;
    }

    async fn drive(
        &self,
        request: &Request,
        score: ComplexityScore,
        conversation_id: &str,
        task_id: Uuid,
        progress: &mut Progress,
        emit: &Emitter,
    ) -> Result<(), Halt> {
        let profile = match &self.directory {
            Some(directory) => directory.get(&request.agent_id).await,
            None => Arc::new(AgentProfile::fallback(&request.agent_id)),
        };
        let question = request.latest_user_text();
        let snippets = self.recall(&question, &emit.cancel).await?;
        let commands = self.commands.enabled_descriptors(&request.agent_id);

        let review = score.is_high() && self.settings.review_enabled;
        let model = if score.is_high() {
            self.settings.advanced_model.clone()
        } else {
            profile
                .model
                .clone()
                .unwrap_or_else(|| self.settings.default_model.clone())
        };

        let run = Run {
            conversation_id: conversation_id.to_string(),
            task_id,
            agent_id: request.agent_id.clone(),
            system_prompt: prompt::system_prompt(
                &profile,
                &score,
                &commands,
                &request.remote_tools,
                &snippets,
            ),
            score,
            model,
            question,
            messages: request.messages.clone(),
            remote_tools: request.remote_tools.clone(),
            injected: self.injected_context(&request.agent_id, conversation_id),
            cancel: emit.cancel.clone(),
            review,
        };

        loop {
            if progress.rounds >= self.settings.max_rounds {
                return Err(Halt::Failed(format!(
                    "no answer after {} model invocations",
                    self.settings.max_rounds
                )));
            }
            progress.rounds += 1;
            debug!(
                conversation_id = %run.conversation_id,
                round = progress.rounds,
                steps = progress.steps,
                model = %run.model,
                "Invoking provider"
            );
            if let RoundOutcome::Answered = self.round(&run, progress, emit).await? {
                return Ok(());
            }
        }
    }

    async fn recall(&self, query: &str, cancel: &CancellationToken) -> Result<Vec<Snippet>, Halt> {
        let Some(memory) = &self.memory else {
            return Ok(Vec::new());
        };
        if query.trim().is_empty() || self.settings.recall_limit == 0 {
            return Ok(Vec::new());
        }
        let recalled = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Halt::Cancelled),
            recalled = memory.recall(query, self.settings.recall_limit) => recalled,
        };
        match recalled {
            Ok(snippets) => {
                if !snippets.is_empty() {
                    debug!(count = snippets.len(), "Recalled snippets for context");
                }
                Ok(snippets)
            }
            Err(e) => {
                warn!("Memory recall failed: {e}");
                Ok(Vec::new())
            }
        }
    }

    fn provider_request(&self, run: &Run, progress: &Progress) -> ProviderRequest {
        let mut messages = Vec::with_capacity(run.messages.len() + 3);
        messages.push(Message::system(&run.system_prompt));
        messages.extend(run.messages.iter().cloned());
        if !progress.transcript.is_empty() {
            messages.push(Message::assistant(&progress.transcript));
        }
        if let Some(directive) = &progress.directive {
            messages.push(Message::user(directive));
        }
        let mut request = ProviderRequest::new(&run.model, messages);
        request.temperature = self.settings.temperature;
        request.max_tokens = Some(self.settings.max_tokens);
        request
    }

    /// One provider invocation, consumed until it yields an outcome.
    async fn round(&self, run: &Run, progress: &mut Progress, emit: &Emitter) -> Result<RoundOutcome, Halt> {
        let request = self.provider_request(run, progress);
        let mut tokens = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => return Err(Halt::Cancelled),
            stream = self.provider.stream(request) => {
                stream.map_err(|e| Halt::Failed(format!("provider error: {e}")))?
            }
        };

        let mut parser = TagParser::new();
        let mut round = RoundState::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = run.cancel.cancelled() => return Err(Halt::Cancelled),
                next = tokens.recv() => next,
            };
            let chunk = match next {
                None => break,
                Some(Err(e)) => return Err(Halt::Failed(format!("provider stream failed: {e}"))),
                Some(Ok(chunk)) => chunk,
            };
            if let Some(usage) = chunk.usage {
                progress.add_usage(usage);
            }
            if let Some(text) = chunk.content.as_deref() {
                for event in parser.push(text) {
                    if let Some(outcome) = self.on_tag(event, run, progress, &mut round, emit).await? {
                        return Ok(outcome);
                    }
                }
            }
            if chunk.done {
                break;
            }
        }
        for event in parser.finish() {
            if let Some(outcome) = self.on_tag(event, run, progress, &mut round, emit).await? {
                return Ok(outcome);
            }
        }
        self.end_round(run, progress, round, emit).await
    }

    async fn on_tag(
        &self,
        event: TagEvent,
        run: &Run,
        progress: &mut Progress,
        round: &mut RoundState,
        emit: &Emitter,
    ) -> Result<Option<RoundOutcome>, Halt> {
        match event {
            TagEvent::Text(text) => round.plain.push_str(&text),

            TagEvent::Open(tag @ (Tag::Answer | Tag::Execute)) => {
                if round.answer.is_some() {
                    return Ok(None);
                }
                if progress.steps < run.score.min_steps {
                    self.intervene(run, progress, tag, emit).await?;
                    return Ok(Some(RoundOutcome::Intervened));
                }
                if tag == Tag::Answer {
                    round.answer = Some(String::new());
                }
            }
            TagEvent::Open(_) => {}

            // Routed by the innermost frame, so an answer nested in a
            // reasoning span still streams as the answer.
            TagEvent::Content { tag, top, text } => match tag {
                Tag::Answer => self.answer_text(&text, run, round, emit).await?,
                Tag::Speak => {
                    if round.answer.is_some() {
                        self.speak(progress, &text, emit);
                        self.answer_text(&text, run, round, emit).await?;
                    } else if top == Tag::Speak {
                        self.speak(progress, &text, emit);
                        round.plain.push_str(&text);
                    } else if top.is_reasoning() {
                        self.reasoning_activity(top, text, progress, emit).await?;
                    }
                }
                Tag::Thinking | Tag::Reflection => {
                    self.reasoning_activity(tag, text, progress, emit).await?;
                }
                // Execute bodies are handled on close; model-written output is ignored.
                Tag::Execute | Tag::Output => {}
            },

            TagEvent::Close { tag, body, nested } => match tag {
                Tag::Thinking | Tag::Reflection => self.record_step(tag, &body, nested, progress),
                Tag::Execute if round.answer.is_some() => {
                    debug!(conversation_id = %run.conversation_id, "Ignoring execute inside an answer");
                }
                Tag::Execute => {
                    return self.execute(&body, run, progress, emit).await.map(Some);
                }
                Tag::Answer => {
                    return self.finish_answer(run, round, emit).await.map(Some);
                }
                Tag::Output | Tag::Speak => {}
            },

            TagEvent::Unclosed { tag, body } => match tag {
                Tag::Answer => {
                    return self.finish_answer(run, round, emit).await.map(Some);
                }
                Tag::Thinking | Tag::Reflection => self.record_step(tag, &body, false, progress),
                Tag::Execute if round.answer.is_some() => {}
                Tag::Execute => round.plain.push_str(&body),
                Tag::Output | Tag::Speak => {}
            },
        }
        Ok(None)
    }

    async fn reasoning_activity(
        &self,
        tag: Tag,
        text: String,
        progress: &Progress,
        emit: &Emitter,
    ) -> Result<(), Halt> {
        let kind = if tag == Tag::Reflection {
            ActivityKind::Reflection
        } else {
            ActivityKind::Thinking
        };
        emit.send(AgentStreamEvent::Activity {
            kind,
            content: text,
            step: Some(progress.steps + 1),
        })
        .await
    }

    fn record_step(&self, tag: Tag, body: &str, nested: bool, progress: &mut Progress) {
        let body = body.trim();
        if body.is_empty() {
            return;
        }
        progress.steps += 1;
        if !nested {
            progress
                .transcript
                .push_str(&format!("<{tag}>{body}</{tag}>\n"));
        }
    }

    /// Reject a premature answer or execute. Past the intervention ceiling
    /// the run is terminated instead.
    async fn intervene(&self, run: &Run, progress: &mut Progress, premature: Tag, emit: &Emitter) -> Result<(), Halt> {
        if progress.interventions >= self.settings.max_interventions {
            warn!(
                conversation_id = %run.conversation_id,
                steps = progress.steps,
                required = run.score.min_steps,
                "Intervention ceiling reached"
            );
            return Err(Halt::Failed(format!(
                "reasoning budget of {} steps not met after {} interventions",
                run.score.min_steps, progress.interventions
            )));
        }
        progress.interventions += 1;
        info!(
            conversation_id = %run.conversation_id,
            premature = %premature,
            steps = progress.steps,
            required = run.score.min_steps,
            interventions = progress.interventions,
            "Reasoning budget not met, intervening"
        );
        self.publish(DomainEvent::InterventionInjected {
            conversation_id: run.conversation_id.clone(),
            steps_taken: progress.steps,
            steps_required: run.score.min_steps,
            timestamp: Utc::now(),
        });
        progress.directive = Some(prompt::intervention(progress.steps, run.score.min_steps));
        emit.send(AgentStreamEvent::activity(
            ActivityKind::Intervention,
            format!(
                "More reasoning requested before {premature} ({} of {} steps)",
                progress.steps, run.score.min_steps
            ),
        ))
        .await
    }

    fn speak(&self, progress: &mut Progress, text: &str, emit: &Emitter) {
        let Some(synthesizer) = &self.speech else {
            return;
        };
        progress
            .speech
            .get_or_insert_with(|| {
                SpeechChannel::start(Arc::clone(synthesizer), emit.tx.clone(), emit.cancel.clone())
            })
            .feed(text);
    }

    async fn answer_text(&self, text: &str, run: &Run, round: &mut RoundState, emit: &Emitter) -> Result<(), Halt> {
        round.answer.get_or_insert_with(String::new).push_str(text);
        if run.review {
            return Ok(());
        }
        emit.send(AgentStreamEvent::TextDelta {
            content: text.to_string(),
        })
        .await
    }

    /// Close out the answer: review it if required, then report it.
    async fn finish_answer(&self, run: &Run, round: &mut RoundState, emit: &Emitter) -> Result<RoundOutcome, Halt> {
        let draft = round.answer.take().unwrap_or_default();
        if run.review {
            let reviewed = self.review(run, &draft, emit).await?;
            emit.send(AgentStreamEvent::TextDelta { content: reviewed }).await?;
        }
        Ok(RoundOutcome::Answered)
    }

    async fn end_round(
        &self,
        run: &Run,
        progress: &mut Progress,
        mut round: RoundState,
        emit: &Emitter,
    ) -> Result<RoundOutcome, Halt> {
        if round.answer.is_some() {
            return self.finish_answer(run, &mut round, emit).await;
        }

        let plain = round.plain.trim();
        if plain.is_empty() {
            debug!(conversation_id = %run.conversation_id, "Round ended without an answer");
            progress.directive = Some(prompt::CONTINUE_REASONING.to_string());
            return Ok(RoundOutcome::Continue);
        }

        // Untagged text is an implicit answer, gated like a tagged one.
        if progress.steps < run.score.min_steps {
            self.intervene(run, progress, Tag::Answer, emit).await?;
            return Ok(RoundOutcome::Intervened);
        }
        let answer = if run.review {
            self.review(run, plain, emit).await?
        } else {
            plain.to_string()
        };
        emit.send(AgentStreamEvent::TextDelta { content: answer }).await?;
        Ok(RoundOutcome::Answered)
    }

    /// HIGH tier self-critique. A failed review keeps the draft.
    async fn review(&self, run: &Run, draft: &str, emit: &Emitter) -> Result<String, Halt> {
        emit.send(AgentStreamEvent::activity(
            ActivityKind::Review,
            "Reviewing draft answer",
        ))
        .await?;

        let mut request = ProviderRequest::new(&run.model, prompt::review_messages(&run.question, draft));
        request.temperature = self.settings.temperature;
        request.max_tokens = Some(self.settings.max_tokens);
        let response = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => return Err(Halt::Cancelled),
            response = self.provider.complete(request) => response,
        };
        match response {
            Ok(response) => {
                let reviewed = prompt::extract_answer(&response.content);
                if reviewed.is_empty() {
                    Ok(draft.to_string())
                } else {
                    Ok(reviewed)
                }
            }
            Err(e) => {
                warn!(conversation_id = %run.conversation_id, error = %e, "Review failed, keeping draft");
                Ok(draft.to_string())
            }
        }
    }

    /// Run a complete `execute` block and splice its result into the transcript.
    async fn execute(&self, body: &str, run: &Run, progress: &mut Progress, emit: &Emitter) -> Result<RoundOutcome, Halt> {
        let started = Instant::now();
        let (command, result) = match tags::parse_execute(body) {
            Ok(request) => {
                emit.send(AgentStreamEvent::activity(
                    ActivityKind::Execution,
                    format!(
                        "{} {}",
                        request.command,
                        serde_json::Value::Object(request.arguments.clone())
                    ),
                ))
                .await?;
                let result = match run.remote_tool(&request.command) {
                    Some(tool) => self.execute_remote(tool, &request, run, emit).await?,
                    None => tokio::select! {
                        biased;
                        _ = run.cancel.cancelled() => return Err(Halt::Cancelled),
                        result = self.commands.execute(&run.agent_id, &request, &run.injected) => result,
                    },
                };
                (request.command, result)
            }
            Err(e) => {
                debug!(conversation_id = %run.conversation_id, error = %e, "Malformed execute block");
                ("execute".to_string(), ExecutionResult::failure("execute", e))
            }
        };

        progress.commands_executed += 1;
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            conversation_id = %run.conversation_id,
            command = %command,
            success = result.is_success(),
            duration_ms,
            "Command executed"
        );
        self.publish(DomainEvent::CommandExecuted {
            conversation_id: run.conversation_id.clone(),
            command,
            success: result.is_success(),
            duration_ms,
            timestamp: Utc::now(),
        });

        emit.send(AgentStreamEvent::activity(ActivityKind::Output, result.output.clone()))
            .await?;
        progress.transcript.push_str(&format!(
            "<execute>{}</execute>\n<output>{}</output>\n",
            body.trim(),
            result.output
        ));
        progress.directive = Some(prompt::CONTINUE_AFTER_OUTPUT.to_string());
        Ok(RoundOutcome::Executed)
    }

    /// Hand a tool call to the caller and wait for its result.
    async fn execute_remote(
        &self,
        tool: &RemoteToolDescriptor,
        request: &ExecutionRequest,
        run: &Run,
        emit: &Emitter,
    ) -> Result<ExecutionResult, Halt> {
        let arguments = match coerce_arguments(&tool.parameters, &request.arguments) {
            Ok(arguments) => arguments,
            Err(e) => return Ok(ExecutionResult::failure(&tool.name, e)),
        };

        let (request_id, receiver) = self.bridge.invoke(&run.conversation_id, run.task_id, &tool.name);
        let announced = async {
            emit.send(AgentStreamEvent::RemoteCommandRequest {
                request_id: request_id.clone(),
                conversation_id: run.conversation_id.clone(),
                tool: tool.name.clone(),
                arguments: serde_json::Value::Object(arguments),
            })
            .await?;
            emit.send(AgentStreamEvent::RemoteCommandPending {
                request_id: request_id.clone(),
                tool: tool.name.clone(),
                timeout_secs: self.settings.remote_timeout.as_secs(),
            })
            .await
        }
        .await;
        if let Err(halt) = announced {
            self.bridge.discard(&request_id);
            return Err(halt);
        }

        let resolution = self
            .bridge
            .wait(&request_id, receiver, self.settings.remote_timeout, &run.cancel)
            .await;
        self.publish(DomainEvent::RemoteCommandResolved {
            conversation_id: run.conversation_id.clone(),
            request_id: request_id.clone(),
            tool: tool.name.clone(),
            resolution: resolution.label().to_string(),
            timestamp: Utc::now(),
        });

        match resolution {
            RemoteResolution::Resolved(result) if result.success => Ok(ExecutionResult::success(
                &tool.name,
                CommandOutput {
                    text: result.output,
                    data: result.data,
                },
            )),
            RemoteResolution::Resolved(result) => Ok(ExecutionResult::failure(
                &tool.name,
                CommandError::ExecutionFailed {
                    command: tool.name.clone(),
                    reason: result.output,
                },
            )),
            RemoteResolution::TimedOut => Ok(ExecutionResult::failure(
                &tool.name,
                CommandError::RemoteTimeout {
                    tool: tool.name.clone(),
                    timeout_secs: self.settings.remote_timeout.as_secs(),
                },
            )),
            RemoteResolution::Cancelled => Err(Halt::Cancelled),
        }
    }
}
