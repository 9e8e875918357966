//! The stream orchestrator behind relaymind.
//!
//! A request flows through:
//!
//! 1. **Score**: [`ComplexityAnalyzer`] assigns a tier and a minimum number of
//!    reasoning steps
//! 2. **Register**: the [`ConversationRegistry`] admits one task per conversation
//! 3. **Stream**: provider tokens pass through the [`TagParser`]; reasoning
//!    becomes `activity` events, `answer` becomes `text-delta`
//! 4. **Act**: `execute` blocks run locally or on the caller's device through
//!    the [`RemoteCommandBridge`], and the provider is re-invoked with the result
//! 5. **Finish**: exactly one `done` event, and the registry entry is gone
//!
//! Callers read [`AgentStreamEvent`]s from the [`ConversationHandle`] returned
//! by [`Orchestrator::start`].

pub mod bridge;
pub mod chain;
pub mod complexity;
pub mod conversations;
pub mod directory;
pub mod orchestrator;
mod prompt;
pub mod speech;
pub mod stream_event;
pub mod tags;

pub use bridge::{RemoteCommandBridge, RemoteResolution, RemoteResult};
pub use chain::{ChainError, ChainRun, ChainRunner, StepRecord};
pub use complexity::{ComplexityAnalyzer, ComplexityScore, Tier};
pub use conversations::{ConversationRegistry, ConversationTask, TaskGuard};
pub use directory::{AgentDirectory, AgentProfile, AgentStore, ConfigAgentStore};
pub use orchestrator::{
    ActivityRecord, ConversationHandle, ConversationSummary, Orchestrator, OrchestratorError,
    OrchestratorSettings,
};
pub use speech::{SentenceSegmenter, SpeechChannel};
pub use stream_event::{ActivityKind, AgentStreamEvent, Outcome};
pub use tags::{Tag, TagEvent, TagParser, parse_execute};
