//! # Relaymind Core
//!
//! Domain types, traits, and error definitions for the relaymind
//! orchestration runtime. This crate has **no framework dependencies**: it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here (LLM provider, command,
//! memory recall, speech). Implementations live in their respective crates.
//! This enables:
//! - Swapping implementations via configuration
//! - Easy testing with scripted mock implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod coerce;
pub mod command;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod speech;

// Re-export key types at crate root for ergonomics
pub use command::{
    Arguments, Command, CommandDescriptor, CommandModule, CommandOutput, CommandRegistry,
    Credentials, ExecutionRequest, ExecutionResult, InjectedContext, ParamSpec, ParamType,
    RemoteToolDescriptor,
};
pub use error::{CommandError, Error, MemoryError, ProviderError, RegistryError, Result, SpeechError};
pub use event::{DomainEvent, EventBus};
pub use memory::{KeywordRecall, MemoryRecall, Snippet};
pub use message::{ContentPart, ConversationId, Message, Request, Role, NEW_CONVERSATION};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, TokenStream, Usage};
pub use speech::{AudioFormat, SpeechSynthesizer};
