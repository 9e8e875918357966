//! Named chains of steps, run in order.
//!
//! A step runs a local command, sends a prompt through the orchestrator, or
//! runs another chain. String fields accept `{input}` (the chain's input) and
//! `{previous}` (the prior step's output). Nested chains carry an explicit
//! depth counter; exceeding the limit fails with
//! [`ChainError::RecursionLimitExceeded`].

use futures::future::BoxFuture;
use relaymind_config::{ChainConfig, ChainStepConfig};
use relaymind_core::command::ExecutionRequest;
use relaymind_core::message::Request;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::stream_event::Outcome;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Chain not found: {0}")]
    NotFound(String),

    #[error("Chain '{chain}' exceeds the nesting limit of {depth}")]
    RecursionLimitExceeded { chain: String, depth: usize },

    #[error("Chain '{chain}' step {step} failed: {reason}")]
    StepFailed {
        chain: String,
        step: usize,
        reason: String,
    },

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// What one step produced.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub chain: String,
    pub step: usize,
    /// `command`, `prompt` or `chain`
    pub kind: &'static str,
    pub output: String,
    pub depth: usize,
}

/// Result of a whole chain run.
#[derive(Debug, Clone, Serialize)]
pub struct ChainRun {
    pub chain: String,
    /// Output of the last step (the input itself for an empty chain)
    pub output: String,
    /// Every step, nested ones included, in execution order
    pub steps: Vec<StepRecord>,
}

/// Where a run is executing on behalf of.
struct Caller<'a> {
    agent_id: &'a str,
    owner: &'a str,
}

pub struct ChainRunner {
    chains: HashMap<String, ChainConfig>,
    orchestrator: Arc<Orchestrator>,
    max_depth: usize,
}

impl ChainRunner {
    pub fn new(chains: &[ChainConfig], orchestrator: Arc<Orchestrator>, max_depth: usize) -> Self {
        Self {
            chains: chains.iter().map(|c| (c.name.clone(), c.clone())).collect(),
            orchestrator,
            max_depth,
        }
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.chains.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn get(&self, name: &str) -> Option<&ChainConfig> {
        self.chains.get(name)
    }

    pub async fn run(
        &self,
        name: &str,
        input: &str,
        agent_id: &str,
        owner: &str,
    ) -> Result<ChainRun, ChainError> {
        info!(chain = name, agent = agent_id, owner, "Running chain");
        // Command steps must see the agent's enablement overlay.
        if let Some(directory) = self.orchestrator.directory() {
            directory.get(agent_id).await;
        }
        let caller = Caller { agent_id, owner };
        let mut steps = Vec::new();
        let output = self.run_at_depth(name, input.to_string(), 0, &caller, &mut steps).await?;
        info!(chain = name, steps = steps.len(), "Chain finished");
        Ok(ChainRun {
            chain: name.to_string(),
            output,
            steps,
        })
    }

    fn run_at_depth<'a>(
        &'a self,
        name: &'a str,
        input: String,
        depth: usize,
        caller: &'a Caller<'a>,
        records: &'a mut Vec<StepRecord>,
    ) -> BoxFuture<'a, Result<String, ChainError>> {
        Box::pin(async move {
            if depth >= self.max_depth {
                return Err(ChainError::RecursionLimitExceeded {
                    chain: name.to_string(),
                    depth: self.max_depth,
                });
            }
            let chain = self
                .chains
                .get(name)
                .ok_or_else(|| ChainError::NotFound(name.to_string()))?;

            let mut previous = input.clone();
            for (index, step) in chain.steps.iter().enumerate() {
                let step_no = index + 1;
                debug!(chain = name, step = step_no, depth, "Running chain step");
                let (kind, output) = match step {
                    ChainStepConfig::Command { command, arguments } => {
                        let request = ExecutionRequest {
                            command: fill(command, &input, &previous),
                            arguments: fill_arguments(arguments, &input, &previous),
                        };
                        let context = self
                            .orchestrator
                            .injected_context(caller.agent_id, &format!("chain:{name}"));
                        let result = self
                            .orchestrator
                            .commands()
                            .execute(caller.agent_id, &request, &context)
                            .await;
                        if !result.is_success() {
                            return Err(ChainError::StepFailed {
                                chain: name.to_string(),
                                step: step_no,
                                reason: result.output,
                            });
                        }
                        ("command", result.output)
                    }
                    ChainStepConfig::Prompt { prompt } => {
                        let text = fill(prompt, &input, &previous);
                        let summary = self
                            .orchestrator
                            .start(Request::single(caller.agent_id, text), caller.owner)?
                            .collect()
                            .await;
                        if summary.outcome != Outcome::Completed {
                            return Err(ChainError::StepFailed {
                                chain: name.to_string(),
                                step: step_no,
                                reason: summary
                                    .error
                                    .unwrap_or_else(|| format!("prompt {}", summary.outcome.as_str())),
                            });
                        }
                        ("prompt", summary.answer)
                    }
                    ChainStepConfig::Chain { chain: nested, input: nested_input } => {
                        let nested_input = match nested_input {
                            Some(template) => fill(template, &input, &previous),
                            None => previous.clone(),
                        };
                        let output = self
                            .run_at_depth(nested, nested_input, depth + 1, caller, records)
                            .await?;
                        ("chain", output)
                    }
                };
                records.push(StepRecord {
                    chain: name.to_string(),
                    step: step_no,
                    kind,
                    output: output.clone(),
                    depth,
                });
                previous = output;
            }
            Ok(previous)
        })
    }
}

fn fill(template: &str, input: &str, previous: &str) -> String {
    template.replace("{input}", input).replace("{previous}", previous)
}

fn fill_value(value: &Value, input: &str, previous: &str) -> Value {
    match value {
        Value::String(s) => Value::String(fill(s, input, previous)),
        Value::Array(items) => Value::Array(items.iter().map(|v| fill_value(v, input, previous)).collect()),
        Value::Object(map) => Value::Object(fill_arguments(map, input, previous)),
        other => other.clone(),
    }
}

fn fill_arguments(
    arguments: &serde_json::Map<String, Value>,
    input: &str,
    previous: &str,
) -> serde_json::Map<String, Value> {
    arguments
        .iter()
        .map(|(k, v)| (k.clone(), fill_value(v, input, previous)))
        .collect()
}
