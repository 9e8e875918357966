//! `relaymind chat`: interactive or single-message chat mode.
//!
//! Answer text streams to stdout as it arrives. Activity goes to stderr when
//! `--show-activity` is set. Ctrl+C stops the running conversation without
//! leaving the session.

use relaymind_agent::{ActivityKind, AgentStreamEvent, Orchestrator, Outcome};
use relaymind_config::AppConfig;
use relaymind_core::message::{Message, Request};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// Owner id for conversations started from the terminal.
const CLI_OWNER: &str = "cli";

pub async fn run(
    message: Option<String>,
    agent: String,
    show_activity: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() && config.providers.is_empty() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    RELAYMIND_API_KEY=sk-...");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add api_key to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let router = relaymind_providers::router::build_from_config(&config);
    let provider = router
        .default()
        .ok_or_else(|| format!("provider '{}' is not configured", config.default_provider))?;
    let state = relaymind_gateway::build_state(&config, provider);
    let orchestrator = state.orchestrator.clone();

    if let Some(text) = message {
        let request = Request::single(&agent, text);
        turn(&orchestrator, request, show_activity).await?;
        return Ok(());
    }

    println!();
    println!("  relaymind chat");
    println!();
    println!("  Provider:  {}", config.default_provider);
    println!("  Model:     {}", config.models.default);
    println!("  Agent:     {agent}");
    println!("  Commands:  {}", orchestrator.commands().catalog().names().join(", "));
    println!();
    println!("  Type your message and press Enter.");
    println!("  Ctrl+C stops a running answer; 'exit' quits.");
    println!();

    let conversation_id = uuid::Uuid::new_v4().to_string();
    let mut history: Vec<Message> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt()?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            prompt()?;
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        history.push(Message::user(line));
        let request = Request {
            messages: history.clone(),
            agent_id: agent.clone(),
            conversation_id: Some(conversation_id.clone()),
            stream: true,
            remote_tools: Vec::new(),
        };
        match turn(&orchestrator, request, show_activity).await {
            Ok(answer) if !answer.is_empty() => history.push(Message::assistant(answer)),
            Ok(_) => {}
            Err(e) => eprintln!("  [Error] {e}"),
        }
        println!();
        prompt()?;
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

/// Run one request to completion, rendering events as they arrive.
/// Returns the streamed answer text.
async fn turn(
    orchestrator: &Arc<Orchestrator>,
    request: Request,
    show_activity: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    let mut handle = orchestrator.start(request, CLI_OWNER)?;
    debug!(conversation_id = %handle.conversation_id, tier = %handle.score.tier, "Chat turn started");
    let mut answer = String::new();
    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = handle.events.recv() => {
                let Some(event) = event else { break };
                if let AgentStreamEvent::TextDelta { content } = &event {
                    answer.push_str(content);
                }
                match render(&event, show_activity) {
                    Some(Rendered::Out(text)) => {
                        write!(stdout, "{text}")?;
                        stdout.flush()?;
                    }
                    Some(Rendered::Err(text)) => writeln!(stderr, "{text}")?,
                    None => {}
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                orchestrator.stop(&handle.conversation_id);
            }
        }
    }

    Ok(answer)
}

#[derive(Debug, PartialEq)]
enum Rendered {
    Out(String),
    Err(String),
}

fn render(event: &AgentStreamEvent, show_activity: bool) -> Option<Rendered> {
    match event {
        AgentStreamEvent::TextDelta { content } => Some(Rendered::Out(content.clone())),
        AgentStreamEvent::Activity { kind, content, .. } if show_activity => {
            let label = match kind {
                ActivityKind::Thinking => "thinking",
                ActivityKind::Reflection => "reflection",
                ActivityKind::Execution => "execution",
                ActivityKind::Output => "output",
                ActivityKind::Intervention => "intervention",
                ActivityKind::Review => "review",
            };
            Some(Rendered::Err(format!("  [{label}] {}", content.trim_end())))
        }
        AgentStreamEvent::RemoteCommandRequest { tool, .. } => Some(Rendered::Err(format!(
            "  [remote] '{tool}' requested but the terminal has no remote tools"
        ))),
        AgentStreamEvent::Error { message } => Some(Rendered::Err(format!("  [Error] {message}"))),
        AgentStreamEvent::Done { outcome, .. } => match outcome {
            Outcome::Completed => Some(Rendered::Out("\n".into())),
            Outcome::Cancelled => Some(Rendered::Err("\n  [stopped]".into())),
            Outcome::Failed => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymind_agent::Tier;

    fn done(outcome: Outcome) -> AgentStreamEvent {
        AgentStreamEvent::Done {
            conversation_id: "c".into(),
            outcome,
            tier: Tier::Low,
            reasoning_steps: 0,
            commands_executed: 0,
            usage: None,
        }
    }

    #[test]
    fn answer_goes_to_stdout() {
        let event = AgentStreamEvent::TextDelta {
            content: "Hi".into(),
        };
        assert_eq!(render(&event, false), Some(Rendered::Out("Hi".into())));
    }

    #[test]
    fn activity_hidden_unless_requested() {
        let event = AgentStreamEvent::Activity {
            kind: ActivityKind::Thinking,
            content: "step one\n".into(),
            step: Some(1),
        };
        assert_eq!(render(&event, false), None);
        assert_eq!(
            render(&event, true),
            Some(Rendered::Err("  [thinking] step one".into()))
        );
    }

    #[test]
    fn terminal_outcomes_render() {
        assert_eq!(render(&done(Outcome::Completed), false), Some(Rendered::Out("\n".into())));
        assert!(matches!(render(&done(Outcome::Cancelled), false), Some(Rendered::Err(_))));
        assert_eq!(render(&done(Outcome::Failed), false), None);
    }
}
