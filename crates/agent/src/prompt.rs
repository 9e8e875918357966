//! Prompt text the orchestrator sends alongside the caller's messages.

use relaymind_core::command::{CommandDescriptor, ParamSpec, RemoteToolDescriptor};
use relaymind_core::memory::Snippet;
use relaymind_core::message::Message;

use crate::complexity::ComplexityScore;
use crate::directory::AgentProfile;
use crate::tags::{Tag, TagEvent, TagParser};

const DEFAULT_PERSONA: &str = "You are a capable assistant that reasons carefully before answering.";

const TAG_PROTOCOL: &str = "\
Structure every reply with these tags:
<thinking>...</thinking>      one step of reasoning
<reflection>...</reflection>  checking or revising earlier reasoning
<execute><name>Command Name</name><param>value</param></execute>
                              run one command, then stop and wait for its <output>
<answer>...</answer>          the final answer shown to the user
<speak>...</speak>            text to read aloud (optional, may appear inside <answer>)
Never write <output> yourself; it is provided after each <execute>.";

pub(crate) const CONTINUE_AFTER_OUTPUT: &str =
    "The command output is above. Continue reasoning, execute another command if needed, or give your <answer>.";

pub(crate) const CONTINUE_REASONING: &str =
    "Continue from where you stopped and finish with an <answer> block.";

/// Build the system message for one conversation.
pub(crate) fn system_prompt(
    profile: &AgentProfile,
    score: &ComplexityScore,
    commands: &[CommandDescriptor],
    remote_tools: &[RemoteToolDescriptor],
    snippets: &[Snippet],
) -> String {
    let mut prompt = String::new();
    if profile.persona.trim().is_empty() {
        prompt.push_str(DEFAULT_PERSONA);
    } else {
        prompt.push_str(profile.persona.trim());
    }
    prompt.push_str("\n\n");
    prompt.push_str(TAG_PROTOCOL);

    if score.min_steps > 0 {
        prompt.push_str(&format!(
            "\n\nThis request needs at least {} reasoning steps (<thinking> or <reflection> blocks) before you execute a command or answer.",
            score.min_steps
        ));
    }

    let local: Vec<&CommandDescriptor> = commands
        .iter()
        .filter(|c| !remote_tools.iter().any(|r| r.name == c.name))
        .collect();
    if !local.is_empty() {
        prompt.push_str("\n\n## Commands\n");
        for command in local {
            push_tool(&mut prompt, &command.name, &command.description, &command.parameters);
        }
    }
    if !remote_tools.is_empty() {
        prompt.push_str("\n\n## Device tools (run on the user's device)\n");
        for tool in remote_tools {
            push_tool(&mut prompt, &tool.name, &tool.description, &tool.parameters);
        }
    }

    if !snippets.is_empty() {
        prompt.push_str("\n\n## Relevant notes\n");
        for (i, snippet) in snippets.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, snippet.content.trim()));
        }
    }
    prompt
}

fn push_tool(prompt: &mut String, name: &str, description: &str, parameters: &[ParamSpec]) {
    prompt.push_str(&format!("- {name}: {description}"));
    if !parameters.is_empty() {
        let params: Vec<String> = parameters
            .iter()
            .map(|p| {
                let ty = serde_json::to_value(p.ty)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                let required = if p.required { "" } else { ", optional" };
                format!("{} ({ty}{required})", p.name)
            })
            .collect();
        prompt.push_str(&format!(" [{}]", params.join(", ")));
    }
    prompt.push('\n');
}

/// Directive injected when an answer or command arrives before the budget is met.
pub(crate) fn intervention(steps_taken: usize, steps_required: usize) -> String {
    format!(
        "You have completed {steps_taken} of the {steps_required} required reasoning steps. \
         Do not answer or execute a command yet. Continue with more <thinking> or <reflection> blocks, \
         then proceed."
    )
}

/// Messages for the HIGH tier self-critique pass.
pub(crate) fn review_messages(question: &str, draft: &str) -> Vec<Message> {
    vec![
        Message::system(
            "You review draft answers. Check the draft for errors, gaps and unclear wording, \
             then reply with the corrected final answer inside <answer></answer>.",
        ),
        Message::user(format!("Question:\n{question}\n\nDraft answer:\n{draft}")),
    ]
}

/// The body of the first `answer` block, or the whole text when there is none.
pub(crate) fn extract_answer(text: &str) -> String {
    let mut parser = TagParser::new();
    let mut events = parser.push(text);
    events.extend(parser.finish());
    events
        .into_iter()
        .find_map(|event| match event {
            TagEvent::Close {
                tag: Tag::Answer,
                body,
                ..
            }
            | TagEvent::Unclosed {
                tag: Tag::Answer,
                body,
            } => Some(body.trim().to_string()),
            _ => None,
        })
        .unwrap_or_else(|| text.trim().to_string())
}
