//! Incremental parser for reasoning tags in model output.
//!
//! Token deltas arrive in arbitrary fragments, so a tag like `<answer>` may be
//! split across several chunks. The parser holds back a trailing `<...` only
//! while it could still become a recognized tag and releases everything else
//! immediately, so answer text streams with at most one tag name of latency.
//!
//! Recovery rules for malformed output:
//! - an unrecognized `<x>` is literal text
//! - a close tag with no matching open frame is literal text
//! - re-opening a tag that is already open is literal text
//! - closing an outer frame implicitly closes the frames inside it
//! - frames still open at end of stream are reported as [`TagEvent::Unclosed`]

use relaymind_core::command::{Arguments, ExecutionRequest};
use relaymind_core::error::CommandError;
use serde_json::Value;

/// The closed set of structural tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Thinking,
    Reflection,
    Execute,
    Output,
    Answer,
    Speak,
}

impl Tag {
    pub const ALL: [Tag; 6] = [
        Tag::Thinking,
        Tag::Reflection,
        Tag::Execute,
        Tag::Output,
        Tag::Answer,
        Tag::Speak,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::Reflection => "reflection",
            Self::Execute => "execute",
            Self::Output => "output",
            Self::Answer => "answer",
            Self::Speak => "speak",
        }
    }

    /// Case-insensitive exact lookup.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(name))
    }

    /// Whether a closed span of this tag counts as a reasoning step.
    pub fn is_reasoning(self) -> bool {
        matches!(self, Self::Thinking | Self::Reflection)
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What the parser observed in a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagEvent {
    /// Text outside any tag
    Text(String),
    Open(Tag),
    /// Text inside `tag` (the innermost frame); `top` is the outermost frame
    Content { tag: Tag, top: Tag, text: String },
    /// `nested` is true when other frames are still open around this one
    Close { tag: Tag, body: String, nested: bool },
    /// Still open when the stream ended
    Unclosed { tag: Tag, body: String },
}

struct Frame {
    tag: Tag,
    body: String,
}

/// Stack-based streaming tag parser.
#[derive(Default)]
pub struct TagParser {
    pending: String,
    stack: Vec<Frame>,
}

impl TagParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently open frames.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Feed one chunk and return the events it completes.
    pub fn push(&mut self, chunk: &str) -> Vec<TagEvent> {
        self.pending.push_str(chunk);
        let mut out = Vec::new();

        loop {
            let Some(lt) = self.pending.find('<') else {
                let text = std::mem::take(&mut self.pending);
                self.text(&text, &mut out);
                break;
            };
            if lt > 0 {
                let text: String = self.pending.drain(..lt).collect();
                self.text(&text, &mut out);
            }

            let Some(gt) = self.pending.find('>') else {
                if could_be_tag(&self.pending) {
                    break;
                }
                self.pending.drain(..1);
                self.text("<", &mut out);
                continue;
            };

            let inner = &self.pending[1..gt];
            let (closing, name) = match inner.strip_prefix('/') {
                Some(name) => (true, name),
                None => (false, inner),
            };
            match Tag::parse(name) {
                Some(tag) => {
                    let raw: String = self.pending.drain(..=gt).collect();
                    if closing {
                        self.close(tag, &raw, &mut out);
                    } else {
                        self.open(tag, &raw, &mut out);
                    }
                }
                None => {
                    self.pending.drain(..1);
                    self.text("<", &mut out);
                }
            }
        }
        out
    }

    /// Flush held-back input and report frames left open.
    pub fn finish(&mut self) -> Vec<TagEvent> {
        let mut out = Vec::new();
        let rest = std::mem::take(&mut self.pending);
        self.text(&rest, &mut out);
        while let Some(frame) = self.stack.pop() {
            out.push(TagEvent::Unclosed {
                tag: frame.tag,
                body: frame.body,
            });
        }
        out
    }

    fn text(&mut self, text: &str, out: &mut Vec<TagEvent>) {
        if text.is_empty() {
            return;
        }
        let (Some(first), Some(last)) = (self.stack.first(), self.stack.last()) else {
            if let Some(TagEvent::Text(prev)) = out.last_mut() {
                prev.push_str(text);
            } else {
                out.push(TagEvent::Text(text.to_string()));
            }
            return;
        };
        let (top, tag) = (first.tag, last.tag);
        for frame in &mut self.stack {
            frame.body.push_str(text);
        }
        match out.last_mut() {
            Some(TagEvent::Content {
                tag: prev_tag,
                top: prev_top,
                text: prev,
            }) if *prev_tag == tag && *prev_top == top => prev.push_str(text),
            _ => out.push(TagEvent::Content {
                tag,
                top,
                text: text.to_string(),
            }),
        }
    }

    fn open(&mut self, tag: Tag, raw: &str, out: &mut Vec<TagEvent>) {
        if self.stack.iter().any(|f| f.tag == tag) {
            self.text(raw, out);
            return;
        }
        self.stack.push(Frame {
            tag,
            body: String::new(),
        });
        out.push(TagEvent::Open(tag));
    }

    fn close(&mut self, tag: Tag, raw: &str, out: &mut Vec<TagEvent>) {
        let Some(index) = self.stack.iter().rposition(|f| f.tag == tag) else {
            self.text(raw, out);
            return;
        };
        while self.stack.len() > index {
            let Some(frame) = self.stack.pop() else { break };
            out.push(TagEvent::Close {
                tag: frame.tag,
                body: frame.body,
                nested: !self.stack.is_empty(),
            });
        }
    }
}

/// Whether `pending` (starting with `<`, no `>` yet) may still become a tag.
fn could_be_tag(pending: &str) -> bool {
    let rest = &pending[1..];
    let rest = rest.strip_prefix('/').unwrap_or(rest);
    Tag::ALL.iter().any(|t| {
        let name = t.name().as_bytes();
        rest.len() <= name.len() && name[..rest.len()].eq_ignore_ascii_case(rest.as_bytes())
    })
}

/// Extract a command invocation from the body of an `execute` block.
///
/// Accepted shapes:
/// - sub-tags: `<name>Search Files</name><query>deploy</query>`; `command` is
///   an alias for `name`, and an `args`/`arguments` sub-tag holding a JSON
///   object is merged into the arguments
/// - a JSON object: `{"name": "...", "arguments": {...}}`
/// - a bare command name with no arguments
pub fn parse_execute(body: &str) -> Result<ExecutionRequest, CommandError> {
    let trimmed = body.trim();
    let pairs = sub_tags(trimmed);

    if pairs.is_empty() {
        if trimmed.starts_with('{') {
            return parse_execute_json(trimmed);
        }
        if !trimmed.is_empty() && !trimmed.contains('\n') && !trimmed.contains('<') {
            return Ok(ExecutionRequest {
                command: trimmed.to_string(),
                arguments: Arguments::new(),
            });
        }
        return Err(missing_name());
    }

    let mut command = None;
    let mut arguments = Arguments::new();
    for (key, value) in pairs {
        match key.as_str() {
            "name" | "command" | "tool" => command = Some(value),
            "args" | "arguments" => merge_json_object(&key, &value, &mut arguments)?,
            _ => {
                arguments.insert(key, Value::String(value));
            }
        }
    }

    match command.filter(|c| !c.is_empty()) {
        Some(command) => Ok(ExecutionRequest { command, arguments }),
        None => Err(missing_name()),
    }
}

fn parse_execute_json(body: &str) -> Result<ExecutionRequest, CommandError> {
    let value: Value = serde_json::from_str(body).map_err(|e| CommandError::Argument {
        parameter: "execute".into(),
        reason: format!("invalid JSON: {e}"),
    })?;
    let command = ["name", "command", "tool"]
        .iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(missing_name)?;
    let arguments = ["arguments", "args"]
        .iter()
        .find_map(|k| value.get(*k).and_then(Value::as_object))
        .cloned()
        .unwrap_or_default();
    Ok(ExecutionRequest { command, arguments })
}

fn merge_json_object(key: &str, raw: &str, into: &mut Arguments) -> Result<(), CommandError> {
    if raw.is_empty() {
        return Ok(());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => {
            into.extend(map);
            Ok(())
        }
        _ => Err(CommandError::Argument {
            parameter: key.to_string(),
            reason: "expected a JSON object".into(),
        }),
    }
}

fn missing_name() -> CommandError {
    CommandError::Argument {
        parameter: "name".into(),
        reason: "execute block has no command name".into(),
    }
}

/// `<key>value</key>` pairs in order of appearance, values trimmed.
fn sub_tags(body: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('>') else { break };
        let key = &after[..end];
        if !is_identifier(key) {
            rest = after;
            continue;
        }
        let content = &after[end + 1..];
        let closer = format!("</{key}>");
        match content.find(&closer) {
            Some(at) => {
                pairs.push((key.to_string(), content[..at].trim().to_string()));
                rest = &content[at + closer.len()..];
            }
            None => rest = content,
        }
    }
    pairs
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
