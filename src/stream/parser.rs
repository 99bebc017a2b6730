//! NDJSON transcript line parser.
//!
//! Turns one line of the CLI's `stream-json` output into zero or more
//! [`ParsedEvent`]s, combining the thinking scanner, the tool tracker and
//! the marker detector.
//!
//! # Known envelope types
//!
//! | `type`         | Produces                                                  |
//! |----------------|-----------------------------------------------------------|
//! | `system`       | [`ParsedEvent::SessionId`]                                |
//! | `stream_event` | text/thinking chunks, `ToolUseDetected`, `MessageStop`    |
//! | `assistant`    | [`ParsedEvent::ToolStart`] per `tool_use` block           |
//! | `user`         | marker events, then [`ParsedEvent::ToolResult`] per block |
//! | `result`       | `SessionId` (when new), then `StreamComplete`             |
//! | *(any other)*  | Nothing; logged at `DEBUG`                                |
//!
//! A line that is not JSON yields a single [`ParsedEvent::ParseError`] and
//! never stops the parser.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::stream::event::ParsedEvent;
use crate::stream::markers;
use crate::stream::thinking::{ChunkKind, ThinkingChunk, ThinkingParser};
use crate::stream::tools::{ToolInfo, ToolTracker};

/// Maximum number of characters of an unparseable line kept for diagnostics.
pub const PREVIEW_CHARS: usize = 200;

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    event: Option<StreamEvent>,
    #[serde(default)]
    message: Option<MessageBody>,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    content_block: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    #[serde(default)]
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Map<String, Value>,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<ToolResultContent>,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ToolResultContent {
    Text(String),
    Blocks(Vec<Value>),
}

impl ToolResultContent {
    /// Flatten to text; block lists join their `text` parts with newlines.
    fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Stateful transcript parser; one instance per stream.
#[derive(Debug, Default)]
pub struct LineParser {
    thinking: ThinkingParser,
    tools: ToolTracker,
    cli_session_id: Option<String>,
}

impl LineParser {
    /// Create a parser with the default marker-scan denylist.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parser whose tool tracker skips marker scans for `names`.
    pub fn with_skip_list<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            thinking: ThinkingParser::new(),
            tools: ToolTracker::with_skip_list(names),
            cli_session_id: None,
        }
    }

    /// Parse one transcript line.
    pub fn process_line(&mut self, raw: &str) -> Vec<ParsedEvent> {
        let line = raw.trim();
        if line.is_empty() {
            return Vec::new();
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(err) => {
                return vec![ParsedEvent::ParseError {
                    error: err.to_string(),
                    preview: preview(line),
                }];
            }
        };

        let envelope: Envelope = match serde_json::from_value(value) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(%err, "line parser: json line without a usable envelope, skipping");
                return Vec::new();
            }
        };

        match envelope.kind.as_str() {
            "system" => self.on_system(envelope.session_id),
            "stream_event" => envelope
                .event
                .map(|event| self.on_stream_event(event))
                .unwrap_or_default(),
            "assistant" => self.on_assistant(envelope.message),
            "user" => self.on_user(envelope.message),
            "result" => self.on_result(envelope.session_id),
            other => {
                debug!(envelope_type = other, "line parser: skipping unknown envelope type");
                Vec::new()
            }
        }
    }

    /// Flush the thinking scanner at end of stream.
    pub fn finalize(&mut self) -> Vec<ParsedEvent> {
        self.thinking
            .flush()
            .into_iter()
            .map(chunk_to_event)
            .collect()
    }

    /// All streamed text, commentary tags included.
    #[must_use]
    pub fn full_text(&self) -> &str {
        self.thinking.accumulated_all()
    }

    /// Streamed reply text with commentary removed.
    #[must_use]
    pub fn clean_text(&self) -> &str {
        self.thinking.accumulated_clean()
    }

    /// Streamed commentary text only.
    #[must_use]
    pub fn thinking_text(&self) -> &str {
        self.thinking.accumulated_thinking()
    }

    /// Last upstream CLI session id seen.
    #[must_use]
    pub fn cli_session_id(&self) -> Option<&str> {
        self.cli_session_id.as_deref()
    }

    /// Tool calls still awaiting a result.
    #[must_use]
    pub fn pending_tools(&self) -> &ToolTracker {
        &self.tools
    }

    /// Return to the initial state, keeping the marker-scan denylist.
    pub fn reset(&mut self) {
        self.thinking.reset();
        self.tools.clear();
        self.cli_session_id = None;
    }

    // ── Envelope handlers ─────────────────────────────────────────────────

    fn on_system(&mut self, session_id: Option<String>) -> Vec<ParsedEvent> {
        match session_id {
            Some(session_id) => {
                self.cli_session_id = Some(session_id.clone());
                vec![ParsedEvent::SessionId { session_id }]
            }
            None => Vec::new(),
        }
    }

    fn on_stream_event(&mut self, event: StreamEvent) -> Vec<ParsedEvent> {
        match event.kind.as_str() {
            "content_block_delta" => {
                let Some(text) = event.delta.and_then(|delta| delta.text) else {
                    return Vec::new();
                };
                self.thinking
                    .process(&text)
                    .into_iter()
                    .map(chunk_to_event)
                    .collect()
            }
            "content_block_start" => {
                let Some(block) = event.content_block else {
                    return Vec::new();
                };
                match serde_json::from_value::<ContentBlock>(block) {
                    Ok(ContentBlock::ToolUse { id, name, .. }) => {
                        vec![ParsedEvent::ToolUseDetected { id, name }]
                    }
                    Ok(_) => Vec::new(),
                    Err(err) => {
                        debug!(%err, "line parser: unreadable content_block_start, skipping");
                        Vec::new()
                    }
                }
            }
            "message_stop" => vec![ParsedEvent::MessageStop],
            _ => Vec::new(),
        }
    }

    fn on_assistant(&mut self, message: Option<MessageBody>) -> Vec<ParsedEvent> {
        let mut events = Vec::new();
        for block in content_blocks(message) {
            if let ContentBlock::ToolUse { id, name, input } = block {
                self.tools.register(&id, &name, input.clone());
                events.push(ParsedEvent::ToolStart { id, name, input });
            }
        }
        events
    }

    fn on_user(&mut self, message: Option<MessageBody>) -> Vec<ParsedEvent> {
        let mut events = Vec::new();
        for block in content_blocks(message) {
            let ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } = block
            else {
                continue;
            };

            let info = self
                .tools
                .complete(&tool_use_id)
                .unwrap_or_else(ToolInfo::unknown);
            let content = content.map(ToolResultContent::into_text).unwrap_or_default();

            let cleaned_content = if !info.skip_marker_scan && markers::has_markers(&content) {
                let result = markers::detect(&content);
                events.extend(result.markers.into_iter().map(ParsedEvent::from));
                result.cleaned_content
            } else {
                content.clone()
            };

            events.push(ParsedEvent::ToolResult {
                id: tool_use_id,
                name: info.name,
                input: info.input,
                content,
                cleaned_content,
                is_error,
            });
        }
        events
    }

    fn on_result(&mut self, session_id: Option<String>) -> Vec<ParsedEvent> {
        let mut events = Vec::new();
        if let Some(session_id) = session_id {
            if self.cli_session_id.as_deref() != Some(session_id.as_str()) {
                self.cli_session_id = Some(session_id.clone());
                events.push(ParsedEvent::SessionId { session_id });
            }
        }
        events.push(ParsedEvent::StreamComplete);
        events
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn chunk_to_event(chunk: ThinkingChunk) -> ParsedEvent {
    match chunk.kind {
        ChunkKind::Thinking => ParsedEvent::ThinkingChunk {
            content: chunk.content,
        },
        ChunkKind::Text => ParsedEvent::TextChunk {
            content: chunk.content,
        },
    }
}

/// Decode the content blocks of a message, skipping any that do not parse.
fn content_blocks(message: Option<MessageBody>) -> Vec<ContentBlock> {
    let Some(Value::Array(blocks)) = message.and_then(|m| m.content) else {
        return Vec::new();
    };
    blocks
        .into_iter()
        .filter_map(|block| match serde_json::from_value::<ContentBlock>(block) {
            Ok(block) => Some(block),
            Err(err) => {
                debug!(%err, "line parser: unreadable content block, skipping");
                None
            }
        })
        .collect()
}

fn preview(line: &str) -> String {
    match line.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}…", &line[..cut]),
        None => line.to_owned(),
    }
}
