//! Typed events reconstructed from the NDJSON transcript.

use serde_json::{Map, Value};

use crate::stream::markers::{DetectedMarker, MarkerType};

/// One semantic event derived from a transcript line.
///
/// Events are produced in line-arrival order and never reordered; within a
/// line they follow the order of the content blocks that produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    /// Upstream CLI session identifier seen (new or changed).
    SessionId {
        /// CLI session id.
        session_id: String,
    },
    /// Commentary text from inside a `<thinking>` span.
    ThinkingChunk {
        /// Commentary text.
        content: String,
    },
    /// Reply text.
    TextChunk {
        /// Reply text.
        content: String,
    },
    /// A tool-use content block started streaming.
    ToolUseDetected {
        /// Call id.
        id: String,
        /// Tool name.
        name: String,
    },
    /// A complete tool invocation was announced.
    ToolStart {
        /// Call id.
        id: String,
        /// Tool name.
        name: String,
        /// Input arguments.
        input: Map<String, Value>,
    },
    /// A tool returned.
    ToolResult {
        /// Call id.
        id: String,
        /// Tool name (`unknown` when the call was never announced).
        name: String,
        /// Input arguments of the matching call.
        input: Map<String, Value>,
        /// Result text exactly as returned.
        content: String,
        /// Result text with marker spans removed.
        cleaned_content: String,
        /// Whether the CLI flagged the result as an error.
        is_error: bool,
    },
    /// Chart marker found in a tool result.
    ChartDetected {
        /// Marker body.
        data: Map<String, Value>,
        /// Marker body as raw text.
        raw_json: String,
    },
    /// Research marker found in a tool result.
    ResearchDetected {
        /// Marker body.
        data: Map<String, Value>,
        /// Marker body as raw text.
        raw_json: String,
    },
    /// Scene marker found in a tool result.
    SceneDetected {
        /// Marker body.
        data: Map<String, Value>,
        /// Marker body as raw text.
        raw_json: String,
    },
    /// Component-update marker found in a tool result.
    ComponentUpdateDetected {
        /// Marker body.
        data: Map<String, Value>,
        /// Marker body as raw text.
        raw_json: String,
    },
    /// The model finished one message.
    MessageStop,
    /// The CLI reported its final result; the turn is over.
    StreamComplete,
    /// A line could not be parsed; processing continues.
    ParseError {
        /// Parser diagnostic.
        error: String,
        /// Truncated copy of the offending line.
        preview: String,
    },
}

impl ParsedEvent {
    /// Stable snake-case name, used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionId { .. } => "session_id",
            Self::ThinkingChunk { .. } => "thinking_chunk",
            Self::TextChunk { .. } => "text_chunk",
            Self::ToolUseDetected { .. } => "tool_use_detected",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolResult { .. } => "tool_result",
            Self::ChartDetected { .. } => "chart_detected",
            Self::ResearchDetected { .. } => "research_detected",
            Self::SceneDetected { .. } => "scene_detected",
            Self::ComponentUpdateDetected { .. } => "component_update_detected",
            Self::MessageStop => "message_stop",
            Self::StreamComplete => "stream_complete",
            Self::ParseError { .. } => "parse_error",
        }
    }

    /// Whether this event carries user-visible content.
    #[must_use]
    pub fn is_content(&self) -> bool {
        matches!(
            self,
            Self::TextChunk { .. } | Self::ThinkingChunk { .. } | Self::ToolStart { .. }
        )
    }
}

impl From<DetectedMarker> for ParsedEvent {
    fn from(marker: DetectedMarker) -> Self {
        let DetectedMarker {
            marker_type,
            data,
            raw_json,
        } = marker;
        match marker_type {
            MarkerType::Chart => Self::ChartDetected { data, raw_json },
            MarkerType::Research => Self::ResearchDetected { data, raw_json },
            MarkerType::Scene => Self::SceneDetected { data, raw_json },
            MarkerType::ComponentUpdate => Self::ComponentUpdateDetected { data, raw_json },
        }
    }
}
