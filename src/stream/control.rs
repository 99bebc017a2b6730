//! Control envelopes exchanged with the poller outside the NDJSON grammar.
//!
//! | Envelope   | Shape                                                        |
//! |------------|--------------------------------------------------------------|
//! | `init`     | `{type, user_id, session_id, ai_character_name, source, …}`  |
//! | `error`    | `{type:"error", code, message}`                              |
//! | `complete` | `{type:"complete", exit_code}`                               |
//!
//! `init` is only valid as the first frame of a connection. `error` and
//! `complete` may arrive interleaved with transcript lines and are detected
//! with a cheap substring check before the strict parse, so that ordinary
//! transcript lines never pay for a second JSON parse.

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Origin of the user turn that produced this stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnSource {
    /// Typed user message.
    Text,
    /// Transcribed voice input.
    AudioTranscription,
    /// Scheduled silent self-check.
    Heartbeat,
    /// Any source this build does not know; handled like a user turn.
    #[serde(other)]
    Other,
}

impl TurnSource {
    /// Wire name of the source.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::AudioTranscription => "audio_transcription",
            Self::Heartbeat => "heartbeat",
            Self::Other => "other",
        }
    }
}

/// Text-to-speech preferences forwarded with the init envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TtsSettings {
    /// Whether the reply should be spoken.
    #[serde(default)]
    pub enabled: bool,
    /// Voice identifier understood by the TTS collaborator.
    #[serde(default)]
    pub voice: Option<String>,
    /// Provider-specific extras passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// First frame of every connection.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InitEnvelope {
    /// Owning user.
    pub user_id: String,
    /// Conversation session the turn belongs to.
    pub session_id: String,
    /// Persona name shown alongside streamed content.
    #[serde(rename = "ai_character_name")]
    pub character_name: String,
    /// Optional speech settings.
    #[serde(default)]
    pub tts_settings: Option<TtsSettings>,
    /// Turn origin; `heartbeat` selects the silent emitter, anything else
    /// the interactive one.
    pub source: TurnSource,
    /// CLI session id of the previous turn, when resuming.
    #[serde(default, rename = "claude_session_id")]
    pub prior_session_id: Option<String>,
}

/// Mid-stream control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// The poller aborted the turn.
    Error {
        /// Machine-readable error code.
        code: String,
        /// Diagnostic message.
        message: String,
    },
    /// The CLI process exited; the transcript is complete.
    Complete {
        /// Process exit code.
        exit_code: i32,
    },
}

/// Kind of the last control message seen, kept for diagnostics.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    /// `init` envelope.
    Init,
    /// `error` envelope.
    Error,
    /// `complete` envelope.
    Complete,
}

impl ControlMessage {
    /// Kind tag of this message.
    #[must_use]
    pub fn kind(&self) -> ControlKind {
        match self {
            Self::Error { .. } => ControlKind::Error,
            Self::Complete { .. } => ControlKind::Complete,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InitWire {
    Init(InitEnvelope),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlWire {
    Error { code: String, message: String },
    Complete { exit_code: i32 },
}

/// Parse the `init` envelope that opens a connection.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] when the frame is not a well-formed `init`
/// envelope.
pub fn parse_init(frame: &str) -> Result<InitEnvelope> {
    let InitWire::Init(init) = serde_json::from_str::<InitWire>(frame.trim())
        .map_err(|e| AppError::Protocol(format!("invalid init envelope: {e}")))?;
    Ok(init)
}

/// Recognise an `error` or `complete` envelope.
///
/// Returns `None` for anything else, including lines that look like a
/// control envelope but fail the strict parse; those continue into the
/// NDJSON grammar unchanged.
#[must_use]
pub fn recognize(line: &str) -> Option<ControlMessage> {
    if !looks_like_control(line) {
        return None;
    }

    match serde_json::from_str::<ControlWire>(line) {
        Ok(ControlWire::Error { code, message }) => Some(ControlMessage::Error { code, message }),
        Ok(ControlWire::Complete { exit_code }) => Some(ControlMessage::Complete { exit_code }),
        Err(_) => None,
    }
}

fn looks_like_control(line: &str) -> bool {
    line.contains("\"type\"") && (line.contains("\"error\"") || line.contains("\"complete\""))
}
