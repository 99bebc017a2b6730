//! Per-session identity, lifecycle flags and counters.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::stream::control::{ControlKind, InitEnvelope, TtsSettings, TurnSource};
use crate::stream::ParsedEvent;

/// Identity and options of one streamed turn, taken from the init envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    /// Application user the reply is for.
    pub user_id: String,
    /// Application conversation id.
    pub session_id: String,
    /// Display name of the assistant persona.
    pub character_name: String,
    /// Speech options; speech is off when absent or disabled.
    pub tts_settings: Option<TtsSettings>,
    /// Where the turn came from; selects the emitter.
    pub source: TurnSource,
    /// CLI session id from the previous turn, if resuming.
    pub prior_session_id: Option<String>,
}

impl From<InitEnvelope> for SessionContext {
    fn from(init: InitEnvelope) -> Self {
        Self {
            user_id: init.user_id,
            session_id: init.session_id,
            character_name: init.character_name,
            tts_settings: init.tts_settings,
            source: init.source,
            prior_session_id: init.prior_session_id,
        }
    }
}

/// Lifecycle flags of a session.
///
/// At most one of `completed` and `error_emitted` is ever set, and once either
/// is set the session is terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    /// A close has been requested on the transport.
    pub closed: bool,
    /// The turn finished and was finalized.
    pub completed: bool,
    /// A terminal error was reported.
    pub error_emitted: bool,
    /// The transport went away before the turn finished.
    pub disconnect_detected: bool,
    /// When the last non-blank line arrived.
    pub last_line_at: Option<DateTime<Utc>>,
    /// Most recent control envelope seen.
    pub last_control: Option<ControlKind>,
}

impl SessionState {
    /// Whether the session has completed or errored.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.completed || self.error_emitted
    }
}

/// Counters reported in the completion and error logs.
#[derive(Debug, Clone)]
pub struct SessionStats {
    started_at: Instant,
    first_content_at: Option<Instant>,
    /// Non-blank lines processed.
    pub line_count: u64,
    /// Events dispatched to the emitter.
    pub event_count: u64,
    /// Lines that could not be parsed.
    pub parse_errors: u64,
}

impl SessionStats {
    /// Start counting now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            first_content_at: None,
            line_count: 0,
            event_count: 0,
            parse_errors: 0,
        }
    }

    /// Count one dispatched event.
    pub fn record(&mut self, event: &ParsedEvent) {
        self.event_count += 1;
        if matches!(event, ParsedEvent::ParseError { .. }) {
            self.parse_errors += 1;
        }
        if event.is_content() && self.first_content_at.is_none() {
            self.first_content_at = Some(Instant::now());
        }
    }

    /// Time since the session started.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Delay between session start and the first content event.
    #[must_use]
    pub fn time_to_first_content(&self) -> Option<Duration> {
        self.first_content_at
            .map(|at| at.duration_since(self.started_at))
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The turn was finalized.
    Completed,
    /// A terminal error was reported with `code`.
    Errored {
        /// Error code passed to the emitter.
        code: String,
    },
}

/// Summary returned when a session finishes.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Terminal outcome.
    pub outcome: SessionOutcome,
    /// Final lifecycle flags.
    pub state: SessionState,
    /// Final counters.
    pub stats: SessionStats,
}
