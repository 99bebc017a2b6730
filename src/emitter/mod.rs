//! Consumption strategies for parsed events.
//!
//! A session picks one [`Emitter`] at construction, from the turn source in
//! the init envelope, and keeps it for its whole life.

pub mod heartbeat;
pub mod interactive;
pub mod messages;

use crate::services::Services;
use crate::session::state::SessionContext;
use crate::stream::control::TurnSource;
use crate::stream::ParsedEvent;
use crate::Result;

pub use heartbeat::HeartbeatEmitter;
pub use interactive::InteractiveEmitter;

/// Active consumer strategy for one session.
pub enum Emitter {
    /// User-facing turn: push, persist, speak.
    Interactive(InteractiveEmitter),
    /// Silent self-check: act only when the all-clear sentinel is missing.
    Heartbeat(HeartbeatEmitter),
}

impl Emitter {
    /// Select the strategy for `context.source`.
    #[must_use]
    pub fn for_context(context: SessionContext, services: Services, sentinel: &str) -> Self {
        match context.source {
            TurnSource::Heartbeat => {
                Self::Heartbeat(HeartbeatEmitter::new(context, services, sentinel))
            }
            TurnSource::Text | TurnSource::AudioTranscription | TurnSource::Other => {
                Self::Interactive(InteractiveEmitter::new(context, services))
            }
        }
    }

    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Interactive(_) => "interactive",
            Self::Heartbeat(_) => "heartbeat",
        }
    }

    /// Dispatch one event.
    ///
    /// # Errors
    ///
    /// Propagates collaborator failures from the interactive strategy.
    pub async fn handle(&mut self, event: &ParsedEvent) -> Result<()> {
        match self {
            Self::Interactive(emitter) => emitter.handle(event).await,
            Self::Heartbeat(emitter) => {
                emitter.handle(event);
                Ok(())
            }
        }
    }

    /// Finish the turn with the accumulated full text (commentary tags included).
    ///
    /// # Errors
    ///
    /// Propagates collaborator failures.
    pub async fn finalize(&mut self, full_text: &str) -> Result<()> {
        match self {
            Self::Interactive(emitter) => emitter.finalize(full_text).await,
            Self::Heartbeat(emitter) => emitter.finalize(full_text).await,
        }
    }

    /// Report a terminal error. Idempotent.
    pub async fn emit_error(&mut self, code: &str, message: &str) {
        match self {
            Self::Interactive(emitter) => emitter.emit_error(code, message).await,
            Self::Heartbeat(emitter) => emitter.emit_error(code, message),
        }
    }
}
