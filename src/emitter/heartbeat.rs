//! Emitter for silent heartbeat turns.
//!
//! Nothing is pushed or persisted while the turn streams. At the end the
//! reply is checked for the all-clear sentinel (outside commentary spans,
//! case-insensitively); only a reply without it is forwarded, tags and all,
//! so the notifier can recover the reasoning behind the finding.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::services::Services;
use crate::session::state::SessionContext;
use crate::stream::ParsedEvent;
use crate::Result;

static THINKING_SPAN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<thinking>.*?(?:</thinking>|\z)").ok());

/// Remove every `<thinking>…</thinking>` span; an unclosed span runs to the end.
#[must_use]
pub fn strip_thinking(text: &str) -> String {
    match THINKING_SPAN.as_ref() {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_owned(),
    }
}

/// Emitter for `heartbeat` turns.
pub struct HeartbeatEmitter {
    context: SessionContext,
    services: Services,
    sentinel: String,
    text: String,
    error_emitted: bool,
}

impl HeartbeatEmitter {
    /// Create an emitter that treats `sentinel` as the all-clear token.
    #[must_use]
    pub fn new(context: SessionContext, services: Services, sentinel: &str) -> Self {
        Self {
            context,
            services,
            sentinel: sentinel.to_lowercase(),
            text: String::new(),
            error_emitted: false,
        }
    }

    /// Reply text streamed so far (commentary excluded).
    #[must_use]
    pub fn accumulated_text(&self) -> &str {
        &self.text
    }

    /// Accumulate reply text silently; every other event is ignored. The
    /// verdict itself waits for [`finalize`](Self::finalize).
    pub fn handle(&mut self, event: &ParsedEvent) {
        match event {
            ParsedEvent::TextChunk { content } => self.text.push_str(content),
            ParsedEvent::ParseError { error, preview } => {
                debug!(%error, %preview, "heartbeat: skipping unparseable line");
            }
            ParsedEvent::SessionId { .. }
            | ParsedEvent::ThinkingChunk { .. }
            | ParsedEvent::ToolUseDetected { .. }
            | ParsedEvent::ToolStart { .. }
            | ParsedEvent::ToolResult { .. }
            | ParsedEvent::ChartDetected { .. }
            | ParsedEvent::ResearchDetected { .. }
            | ParsedEvent::SceneDetected { .. }
            | ParsedEvent::ComponentUpdateDetected { .. }
            | ParsedEvent::MessageStop
            | ParsedEvent::StreamComplete => {}
        }
    }

    /// Forward the reply unless it carries the all-clear sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Collaborator`](crate::AppError::Collaborator) if the
    /// notifier fails.
    pub async fn finalize(&mut self, full_text: &str) -> Result<()> {
        let clean = strip_thinking(full_text);
        let streamed_chars = self.text.chars().count();
        if clean.to_lowercase().contains(&self.sentinel) {
            info!(streamed_chars, "heartbeat all clear");
            return Ok(());
        }

        if clean != self.text {
            debug!(
                streamed_chars,
                final_chars = clean.chars().count(),
                "heartbeat final text differs from streamed chunks"
            );
        }
        info!(
            chars = clean.chars().count(),
            streamed_chars,
            "heartbeat found something, forwarding"
        );
        self.services
            .heartbeat
            .notify(&self.context.user_id, &self.context.session_id, full_text)
            .await
    }

    /// Log a terminal error; the scheduler retries on its next cycle. Idempotent.
    pub fn emit_error(&mut self, code: &str, message: &str) {
        if self.error_emitted {
            return;
        }
        self.error_emitted = true;
        warn!(code, detail = message, "heartbeat turn failed, leaving it to the next cycle");
    }
}
