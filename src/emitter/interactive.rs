//! Emitter for user-facing turns.
//!
//! Bridges parsed events to push notifications, persistence, speech and
//! marker-triggered jobs. The first content-bearing event fires a one-time
//! "stream started" side effect (UI notice plus TTS start when enabled).

use tracing::{debug, info, warn};

use crate::emitter::messages::user_message;
use crate::services::{
    ChartRequest, Direction, JobKind, NewMessage, PushMessage, ResearchRequest, Services,
};
use crate::session::state::SessionContext;
use crate::stream::ParsedEvent;
use crate::Result;

/// Emitter for `text` and `audio_transcription` turns.
pub struct InteractiveEmitter {
    context: SessionContext,
    services: Services,
    stream_started: bool,
    error_emitted: bool,
    cli_session_id: Option<String>,
}

impl InteractiveEmitter {
    /// Create an emitter for one turn.
    #[must_use]
    pub fn new(context: SessionContext, services: Services) -> Self {
        Self {
            context,
            services,
            stream_started: false,
            error_emitted: false,
            cli_session_id: None,
        }
    }

    /// Whether the "stream started" side effect has fired.
    #[must_use]
    pub fn stream_started(&self) -> bool {
        self.stream_started
    }

    /// Dispatch one event to its collaborator.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Collaborator`](crate::AppError::Collaborator) if a
    /// push or persistence call fails.
    pub async fn handle(&mut self, event: &ParsedEvent) -> Result<()> {
        if event.is_content() && !self.stream_started {
            self.start_stream().await?;
        }

        let session_id = self.context.session_id.clone();
        match event {
            ParsedEvent::TextChunk { content } => {
                self.push(PushMessage::TextChunk {
                    session_id,
                    content: content.clone(),
                })
                .await
            }
            ParsedEvent::ThinkingChunk { content } => {
                self.push(PushMessage::ThinkingChunk {
                    session_id,
                    content: content.clone(),
                })
                .await
            }
            ParsedEvent::ToolStart { id, name, input } => {
                self.push(PushMessage::ToolStart {
                    session_id,
                    tool_id: id.clone(),
                    tool_name: name.clone(),
                    input: input.clone(),
                })
                .await
            }
            ParsedEvent::ToolResult {
                id,
                name,
                cleaned_content,
                is_error,
                ..
            } => {
                self.push(PushMessage::ToolResult {
                    session_id,
                    tool_id: id.clone(),
                    tool_name: name.clone(),
                    content: cleaned_content.clone(),
                    is_error: *is_error,
                })
                .await
            }
            ParsedEvent::ChartDetected { data, .. } => {
                self.spawn_chart(data);
                Ok(())
            }
            ParsedEvent::ResearchDetected { data, .. } => {
                self.spawn_research(data);
                Ok(())
            }
            ParsedEvent::SceneDetected { data, .. } => {
                self.push(PushMessage::Scene {
                    session_id,
                    data: data.clone(),
                })
                .await
            }
            ParsedEvent::ComponentUpdateDetected { data, .. } => {
                self.push(PushMessage::ComponentUpdate {
                    session_id,
                    data: data.clone(),
                })
                .await
            }
            ParsedEvent::SessionId {
                session_id: cli_session_id,
            } => {
                self.cli_session_id = Some(cli_session_id.clone());
                self.services
                    .messages
                    .save_cli_session_id(&session_id, cli_session_id)
                    .await
            }
            ParsedEvent::ToolUseDetected { id, name } => {
                debug!(tool_id = %id, tool_name = %name, "tool use streaming");
                Ok(())
            }
            ParsedEvent::MessageStop | ParsedEvent::StreamComplete => Ok(()),
            ParsedEvent::ParseError { error, preview } => {
                warn!(%error, %preview, "skipping unparseable transcript line");
                Ok(())
            }
        }
    }

    /// Persist the final reply, finish speech, and notify the user.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Collaborator`](crate::AppError::Collaborator) if
    /// persistence or the completion push fails. Speech and naming failures
    /// are logged only.
    pub async fn finalize(&mut self, full_text: &str) -> Result<()> {
        let ctx = &self.context;

        let audio_url = if self.services.tts_registry.remove(&ctx.session_id).is_some() {
            match self
                .services
                .tts
                .complete(&ctx.session_id, &ctx.user_id, full_text)
                .await
            {
                Ok(url) => url,
                Err(err) => {
                    warn!(%err, "tts completion failed, persisting without audio");
                    None
                }
            }
        } else {
            None
        };

        let stored = self
            .services
            .messages
            .create_message(NewMessage {
                session_id: ctx.session_id.clone(),
                customer_id: ctx.user_id.clone(),
                direction: Direction::Outbound,
                content: full_text.to_owned(),
                source: ctx.source,
                audio_url: audio_url.clone(),
                cli_session_id: self.cli_session_id.clone(),
            })
            .await?;

        self.push(PushMessage::StreamComplete {
            session_id: ctx.session_id.clone(),
            message_id: stored.id.clone(),
            audio_url,
        })
        .await?;

        self.schedule_naming().await;
        Ok(())
    }

    /// Report a terminal error to the user. Idempotent.
    pub async fn emit_error(&mut self, code: &str, message: &str) {
        if self.error_emitted {
            return;
        }
        self.error_emitted = true;

        let ctx = &self.context;
        let text = user_message(code);
        warn!(code, detail = message, "reporting stream error to user");

        if let Some(user_id) = self.services.tts_registry.remove(&ctx.session_id) {
            if let Err(err) = self.services.tts.cancel(&ctx.session_id, &user_id).await {
                warn!(%err, "tts cancel failed");
            }
        }

        let notice = PushMessage::Error {
            session_id: ctx.session_id.clone(),
            code: code.to_owned(),
            message: text.to_owned(),
        };
        if let Err(err) = self.services.push.push_to_user(&ctx.user_id, notice).await {
            warn!(%err, "error notification push failed");
        }

        let record = NewMessage {
            session_id: ctx.session_id.clone(),
            customer_id: ctx.user_id.clone(),
            direction: Direction::Outbound,
            content: text.to_owned(),
            source: ctx.source,
            audio_url: None,
            cli_session_id: self.cli_session_id.clone(),
        };
        if let Err(err) = self.services.messages.create_message(record).await {
            warn!(%err, "persisting error message failed");
        }
    }

    // ── Private helpers ───────────────────────────────────────────────────

    async fn push(&self, message: PushMessage) -> Result<()> {
        self.services
            .push
            .push_to_user(&self.context.user_id, message)
            .await
    }

    async fn start_stream(&mut self) -> Result<()> {
        self.stream_started = true;
        let ctx = &self.context;

        if let Some(settings) = ctx.tts_settings.as_ref().filter(|s| s.enabled) {
            match self
                .services
                .tts
                .start(&ctx.session_id, &ctx.user_id, settings)
                .await
            {
                Ok(()) => self
                    .services
                    .tts_registry
                    .register(&ctx.session_id, &ctx.user_id),
                Err(err) => warn!(%err, "tts start failed, continuing without speech"),
            }
        }

        self.push(PushMessage::StreamStarted {
            session_id: ctx.session_id.clone(),
            character_name: ctx.character_name.clone(),
        })
        .await
    }

    fn spawn_chart(&self, data: &serde_json::Map<String, serde_json::Value>) {
        let ctx = &self.context;
        let request = match ChartRequest::from_marker(&ctx.session_id, &ctx.user_id, data) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "dropping chart marker");
                return;
            }
        };
        let Some(permit) = self.services.jobs.try_acquire(&ctx.user_id, JobKind::Chart) else {
            warn!(user_id = %ctx.user_id, "chart job limit reached, dropping marker");
            return;
        };

        let charts = self.services.charts.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let title = request.title.clone();
            match charts.generate_chart(request).await {
                Ok(()) => info!(%title, "chart job finished"),
                Err(err) => warn!(%title, %err, "chart job failed"),
            }
        });
    }

    fn spawn_research(&self, data: &serde_json::Map<String, serde_json::Value>) {
        let ctx = &self.context;
        let request = match ResearchRequest::from_marker(&ctx.session_id, &ctx.user_id, data) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "dropping research marker");
                return;
            }
        };
        let Some(permit) = self
            .services
            .jobs
            .try_acquire(&ctx.user_id, JobKind::Research)
        else {
            warn!(user_id = %ctx.user_id, "research job limit reached, dropping marker");
            return;
        };

        let research = self.services.research.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let query = request.query.clone();
            match research.execute_research(request).await {
                Ok(()) => info!(%query, "research job finished"),
                Err(err) => warn!(%query, %err, "research job failed"),
            }
        });
    }

    async fn schedule_naming(&self) {
        let ctx = &self.context;
        match self.services.naming.is_first_response(&ctx.session_id).await {
            Ok(true) => {
                let naming = self.services.naming.clone();
                let session_id = ctx.session_id.clone();
                let user_id = ctx.user_id.clone();
                tokio::spawn(async move {
                    if let Err(err) = naming.name_session(&session_id, &user_id).await {
                        warn!(session_id, %err, "session naming failed");
                    }
                });
            }
            Ok(false) => {}
            Err(err) => warn!(%err, "session naming check failed"),
        }
    }
}
