//! Collaborator implementation that records every call in the log.
//!
//! Backs the binary (and `replay`) when no real push, persistence or speech
//! backends are wired in.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::{
    BoxFuture, ChartRequest, ChartService, HeartbeatNotifier, MessageStore, NewMessage,
    PushChannel, PushMessage, ResearchRequest, ResearchService, SessionNamer, StoredMessage,
    TtsService,
};
use crate::stream::control::TtsSettings;

/// Log-only collaborator.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnly;

impl PushChannel for LogOnly {
    fn push_to_user(&self, user_id: &str, message: PushMessage) -> BoxFuture<'_, ()> {
        let user_id = user_id.to_owned();
        Box::pin(async move {
            let payload = serde_json::to_string(&message)?;
            info!(user_id, %payload, "push");
            Ok(())
        })
    }
}

impl MessageStore for LogOnly {
    fn create_message(&self, message: NewMessage) -> BoxFuture<'_, StoredMessage> {
        Box::pin(async move {
            let stored = StoredMessage {
                id: Uuid::new_v4().to_string(),
                created_at: Utc::now(),
            };
            info!(
                message_id = %stored.id,
                session_id = %message.session_id,
                direction = ?message.direction,
                source = message.source.as_str(),
                chars = message.content.chars().count(),
                "message persisted"
            );
            Ok(stored)
        })
    }

    fn save_cli_session_id(&self, session_id: &str, cli_session_id: &str) -> BoxFuture<'_, ()> {
        let session_id = session_id.to_owned();
        let cli_session_id = cli_session_id.to_owned();
        Box::pin(async move {
            info!(session_id, cli_session_id, "cli session id saved");
            Ok(())
        })
    }
}

impl TtsService for LogOnly {
    fn start(
        &self,
        session_id: &str,
        user_id: &str,
        settings: &TtsSettings,
    ) -> BoxFuture<'_, ()> {
        let session_id = session_id.to_owned();
        let user_id = user_id.to_owned();
        let voice = settings.voice.clone();
        Box::pin(async move {
            info!(session_id, user_id, ?voice, "tts started");
            Ok(())
        })
    }

    fn complete(
        &self,
        session_id: &str,
        user_id: &str,
        message: &str,
    ) -> BoxFuture<'_, Option<String>> {
        let session_id = session_id.to_owned();
        let user_id = user_id.to_owned();
        let chars = message.chars().count();
        Box::pin(async move {
            info!(session_id, user_id, chars, "tts completed without audio");
            Ok(None)
        })
    }

    fn cancel(&self, session_id: &str, user_id: &str) -> BoxFuture<'_, ()> {
        let session_id = session_id.to_owned();
        let user_id = user_id.to_owned();
        Box::pin(async move {
            info!(session_id, user_id, "tts cancelled");
            Ok(())
        })
    }
}

impl ChartService for LogOnly {
    fn generate_chart(&self, request: ChartRequest) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            info!(
                session_id = %request.session_id,
                chart_type = %request.chart_type,
                title = %request.title,
                "chart requested"
            );
            Ok(())
        })
    }
}

impl ResearchService for LogOnly {
    fn execute_research(&self, request: ResearchRequest) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            info!(
                session_id = %request.session_id,
                query = %request.query,
                depth = ?request.depth,
                "research requested"
            );
            Ok(())
        })
    }
}

impl SessionNamer for LogOnly {
    fn is_first_response(&self, _session_id: &str) -> BoxFuture<'_, bool> {
        Box::pin(async { Ok(false) })
    }

    fn name_session(&self, session_id: &str, user_id: &str) -> BoxFuture<'_, ()> {
        let session_id = session_id.to_owned();
        let user_id = user_id.to_owned();
        Box::pin(async move {
            info!(session_id, user_id, "session naming requested");
            Ok(())
        })
    }
}

impl HeartbeatNotifier for LogOnly {
    fn notify(&self, user_id: &str, session_id: &str, text: &str) -> BoxFuture<'_, ()> {
        let user_id = user_id.to_owned();
        let session_id = session_id.to_owned();
        let chars = text.chars().count();
        Box::pin(async move {
            info!(user_id, session_id, chars, "heartbeat finding forwarded");
            Ok(())
        })
    }
}
