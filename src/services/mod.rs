//! External collaborator interfaces consumed by the emitters.
//!
//! The stream processor never pushes to UI clients, persists messages, or
//! speaks text itself. It calls narrow collaborator traits instead, bundled
//! in a cloneable [`Services`] value that is injected per process. Two
//! lock-protected registries (active TTS sessions, per-user job limits) live
//! here too, so that tests can build fully isolated instances.

pub mod logging;
pub mod registry;
pub mod requests;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::stream::control::{TtsSettings, TurnSource};
use crate::Result;

pub use registry::{JobKind, JobLimiter, JobPermit, TtsRegistry};
pub use requests::{ChartRequest, ResearchRequest};

/// Boxed future returned by collaborator methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

// ── Data carried across the collaborator boundary ─────────────────────────────

/// Notification pushed to a user's connected UI clients.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// The assistant began replying.
    StreamStarted {
        /// Conversation session.
        session_id: String,
        /// Persona name.
        character_name: String,
    },
    /// Reply text chunk.
    TextChunk {
        /// Conversation session.
        session_id: String,
        /// Text.
        content: String,
    },
    /// Commentary chunk.
    ThinkingChunk {
        /// Conversation session.
        session_id: String,
        /// Commentary text.
        content: String,
    },
    /// A tool call began.
    ToolStart {
        /// Conversation session.
        session_id: String,
        /// Call id.
        tool_id: String,
        /// Tool name.
        tool_name: String,
        /// Input arguments.
        input: Map<String, Value>,
    },
    /// A tool call returned.
    ToolResult {
        /// Conversation session.
        session_id: String,
        /// Call id.
        tool_id: String,
        /// Tool name.
        tool_name: String,
        /// Result text with markers removed.
        content: String,
        /// Whether the tool reported failure.
        is_error: bool,
    },
    /// Scene change requested by a marker.
    Scene {
        /// Conversation session.
        session_id: String,
        /// Marker body.
        data: Map<String, Value>,
    },
    /// Component patch requested by a marker.
    ComponentUpdate {
        /// Conversation session.
        session_id: String,
        /// Marker body.
        data: Map<String, Value>,
    },
    /// The reply was persisted.
    StreamComplete {
        /// Conversation session.
        session_id: String,
        /// Persisted message id.
        message_id: String,
        /// Spoken rendition, when TTS was active.
        audio_url: Option<String>,
    },
    /// The turn failed.
    Error {
        /// Conversation session.
        session_id: String,
        /// Machine-readable code.
        code: String,
        /// User-facing explanation.
        message: String,
    },
}

/// Which side of the conversation a message belongs to.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// From the user.
    Inbound,
    /// From the assistant.
    Outbound,
}

/// A message to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    /// Conversation session.
    pub session_id: String,
    /// Owning user.
    pub customer_id: String,
    /// Conversation side.
    pub direction: Direction,
    /// Message text.
    pub content: String,
    /// Origin of the turn.
    pub source: TurnSource,
    /// Spoken rendition, if any.
    pub audio_url: Option<String>,
    /// CLI session id that produced the reply.
    pub cli_session_id: Option<String>,
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Record id.
    pub id: String,
    /// Persist time.
    pub created_at: DateTime<Utc>,
}

// ── Collaborator traits ───────────────────────────────────────────────────────

/// Fan-out of notifications to a user's UI clients.
pub trait PushChannel: Send + Sync {
    /// Deliver `message` to every client of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Collaborator`](crate::AppError::Collaborator) if delivery fails.
    fn push_to_user(&self, user_id: &str, message: PushMessage) -> BoxFuture<'_, ()>;
}

/// Conversation persistence.
pub trait MessageStore: Send + Sync {
    /// Persist a message and return its record.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Collaborator`](crate::AppError::Collaborator) if the write fails.
    fn create_message(&self, message: NewMessage) -> BoxFuture<'_, StoredMessage>;

    /// Remember the CLI session id so the next turn can resume it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Collaborator`](crate::AppError::Collaborator) if the write fails.
    fn save_cli_session_id(&self, session_id: &str, cli_session_id: &str) -> BoxFuture<'_, ()>;
}

/// Text-to-speech orchestration.
pub trait TtsService: Send + Sync {
    /// Begin a speech session for this turn.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Collaborator`](crate::AppError::Collaborator) on failure.
    fn start(
        &self,
        session_id: &str,
        user_id: &str,
        settings: &TtsSettings,
    ) -> BoxFuture<'_, ()>;

    /// Speak the final reply; returns the audio location when produced.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Collaborator`](crate::AppError::Collaborator) on failure.
    fn complete(
        &self,
        session_id: &str,
        user_id: &str,
        message: &str,
    ) -> BoxFuture<'_, Option<String>>;

    /// Abandon the speech session.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Collaborator`](crate::AppError::Collaborator) on failure.
    fn cancel(&self, session_id: &str, user_id: &str) -> BoxFuture<'_, ()>;
}

/// Chart rendering jobs.
pub trait ChartService: Send + Sync {
    /// Render a chart.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Collaborator`](crate::AppError::Collaborator) on failure.
    fn generate_chart(&self, request: ChartRequest) -> BoxFuture<'_, ()>;
}

/// Deep-research jobs.
pub trait ResearchService: Send + Sync {
    /// Run a research job.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Collaborator`](crate::AppError::Collaborator) on failure.
    fn execute_research(&self, request: ResearchRequest) -> BoxFuture<'_, ()>;
}

/// Automatic session titling.
pub trait SessionNamer: Send + Sync {
    /// Whether the reply just persisted is the session's first response.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Collaborator`](crate::AppError::Collaborator) on lookup failure.
    fn is_first_response(&self, session_id: &str) -> BoxFuture<'_, bool>;

    /// Generate and store a title for the session.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Collaborator`](crate::AppError::Collaborator) on failure.
    fn name_session(&self, session_id: &str, user_id: &str) -> BoxFuture<'_, ()>;
}

/// Delivery of noteworthy heartbeat findings.
pub trait HeartbeatNotifier: Send + Sync {
    /// Forward a heartbeat reply (commentary tags included).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Collaborator`](crate::AppError::Collaborator) on failure.
    fn notify(&self, user_id: &str, session_id: &str, text: &str) -> BoxFuture<'_, ()>;
}

// ── Bundle ────────────────────────────────────────────────────────────────────

/// Every collaborator a session may call, plus the shared registries.
#[derive(Clone)]
pub struct Services {
    /// UI fan-out.
    pub push: Arc<dyn PushChannel>,
    /// Persistence.
    pub messages: Arc<dyn MessageStore>,
    /// Speech.
    pub tts: Arc<dyn TtsService>,
    /// Charts.
    pub charts: Arc<dyn ChartService>,
    /// Research.
    pub research: Arc<dyn ResearchService>,
    /// Session titling.
    pub naming: Arc<dyn SessionNamer>,
    /// Heartbeat findings.
    pub heartbeat: Arc<dyn HeartbeatNotifier>,
    /// Active TTS sessions.
    pub tts_registry: Arc<TtsRegistry>,
    /// Per-user job limits.
    pub jobs: Arc<JobLimiter>,
}

impl Services {
    /// Bundle that only logs; used by the binary when no real backends exist.
    #[must_use]
    pub fn log_only(max_jobs_per_user: usize) -> Self {
        let sink = Arc::new(logging::LogOnly);
        Self {
            push: sink.clone(),
            messages: sink.clone(),
            tts: sink.clone(),
            charts: sink.clone(),
            research: sink.clone(),
            naming: sink.clone(),
            heartbeat: sink,
            tts_registry: Arc::new(TtsRegistry::new()),
            jobs: Arc::new(JobLimiter::new(max_jobs_per_user)),
        }
    }
}
