#![forbid(unsafe_code)]

//! `sherlock-stream`: streaming protocol processor binary.
//!
//! `serve` (the default) accepts poller connections over WebSocket.
//! `replay` feeds a recorded NDJSON transcript through a full session with
//! log-only collaborators, which is handy for checking what a transcript
//! turns into without a poller.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

use sherlock_stream::config::GlobalConfig;
use sherlock_stream::server::{self, AppState};
use sherlock_stream::services::Services;
use sherlock_stream::session::{ChannelTransport, SessionContext, StreamSession};
use sherlock_stream::stream::control::TurnSource;
use sherlock_stream::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum SourceArg {
    Text,
    AudioTranscription,
    Heartbeat,
}

impl From<SourceArg> for TurnSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Text => Self::Text,
            SourceArg::AudioTranscription => Self::AudioTranscription,
            SourceArg::Heartbeat => Self::Heartbeat,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "sherlock-stream", about = "Streaming protocol processor for LLM CLI turns", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Accept poller connections (default).
    Serve,
    /// Run a recorded NDJSON transcript through one session.
    Replay {
        /// Transcript file, one NDJSON line per transcript line.
        #[arg(long)]
        file: PathBuf,

        /// Turn source; `heartbeat` selects the silent emitter.
        #[arg(long, value_enum, default_value_t = SourceArg::Text)]
        source: SourceArg,

        /// User the turn belongs to.
        #[arg(long, default_value = "replay-user")]
        user_id: String,

        /// Application session id.
        #[arg(long, default_value = "replay-session")]
        session_id: String,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    let config = Arc::new(config);
    info!(
        queue_capacity = config.stream.queue_capacity,
        push_timeout_ms = config.stream.push_timeout_ms,
        "configuration loaded"
    );

    let services = Services::log_only(config.jobs.max_concurrent_per_user);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, services).await,
        Command::Replay {
            file,
            source,
            user_id,
            session_id,
        } => {
            let context = SessionContext {
                user_id,
                session_id,
                character_name: "Sherlock".into(),
                tts_settings: None,
                source: source.into(),
                prior_session_id: None,
            };
            replay(&config, services, context, file).await
        }
    }
}

async fn serve(config: Arc<GlobalConfig>, services: Services) -> Result<()> {
    let ct = CancellationToken::new();
    let state = Arc::new(AppState { config, services });

    let server_ct = ct.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(err) = server::serve(state, server_ct).await {
            error!(%err, "stream server failed");
        }
    });

    info!("sherlock-stream ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    let _ = server_handle.await;
    info!("sherlock-stream shut down");
    Ok(())
}

async fn replay(
    config: &GlobalConfig,
    services: Services,
    context: SessionContext,
    file: PathBuf,
) -> Result<()> {
    let transcript = tokio::fs::read_to_string(&file).await.map_err(|err| {
        AppError::Config(format!("cannot read transcript {}: {err}", file.display()))
    })?;

    let (transport, peer) = ChannelTransport::pair(config.stream.queue_capacity);
    let session = StreamSession::new(context, config, services);
    let handle = tokio::spawn(session.run(transport));

    let mut sent = 0_usize;
    for line in transcript.lines() {
        if peer.send(line).await.is_err() {
            debug!(sent, "session closed before transcript ended");
            break;
        }
        sent += 1;
    }
    // Dropping the peer ends the transport, like a poller disconnecting.
    drop(peer);

    let report = handle
        .await
        .map_err(|err| AppError::Transport(format!("replay session failed: {err}")))?;
    info!(
        outcome = ?report.outcome,
        lines = report.stats.line_count,
        events = report.stats.event_count,
        parse_errors = report.stats.parse_errors,
        "replay finished"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
