//! HTTP/WebSocket surface for pollers.
//!
//! Each poller connection to `/ws/stream` carries exactly one turn. The
//! first frame must be the `init` envelope; everything after it is handed
//! to a [`StreamSession`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{self, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GlobalConfig;
use crate::services::Services;
use crate::session::transport::{CloseFrame, Transport, CLOSE_POLICY_VIOLATION};
use crate::session::{SessionContext, StreamSession};
use crate::stream::control;
use crate::{AppError, Result};

/// Shared state for every connection.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<GlobalConfig>,
    /// Collaborators handed to each session.
    pub services: Services,
}

/// Handler for `GET /health`.
async fn health() -> &'static str {
    "ok"
}

/// Build the router: `/ws/stream` and `/health`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/stream", get(stream_upgrade))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve pollers until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the listener cannot bind, or
/// `AppError::Transport` if the server stops with an error.
pub async fn serve(state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let host = state.config.http_host.clone();
    let port = state.config.http_port;
    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .map_err(|err| AppError::Config(format!("failed to bind {host}:{port}: {err}")))?;

    info!(%host, port, "stream server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            ct.cancelled().await;
        })
        .await
        .map_err(|err| AppError::Transport(format!("stream server error: {err}")))?;

    info!("stream server stopped");
    Ok(())
}

async fn stream_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let mut transport = WebSocketTransport::new(socket);
    let Some(context) = accept_init(&mut transport, state.config.init_timeout()).await else {
        return;
    };

    let session = StreamSession::new(context, &state.config, state.services.clone());
    let report = session.run(transport).await;
    debug!(outcome = ?report.outcome, "poller connection finished");
}

/// Wait for the `init` envelope that opens a connection.
///
/// Closes the transport with 1008 and returns `None` when the first frame is
/// missing, late, or malformed.
pub async fn accept_init<T: Transport>(
    transport: &mut T,
    timeout: Duration,
) -> Option<SessionContext> {
    let reason = match tokio::time::timeout(timeout, transport.recv()).await {
        Ok(Some(frame)) => match control::parse_init(&frame) {
            Ok(init) => return Some(SessionContext::from(init)),
            Err(err) => {
                warn!(%err, "rejecting connection");
                "invalid init"
            }
        },
        Ok(None) => {
            debug!("poller left before sending init");
            return None;
        }
        Err(_) => {
            warn!(?timeout, "init envelope not received in time");
            "invalid init"
        }
    };

    if let Err(err) = transport
        .close(CloseFrame::new(CLOSE_POLICY_VIOLATION, reason))
        .await
    {
        debug!(%err, "close after init rejection failed");
    }
    None
}

/// [`Transport`] over an axum WebSocket.
pub struct WebSocketTransport {
    socket: WebSocket,
}

impl WebSocketTransport {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl Transport for WebSocketTransport {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        Box::pin(async move {
            loop {
                match self.socket.next().await? {
                    Ok(Message::Text(text)) => return Some(text.as_str().to_owned()),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => return Some(text),
                        Err(err) => warn!(%err, "dropping non-utf8 binary frame"),
                    },
                    Ok(Message::Ping(_) | Message::Pong(_)) => {}
                    Ok(Message::Close(frame)) => {
                        debug!(code = ?frame.map(|f| f.code), "poller closed socket");
                        return None;
                    }
                    Err(err) => {
                        warn!(%err, "websocket receive failed");
                        return None;
                    }
                }
            }
        })
    }

    fn close(&mut self, frame: CloseFrame) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.socket
                .send(Message::Close(Some(ws::CloseFrame {
                    code: frame.code,
                    reason: frame.reason.into(),
                })))
                .await
                .map_err(|err| AppError::Transport(format!("websocket close failed: {err}")))
        })
    }
}
