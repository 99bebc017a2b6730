//! Duplex text transport abstraction.
//!
//! A session only needs two things from its connection: the next inbound
//! text frame, and a way to close with a status code. [`Transport`] captures
//! exactly that so the session manager can run over a WebSocket in
//! production and over an in-process channel in `replay` and tests.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::{AppError, Result};

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// The peer violated the connection protocol (e.g. bad init envelope).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// The server hit an unexpected condition.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// The server is overloaded; the peer may retry later.
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Status code and reason sent when closing a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// WebSocket-style status code.
    pub code: u16,
    /// Short human-readable reason.
    pub reason: String,
}

impl CloseFrame {
    /// Build a close frame.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Normal closure with `reason`.
    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_NORMAL, reason)
    }
}

/// Connection carrying one turn's frames from the poller.
pub trait Transport: Send + 'static {
    /// Receive the next text frame; `None` once the peer has gone away.
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>>;

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the close frame cannot be sent.
    fn close(&mut self, frame: CloseFrame) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// In-process transport backed by a tokio channel.
///
/// Frames sent through the paired [`ChannelPeer`] are delivered in order;
/// dropping the peer's sender looks like a disconnect.
#[derive(Debug)]
pub struct ChannelTransport {
    frames: mpsc::Receiver<String>,
    closed: watch::Sender<Option<CloseFrame>>,
}

/// Poller side of a [`ChannelTransport`].
#[derive(Debug)]
pub struct ChannelPeer {
    /// Frame sender; drop it to simulate a disconnect.
    pub frames: mpsc::Sender<String>,
    /// Close frame sent by the session, once it closes.
    pub closed: watch::Receiver<Option<CloseFrame>>,
}

impl ChannelTransport {
    /// Create a transport and its peer with room for `capacity` unread frames.
    #[must_use]
    pub fn pair(capacity: usize) -> (Self, ChannelPeer) {
        let (frame_tx, frame_rx) = mpsc::channel(capacity.max(1));
        let (closed_tx, closed_rx) = watch::channel(None);
        (
            Self {
                frames: frame_rx,
                closed: closed_tx,
            },
            ChannelPeer {
                frames: frame_tx,
                closed: closed_rx,
            },
        )
    }
}

impl Transport for ChannelTransport {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        Box::pin(async move {
            if self.closed.borrow().is_some() {
                return None;
            }
            self.frames.recv().await
        })
    }

    fn close(&mut self, frame: CloseFrame) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            debug!(code = frame.code, reason = %frame.reason, "channel transport closed");
            self.frames.close();
            self.closed.send_replace(Some(frame));
            Ok(())
        })
    }
}

impl ChannelPeer {
    /// Send one frame.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] once the session side has gone away.
    pub async fn send(&self, frame: impl Into<String>) -> Result<()> {
        self.frames
            .send(frame.into())
            .await
            .map_err(|_| AppError::Transport("session side of channel is gone".into()))
    }

    /// Close frame sent by the session so far, if any.
    #[must_use]
    pub fn close_frame(&self) -> Option<CloseFrame> {
        self.closed.borrow().clone()
    }

    /// Wait until the session closes the connection.
    ///
    /// Returns `None` if the transport was dropped without closing.
    pub async fn wait_closed(&mut self) -> Option<CloseFrame> {
        match self.closed.wait_for(Option::is_some).await {
            Ok(frame) => frame.clone(),
            Err(_) => None,
        }
    }
}
