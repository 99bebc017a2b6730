//! Per-connection session: producer/consumer over a bounded frame queue.
//!
//! ## Lifecycle
//!
//! 1. The producer task reads frames off the transport and pushes them into
//!    the queue. A push that stays blocked past the push timeout counts as
//!    a strike; enough consecutive strikes on one frame trip backpressure.
//! 2. The consumer splits frames into lines, recognizes control envelopes,
//!    feeds everything else to the [`LineParser`], and dispatches events to
//!    the session's [`Emitter`].
//! 3. A `complete` envelope or end-of-transcript result finalizes the turn;
//!    an `error` envelope, a disconnect or backpressure reports a terminal
//!    error. Whichever comes first wins; the other is ignored.
//! 4. Once terminal, the consumer asks the producer to close the transport
//!    and drains whatever frames are still queued without processing them.

use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::config::GlobalConfig;
use crate::emitter::messages::{BACKPRESSURE, CONNECTION_LOST, UNKNOWN};
use crate::emitter::Emitter;
use crate::services::Services;
use crate::session::state::{
    SessionContext, SessionOutcome, SessionReport, SessionState, SessionStats,
};
use crate::session::transport::{
    CloseFrame, Transport, CLOSE_INTERNAL_ERROR, CLOSE_TRY_AGAIN_LATER,
};
use crate::stream::codec::LineSplitter;
use crate::stream::control::{self, ControlMessage};
use crate::stream::{LineParser, ParsedEvent};
use crate::Result;

/// Why the producer task stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProducerExit {
    /// The consumer requested a close and the transport was closed.
    Closed,
    /// The transport ended without a close request.
    Disconnected,
    /// The queue stayed full past the strike limit.
    Backpressure,
    /// The consumer dropped its end of the queue.
    ConsumerGone,
}

/// Queue and timing knobs the producer needs.
#[derive(Debug, Clone, Copy)]
struct ProducerLimits {
    push_timeout: Duration,
    max_push_timeouts: u32,
}

/// One streamed turn over one transport.
pub struct StreamSession {
    context: SessionContext,
    emitter: Emitter,
    parser: LineParser,
    splitter: LineSplitter,
    state: SessionState,
    stats: SessionStats,
    queue_capacity: usize,
    limits: ProducerLimits,
    close_tx: Option<oneshot::Sender<CloseFrame>>,
    abort: CancellationToken,
    error_code: Option<String>,
}

impl StreamSession {
    /// Build a session for `context`, choosing the emitter from its source.
    #[must_use]
    pub fn new(context: SessionContext, config: &GlobalConfig, services: Services) -> Self {
        let emitter =
            Emitter::for_context(context.clone(), services, &config.heartbeat.sentinel);
        Self {
            context,
            emitter,
            parser: LineParser::with_skip_list(config.stream.skip_marker_tools.iter().cloned()),
            splitter: LineSplitter::new(config.stream.max_line_bytes),
            state: SessionState::default(),
            stats: SessionStats::new(),
            queue_capacity: config.stream.queue_capacity,
            limits: ProducerLimits {
                push_timeout: config.stream.push_timeout(),
                max_push_timeouts: config.stream.max_push_timeouts,
            },
            close_tx: None,
            abort: CancellationToken::new(),
            error_code: None,
        }
    }

    /// Identity of this session.
    #[must_use]
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Drive the session to a terminal state over `transport`.
    ///
    /// Always returns a report; every failure is reported through the
    /// emitter rather than to the caller.
    pub async fn run<T: Transport>(self, transport: T) -> SessionReport {
        let span = info_span!(
            "stream_session",
            session_id = %self.context.session_id,
            user_id = %self.context.user_id,
            source = self.context.source.as_str(),
            emitter = self.emitter.name(),
        );
        self.run_inner(transport).instrument(span).await
    }

    async fn run_inner<T: Transport>(mut self, transport: T) -> SessionReport {
        info!("stream session started");

        let (frame_tx, mut frame_rx) = mpsc::channel(self.queue_capacity.max(1));
        let (close_tx, close_rx) = oneshot::channel();
        self.close_tx = Some(close_tx);
        let producer = tokio::spawn(
            produce(transport, frame_tx, close_rx, self.abort.clone(), self.limits)
                .instrument(Span::current()),
        );

        if let Err(err) = self.consume(&mut frame_rx).await {
            error!(%err, "stream consumer failed");
            self.fail(UNKNOWN, &err.to_string()).await;
        }
        drop(frame_rx);

        match producer.await {
            Ok(exit) => self.after_producer(exit).await,
            Err(err) => {
                error!(%err, "stream producer task failed");
                self.fail(UNKNOWN, &format!("producer task failed: {err}"))
                    .await;
            }
        }

        if !self.state.is_terminal() {
            self.fail(UNKNOWN, "stream ended without completing").await;
        }

        let outcome = if self.state.completed {
            SessionOutcome::Completed
        } else {
            SessionOutcome::Errored {
                code: self.error_code.clone().unwrap_or_else(|| UNKNOWN.to_owned()),
            }
        };
        SessionReport {
            outcome,
            state: self.state,
            stats: self.stats,
        }
    }

    // ── Consumer ──────────────────────────────────────────────────────────

    async fn consume(&mut self, frames: &mut mpsc::Receiver<String>) -> Result<()> {
        let abort = self.abort.clone();
        loop {
            let frame = tokio::select! {
                biased;
                () = abort.cancelled() => {
                    debug!("consumer stopping, producer aborted");
                    return Ok(());
                }
                frame = frames.recv() => frame,
            };

            let Some(frame) = frame else {
                debug!("frame queue closed");
                return Ok(());
            };

            if self.should_stop() {
                debug!(bytes = frame.len(), "dropping frame after session end");
                continue;
            }
            self.process_frame(&frame).await?;
        }
    }

    async fn process_frame(&mut self, frame: &str) -> Result<()> {
        for line in self.splitter.push_frame(frame) {
            if self.should_stop() {
                break;
            }
            match line {
                Ok(line) => self.process_line(&line).await?,
                Err(err) => {
                    warn!(%err, "skipping oversized transcript line");
                    self.stats.parse_errors += 1;
                }
            }
        }
        Ok(())
    }

    async fn process_line(&mut self, line: &str) -> Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }
        self.stats.line_count += 1;
        self.state.last_line_at = Some(chrono::Utc::now());

        if let Some(message) = control::recognize(line) {
            self.state.last_control = Some(message.kind());
            match message {
                ControlMessage::Error { code, message } => {
                    self.fail(&code, &message).await;
                }
                ControlMessage::Complete { exit_code } => {
                    debug!(exit_code, "complete envelope received");
                    self.finalize().await;
                }
            }
            return Ok(());
        }

        for event in self.parser.process_line(line) {
            if self.should_stop() {
                break;
            }
            self.dispatch(event).await?;
        }
        Ok(())
    }

    async fn dispatch(&mut self, event: ParsedEvent) -> Result<()> {
        self.stats.record(&event);
        self.emitter.handle(&event).await?;
        if matches!(event, ParsedEvent::StreamComplete) {
            self.finalize().await;
        }
        Ok(())
    }

    /// Terminal, or the producer gave up on backpressure.
    fn should_stop(&self) -> bool {
        self.state.is_terminal() || self.abort.is_cancelled()
    }

    // ── Terminal transitions ──────────────────────────────────────────────

    async fn finalize(&mut self) {
        if self.state.is_terminal() {
            debug!("finalize ignored, session already terminal");
            return;
        }
        self.state.completed = true;

        if let Err(err) = self.finish_emitter().await {
            error!(%err, "finalizing turn failed");
        }

        let ttfc_ms = self
            .stats
            .time_to_first_content()
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        info!(
            duration_ms = u64::try_from(self.stats.duration().as_millis()).unwrap_or(u64::MAX),
            event_count = self.stats.event_count,
            line_count = self.stats.line_count,
            parse_errors = self.stats.parse_errors,
            time_to_first_content_ms = ?ttfc_ms,
            cli_session_id = ?self.parser.cli_session_id(),
            "stream session completed"
        );

        self.request_close(CloseFrame::normal("complete"));
    }

    async fn finish_emitter(&mut self) -> Result<()> {
        for event in self.parser.finalize() {
            self.stats.record(&event);
            self.emitter.handle(&event).await?;
        }
        let full_text = self.parser.full_text().to_owned();
        self.emitter.finalize(&full_text).await
    }

    async fn fail(&mut self, code: &str, message: &str) {
        if self.state.is_terminal() {
            debug!(code, "error ignored, session already terminal");
            return;
        }
        self.state.error_emitted = true;
        self.error_code = Some(code.to_owned());

        self.emitter.emit_error(code, message).await;

        let since_last_line_ms = self
            .state
            .last_line_at
            .map(|at| (chrono::Utc::now() - at).num_milliseconds());
        warn!(
            code,
            message,
            duration_ms = u64::try_from(self.stats.duration().as_millis()).unwrap_or(u64::MAX),
            last_control = ?self.state.last_control,
            since_last_line_ms = ?since_last_line_ms,
            disconnect_detected = self.state.disconnect_detected,
            "stream session failed"
        );

        let frame = match code {
            BACKPRESSURE => CloseFrame::new(CLOSE_TRY_AGAIN_LATER, "backpressure"),
            UNKNOWN => CloseFrame::new(CLOSE_INTERNAL_ERROR, "internal error"),
            _ => CloseFrame::normal("error"),
        };
        self.request_close(frame);
    }

    fn request_close(&mut self, frame: CloseFrame) {
        self.state.closed = true;
        if let Some(tx) = self.close_tx.take() {
            // The producer may already be gone; nothing left to close then.
            let _ = tx.send(frame);
        }
    }

    async fn after_producer(&mut self, exit: ProducerExit) {
        debug!(?exit, "producer finished");
        match exit {
            ProducerExit::Backpressure => {
                self.fail(BACKPRESSURE, "frame queue stayed full past the push timeout")
                    .await;
            }
            ProducerExit::Disconnected if !self.state.is_terminal() => {
                self.state.disconnect_detected = true;
                self.fail(CONNECTION_LOST, "poller disconnected before the turn finished")
                    .await;
            }
            ProducerExit::Disconnected | ProducerExit::Closed | ProducerExit::ConsumerGone => {}
        }
    }
}

// ── Producer ──────────────────────────────────────────────────────────────

async fn produce<T: Transport>(
    mut transport: T,
    frames: mpsc::Sender<String>,
    mut close_rx: oneshot::Receiver<CloseFrame>,
    abort: CancellationToken,
    limits: ProducerLimits,
) -> ProducerExit {
    loop {
        let received = tokio::select! {
            biased;
            requested = &mut close_rx => {
                if let Ok(frame) = requested {
                    close_transport(&mut transport, frame).await;
                }
                return ProducerExit::Closed;
            }
            received = transport.recv() => received,
        };

        let Some(frame) = received else {
            if close_rx.try_recv().is_ok() {
                debug!("transport ended after session close");
                return ProducerExit::Closed;
            }
            info!("transport ended before close");
            return ProducerExit::Disconnected;
        };

        let mut pending = frame;
        let mut strikes = 0_u32;
        loop {
            match frames.send_timeout(pending, limits.push_timeout).await {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(frame)) => {
                    strikes += 1;
                    warn!(
                        strikes,
                        max = limits.max_push_timeouts,
                        "frame queue full, push timed out"
                    );
                    if strikes >= limits.max_push_timeouts {
                        abort.cancel();
                        close_transport(
                            &mut transport,
                            CloseFrame::new(CLOSE_TRY_AGAIN_LATER, "backpressure"),
                        )
                        .await;
                        return ProducerExit::Backpressure;
                    }
                    pending = frame;
                }
                Err(SendTimeoutError::Closed(_)) => {
                    debug!("frame queue closed by consumer");
                    return ProducerExit::ConsumerGone;
                }
            }
        }
    }
}

async fn close_transport<T: Transport>(transport: &mut T, frame: CloseFrame) {
    let code = frame.code;
    if let Err(err) = transport.close(frame).await {
        warn!(code, %err, "closing transport failed");
    } else {
        debug!(code, "transport closed");
    }
}
