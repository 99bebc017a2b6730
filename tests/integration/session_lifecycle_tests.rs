//! Integration tests for the stream session lifecycle over a channel
//! transport: completion, client errors, disconnects and draining.

use std::time::Duration;

use sherlock_stream::emitter::messages::{CLI_ERROR, CONNECTION_LOST};
use sherlock_stream::services::PushMessage;
use sherlock_stream::session::transport::{CLOSE_NORMAL, CLOSE_POLICY_VIOLATION};
use sherlock_stream::session::{ChannelTransport, SessionOutcome};
use sherlock_stream::stream::control::{ControlKind, TurnSource};

use super::test_helpers::{
    complete_line, context, delta_line, error_line, finish, lock, result_line, services,
    start_session, system_line, test_config, Recorder,
};

// ── Completion ───────────────────────────────────────────────────────────────

/// A `complete` envelope finalizes the turn and closes normally.
#[tokio::test]
async fn complete_envelope_finalizes_turn() {
    let recorder = Recorder::new();
    let (mut peer, handle) =
        start_session(context(TurnSource::Text), &test_config(), services(&recorder, 2));

    peer.send(system_line("cli-1")).await.expect("send");
    peer.send(delta_line("The game is afoot.")).await.expect("send");
    peer.send(complete_line()).await.expect("send");

    let close = peer.wait_closed().await.expect("session closes");
    let report = finish(handle).await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert!(report.state.completed);
    assert!(!report.state.error_emitted);
    assert!(report.state.closed);
    assert_eq!(report.state.last_control, Some(ControlKind::Complete));
    assert_eq!(close.code, CLOSE_NORMAL);
    assert_eq!(close.reason, "complete");
    assert_eq!(
        recorder.push_kinds(),
        vec!["stream_started", "text_chunk", "stream_complete"]
    );
    assert_eq!(recorder.stored()[0].content, "The game is afoot.");
    assert_eq!(recorder.stored()[0].cli_session_id.as_deref(), Some("cli-1"));
}

/// The transcript's own `result` line finalizes the turn without a
/// `complete` envelope.
#[tokio::test]
async fn result_line_finalizes_turn() {
    let recorder = Recorder::new();
    let (mut peer, handle) =
        start_session(context(TurnSource::Text), &test_config(), services(&recorder, 2));

    peer.send(delta_line("Done.")).await.expect("send");
    peer.send(result_line("cli-7")).await.expect("send");

    let close = peer.wait_closed().await.expect("session closes");
    let report = finish(handle).await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(close.code, CLOSE_NORMAL);
    assert_eq!(
        *lock(&recorder.cli_session_ids),
        vec![("session-1".to_owned(), "cli-7".to_owned())]
    );
}

/// An error arriving after completion is ignored: one completion, no error.
#[tokio::test]
async fn error_after_complete_is_ignored() {
    let recorder = Recorder::new();
    let (peer, handle) =
        start_session(context(TurnSource::Text), &test_config(), services(&recorder, 2));

    let frame = format!(
        "{}\n{}\n{}",
        delta_line("Hi"),
        complete_line(),
        error_line(CLI_ERROR, "late")
    );
    peer.send(frame).await.expect("send");

    let report = finish(handle).await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert!(recorder.error_codes().is_empty());
    let completions = recorder
        .pushed()
        .iter()
        .filter(|m| matches!(m, PushMessage::StreamComplete { .. }))
        .count();
    assert_eq!(completions, 1);
}

/// A second `complete` does not finalize twice.
#[tokio::test]
async fn duplicate_complete_finalizes_once() {
    let recorder = Recorder::new();
    let (peer, handle) =
        start_session(context(TurnSource::Text), &test_config(), services(&recorder, 2));

    peer.send(format!("{}\n{}", complete_line(), complete_line()))
        .await
        .expect("send");
    // The session may already have closed; a failed send is fine here.
    let _ = peer.send(complete_line()).await;

    let report = finish(handle).await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(recorder.stored().len(), 1);
}

// ── Client errors ────────────────────────────────────────────────────────────

/// An `error` envelope reports the poller's code to the user and closes
/// normally.
#[tokio::test]
async fn error_envelope_reports_client_error() {
    let recorder = Recorder::new();
    let (mut peer, handle) =
        start_session(context(TurnSource::Text), &test_config(), services(&recorder, 2));

    peer.send(delta_line("Let me")).await.expect("send");
    peer.send(error_line(CLI_ERROR, "cli exited 1")).await.expect("send");

    let close = peer.wait_closed().await.expect("session closes");
    let report = finish(handle).await;

    assert_eq!(
        report.outcome,
        SessionOutcome::Errored {
            code: CLI_ERROR.to_owned()
        }
    );
    assert!(report.state.error_emitted);
    assert!(!report.state.completed);
    assert_eq!(report.state.last_control, Some(ControlKind::Error));
    assert_eq!(close.code, CLOSE_NORMAL);
    assert_eq!(recorder.error_codes(), vec![CLI_ERROR.to_owned()]);
    assert!(
        !recorder.push_kinds().contains(&"stream_complete"),
        "errored turn must not complete"
    );
}

/// An unknown client error code still reaches the user, with the generic
/// message.
#[tokio::test]
async fn unrecognized_error_code_uses_generic_message() {
    let recorder = Recorder::new();
    let (peer, handle) =
        start_session(context(TurnSource::Text), &test_config(), services(&recorder, 2));

    peer.send(error_line("quota_exceeded", "x")).await.expect("send");
    let report = finish(handle).await;

    assert!(matches!(report.outcome, SessionOutcome::Errored { ref code } if code == "quota_exceeded"));
    assert!(matches!(
        recorder.pushed().last(),
        Some(PushMessage::Error { message, .. }) if message.contains("Something went wrong")
    ));
}

// ── Disconnects ──────────────────────────────────────────────────────────────

/// The poller vanishing mid-turn is reported as `connection_lost`, after
/// every frame it already sent has been processed.
#[tokio::test]
async fn disconnect_mid_turn_reports_connection_lost() {
    let recorder = Recorder::new();
    let (peer, handle) =
        start_session(context(TurnSource::Text), &test_config(), services(&recorder, 2));

    peer.send(delta_line("one ")).await.expect("send");
    peer.send(delta_line("two")).await.expect("send");
    drop(peer);

    let report = finish(handle).await;

    assert_eq!(
        report.outcome,
        SessionOutcome::Errored {
            code: CONNECTION_LOST.to_owned()
        }
    );
    assert!(report.state.disconnect_detected);
    assert_eq!(
        recorder.push_kinds(),
        vec!["stream_started", "text_chunk", "text_chunk", "error"]
    );
}

/// A disconnect after completion is not an error.
#[tokio::test]
async fn disconnect_after_complete_is_quiet() {
    let recorder = Recorder::new();
    let (peer, handle) =
        start_session(context(TurnSource::Text), &test_config(), services(&recorder, 2));

    peer.send(format!("{}\n{}", delta_line("ok"), complete_line()))
        .await
        .expect("send");
    drop(peer);

    let report = finish(handle).await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert!(!report.state.disconnect_detected);
    assert!(recorder.error_codes().is_empty());
}

/// A connection that sends nothing at all still ends in exactly one terminal
/// state.
#[tokio::test]
async fn empty_connection_is_connection_lost() {
    let recorder = Recorder::new();
    let (peer, handle) =
        start_session(context(TurnSource::Text), &test_config(), services(&recorder, 2));
    drop(peer);

    let report = finish(handle).await;

    assert!(report.state.is_terminal());
    assert!(matches!(report.outcome, SessionOutcome::Errored { ref code } if code == CONNECTION_LOST));
}

// ── Line handling ────────────────────────────────────────────────────────────

/// Unparseable and blank lines are skipped and counted, never fatal.
#[tokio::test]
async fn bad_lines_are_counted_and_skipped() {
    let recorder = Recorder::new();
    let (peer, handle) =
        start_session(context(TurnSource::Text), &test_config(), services(&recorder, 2));

    peer.send("not-json").await.expect("send");
    peer.send("\n\n").await.expect("send");
    peer.send(delta_line("still fine")).await.expect("send");
    peer.send(complete_line()).await.expect("send");

    let report = finish(handle).await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.stats.parse_errors, 1);
    assert_eq!(report.stats.line_count, 3);
    assert!(report.stats.time_to_first_content().is_some());
    assert!(report.state.last_line_at.is_some());
}

/// An over-long line is dropped and the turn carries on.
#[tokio::test]
async fn overlong_line_is_skipped() {
    let recorder = Recorder::new();
    let mut config = test_config();
    config.stream.max_line_bytes = 256;
    let (peer, handle) = start_session(context(TurnSource::Text), &config, services(&recorder, 2));

    peer.send(delta_line(&"x".repeat(1024))).await.expect("send");
    peer.send(delta_line("short")).await.expect("send");
    peer.send(complete_line()).await.expect("send");

    let report = finish(handle).await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(recorder.stored()[0].content, "short");
}

// ── Heartbeat turns ──────────────────────────────────────────────────────────

#[tokio::test]
async fn heartbeat_turn_with_sentinel_is_silent() {
    let recorder = Recorder::new();
    let (peer, handle) =
        start_session(context(TurnSource::Heartbeat), &test_config(), services(&recorder, 2));

    peer.send(delta_line("Nothing to report. HEARTBEAT_OK"))
        .await
        .expect("send");
    peer.send(complete_line()).await.expect("send");

    let report = finish(handle).await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert!(recorder.pushed().is_empty());
    assert!(lock(&recorder.heartbeats).is_empty());
}

#[tokio::test]
async fn heartbeat_turn_without_sentinel_notifies() {
    let recorder = Recorder::new();
    let (peer, handle) =
        start_session(context(TurnSource::Heartbeat), &test_config(), services(&recorder, 2));

    peer.send(delta_line("<thinking>check calendar</thinking>Meeting in 10 minutes."))
        .await
        .expect("send");
    peer.send(complete_line()).await.expect("send");

    finish(handle).await;

    assert_eq!(
        *lock(&recorder.heartbeats),
        vec!["<thinking>check calendar</thinking>Meeting in 10 minutes.".to_owned()]
    );
    assert!(recorder.pushed().is_empty());
}

// ── Init handshake ───────────────────────────────────────────────────────────

#[tokio::test]
async fn valid_init_yields_context() {
    let (mut transport, peer) = ChannelTransport::pair(4);
    peer.send(
        r#"{"type":"init","user_id":"u","session_id":"s","ai_character_name":"S","source":"text"}"#,
    )
    .await
    .expect("send");

    let context = sherlock_stream::server::accept_init(&mut transport, Duration::from_secs(1))
        .await
        .expect("init accepted");

    assert_eq!(context.user_id, "u");
    assert_eq!(context.source, TurnSource::Text);
    assert!(peer.close_frame().is_none());
}

/// An unrecognised source is accepted and streams as an interactive turn.
#[tokio::test]
async fn unknown_source_runs_interactive_turn() {
    let recorder = Recorder::new();
    let (mut transport, mut peer) = ChannelTransport::pair(8);
    peer.send(
        r#"{"type":"init","user_id":"user-1","session_id":"session-1","ai_character_name":"Sherlock","source":"chat"}"#,
    )
    .await
    .expect("send");

    let context = sherlock_stream::server::accept_init(&mut transport, Duration::from_secs(1))
        .await
        .expect("init accepted");
    assert_eq!(context.source, TurnSource::Other);

    let session = sherlock_stream::session::StreamSession::new(
        context,
        &test_config(),
        services(&recorder, 2),
    );
    let handle = tokio::spawn(session.run(transport));
    peer.send(delta_line("Indeed.")).await.expect("send");
    peer.send(complete_line()).await.expect("send");

    let report = finish(handle).await;
    let close = peer.wait_closed().await.expect("closed");

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(close.code, CLOSE_NORMAL);
    assert_eq!(
        recorder.push_kinds(),
        vec!["stream_started", "text_chunk", "stream_complete"]
    );
    assert_eq!(recorder.stored()[0].content, "Indeed.");
}

#[tokio::test]
async fn invalid_init_closes_with_policy_violation() {
    let (mut transport, mut peer) = ChannelTransport::pair(4);
    peer.send(delta_line("too early")).await.expect("send");

    let context =
        sherlock_stream::server::accept_init(&mut transport, Duration::from_secs(1)).await;

    assert!(context.is_none());
    let close = peer.wait_closed().await.expect("closed");
    assert_eq!(close.code, CLOSE_POLICY_VIOLATION);
    assert_eq!(close.reason, "invalid init");
}

/// A late init is reported with the same close reason as a malformed one.
#[tokio::test]
async fn missing_init_times_out() {
    let (mut transport, peer) = ChannelTransport::pair(4);

    let context =
        sherlock_stream::server::accept_init(&mut transport, Duration::from_millis(20)).await;

    assert!(context.is_none());
    let close = peer.close_frame().expect("closed");
    assert_eq!(close.code, CLOSE_POLICY_VIOLATION);
    assert_eq!(close.reason, "invalid init");
}
