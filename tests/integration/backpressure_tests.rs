//! Integration tests for bounded buffering: a stalled consumer trips
//! backpressure, a slow one does not.

use std::time::{Duration, Instant};

use sherlock_stream::emitter::messages::BACKPRESSURE;
use sherlock_stream::session::transport::CLOSE_TRY_AGAIN_LATER;
use sherlock_stream::session::SessionOutcome;
use sherlock_stream::stream::control::TurnSource;

use super::test_helpers::{
    complete_line, context, delta_line, finish, services, start_session, test_config, Recorder,
};

/// With pushes blocked and a one-slot queue, the producer gives up after the
/// push timeout, closes with 1013, and the consumer reports `backpressure`.
#[tokio::test]
async fn stalled_consumer_trips_backpressure() {
    let recorder = Recorder::new();
    recorder.close_gate();
    let mut config = test_config();
    config.stream.queue_capacity = 1;
    config.stream.push_timeout_ms = 20;
    config.stream.max_push_timeouts = 1;
    let (mut peer, handle) =
        start_session(context(TurnSource::Text), &config, services(&recorder, 2));

    for n in 0..4 {
        peer.send(delta_line(&format!("chunk {n} "))).await.expect("send");
    }

    let close = tokio::time::timeout(Duration::from_secs(5), peer.wait_closed())
        .await
        .expect("closed in time")
        .expect("close frame sent");
    assert_eq!(close.code, CLOSE_TRY_AGAIN_LATER);
    assert_eq!(close.reason, "backpressure");

    recorder.open_gate();
    let report = finish(handle).await;

    assert_eq!(
        report.outcome,
        SessionOutcome::Errored {
            code: BACKPRESSURE.to_owned()
        }
    );
    assert!(!report.state.completed);
    assert_eq!(recorder.error_codes(), vec![BACKPRESSURE.to_owned()]);
    assert!(
        !recorder.push_kinds().contains(&"stream_complete"),
        "a cut-off turn must not complete"
    );
}

/// Backpressure needs the configured number of consecutive timeouts.
#[tokio::test]
async fn backpressure_waits_for_strike_limit() {
    let recorder = Recorder::new();
    recorder.close_gate();
    let mut config = test_config();
    config.stream.queue_capacity = 1;
    config.stream.push_timeout_ms = 30;
    config.stream.max_push_timeouts = 3;
    let started = Instant::now();
    let (mut peer, handle) =
        start_session(context(TurnSource::Text), &config, services(&recorder, 2));

    for n in 0..4 {
        peer.send(delta_line(&format!("chunk {n} "))).await.expect("send");
    }
    let close = tokio::time::timeout(Duration::from_secs(5), peer.wait_closed())
        .await
        .expect("closed in time")
        .expect("close frame sent");

    assert_eq!(close.code, CLOSE_TRY_AGAIN_LATER);
    assert!(
        started.elapsed() >= Duration::from_millis(90),
        "three 30ms timeouts must elapse first, took {:?}",
        started.elapsed()
    );

    recorder.open_gate();
    finish(handle).await;
}

/// A consumer that is slow but keeps draining never trips backpressure.
#[tokio::test]
async fn slow_consumer_completes() {
    let recorder = Recorder::new();
    recorder.set_push_delay(Duration::from_millis(5));
    let mut config = test_config();
    config.stream.queue_capacity = 1;
    config.stream.push_timeout_ms = 1_000;
    let (peer, handle) = start_session(context(TurnSource::Text), &config, services(&recorder, 2));

    for n in 0..10 {
        peer.send(delta_line(&format!("{n} "))).await.expect("send");
    }
    peer.send(complete_line()).await.expect("send");

    let report = finish(handle).await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert!(recorder.error_codes().is_empty());
    assert_eq!(
        recorder.stored()[0].content,
        "0 1 2 3 4 5 6 7 8 9 "
    );
}

/// Lines still queued inside the frame being processed are dropped once the
/// producer gives up.
#[tokio::test]
async fn backpressure_stops_mid_frame() {
    let recorder = Recorder::new();
    recorder.close_gate();
    let mut config = test_config();
    config.stream.queue_capacity = 1;
    config.stream.push_timeout_ms = 20;
    config.stream.max_push_timeouts = 1;
    let (mut peer, handle) =
        start_session(context(TurnSource::Text), &config, services(&recorder, 2));

    let batched = (0..5)
        .map(|n| delta_line(&format!("part {n} ")))
        .collect::<Vec<_>>()
        .join("\n");
    peer.send(batched).await.expect("send");
    for n in 0..3 {
        peer.send(delta_line(&format!("late {n} "))).await.expect("send");
    }

    let close = tokio::time::timeout(Duration::from_secs(5), peer.wait_closed())
        .await
        .expect("closed in time")
        .expect("close frame sent");
    assert_eq!(close.code, CLOSE_TRY_AGAIN_LATER);

    recorder.open_gate();
    let report = finish(handle).await;

    assert_eq!(
        report.outcome,
        SessionOutcome::Errored {
            code: BACKPRESSURE.to_owned()
        }
    );
    let chunks = recorder
        .push_kinds()
        .into_iter()
        .filter(|k| *k == "text_chunk")
        .count();
    assert!(
        chunks <= 1,
        "only the line blocked at abort may finish, got {chunks} chunks"
    );
    assert_eq!(recorder.error_codes(), vec![BACKPRESSURE.to_owned()]);
}
