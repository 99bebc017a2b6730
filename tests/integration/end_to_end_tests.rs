//! Full transcripts driven through a session, from first frame to the
//! persisted reply.

use sherlock_stream::services::PushMessage;
use sherlock_stream::session::transport::CLOSE_NORMAL;
use sherlock_stream::session::SessionOutcome;
use sherlock_stream::stream::control::TurnSource;

use super::test_helpers::{
    context, delta_line, eventually, finish, lock, result_line, services, start_session,
    system_line, test_config, tool_result_line, tool_use_line, Recorder,
};

/// Index of the first push of `kind`, panicking if absent.
fn position(kinds: &[&str], kind: &str) -> usize {
    kinds
        .iter()
        .position(|k| *k == kind)
        .unwrap_or_else(|| panic!("no {kind} push in {kinds:?}"))
}

/// A turn with commentary, a tool call whose result carries markers, and a
/// closing result line.
#[tokio::test]
async fn full_transcript_streams_and_persists() {
    let recorder = Recorder::new();
    let (mut peer, handle) = start_session(
        context(TurnSource::Text),
        &test_config(),
        services(&recorder, 2),
    );

    let tool_output = concat!(
        "Found 3 suspects.\n",
        r#"[SHERLOCK_CHART:v1]{"chart_type":"bar","title":"Motives"}[/SHERLOCK_CHART]"#,
        r#"[SHERLOCK_SCENE:v1]{"mood":"foggy"}[/SHERLOCK_SCENE]"#,
    );
    for line in [
        system_line("cli-1"),
        delta_line("<thinking>Pipe smoke.</thinking>"),
        tool_use_line("t1", "Bash"),
        tool_result_line("t1", tool_output),
        delta_line("The butler "),
        delta_line("did it."),
        result_line("cli-1"),
    ] {
        peer.send(line).await.expect("send");
    }

    let close = peer.wait_closed().await.expect("close frame sent");
    let report = finish(handle).await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(close.code, CLOSE_NORMAL);
    assert_eq!(report.stats.parse_errors, 0);
    assert_eq!(report.stats.line_count, 7);

    let kinds = recorder.push_kinds();
    assert_eq!(kinds[0], "stream_started");
    assert!(position(&kinds, "thinking_chunk") < position(&kinds, "tool_start"));
    assert!(position(&kinds, "tool_start") < position(&kinds, "scene"));
    assert!(position(&kinds, "scene") < position(&kinds, "tool_result"));
    assert!(position(&kinds, "tool_result") < position(&kinds, "text_chunk"));
    assert_eq!(kinds.last(), Some(&"stream_complete"));
    assert_eq!(kinds.iter().filter(|k| **k == "stream_started").count(), 1);

    let tool_result = recorder
        .pushed()
        .into_iter()
        .find_map(|m| match m {
            PushMessage::ToolResult { content, .. } => Some(content),
            _ => None,
        })
        .expect("tool result pushed");
    assert_eq!(tool_result, "Found 3 suspects.");

    let stored = recorder.stored();
    assert_eq!(stored.len(), 1);
    assert_eq!(
        stored[0].content,
        "<thinking>Pipe smoke.</thinking>The butler did it."
    );
    assert_eq!(stored[0].cli_session_id.as_deref(), Some("cli-1"));
    assert_eq!(
        *lock(&recorder.cli_session_ids),
        vec![("session-1".to_owned(), "cli-1".to_owned())],
        "an unchanged id on the result line is not saved twice"
    );

    assert!(eventually(|| lock(&recorder.charts).len() == 1).await);
    assert_eq!(lock(&recorder.charts)[0].title, "Motives");
}

/// One frame may carry several lines; an unterminated frame ends its line.
#[tokio::test]
async fn batched_frames_split_into_lines() {
    let recorder = Recorder::new();
    let (peer, handle) = start_session(
        context(TurnSource::AudioTranscription),
        &test_config(),
        services(&recorder, 2),
    );

    let batched = format!(
        "{}\n{}\n\n{}",
        system_line("cli-2"),
        delta_line("Hello, "),
        delta_line("Watson.")
    );

    peer.send(batched).await.expect("send");
    peer.send(format!("{}\n", result_line("cli-2")))
        .await
        .expect("send");

    let report = finish(handle).await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.stats.line_count, 4);
    assert_eq!(recorder.stored()[0].content, "Hello, Watson.");
    assert_eq!(
        recorder.push_kinds(),
        vec!["stream_started", "text_chunk", "text_chunk", "stream_complete"]
    );
}

/// A result line carrying a new upstream id saves it before completing.
#[tokio::test]
async fn result_line_with_new_cli_session_id_is_saved() {
    let recorder = Recorder::new();
    let (peer, handle) = start_session(
        context(TurnSource::Text),
        &test_config(),
        services(&recorder, 2),
    );

    peer.send(delta_line("Done.")).await.expect("send");
    peer.send(result_line("cli-fresh")).await.expect("send");

    let report = finish(handle).await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(
        *lock(&recorder.cli_session_ids),
        vec![("session-1".to_owned(), "cli-fresh".to_owned())]
    );
    assert_eq!(recorder.stored()[0].cli_session_id.as_deref(), Some("cli-fresh"));
}
