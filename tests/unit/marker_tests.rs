//! Unit tests for embedded marker detection in tool-result text.

use proptest::prelude::*;
use serde_json::json;

use sherlock_stream::stream::markers::{self, MarkerType};

// ── Detection ────────────────────────────────────────────────────────────────

/// A chart marker is extracted and removed from the surrounding text.
#[test]
fn chart_marker_is_extracted_and_removed() {
    let text = r#"Here you go [SHERLOCK_CHART:v1]{"chart_type":"line","title":"Revenue"}[/SHERLOCK_CHART] enjoy"#;

    assert!(markers::has_markers(text));
    let result = markers::detect(text);

    assert_eq!(result.markers.len(), 1);
    let marker = &result.markers[0];
    assert_eq!(marker.marker_type, MarkerType::Chart);
    assert_eq!(marker.data.get("chart_type"), Some(&json!("line")));
    assert_eq!(marker.raw_json, r#"{"chart_type":"line","title":"Revenue"}"#);
    assert_eq!(result.cleaned_content, "Here you go  enjoy");
}

/// Markers of different types are reported in fixed type order regardless of
/// where they appear in the text.
#[test]
fn markers_are_reported_in_type_order() {
    let text = concat!(
        r#"[SHERLOCK_SCENE:v1]{"mood":"calm"}[/SHERLOCK_SCENE]"#,
        r#"[SHERLOCK_RESEARCH:v1]{"query":"rust"}[/SHERLOCK_RESEARCH]"#,
        r#"[SHERLOCK_COMPONENT_UPDATE:v1]{"id":"c1"}[/SHERLOCK_COMPONENT_UPDATE]"#,
        r#"[SHERLOCK_CHART:v1]{"chart_type":"bar"}[/SHERLOCK_CHART]"#,
    );

    let result = markers::detect(text);
    let kinds: Vec<MarkerType> = result.markers.iter().map(|m| m.marker_type).collect();

    assert_eq!(kinds, MarkerType::ALL.to_vec());
    assert_eq!(result.cleaned_content, "");
}

/// Two markers of the same type are both found, in order of appearance.
#[test]
fn repeated_markers_of_one_type_are_all_found() {
    let text = r#"[SHERLOCK_CHART:v1]{"n":1}[/SHERLOCK_CHART] and [SHERLOCK_CHART:v1]{"n":2}[/SHERLOCK_CHART]"#;

    let result = markers::detect(text);
    let ns: Vec<_> = result.markers.iter().map(|m| m.data["n"].clone()).collect();

    assert_eq!(ns, vec![json!(1), json!(2)]);
    assert_eq!(result.cleaned_content, "and");
}

/// Multi-line JSON bodies are accepted.
#[test]
fn multiline_body_is_accepted() {
    let text = "[SHERLOCK_SCENE:v1]\n{\n  \"mood\": \"tense\"\n}\n[/SHERLOCK_SCENE]";

    let result = markers::detect(text);

    assert_eq!(result.markers.len(), 1);
    assert_eq!(result.markers[0].data["mood"], json!("tense"));
}

// ── Malformed bodies ─────────────────────────────────────────────────────────

/// A body that is not valid JSON is dropped but its span is still removed.
#[test]
fn invalid_json_body_is_dropped_and_span_removed() {
    let text = "before [SHERLOCK_CHART:v1]{not json}[/SHERLOCK_CHART] after";

    let result = markers::detect(text);

    assert!(result.markers.is_empty());
    assert_eq!(result.cleaned_content, "before  after");
}

/// A JSON body that is not an object is not reported.
#[test]
fn non_object_body_is_not_reported() {
    let text = "[SHERLOCK_RESEARCH:v1][1,2,3][/SHERLOCK_RESEARCH]";

    let result = markers::detect(text);

    assert!(result.markers.is_empty());
    assert_eq!(result.cleaned_content, "");
}

/// A start tag without an end tag is left in the text untouched.
#[test]
fn unterminated_marker_is_left_in_place() {
    let text = r#"oops [SHERLOCK_CHART:v1]{"chart_type":"line"}"#;

    let result = markers::detect(text);

    assert!(result.markers.is_empty());
    assert_eq!(result.cleaned_content, text);
}

/// Removing one span can join its neighbours into a marker of a type that was
/// already scanned; that marker is found too and nothing is left behind.
#[test]
fn marker_spliced_by_removal_is_also_extracted() {
    let text = concat!(
        "[SHERLOCK_CHA",
        r#"[SHERLOCK_SCENE:v1]{"m":1}[/SHERLOCK_SCENE]"#,
        r#"RT:v1]{"chart_type":"bar","title":"T"}[/SHERLOCK_CHART]"#,
    );

    let result = markers::detect(text);

    let types: Vec<MarkerType> = result.markers.iter().map(|m| m.marker_type).collect();
    assert_eq!(types, vec![MarkerType::Scene, MarkerType::Chart]);
    assert_eq!(result.markers[1].data["title"], json!("T"));
    assert_eq!(result.cleaned_content, "");
    assert!(!markers::has_markers(&result.cleaned_content));
}

/// Text without start tags is not flagged and comes back trimmed only.
#[test]
fn text_without_markers_is_unchanged() {
    let text = "  just a file listing\n";

    assert!(!markers::has_markers(text));
    assert_eq!(markers::detect(text).cleaned_content, "just a file listing");
}

// ── Idempotence ──────────────────────────────────────────────────────────────

fn marker_text_strategy() -> impl Strategy<Value = String> {
    let piece = prop_oneof![
        "[a-z ]{0,10}",
        Just(r#"[SHERLOCK_CHART:v1]{"a":1}[/SHERLOCK_CHART]"#.to_owned()),
        Just(r#"[SHERLOCK_SCENE:v1]{"b":"x"}[/SHERLOCK_SCENE]"#.to_owned()),
        Just("[SHERLOCK_RESEARCH:v1]nope[/SHERLOCK_RESEARCH]".to_owned()),
        Just("[SHERLOCK_COMPONENT_UPDATE:v1]".to_owned()),
        Just("[/SHERLOCK_CHART]".to_owned()),
        Just("[SHERLOCK_CHA".to_owned()),
        Just(r#"RT:v1]{"c":2}[/SHERLOCK_CHART]"#.to_owned()),
    ];
    prop::collection::vec(piece, 0..8).prop_map(|parts| parts.concat())
}

proptest! {
    /// Running detection on already-cleaned text finds nothing new and leaves
    /// the text unchanged.
    #[test]
    fn detection_is_idempotent(text in marker_text_strategy()) {
        let first = markers::detect(&text);
        let second = markers::detect(&first.cleaned_content);

        prop_assert!(second.markers.is_empty());
        prop_assert_eq!(second.cleaned_content, first.cleaned_content);
    }
}
