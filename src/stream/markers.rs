//! Extraction of embedded JSON markers from tool-result text.
//!
//! A marker is a bracket-delimited span such as
//! `[SHERLOCK_CHART:v1]{"chart_type":"line"}[/SHERLOCK_CHART]`. Tools emit
//! them inside ordinary result text to request a structured side effect.
//! Marker types are scanned in a fixed order (chart, research, scene,
//! component update), repeated until a pass removes nothing. Every matched
//! span is removed from the returned text whether or not its body parsed,
//! and only bodies that are strict JSON objects surface as
//! [`DetectedMarker`]s.

use serde_json::{Map, Value};
use tracing::debug;

/// Kind of structured side effect a marker requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerType {
    /// Render a chart.
    Chart,
    /// Start a deep-research job.
    Research,
    /// Change the visual scene.
    Scene,
    /// Patch a UI component.
    ComponentUpdate,
}

impl MarkerType {
    /// Scan order.
    pub const ALL: [Self; 4] = [
        Self::Chart,
        Self::Research,
        Self::Scene,
        Self::ComponentUpdate,
    ];

    /// Opening delimiter.
    #[must_use]
    pub fn start_tag(self) -> &'static str {
        match self {
            Self::Chart => "[SHERLOCK_CHART:v1]",
            Self::Research => "[SHERLOCK_RESEARCH:v1]",
            Self::Scene => "[SHERLOCK_SCENE:v1]",
            Self::ComponentUpdate => "[SHERLOCK_COMPONENT_UPDATE:v1]",
        }
    }

    /// Closing delimiter.
    #[must_use]
    pub fn end_tag(self) -> &'static str {
        match self {
            Self::Chart => "[/SHERLOCK_CHART]",
            Self::Research => "[/SHERLOCK_RESEARCH]",
            Self::Scene => "[/SHERLOCK_SCENE]",
            Self::ComponentUpdate => "[/SHERLOCK_COMPONENT_UPDATE]",
        }
    }
}

/// One successfully parsed marker.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedMarker {
    /// Marker kind.
    pub marker_type: MarkerType,
    /// Parsed JSON object body.
    pub data: Map<String, Value>,
    /// Body text exactly as it appeared between the tags.
    pub raw_json: String,
}

/// Result of a marker scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerResult {
    /// Parsed markers in scan order.
    pub markers: Vec<DetectedMarker>,
    /// Input text with every matched span removed, trimmed.
    pub cleaned_content: String,
}

/// Fast pre-check: does `text` contain any marker start tag?
#[must_use]
pub fn has_markers(text: &str) -> bool {
    MarkerType::ALL
        .iter()
        .any(|marker_type| text.contains(marker_type.start_tag()))
}

/// Extract all markers from `text`.
///
/// Removing a span can splice its neighbours into a new complete marker of a
/// type already scanned, so the four-type pass repeats until a pass removes
/// nothing. Every pass shrinks the text, so this terminates.
#[must_use]
pub fn detect(text: &str) -> MarkerResult {
    let mut working = text.to_owned();
    let mut markers = Vec::new();

    loop {
        let before = working.len();
        for marker_type in MarkerType::ALL {
            let (found, cleaned) = extract_type(&working, marker_type);
            markers.extend(found);
            working = cleaned;
        }
        if working.len() == before {
            break;
        }
    }

    MarkerResult {
        markers,
        cleaned_content: working.trim().to_owned(),
    }
}

/// Extract every span of one marker type, returning the parsed markers and
/// the text with those spans removed.
fn extract_type(text: &str, marker_type: MarkerType) -> (Vec<DetectedMarker>, String) {
    let start_tag = marker_type.start_tag();
    let end_tag = marker_type.end_tag();

    let mut markers = Vec::new();
    let mut cleaned = String::with_capacity(text.len());
    let mut cursor = 0;

    while let Some(rel_start) = text[cursor..].find(start_tag) {
        let start = cursor + rel_start;
        let body_start = start + start_tag.len();
        let Some(rel_end) = text[body_start..].find(end_tag) else {
            break;
        };
        let body_end = body_start + rel_end;
        let raw = &text[body_start..body_end];

        match serde_json::from_str::<Value>(raw.trim()) {
            Ok(Value::Object(data)) => markers.push(DetectedMarker {
                marker_type,
                data,
                raw_json: raw.to_owned(),
            }),
            Ok(_) => debug!(?marker_type, "marker body is not a JSON object, dropping"),
            Err(err) => debug!(?marker_type, %err, "marker body is not valid JSON, dropping"),
        }

        cleaned.push_str(&text[cursor..start]);
        cursor = body_end + end_tag.len();
    }

    cleaned.push_str(&text[cursor..]);
    (markers, cleaned)
}
