//! Correlation of tool invocations with their results.
//!
//! The CLI reports a tool call on an `assistant` line and its result on a
//! later `user` line, linked only by the call id. The tracker bridges that
//! gap and records, per call, whether the result is worth scanning for
//! markers.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

/// Tools that never emit markers; their (often large) results are not scanned.
pub const DEFAULT_SKIP_MARKER_TOOLS: &[&str] = &["Read", "NotebookRead"];

/// What is known about an in-flight tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInfo {
    /// Tool name as reported by the CLI.
    pub name: String,
    /// Input arguments.
    pub input: Map<String, Value>,
    /// Whether marker detection is skipped for this tool's result.
    pub skip_marker_scan: bool,
}

impl ToolInfo {
    /// Placeholder used when a result arrives for an unknown call id.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            name: "unknown".into(),
            input: Map::new(),
            skip_marker_scan: false,
        }
    }
}

/// Map of in-flight tool calls keyed by call id.
#[derive(Debug)]
pub struct ToolTracker {
    calls: HashMap<String, ToolInfo>,
    skip_marker_tools: HashSet<String>,
}

impl ToolTracker {
    /// Create a tracker using [`DEFAULT_SKIP_MARKER_TOOLS`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_skip_list(DEFAULT_SKIP_MARKER_TOOLS.iter().copied())
    }

    /// Create a tracker with an explicit denylist of marker-free tools.
    pub fn with_skip_list<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            calls: HashMap::new(),
            skip_marker_tools: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Record a new tool call. A repeated id replaces the earlier entry.
    pub fn register(&mut self, id: &str, name: &str, input: Map<String, Value>) {
        let skip_marker_scan = self.skip_marker_tools.contains(name);
        self.calls.insert(
            id.to_owned(),
            ToolInfo {
                name: name.to_owned(),
                input,
                skip_marker_scan,
            },
        );
    }

    /// Look up an in-flight call.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ToolInfo> {
        self.calls.get(id)
    }

    /// Remove a call once its result has been handled.
    pub fn complete(&mut self, id: &str) -> Option<ToolInfo> {
        self.calls.remove(id)
    }

    /// Forget every in-flight call.
    pub fn clear(&mut self) {
        self.calls.clear();
    }

    /// Number of calls awaiting a result.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no calls are awaiting a result.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

impl Default for ToolTracker {
    fn default() -> Self {
        Self::new()
    }
}
