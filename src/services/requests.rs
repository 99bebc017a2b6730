//! Validation of marker bodies into collaborator requests.
//!
//! A marker only becomes a job once its body carries the fields the job
//! needs; anything else is a [`AppError::Validation`] that the caller logs
//! before dropping that single marker.

use serde_json::{Map, Value};

use crate::{AppError, Result};

/// Chart rendering request built from a chart marker.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRequest {
    /// Conversation session.
    pub session_id: String,
    /// Requesting user.
    pub user_id: String,
    /// Chart kind (`line`, `bar`, …).
    pub chart_type: String,
    /// Chart title.
    pub title: String,
    /// Series data, passed through untouched.
    pub data: Value,
    /// Rendering options, passed through untouched.
    pub options: Value,
}

impl ChartRequest {
    /// Build a request from a chart marker body.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] if `chart_type` or `title` is missing,
    /// empty, or not a string.
    pub fn from_marker(session_id: &str, user_id: &str, body: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            session_id: session_id.to_owned(),
            user_id: user_id.to_owned(),
            chart_type: required_str(body, "chart", "chart_type")?,
            title: required_str(body, "chart", "title")?,
            data: body.get("data").cloned().unwrap_or(Value::Null),
            options: body.get("options").cloned().unwrap_or(Value::Null),
        })
    }
}

/// Research job request built from a research marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchRequest {
    /// Conversation session.
    pub session_id: String,
    /// Requesting user.
    pub user_id: String,
    /// What to research.
    pub query: String,
    /// Optional depth hint (`quick`, `deep`, …).
    pub depth: Option<String>,
}

impl ResearchRequest {
    /// Build a request from a research marker body.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] if `query` is missing, empty, or not a
    /// string.
    pub fn from_marker(session_id: &str, user_id: &str, body: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            session_id: session_id.to_owned(),
            user_id: user_id.to_owned(),
            query: required_str(body, "research", "query")?,
            depth: body
                .get("depth")
                .and_then(Value::as_str)
                .map(str::to_owned),
        })
    }
}

fn required_str(body: &Map<String, Value>, marker: &str, field: &str) -> Result<String> {
    match body.get(field).and_then(Value::as_str).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_owned()),
        _ => Err(AppError::Validation(format!(
            "{marker} marker missing required field `{field}`"
        ))),
    }
}
