//! Progress extraction from external process output.
//!
//! The executor feeds every stdout line to a [`ProgressParser`]. Each parser
//! recognises one textual protocol and returns a [`ProgressUpdate`] for lines
//! that carry progress; everything else is ignored.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

/// A single progress report extracted from one output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Percentage, always within `0..=100`.
    pub percent: u8,
    /// Free-text message following the percentage (may be empty).
    pub message: String,
}

impl ProgressUpdate {
    /// Build an update, clamping the percentage into `0..=100`.
    pub fn clamped(percent: u64, message: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100) as u8,
            message: message.into(),
        }
    }
}

/// Line-oriented progress protocol.
///
/// No ordering or monotonicity is enforced: a later, lower percentage is
/// reported as-is.
pub trait ProgressParser: Send + Sync {
    /// Parse one line (without its trailing newline).
    fn parse_line(&self, line: &str) -> Option<ProgressUpdate>;
}

// ---------------------------------------------------------------------------
// PROGRESS: <pct> <message>
// ---------------------------------------------------------------------------

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"PROGRESS:\s*(\d{1,3})\s*(.*)").expect("valid regex"));

/// Parses `PROGRESS: <0-100> <free text>` markers.
///
/// Values above 100 (the pattern admits up to three digits) are clamped.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerLineParser;

impl ProgressParser for MarkerLineParser {
    fn parse_line(&self, line: &str) -> Option<ProgressUpdate> {
        let caps = MARKER_RE.captures(line)?;
        let percent: u64 = caps.get(1)?.as_str().parse().ok()?;
        let message = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
        Some(ProgressUpdate::clamped(percent, message))
    }
}

// ---------------------------------------------------------------------------
// Newline-delimited JSON
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct JsonProgressLine {
    progress: f64,
    #[serde(default)]
    message: String,
}

/// Parses newline-delimited JSON objects of the form
/// `{"progress": 40, "message": "parsing"}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLineParser;

impl ProgressParser for JsonLineParser {
    fn parse_line(&self, line: &str) -> Option<ProgressUpdate> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        let parsed: JsonProgressLine = serde_json::from_str(trimmed).ok()?;
        if !parsed.progress.is_finite() {
            return None;
        }
        let percent = parsed.progress.max(0.0).round() as u64;
        Some(ProgressUpdate::clamped(percent, parsed.message.trim()))
    }
}

/// Which progress protocol the executor should speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressFormat {
    #[default]
    Marker,
    Json,
}

impl ProgressFormat {
    /// Parse a configuration value (`marker` or `json`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "marker" => Some(Self::Marker),
            "json" | "ndjson" => Some(Self::Json),
            _ => None,
        }
    }

    /// Instantiate the parser for this format.
    pub fn parser(self) -> Box<dyn ProgressParser> {
        match self {
            Self::Marker => Box::new(MarkerLineParser),
            Self::Json => Box::new(JsonLineParser),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
