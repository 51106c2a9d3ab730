//! Plaintext line protocol encoder.
//!
//! Flattens a [`MetricRecord`] into dotted-path lines of the form
//! `<prefix>.<endpoint>.<queue>.<group>.<direction>.<field> <value> <timestamp>`.

use std::fmt;

use tracing::trace;

use crate::error::MetricsResult;
use crate::record::Direction;
use crate::record::MetricRecord;
use crate::record::MetricValues;

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '.';

/// Substitute for characters that may not appear inside a path segment.
pub const PLACEHOLDER: char = '_';

/// Represents a numeric value carried by a line
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineValue {
    Unsigned(u64),
    Float(f64),
}

impl From<u64> for LineValue {
    fn from(value: u64) -> Self {
        LineValue::Unsigned(value)
    }
}

impl From<f64> for LineValue {
    fn from(value: f64) -> Self {
        LineValue::Float(value)
    }
}

impl fmt::Display for LineValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineValue::Unsigned(v) => write!(f, "{v}"),
            LineValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// One `path value timestamp` sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub path: String,
    pub value: LineValue,
    /// Unix timestamp in seconds
    pub timestamp: i64,
}

impl Line {
    /// Wire form, newline-terminated.
    pub fn to_wire(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.path, self.value, self.timestamp)
    }
}

/// Replace every character that cannot appear inside a path segment.
///
/// The separator, `/`, whitespace, control characters, non-ASCII characters
/// and the render API glob characters `*?[]{}` all become [`PLACEHOLDER`],
/// so a sanitized segment is always ASCII.
pub fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            PATH_SEPARATOR | '/' | '*' | '?' | '[' | ']' | '{' | '}' => PLACEHOLDER,
            c if !c.is_ascii() || c.is_ascii_whitespace() || c.is_ascii_control() => PLACEHOLDER,
            c => c,
        })
        .collect()
}

/// Encoder for the collector's plaintext protocol.
#[derive(Debug, Clone)]
pub struct LineEncoder {
    prefix: String,
}

impl LineEncoder {
    /// The prefix is used verbatim and may itself contain separators.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Encode one record with the given timestamp.
    ///
    /// Lines come out in a fixed order: `sent` before `recv`, and within a
    /// direction `total`, `elapsed`, `latency`, then buckets by label.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MetricsError::InvalidRecord`] if the record fails
    /// validation; no lines are produced for it.
    pub fn encode(&self, record: &MetricRecord, timestamp: i64) -> MetricsResult<Vec<Line>> {
        record.validate()?;

        let base = format!(
            "{}.{}.{}.{}",
            self.prefix,
            sanitize_segment(&record.endpoint),
            sanitize_segment(&record.queue),
            sanitize_segment(&record.group),
        );

        let mut lines = Vec::new();
        for (direction, values) in record.directions() {
            encode_direction(&mut lines, &base, direction, values, timestamp);
        }

        trace!(base = %base, lines = lines.len(), "Encoded metric record");
        Ok(lines)
    }
}

fn encode_direction(
    lines: &mut Vec<Line>,
    base: &str,
    direction: Direction,
    values: &MetricValues,
    timestamp: i64,
) {
    let mut push = |field: &str, value: LineValue| {
        lines.push(Line {
            path: format!("{base}.{direction}.{field}"),
            value,
            timestamp,
        });
    };

    push("total", values.total.into());
    push("elapsed", values.elapsed.into());
    if let Some(latency) = values.latency {
        push("latency", latency.into());
    }
    for (bucket, count) in &values.scale {
        push(&format!("scale.{}", sanitize_segment(bucket)), (*count).into());
    }
}
