//! In-memory shape of one observation batch.

use std::collections::BTreeMap;

use error_stack::bail;
use serde::Deserialize;
use serde::Serialize;

use crate::error::MetricsError;
use crate::error::MetricsResult;

/// Direction of a measurement within a record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Direction {
    #[display("sent")]
    Sent,
    #[display("recv")]
    Recv,
}

/// One directional measurement over a reporting interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValues {
    /// Number of events in the interval
    pub total: u64,
    /// Interval duration in seconds
    pub elapsed: f64,
    /// Average latency in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<f64>,
    /// Event counts per latency bucket label, e.g. `less_10ms`
    #[serde(default)]
    pub scale: BTreeMap<String, u64>,
}

impl MetricValues {
    pub fn new(total: u64, elapsed: f64) -> Self {
        Self {
            total,
            elapsed,
            latency: None,
            scale: BTreeMap::new(),
        }
    }

    pub fn with_latency(mut self, latency: f64) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_bucket(mut self, label: impl Into<String>, count: u64) -> Self {
        self.scale.insert(label.into(), count);
        self
    }

    fn validate(&self, direction: Direction) -> MetricsResult<()> {
        if !self.elapsed.is_finite() || self.elapsed <= 0.0 {
            bail!(MetricsError::invalid_record(format!(
                "{direction} elapsed must be a positive number of seconds, got {}",
                self.elapsed
            )));
        }
        if let Some(latency) = self.latency {
            if !latency.is_finite() || latency < 0.0 {
                bail!(MetricsError::invalid_record(format!(
                    "{direction} latency must be a non-negative number, got {latency}"
                )));
            }
        }
        if self.scale.keys().any(String::is_empty) {
            bail!(MetricsError::invalid_record(format!(
                "{direction} scale has an empty bucket label"
            )));
        }
        let bucketed = self
            .scale
            .values()
            .try_fold(0u64, |acc, count| acc.checked_add(*count));
        match bucketed {
            Some(sum) if sum <= self.total => Ok(()),
            _ => bail!(MetricsError::invalid_record(format!(
                "{direction} scale buckets exceed total of {}",
                self.total
            ))),
        }
    }
}

/// One reporting unit for an (endpoint, queue, group) tuple.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    /// Reporting host or process; empty means the client's own endpoint
    #[serde(default)]
    pub endpoint: String,
    pub queue: String,
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent: Option<MetricValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recv: Option<MetricValues>,
    /// Backlog size at sample time
    #[serde(default, alias = "accum")]
    pub accumulated: u64,
}

impl MetricRecord {
    pub fn new(
        endpoint: impl Into<String>,
        queue: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            queue: queue.into(),
            group: group.into(),
            ..Default::default()
        }
    }

    pub fn with_sent(mut self, values: MetricValues) -> Self {
        self.sent = Some(values);
        self
    }

    pub fn with_recv(mut self, values: MetricValues) -> Self {
        self.recv = Some(values);
        self
    }

    pub fn with_accumulated(mut self, accumulated: u64) -> Self {
        self.accumulated = accumulated;
        self
    }

    /// Present directions in reporting order.
    pub fn directions(&self) -> impl Iterator<Item = (Direction, &MetricValues)> {
        [
            (Direction::Sent, self.sent.as_ref()),
            (Direction::Recv, self.recv.as_ref()),
        ]
        .into_iter()
        .filter_map(|(direction, values)| values.map(|v| (direction, v)))
    }

    /// Check the record invariants.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::InvalidRecord`] when both directions are
    /// absent, an identifier is empty, or a direction holds out-of-range
    /// values.
    pub fn validate(&self) -> MetricsResult<()> {
        if self.sent.is_none() && self.recv.is_none() {
            bail!(MetricsError::invalid_record(format!(
                "record for {}/{} has neither sent nor recv values",
                self.queue, self.group
            )));
        }
        for (name, value) in [
            ("endpoint", &self.endpoint),
            ("queue", &self.queue),
            ("group", &self.group),
        ] {
            if value.is_empty() {
                bail!(MetricsError::invalid_record(format!("{name} must not be empty")));
            }
        }
        for (direction, values) in self.directions() {
            values.validate(direction)?;
        }
        Ok(())
    }
}
