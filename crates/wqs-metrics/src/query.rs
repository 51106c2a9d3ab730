//! Render API query model and client.
//!
//! [`QueryParameters`] describe one aggregate retrieval. The client turns them
//! into a render target built on the same path convention the encoder writes,
//! issues a single GET, and hands back the body untouched.

use core::fmt;
use std::str::FromStr;

use error_stack::bail;
use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::instrument;
use url::Url;

use crate::config::ClientConfig;
use crate::encoder::sanitize_segment;
use crate::error::MetricsError;
use crate::error::MetricsResult;
use crate::record::Direction;

/// Path segment matching every value.
const WILDCARD: &str = "*";

/// Which hosts a query covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HostScope {
    /// Every reporting endpoint
    #[default]
    All,
    /// A single reporting endpoint
    Endpoint(String),
}

/// Direction selector of a query.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKey {
    Sent,
    #[serde(alias = "recv")]
    Received,
}

impl ActionKey {
    pub fn direction(self) -> Direction {
        match self {
            ActionKey::Sent => Direction::Sent,
            ActionKey::Received => Direction::Recv,
        }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKey::Sent => f.write_str("sent"),
            ActionKey::Received => f.write_str("received"),
        }
    }
}

impl FromStr for ActionKey {
    type Err = Report<MetricsError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sent" => Ok(ActionKey::Sent),
            "received" | "recv" => Ok(ActionKey::Received),
            other => Err(Report::new(MetricsError::invalid_query(format!(
                "unknown action `{other}`, expected `sent` or `received`"
            )))),
        }
    }
}

/// Derived metric to retrieve.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetricsKey {
    /// Events per second over the step
    Qps,
    /// Event count
    Total,
    /// Reporting interval length
    Elapsed,
    /// Average latency in milliseconds
    Latency,
    /// Event count of one latency bucket
    Scale(String),
}

impl MetricsKey {
    /// Render expression over the direction selector `base`.
    fn expression(&self, base: &str) -> String {
        match self {
            MetricsKey::Qps => {
                format!("divideSeries(sumSeries({base}.total),sumSeries({base}.elapsed))")
            }
            MetricsKey::Total => format!("sumSeries({base}.total)"),
            MetricsKey::Elapsed => format!("averageSeries({base}.elapsed)"),
            MetricsKey::Latency => format!("averageSeries({base}.latency)"),
            MetricsKey::Scale(bucket) => {
                format!("sumSeries({base}.scale.{})", sanitize_segment(bucket))
            }
        }
    }

    /// Function folding samples into one step.
    fn step_function(&self) -> &'static str {
        match self {
            MetricsKey::Total | MetricsKey::Scale(_) => "sum",
            MetricsKey::Qps | MetricsKey::Elapsed | MetricsKey::Latency => "avg",
        }
    }
}

impl fmt::Display for MetricsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricsKey::Qps => f.write_str("qps"),
            MetricsKey::Total => f.write_str("total"),
            MetricsKey::Elapsed => f.write_str("elapsed"),
            MetricsKey::Latency => f.write_str("latency"),
            MetricsKey::Scale(bucket) => write!(f, "scale.{bucket}"),
        }
    }
}

impl FromStr for MetricsKey {
    type Err = Report<MetricsError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qps" => Ok(MetricsKey::Qps),
            "total" => Ok(MetricsKey::Total),
            "elapsed" => Ok(MetricsKey::Elapsed),
            "latency" => Ok(MetricsKey::Latency),
            other => match other.strip_prefix("scale.") {
                Some(bucket) if !bucket.is_empty() => Ok(MetricsKey::Scale(bucket.to_string())),
                _ => Err(Report::new(MetricsError::invalid_query(format!(
                    "unknown metric `{other}`"
                )))),
            },
        }
    }
}

/// Parameters of one aggregate retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParameters {
    pub host: HostScope,
    /// Empty matches every queue
    pub queue: String,
    /// Empty matches every group
    pub group: String,
    pub action: ActionKey,
    pub metric: MetricsKey,
    /// Inclusive window start, Unix seconds
    pub start_time: i64,
    /// Inclusive window end, Unix seconds
    pub end_time: i64,
    /// Resolution in seconds
    pub step: i64,
}

impl QueryParameters {
    /// Check the window and step before anything touches the network.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::InvalidQuery`] for a negative start, an end not
    /// after the start, a non-positive step, or an empty explicit host.
    pub fn validate(&self) -> MetricsResult<()> {
        if self.start_time < 0 {
            bail!(MetricsError::invalid_query(format!(
                "start time {} is before the epoch",
                self.start_time
            )));
        }
        if self.start_time >= self.end_time {
            bail!(MetricsError::invalid_query(format!(
                "start time {} is not before end time {}",
                self.start_time, self.end_time
            )));
        }
        if self.step <= 0 {
            bail!(MetricsError::invalid_query(format!(
                "step must be positive, got {}",
                self.step
            )));
        }
        if matches!(&self.host, HostScope::Endpoint(host) if host.is_empty()) {
            bail!(MetricsError::invalid_query("explicit host must not be empty"));
        }
        Ok(())
    }

    /// Path selector `<prefix>.<host>.<queue>.<group>.<direction>`.
    pub fn selector(&self, prefix: &str) -> String {
        let host = match &self.host {
            HostScope::All => WILDCARD.to_string(),
            HostScope::Endpoint(host) => sanitize_segment(host),
        };
        format!(
            "{prefix}.{host}.{}.{}.{}",
            segment_or_wildcard(&self.queue),
            segment_or_wildcard(&self.group),
            self.action.direction(),
        )
    }

    /// Full render target, summarized to `step` seconds.
    pub fn target(&self, prefix: &str) -> String {
        format!(
            "summarize({},\"{}s\",\"{}\")",
            self.metric.expression(&self.selector(prefix)),
            self.step,
            self.metric.step_function(),
        )
    }
}

fn segment_or_wildcard(segment: &str) -> String {
    if segment.is_empty() {
        WILDCARD.to_string()
    } else {
        sanitize_segment(segment)
    }
}

/// One series of a JSON render response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSeries {
    pub target: String,
    /// `(value, timestamp)` pairs; `None` where the collector has no sample
    pub datapoints: Vec<(Option<f64>, i64)>,
}

/// Parse a JSON render response body.
///
/// # Errors
///
/// Returns [`MetricsError::MalformedResponse`] if the body is not a list of
/// series.
pub fn parse_render_response(body: &str) -> MetricsResult<Vec<RenderSeries>> {
    serde_json::from_str(body).change_context(MetricsError::MalformedResponse {
        message: "expected a JSON list of {target, datapoints}".into(),
    })
}

/// HTTP client for the collector's render endpoint.
#[derive(Debug, Clone)]
pub struct QueryClient {
    http: reqwest::Client,
    render_url: Url,
    prefix: String,
}

impl QueryClient {
    /// `http` should carry the request timeout; it is shared and pooled.
    pub fn new(http: reqwest::Client, render_url: Url, prefix: impl Into<String>) -> Self {
        Self {
            http,
            render_url,
            prefix: prefix.into(),
        }
    }

    /// Build a standalone query client; no datagram socket is opened.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Configuration`] if `config` does not validate.
    pub fn from_config(config: &ClientConfig) -> MetricsResult<Self> {
        config.validate()?;
        Ok(Self::new(
            config.http_client()?,
            config.render_url()?,
            config.prefix.clone(),
        ))
    }

    /// Request URL for the given parameters.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::InvalidQuery`] if the parameters do not validate.
    pub fn request_url(&self, params: &QueryParameters) -> MetricsResult<Url> {
        params.validate()?;
        let mut url = self.render_url.clone();
        url.query_pairs_mut()
            .append_pair("target", &params.target(&self.prefix))
            .append_pair("from", &params.start_time.to_string())
            .append_pair("until", &params.end_time.to_string())
            .append_pair("format", "json");
        Ok(url)
    }

    /// Fetch the aggregate described by `params` and return the raw body.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::InvalidQuery`] without any network activity if
    /// the parameters are invalid, and [`MetricsError::QueryFailed`] on
    /// transport failure, timeout or a non-2xx response.
    #[instrument(skip(self), fields(action = %params.action, metric = %params.metric))]
    pub async fn group_metrics(&self, params: &QueryParameters) -> MetricsResult<String> {
        let url = self.request_url(params)?;
        debug!(url = %url, "Querying render API");

        let query_failed = || MetricsError::QueryFailed {
            message: format!("render request to {} failed", self.render_url),
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .change_context_lazy(query_failed)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Report::new(MetricsError::QueryFailed {
                message: format!("render API responded with {status}"),
            })
            .attach_printable(text));
        }

        let body = response.text().await.change_context_lazy(query_failed)?;
        debug!(bytes = body.len(), "Render API responded");
        Ok(body)
    }

    /// Fetch and parse the aggregate described by `params`.
    ///
    /// # Errors
    ///
    /// As [`QueryClient::group_metrics`], plus
    /// [`MetricsError::MalformedResponse`] if the body is not a JSON render
    /// response.
    pub async fn group_series(&self, params: &QueryParameters) -> MetricsResult<Vec<RenderSeries>> {
        let body = self.group_metrics(params).await?;
        parse_render_response(&body)
    }
}
