//! Client combining the datagram transport and the render query client.

use std::borrow::Cow;

use chrono::Utc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::ClientConfig;
use crate::encoder::Line;
use crate::encoder::LineEncoder;
use crate::error::MetricsResult;
use crate::query::QueryClient;
use crate::query::QueryParameters;
use crate::query::RenderSeries;
use crate::record::MetricRecord;
use crate::transport::upload_lines;
use crate::transport::DatagramSink;
use crate::transport::Transport;
use crate::transport::TransportStats;
use crate::transport::UdpSink;

/// What happened to the HTTP mirror of a batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum UploadOutcome {
    /// No upload URL was given, or there was nothing to upload
    #[default]
    Skipped,
    Delivered,
    Failed,
}

/// Summary of one [`GraphiteClient::send`] call.
///
/// Informational only: losses are reported here, never as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendReport {
    pub records: usize,
    /// Records that failed validation and produced no lines
    pub rejected: usize,
    pub lines: usize,
    pub delivered: usize,
    pub dropped: usize,
    pub upload: UploadOutcome,
}

/// Lines encoded from a batch of records.
#[derive(Debug, Clone, Default)]
pub struct EncodedBatch {
    pub lines: Vec<Line>,
    pub rejected: usize,
}

/// Metrics client for a plaintext-protocol collector.
///
/// Safe to share between tasks: sends only touch the socket handle and
/// atomic counters.
pub struct GraphiteClient<S = UdpSink> {
    encoder: LineEncoder,
    transport: Transport<S>,
    http: reqwest::Client,
    query: QueryClient,
    default_endpoint: String,
}

impl GraphiteClient<UdpSink> {
    /// Validate `config` and open the datagram socket.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MetricsError::Configuration`] for bad parameters and
    /// [`crate::MetricsError::TransportUnavailable`] when the collector address
    /// cannot be resolved or the socket cannot be opened.
    pub async fn connect(config: ClientConfig) -> MetricsResult<Self> {
        config.validate()?;
        let sink = UdpSink::connect(&config.udp_addr, config.request_timeout).await?;
        Self::with_sink(config, sink)
    }
}

impl<S: DatagramSink> GraphiteClient<S> {
    /// Build a client over an already opened sink.
    pub fn with_sink(config: ClientConfig, sink: S) -> MetricsResult<Self> {
        config.validate()?;

        let http = config.http_client()?;
        let query = QueryClient::new(http.clone(), config.render_url()?, config.prefix.clone());
        let default_endpoint = config.default_endpoint()?;

        info!(
            host = %config.host,
            udp_addr = %config.udp_addr,
            prefix = %config.prefix,
            "Metrics client created"
        );

        Ok(Self {
            encoder: LineEncoder::new(config.prefix.clone()),
            transport: Transport::new(sink, config.write_timeout),
            http,
            query,
            default_endpoint,
        })
    }

    pub fn sink(&self) -> &S {
        self.transport.sink()
    }

    /// Endpoint stamped on records that do not name one.
    pub fn default_endpoint(&self) -> &str {
        &self.default_endpoint
    }

    /// Cumulative datagram and upload counters.
    pub fn stats(&self) -> TransportStats {
        self.transport.stats()
    }

    /// Encode every record with one shared timestamp.
    ///
    /// Rejected records are logged and counted; the rest still encode.
    pub fn encode_batch(&self, records: &[MetricRecord], timestamp: i64) -> EncodedBatch {
        let mut batch = EncodedBatch::default();
        for record in records {
            let record = self.with_default_endpoint(record);
            match self.encoder.encode(&record, timestamp) {
                Ok(lines) => batch.lines.extend(lines),
                Err(report) => {
                    warn!(
                        queue = %record.queue,
                        group = %record.group,
                        "Skipping metric record: {}",
                        report.current_context()
                    );
                    batch.rejected += 1;
                }
            }
        }
        batch
    }

    fn with_default_endpoint<'a>(&self, record: &'a MetricRecord) -> Cow<'a, MetricRecord> {
        if record.endpoint.is_empty() {
            let mut owned = record.clone();
            owned.endpoint = self.default_endpoint.clone();
            Cow::Owned(owned)
        } else {
            Cow::Borrowed(record)
        }
    }

    /// Send a batch stamped with the current time.
    ///
    /// Each line goes out as its own datagram. A non-empty `upload_url`
    /// additionally receives the same lines in one POST, concurrently with
    /// the datagram writes. Nothing is retried and no failure is returned.
    pub async fn send(&self, upload_url: &str, records: &[MetricRecord]) -> SendReport {
        self.send_at(upload_url, records, Utc::now().timestamp()).await
    }

    /// Send a batch stamped with `timestamp` (Unix seconds).
    pub async fn send_at(
        &self,
        upload_url: &str,
        records: &[MetricRecord],
        timestamp: i64,
    ) -> SendReport {
        let batch = self.encode_batch(records, timestamp);

        let (outcome, upload) = tokio::join!(
            self.transport.send_lines(&batch.lines),
            self.upload(upload_url, &batch.lines),
        );

        let report = SendReport {
            records: records.len(),
            rejected: batch.rejected,
            lines: batch.lines.len(),
            delivered: outcome.delivered,
            dropped: outcome.dropped,
            upload,
        };
        debug!(?report, "Metric batch sent");
        report
    }

    async fn upload(&self, url: &str, lines: &[Line]) -> UploadOutcome {
        if url.is_empty() || lines.is_empty() {
            return UploadOutcome::Skipped;
        }
        match upload_lines(&self.http, url, lines).await {
            Ok(()) => UploadOutcome::Delivered,
            Err(err) => {
                warn!(url = %url, error = %err, "Metric upload failed");
                self.transport.record_upload_failure();
                UploadOutcome::Failed
            }
        }
    }

    /// Fetch an aggregate from the render API and return the raw body.
    ///
    /// # Errors
    ///
    /// See [`QueryClient::group_metrics`].
    pub async fn group_metrics(&self, params: &QueryParameters) -> MetricsResult<String> {
        self.query.group_metrics(params).await
    }

    /// Fetch an aggregate from the render API and parse it.
    ///
    /// # Errors
    ///
    /// See [`QueryClient::group_series`].
    pub async fn group_series(&self, params: &QueryParameters) -> MetricsResult<Vec<RenderSeries>> {
        self.query.group_series(params).await
    }
}
