//! Queue metrics reporting over a plaintext time-series protocol.
//!
//! This library reports per-queue throughput and latency statistics to a
//! collector and reads aggregates back:
//!
//! - [`MetricRecord`]s are flattened into dotted-path lines by the [`LineEncoder`]
//! - Each line is written as one UDP datagram, fire-and-forget
//! - A batch can also be mirrored to an HTTP upload endpoint
//! - Aggregates are fetched from the collector's render API
//!
//! # Examples
//!
//! ```no_run
//! # use wqs_metrics::{ActionKey, ClientConfig, GraphiteClient, HostScope, MetricRecord, MetricValues, MetricsKey, QueryParameters};
//! # async fn run() -> wqs_metrics::MetricsResult<()> {
//! let config = ClientConfig::new("127.0.0.1:8080", "127.0.0.1:2003", "wqs");
//! let client = GraphiteClient::connect(config).await?;
//!
//! let record = MetricRecord::new("localhost", "Queue1", "Group1")
//!     .with_sent(MetricValues::new(100, 9.01).with_bucket("less_10ms", 100));
//! let report = client.send("", &[record]).await;
//! assert_eq!(report.lines, 3);
//!
//! let params = QueryParameters {
//!     host: HostScope::All,
//!     queue: "Queue1".into(),
//!     group: "Group1".into(),
//!     action: ActionKey::Sent,
//!     metric: MetricsKey::Qps,
//!     start_time: 1_700_000_000,
//!     end_time: 1_700_003_600,
//!     step: 60,
//! };
//! let body = client.group_metrics(&params).await?;
//! println!("{body}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod encoder;
pub mod error;
pub mod listener;
pub mod query;
pub mod record;
pub mod transport;

pub use client::EncodedBatch;
pub use client::GraphiteClient;
pub use client::SendReport;
pub use client::UploadOutcome;
pub use config::ClientConfig;
pub use encoder::Line;
pub use encoder::LineEncoder;
pub use encoder::LineValue;
pub use error::MetricsError;
pub use error::MetricsResult;
pub use listener::DatagramSource;
pub use listener::LineListener;
pub use listener::RetryPolicy;
pub use query::parse_render_response;
pub use query::ActionKey;
pub use query::HostScope;
pub use query::MetricsKey;
pub use query::QueryClient;
pub use query::QueryParameters;
pub use query::RenderSeries;
pub use record::Direction;
pub use record::MetricRecord;
pub use record::MetricValues;
pub use transport::DatagramSink;
pub use transport::TransportStats;
pub use transport::UdpSink;
