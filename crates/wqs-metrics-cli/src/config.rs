use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use utils::version;
use wqs_metrics::ActionKey;
use wqs_metrics::MetricsKey;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(flatten)]
    pub collector: CollectorArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send metric records read as a JSON array
    Send(SendArgs),
    /// Query an aggregate from the render API
    Query(QueryArgs),
    /// Print every line received on a datagram socket
    Listen(ListenArgs),
}

#[derive(Args, Clone, Debug)]
pub struct CollectorArgs {
    #[arg(
        long,
        global = true,
        env = "WQS_GRAPHITE_HTTP",
        default_value = "127.0.0.1",
        help = "Collector host, `host[:port]` or base URL of the render API"
    )]
    pub server: String,

    #[arg(
        long,
        global = true,
        env = "WQS_GRAPHITE_UDP",
        default_value = "127.0.0.1:8333",
        help = "Collector datagram address for plaintext lines"
    )]
    pub udp_addr: String,

    #[arg(
        long,
        global = true,
        env = "WQS_GRAPHITE_PREFIX",
        default_value = "wqs",
        help = "Metric name prefix"
    )]
    pub prefix: String,

    #[arg(
        long,
        global = true,
        default_value_t = 5000,
        help = "HTTP upload and query timeout in milliseconds"
    )]
    pub timeout_ms: u64,
}

#[derive(Args, Clone, Debug)]
pub struct SendArgs {
    #[arg(long, default_value = "", help = "Also POST the lines to this URL")]
    pub upload_url: String,

    #[arg(
        value_hint = clap::ValueHint::FilePath,
        help = "JSON file holding an array of records, stdin when omitted"
    )]
    pub file: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct QueryArgs {
    #[arg(long, help = "Reporting endpoint, all hosts when omitted")]
    pub host: Option<String>,

    #[arg(long, default_value = "", help = "Queue name, all queues when empty")]
    pub queue: String,

    #[arg(long, default_value = "", help = "Group name, all groups when empty")]
    pub group: String,

    #[arg(long, value_parser = parse_action, default_value = "sent")]
    pub action: ActionKey,

    #[arg(
        long,
        value_parser = parse_metric,
        default_value = "qps",
        help = "qps, total, elapsed, latency or scale.<bucket>"
    )]
    pub metric: MetricsKey,

    #[arg(long, help = "Window start in Unix seconds, one hour ago when omitted")]
    pub start: Option<i64>,

    #[arg(long, help = "Window end in Unix seconds, now when omitted")]
    pub end: Option<i64>,

    #[arg(long, default_value_t = 60, allow_negative_numbers = true, help = "Step in seconds")]
    pub step: i64,

    #[arg(long, help = "Print parsed series instead of the raw body")]
    pub parse: bool,
}

#[derive(Args, Clone, Debug)]
pub struct ListenArgs {
    #[arg(long, default_value = "127.0.0.1:8333", help = "Address to bind")]
    pub bind: String,
}

fn parse_action(s: &str) -> Result<ActionKey, String> {
    s.parse::<ActionKey>()
        .map_err(|report| report.current_context().to_string())
}

fn parse_metric(s: &str) -> Result<MetricsKey, String> {
    s.parse::<MetricsKey>()
        .map_err(|report| report.current_context().to_string())
}
