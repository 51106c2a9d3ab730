use std::io::Read;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use wqs_metrics::ClientConfig;
use wqs_metrics::GraphiteClient;
use wqs_metrics::HostScope;
use wqs_metrics::LineListener;
use wqs_metrics::MetricRecord;
use wqs_metrics::MetricsResult;
use wqs_metrics::QueryClient;
use wqs_metrics::QueryParameters;

use crate::config::CollectorArgs;
use crate::config::ListenArgs;
use crate::config::QueryArgs;
use crate::config::SendArgs;

/// Default query window when `--start` is omitted.
const DEFAULT_WINDOW_SECS: i64 = 3600;

/// Converts library reports into `anyhow` errors, keeping the full chain.
trait IntoAnyhow<T> {
    fn into_anyhow(self) -> Result<T>;
}

impl<T> IntoAnyhow<T> for MetricsResult<T> {
    fn into_anyhow(self) -> Result<T> {
        self.map_err(|report| anyhow::anyhow!("{report:?}"))
    }
}

fn client_config(args: &CollectorArgs) -> ClientConfig {
    ClientConfig::new(&args.server, &args.udp_addr, &args.prefix)
        .with_request_timeout(Duration::from_millis(args.timeout_ms))
}

pub async fn run_send(collector: CollectorArgs, args: SendArgs) -> Result<()> {
    let input = match &args.file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read records from {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read records from stdin")?;
            buf
        }
    };
    let records = parse_records(&input)?;

    let client = GraphiteClient::connect(client_config(&collector))
        .await
        .into_anyhow()?;
    let report = client.send(&args.upload_url, &records).await;

    tracing::info!(
        records = report.records,
        rejected = report.rejected,
        lines = report.lines,
        delivered = report.delivered,
        dropped = report.dropped,
        upload = ?report.upload,
        "Batch sent"
    );
    println!(
        "sent {} of {} lines ({} dropped, {} records rejected, upload {:?})",
        report.delivered, report.lines, report.dropped, report.rejected, report.upload
    );
    Ok(())
}

/// Parse a JSON array of records, or a single record object.
fn parse_records(input: &str) -> Result<Vec<MetricRecord>> {
    let value: serde_json::Value =
        serde_json::from_str(input).context("records are not valid JSON")?;
    if value.is_array() {
        serde_json::from_value(value).context("invalid metric records")
    } else {
        let record = serde_json::from_value(value).context("invalid metric record")?;
        Ok(vec![record])
    }
}

pub async fn run_query(collector: CollectorArgs, args: QueryArgs) -> Result<()> {
    let params = query_parameters(&args, Utc::now().timestamp());
    let client = QueryClient::from_config(&client_config(&collector)).into_anyhow()?;

    if args.parse {
        let series = client.group_series(&params).await.into_anyhow()?;
        println!("{}", serde_json::to_string_pretty(&series)?);
    } else {
        let body = client.group_metrics(&params).await.into_anyhow()?;
        println!("{body}");
    }
    Ok(())
}

fn query_parameters(args: &QueryArgs, now: i64) -> QueryParameters {
    let end_time = args.end.unwrap_or(now);
    let start_time = args.start.unwrap_or(end_time - DEFAULT_WINDOW_SECS);
    QueryParameters {
        host: args
            .host
            .clone()
            .map_or(HostScope::All, HostScope::Endpoint),
        queue: args.queue.clone(),
        group: args.group.clone(),
        action: args.action,
        metric: args.metric.clone(),
        start_time,
        end_time,
        step: args.step,
    }
}

pub async fn run_listen(args: ListenArgs) -> Result<()> {
    let listener = LineListener::bind(&args.bind).await.into_anyhow()?;
    let cancel = CancellationToken::new();

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl-C, stopping listener"),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
        signal_token.cancel();
    });

    let received = listener
        .run(cancel, |line| println!("{line}"))
        .await
        .into_anyhow()?;
    tracing::info!(lines = received, "Listener finished");
    Ok(())
}
