//! Render API tests for `wqs-metrics` against a mock collector

use std::time::Duration;

use similar_asserts::assert_eq;
use test_log::test;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::query_param;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wqs_metrics::ActionKey;
use wqs_metrics::ClientConfig;
use wqs_metrics::DatagramSink;
use wqs_metrics::GraphiteClient;
use wqs_metrics::HostScope;
use wqs_metrics::MetricsError;
use wqs_metrics::MetricsKey;
use wqs_metrics::QueryParameters;

/// Sink for clients that only query.
struct NullSink;

impl DatagramSink for NullSink {
    async fn send_datagram(&self, payload: &[u8]) -> std::io::Result<usize> {
        Ok(payload.len())
    }
}

const START: i64 = 1_700_000_000;
const END: i64 = 1_700_003_600;

fn params() -> QueryParameters {
    QueryParameters {
        host: HostScope::All,
        queue: "Queue1".to_string(),
        group: "Group1".to_string(),
        action: ActionKey::Sent,
        metric: MetricsKey::Qps,
        start_time: START,
        end_time: END,
        step: 1,
    }
}

fn client_for(server: &MockServer, timeout: Duration) -> GraphiteClient<NullSink> {
    let config = ClientConfig::new(server.uri(), "127.0.0.1:8333", "wqs_local_test")
        .with_request_timeout(timeout);
    GraphiteClient::with_sink(config, NullSink).expect("should build client")
}

const RENDER_BODY: &str = r#"[{"target":"summarize(...)","datapoints":[[11.1,1700000000],[null,1700000001]]}]"#;

#[test(tokio::test)]
async fn group_metrics_returns_raw_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/render"))
        .and(query_param("target", params().target("wqs_local_test")))
        .and(query_param("from", START.to_string()))
        .and(query_param("until", END.to_string()))
        .and(query_param("format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RENDER_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Duration::from_secs(5));
    let body = client
        .group_metrics(&params())
        .await
        .expect("query should succeed");

    assert_eq!(body, RENDER_BODY);
}

#[test(tokio::test)]
async fn group_series_parses_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/render"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RENDER_BODY))
        .mount(&server)
        .await;

    let client = client_for(&server, Duration::from_secs(5));
    let series = client
        .group_series(&params())
        .await
        .expect("query should succeed");

    assert_eq!(series.len(), 1);
    assert_eq!(series[0].datapoints, vec![
        (Some(11.1), 1_700_000_000),
        (None, 1_700_000_001)
    ]);
}

#[test(tokio::test)]
async fn invalid_window_never_reaches_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server, Duration::from_secs(5));
    let bad = QueryParameters {
        start_time: START,
        end_time: START - 1,
        ..params()
    };
    let err = client
        .group_metrics(&bad)
        .await
        .expect_err("query should be rejected");

    assert!(matches!(
        err.current_context(),
        MetricsError::InvalidQuery { .. }
    ));
    let received = server.received_requests().await.unwrap();
    assert!(received.is_empty());
}

#[test(tokio::test)]
async fn error_status_is_query_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/render"))
        .respond_with(ResponseTemplate::new(500).set_body_string("carbon is down"))
        .mount(&server)
        .await;

    let client = client_for(&server, Duration::from_secs(5));
    let err = client
        .group_metrics(&params())
        .await
        .expect_err("query should fail");

    match err.current_context() {
        MetricsError::QueryFailed { message } => assert!(message.contains("500")),
        other => panic!("expected QueryFailed, got {other:?}"),
    }
    assert!(format!("{err:?}").contains("carbon is down"));
}

#[test(tokio::test)]
async fn slow_collector_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/render"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(RENDER_BODY)
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = client_for(&server, Duration::from_millis(300));
    let err = client
        .group_metrics(&params())
        .await
        .expect_err("query should time out");

    assert!(matches!(
        err.current_context(),
        MetricsError::QueryFailed { .. }
    ));
}

#[test(tokio::test)]
async fn unreachable_collector_is_query_failed() {
    let config = ClientConfig::new("127.0.0.1:9", "127.0.0.1:8333", "wqs")
        .with_request_timeout(Duration::from_secs(2));
    let client = GraphiteClient::with_sink(config, NullSink).expect("should build client");

    let err = client
        .group_metrics(&params())
        .await
        .expect_err("query should fail");
    assert!(matches!(
        err.current_context(),
        MetricsError::QueryFailed { .. }
    ));
}

#[test(tokio::test)]
async fn upload_mirror_posts_plaintext_lines() {
    use wqs_metrics::MetricRecord;
    use wqs_metrics::MetricValues;
    use wqs_metrics::UploadOutcome;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Duration::from_secs(5));
    let record = MetricRecord::new("localhost", "Queue1", "Group1")
        .with_recv(MetricValues::new(5, 2.5).with_latency(1.5));
    let report = client
        .send_at(&format!("{}/upload", server.uri()), &[record], 42)
        .await;
    assert_eq!(report.upload, UploadOutcome::Delivered);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        String::from_utf8_lossy(&requests[0].body),
        "wqs_local_test.localhost.Queue1.Group1.recv.total 5 42\n\
         wqs_local_test.localhost.Queue1.Group1.recv.elapsed 2.5 42\n\
         wqs_local_test.localhost.Queue1.Group1.recv.latency 1.5 42\n"
    );
    assert_eq!(
        requests[0]
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/plain; charset=utf-8")
    );
}

#[test(tokio::test)]
async fn query_client_needs_no_datagram_path() {
    use wqs_metrics::QueryClient;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/render"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RENDER_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let config = ClientConfig::new(server.uri(), "collector.invalid:2003", "wqs_local_test");
    let client = QueryClient::from_config(&config).expect("should build query client");
    let body = client
        .group_metrics(&params())
        .await
        .expect("query should succeed");

    assert_eq!(body, RENDER_BODY);
}
