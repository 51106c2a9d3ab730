//! Best-effort datagram transport.
//!
//! Every encoded line travels as its own datagram. Nothing is acknowledged
//! or retried; write failures are counted and logged, never returned.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use error_stack::bail;
use error_stack::Report;
use error_stack::ResultExt;
use reqwest::header::CONTENT_TYPE;
use tokio::net::lookup_host;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;
use tracing::info;

use crate::encoder::Line;
use crate::error::MetricsError;
use crate::error::MetricsResult;

/// Destination for encoded datagrams.
pub trait DatagramSink: Send + Sync {
    /// Write one datagram, returning the number of bytes written.
    fn send_datagram(&self, payload: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

/// UDP socket connected to the collector.
#[derive(Debug)]
pub struct UdpSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpSink {
    /// Resolve `addr` and open a socket connected to it.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::TransportUnavailable`] if the address does not
    /// resolve within `resolve_timeout` or the socket cannot be opened.
    pub async fn connect(addr: &str, resolve_timeout: Duration) -> MetricsResult<Self> {
        let unavailable = || MetricsError::TransportUnavailable {
            message: format!("cannot open datagram socket to {addr}"),
        };

        let mut resolved = timeout(resolve_timeout, lookup_host(addr))
            .await
            .map_err(|_| {
                Report::new(MetricsError::TransportUnavailable {
                    message: format!("resolving {addr} timed out"),
                })
            })?
            .change_context_lazy(unavailable)?;
        let Some(target) = resolved.next() else {
            bail!(MetricsError::TransportUnavailable {
                message: format!("{addr} resolved to no address"),
            });
        };

        let local: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local)
            .await
            .change_context_lazy(unavailable)?;
        socket
            .connect(target)
            .await
            .change_context_lazy(unavailable)?;

        info!(%target, "Datagram transport connected");
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl DatagramSink for UdpSink {
    async fn send_datagram(&self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send(payload).await
    }
}

/// Cumulative transport counters.
#[derive(Debug, Default)]
pub(crate) struct TransportCounters {
    sent: AtomicU64,
    dropped: AtomicU64,
    uploads_failed: AtomicU64,
}

impl TransportCounters {
    pub(crate) fn snapshot(&self) -> TransportStats {
        TransportStats {
            datagrams_sent: self.sent.load(Ordering::Relaxed),
            datagrams_dropped: self.dropped.load(Ordering::Relaxed),
            uploads_failed: self.uploads_failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of the transport counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub datagrams_sent: u64,
    pub datagrams_dropped: u64,
    pub uploads_failed: u64,
}

/// Outcome of the datagram writes of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DatagramOutcome {
    pub delivered: usize,
    pub dropped: usize,
}

/// Datagram writer with per-write timeout and loss accounting.
#[derive(Debug)]
pub(crate) struct Transport<S> {
    sink: S,
    write_timeout: Duration,
    counters: TransportCounters,
}

impl<S: DatagramSink> Transport<S> {
    pub(crate) fn new(sink: S, write_timeout: Duration) -> Self {
        Self {
            sink,
            write_timeout,
            counters: TransportCounters::default(),
        }
    }

    pub(crate) fn sink(&self) -> &S {
        &self.sink
    }

    pub(crate) fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }

    pub(crate) fn record_upload_failure(&self) {
        self.counters.uploads_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Write each line as its own datagram, in order.
    pub(crate) async fn send_lines(&self, lines: &[Line]) -> DatagramOutcome {
        let mut outcome = DatagramOutcome::default();
        for line in lines {
            let payload = line.to_wire();
            match timeout(self.write_timeout, self.sink.send_datagram(payload.as_bytes())).await {
                Ok(Ok(_)) => outcome.delivered += 1,
                Ok(Err(err)) => {
                    debug!(path = %line.path, error = %err, "Datagram write failed");
                    outcome.dropped += 1;
                }
                Err(_) => {
                    debug!(
                        path = %line.path,
                        timeout_ms = self.write_timeout.as_millis() as u64,
                        "Datagram write timed out"
                    );
                    outcome.dropped += 1;
                }
            }
        }

        self.counters
            .sent
            .fetch_add(outcome.delivered as u64, Ordering::Relaxed);
        self.counters
            .dropped
            .fetch_add(outcome.dropped as u64, Ordering::Relaxed);
        outcome
    }
}

/// POST the lines as one plaintext body. Single attempt.
pub(crate) async fn upload_lines(
    http: &reqwest::Client,
    url: &str,
    lines: &[Line],
) -> Result<(), reqwest::Error> {
    let body: String = lines.iter().map(Line::to_wire).collect();
    http.post(url)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(body)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}
