//! Datagram line listener.
//!
//! Receives plaintext lines on a UDP socket until cancelled. Used to verify
//! what a client actually puts on the wire, and by the `listen` command.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::MetricsError;
use crate::error::MetricsResult;

/// Largest datagram accepted.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Backoff policy for transient receive errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive transient errors tolerated before giving up
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Delay after `current`, doubled and capped at `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
            max_attempts: 16,
        }
    }
}

/// Source of received datagrams.
pub trait DatagramSource: Send + Sync {
    /// Receive one datagram into `buf`, returning its length and sender.
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl DatagramSource for UdpSocket {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// Listener yielding newline-delimited lines.
#[derive(Debug)]
pub struct LineListener<R = UdpSocket> {
    socket: R,
    retry: RetryPolicy,
}

impl LineListener<UdpSocket> {
    /// Bind a listening socket on `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::TransportUnavailable`] if the socket cannot be
    /// bound.
    pub async fn bind(addr: &str) -> MetricsResult<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .change_context_lazy(|| MetricsError::TransportUnavailable {
                message: format!("cannot bind datagram listener on {addr}"),
            })?;
        Ok(Self::from_source(socket))
    }
}

impl<R: DatagramSource> LineListener<R> {
    /// Listen on an already opened source.
    pub fn from_source(socket: R) -> Self {
        Self {
            socket,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn local_addr(&self) -> MetricsResult<SocketAddr> {
        self.socket
            .local_addr()
            .change_context(MetricsError::TransportUnavailable {
                message: "listener has no local address".into(),
            })
    }

    /// Receive until `cancel` fires, passing every line to `on_line`.
    ///
    /// Returns the number of lines delivered.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Receive`] on a non-transient read error, or
    /// when transient errors persist past the retry policy.
    pub async fn run<F>(self, cancel: CancellationToken, mut on_line: F) -> MetricsResult<u64>
    where F: FnMut(&str) {
        let addr = self.local_addr()?;
        info!(%addr, "Datagram listener started");

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut received = 0u64;
        let mut failures = 0u32;
        let mut delay = self.retry.initial_delay;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.socket.recv_from(&mut buf) => result,
            };

            match result {
                Ok((len, peer)) => {
                    failures = 0;
                    delay = self.retry.initial_delay;
                    match std::str::from_utf8(&buf[..len]) {
                        Ok(text) => {
                            for line in text.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
                                on_line(line);
                                received += 1;
                            }
                        }
                        Err(_) => warn!(%peer, bytes = len, "Dropping non UTF-8 datagram"),
                    }
                }
                Err(err) if is_transient(&err) => {
                    failures += 1;
                    if failures > self.retry.max_attempts {
                        return Err(Report::new(err).change_context(MetricsError::Receive {
                            message: format!("{failures} consecutive receive errors on {addr}"),
                        }));
                    }
                    debug!(error = %err, attempt = failures, "Transient receive error, backing off");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = self.retry.next_delay(delay);
                }
                Err(err) => {
                    warn!(error = %err, "Datagram listener failed");
                    return Err(Report::new(err).change_context(MetricsError::Receive {
                        message: format!("receive on {addr} failed"),
                    }));
                }
            }
        }

        info!(%addr, lines = received, "Datagram listener stopped");
        Ok(received)
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    /// Source replaying a fixed sequence of datagrams and errors, then idle.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<Vec<u8>, io::ErrorKind>>>,
    }

    impl ScriptedSource {
        fn new(script: impl IntoIterator<Item = Result<Vec<u8>, io::ErrorKind>>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
            }
        }
    }

    impl DatagramSource for ScriptedSource {
        async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(payload)) => {
                    buf[..payload.len()].copy_from_slice(&payload);
                    Ok((payload.len(), SocketAddr::from(([127, 0, 0, 1], 9000))))
                }
                Some(Err(kind)) => Err(io::Error::from(kind)),
                None => std::future::pending().await,
            }
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 8333)))
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_attempts,
        }
    }

    /// Run `source` until `expected` lines arrive, then cancel.
    async fn run_scripted(
        source: ScriptedSource,
        retry: RetryPolicy,
        expected: usize,
    ) -> (Vec<String>, MetricsResult<u64>) {
        let listener = LineListener::from_source(source).with_retry_policy(retry);
        let cancel = CancellationToken::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = tokio::spawn(listener.run(cancel.clone(), move |line| {
            let _ = tx.send(line.to_string());
        }));

        let mut lines = Vec::new();
        while lines.len() < expected {
            match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
                Ok(Some(line)) => lines.push(line),
                _ => break,
            }
        }
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("listener should stop in time")
            .unwrap();
        (lines, result)
    }

    #[test]
    fn backoff_delay_is_capped() {
        let retry = RetryPolicy::default();
        let mut delay = retry.initial_delay;
        let mut delays = Vec::new();
        for _ in 0..8 {
            delays.push(delay.as_millis());
            delay = retry.next_delay(delay);
        }
        assert_eq!(delays, vec![10, 20, 40, 80, 160, 320, 500, 500]);
    }

    #[test(tokio::test)]
    async fn non_utf8_datagram_is_skipped() {
        let source = ScriptedSource::new([Ok(b"\xff\xfe".to_vec()), Ok(b"ok 1 2\n".to_vec())]);
        let (lines, result) = run_scripted(source, RetryPolicy::default(), 1).await;

        assert_eq!(lines, vec!["ok 1 2"]);
        assert_eq!(result.expect("listener should stop cleanly"), 1);
    }

    #[test(tokio::test)]
    async fn transient_errors_are_retried() {
        let source = ScriptedSource::new([
            Err(io::ErrorKind::ConnectionRefused),
            Err(io::ErrorKind::Interrupted),
            Err(io::ErrorKind::ConnectionRefused),
            Ok(b"a 1 2\n".to_vec()),
        ]);
        let (lines, result) = run_scripted(source, fast_retry(3), 1).await;

        assert_eq!(lines, vec!["a 1 2"]);
        assert_eq!(result.expect("listener should stop cleanly"), 1);
    }

    #[test(tokio::test)]
    async fn persistent_transient_errors_give_up() {
        let retry = fast_retry(3);
        let source = ScriptedSource::new(
            (0..=retry.max_attempts).map(|_| Err(io::ErrorKind::ConnectionRefused)),
        );
        let (lines, result) = run_scripted(source, retry, 1).await;

        assert!(lines.is_empty());
        let err = result.expect_err("listener should give up");
        assert!(matches!(err.current_context(), MetricsError::Receive { .. }));
    }

    #[test(tokio::test)]
    async fn fatal_error_ends_immediately() {
        let source = ScriptedSource::new([
            Err(io::ErrorKind::PermissionDenied),
            Ok(b"never 1 2\n".to_vec()),
        ]);
        let (lines, result) = run_scripted(source, RetryPolicy::default(), 1).await;

        assert!(lines.is_empty());
        let err = result.expect_err("listener should fail");
        assert!(matches!(err.current_context(), MetricsError::Receive { .. }));
    }

    #[test]
    fn transient_error_classification() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionRefused)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::InvalidInput)));
    }

    #[test(tokio::test)]
    async fn cancellation_stops_promptly() {
        let listener = LineListener::bind("127.0.0.1:0").await.expect("should bind");
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(listener.run(cancel.clone(), |_| {}));

        cancel.cancel();
        let received = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener should stop in time")
            .unwrap()
            .expect("listener should stop cleanly");
        assert_eq!(received, 0);
    }

    #[test(tokio::test)]
    async fn splits_multi_line_datagrams() {
        let listener = LineListener::bind("127.0.0.1:0").await.expect("should bind");
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = tokio::spawn(listener.run(cancel.clone(), move |line| {
            let _ = tx.send(line.to_string());
        }));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"a 1 2\nb 3 4\n\n", addr).await.unwrap();

        let mut lines = Vec::new();
        for _ in 0..2 {
            let line = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("line should arrive")
                .unwrap();
            lines.push(line);
        }
        cancel.cancel();
        let received = handle.await.unwrap().expect("listener should stop cleanly");

        assert_eq!(lines, vec!["a 1 2", "b 3 4"]);
        assert_eq!(received, 2);
    }
}
