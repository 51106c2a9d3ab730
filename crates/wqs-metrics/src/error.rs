//! Error types for metrics reporting and querying.

use core::error::Error;

use derive_more::Display;
use error_stack::Report;

/// Result type for metrics operations.
pub type MetricsResult<T> = Result<T, Report<MetricsError>>;

/// Errors surfaced by the encoder, the transport and the query client.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum MetricsError {
    /// A record violates the model invariants and was not encoded
    #[display("Invalid metric record: {reason}")]
    InvalidRecord { reason: String },

    /// The datagram socket could not be resolved or opened
    #[display("Transport unavailable: {message}")]
    TransportUnavailable { message: String },

    /// Query parameters rejected before any network call
    #[display("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    /// Network failure, timeout or non-success response on a query
    #[display("Query failed: {message}")]
    QueryFailed { message: String },

    /// Render response body did not match the expected JSON shape
    #[display("Malformed render response: {message}")]
    MalformedResponse { message: String },

    /// Construction parameters are missing or malformed
    #[display("Configuration error: {message}")]
    Configuration { message: String },

    /// Fatal read failure on a listening socket
    #[display("Receive error: {message}")]
    Receive { message: String },
}

impl Error for MetricsError {}

impl MetricsError {
    pub(crate) fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            reason: reason.into(),
        }
    }
}
