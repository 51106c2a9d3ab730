//! client config
//!
//! Shared by the datagram transport and the render query client.

use std::time::Duration;

use error_stack::bail;
use error_stack::ResultExt;
use url::Url;

use crate::error::MetricsError;
use crate::error::MetricsResult;

/// Path of the collector's render endpoint, relative to the base URL.
const RENDER_PATH: &str = "render";

/// Metrics client config.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// collector host identity, `host[:port]` or a base URL
    pub host: String,
    /// collector datagram address, `host:port`
    pub udp_addr: String,
    /// metric name prefix, may contain dots
    pub prefix: String,
    /// HTTP upload and query timeout
    pub request_timeout: Duration,
    /// per-datagram write timeout
    pub write_timeout: Duration,
}

impl ClientConfig {
    /// create new client config with default timeouts.
    pub fn new(
        host: impl Into<String>,
        udp_addr: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            udp_addr: udp_addr.into(),
            prefix: prefix.into(),
            request_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(1),
        }
    }

    /// set HTTP request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// set datagram write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Check the construction parameters.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Configuration`] when a required parameter is
    /// empty, the prefix is malformed or not ASCII, or a timeout is zero.
    pub fn validate(&self) -> MetricsResult<()> {
        if self.host.trim().is_empty() {
            bail!(configuration("collector host must not be empty"));
        }
        if self.udp_addr.trim().is_empty() {
            bail!(configuration("collector datagram address must not be empty"));
        }
        if self.prefix.is_empty() {
            bail!(configuration("metric prefix must not be empty"));
        }
        if self.prefix.chars().any(char::is_whitespace) {
            bail!(configuration(format!(
                "metric prefix `{}` contains whitespace",
                self.prefix
            )));
        }
        if !self.prefix.is_ascii() {
            bail!(configuration(format!(
                "metric prefix `{}` is not ASCII",
                self.prefix
            )));
        }
        if self.prefix.split('.').any(str::is_empty) {
            bail!(configuration(format!(
                "metric prefix `{}` has an empty path segment",
                self.prefix
            )));
        }
        if self.request_timeout.is_zero() || self.write_timeout.is_zero() {
            bail!(configuration("timeouts must be greater than zero"));
        }
        self.base_url()?;
        Ok(())
    }

    /// Base URL of the collector HTTP interface.
    ///
    /// A host without a scheme is reached over plain `http`.
    pub fn base_url(&self) -> MetricsResult<Url> {
        let host = self.host.trim();
        let raw = if host.contains("://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };
        let url = Url::parse(&raw).change_context(configuration(format!(
            "collector host `{host}` is not a valid URL"
        )))?;
        if url.host_str().is_none() {
            bail!(configuration(format!("collector host `{host}` has no host name")));
        }
        Ok(url)
    }

    /// URL of the render endpoint.
    pub fn render_url(&self) -> MetricsResult<Url> {
        let mut url = self.base_url()?;
        let path = format!("{}/{RENDER_PATH}", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.set_query(None);
        Ok(url)
    }

    /// HTTP client carrying the request timeout.
    pub(crate) fn http_client(&self) -> MetricsResult<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .change_context(configuration("Failed to create HTTP client"))
    }

    /// Endpoint reported for records that do not name one.
    pub fn default_endpoint(&self) -> MetricsResult<String> {
        let url = self.base_url()?;
        match url.host_str() {
            Some(host) => Ok(host.trim_start_matches('[').trim_end_matches(']').to_string()),
            None => bail!(configuration("collector host has no host name")),
        }
    }
}

fn configuration(message: impl Into<String>) -> MetricsError {
    MetricsError::Configuration {
        message: message.into(),
    }
}
