//! Data-plane probes against published service endpoints.
//!
//! Each probe builds its own HTTP client; no connection is reused between
//! samples.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Default per-request timeout for a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Response header carrying the backend identity.
pub const DEFAULT_IDENTITY_HEADER: &str = "Host";

/// Path of the tester image's DNS lookup route.
pub const SERVICE_DISCOVERY_PATH: &str = "/service-discovery";

/// Probe errors.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The request could not be completed.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("unexpected status: {0}")]
    Status(reqwest::StatusCode),

    /// The response carried neither an identity header nor a body.
    #[error("response did not identify a backend")]
    EmptyIdentity,

    /// The response body could not be decoded.
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A single data-plane request that names the backend which served it.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Issue one request and return the identity of the responding backend.
    async fn sample(&self) -> Result<String, ProbeError>;
}

/// Probe issuing `GET /` against a published port.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    url: String,
    timeout: Duration,
    identity_header: String,
}

impl HttpProbe {
    /// Probe an arbitrary URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: DEFAULT_PROBE_TIMEOUT,
            identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
        }
    }

    /// Probe `http://<host>:<port>/`.
    pub fn for_endpoint(host: &str, port: u16) -> Self {
        Self::new(format!("{}/", base_url(host, port)))
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the header consulted before falling back to the body.
    pub fn with_identity_header(mut self, header: impl Into<String>) -> Self {
        self.identity_header = header.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn sample(&self) -> Result<String, ProbeError> {
        let response = probe_client(self.timeout)?.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status));
        }

        let from_header = response
            .headers()
            .get(self.identity_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let identity = match from_header {
            Some(identity) => identity,
            None => response.text().await?.trim().to_string(),
        };

        if identity.is_empty() {
            return Err(ProbeError::EmptyIdentity);
        }
        Ok(identity)
    }
}

/// Ask the service discovery route which task IPs `query_name` resolves to.
///
/// Queries `http://<host>:<port>/service-discovery?v4=<query_name>` and
/// expects a JSON array of IP address strings.
pub async fn discover_tasks(
    host: &str,
    port: u16,
    query_name: &str,
    timeout: Duration,
) -> Result<Vec<IpAddr>, ProbeError> {
    let url = format!("{}{}", base_url(host, port), SERVICE_DISCOVERY_PATH);
    debug!(url = %url, query_name, "Querying service discovery");

    let response = probe_client(timeout)?
        .get(&url)
        .query(&[("v4", query_name)])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProbeError::Status(status));
    }

    let body = response.bytes().await?;
    let ips: Vec<IpAddr> = serde_json::from_slice(&body)?;
    debug!(query_name, resolved = ips.len(), "Service discovery answered");
    Ok(ips)
}

/// `http://host:port`, bracketing IPv6 literals.
pub fn base_url(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(ip) => format!("http://{}", SocketAddr::new(ip, port)),
        Err(_) => format!("http://{host}:{port}"),
    }
}

fn probe_client(timeout: Duration) -> Result<reqwest::Client, ProbeError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(0)
        .build()?)
}
