//! HTTP client for the swarm-mode engine API.
//!
//! Provides the calls the networking checks need:
//! - Creating and removing overlay networks
//! - Creating, inspecting, listing and removing services
//! - Listing tasks and cluster nodes

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::ClientError;
use crate::types::{CreateResponse, Filters, NetworkCreate, Node, Service, ServiceSpec, Task};

/// Default engine address when none is configured.
pub const DEFAULT_ENGINE_HOST: &str = "tcp://127.0.0.1:2375";

/// Default engine API version.
pub const DEFAULT_API_VERSION: &str = "1.41";

/// Connection settings for [`SwarmClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Engine address (`tcp://`, `http://` or `https://`).
    pub host: String,

    /// API version prefix, without the leading `v`.
    pub api_version: String,

    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_ENGINE_HOST.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Engine API client.
#[derive(Debug, Clone)]
pub struct SwarmClient {
    client: reqwest::Client,
    base_url: String,
}

impl SwarmClient {
    /// Create a new client from config.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let root = normalize_host(&config.host)?;
        let version = config.api_version.trim_start_matches('v');
        if version.is_empty() {
            return Err(ClientError::Config("API version must not be empty".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: format!("{root}/v{version}"),
        })
    }

    /// Versioned API root, e.g. `http://10.0.0.1:2375/v1.41`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check that the engine answers.
    pub async fn ping(&self) -> Result<(), ClientError> {
        let response = self.client.get(self.url("/_ping")).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            self.handle_error("/_ping", response).await
        }
    }

    /// Create a network and return its ID.
    pub async fn create_network(&self, request: &NetworkCreate) -> Result<String, ClientError> {
        let created: CreateResponse = self.post("/networks/create", request).await?;
        log_warning(created.warning.as_deref());
        info!(
            network = %request.name,
            network_id = %created.id,
            driver = %request.driver,
            "Created network"
        );
        Ok(created.id)
    }

    /// Remove a network by name or ID.
    pub async fn remove_network(&self, id: &str) -> Result<(), ClientError> {
        self.delete(&format!("/networks/{id}")).await?;
        info!(network = %id, "Removed network");
        Ok(())
    }

    /// Create a service and return its ID.
    pub async fn create_service(&self, spec: &ServiceSpec) -> Result<String, ClientError> {
        let created: CreateResponse = self.post("/services/create", spec).await?;
        log_warning(created.warning.as_deref());
        info!(
            service = %spec.name,
            service_id = %created.id,
            replicas = spec.replicas().unwrap_or_default(),
            "Created service"
        );
        Ok(created.id)
    }

    /// Inspect a service by name or ID.
    pub async fn inspect_service(&self, id: &str) -> Result<Service, ClientError> {
        self.get(&format!("/services/{id}"), None).await
    }

    /// List services matching `filters`.
    pub async fn list_services(&self, filters: &Filters) -> Result<Vec<Service>, ClientError> {
        self.get("/services", Some(filters)).await
    }

    /// Remove a service by name or ID.
    pub async fn remove_service(&self, id: &str) -> Result<(), ClientError> {
        self.delete(&format!("/services/{id}")).await?;
        info!(service = %id, "Removed service");
        Ok(())
    }

    /// List tasks matching `filters`.
    pub async fn list_tasks(&self, filters: &Filters) -> Result<Vec<Task>, ClientError> {
        self.get("/tasks", Some(filters)).await
    }

    /// List cluster nodes.
    pub async fn list_nodes(&self) -> Result<Vec<Node>, ClientError> {
        self.get("/nodes", None).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        filters: Option<&Filters>,
    ) -> Result<T, ClientError> {
        let mut request = self.client.get(self.url(path));
        if let Some(filters) = filters.filter(|f| !f.is_empty()) {
            request = request.query(&[("filters", filters.to_query()?)]);
        }
        debug!(path, "GET");

        let response = request.send().await?;
        self.handle_response(path, response).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        debug!(path, "POST");
        let response = self.client.post(self.url(path)).json(body).send().await?;
        self.handle_response(path, response).await
    }

    async fn delete(&self, path: &str) -> Result<(), ClientError> {
        debug!(path, "DELETE");
        let response = self.client.delete(self.url(path)).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            self.handle_error(path, response).await
        }
    }

    /// Handle a successful or error response.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        path: &str,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        if response.status().is_success() {
            let body = response.bytes().await?;
            Ok(serde_json::from_slice(&body)?)
        } else {
            self.handle_error(path, response).await
        }
    }

    /// Handle an error response.
    async fn handle_error<T>(
        &self,
        path: &str,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<EngineErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or(body);

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(message));
        }

        error!(status = %status, path, message = %message, "Engine request failed");
        Err(ClientError::api(status.as_u16(), message))
    }
}

/// Engine error body.
#[derive(Debug, Deserialize)]
struct EngineErrorResponse {
    message: String,
}

fn log_warning(warning: Option<&str>) {
    if let Some(warning) = warning.filter(|w| !w.is_empty()) {
        tracing::warn!(warning, "Engine returned a warning");
    }
}

/// Turn an engine address into an HTTP root URL.
pub fn normalize_host(host: &str) -> Result<String, ClientError> {
    let host = host.trim().trim_end_matches('/');
    if host.is_empty() {
        return Err(ClientError::Config("engine host must not be empty".to_string()));
    }

    if let Some(rest) = host.strip_prefix("tcp://") {
        return Ok(format!("http://{rest}"));
    }
    if host.starts_with("http://") || host.starts_with("https://") {
        return Ok(host.to_string());
    }
    if host.starts_with("unix://") || host.starts_with("npipe://") {
        return Err(ClientError::Config(format!(
            "{host}: only TCP engine endpoints are supported"
        )));
    }
    if host.contains("://") {
        return Err(ClientError::Config(format!("{host}: unsupported scheme")));
    }
    Ok(format!("http://{host}"))
}
