//! Fake swarm for integration tests.
//!
//! Spins up two `axum` servers on random TCP ports bound to 127.0.0.1:
//!
//! - an **engine** serving the versioned API subset the client uses
//!   (`/_ping`, `/networks`, `/services`, `/tasks`, `/nodes`);
//! - an **ingress** standing in for the routing mesh: every published port
//!   of every service maps onto it. `GET /` round-robins across the running
//!   replicas of the most recently created published service and names the
//!   replica in the `Host` header (or the body), and
//!   `GET /service-discovery?v4=tasks.<name>` answers with task IPs.
//!
//! Tasks start out `pending` and turn `running` after a configurable number
//! of task listings, so callers have to wait for convergence. Tasks of a
//! removed service linger as `shutdown` for a few listings, and a network
//! cannot be removed while tasks are still attached to it. As on a real
//! engine, a `service` task filter naming a removed service is a 404, so
//! lingering tasks only show up in unfiltered listings.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use swarmnet_client::{NetworkCreate, ServiceSpec};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::debug;

/// Where the ingress puts the answering replica's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMode {
    /// `Host` response header.
    Header,
    /// Plain-text body followed by a newline.
    Body,
}

/// Knobs controlling how the fake cluster behaves.
#[derive(Debug, Clone)]
pub struct FakeSwarmConfig {
    /// Addresses reported for cluster nodes.
    pub node_addrs: Vec<String>,

    /// Task listings per service before its tasks report `running`.
    pub startup_polls: u32,

    /// Task listings during which a removed service's tasks linger.
    pub shutdown_polls: u32,

    /// Extra backends the ingress balances onto beyond the replica count.
    pub rogue_backends: usize,

    /// Overrides how many task IPs service discovery returns.
    pub dns_answers: Option<usize>,

    pub identity_mode: IdentityMode,
}

impl Default for FakeSwarmConfig {
    fn default() -> Self {
        Self {
            node_addrs: vec!["127.0.0.1".to_string()],
            startup_polls: 2,
            shutdown_polls: 1,
            rogue_backends: 0,
            dns_answers: None,
            identity_mode: IdentityMode::Header,
        }
    }
}

#[derive(Debug)]
struct FakeService {
    id: String,
    spec: ServiceSpec,
    published_ports: Vec<(u32, u16)>,
    task_polls: u32,
    removed: bool,
    shutdown_polls_left: u32,
    next_backend: usize,
}

impl FakeService {
    fn replicas(&self) -> usize {
        self.spec.replicas().unwrap_or(1) as usize
    }

    fn is_running(&self, config: &FakeSwarmConfig) -> bool {
        !self.removed && self.task_polls >= config.startup_polls
    }

    fn has_tasks(&self) -> bool {
        !self.removed || self.shutdown_polls_left > 0
    }

    fn attached_to(&self, network: &FakeNetwork) -> bool {
        self.spec
            .task_template
            .networks
            .iter()
            .any(|n| n.target == network.id || n.target == network.request.name)
    }

    fn labels_match(&self, filter: &str) -> bool {
        match filter.split_once('=') {
            Some((k, v)) => self.spec.labels.get(k).is_some_and(|value| value == v),
            None => self.spec.labels.contains_key(filter),
        }
    }
}

#[derive(Debug)]
struct FakeNetwork {
    id: String,
    request: NetworkCreate,
}

#[derive(Debug, Default)]
struct SwarmState {
    config: FakeSwarmConfig,
    ingress_port: u16,
    next_id: u64,
    networks: Vec<FakeNetwork>,
    services: Vec<FakeService>,
    requests: Vec<String>,
}

impl SwarmState {
    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:012x}", self.next_id)
    }

    fn service_mut(&mut self, id_or_name: &str) -> Option<&mut FakeService> {
        self.services
            .iter_mut()
            .find(|s| !s.removed && (s.id == id_or_name || s.spec.name == id_or_name))
    }
}

type Shared = Arc<Mutex<SwarmState>>;

/// Handle to a running fake swarm.
pub struct FakeSwarm {
    engine_addr: SocketAddr,
    ingress_addr: SocketAddr,
    state: Shared,
}

impl FakeSwarm {
    /// Start with default behaviour.
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(FakeSwarmConfig::default()).await
    }

    /// Start with the given behaviour. Returns once both servers listen.
    pub async fn start_with(config: FakeSwarmConfig) -> std::io::Result<Self> {
        let engine = TcpListener::bind("127.0.0.1:0").await?;
        let ingress = TcpListener::bind("127.0.0.1:0").await?;
        let engine_addr = engine.local_addr()?;
        let ingress_addr = ingress.local_addr()?;

        let state = Arc::new(Mutex::new(SwarmState {
            config,
            ingress_port: ingress_addr.port(),
            ..Default::default()
        }));

        let engine_app = Router::new()
            .route("/{version}/_ping", get(ping))
            .route("/{version}/networks/create", post(create_network))
            .route("/{version}/networks/{id}", delete(remove_network))
            .route("/{version}/services", get(list_services))
            .route("/{version}/services/create", post(create_service))
            .route(
                "/{version}/services/{id}",
                get(inspect_service).delete(remove_service),
            )
            .route("/{version}/tasks", get(list_tasks))
            .route("/{version}/nodes", get(list_nodes))
            .with_state(Arc::clone(&state));

        let ingress_app = Router::new()
            .route("/", get(balance))
            .route("/service-discovery", get(service_discovery))
            .with_state(Arc::clone(&state));

        tokio::spawn(async move {
            let _ = axum::serve(engine, engine_app).await;
        });
        tokio::spawn(async move {
            let _ = axum::serve(ingress, ingress_app).await;
        });

        Ok(Self {
            engine_addr,
            ingress_addr,
            state,
        })
    }

    /// Engine address in `tcp://` form, as found in `DOCKER_HOST`.
    pub fn engine_host(&self) -> String {
        format!("tcp://{}", self.engine_addr)
    }

    /// Port every published service port maps onto.
    pub fn ingress_port(&self) -> u16 {
        self.ingress_addr.port()
    }

    /// Requests seen by the engine, as `METHOD /path` without the version.
    pub async fn requests(&self) -> Vec<String> {
        self.state.lock().await.requests.clone()
    }

    /// Names of networks that currently exist.
    pub async fn network_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .networks
            .iter()
            .map(|n| n.request.name.clone())
            .collect()
    }

    /// Names of services that have not been removed.
    pub async fn service_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .services
            .iter()
            .filter(|s| !s.removed)
            .map(|s| s.spec.name.clone())
            .collect()
    }

    /// Spec of a live service, by name or ID.
    pub async fn service_spec(&self, id_or_name: &str) -> Option<ServiceSpec> {
        let mut state = self.state.lock().await;
        state.service_mut(id_or_name).map(|s| s.spec.clone())
    }
}

// ---------------------------------------------------------------------------
// Engine handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    filters: Option<String>,
}

impl ListQuery {
    fn parse(&self) -> Result<BTreeMap<String, Vec<String>>, Response> {
        match self.filters.as_deref() {
            None | Some("") => Ok(BTreeMap::new()),
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                engine_error(StatusCode::BAD_REQUEST, format!("invalid filters: {e}"))
            }),
        }
    }
}

fn engine_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "message": message.into() }))).into_response()
}

async fn ping(State(state): State<Shared>) -> &'static str {
    state.lock().await.requests.push("GET /_ping".to_string());
    "OK"
}

async fn create_network(
    State(state): State<Shared>,
    Json(request): Json<NetworkCreate>,
) -> Response {
    let mut state = state.lock().await;
    state.requests.push("POST /networks/create".to_string());

    if request.check_duplicate && state.networks.iter().any(|n| n.request.name == request.name) {
        return engine_error(
            StatusCode::CONFLICT,
            format!("network with name {} already exists", request.name),
        );
    }

    let id = state.allocate_id("net");
    debug!(network = %request.name, network_id = %id, "Fake swarm created network");
    state.networks.push(FakeNetwork {
        id: id.clone(),
        request,
    });
    (StatusCode::CREATED, Json(json!({ "Id": id, "Warning": "" }))).into_response()
}

async fn remove_network(
    State(state): State<Shared>,
    Path((_version, id)): Path<(String, String)>,
) -> Response {
    let mut state = state.lock().await;
    state.requests.push(format!("DELETE /networks/{id}"));

    let Some(index) = state
        .networks
        .iter()
        .position(|n| n.id == id || n.request.name == id)
    else {
        return engine_error(StatusCode::NOT_FOUND, format!("network {id} not found"));
    };

    let network = &state.networks[index];
    let name = network.request.name.clone();
    let in_use = state
        .services
        .iter()
        .any(|s| s.has_tasks() && s.attached_to(network));
    if in_use {
        return engine_error(
            StatusCode::FORBIDDEN,
            format!("error while removing network: network {name} has active endpoints"),
        );
    }

    state.networks.remove(index);
    StatusCode::NO_CONTENT.into_response()
}

async fn create_service(
    State(state): State<Shared>,
    Json(spec): Json<ServiceSpec>,
) -> Response {
    let mut state = state.lock().await;
    state.requests.push("POST /services/create".to_string());

    if spec.name.is_empty() {
        return engine_error(StatusCode::BAD_REQUEST, "service name is required");
    }
    if state.service_mut(&spec.name).is_some() {
        return engine_error(
            StatusCode::CONFLICT,
            format!("service {} already exists", spec.name),
        );
    }
    for attachment in &spec.task_template.networks {
        if !state
            .networks
            .iter()
            .any(|n| n.request.name == attachment.target || n.id == attachment.target)
        {
            return engine_error(
                StatusCode::NOT_FOUND,
                format!("network {} not found", attachment.target),
            );
        }
    }

    let ingress_port = state.ingress_port;
    let published_ports = spec
        .endpoint_spec
        .as_ref()
        .map(|e| e.ports.iter().map(|p| (p.target_port, ingress_port)).collect())
        .unwrap_or_default();

    let id = state.allocate_id("svc");
    debug!(service = %spec.name, service_id = %id, "Fake swarm created service");
    state.services.push(FakeService {
        id: id.clone(),
        spec,
        published_ports,
        task_polls: 0,
        removed: false,
        shutdown_polls_left: 0,
        next_backend: 0,
    });
    (StatusCode::CREATED, Json(json!({ "ID": id }))).into_response()
}

async fn inspect_service(
    State(state): State<Shared>,
    Path((_version, id)): Path<(String, String)>,
) -> Response {
    let mut state = state.lock().await;
    state.requests.push(format!("GET /services/{id}"));

    match state.service_mut(&id) {
        Some(service) => Json(render_service(service)).into_response(),
        None => engine_error(StatusCode::NOT_FOUND, format!("service {id} not found")),
    }
}

async fn list_services(State(state): State<Shared>, Query(query): Query<ListQuery>) -> Response {
    let filters = match query.parse() {
        Ok(filters) => filters,
        Err(response) => return response,
    };

    let mut state = state.lock().await;
    state.requests.push("GET /services".to_string());

    let services: Vec<Value> = state
        .services
        .iter()
        .filter(|s| !s.removed)
        .filter(|s| {
            filters
                .get("label")
                .is_none_or(|labels| labels.iter().all(|l| s.labels_match(l)))
        })
        .filter(|s| {
            filters
                .get("name")
                .is_none_or(|names| names.iter().any(|n| s.spec.name.starts_with(n.as_str())))
        })
        .map(render_service)
        .collect();
    Json(services).into_response()
}

async fn remove_service(
    State(state): State<Shared>,
    Path((_version, id)): Path<(String, String)>,
) -> Response {
    let mut state = state.lock().await;
    state.requests.push(format!("DELETE /services/{id}"));

    let shutdown_polls = state.config.shutdown_polls;
    match state.service_mut(&id) {
        Some(service) => {
            service.removed = true;
            service.shutdown_polls_left = shutdown_polls;
            StatusCode::OK.into_response()
        }
        None => engine_error(StatusCode::NOT_FOUND, format!("service {id} not found")),
    }
}

async fn list_tasks(State(state): State<Shared>, Query(query): Query<ListQuery>) -> Response {
    let filters = match query.parse() {
        Ok(filters) => filters,
        Err(response) => return response,
    };

    let mut guard = state.lock().await;
    let state = &mut *guard;
    state.requests.push("GET /tasks".to_string());

    // The engine resolves every `service` filter value to a live service.
    let wanted = filters.get("service");
    if let Some(missing) = wanted.into_iter().flatten().find(|w| {
        !state
            .services
            .iter()
            .any(|s| !s.removed && (s.id == **w || s.spec.name == **w))
    }) {
        return engine_error(StatusCode::NOT_FOUND, format!("service {missing} not found"));
    }

    let mut tasks = Vec::new();
    for service in state.services.iter_mut() {
        let selected = wanted.is_none_or(|ids| {
            !service.removed && ids.iter().any(|w| *w == service.id || *w == service.spec.name)
        });
        if !selected || !service.has_tasks() {
            continue;
        }

        let task_state = if service.removed {
            service.shutdown_polls_left -= 1;
            "shutdown"
        } else if service.is_running(&state.config) {
            "running"
        } else {
            service.task_polls += 1;
            "pending"
        };

        let desired_state = if service.removed { "shutdown" } else { "running" };
        for slot in 1..=service.replicas() {
            tasks.push(json!({
                "ID": format!("{}.{slot}", service.id),
                "ServiceID": service.id,
                "NodeID": "node000000001",
                "Slot": slot,
                "Status": { "State": task_state, "Message": task_state },
                "DesiredState": desired_state,
            }));
        }
    }
    Json(tasks).into_response()
}

async fn list_nodes(State(state): State<Shared>) -> Response {
    let mut state = state.lock().await;
    state.requests.push("GET /nodes".to_string());

    let nodes: Vec<Value> = state
        .config
        .node_addrs
        .iter()
        .enumerate()
        .map(|(i, addr)| {
            json!({
                "ID": format!("node{:09}", i + 1),
                "Description": { "Hostname": format!("swarm-{}", i + 1) },
                "Status": { "State": "ready", "Addr": addr },
            })
        })
        .collect();
    Json(nodes).into_response()
}

fn render_service(service: &FakeService) -> Value {
    let ports: Vec<Value> = service
        .published_ports
        .iter()
        .map(|(target, published)| {
            json!({
                "Protocol": "tcp",
                "TargetPort": target,
                "PublishedPort": published,
                "PublishMode": "ingress",
            })
        })
        .collect();

    json!({
        "ID": service.id,
        "Spec": service.spec,
        "Endpoint": {
            "Spec": service.spec.endpoint_spec.clone().unwrap_or_default(),
            "Ports": ports,
            "VirtualIPs": [],
        },
    })
}

// ---------------------------------------------------------------------------
// Ingress handlers
// ---------------------------------------------------------------------------

async fn balance(State(state): State<Shared>) -> Response {
    let mut guard = state.lock().await;
    let state = &mut *guard;

    let config = &state.config;
    let Some(service) = state
        .services
        .iter_mut()
        .rev()
        .find(|s| !s.published_ports.is_empty() && s.is_running(config))
    else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no published service").into_response();
    };

    let backends = service.replicas() + config.rogue_backends;
    let slot = service.next_backend % backends + 1;
    service.next_backend += 1;
    let identity = format!("{}.{slot}", service.id);

    match config.identity_mode {
        IdentityMode::Header => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = identity.parse() {
                headers.insert("host", value);
            }
            (headers, "ok").into_response()
        }
        IdentityMode::Body => format!("{identity}\n").into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryQuery {
    v4: String,
}

async fn service_discovery(
    State(state): State<Shared>,
    Query(query): Query<DiscoveryQuery>,
) -> Response {
    let state = state.lock().await;
    let name = query.v4.strip_prefix("tasks.").unwrap_or(&query.v4);

    let Some((index, service)) = state
        .services
        .iter()
        .enumerate()
        .find(|(_, s)| s.spec.name == name && s.is_running(&state.config))
    else {
        return Json(Vec::<String>::new()).into_response();
    };

    let answers = state.config.dns_answers.unwrap_or_else(|| service.replicas());
    let ips: Vec<String> = (1..=answers)
        .map(|slot| format!("10.0.{}.{}", index + 1, slot + 1))
        .collect();
    Json(ips).into_response()
}
