//! Control-plane client for swarm-mode clusters.
//!
//! Speaks the subset of the engine's remote API that the networking checks
//! drive: networks, services, tasks and nodes. Calls are plain
//! request/response over HTTP and may fail transiently while the cluster
//! converges.

pub mod client;
pub mod error;
pub mod types;

pub use client::{
    normalize_host, ClientConfig, SwarmClient, DEFAULT_API_VERSION, DEFAULT_ENGINE_HOST,
};
pub use error::ClientError;
pub use types::{
    ContainerSpec, CreateResponse, Endpoint, EndpointSpec, Filters, NetworkAttachment,
    NetworkCreate, Node, NodeState, PortConfig, PortProtocol, PublishMode, ResolutionMode,
    Service, ServiceMode, ServiceSpec, Task, TaskSpec, TaskState,
};
