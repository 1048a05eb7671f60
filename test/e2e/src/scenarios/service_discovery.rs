//! DNS-based service discovery over an overlay network.
//!
//! Replicas of a service attached to the same overlay network must be able
//! to resolve `tasks.<service>` to one address per running task. The tester
//! image exposes the lookup it performs from inside a task as an HTTP route
//! on its published port, which is what this scenario queries.

use std::net::IpAddr;

use swarmnet_client::{NetworkCreate, SwarmClient};
use swarmnet_reconcile::{wait_for_converge, ScenarioContext};
use swarmnet_sampling::discover_tasks;
use tracing::info;

use super::{settle, teardown, ScenarioError, REPLICAS};
use crate::cluster::{
    canned_service_spec, node_ips, scale_check, unique_name, E2E_LABEL, SERVICE_PORT,
};
use crate::config::E2eConfig;

/// What a passing service discovery run observed.
#[derive(Debug, Clone)]
pub struct ServiceDiscoveryReport {
    pub service_name: String,
    pub service_id: String,
    pub network_id: String,
    /// Addresses `tasks.<service>` resolved to.
    pub resolved: Vec<IpAddr>,
}

/// Check that `tasks.<service>` resolves to every replica.
pub async fn service_discovery(
    client: &SwarmClient,
    config: &E2eConfig,
    ctx: &ScenarioContext,
) -> Result<ServiceDiscoveryReport, ScenarioError> {
    let name = unique_name("service-discovery");
    info!(scenario = %name, "Starting service discovery scenario");

    let network = NetworkCreate::overlay(name.as_str()).with_label(E2E_LABEL, "true");
    let network_id = client.create_network(&network).await?;

    let outcome = resolve_replicas(client, config, ctx, &name, &network_id).await;
    let cleanup = teardown(client, config, &name, Some(&network_id)).await;
    settle(&name, outcome, cleanup)
}

async fn resolve_replicas(
    client: &SwarmClient,
    config: &E2eConfig,
    ctx: &ScenarioContext,
    name: &str,
    network_id: &str,
) -> Result<ServiceDiscoveryReport, ScenarioError> {
    let spec = canned_service_spec(
        config,
        name,
        REPLICAS,
        &["util", "test-service-discovery"],
        &[name],
    );
    let service_id = client.create_service(&spec).await?;

    let converge = ctx.child(config.converge_timeout);
    wait_for_converge(&converge, config.poll_interval, || {
        scale_check(client, &service_id, REPLICAS as usize)
    })
    .await?;

    let node = node_ips(client).await?.swap_remove(0);
    let service = client.inspect_service(&service_id).await?;
    let port = service
        .published_port(SERVICE_PORT)
        .ok_or_else(|| ScenarioError::NoPublishedPort {
            service: name.to_string(),
            target_port: SERVICE_PORT,
        })?;

    let query = format!("tasks.{name}");
    let resolved = discover_tasks(&node, port, &query, config.probe_timeout).await?;
    info!(
        service = name,
        node = %node,
        port,
        resolved = resolved.len(),
        "Service discovery answered"
    );

    if resolved.len() != REPLICAS as usize {
        return Err(ScenarioError::DiscoveryMismatch {
            expected: REPLICAS as usize,
            got: resolved.len(),
        });
    }

    Ok(ServiceDiscoveryReport {
        service_name: name.to_string(),
        service_id,
        network_id: network_id.to_string(),
        resolved,
    })
}
