//! Scenario tests against the in-process fake swarm.
//!
//! The fake's ingress stands in for the routing mesh of a one-node cluster,
//! so both scenarios run end to end over real sockets with short timings.

use std::time::Duration;

use swarmnet_e2e::telemetry::init_test_tracing;
use swarmnet_e2e::{external_load_balancing, service_discovery, E2eConfig, ScenarioError};
use swarmnet_reconcile::ScenarioContext;
use swarmnet_sampling::FairnessError;
use swarmnet_testing::{FakeSwarm, FakeSwarmConfig, IdentityMode};

fn fast_config(swarm: &FakeSwarm) -> E2eConfig {
    E2eConfig {
        docker_host: swarm.engine_host(),
        scenario_timeout: Duration::from_secs(20),
        converge_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(20),
        probe_timeout: Duration::from_millis(500),
        sample_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

async fn start(config: FakeSwarmConfig) -> (FakeSwarm, E2eConfig) {
    init_test_tracing();
    let swarm = FakeSwarm::start_with(config).await.unwrap();
    let e2e = fast_config(&swarm);
    (swarm, e2e)
}

async fn assert_cleaned_up(swarm: &FakeSwarm) {
    assert!(swarm.service_names().await.is_empty(), "services left behind");
    assert!(swarm.network_names().await.is_empty(), "networks left behind");
}

#[tokio::test]
async fn test_service_discovery_resolves_every_replica() {
    let (swarm, config) = start(FakeSwarmConfig::default()).await;
    let client = config.client().unwrap();
    let ctx = ScenarioContext::with_timeout(config.scenario_timeout);

    let report = service_discovery(&client, &config, &ctx).await.unwrap();

    assert_eq!(report.resolved.len(), 3);
    assert!(report.service_name.starts_with("service-discovery-"));
    assert_cleaned_up(&swarm).await;

    let requests = swarm.requests().await;
    assert_eq!(requests.first().map(String::as_str), Some("POST /networks/create"));
    assert_eq!(
        requests.last().map(String::as_str),
        Some(format!("DELETE /networks/{}", report.network_id).as_str())
    );
}

#[tokio::test]
async fn test_service_discovery_mismatch_still_cleans_up() {
    let (swarm, config) = start(FakeSwarmConfig {
        dns_answers: Some(2),
        ..Default::default()
    })
    .await;
    let client = config.client().unwrap();
    let ctx = ScenarioContext::with_timeout(config.scenario_timeout);

    let err = service_discovery(&client, &config, &ctx).await.unwrap_err();

    assert!(
        matches!(
            err,
            ScenarioError::DiscoveryMismatch {
                expected: 3,
                got: 2
            }
        ),
        "{err}"
    );
    assert_cleaned_up(&swarm).await;
}

#[tokio::test]
async fn test_teardown_waits_for_slow_task_drain() {
    let (swarm, config) = start(FakeSwarmConfig {
        shutdown_polls: 5,
        ..Default::default()
    })
    .await;
    let client = config.client().unwrap();
    let ctx = ScenarioContext::with_timeout(config.scenario_timeout);

    let report = service_discovery(&client, &config, &ctx).await.unwrap();

    assert_eq!(report.resolved.len(), 3);
    assert_cleaned_up(&swarm).await;

    let requests = swarm.requests().await;
    let removal = requests
        .iter()
        .position(|r| r.starts_with("DELETE /networks/"))
        .unwrap();
    let drain_listings = requests[..removal]
        .iter()
        .rev()
        .take_while(|r| *r == "GET /tasks")
        .count();
    assert!(drain_listings >= 6, "network removed after {drain_listings} listings");
    assert_eq!(
        requests.iter().filter(|r| r.starts_with("DELETE /networks/")).count(),
        1
    );
}

#[tokio::test]
async fn test_teardown_removes_network_even_when_drain_times_out() {
    let (swarm, mut config) = start(FakeSwarmConfig {
        shutdown_polls: u32::MAX,
        ..Default::default()
    })
    .await;
    config.converge_timeout = Duration::from_millis(300);
    let client = config.client().unwrap();
    let ctx = ScenarioContext::with_timeout(config.scenario_timeout);

    let err = service_discovery(&client, &config, &ctx).await.unwrap_err();

    let ScenarioError::Converge(converge) = &err else {
        panic!("expected the drain wait to fail, got {err}");
    };
    assert!(converge.is_timeout());
    assert_eq!(
        converge.last_failure(),
        Some("3 tasks of removed services still present")
    );
    assert!(swarm.service_names().await.is_empty());
    assert!(swarm
        .requests()
        .await
        .iter()
        .any(|r| r.starts_with("DELETE /networks/")));
}

#[tokio::test]
async fn test_no_nodes() {
    let (swarm, config) = start(FakeSwarmConfig {
        node_addrs: Vec::new(),
        ..Default::default()
    })
    .await;
    let client = config.client().unwrap();
    let ctx = ScenarioContext::with_timeout(config.scenario_timeout);

    let err = service_discovery(&client, &config, &ctx).await.unwrap_err();

    assert!(matches!(err, ScenarioError::NoNodes), "{err}");
    assert_cleaned_up(&swarm).await;
}

#[tokio::test]
async fn test_scale_timeout_reports_last_failure() {
    let (swarm, mut config) = start(FakeSwarmConfig {
        startup_polls: u32::MAX,
        ..Default::default()
    })
    .await;
    config.converge_timeout = Duration::from_millis(200);
    let client = config.client().unwrap();
    let ctx = ScenarioContext::with_timeout(config.scenario_timeout);

    let err = external_load_balancing(&client, &config, &ctx)
        .await
        .unwrap_err();

    let ScenarioError::Converge(converge) = &err else {
        panic!("expected convergence failure, got {err}");
    };
    assert!(converge.is_timeout());
    assert!(converge.attempts() >= 2);
    assert_eq!(
        converge.last_failure(),
        Some("expected 3 running tasks, got 0")
    );
    assert_cleaned_up(&swarm).await;
}

#[tokio::test]
async fn test_cancelled_scenario_stops_waiting_and_cleans_up() {
    let (swarm, config) = start(FakeSwarmConfig::default()).await;
    let client = config.client().unwrap();
    let ctx = ScenarioContext::with_timeout(config.scenario_timeout);
    ctx.cancel();

    let err = service_discovery(&client, &config, &ctx).await.unwrap_err();

    let ScenarioError::Converge(converge) = &err else {
        panic!("expected convergence failure, got {err}");
    };
    assert!(!converge.is_timeout());
    assert_eq!(converge.attempts(), 1);
    assert_cleaned_up(&swarm).await;
}

#[tokio::test]
async fn test_external_load_balancing_reaches_every_replica() {
    let (swarm, config) = start(FakeSwarmConfig::default()).await;
    let client = config.client().unwrap();
    let ctx = ScenarioContext::with_timeout(config.scenario_timeout);

    let report = external_load_balancing(&client, &config, &ctx)
        .await
        .unwrap();

    assert_eq!(report.published_port, swarm.ingress_port());
    assert_eq!(report.snapshot.distinct(), 3);
    assert!(report.snapshot.iter().all(|(_, hits)| hits >= config.min_hits));
    assert!(report.stats.recorded >= report.snapshot.total());
    assert_cleaned_up(&swarm).await;
}

#[tokio::test]
async fn test_external_load_balancing_reads_identity_from_body() {
    let (_swarm, config) = start(FakeSwarmConfig {
        identity_mode: IdentityMode::Body,
        ..Default::default()
    })
    .await;
    let client = config.client().unwrap();
    let ctx = ScenarioContext::with_timeout(config.scenario_timeout);

    let report = external_load_balancing(&client, &config, &ctx)
        .await
        .unwrap();

    assert_eq!(report.snapshot.distinct(), 3);
    assert!(report.snapshot.iter().all(|(id, _)| id.starts_with(&report.service_id)));
}

#[tokio::test]
async fn test_rogue_backend_fails_fast() {
    let (swarm, mut config) = start(FakeSwarmConfig {
        rogue_backends: 1,
        ..Default::default()
    })
    .await;
    config.converge_timeout = Duration::from_secs(10);
    let client = config.client().unwrap();
    let ctx = ScenarioContext::with_timeout(config.scenario_timeout);

    let started = std::time::Instant::now();
    let err = external_load_balancing(&client, &config, &ctx)
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            ScenarioError::Unbalanced(FairnessError::Overshoot {
                expected: 3,
                seen: 4
            })
        ),
        "{err}"
    );
    assert!(started.elapsed() < config.converge_timeout);
    assert!(!ctx.is_cancelled(), "only the sampling context is cancelled");
    assert_cleaned_up(&swarm).await;
}
