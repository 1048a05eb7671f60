//! Configuration for the networking scenarios.

use std::time::Duration;

use swarmnet_client::{
    ClientConfig, ClientError, SwarmClient, DEFAULT_API_VERSION, DEFAULT_ENGINE_HOST,
};
use swarmnet_reconcile::DEFAULT_POLL_INTERVAL;
use swarmnet_sampling::{DEFAULT_MIN_HITS, DEFAULT_PROBE_TIMEOUT, DEFAULT_SAMPLE_DELAY};

/// Default image run by scenario services.
pub const DEFAULT_TESTER_IMAGE: &str = "dperny/tester:latest";

/// Scenario configuration.
#[derive(Debug, Clone)]
pub struct E2eConfig {
    /// Engine address of a manager node.
    pub docker_host: String,

    /// Engine API version.
    pub api_version: String,

    /// Image run by scenario services.
    pub tester_image: String,

    /// Overall budget of one scenario.
    pub scenario_timeout: Duration,

    /// Budget of a single convergence wait.
    pub converge_timeout: Duration,

    /// Interval between condition evaluations.
    pub poll_interval: Duration,

    /// Per-request timeout of data-plane probes.
    pub probe_timeout: Duration,

    /// Pause between two probes of the sample collector.
    pub sample_delay: Duration,

    /// Hits required from every backend before traffic counts as balanced.
    pub min_hits: u64,
}

impl Default for E2eConfig {
    fn default() -> Self {
        Self {
            docker_host: DEFAULT_ENGINE_HOST.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            tester_image: DEFAULT_TESTER_IMAGE.to_string(),
            scenario_timeout: Duration::from_secs(120),
            converge_timeout: Duration::from_secs(60),
            poll_interval: DEFAULT_POLL_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            sample_delay: DEFAULT_SAMPLE_DELAY,
            min_hits: DEFAULT_MIN_HITS,
        }
    }
}

impl E2eConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let docker_host = std::env::var("DOCKER_HOST").unwrap_or(defaults.docker_host);
        let api_version = std::env::var("DOCKER_API_VERSION").unwrap_or(defaults.api_version);
        let tester_image =
            std::env::var("SWARMNET_TESTER_IMAGE").unwrap_or(defaults.tester_image);

        Self {
            docker_host,
            api_version,
            tester_image,
            scenario_timeout: env_secs("SWARMNET_SCENARIO_TIMEOUT_SECS")
                .unwrap_or(defaults.scenario_timeout),
            converge_timeout: env_secs("SWARMNET_CONVERGE_TIMEOUT_SECS")
                .unwrap_or(defaults.converge_timeout),
            poll_interval: env_millis("SWARMNET_POLL_INTERVAL_MS")
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.poll_interval),
            probe_timeout: env_millis("SWARMNET_PROBE_TIMEOUT_MS")
                .unwrap_or(defaults.probe_timeout),
            sample_delay: env_millis("SWARMNET_SAMPLE_DELAY_MS")
                .unwrap_or(defaults.sample_delay),
            min_hits: env_parse("SWARMNET_MIN_HITS").unwrap_or(defaults.min_hits),
        }
    }

    /// Engine client settings derived from this config.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            host: self.docker_host.clone(),
            api_version: self.api_version.clone(),
            ..Default::default()
        }
    }

    /// Build an engine client for the configured host.
    pub fn client(&self) -> Result<SwarmClient, ClientError> {
        SwarmClient::new(&self.client_config())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse(key).map(Duration::from_secs)
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse(key).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = E2eConfig::default();
        assert_eq!(config.docker_host, "tcp://127.0.0.1:2375");
        assert_eq!(config.api_version, "1.41");
        assert_eq!(config.tester_image, "dperny/tester:latest");
        assert_eq!(config.converge_timeout, Duration::from_secs(60));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.probe_timeout, Duration::from_millis(500));
        assert_eq!(config.sample_delay, Duration::from_millis(5));
        assert_eq!(config.min_hits, 2);
    }

    #[test]
    fn test_client_uses_configured_host() {
        let config = E2eConfig {
            docker_host: "tcp://10.1.2.3:2375".to_string(),
            api_version: "1.43".to_string(),
            ..Default::default()
        };
        let client = config.client().unwrap();
        assert_eq!(client.base_url(), "http://10.1.2.3:2375/v1.43");
    }
}
