//! Data-plane sampling for load-balancing checks.
//!
//! A [`SampleCollector`] probes a published endpoint on its own task and
//! counts which backend answered each request in a [`SampleRegistry`]. A
//! [`FairnessChecker`] reads the registry as a convergence condition and
//! decides when every replica has been reached often enough.

pub mod collector;
pub mod fairness;
pub mod probe;
pub mod registry;

pub use collector::{CollectorHandle, CollectorStats, SampleCollector, DEFAULT_SAMPLE_DELAY};
pub use fairness::{judge, FairnessChecker, FairnessError, DEFAULT_MIN_HITS};
pub use probe::{
    base_url, discover_tasks, HttpProbe, Probe, ProbeError, DEFAULT_IDENTITY_HEADER,
    DEFAULT_PROBE_TIMEOUT, SERVICE_DISCOVERY_PATH,
};
pub use registry::{RegistrySnapshot, SampleRegistry};
