//! Load-balancing fairness verdicts over a [`SampleRegistry`].
//!
//! Traffic is considered balanced once exactly the expected number of
//! backends answered, each at least `min_hits` times. More backends than
//! expected can never converge, so that verdict is fatal.

use std::sync::Arc;

use swarmnet_reconcile::ScenarioContext;
use thiserror::Error;
use tracing::{debug, warn};

use crate::registry::{RegistrySnapshot, SampleRegistry};

/// Default number of hits required from every backend.
pub const DEFAULT_MIN_HITS: u64 = 2;

/// Why traffic is not (yet) balanced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FairnessError {
    /// More distinct backends answered than replicas exist.
    #[error("expected {expected} different backends, got {seen}")]
    Overshoot { expected: usize, seen: usize },

    /// Some backends have not answered yet.
    #[error("haven't seen enough different backends, expected {expected} got {seen}")]
    TooFew { expected: usize, seen: usize },

    /// A backend answered fewer than the required number of times.
    #[error("haven't seen backend {identity} {min_hits} times (seen {hits})")]
    Underobserved {
        identity: String,
        hits: u64,
        min_hits: u64,
    },
}

impl FairnessError {
    /// Returns true if the registry can no longer become balanced.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Overshoot { .. })
    }
}

/// Decides whether sampled traffic reached every replica often enough.
#[derive(Debug, Clone)]
pub struct FairnessChecker {
    registry: Arc<SampleRegistry>,
    expected: usize,
    min_hits: u64,
}

impl FairnessChecker {
    /// Check `registry` against `expected` replicas.
    pub fn new(registry: Arc<SampleRegistry>, expected: usize) -> Self {
        Self {
            registry,
            expected,
            min_hits: DEFAULT_MIN_HITS,
        }
    }

    /// Override the per-backend hit threshold.
    pub fn with_min_hits(mut self, min_hits: u64) -> Self {
        self.min_hits = min_hits;
        self
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Judge the registry as it is now. Has no side effects.
    pub fn evaluate(&self) -> Result<(), FairnessError> {
        judge(&self.registry.snapshot(), self.expected, self.min_hits)
    }

    /// Condition form of [`evaluate`](Self::evaluate).
    ///
    /// A fatal verdict closes the registry and cancels `ctx`, which stops
    /// the collector and any wait driven by the same context.
    pub fn check(&self, ctx: &ScenarioContext) -> Result<(), FairnessError> {
        let verdict = self.evaluate();
        match &verdict {
            Ok(()) => debug!(expected = self.expected, "Traffic is balanced"),
            Err(e) if e.is_fatal() => {
                warn!(error = %e, "Fairness can no longer converge, cancelling");
                self.registry.close();
                ctx.cancel();
            }
            Err(_) => {}
        }
        verdict
    }
}

/// Pure verdict over a snapshot.
pub fn judge(
    snapshot: &RegistrySnapshot,
    expected: usize,
    min_hits: u64,
) -> Result<(), FairnessError> {
    let seen = snapshot.distinct();
    if seen > expected {
        return Err(FairnessError::Overshoot { expected, seen });
    }
    if seen < expected {
        return Err(FairnessError::TooFew { expected, seen });
    }

    match snapshot.least_observed() {
        Some((identity, hits)) if hits < min_hits => Err(FairnessError::Underobserved {
            identity: identity.to_string(),
            hits,
            min_hits,
        }),
        _ => Ok(()),
    }
}
