//! Per-backend hit counts shared between a collector and a checker.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Hit counts keyed by backend identity.
///
/// All access goes through one exclusive lock, so readers never observe a
/// partially applied update. Once [`close`](Self::close)d, the registry
/// ignores further hits.
#[derive(Debug, Default)]
pub struct SampleRegistry {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    hits: BTreeMap<String, u64>,
    closed: bool,
}

impl SampleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one response from `identity`.
    ///
    /// Returns the identity's new count, or `None` if the registry is closed
    /// and the hit was discarded.
    pub fn record_hit(&self, identity: &str) -> Option<u64> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }

        let count = inner.hits.entry(identity.to_string()).or_insert(0);
        *count += 1;
        Some(*count)
    }

    /// Copy of the current counts.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            hits: self.lock().hits.clone(),
        }
    }

    /// Stop accepting hits.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// Returns true once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves the map consistent, so a poisoned
        // lock is still safe to read.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Point-in-time view of a [`SampleRegistry`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    hits: BTreeMap<String, u64>,
}

impl RegistrySnapshot {
    /// Number of distinct identities seen.
    pub fn distinct(&self) -> usize {
        self.hits.len()
    }

    /// Total hits across all identities.
    pub fn total(&self) -> u64 {
        self.hits.values().sum()
    }

    /// Count for one identity, zero if never seen.
    pub fn hits(&self, identity: &str) -> u64 {
        self.hits.get(identity).copied().unwrap_or(0)
    }

    /// The identity with the fewest hits, ties broken by name.
    pub fn least_observed(&self) -> Option<(&str, u64)> {
        self.hits
            .iter()
            .min_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(identity, count)| (identity.as_str(), *count))
    }

    /// Iterate identities in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.hits.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}
