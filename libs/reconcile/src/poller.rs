//! Fixed-interval convergence polling.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::context::{DoneReason, ScenarioContext};

/// Default interval between condition evaluations.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Errors returned by [`wait_for_converge`].
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// The deadline elapsed before the condition held.
    #[error("failed to converge within {elapsed:?} after {attempts} attempts: {last_failure}")]
    Timeout {
        elapsed: Duration,
        attempts: u32,
        last_failure: String,
    },

    /// The context was cancelled, usually by the condition itself after
    /// detecting a state that can never converge.
    #[error("convergence aborted after {attempts} attempts: {last_failure}")]
    Cancelled { attempts: u32, last_failure: String },

    /// The poll interval was zero.
    #[error("poll interval must be greater than zero")]
    InvalidInterval,
}

impl ConvergeError {
    /// The most recent condition failure, if any evaluation ran.
    pub fn last_failure(&self) -> Option<&str> {
        match self {
            Self::Timeout { last_failure, .. } | Self::Cancelled { last_failure, .. } => {
                Some(last_failure)
            }
            Self::InvalidInterval => None,
        }
    }

    /// Number of condition evaluations performed.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Timeout { attempts, .. } | Self::Cancelled { attempts, .. } => *attempts,
            Self::InvalidInterval => 0,
        }
    }

    /// Returns true if the deadline was exhausted.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Evaluate `condition` every `interval` until it succeeds.
///
/// The first evaluation happens immediately and is always performed, even
/// when `ctx` is already cancelled or expired. Evaluations start on a fixed
/// cadence; a condition slower than `interval` delays the next one rather
/// than bunching them up.
///
/// Returns [`ConvergeError::Cancelled`] as soon as `ctx` is cancelled and
/// [`ConvergeError::Timeout`] once its deadline passes, both carrying the
/// last failure reported by the condition.
pub async fn wait_for_converge<F, Fut, E>(
    ctx: &ScenarioContext,
    interval: Duration,
    mut condition: F,
) -> Result<(), ConvergeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: fmt::Display,
{
    if interval.is_zero() {
        return Err(ConvergeError::InvalidInterval);
    }

    let started = Instant::now();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut attempts = 0u32;
    let mut last_failure = String::new();

    loop {
        tokio::select! {
            biased;
            _ = ticker.tick() => {}
            reason = ctx.done(), if attempts > 0 => {
                return Err(stopped(reason, started, attempts, last_failure));
            }
        }

        attempts += 1;
        match condition().await {
            Ok(()) => {
                debug!(
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Condition converged"
                );
                return Ok(());
            }
            Err(e) => {
                last_failure = e.to_string();
                trace!(attempt = attempts, reason = %last_failure, "Condition not yet satisfied");
            }
        }

        if let Some(reason) = ctx.done_reason() {
            return Err(stopped(reason, started, attempts, last_failure));
        }
    }
}

fn stopped(
    reason: DoneReason,
    started: Instant,
    attempts: u32,
    last_failure: String,
) -> ConvergeError {
    let err = match reason {
        DoneReason::Cancelled => ConvergeError::Cancelled {
            attempts,
            last_failure,
        },
        DoneReason::DeadlineExceeded => ConvergeError::Timeout {
            elapsed: started.elapsed(),
            attempts,
            last_failure,
        },
    };
    debug!(error = %err, "Stopped waiting for convergence");
    err
}
