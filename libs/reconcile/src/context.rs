//! Cancellable deadlines shared between a scenario and its background tasks.
//!
//! A [`ScenarioContext`] pairs a cancellation token with an absolute
//! deadline. Every long-running task of a scenario is handed a context at
//! construction and stops when it is cancelled or its deadline passes.
//! Child contexts never outlive their parent: cancelling a parent cancels all
//! of its children, while cancelling a child leaves the parent untouched.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Upper bound used when a requested timeout would overflow the clock.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Why a context stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    /// The context (or one of its ancestors) was cancelled explicitly.
    Cancelled,

    /// The deadline elapsed.
    DeadlineExceeded,
}

/// Cancellation token plus a finite deadline.
#[derive(Debug, Clone)]
pub struct ScenarioContext {
    token: CancellationToken,
    deadline: Instant,
}

impl ScenarioContext {
    /// Create a root context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: deadline_after(timeout),
        }
    }

    /// Derive a child context.
    ///
    /// The child's deadline is the earlier of the parent's deadline and
    /// `timeout` from now.
    pub fn child(&self, timeout: Duration) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: deadline_after(timeout).min(self.deadline),
        }
    }

    /// Cancel this context and every child derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true if this context or an ancestor was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns true once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Returns the reason the context is done, if it is.
    pub fn done_reason(&self) -> Option<DoneReason> {
        if self.is_cancelled() {
            Some(DoneReason::Cancelled)
        } else if self.is_expired() {
            Some(DoneReason::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Absolute deadline of this context.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero if it already passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Wait until the context is cancelled or its deadline passes.
    ///
    /// Cancellation wins when both are already true.
    pub async fn done(&self) -> DoneReason {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => DoneReason::Cancelled,
            _ = tokio::time::sleep_until(self.deadline) => DoneReason::DeadlineExceeded,
        }
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}
