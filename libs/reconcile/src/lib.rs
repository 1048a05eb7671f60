//! Convergence helpers for checks against an eventually-consistent cluster.
//!
//! After a control-plane action the cluster converges asynchronously, so
//! checks sample a condition until it holds instead of asserting once. Key
//! concepts:
//!
//! - **Condition**: a read-only predicate over current cluster state.
//! - **Scenario context**: a cancellation token plus a finite deadline,
//!   shared by everything a scenario starts.
//! - **Convergence**: the condition holding before the deadline.
//!
//! # Invariants
//!
//! - A condition is evaluated at least once per wait
//! - Cancellation stops a wait without further evaluations
//! - A wait never outlives its context's deadline by more than one evaluation

pub mod context;
pub mod poller;

pub use context::{DoneReason, ScenarioContext};
pub use poller::{wait_for_converge, ConvergeError, DEFAULT_POLL_INTERVAL};
