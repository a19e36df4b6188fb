//! Polling and retry policies.
//!
//! These knobs control **how long** a node waits between polls when it is
//! blocked on a cluster-level condition (readiness gate before `START`,
//! periodic advertisement of unicast addresses).
//!
//! ## Contents
//! - [`BackoffPolicy`] how poll delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy so that nodes do not poll in lockstep
//!
//! ## Quick wiring
//! ```text
//! Config { readiness: BackoffPolicy, readiness_attempts: u32, .. }
//!      └─► worker::ComputationService START action:
//!           - readiness.next(attempt) between polls
//!           - gives up after readiness_attempts polls
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=100ms, factor=1.0 (constant), max=5s, jitter=None.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
