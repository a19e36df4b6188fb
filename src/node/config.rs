//! # Node runtime configuration.
//!
//! Provides [`Config`] centralized settings for one cluster node: dispatcher
//! timing, readiness polling, shutdown grace and the periodic work of the
//! communication facilities.
//!
//! ## Sentinel values
//! - `readiness_attempts = 0` → poll until ready or interrupted
//! - `cancel_grace = 0s` → wait for cooperative cancellation without bound
//! - `grace = 0s` → do not wait for services at shutdown

use std::time::Duration;

use crate::policies::{BackoffPolicy, JitterPolicy};

/// Configuration for a node and its services.
///
/// ## Field semantics
/// - `grace`: maximum wait for services to terminate on shutdown
/// - `bus_capacity`: event bus ring buffer size (min 1)
/// - `tick`: idle interval of every state machine dispatcher
/// - `termination_poll`: polling interval of `await_termination`
/// - `readiness` / `readiness_attempts`: polling schedule of the worker `START` gate
/// - `cancel_grace`: how long a cancelled task may keep running before it is aborted
/// - `unicast_advert_delay` / `unicast_advert_period`: unicast address advertisement
/// - `query_period` / `query_ttl`: query cache publication and entry lifetime
/// - `propagation_delay`: pause between writing a configuration and broadcasting `LOAD`
/// - `status_period`: publication period of the node status report
///
/// ## Notes
/// All fields are public. Prefer the helper accessors over sentinel checks.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum time to wait for services to terminate on shutdown.
    pub grace: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,

    /// Idle interval of each state machine dispatcher.
    pub tick: Duration,

    /// Polling interval used while waiting for a machine to terminate.
    pub termination_poll: Duration,

    /// Delay schedule between readiness polls.
    pub readiness: BackoffPolicy,

    /// Number of readiness polls before `START` gives up (`0` = unbounded).
    pub readiness_attempts: u32,

    /// Bounded force-cancel window for tasks ignoring cancellation (`0s` = unbounded).
    pub cancel_grace: Duration,

    /// Delay before the first unicast address advertisement.
    pub unicast_advert_delay: Duration,

    /// Period of unicast address advertisements.
    pub unicast_advert_period: Duration,

    /// Period of query cache publications.
    pub query_period: Duration,

    /// Lifetime of a query cache entry.
    pub query_ttl: Duration,

    /// Pause between storing a configuration and broadcasting `LOAD_CONFIGURATION`.
    pub propagation_delay: Duration,

    /// Period of node status publications.
    pub status_period: Duration,
}

impl Config {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Readiness poll limit as an `Option` (`None` = unbounded).
    #[inline]
    pub fn readiness_limit(&self) -> Option<u32> {
        if self.readiness_attempts == 0 {
            None
        } else {
            Some(self.readiness_attempts)
        }
    }

    /// Force-cancel window as an `Option` (`None` = wait forever).
    #[inline]
    pub fn cancel_grace_limit(&self) -> Option<Duration> {
        if self.cancel_grace.is_zero() {
            None
        } else {
            Some(self.cancel_grace)
        }
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `grace = 30s`, `cancel_grace = 10s`
    /// - `bus_capacity = 1024`
    /// - `tick = 1ms`, `termination_poll = 100ms`
    /// - `readiness` 200ms growing ×1.5 up to 2s with equal jitter, 60 attempts
    /// - unicast advertisement after 1s then every 5s
    /// - query cache every 1s, entries live 10s
    /// - `propagation_delay = 0s`
    /// - node status every 1s
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
            tick: Duration::from_millis(1),
            termination_poll: Duration::from_millis(100),
            readiness: BackoffPolicy {
                first: Duration::from_millis(200),
                max: Duration::from_secs(2),
                factor: 1.5,
                jitter: JitterPolicy::Equal,
            },
            readiness_attempts: 60,
            cancel_grace: Duration::from_secs(10),
            unicast_advert_delay: Duration::from_secs(1),
            unicast_advert_period: Duration::from_secs(5),
            query_period: Duration::from_secs(1),
            query_ttl: Duration::from_secs(10),
            propagation_delay: Duration::ZERO,
            status_period: Duration::from_secs(1),
        }
    }
}
