//! # Jitter policy for poll delays.
//!
//! [`JitterPolicy`] adds randomness to poll delays so that nodes started together
//! do not hammer the shared store at the same instant.
//!
//! - [`JitterPolicy::None`] no randomization, predictable delays
//! - [`JitterPolicy::Full`] random delay in [0, delay]
//! - [`JitterPolicy::Equal`] delay/2 + random[0, delay/2]

use std::time::Duration;

use rand::Rng;

/// Policy controlling randomization of poll delays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Use the exact delay. Useful for tests and single-node setups.
    #[default]
    None,

    /// Random delay in [0, delay].
    Full,

    /// delay/2 + random[0, delay/2]. Keeps roughly three quarters of the delay on average.
    Equal,
}

impl JitterPolicy {
    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::rng();
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Duration::from_millis(rng.random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                let extra = if half == 0 { 0 } else { rng.random_range(0..=half) };
                Duration::from_millis(half + extra)
            }
        }
    }
}
