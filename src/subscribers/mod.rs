//! # Event subscribers for the clustervisor runtime.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out and
//! built-in implementations for handling runtime events broadcast through the
//! [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//!   StateMachine ── publish(Event) ──► Bus ──► Node::subscriber_listener
//!                                                 │
//!                                                 └──► SubscriberSet::emit(&Event)
//!                                                          │
//!                                              ┌───────────┼───────────┐
//!                                              ▼           ▼           ▼
//!                                          LogWriter    Metrics     Custom
//! ```

#[cfg(feature = "logging")]
mod embedded;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
