//! # Generic event-driven state machine engine.
//!
//! A [`StateMachine`] owns an immutable transition table, an unbounded event queue
//! and a single dispatcher that processes one event at a time. Everything the
//! coordination services do (election, topology propagation, computation lifecycle)
//! runs inside transition actions of such machines.
//!
//! ## Architecture
//! ```text
//!  fire(ev) ──► [ unbounded FIFO ] ──► dispatcher (one tokio task, ~1ms tick)
//!  (any thread,                          │
//!   never blocks)                        ├─ lookup (current, ev) in merged table
//!                                        │     └─ missing ─► ignore (debug log)
//!                                        ├─ run action(Transit) ── go_to(target)
//!                                        ├─ resolve target ─► write lock ─► current = target
//!                                        └─ Bus ◄── StateChanged / TransitionFailed
//! ```
//!
//! ## Rules
//! - Actions of one machine never run concurrently; they run in enqueue order.
//! - A missing table entry means *ignore*: state and flags are unchanged.
//! - A transition with several targets must pick one through [`Transit::go_to`];
//!   otherwise the machine fails.
//! - An action error (or panic) fails the machine: `failed ∧ terminated`.
//! - Once terminated, `fire` still enqueues (with a warning) but nothing changes.
//! - State-specific entries take precedence over wildcard (`any_state`) entries.
//!
//! ## Example
//! ```rust
//! use clustervisor::fsm::{StateMachine, action};
//!
//! #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
//! enum Light { Off, On, Broken }
//! #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
//! enum Switch { Toggle, Smash }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let fsm = StateMachine::builder("light")
//!     .initial(Light::Off)
//!     .terminal([Light::Broken])
//!     .transition(Light::Off, Switch::Toggle, [Light::On])
//!     .transition_with(Light::On, Switch::Toggle, [Light::Off], action(|_t| async { Ok(()) }))
//!     .any_state(Switch::Smash, [Light::Broken])
//!     .synchronous()
//!     .build()?;
//!
//! fsm.fire(Switch::Toggle);
//! fsm.execute().await;
//! assert!(fsm.is_in_state(Light::On));
//!
//! fsm.fire(Switch::Smash);
//! fsm.execute().await;
//! assert!(fsm.is_terminated());
//! # Ok(())
//! # }
//! ```

mod builder;
mod machine;
mod sender;
mod table;
mod transit;

use std::fmt::Debug;
use std::hash::Hash;

pub use builder::StateMachineBuilder;
pub use machine::StateMachine;
pub use sender::EventSender;
pub use transit::{Action, ActionFuture, FailureCallback, Transit, action};

/// Bound shared by state and event types: small copyable labels, usually fieldless enums.
pub trait Label: Copy + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> Label for T where T: Copy + Eq + Hash + Debug + Send + Sync + 'static {}
