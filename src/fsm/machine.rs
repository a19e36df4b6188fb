//! # State machine runtime: event queue, dispatcher and status.
//!
//! ## Locks
//! - `status` (`parking_lot::RwLock`): written only by the dispatcher tick and by
//!   failure paths; read by every status accessor. Never held across `.await`.
//! - `queue` (`tokio::sync::mpsc` unbounded): producers never touch the status lock.
//!   The receiver sits behind a short `parking_lot::Mutex` taken only for `try_recv`.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::table::Table;
use super::{FailureCallback, Label, StateMachineBuilder, Transit};
use crate::error::{FsmError, panic_message};
use crate::events::{Bus, Event};

struct Status<S, E> {
    current: S,
    failed: bool,
    terminated: bool,
    pending: Option<E>,
}

/// Outcome of one dispatcher tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    /// Queue was empty.
    Idle,
    /// An event is being processed by another caller.
    Busy,
    /// One event was consumed (applied or ignored).
    Processed,
    /// Machine is terminated; the queue was drained.
    Stopped,
}

struct Core<S, E> {
    name: Arc<str>,
    table: Table<S, E>,
    initial: S,
    terminal: HashSet<S>,
    status: RwLock<Status<S, E>>,
    tx: mpsc::UnboundedSender<E>,
    rx: Mutex<mpsc::UnboundedReceiver<E>>,
    last_error: Mutex<Option<Arc<FsmError>>>,
    on_failure: Option<FailureCallback>,
    bus: Option<Bus>,
}

/// Event-driven state machine with a single serialized dispatcher.
///
/// See the [module docs](crate::fsm) for the processing rules.
pub struct StateMachine<S, E> {
    core: Arc<Core<S, E>>,
    token: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    poll: Duration,
}

impl<S: Label, E: Label> StateMachine<S, E> {
    /// Starts declaring a machine called `name`.
    pub fn builder(name: impl Into<String>) -> StateMachineBuilder<S, E> {
        StateMachineBuilder::new(name)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn start(
        name: String,
        (tx, rx): (mpsc::UnboundedSender<E>, mpsc::UnboundedReceiver<E>),
        table: Table<S, E>,
        initial: S,
        terminal: HashSet<S>,
        on_failure: Option<FailureCallback>,
        bus: Option<Bus>,
        tick: Option<Duration>,
        poll: Duration,
    ) -> Self {
        let core = Arc::new(Core {
            name: Arc::from(name),
            table,
            initial,
            terminal,
            status: RwLock::new(Status {
                current: initial,
                failed: false,
                terminated: false,
                pending: None,
            }),
            tx,
            rx: Mutex::new(rx),
            last_error: Mutex::new(None),
            on_failure,
            bus,
        });

        let token = CancellationToken::new();
        let dispatcher =
            tick.map(|tick| tokio::spawn(dispatch_loop(Arc::clone(&core), token.clone(), tick)));

        Self {
            core,
            token,
            dispatcher: Mutex::new(dispatcher),
            poll,
        }
    }

    /// Name given at construction.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Enqueues `event`. Never blocks; callable from any thread or task.
    ///
    /// On a terminated machine the event is still accepted but will never change the state.
    pub fn fire(&self, event: E) {
        if self.is_terminated() {
            tracing::warn!(fsm = %self.core.name, event = ?event, "event fired on terminated state machine");
        }
        let _ = self.core.tx.send(event);
    }

    /// Runs exactly one dispatcher tick on the caller's task.
    ///
    /// Intended for machines built with [`StateMachineBuilder::synchronous`].
    pub async fn execute(&self) {
        let _ = self.core.tick().await;
    }

    /// Current state.
    pub fn current_state(&self) -> S {
        self.core.status.read().current
    }

    /// True if the current state equals `state`.
    pub fn is_in_state(&self, state: S) -> bool {
        self.core.status.read().current == state
    }

    /// Left the initial state and neither failed nor terminated.
    pub fn is_running(&self) -> bool {
        let st = self.core.status.read();
        st.current != self.core.initial && !st.terminated && !st.failed
    }

    pub fn is_terminated(&self) -> bool {
        self.core.status.read().terminated
    }

    pub fn is_failed(&self) -> bool {
        self.core.status.read().failed
    }

    /// Error that failed the machine, if any.
    pub fn last_error(&self) -> Option<Arc<FsmError>> {
        self.core.last_error.lock().clone()
    }

    /// Events accepted in the current state.
    pub fn accepted_events(&self) -> Vec<E> {
        self.core.table.events_of(self.current_state())
    }

    /// Fails the machine from the outside: `failed ∧ terminated`, callback invoked.
    pub fn fail_with(&self, error: anyhow::Error) {
        let from = self.current_state();
        self.core.fail(
            from,
            None,
            FsmError::External {
                fsm: self.core.name.to_string(),
                source: error,
            },
        );
    }

    /// Waits until the machine is terminated, polling at the configured interval.
    pub async fn await_termination(&self) {
        while !self.is_terminated() {
            tokio::time::sleep(self.poll).await;
        }
    }

    /// Stops the dispatcher of a terminated machine and drains leftover events.
    ///
    /// Must not be awaited from one of this machine's own actions.
    ///
    /// # Errors
    /// [`FsmError::NotTerminated`] if the machine has not reached a terminal state.
    pub async fn shutdown(&self) -> Result<(), FsmError> {
        if !self.is_terminated() {
            return Err(FsmError::NotTerminated {
                fsm: self.core.name.to_string(),
            });
        }
        self.stop_dispatcher().await;
        Ok(())
    }

    /// Stops the dispatcher regardless of state and marks the machine terminated.
    ///
    /// Must not be awaited from one of this machine's own actions.
    pub async fn force_shutdown(&self) {
        {
            let mut st = self.core.status.write();
            if !st.terminated {
                tracing::warn!(fsm = %self.core.name, state = ?st.current, "forced shutdown");
            }
            st.terminated = true;
        }
        self.stop_dispatcher().await;
    }

    async fn stop_dispatcher(&self) {
        self.token.cancel();
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.core.drain();
    }
}

impl<S, E> Drop for StateMachine<S, E> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl<S: Label, E: Label> std::fmt::Debug for StateMachine<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.core.status.read();
        f.debug_struct("StateMachine")
            .field("name", &self.core.name)
            .field("current", &st.current)
            .field("failed", &st.failed)
            .field("terminated", &st.terminated)
            .finish()
    }
}

impl<S: Label, E: Label> Core<S, E> {
    async fn tick(&self) -> Tick {
        let (from, event) = {
            let mut st = self.status.write();
            if st.terminated || st.failed {
                drop(st);
                self.drain();
                return Tick::Stopped;
            }
            if st.pending.is_some() {
                return Tick::Busy;
            }
            let Ok(event) = self.rx.lock().try_recv() else {
                return Tick::Idle;
            };
            st.pending = Some(event);
            (st.current, event)
        };

        let Some(transition) = self.table.lookup(from, event) else {
            tracing::debug!(fsm = %self.name, state = ?from, event = ?event, "no transition; event ignored");
            self.status.write().pending = None;
            return Tick::Processed;
        };

        let transit = Transit::new(
            Arc::clone(&self.name),
            from,
            event,
            Arc::clone(&transition.targets),
        );
        let outcome = match &transition.action {
            None => Ok(()),
            Some(action) => match AssertUnwindSafe(action(transit.clone()))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => Err(anyhow::anyhow!("action panicked: {}", panic_message(&*panic))),
            },
        };

        if let Err(source) = outcome {
            self.fail(
                from,
                Some(event),
                FsmError::ActionFailed {
                    fsm: self.name.to_string(),
                    state: format!("{from:?}"),
                    event: format!("{event:?}"),
                    source,
                },
            );
            return Tick::Processed;
        }

        let Some(to) = transit.resolve() else {
            self.fail(
                from,
                Some(event),
                FsmError::UnresolvedTarget {
                    fsm: self.name.to_string(),
                    state: format!("{from:?}"),
                    event: format!("{event:?}"),
                },
            );
            return Tick::Processed;
        };

        let terminal = self.terminal.contains(&to);
        {
            let mut st = self.status.write();
            st.current = to;
            st.pending = None;
            if terminal {
                st.terminated = true;
            }
        }
        tracing::debug!(fsm = %self.name, from = ?from, event = ?event, to = ?to, terminal, "transition");
        if let Some(bus) = &self.bus {
            bus.publish(Event::state_changed(
                Arc::clone(&self.name),
                format!("{from:?}"),
                format!("{event:?}"),
                format!("{to:?}"),
            ));
        }
        Tick::Processed
    }

    fn fail(&self, from: S, event: Option<E>, error: FsmError) {
        {
            let mut st = self.status.write();
            st.failed = true;
            st.terminated = true;
            st.pending = None;
        }
        tracing::error!(fsm = %self.name, state = ?from, event = ?event, error = %error, "state machine failed");

        let error = Arc::new(error);
        *self.last_error.lock() = Some(Arc::clone(&error));
        if let Some(bus) = &self.bus {
            bus.publish(Event::transition_failed(
                Arc::clone(&self.name),
                format!("{from:?}"),
                event.map(|e| format!("{e:?}")),
                error.to_string(),
            ));
        }
        if let Some(callback) = &self.on_failure {
            callback(&error);
        }
    }

    fn drain(&self) {
        let mut rx = self.rx.lock();
        while let Ok(event) = rx.try_recv() {
            tracing::warn!(fsm = %self.name, event = ?event, "discarding event of terminated state machine");
        }
    }
}

async fn dispatch_loop<S: Label, E: Label>(
    core: Arc<Core<S, E>>,
    token: CancellationToken,
    tick: Duration,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        if token.is_cancelled() {
            break;
        }
        match core.tick().await {
            Tick::Stopped => break,
            // Keep draining a busy queue without waiting for the next tick.
            Tick::Processed => {
                tokio::task::yield_now().await;
                continue;
            }
            Tick::Idle | Tick::Busy => {}
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }
    }
    tracing::debug!(fsm = %core.name, "dispatcher stopped");
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::fsm::action;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum State {
        State1,
        State2,
        State3,
        End,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum Ev {
        Event1,
        Event2,
        Event3,
        Global,
    }

    fn machine(errors: Arc<AtomicUsize>) -> StateMachine<State, Ev> {
        StateMachine::builder("test")
            .initial(State::State1)
            .terminal([State::End])
            .transition(State::State1, Ev::Event1, [State::State2])
            .transition_with(
                State::State2,
                Ev::Event2,
                [State::State3],
                action(|_t| async { Ok(()) }),
            )
            .transition_with(
                State::State1,
                Ev::Event2,
                [State::State2],
                action(|_t| async { Err(anyhow::anyhow!("action exploded")) }),
            )
            .any_state(Ev::Global, [State::End])
            .on_failure(move |_e| {
                errors.fetch_add(1, Ordering::SeqCst);
            })
            .synchronous()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn starts_in_initial_state() {
        let fsm = machine(Arc::default());
        assert!(fsm.is_in_state(State::State1));
        assert!(!fsm.is_running());
        assert!(!fsm.is_terminated());
    }

    #[tokio::test]
    async fn single_transition_is_applied() {
        let fsm = machine(Arc::default());
        fsm.fire(Ev::Event1);
        fsm.execute().await;
        assert_eq!(fsm.current_state(), State::State2);
        assert!(fsm.is_running());
    }

    #[tokio::test]
    async fn unexpected_event_is_ignored() {
        let fsm = machine(Arc::default());
        fsm.fire(Ev::Event3);
        fsm.execute().await;
        assert_eq!(fsm.current_state(), State::State1);
        assert!(!fsm.is_failed());
        assert!(!fsm.is_terminated());

        // The guard must not stay armed after an ignored event.
        fsm.fire(Ev::Event1);
        fsm.execute().await;
        assert_eq!(fsm.current_state(), State::State2);
    }

    #[tokio::test]
    async fn multiple_transitions_in_order() {
        let fsm = machine(Arc::default());
        fsm.fire(Ev::Event1);
        fsm.fire(Ev::Event2);
        fsm.execute().await;
        fsm.execute().await;
        assert_eq!(fsm.current_state(), State::State3);
    }

    #[tokio::test]
    async fn wildcard_event_reaches_terminal_state() {
        let fsm = machine(Arc::default());
        fsm.fire(Ev::Event1);
        fsm.fire(Ev::Global);
        fsm.execute().await;
        fsm.execute().await;
        assert_eq!(fsm.current_state(), State::End);
        assert!(fsm.is_terminated());
        assert!(!fsm.is_failed());
    }

    #[tokio::test]
    async fn failing_action_fails_machine() {
        let errors = Arc::new(AtomicUsize::new(0));
        let fsm = machine(Arc::clone(&errors));
        fsm.fire(Ev::Event2);
        fsm.execute().await;

        assert!(fsm.is_failed());
        assert!(fsm.is_terminated());
        assert!(!fsm.is_in_state(State::State2));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(fsm.last_error().unwrap().as_label(), "fsm_action_failed");
    }

    #[tokio::test]
    async fn fail_with_marks_failed_and_terminated() {
        let errors = Arc::new(AtomicUsize::new(0));
        let fsm = machine(Arc::clone(&errors));
        fsm.fail_with(anyhow::anyhow!("external"));
        assert!(fsm.is_failed());
        assert!(fsm.is_terminated());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn terminated_machine_ignores_further_events() {
        let fsm = machine(Arc::default());
        fsm.fire(Ev::Global);
        fsm.execute().await;
        assert!(fsm.is_terminated());

        fsm.fire(Ev::Event1);
        fsm.execute().await;
        assert_eq!(fsm.current_state(), State::End);
    }

    #[tokio::test]
    async fn ambiguous_transition_without_choice_fails() {
        let fsm: StateMachine<State, Ev> = StateMachine::builder("ambiguous")
            .initial(State::State1)
            .terminal([State::End])
            .transition_with(
                State::State1,
                Ev::Event1,
                [State::State2, State::State3],
                action(|_t| async { Ok(()) }),
            )
            .synchronous()
            .build()
            .unwrap();

        fsm.fire(Ev::Event1);
        fsm.execute().await;
        assert!(fsm.is_failed());
        assert_eq!(fsm.current_state(), State::State1);
        assert_eq!(fsm.last_error().unwrap().as_label(), "fsm_unresolved_target");
    }

    #[tokio::test]
    async fn action_chooses_among_targets() {
        let fsm: StateMachine<State, Ev> = StateMachine::builder("chooser")
            .initial(State::State1)
            .terminal([State::End])
            .transition_with(
                State::State1,
                Ev::Event1,
                [State::State2, State::State3],
                action(|t| async move {
                    t.go_to(State::State3)?;
                    Ok(())
                }),
            )
            .synchronous()
            .build()
            .unwrap();

        fsm.fire(Ev::Event1);
        fsm.execute().await;
        assert_eq!(fsm.current_state(), State::State3);
    }

    #[tokio::test]
    async fn panicking_action_fails_machine() {
        let fsm: StateMachine<State, Ev> = StateMachine::builder("panic")
            .initial(State::State1)
            .terminal([State::End])
            .transition_with(
                State::State1,
                Ev::Event1,
                [State::State2],
                action(|_t| async { panic!("kaboom") }),
            )
            .synchronous()
            .build()
            .unwrap();

        fsm.fire(Ev::Event1);
        fsm.execute().await;
        assert!(fsm.is_failed());
        assert_eq!(fsm.current_state(), State::State1);
    }

    #[test]
    fn build_requires_initial_and_terminal() {
        let err = StateMachine::<State, Ev>::builder("x")
            .terminal([State::End])
            .synchronous()
            .build()
            .unwrap_err();
        assert_eq!(err.as_label(), "fsm_missing_initial");

        let err = StateMachine::<State, Ev>::builder("x")
            .initial(State::State1)
            .synchronous()
            .build()
            .unwrap_err();
        assert_eq!(err.as_label(), "fsm_missing_terminal");

        let err = StateMachine::<State, Ev>::builder("x")
            .initial(State::State1)
            .terminal([State::End])
            .transition(State::State1, Ev::Event1, [])
            .synchronous()
            .build()
            .unwrap_err();
        assert_eq!(err.as_label(), "fsm_empty_targets");
    }

    #[tokio::test]
    async fn shutdown_requires_termination() {
        let fsm = machine(Arc::default());
        assert!(fsm.shutdown().await.is_err());
        fsm.force_shutdown().await;
        assert!(fsm.is_terminated());
        assert!(fsm.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn background_dispatcher_serializes_actions() {
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();

        let step = {
            let (active, overlaps, runs) =
                (Arc::clone(&active), Arc::clone(&overlaps), Arc::clone(&runs));
            action(move |_t| {
                let (active, overlaps, runs) =
                    (Arc::clone(&active), Arc::clone(&overlaps), Arc::clone(&runs));
                async move {
                    if active.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };

        let fsm: Arc<StateMachine<State, Ev>> = Arc::new(
            StateMachine::builder("serial")
                .initial(State::State1)
                .terminal([State::End])
                .transition_with(State::State1, Ev::Event1, [State::State1], step)
                .any_state(Ev::Global, [State::End])
                .notify(bus)
                .with_poll(Duration::from_millis(5))
                .build()
                .unwrap(),
        );

        let mut producers = Vec::new();
        for _ in 0..4 {
            let fsm = Arc::clone(&fsm);
            producers.push(tokio::spawn(async move {
                for _ in 0..5 {
                    fsm.fire(Ev::Event1);
                }
            }));
        }
        for p in producers {
            p.await.unwrap();
        }
        fsm.fire(Ev::Global);

        tokio::time::timeout(Duration::from_secs(5), fsm.await_termination())
            .await
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 20);
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert!(fsm.shutdown().await.is_ok());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::StateChanged);
        assert_eq!(first.fsm.as_deref(), Some("serial"));
    }
}
