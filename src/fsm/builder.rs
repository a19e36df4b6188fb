//! Declarative construction of a [`StateMachine`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::table::{Table, Transition};
use super::{Action, EventSender, FailureCallback, Label, StateMachine};
use crate::error::FsmError;
use crate::events::Bus;

/// Builder for a [`StateMachine`].
///
/// Collects plain transition records; nothing survives past [`build`](Self::build)
/// except the merged, immutable table.
pub struct StateMachineBuilder<S, E> {
    name: String,
    tx: mpsc::UnboundedSender<E>,
    rx: mpsc::UnboundedReceiver<E>,
    initial: Option<S>,
    terminal: HashSet<S>,
    specific: Vec<(S, E, Vec<S>, Option<Action<S, E>>)>,
    wildcard: Vec<(E, Vec<S>, Option<Action<S, E>>)>,
    on_failure: Option<FailureCallback>,
    bus: Option<Bus>,
    synchronous: bool,
    tick: Duration,
    poll: Duration,
}

impl<S: Label, E: Label> StateMachineBuilder<S, E> {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            tx,
            rx,
            initial: None,
            terminal: HashSet::new(),
            specific: Vec::new(),
            wildcard: Vec::new(),
            on_failure: None,
            bus: None,
            synchronous: false,
            tick: Duration::from_millis(1),
            poll: Duration::from_millis(100),
        }
    }

    /// Handle to the event queue of the machine being built.
    pub fn sender(&self) -> EventSender<E> {
        EventSender::new(Arc::from(self.name.as_str()), self.tx.clone())
    }

    /// Sets the initial state.
    pub fn initial(mut self, state: S) -> Self {
        self.initial = Some(state);
        self
    }

    /// Adds terminal states.
    pub fn terminal(mut self, states: impl IntoIterator<Item = S>) -> Self {
        self.terminal.extend(states);
        self
    }

    /// Declares `from --event--> targets` without an action.
    pub fn transition(self, from: S, event: E, targets: impl IntoIterator<Item = S>) -> Self {
        self.push(from, event, targets, None)
    }

    /// Declares `from --event--> targets` running `action` first.
    pub fn transition_with(
        self,
        from: S,
        event: E,
        targets: impl IntoIterator<Item = S>,
        action: Action<S, E>,
    ) -> Self {
        self.push(from, event, targets, Some(action))
    }

    /// Declares a wildcard transition consulted in every state.
    pub fn any_state(mut self, event: E, targets: impl IntoIterator<Item = S>) -> Self {
        self.wildcard
            .push((event, targets.into_iter().collect(), None));
        self
    }

    /// Declares a wildcard transition with an action.
    pub fn any_state_with(
        mut self,
        event: E,
        targets: impl IntoIterator<Item = S>,
        action: Action<S, E>,
    ) -> Self {
        self.wildcard
            .push((event, targets.into_iter().collect(), Some(action)));
        self
    }

    /// Callback invoked when the machine fails (action error, unresolved target, external failure).
    pub fn on_failure(mut self, callback: impl Fn(&FsmError) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(callback));
        self
    }

    /// Publishes transitions and failures on `bus`.
    pub fn notify(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// No background dispatcher: every [`StateMachine::execute`] call runs one tick.
    pub fn synchronous(mut self) -> Self {
        self.synchronous = true;
        self
    }

    /// Idle interval of the background dispatcher.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_micros(100));
        self
    }

    /// Polling interval used by [`StateMachine::await_termination`].
    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll.max(Duration::from_millis(1));
        self
    }

    fn push(
        mut self,
        from: S,
        event: E,
        targets: impl IntoIterator<Item = S>,
        action: Option<Action<S, E>>,
    ) -> Self {
        self.specific
            .push((from, event, targets.into_iter().collect(), action));
        self
    }

    /// Validates the declarations and starts the machine.
    ///
    /// In asynchronous mode the dispatcher is spawned on the current tokio runtime.
    ///
    /// # Errors
    /// - [`FsmError::MissingInitial`] / [`FsmError::MissingTerminal`] if unset.
    /// - [`FsmError::EmptyTargets`] if a transition declares no target.
    pub fn build(self) -> Result<StateMachine<S, E>, FsmError> {
        let initial = self.initial.ok_or_else(|| FsmError::MissingInitial {
            fsm: self.name.clone(),
        })?;
        if self.terminal.is_empty() {
            return Err(FsmError::MissingTerminal { fsm: self.name });
        }

        let mut known: HashSet<S> = self.terminal.clone();
        known.insert(initial);

        let mut specific: HashMap<S, HashMap<E, Arc<Transition<S, E>>>> = HashMap::new();
        for (from, event, targets, action) in self.specific {
            let entry = transition(&self.name, format!("{from:?}"), event, targets, action)?;
            known.insert(from);
            known.extend(entry.targets.iter().copied());
            if specific
                .entry(from)
                .or_default()
                .insert(event, Arc::new(entry))
                .is_some()
            {
                tracing::debug!(fsm = %self.name, state = ?from, event = ?event, "transition redeclared");
            }
        }

        let mut wildcard: HashMap<E, Arc<Transition<S, E>>> = HashMap::new();
        for (event, targets, action) in self.wildcard {
            let entry = transition(&self.name, "*".to_string(), event, targets, action)?;
            known.extend(entry.targets.iter().copied());
            wildcard.insert(event, Arc::new(entry));
        }

        let table = Table::merge(known, specific, wildcard);
        Ok(StateMachine::start(
            self.name,
            (self.tx, self.rx),
            table,
            initial,
            self.terminal,
            self.on_failure,
            self.bus,
            (!self.synchronous).then_some(self.tick),
            self.poll,
        ))
    }
}

fn transition<S: Label, E: Label>(
    fsm: &str,
    from: String,
    event: E,
    targets: Vec<S>,
    action: Option<Action<S, E>>,
) -> Result<Transition<S, E>, FsmError> {
    if targets.is_empty() {
        return Err(FsmError::EmptyTargets {
            fsm: fsm.to_string(),
            state: from,
            event: format!("{event:?}"),
        });
    }
    Ok(Transition {
        targets: Arc::from(targets),
        action,
    })
}
