//! Transition actions and the handle they receive.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use super::Label;
use crate::error::FsmError;

/// Future returned by a transition action.
pub type ActionFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Shared transition action.
pub type Action<S, E> = Arc<dyn Fn(Transit<S, E>) -> ActionFuture + Send + Sync>;

/// Callback invoked once when a machine fails.
pub type FailureCallback = Arc<dyn Fn(&FsmError) + Send + Sync>;

/// Wraps an async closure into an [`Action`].
///
/// ```rust
/// use clustervisor::fsm::{Action, action};
///
/// #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// enum S { A, B, C }
///
/// let pick: Action<S, u8> = action(|t| async move {
///     t.go_to(S::C)?;
///     Ok(())
/// });
/// ```
pub fn action<S, E, F, Fut>(f: F) -> Action<S, E>
where
    S: Label,
    E: Label,
    F: Fn(Transit<S, E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |t| Box::pin(f(t)))
}

/// Handle given to a running action.
///
/// It only lets the action choose among the declared targets of its transition.
#[derive(Clone)]
pub struct Transit<S, E> {
    fsm: Arc<str>,
    from: S,
    event: E,
    targets: Arc<[S]>,
    chosen: Arc<Mutex<Option<S>>>,
}

impl<S: Label, E: Label> Transit<S, E> {
    pub(crate) fn new(fsm: Arc<str>, from: S, event: E, targets: Arc<[S]>) -> Self {
        Self {
            fsm,
            from,
            event,
            targets,
            chosen: Arc::new(Mutex::new(None)),
        }
    }

    /// Selects the target state of this transition.
    ///
    /// Fails with [`FsmError::IllegalTarget`] if `state` is not declared for it.
    /// Calling it again replaces the previous choice.
    pub fn go_to(&self, state: S) -> Result<(), FsmError> {
        if !self.targets.contains(&state) {
            return Err(FsmError::IllegalTarget {
                fsm: self.fsm.to_string(),
                state: format!("{:?}", self.from),
                event: format!("{:?}", self.event),
                target: format!("{state:?}"),
            });
        }
        *self.chosen.lock() = Some(state);
        Ok(())
    }

    /// State the machine was in when the event was popped.
    pub fn from(&self) -> S {
        self.from
    }

    /// Event being processed.
    pub fn event(&self) -> E {
        self.event
    }

    /// Declared targets of the running transition.
    pub fn targets(&self) -> &[S] {
        &self.targets
    }

    pub(crate) fn resolve(&self) -> Option<S> {
        let chosen = *self.chosen.lock();
        match (chosen, self.targets.as_ref()) {
            (Some(state), _) => Some(state),
            (None, [single]) => Some(*single),
            (None, _) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum S {
        A,
        B,
        C,
    }

    fn transit(targets: &[S]) -> Transit<S, u8> {
        Transit::new(Arc::from("t"), S::A, 1, Arc::from(targets))
    }

    #[test]
    fn single_target_resolves_without_choice() {
        assert_eq!(transit(&[S::B]).resolve(), Some(S::B));
    }

    #[test]
    fn multiple_targets_need_a_choice() {
        let t = transit(&[S::B, S::C]);
        assert_eq!(t.resolve(), None);
        t.go_to(S::C).unwrap();
        assert_eq!(t.resolve(), Some(S::C));
    }

    #[test]
    fn undeclared_target_is_rejected() {
        let t = transit(&[S::B, S::C]);
        let err = t.go_to(S::A).unwrap_err();
        assert_eq!(err.as_label(), "fsm_illegal_target");
        assert_eq!(t.resolve(), None);
    }
}
