//! Immutable transition table.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Action, Label};

/// One entry of the table: declared targets plus an optional action.
pub(crate) struct Transition<S, E> {
    pub(crate) targets: Arc<[S]>,
    pub(crate) action: Option<Action<S, E>>,
}

/// Per-state event tables, wildcard entries already merged in.
pub(crate) struct Table<S, E> {
    states: HashMap<S, HashMap<E, Arc<Transition<S, E>>>>,
}

impl<S: Label, E: Label> Table<S, E> {
    /// Merges wildcard and state-specific entries for every known state.
    ///
    /// A state-specific entry replaces a wildcard entry for the same event.
    pub(crate) fn merge(
        known: impl IntoIterator<Item = S>,
        specific: HashMap<S, HashMap<E, Arc<Transition<S, E>>>>,
        wildcard: HashMap<E, Arc<Transition<S, E>>>,
    ) -> Self {
        let mut states: HashMap<S, HashMap<E, Arc<Transition<S, E>>>> = HashMap::new();
        for state in known {
            let mut events = wildcard.clone();
            if let Some(own) = specific.get(&state) {
                events.extend(own.iter().map(|(e, t)| (*e, Arc::clone(t))));
            }
            states.insert(state, events);
        }
        Self { states }
    }

    pub(crate) fn lookup(&self, state: S, event: E) -> Option<Arc<Transition<S, E>>> {
        self.states
            .get(&state)
            .and_then(|events| events.get(&event))
            .cloned()
    }

    /// Events accepted in `state`.
    pub(crate) fn events_of(&self, state: S) -> Vec<E> {
        self.states
            .get(&state)
            .map(|events| events.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(targets: &[u8]) -> Arc<Transition<u8, char>> {
        Arc::new(Transition {
            targets: Arc::from(targets),
            action: None,
        })
    }

    #[test]
    fn specific_entry_wins_over_wildcard() {
        let mut specific = HashMap::new();
        specific.insert(1u8, HashMap::from([('x', entry(&[2]))]));
        let wildcard = HashMap::from([('x', entry(&[9])), ('y', entry(&[9]))]);

        let table = Table::merge([1u8, 2], specific, wildcard);

        assert_eq!(&*table.lookup(1, 'x').unwrap().targets, &[2]);
        assert_eq!(&*table.lookup(2, 'x').unwrap().targets, &[9]);
        assert_eq!(&*table.lookup(1, 'y').unwrap().targets, &[9]);
        assert!(table.lookup(1, 'z').is_none());
        assert!(table.lookup(7, 'x').is_none());
    }

    #[test]
    fn lookup_is_deterministic() {
        let mut specific = HashMap::new();
        specific.insert(1u8, HashMap::from([('x', entry(&[2, 3]))]));
        let table = Table::merge([1u8, 2, 3], specific, HashMap::new());

        let first = table.lookup(1, 'x').unwrap();
        let second = table.lookup(1, 'x').unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(table.events_of(1), vec!['x']);
    }
}
