use std::fmt::Debug;
use std::sync::Arc;

use crate::effect::Effect;

/// The result of folding one event: the next snapshot and the effects to run.
#[derive(Debug)]
pub struct Transition<S, E> {
    pub state: Arc<S>,
    pub effects: Vec<Effect<E>>,
}

impl<S, E> Transition<S, E> {
    /// No change: hands back the same snapshot.
    pub fn keep(state: &Arc<S>) -> Self {
        Self {
            state: Arc::clone(state),
            effects: Vec::new(),
        }
    }

    pub fn replace(state: S) -> Self {
        Self {
            state: Arc::new(state),
            effects: Vec::new(),
        }
    }

    pub fn with(mut self, effect: Effect<E>) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_all(mut self, effects: impl IntoIterator<Item = Effect<E>>) -> Self {
        self.effects.extend(effects);
        self
    }

    /// Whether this transition still points at `previous`.
    pub fn is_unchanged(&self, previous: &Arc<S>) -> bool {
        Arc::ptr_eq(&self.state, previous)
    }
}

impl<S: Clone, E> Transition<S, E> {
    /// Copy the snapshot, apply `edit` to the copy and wrap it.
    pub fn modify(state: &Arc<S>, edit: impl FnOnce(&mut S)) -> Self {
        let mut next = S::clone(state);
        edit(&mut next);
        Self::replace(next)
    }
}

/// Pure application logic: `(state, event) -> (state', effects)`.
///
/// `update` must be total and deterministic. Every event kind the program
/// does not recognize must map to [`Transition::keep`].
pub trait Program {
    type State: Clone + Debug;
    type Event: Debug;

    fn init(&self) -> Transition<Self::State, Self::Event>;

    fn update(
        &self,
        state: &Arc<Self::State>,
        event: &Self::Event,
    ) -> Transition<Self::State, Self::Event>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_returns_the_same_snapshot() {
        let state = Arc::new(vec![1, 2]);
        let transition: Transition<_, ()> = Transition::keep(&state);
        assert!(transition.is_unchanged(&state));
        assert!(transition.effects.is_empty());
    }

    #[test]
    fn modify_leaves_the_previous_snapshot_untouched() {
        let state = Arc::new(vec![1, 2]);
        let transition: Transition<_, ()> = Transition::modify(&state, |items| items.push(3));
        assert!(!transition.is_unchanged(&state));
        assert_eq!(*state, vec![1, 2]);
        assert_eq!(*transition.state, vec![1, 2, 3]);
    }
}
