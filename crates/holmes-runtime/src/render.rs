use std::sync::Arc;

/// Projects snapshots onto an output surface. Called once per processed
/// event, after the state has been replaced and before effects run.
pub trait Render<S, E> {
    /// The initial snapshot, before any event.
    fn mount(&mut self, _state: &Arc<S>) {}

    fn render(&mut self, event: &E, state: &Arc<S>);
}
