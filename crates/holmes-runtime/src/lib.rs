//! Event-sourced model/update/view runtime.
//!
//! Events from any producer land in one ordered [`queue::DispatchQueue`] that
//! is drained by exactly one loop. Each event is folded through a pure
//! [`program::Program`] into a new state snapshot, the snapshot is rendered,
//! and the transition's [`effect::Effect`]s are executed by the
//! [`engine::Engine`]. [`runtime::Runtime`] wires the engine to tokio, the
//! connection manager and a key/value store.

pub mod effect;
pub mod engine;
pub mod persist;
pub mod program;
pub mod queue;
pub mod render;
pub mod runtime;

pub use effect::Effect;
pub use engine::{Engine, Host};
pub use persist::{FileStore, KeyValueStore, MemoryStore, PersistError};
pub use program::{Program, Transition};
pub use queue::{DispatchQueue, DrainStats};
pub use render::Render;
pub use runtime::{Dispatcher, Runtime, TokioHost};
