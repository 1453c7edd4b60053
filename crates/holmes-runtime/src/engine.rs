use std::sync::Arc;
use std::time::Duration;

use holmes_link::{EndpointId, Envelope, LinkError};
use tracing::{debug, trace, warn};

use crate::effect::Effect;
use crate::persist::KeyValueStore;
use crate::program::Program;
use crate::queue::{DispatchQueue, DrainStats};
use crate::render::Render;

/// The outside world as the engine sees it: timers and connection commands.
pub trait Host<E> {
    fn schedule(&mut self, delay: Duration, event: E);
    fn connect(&mut self, endpoint: EndpointId) -> Result<(), LinkError>;
    fn send(&mut self, endpoint: EndpointId, message: Envelope) -> Result<(), LinkError>;
    fn disconnect(&mut self, endpoint: EndpointId) -> Result<(), LinkError>;
}

/// Owns the application state and the dispatch queue. Every state change
/// goes through [`Engine::enqueue`].
pub struct Engine<P: Program, R, H> {
    queue: DispatchQueue<P::Event>,
    core: Core<P, R, H>,
}

struct Core<P: Program, R, H> {
    program: P,
    renderer: R,
    host: H,
    store: Box<dyn KeyValueStore>,
    state: Arc<P::State>,
}

impl<P, R, H> Engine<P, R, H>
where
    P: Program,
    R: Render<P::State, P::Event>,
    H: Host<P::Event>,
{
    /// Run `program.init()`, mount the initial snapshot and execute the
    /// startup effects.
    pub fn start(program: P, renderer: R, host: H, store: Box<dyn KeyValueStore>) -> Self {
        let init = program.init();
        let mut core = Core {
            program,
            renderer,
            host,
            store,
            state: init.state,
        };
        core.renderer.mount(&core.state);

        let mut engine = Self {
            queue: DispatchQueue::new(),
            core,
        };
        let follow_ups = engine.core.run_effects(init.effects);
        for event in follow_ups {
            engine.queue.enqueue(event);
        }
        engine.drain();
        engine
    }

    /// Append an event and drain the queue unless a drain is running.
    /// Returns the number of events processed by this call.
    pub fn enqueue(&mut self, event: P::Event) -> usize {
        if self.queue.enqueue(event) {
            self.drain()
        } else {
            0
        }
    }

    pub fn state(&self) -> &Arc<P::State> {
        &self.core.state
    }

    pub fn stats(&self) -> DrainStats {
        self.queue.stats()
    }

    pub fn renderer(&self) -> &R {
        &self.core.renderer
    }

    pub fn host(&self) -> &H {
        &self.core.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.core.host
    }

    fn drain(&mut self) -> usize {
        let Self { queue, core } = self;
        queue.drain(|event| core.step(event))
    }
}

impl<P, R, H> Core<P, R, H>
where
    P: Program,
    R: Render<P::State, P::Event>,
    H: Host<P::Event>,
{
    fn step(&mut self, event: P::Event) -> Vec<P::Event> {
        trace!(target: "holmes::runtime", ?event, "processing");
        let transition = self.program.update(&self.state, &event);
        self.state = transition.state;
        self.renderer.render(&event, &self.state);
        self.run_effects(transition.effects)
    }

    /// Execute effects in order; returns events for the queue tail.
    fn run_effects(&mut self, effects: Vec<Effect<P::Event>>) -> Vec<P::Event> {
        let mut follow_ups = Vec::new();
        for effect in effects {
            let label = effect.label();
            let outcome = match effect {
                Effect::Dispatch(event) => {
                    follow_ups.push(event);
                    Ok(())
                }
                Effect::Schedule { delay, event } => {
                    self.host.schedule(delay, event);
                    Ok(())
                }
                Effect::Connect(endpoint) => self.host.connect(endpoint).map_err(|e| e.to_string()),
                Effect::Send { endpoint, message } => {
                    self.host.send(endpoint, message).map_err(|e| e.to_string())
                }
                Effect::Disconnect(endpoint) => {
                    self.host.disconnect(endpoint).map_err(|e| e.to_string())
                }
                Effect::Persist { key, value } => {
                    self.store.set(&key, value).map_err(|e| e.to_string())
                }
                Effect::Forget { key } => self.store.remove(&key).map_err(|e| e.to_string()),
                Effect::ReadPersisted { key, reply } => {
                    let value = self.store.get(&key);
                    debug!(
                        target: "holmes::runtime",
                        %key, found = value.is_some(), "persisted value read"
                    );
                    follow_ups.push(reply(value));
                    Ok(())
                }
            };
            if let Err(error) = outcome {
                warn!(target: "holmes::runtime", effect = label, %error, "effect failed");
            }
        }
        follow_ups
    }
}
