#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use holmes_link::{ConnectionEvent, EndpointId, Envelope, LinkError};
use holmes_runtime::{Effect, Host, Program, Render, Transition};
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq)]
pub enum Ev {
    Add(i64),
    /// Adds, then dispatches `Add(n)` as a follow-up.
    Echo(i64),
    Latch,
    Unlatch,
    Escape,
    Remember(i64),
    /// Drops the program's endpoint, if it has one.
    Hangup,
    Restored(Option<Value>),
    Link(ConnectionEvent),
    Unknown,
}

impl From<ConnectionEvent> for Ev {
    fn from(event: ConnectionEvent) -> Self {
        Ev::Link(event)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    pub total: i64,
    pub seen: Vec<i64>,
    pub latched: bool,
    pub escapes: u32,
    pub restored: Option<Value>,
    pub links: Vec<ConnectionEvent>,
}

pub const KEY: &str = "tally";

pub struct Tally {
    pub endpoint: Option<EndpointId>,
}

impl Program for Tally {
    type State = Model;
    type Event = Ev;

    fn init(&self) -> Transition<Model, Ev> {
        let mut transition = Transition::replace(Model::default())
            .with(Effect::read_persisted(KEY, Ev::Restored));
        if let Some(endpoint) = &self.endpoint {
            transition = transition.with(Effect::Connect(endpoint.clone()));
        }
        transition
    }

    fn update(&self, state: &Arc<Model>, event: &Ev) -> Transition<Model, Ev> {
        match event {
            Ev::Add(n) => Transition::modify(state, |m| {
                m.total += n;
                m.seen.push(*n);
            }),
            Ev::Echo(n) => {
                Transition::modify(state, |m| m.seen.push(-n)).with(Effect::Dispatch(Ev::Add(*n)))
            }
            Ev::Latch => Transition::modify(state, |m| m.latched = true)
                .with(Effect::next_cycle(Ev::Unlatch)),
            Ev::Unlatch => Transition::modify(state, |m| m.latched = false),
            Ev::Escape if state.latched => Transition::keep(state),
            Ev::Escape => Transition::modify(state, |m| m.escapes += 1),
            Ev::Remember(n) => Transition::keep(state).with(Effect::persist(KEY, json!(n))),
            Ev::Hangup => match &self.endpoint {
                Some(endpoint) => {
                    Transition::keep(state).with(Effect::Disconnect(endpoint.clone()))
                }
                None => Transition::keep(state),
            },
            Ev::Restored(value) => Transition::modify(state, |m| m.restored = value.clone()),
            Ev::Link(event) => {
                let mut transition = Transition::modify(state, |m| m.links.push(event.clone()));
                if let (ConnectionEvent::Connected(handle), Some(_)) = (event, &self.endpoint) {
                    transition = transition.with(Effect::send(
                        handle.endpoint().clone(),
                        Envelope::new("config", json!(state.total)),
                    ));
                }
                transition
            }
            Ev::Unknown => Transition::keep(state),
        }
    }
}

#[derive(Default)]
pub struct Recorder {
    pub mounted: Option<Arc<Model>>,
    pub frames: Vec<(Ev, Arc<Model>)>,
}

impl Render<Model, Ev> for Recorder {
    fn mount(&mut self, state: &Arc<Model>) {
        self.mounted = Some(Arc::clone(state));
    }

    fn render(&mut self, event: &Ev, state: &Arc<Model>) {
        self.frames.push((event.clone(), Arc::clone(state)));
    }
}

#[derive(Default)]
pub struct ScriptedHost {
    pub scheduled: Vec<(Duration, Ev)>,
    pub connected: Vec<EndpointId>,
    pub sent: Vec<(EndpointId, Envelope)>,
    pub disconnected: Vec<EndpointId>,
    pub stopped: bool,
}

impl ScriptedHost {
    pub fn take_scheduled(&mut self) -> Vec<(Duration, Ev)> {
        std::mem::take(&mut self.scheduled)
    }
}

impl Host<Ev> for ScriptedHost {
    fn schedule(&mut self, delay: Duration, event: Ev) {
        self.scheduled.push((delay, event));
    }

    fn connect(&mut self, endpoint: EndpointId) -> Result<(), LinkError> {
        if self.stopped {
            return Err(LinkError::ManagerStopped);
        }
        self.connected.push(endpoint);
        Ok(())
    }

    fn send(&mut self, endpoint: EndpointId, message: Envelope) -> Result<(), LinkError> {
        if self.stopped {
            return Err(LinkError::ManagerStopped);
        }
        self.sent.push((endpoint, message));
        Ok(())
    }

    fn disconnect(&mut self, endpoint: EndpointId) -> Result<(), LinkError> {
        if self.stopped {
            return Err(LinkError::ManagerStopped);
        }
        self.disconnected.push(endpoint);
        Ok(())
    }
}
