use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use holmes_link::{
    ConnectionEvent, ConnectionManager, ConnectionObserver, Connector, EndpointId, Envelope,
    LinkError, LinkPolicy, ManagerHandle, Origin,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::engine::{Engine, Host};
use crate::persist::KeyValueStore;
use crate::program::Program;
use crate::render::Render;

/// Producer side of the runtime inbox. Producers never touch state; they
/// only append.
pub struct Dispatcher<E> {
    inbox: mpsc::UnboundedSender<E>,
}

impl<E> Clone for Dispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            inbox: self.inbox.clone(),
        }
    }
}

impl<E> Dispatcher<E> {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<E>) {
        let (inbox, rx) = mpsc::unbounded_channel();
        (Self { inbox }, rx)
    }

    /// Returns `false` once the runtime is gone.
    pub fn dispatch(&self, event: E) -> bool {
        self.inbox.send(event).is_ok()
    }
}

impl<E> ConnectionObserver for Dispatcher<E>
where
    E: From<ConnectionEvent> + Send + 'static,
{
    fn notify(&self, event: ConnectionEvent) {
        if !self.dispatch(E::from(event)) {
            debug!(target: "holmes::runtime", "connection event dropped; runtime stopped");
        }
    }
}

/// [`Host`] backed by tokio timers and the connection manager.
pub struct TokioHost<E> {
    dispatcher: Dispatcher<E>,
    links: ManagerHandle,
}

impl<E> TokioHost<E> {
    pub fn new(dispatcher: Dispatcher<E>, links: ManagerHandle) -> Self {
        Self { dispatcher, links }
    }
}

impl<E: Send + 'static> Host<E> for TokioHost<E> {
    fn schedule(&mut self, delay: Duration, event: E) {
        if delay.is_zero() {
            self.dispatcher.dispatch(event);
            return;
        }
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            dispatcher.dispatch(event);
        });
    }

    fn connect(&mut self, endpoint: EndpointId) -> Result<(), LinkError> {
        self.links.connect(endpoint)
    }

    fn send(&mut self, endpoint: EndpointId, message: Envelope) -> Result<(), LinkError> {
        self.links.send(endpoint, message)
    }

    fn disconnect(&mut self, endpoint: EndpointId) -> Result<(), LinkError> {
        self.links.close(endpoint)
    }
}

/// An [`Engine`] fed from an async inbox. Must be created inside a tokio
/// runtime; the engine itself only ever runs on the task awaiting
/// [`Runtime::run_until`].
pub struct Runtime<P: Program, R> {
    program: P,
    renderer: R,
    store: Box<dyn KeyValueStore>,
    host: TokioHost<P::Event>,
    dispatcher: Dispatcher<P::Event>,
    inbox: mpsc::UnboundedReceiver<P::Event>,
}

impl<P, R> Runtime<P, R>
where
    P: Program,
    P::Event: From<ConnectionEvent> + Send + 'static,
    R: Render<P::State, P::Event>,
{
    pub fn new<C: Connector>(
        program: P,
        renderer: R,
        store: Box<dyn KeyValueStore>,
        connector: C,
        policy: LinkPolicy,
        origin: Origin,
    ) -> Self {
        let (dispatcher, inbox) = Dispatcher::channel();
        let links = ConnectionManager::spawn(connector, dispatcher.clone(), policy, origin);
        Self {
            program,
            renderer,
            store,
            host: TokioHost::new(dispatcher.clone(), links),
            dispatcher,
            inbox,
        }
    }

    /// A handle for producers (input readers, tests).
    pub fn dispatcher(&self) -> Dispatcher<P::Event> {
        self.dispatcher.clone()
    }

    /// Start the program and process inbox events until `shutdown`
    /// resolves. Returns the final snapshot.
    pub async fn run_until<F>(self, shutdown: F) -> Arc<P::State>
    where
        F: Future<Output = ()>,
    {
        let Self {
            program,
            renderer,
            store,
            host,
            dispatcher,
            mut inbox,
        } = self;
        drop(dispatcher);

        let mut engine = Engine::start(program, renderer, host, store);
        info!(target: "holmes::runtime", "runtime started");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                event = inbox.recv() => match event {
                    Some(event) => {
                        engine.enqueue(event);
                    }
                    None => break,
                },
            }
        }

        let stats = engine.stats();
        info!(
            target: "holmes::runtime",
            drains = stats.drains,
            processed = stats.processed,
            "runtime stopped"
        );
        Arc::clone(engine.state())
    }
}
