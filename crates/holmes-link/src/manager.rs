//! Connection manager: one actor task owning every link and the reconnection
//! store.
//!
//! Per endpoint the link moves through
//! `Connecting → Open → Closed → (Backoff → Connecting)…` until either an
//! explicit close (`Stopped`) or the circuit breaker (`Tripped`). Each
//! connection attempt runs in its own I/O task tagged with an epoch; the task
//! only reports signals back to the actor, and signals from superseded epochs
//! are dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, sleep_until, timeout};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::endpoint::{EndpointId, Origin};
use crate::envelope::Envelope;
use crate::error::LinkError;
use crate::policy::LinkPolicy;
use crate::store::{ConnectionStateStore, ReconnectRecord};
use crate::transport::{Connector, Transport};

const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Opaque reference to one established connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    pub(crate) endpoint: EndpointId,
    pub(crate) epoch: u64,
}

impl ConnectionHandle {
    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// No ready signal within the connect timeout.
    Timeout,
    /// The connector failed before the link opened.
    Refused(String),
    /// The peer closed the link.
    Remote,
    /// Transport error while open.
    Failed(String),
    /// Nothing received within the liveness window.
    LivenessExpired,
    /// Closed on request.
    Requested,
}

/// Everything the manager reports. `Connected`, `Disconnected` and
/// `CircuitOpen` mark state transitions; the others are informational.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected(ConnectionHandle),
    Disconnected {
        endpoint: EndpointId,
        reason: CloseReason,
    },
    CircuitOpen {
        endpoint: EndpointId,
        attempts: u32,
    },
    Message {
        endpoint: EndpointId,
        envelope: Envelope,
    },
    Malformed {
        endpoint: EndpointId,
        error: String,
    },
    TransportError {
        endpoint: EndpointId,
        error: String,
    },
}

impl ConnectionEvent {
    pub fn endpoint(&self) -> &EndpointId {
        match self {
            ConnectionEvent::Connected(handle) => handle.endpoint(),
            ConnectionEvent::Disconnected { endpoint, .. }
            | ConnectionEvent::CircuitOpen { endpoint, .. }
            | ConnectionEvent::Message { endpoint, .. }
            | ConnectionEvent::Malformed { endpoint, .. }
            | ConnectionEvent::TransportError { endpoint, .. } => endpoint,
        }
    }
}

/// Receives manager notifications. Implementations must only enqueue.
pub trait ConnectionObserver: Send + Sync + 'static {
    fn notify(&self, event: ConnectionEvent);
}

impl ConnectionObserver for mpsc::UnboundedSender<ConnectionEvent> {
    fn notify(&self, event: ConnectionEvent) {
        let _ = self.send(event);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Connecting,
    Open,
    Closing,
    Backoff,
    Tripped,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub phase: Option<LinkPhase>,
    pub record: ReconnectRecord,
    pub circuit_open: bool,
}

enum Command {
    Connect(EndpointId),
    Send(EndpointId, Envelope),
    Close(EndpointId),
    Inspect(EndpointId, oneshot::Sender<LinkSnapshot>),
}

/// Cloneable front door to the manager actor.
#[derive(Clone)]
pub struct ManagerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ManagerHandle {
    pub fn connect(&self, endpoint: EndpointId) -> Result<(), LinkError> {
        self.submit(Command::Connect(endpoint))
    }

    /// Dropped silently by the manager unless the link is open.
    pub fn send(&self, endpoint: EndpointId, envelope: Envelope) -> Result<(), LinkError> {
        self.submit(Command::Send(endpoint, envelope))
    }

    pub fn close(&self, endpoint: EndpointId) -> Result<(), LinkError> {
        self.submit(Command::Close(endpoint))
    }

    pub async fn inspect(&self, endpoint: EndpointId) -> Result<LinkSnapshot, LinkError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Inspect(endpoint, reply))?;
        rx.await.map_err(|_| LinkError::ManagerStopped)
    }

    fn submit(&self, command: Command) -> Result<(), LinkError> {
        self.commands
            .send(command)
            .map_err(|_| LinkError::ManagerStopped)
    }
}

enum Signal {
    Opened,
    Inbound(Envelope),
    Malformed(String),
    Fault(String),
    Closed(CloseReason),
    Retry,
}

struct Tagged {
    endpoint: EndpointId,
    epoch: u64,
    signal: Signal,
}

enum Outbound {
    Frame(Envelope),
    Close,
}

struct Link {
    epoch: u64,
    phase: LinkPhase,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    task: Option<JoinHandle<()>>,
}

impl Link {
    fn replace_task(&mut self, task: JoinHandle<()>) {
        if let Some(previous) = self.task.replace(task) {
            previous.abort();
        }
    }
}

pub struct ConnectionManager<C, O> {
    connector: Arc<C>,
    observer: O,
    policy: LinkPolicy,
    origin: Origin,
    store: ConnectionStateStore,
    links: HashMap<EndpointId, Link>,
    next_epoch: u64,
    signals: mpsc::UnboundedSender<Tagged>,
}

impl<C: Connector, O: ConnectionObserver> ConnectionManager<C, O> {
    /// Start the actor on the current tokio runtime. The actor stops once
    /// every [`ManagerHandle`] has been dropped, aborting its links.
    pub fn spawn(connector: C, observer: O, policy: LinkPolicy, origin: Origin) -> ManagerHandle {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let manager = Self {
            connector: Arc::new(connector),
            observer,
            policy,
            origin,
            store: ConnectionStateStore::new(policy.backoff),
            links: HashMap::new(),
            next_epoch: 0,
            signals,
        };
        tokio::spawn(manager.run(command_rx, signal_rx));
        ManagerHandle { commands }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signals: mpsc::UnboundedReceiver<Tagged>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(tagged) = signals.recv() => self.handle_signal(tagged),
            }
        }
        for (endpoint, link) in self.links.drain() {
            if let Some(task) = link.task {
                task.abort();
            }
            trace!(target: "holmes::link", %endpoint, "link aborted on shutdown");
        }
        debug!(target: "holmes::link", "connection manager stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(endpoint) => self.connect(endpoint),
            Command::Send(endpoint, envelope) => self.send(&endpoint, envelope),
            Command::Close(endpoint) => self.close(endpoint),
            Command::Inspect(endpoint, reply) => {
                let snapshot = LinkSnapshot {
                    phase: self.links.get(&endpoint).map(|link| link.phase),
                    record: self.store.get(&endpoint),
                    circuit_open: self.store.is_circuit_open(&endpoint),
                };
                let _ = reply.send(snapshot);
            }
        }
    }

    fn connect(&mut self, endpoint: EndpointId) {
        match self.links.get(&endpoint).map(|link| link.phase) {
            Some(
                phase @ (LinkPhase::Connecting
                | LinkPhase::Open
                | LinkPhase::Closing
                | LinkPhase::Backoff),
            ) => {
                debug!(
                    target: "holmes::link",
                    %endpoint, ?phase, "connect ignored; link already active"
                );
            }
            Some(LinkPhase::Tripped) => {
                warn!(
                    target: "holmes::link",
                    %endpoint, "connect ignored; circuit breaker is open"
                );
            }
            Some(LinkPhase::Stopped) | None => self.start_attempt(endpoint),
        }
    }

    fn send(&mut self, endpoint: &EndpointId, envelope: Envelope) {
        let outbound = self
            .links
            .get(endpoint)
            .filter(|link| link.phase == LinkPhase::Open)
            .and_then(|link| link.outbound.as_ref());
        match outbound {
            Some(outbound) => {
                if outbound.send(Outbound::Frame(envelope)).is_err() {
                    debug!(
                        target: "holmes::link",
                        %endpoint, "send dropped; link task already finished"
                    );
                }
            }
            None => {
                debug!(
                    target: "holmes::link",
                    %endpoint, kind = %envelope.kind, "send dropped; link not open"
                );
            }
        }
    }

    fn close(&mut self, endpoint: EndpointId) {
        let Some(link) = self.links.get_mut(&endpoint) else {
            return;
        };
        match link.phase {
            LinkPhase::Open => {
                link.phase = LinkPhase::Closing;
                let delivered = link
                    .outbound
                    .as_ref()
                    .is_some_and(|outbound| outbound.send(Outbound::Close).is_ok());
                if !delivered {
                    trace!(target: "holmes::link", %endpoint, "close raced with link shutdown");
                }
            }
            LinkPhase::Connecting => {
                if let Some(task) = link.task.take() {
                    task.abort();
                }
                link.phase = LinkPhase::Stopped;
                link.outbound = None;
                info!(target: "holmes::link", %endpoint, "connection attempt cancelled");
                self.observer.notify(ConnectionEvent::Disconnected {
                    endpoint,
                    reason: CloseReason::Requested,
                });
            }
            LinkPhase::Backoff => {
                if let Some(task) = link.task.take() {
                    task.abort();
                }
                link.phase = LinkPhase::Stopped;
                info!(target: "holmes::link", %endpoint, "pending reconnect cancelled");
            }
            LinkPhase::Closing | LinkPhase::Tripped | LinkPhase::Stopped => {}
        }
    }

    fn start_attempt(&mut self, endpoint: EndpointId) {
        let url = match self.origin.url_for(&endpoint) {
            Ok(url) => url,
            Err(err) => {
                error!(target: "holmes::link", %endpoint, error = %err, "cannot resolve endpoint");
                self.observer.notify(ConnectionEvent::TransportError {
                    endpoint,
                    error: err.to_string(),
                });
                return;
            }
        };

        self.next_epoch += 1;
        let epoch = self.next_epoch;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let driver = LinkDriver {
            connector: Arc::clone(&self.connector),
            endpoint: endpoint.clone(),
            url,
            epoch,
            policy: self.policy,
            outbound: outbound_rx,
            signals: self.signals.clone(),
            closed: false,
        };
        let task = tokio::spawn(driver.run());

        debug!(target: "holmes::link", %endpoint, epoch, "connecting");
        let link = self.links.entry(endpoint).or_insert_with(|| Link {
            epoch,
            phase: LinkPhase::Connecting,
            outbound: None,
            task: None,
        });
        link.epoch = epoch;
        link.phase = LinkPhase::Connecting;
        link.outbound = Some(outbound);
        link.replace_task(task);
    }

    fn handle_signal(&mut self, tagged: Tagged) {
        let Tagged {
            endpoint,
            epoch,
            signal,
        } = tagged;
        let Some(link) = self.links.get_mut(&endpoint) else {
            return;
        };
        if link.epoch != epoch {
            trace!(
                target: "holmes::link",
                %endpoint, epoch, current = link.epoch, "stale signal dropped"
            );
            return;
        }

        match signal {
            Signal::Opened => {
                if link.phase != LinkPhase::Connecting {
                    return;
                }
                link.phase = LinkPhase::Open;
                self.store.reset(&endpoint);
                info!(target: "holmes::link", %endpoint, epoch, "connected");
                self.observer
                    .notify(ConnectionEvent::Connected(ConnectionHandle { endpoint, epoch }));
            }
            Signal::Inbound(envelope) => {
                self.observer
                    .notify(ConnectionEvent::Message { endpoint, envelope });
            }
            Signal::Malformed(error) => {
                warn!(target: "holmes::link", %endpoint, %error, "malformed inbound frame");
                self.observer
                    .notify(ConnectionEvent::Malformed { endpoint, error });
            }
            Signal::Fault(error) => {
                warn!(target: "holmes::link", %endpoint, %error, "transport error");
                self.observer
                    .notify(ConnectionEvent::TransportError { endpoint, error });
            }
            Signal::Closed(reason) => self.on_closed(endpoint, reason),
            Signal::Retry => {
                if link.phase == LinkPhase::Backoff {
                    self.start_attempt(endpoint);
                }
            }
        }
    }

    fn on_closed(&mut self, endpoint: EndpointId, reason: CloseReason) {
        let Some(link) = self.links.get_mut(&endpoint) else {
            return;
        };
        match link.phase {
            LinkPhase::Closing => {
                link.phase = LinkPhase::Stopped;
                link.outbound = None;
                info!(target: "holmes::link", %endpoint, "closed on request");
                self.observer.notify(ConnectionEvent::Disconnected {
                    endpoint,
                    reason: CloseReason::Requested,
                });
                return;
            }
            LinkPhase::Connecting | LinkPhase::Open => {}
            LinkPhase::Backoff | LinkPhase::Tripped | LinkPhase::Stopped => return,
        }

        link.outbound = None;
        info!(target: "holmes::link", %endpoint, ?reason, "disconnected");
        self.observer.notify(ConnectionEvent::Disconnected {
            endpoint: endpoint.clone(),
            reason,
        });

        let record = self.store.record_failure(&endpoint);
        if self.store.is_circuit_open(&endpoint) {
            link.phase = LinkPhase::Tripped;
            error!(
                target: "holmes::link",
                %endpoint,
                attempts = record.attempts,
                "circuit breaker open; giving up on endpoint"
            );
            self.observer.notify(ConnectionEvent::CircuitOpen {
                endpoint,
                attempts: record.attempts,
            });
            return;
        }

        link.phase = LinkPhase::Backoff;
        let wait = jittered(record.delay, self.policy.jitter);
        info!(
            target: "holmes::link",
            %endpoint,
            attempt = record.attempts,
            delay_ms = wait.as_millis() as u64,
            "scheduling reconnect"
        );
        let signals = self.signals.clone();
        let epoch = link.epoch;
        let timer_endpoint = endpoint.clone();
        link.replace_task(tokio::spawn(async move {
            sleep(wait).await;
            let _ = signals.send(Tagged {
                endpoint: timer_endpoint,
                epoch,
                signal: Signal::Retry,
            });
        }));
    }
}

fn jittered(delay: Duration, ratio: f64) -> Duration {
    if ratio.is_nan() || ratio <= 0.0 {
        return delay;
    }
    let extra = rand::thread_rng().gen_range(0.0..=ratio.min(1.0));
    delay + delay.mul_f64(extra)
}

/// One connection attempt and, if it opens, the life of that connection.
/// Always reports exactly one `Closed`, even when the task is torn down by a
/// panic in the connector or transport.
struct LinkDriver<C> {
    connector: Arc<C>,
    endpoint: EndpointId,
    url: Url,
    epoch: u64,
    policy: LinkPolicy,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    signals: mpsc::UnboundedSender<Tagged>,
    closed: bool,
}

impl<C: Connector> LinkDriver<C> {
    async fn run(mut self) {
        let connect = self.connector.connect(&self.url);
        let mut transport = match timeout(self.policy.connection_timeout, connect).await {
            Ok(Ok(transport)) => transport,
            Ok(Err(err)) => {
                self.emit(Signal::Fault(err.to_string()));
                self.finish(CloseReason::Refused(err.to_string()));
                return;
            }
            Err(_) => {
                warn!(
                    target: "holmes::link",
                    endpoint = %self.endpoint,
                    url = %self.url,
                    timeout_ms = self.policy.connection_timeout.as_millis() as u64,
                    "connection timeout"
                );
                self.finish(CloseReason::Timeout);
                return;
            }
        };

        self.emit(Signal::Opened);
        let reason = self.pump(transport.as_mut()).await;
        self.finish(reason);
    }

    fn finish(&mut self, reason: CloseReason) {
        self.closed = true;
        self.emit(Signal::Closed(reason));
    }

    async fn pump(&mut self, transport: &mut dyn Transport) -> CloseReason {
        let period = self.policy.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_inbound = Instant::now();

        loop {
            let liveness = self.policy.liveness_timeout;
            let deadline = liveness.map_or_else(|| Instant::now() + FAR_FUTURE, |window| {
                last_inbound + window
            });

            tokio::select! {
                frame = transport.recv_text() => match frame {
                    Some(Ok(text)) => {
                        last_inbound = Instant::now();
                        match Envelope::decode(&text) {
                            Ok(envelope) => self.emit(Signal::Inbound(envelope)),
                            Err(err) => self.emit(Signal::Malformed(err.to_string())),
                        }
                    }
                    Some(Err(err)) => {
                        self.emit(Signal::Fault(err.to_string()));
                        return CloseReason::Failed(err.to_string());
                    }
                    None => return CloseReason::Remote,
                },
                command = self.outbound.recv() => match command {
                    Some(Outbound::Frame(envelope)) => {
                        if let Err(reason) = self.write(transport, &envelope).await {
                            return reason;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        transport.close().await;
                        return CloseReason::Requested;
                    }
                },
                _ = heartbeat.tick() => {
                    trace!(target: "holmes::link::heartbeat", endpoint = %self.endpoint, "ping");
                    if let Err(reason) = self.write(transport, &Envelope::ping()).await {
                        return reason;
                    }
                }
                _ = sleep_until(deadline), if liveness.is_some() => {
                    warn!(
                        target: "holmes::link::heartbeat",
                        endpoint = %self.endpoint, "liveness window expired"
                    );
                    transport.close().await;
                    return CloseReason::LivenessExpired;
                }
            }
        }
    }

    async fn write(
        &self,
        transport: &mut dyn Transport,
        envelope: &Envelope,
    ) -> Result<(), CloseReason> {
        let text = match envelope.encode() {
            Ok(text) => text,
            Err(err) => {
                self.emit(Signal::Fault(err.to_string()));
                return Ok(());
            }
        };
        transport.send_text(text).await.map_err(|err| {
            self.emit(Signal::Fault(err.to_string()));
            CloseReason::Failed(err.to_string())
        })
    }

    fn emit(&self, signal: Signal) {
        let _ = self.signals.send(Tagged {
            endpoint: self.endpoint.clone(),
            epoch: self.epoch,
            signal,
        });
    }
}

impl<C> Drop for LinkDriver<C> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // aborted by the manager (stale epoch, ignored) or unwound by a panic
        let _ = self.signals.send(Tagged {
            endpoint: self.endpoint.clone(),
            epoch: self.epoch,
            signal: Signal::Closed(CloseReason::Failed(ABANDONED.to_string())),
        });
    }
}

const ABANDONED: &str = "link task ended without closing";
