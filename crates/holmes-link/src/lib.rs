//! Long-lived duplex connections for the HOLMES dashboard client.
//!
//! The [`manager`] owns every connection: it opens links with a connect
//! timeout, keeps them alive with heartbeats, and reconnects with exponential
//! backoff until the per-endpoint circuit breaker in [`store`] trips. It never
//! calls application code; everything it observes is reported as a
//! [`ConnectionEvent`] through a [`ConnectionObserver`].

pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod manager;
pub mod mock;
pub mod policy;
pub mod store;
pub mod transport;
pub mod ws;

pub use endpoint::{EndpointId, Origin};
pub use envelope::Envelope;
pub use error::{LinkError, TransportError};
pub use manager::{
    CloseReason, ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionObserver,
    LinkPhase, LinkSnapshot, ManagerHandle,
};
pub use policy::{BackoffPolicy, LinkPolicy};
pub use store::{ConnectionStateStore, ReconnectRecord};
pub use transport::{Connector, Transport};
pub use ws::WsConnector;
