use thiserror::Error;

/// Failures reported by a [`crate::Transport`] or [`crate::Connector`].
///
/// Transport errors are never fatal to the client: the manager turns them into
/// notifications and keeps running its reconnection state machine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("transport closed")]
    Closed,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(String),
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid endpoint {endpoint}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
    #[error("connection manager stopped")]
    ManagerStopped,
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}
