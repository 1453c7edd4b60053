use std::collections::BTreeMap;
use std::fmt;

use holmes_link::{ConnectionHandle, EndpointId, Envelope};
use serde::Deserialize;
use serde_json::Value;

/// The three dashboard services. Each one is a page and owns one link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    #[default]
    Calibration,
    Simulation,
    Projection,
}

impl Service {
    pub const ALL: [Service; 3] = [Service::Calibration, Service::Simulation, Service::Projection];

    pub fn as_str(self) -> &'static str {
        match self {
            Service::Calibration => "calibration",
            Service::Simulation => "simulation",
            Service::Projection => "projection",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|service| service.as_str() == name)
    }

    pub fn endpoint(self) -> EndpointId {
        EndpointId::new(format!("{}/", self.as_str()))
    }

    pub fn from_endpoint(endpoint: &EndpointId) -> Option<Self> {
        Self::parse(endpoint.as_str().trim_matches('/'))
    }

    /// Outbound message type that starts a long computation.
    pub fn run_kind(self) -> &'static str {
        match self {
            Service::Calibration => "calibration_start",
            Service::Simulation => "simulation",
            Service::Projection => "projection",
        }
    }

    /// Inbound message type carrying that computation's result.
    pub fn result_kind(self) -> &'static str {
        match self {
            Service::Calibration => "result",
            Service::Simulation => "simulation",
            Service::Projection => "projection",
        }
    }

    pub fn accepts_outbound(self, kind: &str) -> bool {
        let kinds: &[&str] = match self {
            Service::Calibration => &[
                "config",
                "observations",
                "manual",
                "calibration_start",
                "calibration_stop",
            ],
            Service::Simulation => &["config", "observations", "simulation"],
            Service::Projection => &["config", "projection"],
        };
        kinds.contains(&kind)
    }

    fn accepts_inbound(self, kind: &str) -> bool {
        let kinds: &[&str] = match self {
            Service::Calibration => &["observations", "result"],
            Service::Simulation => &["observations", "simulation"],
            Service::Projection => &["projection"],
        };
        kinds.contains(&kind)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LinkStatus {
    #[default]
    Offline,
    Connecting,
    Online(ConnectionHandle),
    /// Circuit breaker open; terminal until restart.
    Tripped,
}

impl LinkStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, LinkStatus::Online(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            LinkStatus::Offline => "offline",
            LinkStatus::Connecting => "connecting",
            LinkStatus::Online(_) => "online",
            LinkStatus::Tripped => "tripped",
        }
    }
}

/// Per-service view of the server: link status, flags and the latest
/// payloads, which stay opaque.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Section {
    pub status: LinkStatus,
    pub loading: bool,
    pub running: bool,
    pub available_config: Option<Value>,
    /// Latest inbound payload per message type.
    pub results: BTreeMap<String, Value>,
}

/// What an inbound envelope means for a section.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Error(String),
    Config(Value),
    Result { kind: String, data: Value },
    Unknown(String),
}

impl Inbound {
    pub fn classify(service: Service, envelope: Envelope) -> Self {
        match envelope.kind.as_str() {
            "error" => Inbound::Error(error_text(&envelope.data)),
            "config" => Inbound::Config(envelope.data),
            kind if service.accepts_inbound(kind) => Inbound::Result {
                kind: envelope.kind,
                data: envelope.data,
            },
            _ => Inbound::Unknown(envelope.kind),
        }
    }
}

fn error_text(data: &Value) -> String {
    match data {
        Value::String(text) => text.clone(),
        Value::Null => "Unknown server error".to_string(),
        other => other.to_string(),
    }
}

impl Section {
    /// Whether a result of `kind` ends the running computation. Calibration
    /// streams intermediate results flagged `done: false`.
    pub fn finishes_run(service: Service, kind: &str, data: &Value) -> bool {
        if kind != service.result_kind() {
            return false;
        }
        match service {
            Service::Calibration => data.get("done").and_then(Value::as_bool).unwrap_or(true),
            Service::Simulation | Service::Projection => true,
        }
    }

    pub fn apply_result(&mut self, service: Service, kind: String, data: Value) {
        if Self::finishes_run(service, &kind, &data) {
            self.running = false;
        }
        self.loading = self.running;
        self.results.insert(kind, data);
    }
}
