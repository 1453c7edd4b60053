//! The dashboard program: one state snapshot for the three services, folded
//! from user input, connection notifications and timers.

pub mod notifications;
pub mod projection;
pub mod section;

use std::sync::Arc;

use holmes_link::{CloseReason, ConnectionEvent, Envelope};
use holmes_runtime::{Effect, Program, Transition};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

pub use notifications::{INFO_TTL, Notification, Notifications};
pub use projection::{ConfigField, Selection, Workflow};
pub use section::{Inbound, LinkStatus, Section, Service};

pub const PAGE_KEY: &str = "holmes--page";
pub const CALIBRATION_KEY: &str = "holmes--projection--calibration";

pub const UNKNOWN_MESSAGE: &str = "Unknown websocket message";
pub const MALFORMED_MESSAGE: &str = "Malformed websocket message";

/// Values restored from the key/value store at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persisted {
    Page,
    Calibration,
    Field(ConfigField),
}

impl Persisted {
    pub const ALL: [Persisted; 5] = [
        Persisted::Page,
        Persisted::Calibration,
        Persisted::Field(ConfigField::Model),
        Persisted::Field(ConfigField::Horizon),
        Persisted::Field(ConfigField::Scenario),
    ];

    pub fn key(self) -> &'static str {
        match self {
            Persisted::Page => PAGE_KEY,
            Persisted::Calibration => CALIBRATION_KEY,
            Persisted::Field(field) => field.storage_key(),
        }
    }

    fn reply(self) -> fn(Option<Value>) -> Event {
        match self {
            Persisted::Page => restored_page,
            Persisted::Calibration => restored_calibration,
            Persisted::Field(ConfigField::Model) => restored_model,
            Persisted::Field(ConfigField::Horizon) => restored_horizon,
            Persisted::Field(ConfigField::Scenario) => restored_scenario,
        }
    }
}

fn restored_page(value: Option<Value>) -> Event {
    Event::Restored(Persisted::Page, value)
}

fn restored_calibration(value: Option<Value>) -> Event {
    Event::Restored(Persisted::Calibration, value)
}

fn restored_model(value: Option<Value>) -> Event {
    Event::Restored(Persisted::Field(ConfigField::Model), value)
}

fn restored_horizon(value: Option<Value>) -> Event {
    Event::Restored(Persisted::Field(ConfigField::Horizon), value)
}

fn restored_scenario(value: Option<Value>) -> Event {
    Event::Restored(Persisted::Field(ConfigField::Scenario), value)
}

/// Everything the dashboard reacts to. External input uses the
/// `{"kind": ..., "payload": ...}` form; see [`Event::parse`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Event {
    Navigate(Service),
    ToggleNav,
    /// A config form field took input focus.
    FocusField(ConfigField),
    BlurField,
    Escape,
    SetPreventEscape,
    UnsetPreventEscape,
    Notify {
        text: String,
        #[serde(default)]
        is_error: bool,
    },
    DismissNotification(u64),
    /// Send a typed message to a service.
    Request {
        service: Service,
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        data: Value,
    },
    ImportCalibration(Value),
    UpdateConfigField {
        field: ConfigField,
        value: String,
    },
    RunProjection,
    #[serde(skip_deserializing)]
    Link(ConnectionEvent),
    #[serde(skip_deserializing)]
    Restored(Persisted, Option<Value>),
    #[serde(other)]
    Unknown,
}

const INPUT_KINDS: [&str; 12] = [
    "navigate",
    "toggle_nav",
    "escape",
    "set_prevent_escape",
    "unset_prevent_escape",
    "notify",
    "dismiss_notification",
    "request",
    "import_calibration",
    "update_config_field",
    "run_projection",
    "unknown",
];

#[derive(Deserialize)]
struct RawEvent {
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl Event {
    /// Parse one line of external input. Kinds this program does not know
    /// become [`Event::Unknown`]; a known kind with a bad payload is an error.
    pub fn parse(line: &str) -> Result<Event, serde_json::Error> {
        let raw: RawEvent = serde_json::from_str(line)?;
        if !INPUT_KINDS.contains(&raw.kind.as_str()) {
            return Ok(Event::Unknown);
        }
        let mut tagged = serde_json::Map::new();
        tagged.insert("kind".into(), Value::String(raw.kind));
        if !raw.payload.is_null() {
            tagged.insert("payload".into(), raw.payload);
        }
        Event::deserialize(Value::Object(tagged))
    }
}

impl From<ConnectionEvent> for Event {
    fn from(event: ConnectionEvent) -> Self {
        Event::Link(event)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dashboard {
    pub page: Service,
    pub nav_open: bool,
    /// Form field holding input focus, if any.
    pub editing: Option<ConfigField>,
    pub prevent_escape: bool,
    pub notifications: Notifications,
    pub calibration: Section,
    pub simulation: Section,
    pub projection: Section,
    pub workflow: Workflow,
}

impl Dashboard {
    pub fn section(&self, service: Service) -> &Section {
        match service {
            Service::Calibration => &self.calibration,
            Service::Simulation => &self.simulation,
            Service::Projection => &self.projection,
        }
    }

    pub fn section_mut(&mut self, service: Service) -> &mut Section {
        match service {
            Service::Calibration => &mut self.calibration,
            Service::Simulation => &mut self.simulation,
            Service::Projection => &mut self.projection,
        }
    }

    pub fn is_busy(&self) -> bool {
        Service::ALL
            .into_iter()
            .any(|service| self.section(service).loading)
    }

    /// Services whose circuit breaker has given up.
    pub fn offline_services(&self) -> Vec<Service> {
        Service::ALL
            .into_iter()
            .filter(|service| self.section(*service).status == LinkStatus::Tripped)
            .collect()
    }
}

/// Working copy of a snapshot plus the effects gathered while editing it.
struct Step {
    state: Dashboard,
    effects: Vec<Effect<Event>>,
}

impl Step {
    fn begin(state: &Arc<Dashboard>) -> Self {
        Self {
            state: Dashboard::clone(state),
            effects: Vec::new(),
        }
    }

    fn effect(&mut self, effect: Effect<Event>) {
        self.effects.push(effect);
    }

    fn notify(&mut self, text: impl Into<String>, is_error: bool) {
        let id = self.state.notifications.push(text, is_error, false);
        if !is_error {
            self.effect(Effect::schedule(INFO_TTL, Event::DismissNotification(id)));
        }
    }

    fn sticky_error(&mut self, text: impl Into<String>) {
        self.state.notifications.push(text, true, true);
    }

    /// Reuses `previous` when nothing changed.
    fn finish(self, previous: &Arc<Dashboard>) -> Transition<Dashboard, Event> {
        let state = if self.state == **previous {
            Arc::clone(previous)
        } else {
            Arc::new(self.state)
        };
        Transition {
            state,
            effects: self.effects,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Holmes;

impl Program for Holmes {
    type State = Dashboard;
    type Event = Event;

    fn init(&self) -> Transition<Dashboard, Event> {
        let mut state = Dashboard::default();
        let mut effects: Vec<Effect<Event>> = Persisted::ALL
            .into_iter()
            .map(|key| Effect::read_persisted(key.key(), key.reply()))
            .collect();
        for service in Service::ALL {
            let section = state.section_mut(service);
            section.status = LinkStatus::Connecting;
            section.loading = true;
            effects.push(Effect::Connect(service.endpoint()));
        }
        Transition::replace(state).with_all(effects)
    }

    fn update(&self, state: &Arc<Dashboard>, event: &Event) -> Transition<Dashboard, Event> {
        match event {
            Event::Navigate(service) => navigate(state, *service),
            Event::ToggleNav => Transition::modify(state, |s| s.nav_open = !s.nav_open),
            Event::FocusField(field) => Transition::modify(state, |s| s.editing = Some(*field)),
            Event::BlurField if state.editing.is_some() => {
                Transition::modify(state, |s| s.editing = None)
            }
            Event::BlurField => Transition::keep(state),
            Event::Escape => escape(state),
            Event::SetPreventEscape => Transition::modify(state, |s| s.prevent_escape = true)
                .with(Effect::next_cycle(Event::UnsetPreventEscape)),
            Event::UnsetPreventEscape if state.prevent_escape => {
                Transition::modify(state, |s| s.prevent_escape = false)
            }
            Event::UnsetPreventEscape => Transition::keep(state),
            Event::Notify { text, is_error } => {
                let mut step = Step::begin(state);
                step.notify(text.clone(), *is_error);
                step.finish(state)
            }
            Event::DismissNotification(id) if state.notifications.contains(*id) => {
                Transition::modify(state, |s| {
                    s.notifications.dismiss(*id);
                })
            }
            Event::DismissNotification(_) => Transition::keep(state),
            Event::Request {
                service,
                kind,
                data,
            } => request(state, *service, kind, data),
            Event::ImportCalibration(calibration) => import_calibration(state, calibration),
            Event::UpdateConfigField { field, value } => update_config_field(state, *field, value),
            Event::RunProjection => run_projection(state),
            Event::Link(event) => link_event(state, event),
            Event::Restored(key, value) => restored(state, *key, value.as_ref()),
            Event::Unknown => Transition::keep(state),
        }
    }
}

fn navigate(state: &Arc<Dashboard>, service: Service) -> Transition<Dashboard, Event> {
    let mut step = Step::begin(state);
    step.state.page = service;
    step.state.nav_open = false;
    step.effect(Effect::persist(PAGE_KEY, Value::String(service.as_str().into())));
    step.finish(state)
}

/// Escape in a focused field only leaves the field; the latch keeps the
/// same keypress from also closing the menu and notifications.
fn escape(state: &Arc<Dashboard>) -> Transition<Dashboard, Event> {
    if state.prevent_escape {
        return Transition::keep(state);
    }
    if state.editing.is_some() {
        return Transition::modify(state, |s| s.editing = None)
            .with(Effect::Dispatch(Event::SetPreventEscape));
    }
    let mut step = Step::begin(state);
    step.state.nav_open = false;
    step.state.notifications.clear_dismissible();
    step.finish(state)
}

fn request(
    state: &Arc<Dashboard>,
    service: Service,
    kind: &str,
    data: &Value,
) -> Transition<Dashboard, Event> {
    let mut step = Step::begin(state);
    if !service.accepts_outbound(kind) {
        step.notify(format!("Unknown {service} request `{kind}`."), true);
        return step.finish(state);
    }
    if !state.section(service).status.is_online() {
        step.notify(format!("The {service} service is offline."), true);
        return step.finish(state);
    }

    let section = step.state.section_mut(service);
    if kind == service.run_kind() {
        section.running = true;
    }
    if kind != "calibration_stop" {
        section.loading = true;
    }
    step.effect(Effect::send(
        service.endpoint(),
        Envelope::new(kind, data.clone()),
    ));
    step.finish(state)
}

fn import_calibration(state: &Arc<Dashboard>, calibration: &Value) -> Transition<Dashboard, Event> {
    let mut step = Step::begin(state);
    if let Err(error) = projection::verify_calibration(calibration) {
        step.notify(error, true);
        return step.finish(state);
    }

    step.state.workflow.calibration = Some(calibration.clone());
    step.state.projection.available_config = None;
    step.state.projection.results.remove("projection");
    step.effect(Effect::persist(CALIBRATION_KEY, calibration.clone()));
    request_projection_config(&mut step);
    step.finish(state)
}

/// Ask the projection service what it can project for the imported
/// catchment. Needs a calibration and an open link.
fn request_projection_config(step: &mut Step) {
    let Some(catchment) = step.state.workflow.catchment().cloned() else {
        return;
    };
    if !step.state.projection.status.is_online() {
        return;
    }
    step.state.projection.loading = true;
    step.effect(Effect::send(
        Service::Projection.endpoint(),
        Envelope::new("config", catchment),
    ));
}

fn update_config_field(
    state: &Arc<Dashboard>,
    field: ConfigField,
    value: &str,
) -> Transition<Dashboard, Event> {
    let mut step = Step::begin(state);
    let mut selection = state.workflow.selection.clone();
    selection.set(field, Some(value.to_string()));
    apply_selection(&mut step, selection);
    step.finish(state)
}

/// Store `selection`, snapped onto the available options when known. Each
/// changed field is persisted and invalidates the last projection result.
fn apply_selection(step: &mut Step, selection: Selection) {
    let options = step
        .state
        .projection
        .available_config
        .as_ref()
        .and_then(|available| projection::parse_options(available).ok());
    let selection = match options {
        Some(options) => selection.reconcile(&options),
        None => selection,
    };

    let changed = selection.changed_fields(&step.state.workflow.selection);
    if changed.is_empty() {
        return;
    }
    for field in changed {
        if let Some(value) = selection.get(field) {
            step.effect(Effect::persist(
                field.storage_key(),
                Value::String(value.to_string()),
            ));
        } else {
            step.effect(Effect::forget(field.storage_key()));
        }
    }
    step.state.workflow.selection = selection;
    step.state.projection.results.remove("projection");
}

fn run_projection(state: &Arc<Dashboard>) -> Transition<Dashboard, Event> {
    let mut step = Step::begin(state);
    if !state.projection.status.is_online() {
        step.notify("The projection service is offline.", true);
        return step.finish(state);
    }
    let Some(body) = state.workflow.run_request() else {
        step.notify(
            "Import a calibration and choose a model, horizon and scenario first.",
            true,
        );
        return step.finish(state);
    };
    step.state.projection.loading = true;
    step.state.projection.running = true;
    step.effect(Effect::send(
        Service::Projection.endpoint(),
        Envelope::new("projection", body),
    ));
    step.finish(state)
}

fn link_event(state: &Arc<Dashboard>, event: &ConnectionEvent) -> Transition<Dashboard, Event> {
    let Some(service) = Service::from_endpoint(event.endpoint()) else {
        debug!(target: "holmes::app", endpoint = %event.endpoint(), "event for unknown endpoint");
        return Transition::keep(state);
    };
    let mut step = Step::begin(state);

    match event {
        ConnectionEvent::Connected(handle) => {
            let section = step.state.section_mut(service);
            section.status = LinkStatus::Online(handle.clone());
            section.loading = section.running;
            if section.available_config.is_none() {
                match service {
                    Service::Calibration | Service::Simulation => {
                        section.loading = true;
                        step.effect(Effect::send(
                            service.endpoint(),
                            Envelope::new("config", Value::Null),
                        ));
                    }
                    Service::Projection => request_projection_config(&mut step),
                }
            }
        }
        ConnectionEvent::Disconnected { reason, .. } => {
            let section = step.state.section_mut(service);
            section.status = match reason {
                CloseReason::Requested => LinkStatus::Offline,
                _ => LinkStatus::Connecting,
            };
            section.loading = false;
            section.running = false;
        }
        ConnectionEvent::CircuitOpen { attempts, .. } => {
            let section = step.state.section_mut(service);
            section.status = LinkStatus::Tripped;
            section.loading = false;
            section.running = false;
            step.sticky_error(format!(
                "Could not reach the {service} service after {attempts} attempts; working offline."
            ));
        }
        ConnectionEvent::Message { envelope, .. } => {
            inbound(&mut step, service, envelope.clone());
        }
        ConnectionEvent::Malformed { error, .. } => {
            warn!(target: "holmes::app", %service, %error, "discarding malformed message");
            step.notify(MALFORMED_MESSAGE, true);
        }
        ConnectionEvent::TransportError { error, .. } => {
            if state.section(service).status.is_online() {
                step.notify(format!("WebSocket error: {error}"), true);
            } else {
                debug!(target: "holmes::app", %service, %error, "transport error while not online");
            }
        }
    }
    step.finish(state)
}

fn inbound(step: &mut Step, service: Service, envelope: Envelope) {
    match Inbound::classify(service, envelope) {
        Inbound::Error(text) => {
            let section = step.state.section_mut(service);
            section.loading = false;
            section.running = false;
            step.notify(text, true);
        }
        Inbound::Config(config) => {
            let section = step.state.section_mut(service);
            section.loading = section.running;
            section.available_config = Some(config);
            if service == Service::Projection {
                let valid = step
                    .state
                    .projection
                    .available_config
                    .as_ref()
                    .is_some_and(|config| projection::parse_options(config).is_ok());
                if valid {
                    let selection = step.state.workflow.selection.clone();
                    apply_selection(step, selection);
                } else {
                    step.notify("Invalid projection configuration from server.", true);
                }
            }
        }
        Inbound::Result { kind, data } => {
            step.state.section_mut(service).apply_result(service, kind, data);
        }
        Inbound::Unknown(kind) => {
            debug!(target: "holmes::app", %service, %kind, "unknown message type");
            step.notify(UNKNOWN_MESSAGE, true);
        }
    }
}

fn restored(
    state: &Arc<Dashboard>,
    key: Persisted,
    value: Option<&Value>,
) -> Transition<Dashboard, Event> {
    let Some(value) = value else {
        return Transition::keep(state);
    };
    let mut step = Step::begin(state);
    match key {
        Persisted::Page => match value.as_str().and_then(Service::parse) {
            Some(page) => step.state.page = page,
            None => warn!(target: "holmes::app", %value, "ignoring unknown saved page"),
        },
        Persisted::Calibration => {
            if projection::verify_calibration(value).is_ok() {
                step.state.workflow.calibration = Some(value.clone());
                if step.state.projection.available_config.is_none() {
                    request_projection_config(&mut step);
                }
            } else {
                warn!(target: "holmes::app", "ignoring invalid saved calibration");
            }
        }
        Persisted::Field(field) => match value.as_str() {
            Some(choice) => step.state.workflow.selection.set(field, Some(choice.to_string())),
            None => {
                let field = field.as_str();
                warn!(target: "holmes::app", field, "ignoring non-text saved choice")
            }
        },
    }
    step.finish(state)
}
