use std::sync::Arc;
use std::time::Duration;

use holmes_client::app::projection::INVALID_CALIBRATION;
use holmes_client::app::{
    CALIBRATION_KEY, ConfigField, Dashboard, Event, Holmes, LinkStatus, PAGE_KEY, Persisted,
    Service, UNKNOWN_MESSAGE,
};
use holmes_link::mock;
use holmes_link::{CloseReason, ConnectionEvent, EndpointId, Envelope};
use holmes_runtime::{Effect, Program, Transition};
use serde_json::{Value, json};

fn apply(state: &Arc<Dashboard>, event: Event) -> Transition<Dashboard, Event> {
    Holmes.update(state, &event)
}

/// Apply and drop the effects.
fn fold(state: Arc<Dashboard>, event: Event) -> Arc<Dashboard> {
    apply(&state, event).state
}

fn connected(service: Service) -> Event {
    Event::Link(ConnectionEvent::Connected(mock::handle(service.endpoint(), 1)))
}

fn message(service: Service, kind: &str, data: Value) -> Event {
    Event::Link(ConnectionEvent::Message {
        endpoint: service.endpoint(),
        envelope: Envelope::new(kind, data),
    })
}

fn calibration() -> Value {
    json!({
        "hydroModel": "gr4j",
        "catchment": "Au Saumon",
        "objective": "nse",
        "transformation": "none",
        "algorithm": "sce",
        "algorithmParams": {"ngs": 25},
        "start": "2000-01-01",
        "end": "2005-12-31",
        "snowModel": null,
        "hydroParams": [0.5, 1.2, 40.0, 2.1],
    })
}

fn options() -> Value {
    json!([
        {"model": "CNRM", "horizon": "2041-2070", "scenario": "RCP4.5"},
        {"model": "CNRM", "horizon": "2041-2070", "scenario": "RCP8.5"},
        {"model": "MPI", "horizon": "2071-2100", "scenario": "RCP4.5"},
    ])
}

fn projection_online() -> Arc<Dashboard> {
    fold(Arc::new(Dashboard::default()), connected(Service::Projection))
}

#[test]
fn init_restores_and_connects_everything() {
    let start = Holmes.init();
    assert!(start.state.is_busy());
    for service in Service::ALL {
        assert_eq!(start.state.section(service).status, LinkStatus::Connecting);
    }

    let reads: Vec<&str> = start
        .effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::ReadPersisted { key, .. } => Some(key.as_str()),
            _ => None,
        })
        .collect();
    let expected: Vec<&str> = Persisted::ALL.iter().map(|key| key.key()).collect();
    assert_eq!(reads, expected);

    let connects: Vec<EndpointId> = start
        .effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Connect(endpoint) => Some(endpoint.clone()),
            _ => None,
        })
        .collect();
    let endpoints: Vec<EndpointId> = Service::ALL.iter().map(|s| s.endpoint()).collect();
    assert_eq!(connects, endpoints);
}

#[test]
fn unknown_event_keeps_the_same_snapshot() {
    let state = Arc::new(Dashboard::default());
    let next = apply(&state, Event::Unknown);
    assert!(Arc::ptr_eq(&state, &next.state));
    assert!(next.effects.is_empty());
}

#[test]
fn escape_in_a_focused_field_only_leaves_the_field() {
    let state = fold(Arc::new(Dashboard::default()), Event::ToggleNav);
    assert!(state.nav_open);
    let state = fold(state, Event::FocusField(ConfigField::Horizon));
    assert_eq!(state.editing, Some(ConfigField::Horizon));

    let blurred = apply(&state, Event::Escape);
    assert_eq!(blurred.state.editing, None);
    assert!(blurred.state.nav_open);
    assert_eq!(blurred.effects, vec![Effect::Dispatch(Event::SetPreventEscape)]);

    let latched = apply(&blurred.state, Event::SetPreventEscape);
    assert!(latched.state.prevent_escape);
    assert_eq!(
        latched.effects,
        vec![Effect::next_cycle(Event::UnsetPreventEscape)]
    );

    // the same keypress reaching the page must not close the menu
    let ignored = apply(&latched.state, Event::Escape);
    assert!(Arc::ptr_eq(&latched.state, &ignored.state));

    let released = fold(latched.state, Event::UnsetPreventEscape);
    assert!(!released.prevent_escape);
    let closed = fold(released, Event::Escape);
    assert!(!closed.nav_open);
}

#[test]
fn toggling_the_menu_does_not_latch_escape() {
    let toggled = apply(&Arc::new(Dashboard::default()), Event::ToggleNav);
    assert!(toggled.state.nav_open);
    assert!(toggled.effects.is_empty());
    assert!(!fold(toggled.state, Event::Escape).nav_open);
}

#[test]
fn navigation_persists_the_page_and_closes_the_menu() {
    let state = Arc::new(Dashboard {
        nav_open: true,
        ..Dashboard::default()
    });
    let next = apply(&state, Event::Navigate(Service::Projection));
    assert_eq!(next.state.page, Service::Projection);
    assert!(!next.state.nav_open);
    assert_eq!(
        next.effects,
        vec![Effect::persist(PAGE_KEY, json!("projection"))]
    );
}

#[test]
fn info_notifications_dismiss_themselves() {
    let state = Arc::new(Dashboard::default());
    let shown = apply(
        &state,
        Event::Notify {
            text: "Saved".into(),
            is_error: false,
        },
    );
    let id = shown.state.notifications.items()[0].id;
    assert_eq!(
        shown.effects,
        vec![Effect::schedule(
            Duration::from_secs(5),
            Event::DismissNotification(id)
        )]
    );

    let dismissed = fold(shown.state, Event::DismissNotification(id));
    assert!(dismissed.notifications.is_empty());
    let again = apply(&dismissed, Event::DismissNotification(id));
    assert!(Arc::ptr_eq(&dismissed, &again.state));

    let error = apply(
        &dismissed,
        Event::Notify {
            text: "Boom".into(),
            is_error: true,
        },
    );
    assert!(error.effects.is_empty());
}

#[test]
fn connecting_asks_for_configuration() {
    let state = Arc::new(Dashboard::default());
    let next = apply(&state, connected(Service::Calibration));
    assert!(next.state.calibration.status.is_online());
    assert!(next.state.calibration.loading);
    assert_eq!(
        next.effects,
        vec![Effect::send(
            Service::Calibration.endpoint(),
            Envelope::new("config", Value::Null)
        )]
    );

    // projection needs a calibration before it can ask
    let projection = apply(&state, connected(Service::Projection));
    assert!(projection.effects.is_empty());
    assert!(!projection.state.projection.loading);
}

#[test]
fn invalid_calibration_is_rejected() {
    let state = projection_online();
    let next = apply(&state, Event::ImportCalibration(json!({"catchment": "x"})));
    assert!(next.effects.is_empty());
    assert!(next.state.workflow.calibration.is_none());
    let notification = &next.state.notifications.items()[0];
    assert_eq!(notification.text, INVALID_CALIBRATION);
    assert!(notification.is_error);
}

#[test]
fn projection_workflow_cascades_and_runs() {
    let state = projection_online();

    let imported = apply(&state, Event::ImportCalibration(calibration()));
    assert!(imported.state.projection.loading);
    assert_eq!(
        imported.effects,
        vec![
            Effect::persist(CALIBRATION_KEY, calibration()),
            Effect::send(
                Service::Projection.endpoint(),
                Envelope::new("config", json!("Au Saumon"))
            ),
        ]
    );

    let configured = apply(
        &imported.state,
        message(Service::Projection, "config", options()),
    );
    assert!(!configured.state.projection.loading);
    let selection = &configured.state.workflow.selection;
    assert_eq!(selection.model.as_deref(), Some("CNRM"));
    assert_eq!(selection.horizon.as_deref(), Some("2041-2070"));
    assert_eq!(selection.scenario.as_deref(), Some("RCP4.5"));
    assert_eq!(configured.effects.len(), 3);

    // switching model drags the horizon along; the scenario survives
    let switched = apply(
        &configured.state,
        Event::UpdateConfigField {
            field: ConfigField::Model,
            value: "MPI".into(),
        },
    );
    assert_eq!(
        switched.effects,
        vec![
            Effect::persist(ConfigField::Model.storage_key(), json!("MPI")),
            Effect::persist(ConfigField::Horizon.storage_key(), json!("2071-2100")),
        ]
    );

    let running = apply(&switched.state, Event::RunProjection);
    assert!(running.state.projection.running);
    assert!(running.state.is_busy());
    let [Effect::Send { endpoint, message: sent }] = running.effects.as_slice() else {
        panic!("expected one send, got {:?}", running.effects);
    };
    assert_eq!(endpoint, &Service::Projection.endpoint());
    assert_eq!(sent.kind, "projection");
    assert_eq!(sent.data["config"]["model"], "MPI");
    assert_eq!(sent.data["calibration"]["catchment"], "Au Saumon");

    let done = fold(
        running.state,
        message(Service::Projection, "projection", json!({"flows": [1, 2]})),
    );
    assert!(!done.projection.running);
    assert!(!done.is_busy());
    assert_eq!(done.projection.results["projection"], json!({"flows": [1, 2]}));
}

#[test]
fn run_without_selection_explains_why() {
    let state = fold(projection_online(), Event::ImportCalibration(calibration()));
    let next = apply(&state, Event::RunProjection);
    assert!(next.effects.is_empty());
    assert!(!next.state.projection.running);
    assert!(next.state.notifications.items()[0].is_error);
}

#[test]
fn requests_need_an_open_link_and_a_known_type() {
    let state = Arc::new(Dashboard::default());
    let offline = apply(
        &state,
        Event::Request {
            service: Service::Simulation,
            kind: "simulation".into(),
            data: json!({}),
        },
    );
    assert!(offline.effects.is_empty());
    assert_eq!(
        offline.state.notifications.items()[0].text,
        "The simulation service is offline."
    );

    let online = fold(state, connected(Service::Calibration));
    let bogus = apply(
        &online,
        Event::Request {
            service: Service::Calibration,
            kind: "projection".into(),
            data: Value::Null,
        },
    );
    assert!(bogus.effects.is_empty());

    let start = apply(
        &online,
        Event::Request {
            service: Service::Calibration,
            kind: "calibration_start".into(),
            data: json!({"catchment": "Au Saumon"}),
        },
    );
    assert!(start.state.calibration.running);
    assert_eq!(start.effects.len(), 1);

    let partial = fold(
        start.state,
        message(Service::Calibration, "result", json!({"done": false, "params": [1]})),
    );
    assert!(partial.calibration.running);
    let finished = fold(
        partial,
        message(Service::Calibration, "result", json!({"done": true})),
    );
    assert!(!finished.calibration.running);
}

#[test]
fn unknown_inbound_type_raises_an_error() {
    let state = fold(Arc::new(Dashboard::default()), connected(Service::Simulation));
    let next = apply(&state, message(Service::Simulation, "projection", json!({})));
    let notification = &next.state.notifications.items()[0];
    assert_eq!(notification.text, UNKNOWN_MESSAGE);
    assert!(notification.is_error);
    assert!(next.effects.is_empty());
}

#[test]
fn server_errors_stop_the_computation() {
    let state = fold(Arc::new(Dashboard::default()), connected(Service::Simulation));
    let state = fold(
        state,
        Event::Request {
            service: Service::Simulation,
            kind: "simulation".into(),
            data: json!({}),
        },
    );
    assert!(state.simulation.running);
    let failed = fold(state, message(Service::Simulation, "error", json!("bad dates")));
    assert!(!failed.simulation.running);
    assert!(!failed.simulation.loading);
    assert_eq!(failed.notifications.items()[0].text, "bad dates");
}

#[test]
fn circuit_open_works_offline_with_a_sticky_error() {
    let state = fold(
        Arc::new(Dashboard::default()),
        Event::Link(ConnectionEvent::CircuitOpen {
            endpoint: Service::Simulation.endpoint(),
            attempts: 10,
        }),
    );
    assert_eq!(state.simulation.status, LinkStatus::Tripped);
    assert_eq!(state.offline_services(), vec![Service::Simulation]);
    assert!(state.notifications.items()[0].sticky);

    let escaped = fold(state, Event::Escape);
    assert_eq!(escaped.notifications.items().len(), 1);
}

#[test]
fn disconnects_show_reconnecting_unless_requested() {
    let state = fold(Arc::new(Dashboard::default()), connected(Service::Calibration));
    let dropped = fold(
        state.clone(),
        Event::Link(ConnectionEvent::Disconnected {
            endpoint: Service::Calibration.endpoint(),
            reason: CloseReason::Remote,
        }),
    );
    assert_eq!(dropped.calibration.status, LinkStatus::Connecting);

    let closed = fold(
        state,
        Event::Link(ConnectionEvent::Disconnected {
            endpoint: Service::Calibration.endpoint(),
            reason: CloseReason::Requested,
        }),
    );
    assert_eq!(closed.calibration.status, LinkStatus::Offline);
}

#[test]
fn restored_values_fill_the_state_quietly() {
    let state = Arc::new(Dashboard::default());
    let page = apply(
        &state,
        Event::Restored(Persisted::Page, Some(json!("simulation"))),
    );
    assert_eq!(page.state.page, Service::Simulation);
    assert!(page.effects.is_empty());

    let model = fold(
        page.state,
        Event::Restored(Persisted::Field(ConfigField::Model), Some(json!("MPI"))),
    );
    assert_eq!(model.workflow.selection.model.as_deref(), Some("MPI"));

    let missing = apply(&model, Event::Restored(Persisted::Calibration, None));
    assert!(Arc::ptr_eq(&model, &missing.state));
    let garbage = apply(&model, Event::Restored(Persisted::Page, Some(json!("nowhere"))));
    assert!(Arc::ptr_eq(&model, &garbage.state));
}

#[test]
fn input_lines_parse_into_events() {
    assert_eq!(
        Event::parse(
            r#"{"kind":"update_config_field","payload":{"field":"horizon","value":"2041-2070"}}"#
        )
        .unwrap(),
        Event::UpdateConfigField {
            field: ConfigField::Horizon,
            value: "2041-2070".into(),
        }
    );
    assert_eq!(
        Event::parse(
            r#"{"kind":"request","payload":{"service":"calibration","type":"observations"}}"#
        )
        .unwrap(),
        Event::Request {
            service: Service::Calibration,
            kind: "observations".into(),
            data: Value::Null,
        }
    );
    assert_eq!(Event::parse(r#"{"kind":"run_projection"}"#).unwrap(), Event::RunProjection);
    assert_eq!(
        Event::parse(r#"{"kind":"focus_field","payload":"scenario"}"#).unwrap(),
        Event::FocusField(ConfigField::Scenario)
    );
    assert_eq!(Event::parse(r#"{"kind":"blur_field"}"#).unwrap(), Event::BlurField);
    assert_eq!(
        Event::parse(r#"{"kind":"link","payload":{"anything":true}}"#).unwrap(),
        Event::Unknown
    );
    assert!(Event::parse(r#"{"kind":"navigate","payload":"nowhere"}"#).is_err());
    assert!(Event::parse("[]").is_err());
}
