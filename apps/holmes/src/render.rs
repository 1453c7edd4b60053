//! Headless view: every snapshot is reduced to a [`Summary`] and the
//! differences to the previous one are logged.

use std::sync::Arc;

use holmes_runtime::Render;
use tracing::{debug, error, info, trace, warn};

use crate::app::{Dashboard, Event, Service};

/// The parts of a snapshot a user would see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub page: Service,
    pub nav_open: bool,
    pub busy: bool,
    pub links: Vec<(Service, &'static str)>,
    pub running: Vec<Service>,
    pub notifications: Vec<(u64, String, bool)>,
    /// Services given up on; non-empty means "working offline".
    pub offline: Vec<Service>,
}

impl Summary {
    pub fn of(state: &Dashboard) -> Self {
        Self {
            page: state.page,
            nav_open: state.nav_open,
            busy: state.is_busy(),
            links: Service::ALL
                .into_iter()
                .map(|service| (service, state.section(service).status.label()))
                .collect(),
            running: Service::ALL
                .into_iter()
                .filter(|service| state.section(*service).running)
                .collect(),
            notifications: state
                .notifications
                .items()
                .iter()
                .map(|n| (n.id, n.text.clone(), n.is_error))
                .collect(),
            offline: state.offline_services(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Page(Service),
    Nav(bool),
    Busy(bool),
    Link(Service, &'static str),
    Running(Service, bool),
    Notified { id: u64, text: String, is_error: bool },
    Dismissed(u64),
    Offline(Vec<Service>),
}

pub fn diff(previous: &Summary, next: &Summary) -> Vec<Change> {
    let mut changes = Vec::new();
    if previous.page != next.page {
        changes.push(Change::Page(next.page));
    }
    if previous.nav_open != next.nav_open {
        changes.push(Change::Nav(next.nav_open));
    }
    if previous.busy != next.busy {
        changes.push(Change::Busy(next.busy));
    }
    for (before, after) in previous.links.iter().zip(&next.links) {
        if before.1 != after.1 {
            changes.push(Change::Link(after.0, after.1));
        }
    }
    for service in Service::ALL {
        let was = previous.running.contains(&service);
        let is = next.running.contains(&service);
        if was != is {
            changes.push(Change::Running(service, is));
        }
    }
    for (id, _, _) in &previous.notifications {
        if !next.notifications.iter().any(|(other, _, _)| other == id) {
            changes.push(Change::Dismissed(*id));
        }
    }
    for (id, text, is_error) in &next.notifications {
        if !previous.notifications.iter().any(|(other, _, _)| other == id) {
            changes.push(Change::Notified {
                id: *id,
                text: text.clone(),
                is_error: *is_error,
            });
        }
    }
    if previous.offline != next.offline {
        changes.push(Change::Offline(next.offline.clone()));
    }
    changes
}

/// Writes view changes to the log.
#[derive(Debug, Default)]
pub struct TracingRenderer {
    previous: Option<(Arc<Dashboard>, Summary)>,
    frames: u64,
    last_changes: Vec<Change>,
}

impl TracingRenderer {
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn last_changes(&self) -> &[Change] {
        &self.last_changes
    }

    fn emit(change: &Change) {
        match change {
            Change::Page(page) => info!(target: "holmes::view", %page, "page"),
            Change::Nav(open) => debug!(target: "holmes::view", open, "navigation menu"),
            Change::Busy(busy) => info!(target: "holmes::view", busy, "loading indicator"),
            Change::Link(service, status) => {
                info!(target: "holmes::view", %service, status, "link")
            }
            Change::Running(service, running) => {
                info!(target: "holmes::view", %service, running, "computation")
            }
            Change::Notified { id, text, is_error: true } => {
                error!(target: "holmes::view", id, "{text}")
            }
            Change::Notified { id, text, .. } => info!(target: "holmes::view", id, "{text}"),
            Change::Dismissed(id) => debug!(target: "holmes::view", id, "notification dismissed"),
            Change::Offline(services) if services.is_empty() => {
                info!(target: "holmes::view", "back online")
            }
            Change::Offline(services) => {
                warn!(target: "holmes::view", ?services, "working offline")
            }
        }
    }
}

impl Render<Dashboard, Event> for TracingRenderer {
    fn mount(&mut self, state: &Arc<Dashboard>) {
        let summary = Summary::of(state);
        info!(
            target: "holmes::view",
            page = %summary.page,
            busy = summary.busy,
            "dashboard mounted"
        );
        self.previous = Some((Arc::clone(state), summary));
    }

    fn render(&mut self, event: &Event, state: &Arc<Dashboard>) {
        self.frames += 1;
        if let Some((previous, _)) = &self.previous
            && Arc::ptr_eq(previous, state)
        {
            trace!(target: "holmes::view", ?event, "unchanged");
            self.last_changes.clear();
            return;
        }

        let summary = Summary::of(state);
        self.last_changes = match &self.previous {
            Some((_, before)) => diff(before, &summary),
            None => Vec::new(),
        };
        for change in &self.last_changes {
            Self::emit(change);
        }
        self.previous = Some((Arc::clone(state), summary));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::LinkStatus;

    #[test]
    fn diff_reports_only_what_moved() {
        let mut state = Dashboard::default();
        let before = Summary::of(&state);

        state.page = Service::Projection;
        state.projection.loading = true;
        state.simulation.status = LinkStatus::Tripped;
        let id = state.notifications.push("hello", false, false);
        let after = Summary::of(&state);

        assert_eq!(
            diff(&before, &after),
            vec![
                Change::Page(Service::Projection),
                Change::Busy(true),
                Change::Link(Service::Simulation, "tripped"),
                Change::Notified {
                    id,
                    text: "hello".into(),
                    is_error: false
                },
                Change::Offline(vec![Service::Simulation]),
            ]
        );
        assert!(diff(&after, &after).is_empty());
    }

    #[test]
    fn unchanged_snapshot_renders_nothing() {
        let state = Arc::new(Dashboard::default());
        let mut renderer = TracingRenderer::default();
        renderer.mount(&state);
        renderer.render(&Event::Unknown, &state);
        assert_eq!(renderer.frames(), 1);
        assert!(renderer.last_changes().is_empty());

        let moved = Arc::new(Dashboard {
            nav_open: true,
            ..Dashboard::default()
        });
        renderer.render(&Event::ToggleNav, &moved);
        assert_eq!(renderer.last_changes(), &[Change::Nav(true)]);
    }
}
