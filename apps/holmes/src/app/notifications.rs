use std::time::Duration;

/// How long an info notification stays up before it dismisses itself.
pub const INFO_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: u64,
    pub text: String,
    pub is_error: bool,
    /// Survives Escape; only an explicit dismissal removes it.
    pub sticky: bool,
}

/// Notifications in creation order. Ids are never reused, so a stale
/// dismissal timer cannot remove a newer notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notifications {
    next_id: u64,
    items: Vec<Notification>,
}

impl Notifications {
    pub fn push(&mut self, text: impl Into<String>, is_error: bool, sticky: bool) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.items.push(Notification {
            id,
            text: text.into(),
            is_error,
            sticky,
        });
        id
    }

    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.items.len();
        self.items.retain(|n| n.id != id);
        self.items.len() != before
    }

    /// Drop everything that is not sticky. Returns whether anything changed.
    pub fn clear_dismissible(&mut self) -> bool {
        let before = self.items.len();
        self.items.retain(|n| n.sticky);
        self.items.len() != before
    }

    pub fn contains(&self, id: u64) -> bool {
        self.items.iter().any(|n| n.id == id)
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
