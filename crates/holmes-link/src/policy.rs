use std::time::Duration;

/// Backoff and circuit-breaker numbers for the reconnection store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: u32,
    pub max_retries: u32,
}

impl BackoffPolicy {
    /// Clamp the numbers into a shape the store can honor:
    /// `max_delay >= initial_delay`, `backoff_factor >= 1`, `max_retries >= 1`.
    pub fn normalized(self) -> Self {
        Self {
            initial_delay: self.initial_delay,
            max_delay: self.max_delay.max(self.initial_delay),
            backoff_factor: self.backoff_factor.max(1),
            max_retries: self.max_retries.max(1),
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2,
            max_retries: 10,
        }
    }
}

/// Everything the connection manager needs to know about timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkPolicy {
    pub backoff: BackoffPolicy,
    pub connection_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Close a link that has received nothing for this long. `None` keeps the
    /// heartbeat fire-and-forget.
    pub liveness_timeout: Option<Duration>,
    /// Extra random wait added to each reconnect delay, as a fraction of the
    /// delay (`0.0..=1.0`). Never stored in the reconnection record.
    pub jitter: f64,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            connection_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            liveness_timeout: None,
            jitter: 0.0,
        }
    }
}
