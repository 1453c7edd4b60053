use std::collections::HashMap;
use std::time::Duration;

use crate::endpoint::EndpointId;
use crate::policy::BackoffPolicy;

/// Reconnection bookkeeping for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectRecord {
    pub attempts: u32,
    pub delay: Duration,
}

/// Per-endpoint reconnection records.
///
/// A record exists only between the first failure of an episode and the next
/// successful connection; an absent record reads as
/// `{ attempts: 0, delay: initial_delay }`. `delay` stays within
/// `[initial_delay, max_delay]`.
#[derive(Debug)]
pub struct ConnectionStateStore {
    policy: BackoffPolicy,
    records: HashMap<EndpointId, ReconnectRecord>,
}

impl ConnectionStateStore {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy: policy.normalized(),
            records: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn get(&self, endpoint: &EndpointId) -> ReconnectRecord {
        self.records
            .get(endpoint)
            .copied()
            .unwrap_or(ReconnectRecord {
                attempts: 0,
                delay: self.policy.initial_delay,
            })
    }

    pub fn record_failure(&mut self, endpoint: &EndpointId) -> ReconnectRecord {
        let mut record = self.get(endpoint);
        record.attempts = record.attempts.saturating_add(1);
        record.delay = record
            .delay
            .saturating_mul(self.policy.backoff_factor)
            .min(self.policy.max_delay);
        self.records.insert(endpoint.clone(), record);
        record
    }

    pub fn reset(&mut self, endpoint: &EndpointId) {
        self.records.remove(endpoint);
    }

    pub fn is_circuit_open(&self, endpoint: &EndpointId) -> bool {
        self.get(endpoint).attempts >= self.policy.max_retries
    }

    /// Number of endpoints currently inside a reconnection episode.
    pub fn tracked(&self) -> usize {
        self.records.len()
    }
}
