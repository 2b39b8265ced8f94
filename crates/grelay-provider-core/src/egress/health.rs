use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::descriptor::EgressDescriptor;

#[derive(Debug, Clone)]
pub struct HealthCheckSettings {
    /// Probes in flight at once during one cycle.
    pub probe_concurrency: usize,
    pub probe_timeout: Duration,
    pub check_interval: Duration,
    /// Period of full rechecks that clear the blacklist and re-probe the whitelist.
    pub recheck_interval: Duration,
    pub blacklist_limit: usize,
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            probe_concurrency: 10,
            probe_timeout: Duration::from_secs(5),
            check_interval: Duration::from_secs(60),
            recheck_interval: Duration::from_secs(600),
            blacklist_limit: 1000,
        }
    }
}

/// Outcome of one health-check cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub full_recheck: bool,
    pub probed: usize,
    pub healthy: usize,
    pub failed: usize,
}

/// Whitelist keeps insertion order so random choice and stats stay stable.
#[derive(Debug, Default)]
pub(crate) struct HealthState {
    pub(crate) whitelist: Vec<EgressDescriptor>,
    pub(crate) blacklist: HashSet<EgressDescriptor>,
    pub(crate) last_recheck: Option<Instant>,
}

impl HealthState {
    pub(crate) fn is_whitelisted(&self, descriptor: &EgressDescriptor) -> bool {
        self.whitelist.contains(descriptor)
    }

    pub(crate) fn usable(&self) -> Vec<&EgressDescriptor> {
        self.whitelist
            .iter()
            .filter(|descriptor| !self.blacklist.contains(*descriptor))
            .collect()
    }

    pub(crate) fn mark_healthy(&mut self, descriptor: EgressDescriptor) {
        self.blacklist.remove(&descriptor);
        if !self.whitelist.contains(&descriptor) {
            self.whitelist.push(descriptor);
        }
    }

    pub(crate) fn mark_failed(&mut self, descriptor: EgressDescriptor) {
        self.whitelist.retain(|entry| entry != &descriptor);
        self.blacklist.insert(descriptor);
    }

    /// Drops entries for descriptors the provider no longer lists.
    pub(crate) fn retain_known(&mut self, known: &[EgressDescriptor]) {
        self.whitelist.retain(|entry| known.contains(entry));
        self.blacklist.retain(|entry| known.contains(entry));
    }

    pub(crate) fn full_recheck_due(&self, now: Instant, interval: Duration) -> bool {
        self.last_recheck
            .is_none_or(|last| now.saturating_duration_since(last) >= interval)
    }
}
