use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use rand::seq::IndexedRandom;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::descriptor::EgressDescriptor;
use super::health::{HealthCheckSettings, HealthReport, HealthState};
use crate::error::{EgressError, ProbeError};
use crate::provider::{EgressProber, EgressProvider};

/// Pause after a failed refresh before the next interval starts.
pub const REFRESH_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;
const MIN_LOOP_PERIOD: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EgressSource {
    Static,
    Discovered,
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EgressRecord {
    pub descriptor: EgressDescriptor,
    #[serde(with = "time::serde::rfc3339")]
    pub selected_at: OffsetDateTime,
    pub source: EgressSource,
}

pub struct HealthCheck {
    pub prober: Arc<dyn EgressProber>,
    pub settings: HealthCheckSettings,
}

pub struct Discovery {
    pub provider: Arc<dyn EgressProvider>,
    pub update_interval: Duration,
    pub health_check: Option<HealthCheck>,
}

pub enum EgressMode {
    Direct,
    /// One fixed descriptor; never rotates.
    Static(EgressDescriptor),
    /// Refreshable list from a provider, rotated on each `rotate()`.
    Discovered(Discovery),
}

impl EgressMode {
    pub fn name(&self) -> &'static str {
        match self {
            EgressMode::Direct => "direct",
            EgressMode::Static(_) => "static",
            EgressMode::Discovered(_) => "discovered",
        }
    }
}

impl fmt::Debug for EgressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EgressMode::Direct => f.write_str("Direct"),
            EgressMode::Static(descriptor) => f.debug_tuple("Static").field(descriptor).finish(),
            EgressMode::Discovered(discovery) => f
                .debug_struct("Discovered")
                .field("update_interval", &discovery.update_interval)
                .field(
                    "health_check",
                    &discovery.health_check.as_ref().map(|check| &check.settings),
                )
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EgressStats {
    pub mode: &'static str,
    pub descriptors: usize,
    pub health_checked: bool,
    pub whitelisted: usize,
    pub blacklisted: usize,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_refresh: Option<OffsetDateTime>,
    pub refresh_failures: u64,
    pub rotations: u64,
    pub current: Option<EgressDescriptor>,
    pub history_len: usize,
}

#[derive(Debug, Default)]
struct EgressState {
    descriptors: Vec<EgressDescriptor>,
    index: usize,
    current: Option<EgressDescriptor>,
    history: VecDeque<EgressRecord>,
    rotations: u64,
    last_refresh: Option<OffsetDateTime>,
    refresh_failures: u64,
    health: HealthState,
}

/// Hands out one egress path per call. All state sits behind one lock;
/// provider fetches and probes run outside it.
#[derive(Debug)]
pub struct EgressPool {
    mode: EgressMode,
    history_capacity: usize,
    state: Mutex<EgressState>,
}

impl EgressPool {
    pub fn new(mode: EgressMode, history_capacity: usize) -> Self {
        Self {
            mode,
            history_capacity: history_capacity.max(1),
            state: Mutex::new(EgressState::default()),
        }
    }

    pub fn direct() -> Self {
        Self::new(EgressMode::Direct, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn mode(&self) -> &EgressMode {
        &self.mode
    }

    /// The descriptor in use, selecting one first if none is held or the held
    /// one is no longer a candidate. `None` means connect directly.
    pub fn current(&self) -> Option<EgressDescriptor> {
        let Some(discovery) = self.discovery() else {
            return self.fixed_selection();
        };
        let mut state = self.state();
        let held = state.current.clone().filter(|current| {
            if discovery.health_check.is_some() {
                state.health.usable().contains(&current)
            } else {
                state.descriptors.contains(current)
            }
        });
        match held {
            Some(current) => {
                self.record(&mut state, current.clone(), EgressSource::Discovered);
                Some(current)
            }
            None => self.select(&mut state, discovery),
        }
    }

    /// Advances to the next candidate. Static and direct modes return their
    /// fixed descriptor.
    pub fn rotate(&self) -> Option<EgressDescriptor> {
        match self.discovery() {
            Some(discovery) => {
                let mut state = self.state();
                self.select(&mut state, discovery)
            }
            None => self.fixed_selection(),
        }
    }

    /// Oldest first, most recent last.
    pub fn history(&self) -> Vec<EgressRecord> {
        self.state().history.iter().cloned().collect()
    }

    pub fn stats(&self) -> EgressStats {
        let state = self.state();
        let descriptors = match &self.mode {
            EgressMode::Direct => 0,
            EgressMode::Static(_) => 1,
            EgressMode::Discovered(_) => state.descriptors.len(),
        };
        EgressStats {
            mode: self.mode.name(),
            descriptors,
            health_checked: self.health_check().is_some(),
            whitelisted: state.health.whitelist.len(),
            blacklisted: state.health.blacklist.len(),
            last_refresh: state.last_refresh,
            refresh_failures: state.refresh_failures,
            rotations: state.rotations,
            current: state.current.clone(),
            history_len: state.history.len(),
        }
    }

    /// Replaces the discovered list. On failure, or an empty result, the
    /// previous list stays in place.
    pub async fn refresh_once(&self) -> Result<usize, EgressError> {
        let Some(discovery) = self.discovery() else {
            return Ok(self.stats().descriptors);
        };
        let fetched = match discovery.provider.fetch().await {
            Ok(list) if list.is_empty() => Err(EgressError::Fetch(
                "provider returned no descriptors".to_string(),
            )),
            other => other,
        };
        let mut list = match fetched {
            Ok(list) => list,
            Err(err) => {
                let mut state = self.state();
                state.refresh_failures += 1;
                warn!(
                    event = "egress_refresh_failed",
                    error = %err,
                    kept = state.descriptors.len(),
                    failures = state.refresh_failures
                );
                return Err(err);
            }
        };
        let mut seen = HashSet::new();
        list.retain(|descriptor| seen.insert(descriptor.clone()));

        let mut state = self.state();
        if state.index >= list.len() {
            state.index = 0;
        }
        state.health.retain_known(&list);
        state.descriptors = list;
        state.last_refresh = Some(OffsetDateTime::now_utc());
        info!(
            event = "egress_refreshed",
            descriptors = state.descriptors.len()
        );
        Ok(state.descriptors.len())
    }

    /// One health-check cycle. Probes descriptors that are neither whitelisted
    /// nor blacklisted; a full recheck clears the blacklist and probes all.
    pub async fn check_once(&self) -> HealthReport {
        let Some(check) = self.health_check() else {
            return HealthReport::default();
        };
        let settings = &check.settings;
        let now = Instant::now();
        let (targets, full_recheck) = {
            let mut state = self.state();
            let blacklisted = state.health.blacklist.len();
            if blacklisted > settings.blacklist_limit {
                state.health.blacklist.clear();
                info!(event = "egress_blacklist_cleared", cleared = blacklisted);
            }
            let full_recheck = state
                .health
                .full_recheck_due(now, settings.recheck_interval);
            if full_recheck {
                state.health.blacklist.clear();
                state.health.last_recheck = Some(now);
            }
            let targets: Vec<EgressDescriptor> = if full_recheck {
                state.descriptors.clone()
            } else {
                state
                    .descriptors
                    .iter()
                    .filter(|descriptor| {
                        !state.health.is_whitelisted(descriptor)
                            && !state.health.blacklist.contains(*descriptor)
                    })
                    .cloned()
                    .collect()
            };
            (targets, full_recheck)
        };

        let timeout = settings.probe_timeout;
        let outcomes: Vec<(EgressDescriptor, Result<(), ProbeError>)> = stream::iter(targets)
            .map(|descriptor| {
                let prober = Arc::clone(&check.prober);
                async move {
                    let outcome = match tokio::time::timeout(timeout, prober.probe(&descriptor)).await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => Err(ProbeError::Timeout(timeout)),
                    };
                    (descriptor, outcome)
                }
            })
            .buffer_unordered(settings.probe_concurrency.max(1))
            .collect()
            .await;

        let mut report = HealthReport {
            full_recheck,
            probed: outcomes.len(),
            ..HealthReport::default()
        };
        let mut state = self.state();
        for (descriptor, outcome) in outcomes {
            // The list may have been refreshed while probes were in flight.
            if !state.descriptors.contains(&descriptor) {
                continue;
            }
            match outcome {
                Ok(()) => {
                    report.healthy += 1;
                    state.health.mark_healthy(descriptor);
                }
                Err(err) => {
                    report.failed += 1;
                    debug!(event = "egress_probe_failed", egress = %descriptor, error = %err);
                    state.health.mark_failed(descriptor);
                }
            }
        }
        info!(
            event = "egress_health_checked",
            full_recheck = report.full_recheck,
            probed = report.probed,
            healthy = report.healthy,
            failed = report.failed,
            whitelisted = state.health.whitelist.len()
        );
        report
    }

    /// Starts the refresh loop and, when health checking is configured, the
    /// probe loop. Both stop once `shutdown` flips to `true` or its sender is
    /// dropped; an in-flight refresh or probe cycle finishes first.
    pub fn spawn_maintenance(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let Some(discovery) = self.discovery() else {
            return Vec::new();
        };
        let mut handles = vec![tokio::spawn(refresh_loop(
            Arc::clone(self),
            discovery.update_interval,
            shutdown.clone(),
        ))];
        if let Some(check) = &discovery.health_check {
            handles.push(tokio::spawn(health_loop(
                Arc::clone(self),
                check.settings.check_interval,
                shutdown,
            )));
        }
        handles
    }

    fn discovery(&self) -> Option<&Discovery> {
        match &self.mode {
            EgressMode::Discovered(discovery) => Some(discovery),
            _ => None,
        }
    }

    fn health_check(&self) -> Option<&HealthCheck> {
        self.discovery()
            .and_then(|discovery| discovery.health_check.as_ref())
    }

    fn fixed_selection(&self) -> Option<EgressDescriptor> {
        let (descriptor, source) = match &self.mode {
            EgressMode::Static(descriptor) if !descriptor.is_direct() => {
                (descriptor.clone(), EgressSource::Static)
            }
            _ => (EgressDescriptor::Direct, EgressSource::Direct),
        };
        let mut state = self.state();
        state.current = Some(descriptor.clone());
        self.record(&mut state, descriptor.clone(), source);
        Some(descriptor)
    }

    fn select(&self, state: &mut EgressState, discovery: &Discovery) -> Option<EgressDescriptor> {
        let picked = if discovery.health_check.is_some() {
            state
                .health
                .usable()
                .choose(&mut rand::rng())
                .map(|descriptor| (*descriptor).clone())
        } else if state.descriptors.is_empty() {
            None
        } else {
            if state.index >= state.descriptors.len() {
                state.index = 0;
            }
            let descriptor = state.descriptors[state.index].clone();
            state.index = (state.index + 1) % state.descriptors.len();
            Some(descriptor)
        };
        match &picked {
            Some(descriptor) => {
                state.rotations += 1;
                state.current = Some(descriptor.clone());
                self.record(state, descriptor.clone(), EgressSource::Discovered);
                debug!(event = "egress_rotated", egress = %descriptor, rotations = state.rotations);
            }
            None => {
                state.current = None;
                debug!(event = "egress_unavailable", "no egress candidate, connecting directly");
            }
        }
        picked
    }

    fn record(&self, state: &mut EgressState, descriptor: EgressDescriptor, source: EgressSource) {
        while state.history.len() >= self.history_capacity {
            state.history.pop_front();
        }
        state.history.push_back(EgressRecord {
            descriptor,
            selected_at: OffsetDateTime::now_utc(),
            source,
        });
    }

    fn state(&self) -> MutexGuard<'_, EgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn refresh_loop(pool: Arc<EgressPool>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(every.max(MIN_LOOP_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        if pool.refresh_once().await.is_err() {
            tokio::select! {
                _ = tokio::time::sleep(REFRESH_BACKOFF) => {}
                _ = shutdown.changed() => break,
            }
        }
    }
    debug!(event = "egress_refresh_stopped");
}

async fn health_loop(pool: Arc<EgressPool>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(every.max(MIN_LOOP_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        pool.check_once().await;
    }
    debug!(event = "egress_health_stopped");
}
