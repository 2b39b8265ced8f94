use std::cmp::Reverse;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ConfigurationError, PoolError};

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    index: usize,
    secret: Arc<str>,
}

impl Credential {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// First four characters followed by `***`, safe for logs.
    pub fn masked(&self) -> String {
        let prefix: String = self.secret.chars().take(4).collect();
        format!("{prefix}***")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("secret", &self.masked())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySelection {
    Sequential,
    #[default]
    RoundRobin,
    LeastUsed,
    SmartCooldown,
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub selection: KeySelection,
    /// Uses allowed per credential inside one reset window.
    pub rate_limit: u32,
    pub reset_window: Duration,
    /// Sleep between busy scans when nothing could be reset.
    pub busy_backoff: Duration,
    pub max_busy_scans: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            selection: KeySelection::RoundRobin,
            rate_limit: 60,
            reset_window: Duration::from_secs(60),
            busy_backoff: Duration::from_secs(1),
            max_busy_scans: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialStats {
    pub uses: u32,
    pub last_used_at: Option<Instant>,
    pub consecutive_failures: u32,
    pub rate_limited_until: Option<Instant>,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rate_limited: u64,
}

impl CredentialStats {
    /// `None` when the credential was never handed out.
    fn idle(&self, now: Instant) -> Option<Duration> {
        self.last_used_at
            .map(|last| now.saturating_duration_since(last))
    }

    fn window_expired(&self, now: Instant, window: Duration) -> bool {
        self.idle(now).is_none_or(|idle| idle > window)
    }

    fn cooling_down(&self, now: Instant) -> bool {
        self.rate_limited_until.is_some_and(|until| now < until)
    }

    fn effective_uses(&self, now: Instant, window: Duration) -> u32 {
        if self.window_expired(now, window) {
            0
        } else {
            self.uses
        }
    }

    fn is_available(&self, now: Instant, settings: &PoolSettings) -> bool {
        !self.cooling_down(now)
            && self.effective_uses(now, settings.reset_window) < settings.rate_limit
    }
}

/// Point-in-time copy of one credential's bookkeeping for callers and
/// front-ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CredentialStatsView {
    pub index: usize,
    pub credential: String,
    pub uses: u32,
    pub last_used_secs_ago: Option<f64>,
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rate_limited: u64,
    pub cooldown_remaining_secs: Option<f64>,
    pub available: bool,
}

#[derive(Debug)]
struct PoolState {
    stats: Vec<CredentialStats>,
    sequential_cursor: usize,
    round_robin_cursor: usize,
}

enum Scan {
    Picked(usize),
    Busy { reset_any: bool },
}

#[derive(Debug)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
    settings: PoolSettings,
    state: Mutex<PoolState>,
}

impl CredentialPool {
    pub fn new(
        secrets: impl IntoIterator<Item = String>,
        settings: PoolSettings,
    ) -> Result<Self, ConfigurationError> {
        let credentials: Vec<Credential> = secrets
            .into_iter()
            .enumerate()
            .map(|(index, secret)| Credential {
                index,
                secret: Arc::from(secret),
            })
            .collect();
        if credentials.is_empty() {
            return Err(ConfigurationError::NoCredentials);
        }
        if settings.rate_limit == 0 {
            return Err(ConfigurationError::Invalid(
                "rate_limit must be at least 1".to_string(),
            ));
        }
        if settings.max_busy_scans == 0 {
            return Err(ConfigurationError::Invalid(
                "max_busy_scans must be at least 1".to_string(),
            ));
        }
        let state = PoolState {
            stats: vec![CredentialStats::default(); credentials.len()],
            sequential_cursor: 0,
            round_robin_cursor: 0,
        };
        Ok(Self {
            credentials,
            settings,
            state: Mutex::new(state),
        })
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn credential(&self, index: usize) -> Option<&Credential> {
        self.credentials.get(index)
    }

    /// Selects a credential and books the use in the same critical section.
    ///
    /// When every credential is unavailable the busy handler resets expired
    /// windows or backs off for `busy_backoff`; after `max_busy_scans`
    /// rounds the call gives up with [`PoolError::AllCredentialsBusy`].
    pub async fn next(&self) -> Result<(Credential, usize), PoolError> {
        let mut scans = 0u32;
        let mut waited = Duration::ZERO;
        let mut just_reset = false;
        loop {
            match self.scan(Instant::now()) {
                Scan::Picked(index) => {
                    debug!(
                        event = "credential_selected",
                        index = index,
                        strategy = ?self.settings.selection,
                        busy_scans = scans
                    );
                    return Ok((self.credentials[index].clone(), index));
                }
                Scan::Busy { reset_any } => {
                    scans += 1;
                    if scans >= self.settings.max_busy_scans {
                        warn!(
                            event = "credentials_exhausted",
                            scans = scans,
                            waited_ms = waited.as_millis(),
                            "all credentials busy"
                        );
                        return Err(PoolError::AllCredentialsBusy { scans, waited });
                    }
                    if reset_any && !just_reset {
                        just_reset = true;
                        continue;
                    }
                    just_reset = false;
                    debug!(
                        event = "credentials_busy",
                        scans = scans,
                        backoff_ms = self.settings.busy_backoff.as_millis()
                    );
                    tokio::time::sleep(self.settings.busy_backoff).await;
                    waited += self.settings.busy_backoff;
                }
            }
        }
    }

    pub fn report_success(&self, index: usize) -> Result<(), PoolError> {
        let mut state = self.state();
        let stats = self.stats_mut(&mut state, index)?;
        stats.consecutive_failures = 0;
        stats.total_successes += 1;
        Ok(())
    }

    pub fn report_rate_limited(&self, index: usize) -> Result<(), PoolError> {
        let now = Instant::now();
        let mut state = self.state();
        let rate_limit = self.settings.rate_limit;
        let window = self.settings.reset_window;
        let stats = self.stats_mut(&mut state, index)?;
        stats.rate_limited_until = Some(now + window);
        stats.consecutive_failures += 1;
        stats.uses = rate_limit;
        stats.total_failures += 1;
        stats.total_rate_limited += 1;
        info!(
            event = "credential_cooldown",
            index = index,
            cooldown_ms = window.as_millis(),
            consecutive_failures = stats.consecutive_failures
        );
        Ok(())
    }

    /// Failure bookkeeping without a cooldown.
    pub fn report_failure(&self, index: usize) -> Result<(), PoolError> {
        let mut state = self.state();
        let stats = self.stats_mut(&mut state, index)?;
        stats.consecutive_failures += 1;
        stats.total_failures += 1;
        Ok(())
    }

    pub fn stats_of(&self, index: usize) -> Result<CredentialStats, PoolError> {
        let state = self.state();
        state
            .stats
            .get(index)
            .cloned()
            .ok_or(PoolError::UnknownCredential {
                index,
                len: self.len(),
            })
    }

    /// Stats for one credential, or for all of them when `index` is `None`.
    pub fn stats(&self, index: Option<usize>) -> Result<Vec<CredentialStatsView>, PoolError> {
        let now = Instant::now();
        let state = self.state();
        match index {
            Some(index) => {
                let stats = state.stats.get(index).ok_or(PoolError::UnknownCredential {
                    index,
                    len: self.len(),
                })?;
                Ok(vec![self.view(index, stats, now)])
            }
            None => Ok(state
                .stats
                .iter()
                .enumerate()
                .map(|(index, stats)| self.view(index, stats, now))
                .collect()),
        }
    }

    pub fn available_count(&self) -> usize {
        let now = Instant::now();
        self.state()
            .stats
            .iter()
            .filter(|stats| stats.is_available(now, &self.settings))
            .count()
    }

    fn view(&self, index: usize, stats: &CredentialStats, now: Instant) -> CredentialStatsView {
        CredentialStatsView {
            index,
            credential: self.credentials[index].masked(),
            uses: stats.uses,
            last_used_secs_ago: stats.idle(now).map(|idle| idle.as_secs_f64()),
            consecutive_failures: stats.consecutive_failures,
            total_successes: stats.total_successes,
            total_failures: stats.total_failures,
            total_rate_limited: stats.total_rate_limited,
            cooldown_remaining_secs: stats
                .rate_limited_until
                .filter(|until| now < *until)
                .map(|until| (until - now).as_secs_f64()),
            available: stats.is_available(now, &self.settings),
        }
    }

    fn scan(&self, now: Instant) -> Scan {
        let mut state = self.state();
        let picked = match self.settings.selection {
            KeySelection::Sequential => {
                let picked = self.first_available_from(&state, state.sequential_cursor, now);
                if let Some((index, _)) = picked {
                    state.sequential_cursor = (index + 1) % self.len();
                }
                picked.map(|(index, _)| index)
            }
            KeySelection::RoundRobin => {
                let picked = self.first_available_from(&state, state.round_robin_cursor, now);
                let inspected = picked.map_or(self.len(), |(_, inspected)| inspected);
                state.round_robin_cursor = (state.round_robin_cursor + inspected) % self.len();
                picked.map(|(index, _)| index)
            }
            KeySelection::LeastUsed => state
                .stats
                .iter()
                .enumerate()
                .filter(|(_, stats)| stats.is_available(now, &self.settings))
                .min_by_key(|(index, stats)| (stats.uses, *index))
                .map(|(index, _)| index),
            KeySelection::SmartCooldown => state
                .stats
                .iter()
                .enumerate()
                .filter(|(_, stats)| stats.is_available(now, &self.settings))
                .min_by_key(|(index, stats)| {
                    let idle = stats.idle(now).unwrap_or(Duration::MAX);
                    (stats.consecutive_failures, Reverse(idle), *index)
                })
                .map(|(index, _)| index),
        };

        match picked {
            Some(index) => {
                let stats = &mut state.stats[index];
                if stats.window_expired(now, self.settings.reset_window) {
                    stats.uses = 0;
                }
                stats.uses += 1;
                stats.last_used_at = Some(now);
                Scan::Picked(index)
            }
            None => Scan::Busy {
                reset_any: self.reset_expired(&mut state, now),
            },
        }
    }

    /// Walks at most one full cycle from `cursor`; returns the index found
    /// and how many slots were inspected to reach it.
    fn first_available_from(
        &self,
        state: &PoolState,
        cursor: usize,
        now: Instant,
    ) -> Option<(usize, usize)> {
        let len = self.len();
        (0..len)
            .map(|offset| (cursor + offset) % len)
            .enumerate()
            .find(|(_, index)| state.stats[*index].is_available(now, &self.settings))
            .map(|(offset, index)| (index, offset + 1))
    }

    fn reset_expired(&self, state: &mut PoolState, now: Instant) -> bool {
        let mut reset_any = false;
        for stats in state.stats.iter_mut() {
            if stats.uses > 0 && stats.window_expired(now, self.settings.reset_window) {
                stats.uses = 0;
                reset_any = true;
            }
        }
        reset_any
    }

    fn stats_mut<'a>(
        &self,
        state: &'a mut PoolState,
        index: usize,
    ) -> Result<&'a mut CredentialStats, PoolError> {
        let len = self.len();
        state
            .stats
            .get_mut(index)
            .ok_or(PoolError::UnknownCredential { index, len })
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("key-{i}")).collect()
    }

    fn pool(n: usize, selection: KeySelection) -> CredentialPool {
        let settings = PoolSettings {
            selection,
            ..PoolSettings::default()
        };
        CredentialPool::new(keys(n), settings).expect("pool")
    }

    #[test]
    fn empty_credential_list_is_a_configuration_error() {
        let err = CredentialPool::new(Vec::new(), PoolSettings::default()).unwrap_err();
        assert_eq!(err, ConfigurationError::NoCredentials);
    }

    #[tokio::test(start_paused = true)]
    async fn round_robin_visits_every_credential_once_per_cycle() -> anyhow::Result<()> {
        let pool = pool(5, KeySelection::RoundRobin);
        let mut seen = Vec::new();
        for _ in 0..5 {
            let (_, index) = pool.next().await?;
            seen.push(index);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        let distinct: HashSet<_> = seen.iter().collect();
        assert_eq!(distinct.len(), 5);
        assert_eq!(pool.next().await?.1, 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_credential_is_skipped() -> anyhow::Result<()> {
        let settings = PoolSettings {
            selection: KeySelection::Sequential,
            rate_limit: 2,
            reset_window: Duration::from_millis(500),
            ..PoolSettings::default()
        };
        let pool = CredentialPool::new(keys(3), settings)?;
        let (_, first) = pool.next().await?;
        pool.report_rate_limited(first)?;

        let stats = pool.stats_of(first)?;
        assert_eq!(stats.uses, 2);
        assert_eq!(stats.consecutive_failures, 1);
        assert!(stats.rate_limited_until.is_some_and(|until| until > Instant::now()));

        let (_, second) = pool.next().await?;
        assert_ne!(first, second);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn idle_credential_resets_usage_before_next_use() -> anyhow::Result<()> {
        let settings = PoolSettings {
            selection: KeySelection::Sequential,
            rate_limit: 100,
            reset_window: Duration::from_millis(500),
            ..PoolSettings::default()
        };
        let pool = CredentialPool::new(keys(1), settings)?;
        for _ in 0..10 {
            pool.next().await?;
        }
        assert_eq!(pool.stats_of(0)?.uses, 10);

        tokio::time::advance(Duration::from_millis(600)).await;
        pool.next().await?;
        assert_eq!(pool.stats_of(0)?.uses, 1);
        Ok(())
    }

    #[test]
    fn report_success_always_clears_failures() -> anyhow::Result<()> {
        let pool = pool(2, KeySelection::RoundRobin);
        pool.report_success(0)?;
        assert_eq!(pool.stats_of(0)?.consecutive_failures, 0);
        pool.report_failure(1)?;
        pool.report_failure(1)?;
        assert_eq!(pool.stats_of(1)?.consecutive_failures, 2);
        pool.report_success(1)?;
        assert_eq!(pool.stats_of(1)?.consecutive_failures, 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn least_used_prefers_lowest_uses_then_lowest_index() -> anyhow::Result<()> {
        let pool = pool(3, KeySelection::LeastUsed);
        assert_eq!(pool.next().await?.1, 0);
        assert_eq!(pool.next().await?.1, 1);
        assert_eq!(pool.next().await?.1, 2);
        assert_eq!(pool.next().await?.1, 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn smart_cooldown_prefers_fewest_failures_then_most_idle() -> anyhow::Result<()> {
        let pool = pool(3, KeySelection::SmartCooldown);
        // never-used credentials are the most idle
        assert_eq!(pool.next().await?.1, 0);
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(pool.next().await?.1, 1);
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(pool.next().await?.1, 2);

        pool.report_failure(0)?;
        tokio::time::advance(Duration::from_millis(10)).await;
        // 1 has been idle longer than 2, 0 carries a failure
        assert_eq!(pool.next().await?.1, 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_waits_for_cooldown() -> anyhow::Result<()> {
        let settings = PoolSettings {
            selection: KeySelection::Sequential,
            rate_limit: 1,
            reset_window: Duration::from_secs(3),
            busy_backoff: Duration::from_secs(1),
            max_busy_scans: 10,
        };
        let pool = CredentialPool::new(keys(1), settings)?;
        pool.next().await?;
        let started = Instant::now();
        let (_, index) = pool.next().await?;
        assert_eq!(index, 0);
        assert!(started.elapsed() >= Duration::from_secs(3));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn busy_handler_gives_up_after_max_scans() -> anyhow::Result<()> {
        let settings = PoolSettings {
            selection: KeySelection::RoundRobin,
            rate_limit: 1,
            reset_window: Duration::from_secs(3600),
            busy_backoff: Duration::from_millis(100),
            max_busy_scans: 3,
        };
        let pool = CredentialPool::new(keys(2), settings)?;
        pool.next().await?;
        pool.next().await?;
        let err = pool.next().await.unwrap_err();
        assert!(matches!(err, PoolError::AllCredentialsBusy { scans: 3, .. }));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_never_lose_a_booking() -> anyhow::Result<()> {
        let settings = PoolSettings {
            selection: KeySelection::RoundRobin,
            rate_limit: 10_000,
            ..PoolSettings::default()
        };
        let pool = Arc::new(CredentialPool::new(keys(4), settings)?);
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let pool = Arc::clone(&pool);
            tasks.push(tokio::spawn(async move {
                for _ in 0..500 {
                    pool.next().await?;
                }
                Ok::<_, PoolError>(())
            }));
        }
        for task in tasks {
            task.await??;
        }

        let uses: Vec<u32> = (0..4)
            .map(|index| pool.stats_of(index).map(|stats| stats.uses))
            .collect::<Result<_, _>>()?;
        assert_eq!(uses.iter().sum::<u32>(), 8000);
        assert_eq!(uses, vec![2000; 4]);
        Ok(())
    }

    #[test]
    fn unknown_index_is_reported() {
        let pool = pool(2, KeySelection::RoundRobin);
        assert_eq!(
            pool.report_failure(7),
            Err(PoolError::UnknownCredential { index: 7, len: 2 })
        );
        assert!(pool.stats(Some(2)).is_err());
        assert_eq!(pool.stats(None).map(|all| all.len()), Ok(2));
    }

    #[test]
    fn debug_output_masks_the_secret() {
        let pool = pool(1, KeySelection::RoundRobin);
        let rendered = format!("{:?}", pool.credential(0));
        assert!(rendered.contains("key-***"));
        assert!(!rendered.contains("key-0"));
    }
}
