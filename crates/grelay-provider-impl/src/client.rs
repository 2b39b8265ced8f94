use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DIRECT_KEY: &str = "direct";
/// Rotating egress pools churn through proxy URLs; older clients are dropped
/// once this many are held.
const MAX_CACHED_CLIENTS: usize = 64;

static CLIENTS: LazyLock<ClientCache<wreq::Client>> =
    LazyLock::new(|| ClientCache::new(MAX_CACHED_CLIENTS));

/// One pooled client per egress path. `None` connects directly and ignores
/// any proxy set in the environment.
pub fn shared_client(proxy: Option<&str>) -> Result<wreq::Client, wreq::Error> {
    CLIENTS.get_or_try_insert(proxy.unwrap_or(DIRECT_KEY), || {
        debug!(event = "http_client_built", direct = proxy.is_none());
        build_client(proxy)
    })
}

/// A fresh client that is not cached. Used for one-off health checks.
pub(crate) fn build_client(proxy: Option<&str>) -> Result<wreq::Client, wreq::Error> {
    let builder = wreq::Client::builder().connect_timeout(CONNECT_TIMEOUT);
    let builder = match proxy {
        Some(url) => builder.proxy(wreq::Proxy::all(url)?),
        None => builder.no_proxy(),
    };
    builder.build()
}

struct Cached<C> {
    client: C,
    last_used: AtomicU64,
}

/// Keyed client cache that evicts the least recently used entry when full.
pub(crate) struct ClientCache<C> {
    capacity: usize,
    tick: AtomicU64,
    entries: DashMap<String, Cached<C>>,
}

impl<C: Clone> ClientCache<C> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: AtomicU64::new(0),
            entries: DashMap::new(),
        }
    }

    pub(crate) fn get_or_try_insert<E>(
        &self,
        key: &str,
        build: impl FnOnce() -> Result<C, E>,
    ) -> Result<C, E> {
        let now = self.tick.fetch_add(1, Ordering::Relaxed);
        if let Some(entry) = self.entries.get(key) {
            entry.last_used.store(now, Ordering::Relaxed);
            return Ok(entry.client.clone());
        }
        let client = build()?;
        while self.entries.len() >= self.capacity {
            // Collect the key first; removing while an iterator guard is
            // alive deadlocks the shard.
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.last_used.load(Ordering::Relaxed))
                .map(|entry| entry.key().clone());
            let Some(oldest) = oldest else { break };
            self.entries.remove(&oldest);
            debug!(event = "http_client_evicted", cached = self.entries.len());
        }
        let entry = self.entries.entry(key.to_string()).or_insert(Cached {
            client,
            last_used: AtomicU64::new(now),
        });
        Ok(entry.client.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
