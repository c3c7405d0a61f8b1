//! `DaemonClientPool`, an LRU-with-eviction pool of daemon clients keyed by
//! pipeline daemon URL.

use std::sync::Arc;

use crate::{bounded_cache, DaemonClient, DEFAULT_CAPACITY};

/// A bounded pool of [`DaemonClient`]s keyed by daemon URL.
///
/// At most `capacity` clients are live at once; evicting the least-recently
/// used one closes it. The close runs on a spawned task so that eviction —
/// which happens under this pool's lock — never blocks on the evicted
/// client's I/O, per `spec.md` §5 ("must not block ... for long, but
/// correctness only requires that `Close` eventually runs").
///
/// A concurrent `get` miss followed by two concurrent `add`s for the same
/// key may transiently construct duplicate clients; the pool keeps
/// whichever insertion won and the loser is simply never stored (and so is
/// dropped, not `close`d — callers that construct a client speculatively
/// should treat a lost race as "someone else's client is now authoritative"
/// rather than leak anything that needs a network-level close).
pub struct DaemonClientPool {
    inner: parking_lot::Mutex<lru::LruCache<String, Arc<dyn DaemonClient>>>,
}

impl DaemonClientPool {
    /// Creates a pool with [`DEFAULT_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a pool with the given capacity (clamped to at least 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: bounded_cache(capacity),
        }
    }

    /// Returns the cached client for `url`, if any, touching its LRU
    /// recency.
    pub fn get(&self, url: &str) -> Option<Arc<dyn DaemonClient>> {
        self.inner.lock().get(url).cloned()
    }

    /// Inserts `client` under `url`. If this causes an eviction, the
    /// evicted client is closed on a spawned task.
    pub fn add(&self, url: impl Into<String>, client: Arc<dyn DaemonClient>) {
        let evicted = self.inner.lock().put(url.into(), client);
        if let Some((evicted_url, evicted_client)) = evicted {
            tracing::debug!(url = %evicted_url, "evicting daemon client from pool");
            spawn_close(evicted_client);
        }
    }

    /// Closes every client currently in the pool and empties it, awaiting
    /// every `close()` before returning. Called when the scheduler shuts
    /// down: unlike eviction's fire-and-forget `spawn_close`, the caller
    /// here (`Scaler::start`) needs the "every client has had `close`
    /// called exactly once" guarantee to hold the instant it returns, so
    /// this awaits each close in turn rather than spawning it.
    pub async fn purge(&self) {
        let clients: Vec<_> = self.inner.lock().iter().map(|(_, client)| client.clone()).collect();
        self.inner.lock().clear();
        for client in clients {
            client.close().await;
        }
    }
}

impl Default for DaemonClientPool {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_close(client: Arc<dyn DaemonClient>) {
    // Best-effort: if there is no reactor running (e.g. a unit test
    // constructing a pool outside an async context), simply drop the
    // client without invoking `close`.
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        let _ = handle.spawn(async move { client.close().await });
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{BufferInfo, Error, PartitionMetrics};

    struct CountingClient {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DaemonClient for CountingClient {
        async fn get_vertex_metrics(&self, _pipeline: &str, _vertex: &str) -> Result<Vec<PartitionMetrics>, Error> {
            Ok(vec![])
        }

        async fn get_pipeline_buffer(&self, _pipeline: &str, _buffer_name: &str) -> Result<BufferInfo, Error> {
            Ok(BufferInfo::default())
        }

        async fn close(&self) {
            let _ = self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let pool = DaemonClientPool::new();
        let closed = Arc::new(AtomicUsize::new(0));
        let client: Arc<dyn DaemonClient> = Arc::new(CountingClient { closed: closed.clone() });

        pool.add("http://daemon-a", client);
        assert!(pool.get("http://daemon-a").is_some());
        assert!(pool.get("http://daemon-b").is_none());
    }

    #[tokio::test]
    async fn eviction_closes_the_evicted_client_exactly_once() {
        let pool = DaemonClientPool::with_capacity(1);
        let closed = Arc::new(AtomicUsize::new(0));
        let first: Arc<dyn DaemonClient> = Arc::new(CountingClient { closed: closed.clone() });
        let second: Arc<dyn DaemonClient> = Arc::new(CountingClient {
            closed: Arc::new(AtomicUsize::new(0)),
        });

        pool.add("http://daemon-a", first);
        pool.add("http://daemon-b", second); // evicts daemon-a's client

        // The close was spawned onto this test's own runtime; yield so it runs.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(pool.get("http://daemon-a").is_none());
    }

    #[tokio::test]
    async fn purge_closes_every_remaining_client() {
        let pool = DaemonClientPool::new();
        let closed = Arc::new(AtomicUsize::new(0));
        for i in 0..3 {
            let client: Arc<dyn DaemonClient> = Arc::new(CountingClient { closed: closed.clone() });
            pool.add(format!("http://daemon-{i}"), client);
        }

        pool.purge().await;

        assert_eq!(closed.load(Ordering::SeqCst), 3);
        assert!(pool.get("http://daemon-0").is_none());
    }
}
