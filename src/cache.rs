//! Load-through LRU cache of deserialized clusters.

use crate::cluster::QuadCluster;
use crate::error::Result;
use log::debug;
use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Something clusters can be loaded from by quad-key.
pub trait ClusterSource: Send + Sync {
    type Cluster: QuadCluster + Send + Sync;

    fn load_cluster(&self, quad_key: &str) -> Result<Self::Cluster>;
}

/// Bounded cache in front of a [`ClusterSource`].
///
/// At most one load per quad-key is in flight at any time: the first
/// requester of an uncached key loads it while holding that key's load lock,
/// and concurrent requesters of the same key wait on the lock and then find
/// the cluster cached. Requests for other keys are not blocked. Clusters are
/// immutable, so eviction just drops the cached `Arc`.
pub struct ClusterCache<S: ClusterSource> {
    source: S,
    clusters: Mutex<LruCache<String, Arc<S::Cluster>>>,
    loading: Mutex<FxHashMap<String, Arc<Mutex<()>>>>,
    load_count: AtomicUsize,
}

impl<S: ClusterSource> ClusterCache<S> {
    pub fn new(source: S, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            clusters: Mutex::new(LruCache::new(capacity)),
            loading: Mutex::new(FxHashMap::default()),
            load_count: AtomicUsize::new(0),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// The cluster for `quad_key`, loading it on a miss.
    ///
    /// A failed load is returned to its requester and not cached, so a later
    /// request tries again.
    pub fn get_cluster(&self, quad_key: &str) -> Result<Arc<S::Cluster>> {
        if let Some(cluster) = self.clusters.lock().get(quad_key) {
            return Ok(Arc::clone(cluster));
        }

        let key_lock = {
            let mut loading = self.loading.lock();
            Arc::clone(loading.entry(quad_key.to_string()).or_default())
        };
        let result = {
            let _guard = key_lock.lock();
            self.load_locked(quad_key)
        };

        let mut loading = self.loading.lock();
        // drop the key lock once no other requester holds it
        if Arc::strong_count(&key_lock) == 2 {
            loading.remove(quad_key);
        }
        result
    }

    fn load_locked(&self, quad_key: &str) -> Result<Arc<S::Cluster>> {
        if let Some(cluster) = self.clusters.lock().get(quad_key) {
            return Ok(Arc::clone(cluster));
        }

        let cluster = Arc::new(self.source.load_cluster(quad_key)?);
        let loads = self.load_count.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            "loaded cluster: quadkey={}, records={}, loads={}",
            quad_key,
            cluster.record_count(),
            loads
        );

        if let Some((victim, _)) = self
            .clusters
            .lock()
            .push(quad_key.to_string(), Arc::clone(&cluster))
            && victim != quad_key
        {
            debug!("evicted cluster: quadkey={}", victim);
        }
        Ok(cluster)
    }

    /// Number of clusters loaded from the source so far.
    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.clusters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.lock().is_empty()
    }

    pub fn contains(&self, quad_key: &str) -> bool {
        self.clusters.lock().contains(quad_key)
    }

    pub fn clear(&self) {
        self.clusters.lock().clear();
    }
}

impl<S: ClusterSource> std::fmt::Debug for ClusterCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterCache")
            .field("cached", &self.len())
            .field("loads", &self.load_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use crate::error::ClusterError;
    use geocluster_types::{ClusterSchema, DataType, GeometryColumnInfo, RecordSchema};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    struct SlowSource {
        schema: Arc<ClusterSchema>,
        fail_first: AtomicUsize,
    }

    impl SlowSource {
        fn new(failures: usize) -> Self {
            Self {
                schema: Arc::new(ClusterSchema::new(
                    RecordSchema::new().with_column("id", DataType::Long),
                    GeometryColumnInfo::new("the_geom", "EPSG:4326"),
                )),
                fail_first: AtomicUsize::new(failures),
            }
        }
    }

    impl ClusterSource for SlowSource {
        type Cluster = InMemoryCluster;

        fn load_cluster(&self, quad_key: &str) -> Result<InMemoryCluster> {
            thread::sleep(Duration::from_millis(20));
            let failing = self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(ClusterError::Other("disk unplugged".into()));
            }
            InMemoryCluster::new(quad_key, Arc::clone(&self.schema), Vec::new())
        }
    }

    #[test]
    fn test_concurrent_requests_load_once() {
        let cache = Arc::new(ClusterCache::new(SlowSource::new(0), 3));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get_cluster("0123").map(|c| c.quad_key().to_string())
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), "0123");
        }
        assert_eq!(cache.load_count(), 1);
    }

    #[test]
    fn test_eviction_follows_recency() {
        let cache = ClusterCache::new(SlowSource::new(0), 2);
        cache.get_cluster("0").unwrap();
        cache.get_cluster("1").unwrap();
        cache.get_cluster("0").unwrap();
        cache.get_cluster("2").unwrap();

        assert!(cache.contains("0"));
        assert!(!cache.contains("1"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.load_count(), 3);
    }

    #[test]
    fn test_failed_load_is_retried() {
        let cache = ClusterCache::new(SlowSource::new(1), 2);
        assert!(cache.get_cluster("3").is_err());
        assert!(!cache.contains("3"));
        assert!(cache.get_cluster("3").is_ok());
        assert_eq!(cache.load_count(), 1);
    }
}
