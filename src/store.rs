//! Expirable quota storage.
//!
//! Quotas live in a fixed-capacity map sharded across a ring of expiration
//! buckets. A quota whose window is `period` long is placed in the bucket
//! the reclaimer will reach roughly `period` from now, so each sweep frees a
//! whole bucket of expired quotas in amortized constant work per quota.
//! Lookups, admissions, and sweeps all serialize on a single mutex, and a
//! free pool recycles quota allocations between windows.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::LimiterConfig;
use crate::error::{Error, Result};
use crate::key::join;
use crate::limit::Limited;
use crate::metrics::Gauge;
use crate::quota::Quota;

/// A drained bucket's inner map is reallocated if it ever held more than
/// this many entries, so a burst does not pin its backing storage.
const BUCKET_SHRINK_THRESHOLD: usize = 32;

struct Entry {
    quota: Arc<Quota>,
    bucket: usize,
}

/// One time shard of the ring. `expires_at` is the latest expiration among
/// the bucket's quotas.
struct Bucket {
    entries: HashMap<String, Arc<Quota>>,
    expires_at: Instant,
    high_water: usize,
}

struct StoreInner {
    items: HashMap<String, Entry>,
    buckets: Vec<Bucket>,
    next_bucket_to_expire: usize,
    pool: Vec<Arc<Quota>>,
}

impl StoreInner {
    fn bucket_index(&self, period: Duration, bucket_ttl: Duration, number_buckets: usize) -> usize {
        let offset = (period.as_nanos() / bucket_ttl.as_nanos().max(1)) as usize;
        (offset + self.next_bucket_to_expire) % number_buckets
    }

    fn add_to_bucket(&mut self, key: String, quota: &Arc<Quota>, index: usize) {
        let bucket = &mut self.buckets[index];
        bucket.entries.insert(key, Arc::clone(quota));
        let expires_at = quota.expiration();
        if bucket.expires_at < expires_at {
            bucket.expires_at = expires_at;
        }
        bucket.high_water = bucket.high_water.max(bucket.entries.len());
    }

    fn remove_from_bucket(&mut self, key: &str, index: usize) {
        self.buckets[index].entries.remove(key);
    }

    /// Delete every entry in the bucket, returning entries to the free pool
    /// when the store holds the only handle. Returns the number of entries
    /// drained.
    fn drain_bucket(&mut self, index: usize) -> usize {
        let StoreInner {
            items,
            buckets,
            pool,
            ..
        } = self;
        let bucket = &mut buckets[index];
        let drained = bucket.entries.len();
        for (key, quota) in bucket.entries.drain() {
            items.remove(&key);
            if Arc::strong_count(&quota) == 1 {
                pool.push(quota);
            }
        }
        if bucket.high_water > BUCKET_SHRINK_THRESHOLD {
            bucket.entries = HashMap::new();
        }
        bucket.high_water = 0;
        drained
    }
}

struct Shared {
    max_size: usize,
    bucket_ttl: Duration,
    number_buckets: usize,
    inner: Mutex<StoreInner>,
    usage_gauge: Arc<dyn Gauge>,
    cancel: CancellationToken,
}

/// A size-bounded quota cache with background reclamation of expired
/// entries.
pub(crate) struct ExpirableStore {
    shared: Arc<Shared>,
}

impl ExpirableStore {
    /// Create a store holding at most `max_size` quotas, where no quota's
    /// window outlives `max_entry_ttl`. Spawns the background reclaimer, so
    /// this must be called within a Tokio runtime.
    pub(crate) fn new(
        max_size: usize,
        max_entry_ttl: Duration,
        config: &LimiterConfig,
    ) -> Result<Self> {
        if max_size == 0 {
            return Err(Error::InvalidMaxSize);
        }
        if max_entry_ttl.is_zero() {
            return Err(Error::InvalidParameter(
                "max entry ttl must be greater than zero".to_string(),
            ));
        }
        if config.number_buckets == 0 {
            return Err(Error::InvalidNumberBuckets);
        }

        let divisor = (config.number_buckets as u32).saturating_sub(1).max(1);
        let bucket_ttl = (max_entry_ttl / divisor).max(Duration::from_micros(1));

        let now = Instant::now();
        let buckets = (0..config.number_buckets)
            .map(|_| Bucket {
                entries: HashMap::with_capacity(max_size),
                expires_at: now,
                high_water: 0,
            })
            .collect();

        let shared = Arc::new(Shared {
            max_size,
            bucket_ttl,
            number_buckets: config.number_buckets,
            inner: Mutex::new(StoreInner {
                items: HashMap::with_capacity(max_size),
                buckets,
                next_bucket_to_expire: 0,
                pool: Vec::new(),
            }),
            usage_gauge: Arc::clone(&config.usage_gauge),
            cancel: CancellationToken::new(),
        });
        config.capacity_gauge.set(max_size as f64);

        let reclaimer = Arc::clone(&shared);
        tokio::spawn(async move { reclaimer.delete_expired().await });

        Ok(Self { shared })
    }

    /// Get the quota for `id` under `limit`, creating it if absent.
    ///
    /// An expired quota is reset into a new window before being returned. A
    /// new quota is admitted only while the store has room; otherwise
    /// [`Error::LimiterFull`] reports how long until the next bucket is
    /// reclaimed.
    pub(crate) fn fetch(&self, id: &str, limit: &Limited) -> Result<Arc<Quota>> {
        let shared = &self.shared;
        if shared.cancel.is_cancelled() {
            return Err(Error::Stopped);
        }

        let mut inner = shared.inner.lock();
        let key = join(&[&limit.resource, &limit.action, limit.per.as_str(), id]);

        let existing = inner
            .items
            .get(&key)
            .map(|entry| (Arc::clone(&entry.quota), entry.bucket));
        if let Some((quota, old_bucket)) = existing {
            if quota.expired() {
                trace!(key = %key, "resetting expired quota");
                inner.remove_from_bucket(&key, old_bucket);
                quota.reset(limit);
                let bucket =
                    inner.bucket_index(limit.period, shared.bucket_ttl, shared.number_buckets);
                inner.add_to_bucket(key.clone(), &quota, bucket);
                if let Some(entry) = inner.items.get_mut(&key) {
                    entry.bucket = bucket;
                }
            }
            return Ok(quota);
        }

        if inner.items.len() >= shared.max_size {
            trace!(key = %key, "quota store full");
            return Err(Error::LimiterFull {
                retry_in: shared.bucket_ttl,
            });
        }

        let quota = match inner.pool.pop() {
            Some(quota) => {
                quota.reset(limit);
                quota
            }
            None => Arc::new(Quota::new(limit)),
        };
        let bucket = inner.bucket_index(limit.period, shared.bucket_ttl, shared.number_buckets);
        inner.add_to_bucket(key.clone(), &quota, bucket);
        inner.items.insert(
            key,
            Entry {
                quota: Arc::clone(&quota),
                bucket,
            },
        );
        shared.usage_gauge.set(inner.items.len() as f64);
        Ok(quota)
    }

    /// Stop the background reclaimer. Subsequent calls to
    /// [`ExpirableStore::fetch`] return [`Error::Stopped`]. Idempotent.
    pub(crate) fn shutdown(&self) {
        if !self.shared.cancel.is_cancelled() {
            debug!("stopping quota store");
            self.shared.cancel.cancel();
        }
    }
}

impl Drop for ExpirableStore {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl Shared {
    async fn delete_expired(&self) {
        let mut ticker = interval(self.bucket_ttl);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; consume it so the first
        // sweep happens one bucket_ttl from now.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    trace!("quota reclaimer stopped");
                    return;
                }
                _ = ticker.tick() => self.sweep().await,
            }
        }
    }

    async fn sweep(&self) {
        let (to_expire, expires_at) = {
            let mut inner = self.inner.lock();
            let to_expire = inner.next_bucket_to_expire;
            inner.next_bucket_to_expire = (to_expire + 1) % self.number_buckets;
            (to_expire, inner.buckets[to_expire].expires_at)
        };

        // A tick can arrive slightly before the bucket's last quota
        // expires; wait out the difference rather than dropping live
        // quotas.
        let now = Instant::now();
        if expires_at > now {
            tokio::time::sleep(expires_at - now).await;
        }

        let mut inner = self.inner.lock();
        let drained = inner.drain_bucket(to_expire);
        if drained > 0 {
            self.usage_gauge.set(inner.items.len() as f64);
            debug!(bucket = to_expire, drained, "reclaimed expired quotas");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_NUMBER_BUCKETS;
    use crate::limit::LimitPer;

    fn limited(action: &str, max_requests: u64, period: Duration) -> Limited {
        Limited {
            resource: "resource".to_string(),
            action: action.to_string(),
            per: LimitPer::Total,
            max_requests,
            period,
        }
    }

    fn config(number_buckets: usize) -> LimiterConfig {
        LimiterConfig {
            number_buckets,
            ..LimiterConfig::default()
        }
    }

    #[tokio::test]
    async fn construction_validates_parameters() {
        let cases = [
            (
                "default_number_buckets",
                10,
                Duration::from_secs(DEFAULT_NUMBER_BUCKETS as u64),
                DEFAULT_NUMBER_BUCKETS,
                None,
            ),
            (
                "custom_number_buckets",
                10,
                Duration::from_secs(60),
                60,
                None,
            ),
            (
                "zero_size",
                0,
                Duration::from_secs(60),
                60,
                Some(Error::InvalidMaxSize),
            ),
            (
                "zero_ttl",
                10,
                Duration::ZERO,
                60,
                Some(Error::InvalidParameter(String::new())),
            ),
            (
                "zero_buckets",
                10,
                Duration::from_secs(60),
                0,
                Some(Error::InvalidNumberBuckets),
            ),
        ];

        for (name, max_size, max_entry_ttl, number_buckets, want_err) in cases {
            let got = ExpirableStore::new(max_size, max_entry_ttl, &config(number_buckets));
            match want_err {
                None => {
                    let store = got.unwrap_or_else(|e| panic!("{name}: {e}"));
                    assert_eq!(
                        store.shared.bucket_ttl,
                        max_entry_ttl / (number_buckets as u32 - 1),
                        "{name}"
                    );
                    assert_eq!(
                        store.shared.inner.lock().buckets.len(),
                        number_buckets,
                        "{name}"
                    );
                }
                Some(want) => {
                    let err = got.err().unwrap_or_else(|| panic!("{name}: expected error"));
                    assert_eq!(
                        std::mem::discriminant(&err),
                        std::mem::discriminant(&want),
                        "{name}: got {err:?}"
                    );
                }
            }
        }
    }

    #[tokio::test]
    async fn fetch_fails_at_capacity() {
        let max_size = 5;
        let store = ExpirableStore::new(max_size, Duration::from_secs(60), &config(60)).unwrap();
        let limit = limited("action", 10, Duration::from_secs(60));

        for i in 0..max_size {
            store.fetch(&format!("id-{i}"), &limit).unwrap();
        }

        let err = store.fetch("id-overflow", &limit).unwrap_err();
        assert!(
            matches!(err, Error::LimiterFull { retry_in } if retry_in == store.shared.bucket_ttl)
        );
    }

    #[tokio::test]
    async fn fetch_returns_same_quota_until_expired() {
        let store = ExpirableStore::new(10, Duration::from_secs(60), &config(5)).unwrap();
        let limit = limited("action", 10, Duration::from_secs(60));

        let first = store.fetch("id", &limit).unwrap();
        let second = store.fetch("id", &limit).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn fetch_resets_expired_quota() {
        // Few buckets so each bucket spans a long slice and the reclaimer
        // cannot delete the quota during the test.
        let store = ExpirableStore::new(20, Duration::from_secs(60), &config(5)).unwrap();
        let limit = limited("short", 10, Duration::from_millis(10));

        let quota = store.fetch("id", &limit).unwrap();
        assert_eq!(quota.remaining(), 10);
        quota.consume();
        assert_eq!(quota.remaining(), 9);

        tokio::time::sleep(quota.resets_in() + Duration::from_millis(5)).await;

        let quota = store.fetch("id", &limit).unwrap();
        assert_eq!(quota.remaining(), 10);
    }

    #[tokio::test]
    async fn reclaimer_deletes_expired_buckets() {
        let store = ExpirableStore::new(20, Duration::from_secs(2), &config(20)).unwrap();
        let short = limited("short", 10, Duration::from_millis(100));
        let long = limited("long", 10, Duration::from_secs(2));

        for i in 0..5 {
            let id = format!("id-{i}");
            store.fetch(&id, &short).unwrap();
            store.fetch(&id, &long).unwrap();
        }
        assert_eq!(store.shared.inner.lock().items.len(), 10);

        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(store.shared.inner.lock().items.len(), 5);
    }

    #[tokio::test]
    async fn items_and_buckets_stay_coherent() {
        let store = ExpirableStore::new(50, Duration::from_secs(60), &config(10)).unwrap();
        let periods = [1, 10, 30, 60];

        for i in 0..20 {
            let limit = limited(
                "action",
                10,
                Duration::from_secs(periods[i % periods.len()]),
            );
            store.fetch(&format!("id-{i}"), &limit).unwrap();
        }

        let inner = store.shared.inner.lock();
        let bucketed: usize = inner.buckets.iter().map(|b| b.entries.len()).sum();
        assert_eq!(inner.items.len(), bucketed);
        assert!(inner.items.len() <= store.shared.max_size);
    }

    #[tokio::test]
    async fn drained_entries_return_to_pool() {
        let store = ExpirableStore::new(10, Duration::from_secs(3), &config(4)).unwrap();
        let limit = limited("action", 10, Duration::from_secs(1));

        {
            let quota = store.fetch("id", &limit).unwrap();
            drop(quota);
        }

        // Stop the background reclaimer and drain the ring manually, up to
        // and past the entry's bucket. The sweep waits for the bucket's
        // expiration before draining.
        store.shutdown();
        store.shared.sweep().await;
        store.shared.sweep().await;

        let inner = store.shared.inner.lock();
        assert!(inner.items.is_empty());
        assert_eq!(inner.pool.len(), 1);
    }

    #[tokio::test]
    async fn fetch_after_shutdown_fails() {
        let store = ExpirableStore::new(10, Duration::from_secs(60), &config(60)).unwrap();
        let limit = limited("action", 10, Duration::from_secs(60));

        store.fetch("id", &limit).unwrap();
        store.shutdown();
        store.shutdown();

        let err = store.fetch("id", &limit).unwrap_err();
        assert!(matches!(err, Error::Stopped));
    }
}
