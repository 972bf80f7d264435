use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;

use crate::Admission;
use crate::LimiterConfig;
use crate::TokenBucket;

#[derive(Debug)]
struct Slot {
    bucket: TokenBucket,
    last_seen: Instant,
}

/// A keyed set of token buckets sharing one [`LimiterConfig`].
///
/// Buckets are created on the first request for a key and evicted once the
/// key has been idle for longer than the configured TTL. All admission checks
/// and sweeps go through a single lock; buckets are small and a check is a
/// few arithmetic operations, so no finer-grained locking is used.
#[derive(Debug)]
pub struct RateLimiterRegistry {
    config: LimiterConfig,
    buckets: Mutex<HashMap<String, Slot>>,
}

impl RateLimiterRegistry {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Checks, and if admitted charges, one request for `key`.
    ///
    /// An empty key is never limited.
    pub fn admit(&self, key: &str) -> Admission {
        self.admit_at(key, Instant::now())
    }

    /// [`admit`](Self::admit) with an explicit clock reading.
    pub fn admit_at(&self, key: &str, now: Instant) -> Admission {
        if key.is_empty() {
            return ControlFlow::Continue(());
        }

        let mut buckets = self.buckets.lock();
        if let Some(slot) = buckets.get_mut(key) {
            slot.last_seen = now;
            return slot.bucket.try_acquire(now);
        }

        // Only a key seen for the first time is copied into the map.
        let mut bucket = TokenBucket::new(self.config.rate(), self.config.burst(), now);
        let admission = bucket.try_acquire(now);
        buckets.insert(
            key.to_owned(),
            Slot {
                bucket,
                last_seen: now,
            },
        );
        admission
    }

    /// Removes every bucket idle for longer than the TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// [`sweep`](Self::sweep) with an explicit clock reading.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let idle_ttl = self.config.idle_ttl();
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, slot| now.saturating_duration_since(slot.last_seen) <= idle_ttl);
        before - buckets.len()
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.lock().is_empty()
    }

    /// Starts the background idle sweep on the current tokio runtime.
    ///
    /// The task only holds a weak reference: it ends on its own once the
    /// registry is dropped, or earlier through [`Sweeper::shutdown`].
    pub fn spawn_sweeper(self: &Arc<Self>) -> Sweeper {
        let registry = Arc::downgrade(self);
        let period = self.config.sweep_interval();
        let handle = tokio::spawn(sweep_loop(registry, period));
        Sweeper {
            handle: Some(handle),
        }
    }
}

async fn sweep_loop(registry: Weak<RateLimiterRegistry>, period: std::time::Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(registry) = registry.upgrade() else {
            tracing::debug!("rate limiter registry dropped; stopping idle sweep");
            return;
        };
        let evicted = registry.sweep();
        if evicted > 0 {
            tracing::info!(evicted, remaining = registry.len(), "evicted idle rate limit buckets");
        }
    }
}

/// Handle to a registry's background idle sweep.
///
/// Dropping the handle stops the sweep.
#[derive(Debug)]
pub struct Sweeper {
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Stops the sweep and waits for the task to wind down.
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            // A cancelled task reports a JoinError; that is the expected outcome.
            let _ = handle.await;
        }
    }

    /// Whether the background task has ended.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use more_asserts::assert_le;
    use tokio::time::advance;
    use tokio::time::pause;

    use super::*;
    use crate::Reason;

    // Lets spawned tasks woken by a time advance run to their next await.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn registry(rate: f64, burst: u32, idle_ttl: Duration) -> RateLimiterRegistry {
        RateLimiterRegistry::new(LimiterConfig::new(rate, burst, idle_ttl).unwrap())
    }

    #[test]
    fn second_immediate_request_is_denied_with_hint() {
        let rl = registry(1.0, 1, Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(rl.admit_at("k", now), ControlFlow::Continue(()));
        match rl.admit_at("k", now) {
            ControlFlow::Break(Reason::Overloaded { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(1));
            }
            other => panic!("expected a denial, got {other:?}"),
        }
    }

    #[test]
    fn keys_are_independent() {
        let rl = registry(1.0, 1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(rl.admit_at("ip:1", now).is_continue());
        assert!(rl.admit_at("ip:1", now).is_break());
        assert!(rl.admit_at("ip:2", now).is_continue());
        assert_eq!(rl.len(), 2);
    }

    #[test]
    fn empty_key_is_never_limited() {
        let rl = registry(1.0, 1, Duration::from_secs(60));
        let now = Instant::now();

        for _ in 0..10 {
            assert!(rl.admit_at("", now).is_continue());
        }
        assert!(rl.is_empty());
    }

    #[test]
    fn burst_bound_holds_within_window() {
        let rate = 10.0;
        let burst = 20;
        let rl = registry(rate, burst, Duration::from_secs(60));
        let start = Instant::now();

        // Everything inside burst/rate = 2s, hammered every millisecond.
        let mut admitted = 0;
        for ms in 0..1999 {
            if rl.admit_at("k", start + Duration::from_millis(ms)).is_continue() {
                admitted += 1;
            }
        }
        // The burst plus whatever refilled meanwhile, never more.
        assert_le!(admitted, burst as usize + (1.999 * rate) as usize);
    }

    #[test]
    fn sweep_removes_only_idle_buckets() {
        let rl = registry(1.0, 1, Duration::from_secs(60));
        let start = Instant::now();

        let _ = rl.admit_at("old", start);
        let _ = rl.admit_at("fresh", start + Duration::from_secs(50));

        assert_eq!(rl.sweep_at(start + Duration::from_secs(60)), 0);
        assert_eq!(rl.sweep_at(start + Duration::from_secs(61)), 1);
        assert_eq!(rl.len(), 1);

        // The evicted key comes back with a full bucket.
        let later = start + Duration::from_secs(61);
        assert!(rl.admit_at("old", later).is_continue());
    }

    #[test]
    fn eviction_resets_burst_credit() {
        let rl = registry(0.001, 2, Duration::from_secs(10));
        let start = Instant::now();

        assert!(rl.admit_at("k", start).is_continue());
        assert!(rl.admit_at("k", start).is_continue());
        assert!(rl.admit_at("k", start).is_break());

        let later = start + Duration::from_secs(11);
        assert_eq!(rl.sweep_at(later), 1);
        assert!(rl.admit_at("k", later).is_continue());
        assert!(rl.admit_at("k", later).is_continue());
    }

    #[tokio::test]
    async fn sweeper_evicts_in_background() {
        pause();
        let rl = Arc::new(registry(1.0, 1, Duration::from_secs(10)));
        let sweeper = rl.spawn_sweeper();

        let _ = rl.admit("k");
        assert_eq!(rl.len(), 1);

        // The first sweep (at 5s) finds the key still fresh; the one at 15s does not.
        advance(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(rl.len(), 1);

        advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(rl.len(), 0);

        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_background_eviction() {
        pause();
        let rl = Arc::new(registry(1.0, 1, Duration::from_secs(10)));
        let sweeper = rl.spawn_sweeper();
        sweeper.shutdown().await;

        let _ = rl.admit("k");
        // Well past several sweep intervals and the idle TTL.
        for _ in 0..6 {
            advance(Duration::from_secs(5)).await;
            settle().await;
        }
        assert_eq!(rl.len(), 1);

        // The bucket is idle, so only the sweep was keeping it from eviction.
        assert_eq!(rl.sweep(), 1);
    }

    #[test]
    fn tiny_rate_denies_without_panicking() {
        let rl = registry(1e-20, 1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(rl.admit_at("k", now).is_continue());
        assert_eq!(
            rl.admit_at("k", now),
            ControlFlow::Break(Reason::Overloaded {
                retry_after: Duration::MAX
            })
        );
    }

    #[tokio::test]
    async fn sweeper_stops_when_registry_is_dropped() {
        pause();
        let rl = Arc::new(registry(1.0, 1, Duration::from_secs(2)));
        let sweeper = rl.spawn_sweeper();
        drop(rl);

        advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(sweeper.is_finished());
    }

    #[tokio::test]
    async fn concurrent_admissions_never_exceed_burst() {
        let burst = 50;
        let rl = Arc::new(registry(0.001, burst, Duration::from_secs(60)));

        let mut handles = vec![];
        for _ in 0..burst + 30 {
            let rl = Arc::clone(&rl);
            handles.push(tokio::spawn(async move { rl.admit("shared") }));
        }

        let results = futures::future::join_all(handles).await;
        let success_count = results
            .into_iter()
            .filter(|r| matches!(r, Ok(ControlFlow::Continue(()))))
            .count();

        assert_eq!(success_count, burst as usize);
    }
}
