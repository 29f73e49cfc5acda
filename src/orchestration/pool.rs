//! # Proxy Pool
//!
//! The health-ranked selection structure between the broker (writer) and
//! the rotating server (reader/writer).
//!
//! ## Overview
//!
//! The pool has two tiers. Proxies with fewer than `min_req_proxy` total
//! requests are *newcomers* and wait in a FIFO: they are eligible for
//! selection but not yet health-ranked. Once a proxy accumulates enough
//! requests it becomes *established* and lives in a min-heap ordered by
//! average response time, ties broken by insertion order. Crossing either
//! health ceiling (`max_error_rate`, `max_resp_time`) discards a proxy
//! permanently at `put` time.
//!
//! `get` prefers the established heap, recycles scheme-mismatched entries
//! with a small priority penalty (capped to avoid infinite recycling),
//! falls back to the newcomer FIFO, and finally blocks on a condition
//! variable for a bounded wait before failing with `NoProxyAvailable`.
//! All state lives under one mutex; `put` signals waiting getters.
//!
//! Both broker and server hold the pool through a shared [`PoolHandle`].

use crate::definitions::{
    defaults,
    enums::Scheme,
    errors::{PoolError, PoolResult},
    proxy::Proxy,
};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Shared, narrow capability over the pool: `put`, `get`, `remove`,
/// `len`. Handed to the broker and the server; neither owns the pool.
pub type PoolHandle = Arc<ProxyPool>;

/// Tiering and health thresholds for the pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Requests needed before a proxy is health-ranked
    pub min_req_proxy: u32,

    /// Error-rate ceiling; exceeding it discards the proxy
    pub max_error_rate: f64,

    /// Average response time ceiling in seconds for the established tier
    pub max_resp_time: f64,

    /// Bounded wait before `get` fails with `NoProxyAvailable`
    pub wait: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            min_req_proxy: defaults::pool::MIN_REQ_PROXY,
            max_error_rate: defaults::pool::MAX_ERROR_RATE,
            max_resp_time: defaults::pool::MAX_RESP_TIME_SECS,
            wait: Duration::from_secs(defaults::pool::WAIT_SECS),
        }
    }
}

/// Established-tier heap entry. Ordered by priority key (average response
/// time at insertion, plus any recycle penalties), then insertion
/// sequence so equal keys pop in insertion order.
#[derive(Debug)]
struct Entry {
    key: f64,
    seq: u64,
    proxy: Proxy,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key.total_cmp(&other.key).is_eq() && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key
            .total_cmp(&other.key)
            .then(self.seq.cmp(&other.seq))
    }
}

struct PoolInner {
    newcomers: VecDeque<Proxy>,
    established: BinaryHeap<Reverse<Entry>>,
    seq: u64,
    closed: bool,
}

/// The two-tier, health-ranked proxy pool.
pub struct ProxyPool {
    inner: Mutex<PoolInner>,
    notify: Notify,
    config: PoolConfig,
}

impl ProxyPool {
    /// Creates an empty pool with the given thresholds.
    #[must_use]
    pub fn new(config: PoolConfig) -> PoolHandle {
        Arc::new(ProxyPool {
            inner: Mutex::new(PoolInner {
                newcomers: VecDeque::new(),
                established: BinaryHeap::new(),
                seq: 0,
                closed: false,
            }),
            notify: Notify::new(),
            config,
        })
    }

    /// Creates an empty pool with default thresholds.
    #[must_use]
    pub fn with_defaults() -> PoolHandle {
        Self::new(PoolConfig::default())
    }

    /// Inserts or re-queues a proxy, recomputing its tier from current
    /// health. Unhealthy proxies are discarded permanently; the return
    /// value says whether the proxy was kept.
    pub fn put(&self, proxy: Proxy) -> bool {
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        if inner.closed {
            return false;
        }

        if proxy.error_rate() > self.config.max_error_rate {
            log::debug!(
                "discarding {}: error rate {:.2}",
                proxy.addr(),
                proxy.error_rate()
            );
            return false;
        }

        if proxy.n_req() < self.config.min_req_proxy {
            inner.newcomers.push_back(proxy);
        } else {
            let avg = proxy.avg_resp_time();
            if avg > self.config.max_resp_time {
                log::debug!("discarding {}: avg {avg:.2}s", proxy.addr());
                return false;
            }
            let seq = inner.seq;
            inner.seq += 1;
            inner.established.push(Reverse(Entry {
                key: avg,
                seq,
                proxy,
            }));
        }

        drop(inner);
        self.notify.notify_waiters();
        true
    }

    /// Pulls the best proxy supporting any of `schemes`, in family
    /// priority order, blocking up to the configured wait.
    ///
    /// The established tier is drained first: the smallest entry wins if
    /// it supports a requested scheme, otherwise it is re-pushed with a
    /// small penalty. Re-pushes are capped at three times the tier length
    /// per call; the newcomer FIFO is tried next under the same cap.
    ///
    /// # Errors
    ///
    /// * `PoolError::NoProxyAvailable` after the bounded wait
    /// * `PoolError::Closed` if the pool is shut down
    pub async fn get(&self, schemes: &[Scheme]) -> PoolResult<Proxy> {
        let deadline = Instant::now() + self.config.wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register as a waiter before checking state; `notify_waiters`
            // stores no permit, so a put landing between the check and
            // the await would otherwise go unseen until the deadline.
            notified.as_mut().enable();

            if let Some(proxy) = self.try_get(schemes)? {
                return Ok(proxy);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.exhausted(schemes));
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                // One last look; a put may have raced the deadline.
                return match self.try_get(schemes)? {
                    Some(proxy) => Ok(proxy),
                    None => Err(self.exhausted(schemes)),
                };
            }
        }
    }

    fn exhausted(&self, schemes: &[Scheme]) -> PoolError {
        let names: Vec<String> = schemes.iter().map(ToString::to_string).collect();
        PoolError::NoProxyAvailable {
            scheme: names.join(","),
            waited: self.config.wait,
        }
    }

    fn try_get(&self, schemes: &[Scheme]) -> PoolResult<Option<Proxy>> {
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        if inner.closed {
            return Err(PoolError::Closed);
        }

        let cap = inner.established.len() * defaults::pool::RECYCLE_CAP_FACTOR;
        let mut recycled = 0;
        while let Some(Reverse(entry)) = inner.established.pop() {
            if schemes.iter().any(|s| entry.proxy.supports(*s)) {
                return Ok(Some(entry.proxy));
            }
            if recycled >= cap {
                let seq = inner.seq;
                inner.seq += 1;
                inner.established.push(Reverse(Entry { seq, ..entry }));
                break;
            }
            recycled += 1;
            let seq = inner.seq;
            inner.seq += 1;
            inner.established.push(Reverse(Entry {
                key: entry.key + defaults::pool::REPUSH_PENALTY_SECS,
                seq,
                proxy: entry.proxy,
            }));
        }

        let cap = inner.newcomers.len() * defaults::pool::RECYCLE_CAP_FACTOR;
        let mut rotated = 0;
        while let Some(proxy) = inner.newcomers.pop_front() {
            if schemes.iter().any(|s| proxy.supports(*s)) {
                return Ok(Some(proxy));
            }
            inner.newcomers.push_back(proxy);
            rotated += 1;
            if rotated >= cap {
                break;
            }
        }

        Ok(None)
    }

    /// Removes a proxy from either tier by identity. Silently succeeds
    /// when the proxy is not present. The heap is rebuilt afterwards;
    /// O(n log n) is acceptable here, correctness over micro-optimization.
    pub fn remove(&self, host: IpAddr, port: u16) {
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        inner
            .newcomers
            .retain(|p| !(p.host == host && p.port == port));

        let entries: Vec<Reverse<Entry>> = inner.established.drain().collect();
        inner.established = entries
            .into_iter()
            .filter(|Reverse(e)| !(e.proxy.host == host && e.proxy.port == port))
            .collect();
    }

    /// Total proxies across both tiers.
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("pool lock poisoned");
        inner.newcomers.len() + inner.established.len()
    }

    /// True when both tiers are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the pool: pending and future `get` calls fail with
    /// `PoolError::Closed`, `put` drops its argument. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        inner.closed = true;
        inner.newcomers.clear();
        inner.established.clear();
        drop(inner);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::enums::AnonymityLevel;
    use std::net::Ipv4Addr;

    fn proxy(last_octet: u8, scheme: Scheme) -> Proxy {
        let mut p = Proxy::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)), 8080);
        p.types.insert(scheme, Some(AnonymityLevel::High));
        p
    }

    /// Drives a proxy into the established tier with the given average.
    fn established(last_octet: u8, scheme: Scheme, avg_secs: f64) -> Proxy {
        let mut p = proxy(last_octet, scheme);
        for _ in 0..defaults::pool::MIN_REQ_PROXY {
            p.record_success(scheme, Duration::from_secs_f64(avg_secs));
        }
        p
    }

    fn quick_config() -> PoolConfig {
        PoolConfig {
            wait: Duration::from_millis(50),
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn established_pop_in_avg_order() {
        let pool = ProxyPool::new(quick_config());
        for (octet, avg) in [(3, 0.9), (1, 0.1), (2, 0.5)] {
            assert!(pool.put(established(octet, Scheme::Http, avg)));
        }

        let mut last = 0.0;
        for _ in 0..3 {
            let p = pool.get(&[Scheme::Http]).await.unwrap();
            assert!(p.avg_resp_time() >= last);
            last = p.avg_resp_time();
        }
    }

    #[tokio::test]
    async fn equal_keys_pop_in_insertion_order() {
        let pool = ProxyPool::new(quick_config());
        pool.put(established(1, Scheme::Http, 0.5));
        pool.put(established(2, Scheme::Http, 0.5));

        let first = pool.get(&[Scheme::Http]).await.unwrap();
        assert_eq!(first.host, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[tokio::test]
    async fn newcomers_promote_after_enough_requests() {
        let pool = ProxyPool::new(quick_config());

        // Four requests: still a newcomer.
        let mut p = proxy(1, Scheme::Http);
        for _ in 0..4 {
            p.record_success(Scheme::Http, Duration::from_millis(500));
        }
        assert!(pool.put(p));

        let mut p = pool.get(&[Scheme::Http]).await.unwrap();
        p.record_success(Scheme::Http, Duration::from_millis(500));
        assert!(pool.put(p));

        // A fresh newcomer with unknown timing queues behind it.
        assert!(pool.put(proxy(2, Scheme::Http)));

        let first = pool.get(&[Scheme::Http]).await.unwrap();
        assert_eq!(first.host, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(first.n_req(), 5);
    }

    #[tokio::test]
    async fn exhausted_pool_fails_within_the_wait() {
        let pool = ProxyPool::new(quick_config());
        let started = std::time::Instant::now();
        let err = pool.get(&[Scheme::Http]).await.unwrap_err();
        assert!(matches!(err, PoolError::NoProxyAvailable { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn scheme_mismatch_falls_through_to_newcomers() {
        let pool = ProxyPool::new(quick_config());
        pool.put(established(1, Scheme::Socks5, 0.2));
        pool.put(proxy(2, Scheme::Http));

        let p = pool.get(&[Scheme::Http]).await.unwrap();
        assert_eq!(p.host, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
        // The mismatched established proxy is still pooled.
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn mismatch_everywhere_exhausts_without_hanging() {
        let pool = ProxyPool::new(quick_config());
        pool.put(established(1, Scheme::Socks4, 0.2));
        pool.put(proxy(2, Scheme::Socks4));

        let err = pool.get(&[Scheme::Http]).await.unwrap_err();
        assert!(matches!(err, PoolError::NoProxyAvailable { .. }));
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn heap_order_survives_removal() {
        let pool = ProxyPool::new(quick_config());
        for (octet, avg) in [(1, 0.1), (2, 0.2), (3, 0.3), (4, 0.4)] {
            pool.put(established(octet, Scheme::Http, avg));
        }
        pool.remove(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 8080);
        assert_eq!(pool.len(), 3);

        let mut last = 0.0;
        for _ in 0..3 {
            let p = pool.get(&[Scheme::Http]).await.unwrap();
            assert_ne!(p.host, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
            assert!(p.avg_resp_time() >= last);
            last = p.avg_resp_time();
        }
    }

    #[tokio::test]
    async fn removing_a_missing_proxy_is_silent() {
        let pool = ProxyPool::new(quick_config());
        pool.put(proxy(1, Scheme::Http));
        pool.remove(IpAddr::V4(Ipv4Addr::new(10, 9, 9, 9)), 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn unhealthy_proxies_are_discarded_on_put() {
        let pool = ProxyPool::new(quick_config());

        let mut flaky = proxy(1, Scheme::Http);
        for _ in 0..3 {
            flaky.record_success(Scheme::Http, Duration::from_millis(100));
        }
        for _ in 0..4 {
            flaky.record_failure(Scheme::Http, "connect refused", Duration::ZERO);
        }
        assert!(!pool.put(flaky));

        let slow = established(2, Scheme::Http, 30.0);
        assert!(!pool.put(slow));
        assert_eq!(pool.len(), 0);
    }

    #[tokio::test]
    async fn waiting_getter_wakes_promptly_on_put() {
        let pool = ProxyPool::new(PoolConfig {
            wait: Duration::from_secs(5),
            ..PoolConfig::default()
        });

        let getter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let started = std::time::Instant::now();
                let got = pool.get(&[Scheme::Http]).await;
                (got, started.elapsed())
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.put(proxy(1, Scheme::Http));

        let (got, waited) = tokio::time::timeout(Duration::from_secs(1), getter)
            .await
            .unwrap()
            .unwrap();
        let got = got.unwrap();
        assert_eq!(got.host, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        // The put must wake the getter, not the 5s deadline fallback.
        assert!(waited < Duration::from_secs(2), "getter slept {waited:?}");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_fails_getters() {
        let pool = ProxyPool::new(quick_config());
        pool.put(proxy(1, Scheme::Http));
        pool.close();
        pool.close();
        assert!(matches!(
            pool.get(&[Scheme::Http]).await,
            Err(PoolError::Closed)
        ));
        assert!(!pool.put(proxy(2, Scheme::Http)));
    }
}
