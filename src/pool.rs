//! Core proxy pool: rate-limited selection, outcome recording, and sweeping.

use std::sync::Arc;

use chrono::Utc;
use futures::future;
use log::{debug, warn};
use rand::seq::SliceRandom;
use tokio::time::{self, Instant};

use crate::config::ProxyPoolConfig;
use crate::error::{Error, StoreError};
use crate::proxy::Proxy;
use crate::store::CoordinationStore;
use crate::utils;

/// A pool of egress proxies sharing a per-domain, per-proxy request quota
/// through a coordination store.
pub struct ProxyPool {
    /// All configured proxies. Immutable after construction.
    proxies: Vec<Proxy>,
    /// Shared quota/throttle state backend.
    store: Arc<dyn CoordinationStore>,
    /// Configuration for the pool.
    pub config: ProxyPoolConfig,
}

impl ProxyPool {
    /// Create a pool over the given proxy endpoints and store backend.
    /// Bare `host:port` endpoints are normalized to `http://host:port`.
    pub fn new(
        proxies: Vec<impl AsRef<str>>,
        store: Arc<dyn CoordinationStore>,
        config: ProxyPoolConfig,
    ) -> Self {
        let proxies = proxies
            .iter()
            .map(|url| {
                Proxy::new(
                    url.as_ref(),
                    config.window_size,
                    config.max_requests_per_window,
                    config.status_log_cap,
                )
            })
            .collect();
        Self {
            proxies,
            store,
            config,
        }
    }

    /// Pick the proxy with the most free slots for `url`'s domain, record one
    /// request against it, and return its address.
    ///
    /// Ties are broken uniformly at random (shuffle before sort). When no
    /// proxy has capacity, the call sleeps `poll_interval` and retries; with
    /// `acquire_timeout` set the wait is bounded and ends in
    /// [`Error::AcquireTimeout`], otherwise it polls indefinitely.
    pub async fn select_proxy(&self, url: &str) -> Result<String, Error> {
        let domain = utils::registrable_domain(url)?;
        let started = Instant::now();

        loop {
            // Pool-wide sweep first, so the counts read below are accurate
            // for every proxy, not just the one eventually chosen.
            self.sweep().await?;

            let counts = future::join_all(
                self.proxies
                    .iter()
                    .map(|proxy| proxy.free_slots(&domain, self.store.as_ref())),
            )
            .await;

            let mut candidates = Vec::with_capacity(self.proxies.len());
            for (proxy, count) in self.proxies.iter().zip(counts) {
                candidates.push((count?, proxy));
            }

            {
                let mut rng = rand::rng();
                candidates.shuffle(&mut rng);
            }
            candidates.sort_by(|a, b| b.0.cmp(&a.0));

            if let Some((free, best)) = candidates.first() {
                if *free > 0 {
                    debug!(
                        "selected proxy {} for domain {} ({} free slots)",
                        best.url(),
                        domain,
                        free
                    );
                    return Ok(best.record_request(&domain, self.store.as_ref()).await?);
                }
            }

            if let Some(timeout) = self.config.acquire_timeout {
                let waited = started.elapsed();
                if waited >= timeout {
                    warn!(
                        "no proxy slot freed for domain {} within {:?}",
                        domain, timeout
                    );
                    return Err(Error::AcquireTimeout {
                        waited_ms: waited.as_millis(),
                    });
                }
            }

            debug!(
                "no proxy has capacity for domain {}, polling again in {:?}",
                domain, self.config.poll_interval
            );
            time::sleep(self.config.poll_interval).await;
        }
    }

    /// Record the status code observed for a request sent through
    /// `proxy_url`, so later selections see throttles against `url`'s domain.
    pub async fn record_outcome(
        &self,
        url: &str,
        proxy_url: &str,
        status: u16,
    ) -> Result<(), Error> {
        let domain = utils::registrable_domain(url)?;

        if let Some(proxy) = self.proxies.iter().find(|p| p.url() == proxy_url) {
            proxy
                .record_status(&domain, status, self.store.as_ref())
                .await?;
        } else {
            warn!("outcome reported for unknown proxy {proxy_url}");
        }
        Ok(())
    }

    /// Drop every request record, across all domains and proxies, whose
    /// embedded timestamp has fallen out of the window.
    ///
    /// Records normally self-expire via their TTL; the sweep clears out
    /// whatever the backend has not reaped yet so free-slot counts never
    /// under-report. Best-effort: there is no atomic scan+delete.
    pub async fn sweep(&self) -> Result<(), StoreError> {
        let keys = self.store.scan_keys(utils::ALL_REQUEST_KEYS_PATTERN).await?;
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.window_size)
                .unwrap_or(chrono::Duration::MAX);

        let expired: Vec<String> = keys
            .into_iter()
            .filter(|key| match utils::timestamp_from_request_key(key) {
                Some(ts) => ts < cutoff,
                None => {
                    warn!("skipping request key with unparseable timestamp: {key}");
                    false
                }
            })
            .collect();

        if !expired.is_empty() {
            debug!("sweeping {} expired request records", expired.len());
            self.store.delete(&expired).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::collections::HashMap;
    use std::time::Duration;

    fn pool_with(
        proxies: Vec<&str>,
        max_requests_per_window: u32,
        acquire_timeout: Option<Duration>,
    ) -> ProxyPool {
        let config = ProxyPoolConfig::builder()
            .window_size(Duration::from_secs(300))
            .max_requests_per_window(max_requests_per_window)
            .poll_interval(Duration::from_millis(10))
            .acquire_timeout(acquire_timeout)
            .build();
        ProxyPool::new(proxies, Arc::new(InMemoryStore::new()), config)
    }

    #[tokio::test]
    async fn two_proxies_with_max_one_alternate_then_block() {
        let pool = pool_with(
            vec!["1.1.1.1:80", "2.2.2.2:80"],
            1,
            Some(Duration::from_millis(50)),
        );

        let first = pool.select_proxy("http://a.com/x").await.unwrap();
        let second = pool.select_proxy("http://a.com/y").await.unwrap();
        assert_ne!(first, second);

        // Both proxies are now at quota for a.com; the third call polls
        // until the acquire timeout trips.
        let third = pool.select_proxy("http://a.com/z").await;
        assert!(matches!(third, Err(Error::AcquireTimeout { .. })));

        // A different domain still has a full budget.
        assert!(pool.select_proxy("http://b.org/x").await.is_ok());
    }

    #[tokio::test]
    async fn selection_has_no_positional_bias() {
        let mut picks: HashMap<String, usize> = HashMap::new();

        // Fresh pool per trial so both proxies always tie on free slots.
        for _ in 0..200 {
            let pool = pool_with(vec!["1.1.1.1:80", "2.2.2.2:80"], 10, None);
            let chosen = pool.select_proxy("http://a.com").await.unwrap();
            *picks.entry(chosen).or_default() += 1;
        }

        assert_eq!(picks.len(), 2);
        for (proxy, count) in &picks {
            assert!(
                (40..=160).contains(count),
                "proxy {proxy} selected {count} of 200 trials"
            );
        }
    }

    #[tokio::test]
    async fn recorded_429_excludes_proxy_from_selection() {
        let pool = pool_with(
            vec!["1.1.1.1:80", "2.2.2.2:80"],
            10,
            Some(Duration::from_millis(50)),
        );

        pool.record_outcome("http://a.com", "http://1.1.1.1:80", 429)
            .await
            .unwrap();

        // The cooling proxy is never chosen while its 429 is in-window.
        for _ in 0..10 {
            let chosen = pool.select_proxy("http://a.com").await.unwrap();
            assert_eq!(chosen, "http://2.2.2.2:80");
        }
    }

    #[tokio::test]
    async fn all_proxies_cooling_down_blocks_selection() {
        let pool = pool_with(vec!["1.1.1.1:80"], 10, Some(Duration::from_millis(50)));

        pool.record_outcome("http://a.com", "http://1.1.1.1:80", 429)
            .await
            .unwrap();

        assert!(matches!(
            pool.select_proxy("http://a.com").await,
            Err(Error::AcquireTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_records() {
        let store = Arc::new(InMemoryStore::new());
        let config = ProxyPoolConfig::builder()
            .window_size(Duration::from_secs(300))
            .build();
        let pool = ProxyPool::new(
            vec!["1.1.1.1:80"],
            Arc::clone(&store) as Arc<dyn CoordinationStore>,
            config,
        );

        let old_key = utils::request_key(
            "example",
            "1.1.1.1_80",
            Utc::now() - chrono::Duration::seconds(600),
        );
        let fresh_key = utils::request_key("example", "1.1.1.1_80", Utc::now());
        // Long store TTLs so only the sweep's own cutoff decides.
        store
            .set_with_expiry(&old_key, "", Duration::from_secs(3600))
            .await
            .unwrap();
        store
            .set_with_expiry(&fresh_key, "", Duration::from_secs(3600))
            .await
            .unwrap();

        pool.sweep().await.unwrap();

        let remaining = store
            .scan_keys(utils::ALL_REQUEST_KEYS_PATTERN)
            .await
            .unwrap();
        assert_eq!(remaining, vec![fresh_key]);
    }

    #[tokio::test]
    async fn sweep_leaves_unparseable_keys_alone() {
        let store = Arc::new(InMemoryStore::new());
        let config = ProxyPoolConfig::builder().build();
        let pool = ProxyPool::new(
            vec!["1.1.1.1:80"],
            Arc::clone(&store) as Arc<dyn CoordinationStore>,
            config,
        );

        let odd_key = "scrape_proxy:example:1.1.1.1_80:requests:garbage";
        store
            .set_with_expiry(odd_key, "", Duration::from_secs(3600))
            .await
            .unwrap();

        pool.sweep().await.unwrap();

        let remaining = store
            .scan_keys(utils::ALL_REQUEST_KEYS_PATTERN)
            .await
            .unwrap();
        assert_eq!(remaining, vec![odd_key.to_string()]);
    }

    #[tokio::test]
    async fn outcome_for_unknown_proxy_is_ignored() {
        let pool = pool_with(vec!["1.1.1.1:80"], 10, None);
        pool.record_outcome("http://a.com", "http://9.9.9.9:80", 200)
            .await
            .unwrap();
    }
}
