//! Per-proxy view of recent activity for one (domain, proxy) pair.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::CoordinationStore;
use crate::utils;

/// Free-slot value reported while a proxy is cooling down after a 429.
///
/// Strictly below any attainable real count (counts can dip below zero under
/// transient over-allocation), so a cooling proxy is never chosen.
pub(crate) const COOLDOWN_SENTINEL: i64 = i64::MIN;

/// One entry in the per-(domain, proxy) status-code log.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StatusRecord {
    pub status: u16,
    pub created_at: DateTime<Utc>,
}

/// A configured egress proxy.
///
/// Carries no mutable state: request counts and status history live in the
/// coordination store, keyed per target domain, so usage is visible to every
/// process sharing the pool.
#[derive(Debug, Clone)]
pub struct Proxy {
    /// Scheme-qualified proxy URL (e.g. "http://1.2.3.4:8080").
    url: String,
    /// URL rendered safe for embedding in store keys.
    key_name: String,
    /// Length of the sliding quota window.
    window_size: Duration,
    /// Requests allowed per window per target domain.
    max_requests_per_window: u32,
    /// Status-code log entries retained per (domain, proxy).
    status_log_cap: usize,
}

impl Proxy {
    pub(crate) fn new(
        url: &str,
        window_size: Duration,
        max_requests_per_window: u32,
        status_log_cap: usize,
    ) -> Self {
        let url = utils::normalize_proxy_url(url);
        let key_name = utils::key_safe_proxy(&url);
        Self {
            url,
            key_name,
            window_size,
            max_requests_per_window,
            status_log_cap,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.window_size).unwrap_or(chrono::Duration::MAX)
    }

    /// Remaining quota for `domain` in the current window, or
    /// [`COOLDOWN_SENTINEL`] when the most recent status is a 429 inside the
    /// window. Read-only.
    pub(crate) async fn free_slots(
        &self,
        domain: &str,
        store: &dyn CoordinationStore,
    ) -> Result<i64, StoreError> {
        let request_pattern = utils::request_key_pattern(domain, &self.key_name);
        let status_key = utils::status_codes_key(domain, &self.key_name);

        let (recent_requests, newest_status) = futures::try_join!(
            store.scan_keys(&request_pattern),
            store.list_peek(&status_key, 0),
        )?;

        let mut free = self.max_requests_per_window as i64 - recent_requests.len() as i64;

        if let Some(raw) = newest_status {
            let record: StatusRecord =
                serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                    key: status_key,
                    reason: e.to_string(),
                })?;
            let window_start = Utc::now() - self.window();
            if record.status == 429 && record.created_at > window_start {
                free = COOLDOWN_SENTINEL;
            }
        }

        Ok(free)
    }

    /// Write one request-timestamp record (TTL = window size) and hand back
    /// the proxy URL for the outbound call. Bookkeeping only; the quota is
    /// enforced advisorily through [`Self::free_slots`].
    pub(crate) async fn record_request(
        &self,
        domain: &str,
        store: &dyn CoordinationStore,
    ) -> Result<String, StoreError> {
        let now = Utc::now();
        let key = utils::request_key(domain, &self.key_name, now);
        store
            .set_with_expiry(&key, &now.to_rfc3339(), self.window_size)
            .await?;
        Ok(self.url.clone())
    }

    /// Push `(status, now)` onto the front of the status log, then trim the
    /// log to its cap. Only index 0 is ever consulted; the rest is history.
    pub(crate) async fn record_status(
        &self,
        domain: &str,
        status: u16,
        store: &dyn CoordinationStore,
    ) -> Result<(), StoreError> {
        let key = utils::status_codes_key(domain, &self.key_name);
        let record = StatusRecord {
            status,
            created_at: Utc::now(),
        };
        let encoded = serde_json::to_string(&record).map_err(|e| StoreError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        store.list_push(&key, &encoded).await?;
        store.list_trim(&key, self.status_log_cap).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    const WINDOW: Duration = Duration::from_secs(300);

    fn proxy(max: u32) -> Proxy {
        Proxy::new("1.2.3.4:8080", WINDOW, max, 10)
    }

    async fn push_status(store: &InMemoryStore, status: u16, age: chrono::Duration) {
        let key = utils::status_codes_key("example", "1.2.3.4_8080");
        let record = StatusRecord {
            status,
            created_at: Utc::now() - age,
        };
        store
            .list_push(&key, &serde_json::to_string(&record).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn window_accounting_decrements_per_request() {
        let store = InMemoryStore::new();
        let proxy = proxy(5);

        assert_eq!(proxy.free_slots("example", &store).await.unwrap(), 5);

        for sent in 1..=3i64 {
            let url = proxy.record_request("example", &store).await.unwrap();
            assert_eq!(url, "http://1.2.3.4:8080");
            assert_eq!(proxy.free_slots("example", &store).await.unwrap(), 5 - sent);
        }
    }

    #[tokio::test]
    async fn budgets_are_partitioned_by_domain() {
        let store = InMemoryStore::new();
        let proxy = proxy(5);

        proxy.record_request("example", &store).await.unwrap();
        proxy.record_request("example", &store).await.unwrap();

        assert_eq!(proxy.free_slots("example", &store).await.unwrap(), 3);
        assert_eq!(proxy.free_slots("other", &store).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn recent_429_forces_cooldown_sentinel() {
        let store = InMemoryStore::new();
        let proxy = proxy(5);

        push_status(&store, 429, chrono::Duration::seconds(10)).await;
        assert_eq!(
            proxy.free_slots("example", &store).await.unwrap(),
            COOLDOWN_SENTINEL
        );
    }

    #[tokio::test]
    async fn stale_429_outside_window_counts_normally() {
        let store = InMemoryStore::new();
        let proxy = proxy(5);

        push_status(&store, 429, chrono::Duration::seconds(301)).await;
        assert_eq!(proxy.free_slots("example", &store).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn recent_non_429_does_not_cool_down() {
        let store = InMemoryStore::new();
        let proxy = proxy(5);

        push_status(&store, 503, chrono::Duration::seconds(1)).await;
        assert_eq!(proxy.free_slots("example", &store).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn only_the_newest_status_is_consulted() {
        let store = InMemoryStore::new();
        let proxy = proxy(5);

        push_status(&store, 429, chrono::Duration::seconds(10)).await;
        push_status(&store, 200, chrono::Duration::seconds(1)).await;

        // The 200 pushed last sits at index 0, so the older 429 is ignored.
        assert_eq!(proxy.free_slots("example", &store).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn status_log_is_trimmed_to_cap() {
        let store = InMemoryStore::new();
        let proxy = Proxy::new("1.2.3.4:8080", WINDOW, 5, 3);

        for status in [200, 201, 202, 203, 204] {
            proxy.record_status("example", status, &store).await.unwrap();
        }

        let key = utils::status_codes_key("example", "1.2.3.4_8080");
        assert!(store.list_peek(&key, 2).await.unwrap().is_some());
        assert!(store.list_peek(&key, 3).await.unwrap().is_none());

        let newest: StatusRecord =
            serde_json::from_str(&store.list_peek(&key, 0).await.unwrap().unwrap()).unwrap();
        assert_eq!(newest.status, 204);
    }

    #[tokio::test]
    async fn corrupt_status_record_is_reported() {
        let store = InMemoryStore::new();
        let proxy = proxy(5);

        let key = utils::status_codes_key("example", "1.2.3.4_8080");
        store.list_push(&key, "not json").await.unwrap();

        assert!(matches!(
            proxy.free_slots("example", &store).await,
            Err(StoreError::Corrupt { .. })
        ));
    }
}
