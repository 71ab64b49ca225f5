//! Configuration for the proxy pool and per-request retry behavior.

use std::time::Duration;

/// Configuration for [`crate::ProxyPool`].
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Length of the sliding quota window.
    pub window_size: Duration,
    /// Requests allowed per proxy, per target domain, per window.
    pub max_requests_per_window: u32,
    /// Sleep between selection polls when no proxy has capacity.
    pub poll_interval: Duration,
    /// Upper bound on how long one selection may poll for a free slot.
    /// `None` polls indefinitely, matching the classic behavior.
    pub acquire_timeout: Option<Duration>,
    /// Entries retained in each (domain, proxy) status-code log.
    pub status_log_cap: usize,
}

impl ProxyPoolConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProxyPoolConfigBuilder {
        ProxyPoolConfigBuilder::new()
    }
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for `ProxyPoolConfig`.
pub struct ProxyPoolConfigBuilder {
    window_size: Option<Duration>,
    max_requests_per_window: Option<u32>,
    poll_interval: Option<Duration>,
    acquire_timeout: Option<Duration>,
    status_log_cap: Option<usize>,
}

impl ProxyPoolConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            window_size: None,
            max_requests_per_window: None,
            poll_interval: None,
            acquire_timeout: None,
            status_log_cap: None,
        }
    }

    /// Set the length of the sliding quota window.
    pub fn window_size(mut self, window: Duration) -> Self {
        self.window_size = Some(window);
        self
    }

    /// Set the requests allowed per proxy, per domain, per window.
    pub fn max_requests_per_window(mut self, max: u32) -> Self {
        self.max_requests_per_window = Some(max);
        self
    }

    /// Set the sleep between selection polls when no proxy has capacity.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Bound how long one selection may poll for a free slot.
    pub fn acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set how many status-code log entries to retain per (domain, proxy).
    pub fn status_log_cap(mut self, cap: usize) -> Self {
        self.status_log_cap = Some(cap);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            window_size: self.window_size.unwrap_or(Duration::from_secs(5 * 60)),
            max_requests_per_window: self.max_requests_per_window.unwrap_or(100),
            poll_interval: self.poll_interval.unwrap_or(Duration::from_secs(5)),
            acquire_timeout: self.acquire_timeout,
            status_log_cap: self.status_log_cap.unwrap_or(10),
        }
    }
}

impl Default for ProxyPoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-request retry and validation options for [`crate::ScraperClient`].
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Total attempts, including the first.
    pub retries: usize,
    /// Sleep before the first retry.
    pub start_backoff_delay: Duration,
    /// Cap on the exponential backoff delay.
    pub max_backoff_delay: Duration,
    /// Expected content-type substring (case-insensitive). `None` skips the
    /// check; `get_json`/`get_text` supply their own defaults.
    pub expected_mime_type: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            retries: 5,
            start_backoff_delay: Duration::from_secs(15),
            max_backoff_delay: Duration::from_secs(300),
            expected_mime_type: None,
        }
    }
}
