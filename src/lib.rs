//! # scrape-proxy
//!
//! Rate-limited proxy rotation and a retrying scraper client for reqwest.
//!
//! Many concurrent fetches share a small pool of egress proxies without
//! exceeding a per-domain, per-proxy request quota. Quota and throttle state
//! lives in a shared TTL-capable coordination store, so any number of
//! processes can share one pool; a proxy that a site has just rate-limited
//! (HTTP 429) is cooled down for that domain until the window passes. The
//! [`ScraperClient`] wraps each fetch with user-agent rotation, proxy
//! acquisition, response validation, and capped exponential-backoff retries.

pub mod client;
pub mod config;
pub mod error;
pub mod pool;
pub mod proxy;
pub mod store;
pub mod user_agents;
mod utils;

pub use client::{RawResponse, ReqwestTransport, ScraperClient, ScraperClientBuilder, Transport};
pub use config::{ProxyPoolConfig, ProxyPoolConfigBuilder, RequestOptions};
pub use error::{Error, StoreError};
pub use pool::ProxyPool;
pub use proxy::Proxy;
pub use store::{CoordinationStore, InMemoryStore};
pub use user_agents::USER_AGENTS;
