//! Simple example of using scrape-proxy.

use scrape_proxy::{
    InMemoryStore, ProxyPool, ProxyPoolConfig, RequestOptions, ScraperClient,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ProxyPoolConfig::builder()
        .window_size(Duration::from_secs(5 * 60))
        // stay well under the target site's tolerance per proxy
        .max_requests_per_window(50)
        // bound how long a fetch may wait for a free proxy slot
        .acquire_timeout(Some(Duration::from_secs(60)))
        .build();

    // Single-process store; implement CoordinationStore over Redis (or any
    // TTL-capable KV server) to share the pool across workers.
    let pool = Arc::new(ProxyPool::new(
        vec!["1.2.3.4:8080", "5.6.7.8:8080"],
        Arc::new(InMemoryStore::new()),
        config,
    ));

    let client = ScraperClient::builder().proxies(pool).build();

    println!("Fetching...");
    let body = client
        .get_json("https://httpbin.org/ip", &RequestOptions::default())
        .await?;
    println!("Response: {body}");

    Ok(())
}
