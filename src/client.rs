//! Retrying scraper client: user-agent rotation, proxy acquisition, response
//! validation, and exponential-backoff retries over a pluggable transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use rand::seq::IndexedRandom;
use rand::Rng;
use tokio::time;

use crate::config::RequestOptions;
use crate::error::Error;
use crate::pool::ProxyPool;
use crate::user_agents::USER_AGENTS;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A fully read HTTP response, reduced to what validation needs.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// One outbound GET through an optional proxy.
///
/// The retry, validation, and bookkeeping logic lives in [`ScraperClient`];
/// implementing this trait over a fake transport exercises all of it without
/// a network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        proxy: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<RawResponse, Error>;
}

/// Production [`Transport`] backed by reqwest.
///
/// reqwest binds a proxy at client construction, so a fresh client is built
/// per proxied request; proxyless requests share one client.
pub struct ReqwestTransport {
    timeout: Duration,
    direct: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            direct: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

fn transport_err(e: reqwest::Error) -> Error {
    Error::Transport(e.to_string())
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        proxy: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<RawResponse, Error> {
        let client = match proxy {
            Some(proxy_url) => reqwest::Client::builder()
                .proxy(reqwest::Proxy::all(proxy_url).map_err(transport_err)?)
                .timeout(self.timeout)
                .build()
                .map_err(transport_err)?,
            None => self.direct.clone(),
        };

        let mut request = client.get(url).timeout(self.timeout);
        if let Some(ua) = user_agent {
            request = request.header(reqwest::header::USER_AGENT, ua);
        }

        let response = request.send().await.map_err(transport_err)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(transport_err)?;

        Ok(RawResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Decoded body of a validated response.
enum Body {
    Json(serde_json::Value),
    Text(String),
}

/// HTTP client for scraping: optional proxy pool, randomized user agents,
/// and bounded retries with exponential backoff around every fetch.
pub struct ScraperClient {
    transport: Arc<dyn Transport>,
    proxies: Option<Arc<ProxyPool>>,
    user_agents: Vec<String>,
    use_random_user_agent: bool,
}

impl ScraperClient {
    /// Create a client with the built-in user-agent list, no proxy pool, and
    /// the default reqwest transport.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ScraperClientBuilder {
        ScraperClientBuilder::new()
    }

    /// GET `url` and return its body parsed as JSON.
    /// Expected MIME defaults to `application/json`.
    pub async fn get_json(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<serde_json::Value, Error> {
        let expected_mime = options
            .expected_mime_type
            .clone()
            .unwrap_or_else(|| "application/json".to_string());
        match self.request(url, options, true, Some(&expected_mime)).await? {
            Body::Json(value) => Ok(value),
            Body::Text(_) => Err(Error::Unsuccessful("expected a JSON body".to_string())),
        }
    }

    /// GET `url` and return its body as non-empty text.
    /// Expected MIME defaults to `text/html`.
    pub async fn get_text(&self, url: &str, options: &RequestOptions) -> Result<String, Error> {
        let expected_mime = options
            .expected_mime_type
            .clone()
            .unwrap_or_else(|| "text/html".to_string());
        match self.request(url, options, false, Some(&expected_mime)).await? {
            Body::Text(text) => Ok(text),
            Body::Json(_) => Err(Error::Unsuccessful("expected a text body".to_string())),
        }
    }

    /// The retry loop: attempts until one validates or the budget runs out.
    async fn request(
        &self,
        url: &str,
        options: &RequestOptions,
        expect_json: bool,
        expected_mime: Option<&str>,
    ) -> Result<Body, Error> {
        let mut remaining = options.retries;
        let mut completed_sleeps = 0usize;
        let mut attempts: Vec<String> = Vec::new();

        while remaining > 0 {
            match self.attempt(url, expect_json, expected_mime).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    warn!("attempt {} for {url} failed: {e}", attempts.len() + 1);
                    attempts.push(e.to_string());
                    remaining -= 1;

                    if remaining > 0 {
                        let delay = jittered(backoff_delay(
                            completed_sleeps,
                            options.start_backoff_delay,
                            options.max_backoff_delay,
                        ));
                        debug!("backing off {delay:?} before retrying {url}");
                        time::sleep(delay).await;
                        completed_sleeps += 1;
                    }
                }
            }
        }

        Err(Error::AllRetriesFailed { attempts })
    }

    /// One attempt: pick a user agent, acquire a proxy, send, report the
    /// outcome, validate.
    async fn attempt(
        &self,
        url: &str,
        expect_json: bool,
        expected_mime: Option<&str>,
    ) -> Result<Body, Error> {
        let user_agent = if self.use_random_user_agent {
            let mut rng = rand::rng();
            self.user_agents.choose(&mut rng).cloned()
        } else {
            None
        };

        let proxy = match &self.proxies {
            Some(pool) => Some(pool.select_proxy(url).await?),
            None => None,
        };

        let response = self
            .transport
            .get(url, proxy.as_deref(), user_agent.as_deref())
            .await;

        // Whenever a response came back through a proxy, its status is
        // reported before validation so throttles are visible to selection
        // even when the attempt is classified a failure below.
        if let (Some(pool), Some(proxy_url), Ok(resp)) = (&self.proxies, &proxy, &response) {
            pool.record_outcome(url, proxy_url, resp.status).await?;
        }

        validate(response?, expect_json, expected_mime)
    }
}

impl Default for ScraperClient {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(
    response: RawResponse,
    expect_json: bool,
    expected_mime: Option<&str>,
) -> Result<Body, Error> {
    if !(200..300).contains(&response.status) {
        return Err(Error::Unsuccessful(format!(
            "status code is {}",
            response.status
        )));
    }

    if let Some(expected) = expected_mime {
        let content_type = response.content_type.as_deref().unwrap_or("");
        if !content_type
            .to_ascii_lowercase()
            .contains(&expected.to_ascii_lowercase())
        {
            return Err(Error::Unsuccessful(format!(
                "MIME type does not match (expected '{expected}', got '{content_type}')"
            )));
        }
    }

    if expect_json {
        let value = serde_json::from_str(&response.body)
            .map_err(|e| Error::Unsuccessful(format!("cannot parse JSON: {e}")))?;
        Ok(Body::Json(value))
    } else if response.body.is_empty() {
        Err(Error::Unsuccessful("empty response body".to_string()))
    } else {
        Ok(Body::Text(response.body))
    }
}

/// Unjittered delay before the next retry. The first retry waits the fixed
/// start delay; later retries grow exponentially up to the cap.
fn backoff_delay(completed_sleeps: usize, start: Duration, max: Duration) -> Duration {
    if completed_sleeps == 0 {
        start
    } else {
        let exponential = 2f64.powi(completed_sleeps.min(64) as i32);
        Duration::from_secs_f64(exponential.min(max.as_secs_f64()))
    }
}

/// Add ±20% uniform jitter (whole seconds) so callers retrying in lockstep
/// desynchronize. Sub-5s delays carry no jitter.
fn jittered(delay: Duration) -> Duration {
    let bound = (delay.as_secs_f64() * 0.2).floor() as i64;
    if bound <= 0 {
        return delay;
    }
    let mut rng = rand::rng();
    let offset = rng.random_range(-bound..=bound);
    Duration::from_secs_f64((delay.as_secs_f64() + offset as f64).max(0.0))
}

/// Builder for [`ScraperClient`].
pub struct ScraperClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    proxies: Option<Arc<ProxyPool>>,
    user_agents: Option<Vec<String>>,
    use_random_user_agent: bool,
}

impl ScraperClientBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            proxies: None,
            user_agents: None,
            use_random_user_agent: true,
        }
    }

    /// Route every request through the given proxy pool.
    pub fn proxies(mut self, pool: Arc<ProxyPool>) -> Self {
        self.proxies = Some(pool);
        self
    }

    /// Replace the built-in user-agent list. Supplying a list also turns
    /// randomization on.
    pub fn user_agents(mut self, agents: Vec<impl Into<String>>) -> Self {
        self.user_agents = Some(agents.into_iter().map(Into::into).collect());
        self.use_random_user_agent = true;
        self
    }

    /// Enable or disable random user-agent headers.
    pub fn use_random_user_agent(mut self, enabled: bool) -> Self {
        self.use_random_user_agent = enabled;
        self
    }

    /// Replace the transport. Mainly for tests against a fake.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> ScraperClient {
        ScraperClient {
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(ReqwestTransport::default())),
            proxies: self.proxies,
            user_agents: self
                .user_agents
                .unwrap_or_else(|| USER_AGENTS.iter().map(|ua| ua.to_string()).collect()),
            use_random_user_agent: self.use_random_user_agent,
        }
    }
}

impl Default for ScraperClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
