//! Polite fetching: per-origin spacing, robots.txt, retry with backoff.

use governor::{Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{FetchError, TransportError};
use crate::fetch::robots::RobotsRules;
use crate::fetch::schedule::OriginSchedule;
use crate::traits::transport::{Transport, TransportResponse};
use crate::types::{config::FetchPolicy, document::FetchResult};

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

type RobotsCell = Arc<OnceCell<Arc<RobotsRules>>>;

/// Fetches locators on behalf of every pipeline worker.
///
/// One fetcher should be shared per run: the spacing schedule, robots cache,
/// and negative cache all live here.
pub struct PoliteFetcher {
    transport: Arc<dyn Transport>,
    schedule: OriginSchedule,
    robots: Mutex<HashMap<String, RobotsCell>>,
    negative: RwLock<HashMap<String, String>>,
    limiter: Option<DirectRateLimiter>,
    cancel: CancellationToken,
}

impl PoliteFetcher {
    /// Create a fetcher. `policy.global_rps` sizes the global limiter.
    pub fn new(transport: Arc<dyn Transport>, policy: &FetchPolicy) -> Self {
        let limiter = policy
            .global_rps
            .and_then(NonZeroU32::new)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Self {
            transport,
            schedule: OriginSchedule::new(),
            robots: Mutex::new(HashMap::new()),
            negative: RwLock::new(HashMap::new()),
            limiter,
            cancel: CancellationToken::new(),
        }
    }

    /// Observe an external cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Number of locators that failed permanently so far.
    pub fn negative_cache_len(&self) -> usize {
        self.negative.read().unwrap().len()
    }

    /// Fetch one locator. Failures are reported in the result, never as `Err`.
    pub async fn fetch(&self, locator: &str, policy: &FetchPolicy) -> FetchResult {
        self.fetch_with(locator, policy, &self.cancel).await
    }

    /// Fetch under a caller's token, typically a child of this fetcher's.
    pub async fn fetch_with(
        &self,
        locator: &str,
        policy: &FetchPolicy,
        cancel: &CancellationToken,
    ) -> FetchResult {
        if let Some(reason) = self.negative.read().unwrap().get(locator).cloned() {
            debug!(url = %locator, "negative cache hit");
            return FetchResult::failure(locator, FetchError::NegativelyCached(reason), None, 0);
        }

        let url = match parse_locator(locator) {
            Ok(url) => url,
            Err(e) => return self.permanent(locator, e, None, 0),
        };
        let origin = url.origin().ascii_serialization();

        if cancel.is_cancelled() {
            return FetchResult::failure(locator, FetchError::Cancelled, None, 0);
        }

        if policy.respect_robots {
            let rules = match self.robots_for(&origin, policy, cancel).await {
                Ok(rules) => rules,
                Err(e) => return FetchResult::failure(locator, e, None, 0),
            };
            if !rules.is_allowed(&policy.user_agent, url.path()) {
                info!(url = %locator, "disallowed by robots.txt");
                let err = FetchError::RobotsDisallowed(url.path().to_string());
                return self.permanent(locator, err, None, 0);
            }
        }

        let mut attempts = 0u32;
        let mut last_status = None;
        loop {
            if cancel.is_cancelled() {
                return FetchResult::failure(locator, FetchError::Cancelled, last_status, attempts);
            }
            if let Err(e) = self.wait_turn(&origin, policy, cancel).await {
                return FetchResult::failure(locator, e, last_status, attempts);
            }

            attempts += 1;
            let err = match self.attempt(url.as_str(), policy).await {
                Ok(response) => {
                    debug!(url = %locator, status = response.status, attempts, "fetched");
                    return FetchResult::success(
                        locator,
                        response.body,
                        response.media_type,
                        response.status,
                        attempts,
                    );
                }
                Err((err, status)) => {
                    last_status = status.or(last_status);
                    err
                }
            };

            if !err.is_transient() {
                warn!(url = %locator, error = %err, "permanent fetch failure");
                return self.permanent(locator, err, last_status, attempts);
            }
            if attempts > policy.max_retries {
                warn!(url = %locator, attempts, error = %err, "giving up");
                let exhausted = FetchError::Exhausted {
                    attempts,
                    last: Box::new(err),
                };
                return FetchResult::failure(locator, exhausted, last_status, attempts);
            }

            let delay = match err.retry_after() {
                Some(requested) => requested.min(policy.max_backoff),
                None => policy.backoff_for(attempts - 1),
            };
            warn!(
                url = %locator,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient fetch failure, backing off"
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    return FetchResult::failure(locator, FetchError::Cancelled, last_status, attempts);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn permanent(
        &self,
        locator: &str,
        err: FetchError,
        status: Option<u16>,
        attempts: u32,
    ) -> FetchResult {
        self.negative
            .write()
            .unwrap()
            .insert(locator.to_string(), err.to_string());
        FetchResult::failure(locator, err, status, attempts)
    }

    /// Wait for the global limiter and this origin's slot.
    async fn wait_turn(
        &self,
        origin: &str,
        policy: &FetchPolicy,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        if let Some(limiter) = &self.limiter {
            tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = limiter.until_ready() => {}
            }
        }

        let slot = self.schedule.reserve(origin, policy.min_interval);
        tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            _ = tokio::time::sleep_until(slot) => Ok(()),
        }
    }

    /// One request, classified.
    async fn attempt(
        &self,
        url: &str,
        policy: &FetchPolicy,
    ) -> Result<TransportResponse, (FetchError, Option<u16>)> {
        let response = self.send(url, policy).await.map_err(|e| (e, None))?;
        let status = response.status;

        match status {
            200..=299 => Ok(response),
            408 | 429 | 500..=599 => Err((
                FetchError::TransientStatus {
                    status,
                    retry_after: response.retry_after,
                },
                Some(status),
            )),
            _ => Err((FetchError::PermanentStatus(status), Some(status))),
        }
    }

    async fn send(&self, url: &str, policy: &FetchPolicy) -> Result<TransportResponse, FetchError> {
        let request = self
            .transport
            .get(url, &policy.user_agent, policy.request_timeout);

        match tokio::time::timeout(policy.request_timeout, request).await {
            Err(_) | Ok(Err(TransportError::Timeout)) => {
                Err(FetchError::Timeout(policy.request_timeout))
            }
            Ok(Err(TransportError::Connection(msg))) | Ok(Err(TransportError::Other(msg))) => {
                Err(FetchError::Connection(msg))
            }
            Ok(Ok(response)) => Ok(response),
        }
    }

    /// Robots rules for `origin`, fetched once.
    async fn robots_for(
        &self,
        origin: &str,
        policy: &FetchPolicy,
        cancel: &CancellationToken,
    ) -> Result<Arc<RobotsRules>, FetchError> {
        let cell = self
            .robots
            .lock()
            .unwrap()
            .entry(origin.to_string())
            .or_default()
            .clone();

        cell.get_or_try_init(|| async {
            self.wait_turn(origin, policy, cancel).await?;
            let robots_url = format!("{}/robots.txt", origin);

            let rules = match self.send(&robots_url, policy).await {
                Ok(response) if response.is_success() => {
                    RobotsRules::parse(&String::from_utf8_lossy(&response.body))
                }
                Ok(response) => {
                    debug!(origin = %origin, status = response.status, "no robots.txt");
                    RobotsRules::allow_all()
                }
                Err(e) => {
                    debug!(origin = %origin, error = %e, "robots.txt unavailable");
                    RobotsRules::allow_all()
                }
            };

            if let Some(delay) = rules.crawl_delay(&policy.user_agent) {
                if delay > policy.min_interval {
                    info!(origin = %origin, delay_ms = delay.as_millis() as u64, "using robots crawl-delay");
                    self.schedule.set_floor(origin, delay);
                }
            }
            Ok::<_, FetchError>(Arc::new(rules))
        })
        .await
        .cloned()
    }
}

fn parse_locator(locator: &str) -> Result<Url, FetchError> {
    let url = Url::parse(locator).map_err(|e| FetchError::InvalidLocator(format!("{}: {}", locator, e)))?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        _ => Err(FetchError::InvalidLocator(locator.to_string())),
    }
}
