//! Rate-limited marketplace clients (C2).
//!
//! Each marketplace gets its own client instance: its own pooled
//! `reqwest::Client`, its own global pacing clock, and its own cancellation
//! token. The pacing clock and retry/backoff policy are identical across
//! marketplaces; only the request shape (`market_a`/`market_b`) differs.

pub mod market_a;
pub mod market_b;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::models::{Item, Marketplace};

const MAX_RETRIES: u32 = 5;
const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const JITTER_EVERY: u64 = 10;

pub use market_a::MarketAClient;
pub use market_b::MarketBClient;

/// One page of catalogue results plus whatever the upstream told us about
/// how many pages there are in total (A only; B has no such field).
#[derive(Debug, Clone, Default)]
pub struct PageResult {
    pub items: Vec<Item>,
    pub advertised_total_pages: Option<u32>,
}

#[async_trait]
pub trait MarketClient: Send + Sync {
    async fn fetch_page(&self, page_index: u32, page_size: Option<u32>) -> Result<PageResult, PipelineError>;
    fn cancel(&self);
    fn marketplace(&self) -> Marketplace;
}

/// Cooperative cancellation shared between a client and whoever kicked off
/// the refresh that's using it.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Process-wide minimum inter-request interval for a single marketplace,
/// shared by every clone of that marketplace's client.
pub struct PacingClock {
    last_request_at: parking_lot::Mutex<Instant>,
    min_interval: parking_lot::RwLock<Duration>,
    request_count: AtomicU64,
}

impl PacingClock {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_request_at: parking_lot::Mutex::new(Instant::now() - min_interval),
            min_interval: parking_lot::RwLock::new(min_interval),
            request_count: AtomicU64::new(0),
        }
    }

    pub fn set_min_interval(&self, interval: Duration) {
        *self.min_interval.write() = interval;
    }

    /// Waits out the global pacing delay, then the every-10th-request jitter.
    pub async fn acquire(&self, cancel: &CancelToken) {
        let min_interval = *self.min_interval.read();
        let wait = {
            let mut last = self.last_request_at.lock();
            let elapsed = last.elapsed();
            let wait = min_interval.saturating_sub(elapsed);
            *last = Instant::now();
            wait
        };
        if !wait.is_zero() && !cancel.is_cancelled() {
            debug!("pacing: waiting {:?}", wait);
            sleep(wait).await;
        }

        let count = self.request_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count % JITTER_EVERY == 0 && !cancel.is_cancelled() {
            let extra = rand::thread_rng().gen_range(3.0..=6.0);
            let extra = Duration::from_secs_f64(extra);
            debug!("pacing: jitter delay on request {}: {:?}", count, extra);
            sleep(extra).await;
        }
    }
}

/// Runs `build_request` (freshly, so headers/body can be rebuilt each
/// attempt) through the shared retry/backoff policy. Honors cancellation
/// between attempts.
pub async fn execute_with_retry<F>(
    pacing: &PacingClock,
    cancel: &CancelToken,
    marketplace: Marketplace,
    build_request: F,
) -> Result<reqwest::Response, PipelineError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut delay = BASE_DELAY;
    let mut forbidden_retried = false;

    for attempt in 1..=MAX_RETRIES {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        pacing.acquire(cancel).await;

        let outcome = tokio::time::timeout(REQUEST_TIMEOUT, build_request().send()).await;

        match outcome {
            Ok(Ok(response)) if response.status().is_success() => return Ok(response),
            Ok(Ok(response)) => {
                let status = response.status();
                if status == StatusCode::FORBIDDEN {
                    if forbidden_retried {
                        return Err(PipelineError::AuthFailed(format!(
                            "{} returned 403 after retry",
                            marketplace.as_str()
                        )));
                    }
                    forbidden_retried = true;
                    warn!("{}: 403, retrying once", marketplace.as_str());
                } else if status == StatusCode::UNAUTHORIZED {
                    return Err(PipelineError::AuthFailed(format!(
                        "{} returned 401",
                        marketplace.as_str()
                    )));
                } else if status == StatusCode::TOO_MANY_REQUESTS {
                    warn!("{}: 429 on attempt {}", marketplace.as_str(), attempt);
                } else {
                    let body = response.text().await.unwrap_or_default();
                    warn!(
                        "{}: non-2xx {} on attempt {}: {}",
                        marketplace.as_str(),
                        status,
                        attempt,
                        body
                    );
                }
            }
            Ok(Err(e)) => {
                warn!("{}: request error on attempt {}: {}", marketplace.as_str(), attempt, e);
            }
            Err(_) => {
                warn!("{}: timeout on attempt {}", marketplace.as_str(), attempt);
            }
        }

        if attempt < MAX_RETRIES {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let jitter = rand::thread_rng().gen_range(1.0..=2.0);
            let this_delay = delay.mul_f64(jitter).min(MAX_DELAY);
            sleep(this_delay).await;
            delay = (delay * 2).min(MAX_DELAY);
        }
    }

    Err(PipelineError::RateLimited(format!(
        "{} exhausted {} retries",
        marketplace.as_str(),
        MAX_RETRIES
    )))
}

pub fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(4)
        .tcp_keepalive(Duration::from_secs(60))
        .user_agent("crossmarket-arb/0.1")
        .build()
        .expect("failed to build HTTP client")
}
