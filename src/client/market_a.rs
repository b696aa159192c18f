//! Market A client: paginated GET catalogue reads.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::client::{build_http_client, execute_with_retry, CancelToken, MarketClient, PacingClock, PageResult};
use crate::credentials::CredentialStore;
use crate::error::PipelineError;
use crate::models::{Item, Marketplace};

const CATALOGUE_URL: &str = "https://market-a.example/api/market/items";

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    success: bool,
    total_count: u32,
    #[serde(default)]
    results: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    hash_name: String,
    sell_price: Option<f64>,
    sell_listings: Option<u64>,
}

pub struct MarketAClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialStore>,
    pacing: PacingClock,
    cancel: CancelToken,
}

impl MarketAClient {
    pub fn new(credentials: Arc<CredentialStore>, min_interval: Duration) -> Self {
        Self {
            http: build_http_client(),
            base_url: CATALOGUE_URL.to_string(),
            credentials,
            pacing: PacingClock::new(min_interval),
            cancel: CancelToken::new(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(credentials: Arc<CredentialStore>, min_interval: Duration, base_url: String) -> Self {
        Self {
            http: build_http_client(),
            base_url,
            credentials,
            pacing: PacingClock::new(min_interval),
            cancel: CancelToken::new(),
        }
    }

    pub fn set_min_interval(&self, interval: Duration) {
        self.pacing.set_min_interval(interval);
    }

    fn cache_buster() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MarketClient for MarketAClient {
    async fn fetch_page(&self, page_index: u32, page_size: Option<u32>) -> Result<PageResult, PipelineError> {
        let creds = self.credentials.get(Marketplace::A);
        if !creds.configured {
            return Err(PipelineError::AuthFailed("market A has no stored credentials".into()));
        }

        let page_size = page_size.unwrap_or(80);
        let cache_buster = Self::cache_buster();
        let session_token = creds.fields.session_token.clone().unwrap_or_default();
        let csrf_token = creds.fields.csrf_token.clone().unwrap_or_default();
        let headers = creds.headers.clone();
        let cookie_header = format!(
            "sessionid={}; {}",
            session_token,
            creds
                .cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ")
        );

        let response = execute_with_retry(&self.pacing, &self.cancel, Marketplace::A, || {
            let mut builder = self
                .http
                .get(&self.base_url)
                .query(&[
                    ("page", page_index.to_string()),
                    ("page_size", page_size.to_string()),
                    ("cache_buster", cache_buster.to_string()),
                ])
                .header("X-CSRF-Token", &csrf_token)
                .header("Cookie", &cookie_header);
            for (k, v) in &headers {
                builder = builder.header(k, v);
            }
            builder
        })
        .await?;

        let parsed: ItemsResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::UpstreamUnavailable(format!("market A: bad response body: {}", e)))?;

        if !parsed.success {
            return Err(PipelineError::UpstreamUnavailable("market A: success=false".into()));
        }

        let fetched_at = Utc::now();
        let page_size_f = page_size.max(1) as f64;
        let total_pages = Some(((parsed.total_count as f64) / page_size_f).ceil() as u32);

        let items = parsed
            .results
            .into_iter()
            .filter_map(|raw| {
                raw.sell_price.map(|price| Item {
                    key: raw.hash_name.clone(),
                    display_name: raw.hash_name,
                    price: Some(price),
                    sell_count: raw.sell_listings,
                    source_link: self.base_url.clone(),
                    fetched_at,
                })
            })
            .collect::<Vec<_>>();

        info!("market A page {}: {} items", page_index, items.len());

        Ok(PageResult {
            items,
            advertised_total_pages: total_pages,
        })
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn marketplace(&self) -> Marketplace {
        Marketplace::A
    }
}
