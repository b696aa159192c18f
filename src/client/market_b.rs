//! Market B client: paginated POST catalogue reads.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::client::{build_http_client, execute_with_retry, CancelToken, MarketClient, PacingClock, PageResult};
use crate::credentials::CredentialStore;
use crate::error::PipelineError;
use crate::models::{Item, Marketplace};

const QUERY_URL: &str = "https://market-b.example/api/market/query";

#[derive(Debug, Serialize)]
struct QueryRequest {
    #[serde(rename = "listSortType")]
    list_sort_type: u32,
    #[serde(rename = "sortType")]
    sort_type: u32,
    #[serde(rename = "pageSize")]
    page_size: u32,
    #[serde(rename = "pageIndex")]
    page_index: u32,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    code: u32,
    #[serde(default)]
    data: QueryResponseData,
}

#[derive(Debug, Default, Deserialize)]
struct QueryResponseData {
    #[serde(default)]
    items: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(rename = "goodsName")]
    goods_name: String,
    #[serde(rename = "sellPrice")]
    sell_price: Option<f64>,
    #[serde(rename = "sellCount")]
    sell_count: Option<u64>,
}

pub struct MarketBClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialStore>,
    pacing: PacingClock,
    cancel: CancelToken,
}

impl MarketBClient {
    pub fn new(credentials: Arc<CredentialStore>, min_interval: Duration) -> Self {
        Self {
            http: build_http_client(),
            base_url: QUERY_URL.to_string(),
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
}

#[async_trait]
impl MarketClient for MarketBClient {
    async fn fetch_page(&self, page_index: u32, page_size: Option<u32>) -> Result<PageResult, PipelineError> {
        let creds = self.credentials.get(Marketplace::B);
        if !creds.configured {
            return Err(PipelineError::AuthFailed("market B has no stored credentials".into()));
        }

        let page_size = page_size.unwrap_or(100);
        let device_id = creds.fields.device_id.clone().unwrap_or_default();
        let user_key = creds.fields.user_key.clone().unwrap_or_default();
        let authorization = creds.fields.authorization.clone().unwrap_or_default();
        let trace_id = creds.fields.trace_id.clone().unwrap_or_default();
        let headers = creds.headers.clone();
        let body = QueryRequest {
            list_sort_type: 0,
            sort_type: 0,
            page_size,
            page_index,
        };

        let response = execute_with_retry(&self.pacing, &self.cancel, Marketplace::B, || {
            let mut builder = self
                .http
                .post(&self.base_url)
                .header("Authorization", &authorization)
                .header("X-Device-Id", &device_id)
                .header("X-User-Key", &user_key)
                .json(&body);
            if !trace_id.is_empty() {
                builder = builder.header("X-Trace-Id", &trace_id);
            }
            for (k, v) in &headers {
                builder = builder.header(k, v);
            }
            builder
        })
        .await?;

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::UpstreamUnavailable(format!("market B: bad response body: {}", e)))?;

        if parsed.code != 0 {
            return Err(PipelineError::UpstreamUnavailable(format!(
                "market B: non-zero response code {}",
                parsed.code
            )));
        }

        let fetched_at = Utc::now();
        let items = parsed
            .data
            .items
            .into_iter()
            .map(|raw| Item {
                key: raw.goods_name.clone(),
                display_name: raw.goods_name,
                price: raw.sell_price,
                sell_count: raw.sell_count,
                source_link: self.base_url.clone(),
                fetched_at,
            })
            .collect::<Vec<_>>();

        info!("market B page {}: {} items", page_index, items.len());

        // B has no advertised page count; the fetcher's stop rule is a
        // zero-item page.
        Ok(PageResult {
            items,
            advertised_total_pages: None,
        })
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn marketplace(&self) -> Marketplace {
        Marketplace::B
    }
}
