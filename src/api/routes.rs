//! HTTP facade (C0 envelope + the endpoint table).
//!
//! Every handler returns `{ok, data?, error?}`; errors are mapped to status
//! codes by `PipelineError::into_response`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client::{MarketAClient, MarketBClient, MarketClient};
use crate::config::{ConfigStore, RuntimeParamsPatch};
use crate::credentials::{CredentialStore, NamedFieldsPatch};
use crate::error::PipelineError;
use crate::models::Marketplace;
use crate::orchestrator::Orchestrator;
use crate::query::{QuerySurface, SortBy};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub credentials: Arc<CredentialStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub query: Arc<QuerySurface>,
    pub client_a: Arc<MarketAClient>,
    pub client_b: Arc<MarketBClient>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/items", get(list_items))
        .route("/status", get(status))
        .route("/statistics", get(statistics))
        .route("/update", post(trigger_update))
        .route("/settings", get(get_settings).post(post_settings))
        .route("/price_range", get(get_price_range).post(post_price_range))
        .route(
            "/buff_price_range",
            get(get_buff_price_range).post(post_buff_price_range),
        )
        .route("/tokens/status", get(tokens_status))
        .route("/tokens/:marketplace", post(tokens_update))
        .route("/tokens/test/:marketplace", post(tokens_test))
        .route("/health", get(health))
        .with_state(state)
}

fn ok_body<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "data": data }))
}

fn parse_marketplace(raw: &str) -> Result<Marketplace, PipelineError> {
    match raw.to_ascii_lowercase().as_str() {
        "a" => Ok(Marketplace::A),
        "b" => Ok(Marketplace::B),
        other => Err(PipelineError::ValidationFailed(format!(
            "unknown marketplace '{}'",
            other
        ))),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    min_diff: Option<f64>,
    #[serde(default)]
    sort_by: SortBy,
    limit: Option<usize>,
}

async fn list_items(State(state): State<AppState>, Query(q): Query<ListQuery>) -> Response {
    let pairs = state.query.list(q.min_diff, q.sort_by, q.limit);
    ok_body(pairs).into_response()
}

async fn status(State(state): State<AppState>) -> Response {
    let orchestrator_status = state.orchestrator.status();
    let params = state.config.get();
    ok_body(json!({
        "orchestrator": orchestrator_status,
        "heavy_cadence_secs": params.heavy_cadence_secs,
        "light_cadence_secs": params.light_cadence_secs,
    }))
    .into_response()
}

async fn statistics(State(state): State<AppState>) -> Response {
    ok_body(state.query.stats()).into_response()
}

async fn trigger_update(State(state): State<AppState>) -> Response {
    match state.orchestrator.refresh_full().await {
        Ok(()) => ok_body(json!({ "started": true })).into_response(),
        // Idempotent: a refresh is already running, which satisfies the caller's intent.
        Err(PipelineError::AlreadyRunning) => ok_body(json!({ "started": false, "reason": "already running" })).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_settings(State(state): State<AppState>) -> Response {
    ok_body(state.config.get()).into_response()
}

async fn post_settings(State(state): State<AppState>, Json(patch): Json<RuntimeParamsPatch>) -> Response {
    match state.config.apply_patch(patch) {
        Ok(params) => {
            state.client_a.set_min_interval(params.a_min_delay());
            state.client_b.set_min_interval(params.b_min_delay());
            ok_body(params).into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct RangePatch {
    lo: f64,
    hi: f64,
}

async fn get_price_range(State(state): State<AppState>) -> Response {
    let params = state.config.get();
    ok_body(json!({ "lo": params.diff_lo, "hi": params.diff_hi })).into_response()
}

async fn post_price_range(State(state): State<AppState>, Json(patch): Json<RangePatch>) -> Response {
    match state.config.set_diff_band(patch.lo, patch.hi) {
        Ok(params) => ok_body(json!({ "lo": params.diff_lo, "hi": params.diff_hi })).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_buff_price_range(State(state): State<AppState>) -> Response {
    let params = state.config.get();
    ok_body(json!({ "lo": params.price_lo, "hi": params.price_hi })).into_response()
}

async fn post_buff_price_range(State(state): State<AppState>, Json(patch): Json<RangePatch>) -> Response {
    match state.config.set_price_band(patch.lo, patch.hi) {
        Ok(params) => ok_body(json!({ "lo": params.price_lo, "hi": params.price_hi })).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn tokens_status(State(state): State<AppState>) -> Response {
    ok_body(state.credentials.status()).into_response()
}

#[derive(Debug, Deserialize)]
pub struct TokensUpdateRequest {
    #[serde(flatten)]
    fields: NamedFieldsPatch,
    #[serde(default)]
    headers: Option<std::collections::HashMap<String, String>>,
    #[serde(default)]
    cookies: Option<std::collections::HashMap<String, String>>,
}

async fn tokens_update(
    State(state): State<AppState>,
    Path(marketplace): Path<String>,
    Json(req): Json<TokensUpdateRequest>,
) -> Response {
    let marketplace = match parse_marketplace(&marketplace) {
        Ok(m) => m,
        Err(e) => return e.into_response(),
    };
    match state.credentials.update(marketplace, req.fields, req.headers, req.cookies) {
        Ok(record) => ok_body(record).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn tokens_test(State(state): State<AppState>, Path(marketplace): Path<String>) -> Response {
    let marketplace = match parse_marketplace(&marketplace) {
        Ok(m) => m,
        Err(e) => return e.into_response(),
    };

    let result: Result<usize, PipelineError> = match marketplace {
        Marketplace::A => state
            .client_a
            .fetch_page(1, Some(1))
            .await
            .map(|page| page.items.len()),
        Marketplace::B => state
            .client_b
            .fetch_page(1, Some(1))
            .await
            .map(|page| page.items.len()),
    };

    match result {
        Ok(count) => ok_body(json!({ "reachable": true, "items_seen": count })).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn health() -> Response {
    ok_body(json!({ "status": "ok" })).into_response()
}
