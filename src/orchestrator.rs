//! Update orchestrator (C6).
//!
//! Owns the exclusion lock that guards both refresh modes, the live
//! `ResultSet`, and the cancellation token each refresh hands down to the
//! clients it drives.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::client::{CancelToken, MarketClient};
use crate::config::ConfigStore;
use crate::error::PipelineError;
use crate::fetcher::fetch_catalogue;
use crate::keycache::KeyCache;
use crate::matcher::{match_and_rank, MatchParams};
use crate::models::ResultSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    RunningFull,
    RunningIncr,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Progress {
    pub pages_done: u32,
    pub pages_total: u32,
    pub matches_so_far: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub phase: Phase,
    pub progress: Progress,
    pub last_error: Option<String>,
    pub last_full_refresh_at: Option<DateTime<Utc>>,
    pub last_run_cancelled: bool,
}

struct SharedState {
    phase: Phase,
    progress: Progress,
    last_error: Option<String>,
    last_full_refresh_at: Option<DateTime<Utc>>,
    last_run_cancelled: bool,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            progress: Progress::default(),
            last_error: None,
            last_full_refresh_at: None,
            last_run_cancelled: false,
        }
    }
}

pub struct Orchestrator {
    lock: AsyncMutex<()>,
    cancel: RwLock<CancelToken>,
    state: RwLock<SharedState>,
    result_set: Arc<ArcSwap<ResultSet>>,
    config: Arc<ConfigStore>,
    key_cache: Arc<KeyCache>,
    client_a: Arc<dyn MarketClient>,
    client_b: Arc<dyn MarketClient>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<ConfigStore>,
        key_cache: Arc<KeyCache>,
        client_a: Arc<dyn MarketClient>,
        client_b: Arc<dyn MarketClient>,
    ) -> Self {
        Self {
            lock: AsyncMutex::new(()),
            cancel: RwLock::new(CancelToken::new()),
            state: RwLock::new(SharedState::default()),
            result_set: Arc::new(ArcSwap::from_pointee(ResultSet::default())),
            config,
            key_cache,
            client_a,
            client_b,
        }
    }

    pub fn result_set(&self) -> Arc<ArcSwap<ResultSet>> {
        self.result_set.clone()
    }

    pub fn status(&self) -> OrchestratorStatus {
        let state = self.state.read();
        OrchestratorStatus {
            phase: state.phase,
            progress: state.progress.clone(),
            last_error: state.last_error.clone(),
            last_full_refresh_at: state.last_full_refresh_at,
            last_run_cancelled: state.last_run_cancelled,
        }
    }

    pub fn cancel(&self) {
        self.cancel.read().cancel();
        self.client_a.cancel();
        self.client_b.cancel();
    }

    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    /// Full refresh: fetches both marketplaces from scratch and rebuilds
    /// C5's interesting-key set from the resulting pairs.
    pub async fn refresh_full(&self) -> Result<(), PipelineError> {
        let _guard = self
            .lock
            .try_lock()
            .map_err(|_| PipelineError::AlreadyRunning)?;

        let fresh_token = CancelToken::new();
        *self.cancel.write() = fresh_token.clone();
        self.set_phase(Phase::RunningFull);

        let result = self.run_full(&fresh_token).await;
        self.finish(result.clone());
        result
    }

    /// Incremental refresh: degrades to full if C5 is empty, otherwise
    /// restricts the A-side join input to the cached interesting keys.
    pub async fn refresh_incremental(&self) -> Result<(), PipelineError> {
        if self.key_cache.get_keys().is_empty() {
            return self.refresh_full().await;
        }

        let _guard = self
            .lock
            .try_lock()
            .map_err(|_| PipelineError::AlreadyRunning)?;

        let fresh_token = CancelToken::new();
        *self.cancel.write() = fresh_token.clone();
        self.set_phase(Phase::RunningIncr);

        let result = self.run_incremental(&fresh_token).await;
        self.finish(result.clone());
        result
    }

    async fn run_full(&self, token: &CancelToken) -> Result<(), PipelineError> {
        let params = self.config.get();
        let client_a = self.client_a.clone();
        let client_b = self.client_b.clone();
        let (a_outcome, b_outcome) = tokio::join!(
            fetch_catalogue(client_a.as_ref(), params.a_max_pages, Some(params.a_page_size)),
            fetch_catalogue(client_b.as_ref(), params.b_max_pages, Some(params.b_page_size)),
        );

        if token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if a_outcome.items.is_empty() && b_outcome.items.is_empty() {
            return Err(PipelineError::UpstreamUnavailable(
                "both marketplaces returned zero items".into(),
            ));
        }

        let match_params = MatchParams {
            diff_lo: params.diff_lo,
            diff_hi: params.diff_hi,
            price_lo: params.price_lo,
            price_hi: params.price_hi,
            max_output: params.max_output,
        };
        let result = match_and_rank(&a_outcome.items, &b_outcome.items, &match_params);

        let keys: HashSet<String> = result.pairs.iter().map(|p| p.key.clone()).collect();
        self.key_cache.replace(keys);
        self.result_set.store(Arc::new(result));

        info!(
            "full refresh: a={} ({} failed pages), b={} ({} failed pages)",
            a_outcome.total_items, a_outcome.failed_pages, b_outcome.total_items, b_outcome.failed_pages
        );
        Ok(())
    }

    async fn run_incremental(&self, token: &CancelToken) -> Result<(), PipelineError> {
        let params = self.config.get();
        let interesting = self.key_cache.get_keys();

        let client_a = self.client_a.clone();
        let client_b = self.client_b.clone();
        let (a_outcome, b_outcome) = tokio::join!(
            fetch_catalogue(client_a.as_ref(), params.a_max_pages, Some(params.a_page_size)),
            fetch_catalogue(client_b.as_ref(), params.b_max_pages, Some(params.b_page_size)),
        );

        if token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if a_outcome.items.is_empty() && b_outcome.items.is_empty() {
            return Err(PipelineError::UpstreamUnavailable(
                "both marketplaces returned zero items".into(),
            ));
        }

        let restricted_a: Vec<_> = a_outcome
            .items
            .into_iter()
            .filter(|item| interesting.contains(&item.key))
            .collect();

        let match_params = MatchParams {
            diff_lo: params.diff_lo,
            diff_hi: params.diff_hi,
            price_lo: params.price_lo,
            price_hi: params.price_hi,
            max_output: params.max_output,
        };
        let partial = match_and_rank(&restricted_a, &b_outcome.items, &match_params);

        let prior = self.result_set.load_full();
        let fresh_keys: HashSet<&str> = partial.pairs.iter().map(|p| p.key.as_str()).collect();

        let mut merged = partial.pairs.clone();
        for old_pair in &prior.pairs {
            if !fresh_keys.contains(old_pair.key.as_str()) && interesting.contains(&old_pair.key) {
                merged.push(old_pair.clone());
            }
        }
        merged.sort_by(|x, y| {
            y.margin
                .partial_cmp(&x.margin)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| y.diff.partial_cmp(&x.diff).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| x.key.cmp(&y.key))
        });
        merged.truncate(params.max_output);

        let key_exact_count = merged
            .iter()
            .filter(|p| p.matched_by == crate::models::MatchedBy::KeyExact)
            .count();
        let name_exact_count = merged.len() - key_exact_count;

        let result = ResultSet {
            pairs: merged,
            built_at: Some(Utc::now()),
            key_exact_count,
            name_exact_count,
        };
        self.result_set.store(Arc::new(result));

        info!(
            "incremental refresh: restricted a={} against {} interesting keys",
            restricted_a.len(),
            interesting.len()
        );
        Ok(())
    }

    fn set_phase(&self, phase: Phase) {
        let mut state = self.state.write();
        state.phase = phase;
        state.progress = Progress::default();
    }

    fn finish(&self, result: Result<(), PipelineError>) {
        let mut state = self.state.write();
        state.last_run_cancelled = matches!(result, Err(PipelineError::Cancelled));
        match &result {
            Ok(()) => {
                state.last_error = None;
                if state.phase == Phase::RunningFull {
                    state.last_full_refresh_at = Some(Utc::now());
                }
            }
            Err(PipelineError::Cancelled) => {
                state.last_error = None;
            }
            Err(e) => {
                warn!("refresh failed: {}", e);
                state.last_error = Some(e.to_string());
            }
        }
        state.phase = Phase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeParams;
    use crate::models::{Item, Marketplace};
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use tempfile::NamedTempFile;

    /// Always returns the same page-1 items; page >1 is empty.
    struct StaticClient {
        marketplace: Marketplace,
        page1: Vec<Item>,
    }

    #[async_trait]
    impl MarketClient for StaticClient {
        async fn fetch_page(&self, page_index: u32, _page_size: Option<u32>) -> Result<crate::client::PageResult, PipelineError> {
            if page_index == 1 {
                Ok(crate::client::PageResult {
                    items: self.page1.clone(),
                    advertised_total_pages: Some(1),
                })
            } else {
                Ok(crate::client::PageResult::default())
            }
        }
        fn cancel(&self) {}
        fn marketplace(&self) -> Marketplace {
            self.marketplace
        }
    }

    /// Returns a different set of items on each successive refresh, consumed
    /// FIFO, so tests can simulate catalogue drift across refresh cycles.
    struct RoundClient {
        marketplace: Marketplace,
        rounds: SyncMutex<Vec<Vec<Item>>>,
    }

    #[async_trait]
    impl MarketClient for RoundClient {
        async fn fetch_page(&self, page_index: u32, _page_size: Option<u32>) -> Result<crate::client::PageResult, PipelineError> {
            if page_index != 1 {
                return Ok(crate::client::PageResult::default());
            }
            let mut rounds = self.rounds.lock();
            if rounds.is_empty() {
                return Ok(crate::client::PageResult::default());
            }
            let items = rounds.remove(0);
            Ok(crate::client::PageResult {
                items,
                advertised_total_pages: Some(1),
            })
        }
        fn cancel(&self) {}
        fn marketplace(&self) -> Marketplace {
            self.marketplace
        }
    }

    fn item(key: &str, price: f64) -> Item {
        Item {
            key: key.to_string(),
            display_name: key.to_string(),
            price: Some(price),
            sell_count: None,
            source_link: String::new(),
            fetched_at: Utc::now(),
        }
    }

    fn build(params: RuntimeParams) -> (Orchestrator, Arc<KeyCache>, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let key_cache = Arc::new(KeyCache::new(temp.path().to_path_buf()));
        let config = Arc::new(ConfigStore::new(params, key_cache.clone()));
        let orchestrator = Orchestrator::new(
            config,
            key_cache.clone(),
            Arc::new(StaticClient { marketplace: Marketplace::A, page1: vec![] }),
            Arc::new(StaticClient { marketplace: Marketplace::B, page1: vec![] }),
        );
        (orchestrator, key_cache, temp)
    }

    fn scenario_params() -> RuntimeParams {
        RuntimeParams {
            diff_lo: 3.0,
            diff_hi: 5.0,
            price_lo: 0.0,
            price_hi: f64::INFINITY,
            max_output: 10,
            ..RuntimeParams::default()
        }
    }

    #[tokio::test]
    async fn s1_happy_path_one_pair_in_band() {
        let temp = NamedTempFile::new().unwrap();
        let key_cache = Arc::new(KeyCache::new(temp.path().to_path_buf()));
        let config = Arc::new(ConfigStore::new(scenario_params(), key_cache.clone()));
        let orchestrator = Orchestrator::new(
            config,
            key_cache,
            Arc::new(StaticClient {
                marketplace: Marketplace::A,
                page1: vec![item("K1", 100.0), item("K2", 50.0)],
            }),
            Arc::new(StaticClient {
                marketplace: Marketplace::B,
                page1: vec![item("K1", 104.0), item("K2", 60.0)],
            }),
        );

        orchestrator.refresh_full().await.unwrap();
        let result = orchestrator.result_set().load_full();
        assert_eq!(result.pairs.len(), 1);
        assert_eq!(result.pairs[0].key, "K1");
        assert!((result.pairs[0].diff - 4.0).abs() < 1e-9);
        assert!((result.pairs[0].margin - 0.04).abs() < 1e-9);
    }

    #[tokio::test]
    async fn s4_incremental_refresh_ignores_new_keys_outside_interesting_set() {
        let temp = NamedTempFile::new().unwrap();
        let key_cache = Arc::new(KeyCache::new(temp.path().to_path_buf()));
        let config = Arc::new(ConfigStore::new(scenario_params(), key_cache.clone()));
        let client_a = Arc::new(RoundClient {
            marketplace: Marketplace::A,
            rounds: SyncMutex::new(vec![
                vec![item("K1", 100.0), item("K2", 50.0)],
                vec![item("K1", 100.0), item("K3", 100.0)],
            ]),
        });
        let client_b = Arc::new(RoundClient {
            marketplace: Marketplace::B,
            rounds: SyncMutex::new(vec![
                vec![item("K1", 104.0), item("K2", 60.0)],
                vec![item("K1", 104.0), item("K3", 104.0)],
            ]),
        });
        let orchestrator = Orchestrator::new(config, key_cache.clone(), client_a, client_b);

        orchestrator.refresh_full().await.unwrap();
        assert_eq!(key_cache.get_keys(), ["K1".to_string()].into_iter().collect());

        orchestrator.refresh_incremental().await.unwrap();
        let result = orchestrator.result_set().load_full();
        let keys: Vec<&str> = result.pairs.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["K1"]);
    }

    #[tokio::test]
    async fn s5_empty_interesting_set_degrades_incremental_to_full() {
        let (orchestrator, key_cache, _temp) = build(scenario_params());
        assert!(key_cache.get_keys().is_empty());

        orchestrator.refresh_incremental().await.unwrap();
        assert!(orchestrator.status().last_full_refresh_at.is_some());
    }

    #[tokio::test]
    async fn invariant_10_both_sides_empty_is_upstream_unavailable() {
        let (orchestrator, _key_cache, _temp) = build(scenario_params());
        let err = orchestrator.refresh_full().await.unwrap_err();
        assert_eq!(err, PipelineError::UpstreamUnavailable("both marketplaces returned zero items".into()));
        assert!(orchestrator.result_set().load_full().pairs.is_empty());
    }

    #[tokio::test]
    async fn invariant_11_one_sided_empty_succeeds_with_empty_result_set() {
        let temp = NamedTempFile::new().unwrap();
        let key_cache = Arc::new(KeyCache::new(temp.path().to_path_buf()));
        let config = Arc::new(ConfigStore::new(scenario_params(), key_cache.clone()));
        let orchestrator = Orchestrator::new(
            config,
            key_cache,
            Arc::new(StaticClient {
                marketplace: Marketplace::A,
                page1: vec![item("K1", 100.0)],
            }),
            Arc::new(StaticClient { marketplace: Marketplace::B, page1: vec![] }),
        );

        orchestrator.refresh_full().await.unwrap();
        assert!(orchestrator.result_set().load_full().pairs.is_empty());
    }

    #[tokio::test]
    async fn invariant_13_cancelled_run_leaves_result_set_unchanged_and_reports_cancelled() {
        let temp = NamedTempFile::new().unwrap();
        let key_cache = Arc::new(KeyCache::new(temp.path().to_path_buf()));
        let config = Arc::new(ConfigStore::new(scenario_params(), key_cache.clone()));
        let orchestrator = Orchestrator::new(
            config,
            key_cache,
            Arc::new(StaticClient {
                marketplace: Marketplace::A,
                page1: vec![item("K1", 100.0)],
            }),
            Arc::new(StaticClient {
                marketplace: Marketplace::B,
                page1: vec![item("K1", 104.0)],
            }),
        );

        orchestrator.refresh_full().await.unwrap();
        let before = orchestrator.result_set().load_full().pairs.clone();

        let cancelled = CancelToken::new();
        cancelled.cancel();
        let result = orchestrator.run_full(&cancelled).await;
        orchestrator.finish(result.clone());
        assert_eq!(result, Err(PipelineError::Cancelled));

        let after = orchestrator.result_set().load_full().pairs.clone();
        assert_eq!(before, after);
        assert!(orchestrator.status().last_run_cancelled);
    }

    #[tokio::test]
    async fn invariant_8_repeated_full_refresh_against_unchanged_upstreams_is_stable() {
        let temp = NamedTempFile::new().unwrap();
        let key_cache = Arc::new(KeyCache::new(temp.path().to_path_buf()));
        let config = Arc::new(ConfigStore::new(scenario_params(), key_cache.clone()));
        let orchestrator = Orchestrator::new(
            config,
            key_cache,
            Arc::new(StaticClient {
                marketplace: Marketplace::A,
                page1: vec![item("K1", 100.0), item("K2", 50.0)],
            }),
            Arc::new(StaticClient {
                marketplace: Marketplace::B,
                page1: vec![item("K1", 104.0), item("K2", 60.0)],
            }),
        );

        orchestrator.refresh_full().await.unwrap();
        let first = orchestrator.result_set().load_full().pairs.clone();

        orchestrator.refresh_full().await.unwrap();
        let second = orchestrator.result_set().load_full().pairs.clone();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.key, b.key);
            assert_eq!(a.price_a, b.price_a);
            assert_eq!(a.price_b, b.price_b);
            assert_eq!(a.diff, b.diff);
        }
    }

    #[tokio::test]
    async fn invariant_9_a_second_refresh_is_rejected_while_one_is_held() {
        let (orchestrator, _key_cache, _temp) = build(scenario_params());
        assert!(!orchestrator.is_busy());

        let guard = orchestrator.lock.lock().await;
        assert!(orchestrator.is_busy());
        assert_eq!(orchestrator.refresh_full().await, Err(PipelineError::AlreadyRunning));
        assert_eq!(orchestrator.refresh_incremental().await, Err(PipelineError::AlreadyRunning));

        drop(guard);
        assert!(!orchestrator.is_busy());
        orchestrator.refresh_full().await.unwrap();
    }
}
