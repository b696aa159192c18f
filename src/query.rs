//! Query surface (C9).
//!
//! Pure reads over the live `ResultSet`. Never touches the orchestrator's
//! lock, so a slow refresh never blocks a reader.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Pair, ResultSet};

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Diff,
    Margin,
}

impl Default for SortBy {
    fn default() -> Self {
        SortBy::Margin
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub count: usize,
    pub mean_diff: f64,
    pub min_diff: f64,
    pub max_diff: f64,
    pub mean_margin: f64,
    pub min_margin: f64,
    pub max_margin: f64,
    pub last_built_at: Option<DateTime<Utc>>,
}

pub struct QuerySurface {
    result_set: std::sync::Arc<ArcSwap<ResultSet>>,
}

impl QuerySurface {
    pub fn new(result_set: std::sync::Arc<ArcSwap<ResultSet>>) -> Self {
        Self { result_set }
    }

    pub fn list(&self, min_diff: Option<f64>, sort_by: SortBy, limit: Option<usize>) -> Vec<Pair> {
        let snapshot = self.result_set.load();
        let mut pairs: Vec<Pair> = snapshot
            .pairs
            .iter()
            .filter(|p| min_diff.map(|min| p.diff >= min).unwrap_or(true))
            .cloned()
            .collect();

        match sort_by {
            SortBy::Diff => pairs.sort_by(|a, b| b.diff.partial_cmp(&a.diff).unwrap_or(std::cmp::Ordering::Equal)),
            SortBy::Margin => {
                pairs.sort_by(|a, b| b.margin.partial_cmp(&a.margin).unwrap_or(std::cmp::Ordering::Equal))
            }
        }

        if let Some(limit) = limit {
            pairs.truncate(limit);
        }
        pairs
    }

    pub fn stats(&self) -> Statistics {
        let snapshot = self.result_set.load();
        if snapshot.pairs.is_empty() {
            return Statistics {
                count: 0,
                mean_diff: 0.0,
                min_diff: 0.0,
                max_diff: 0.0,
                mean_margin: 0.0,
                min_margin: 0.0,
                max_margin: 0.0,
                last_built_at: snapshot.built_at,
            };
        }

        let n = snapshot.pairs.len() as f64;
        let (mut sum_diff, mut sum_margin) = (0.0, 0.0);
        let (mut min_diff, mut max_diff) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut min_margin, mut max_margin) = (f64::INFINITY, f64::NEG_INFINITY);

        for pair in &snapshot.pairs {
            sum_diff += pair.diff;
            sum_margin += pair.margin;
            min_diff = min_diff.min(pair.diff);
            max_diff = max_diff.max(pair.diff);
            min_margin = min_margin.min(pair.margin);
            max_margin = max_margin.max(pair.margin);
        }

        Statistics {
            count: snapshot.pairs.len(),
            mean_diff: sum_diff / n,
            min_diff,
            max_diff,
            mean_margin: sum_margin / n,
            min_margin,
            max_margin,
            last_built_at: snapshot.built_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchedBy;
    use std::sync::Arc;

    fn pair(key: &str, diff: f64, margin: f64) -> Pair {
        Pair {
            key: key.to_string(),
            display_name: key.to_string(),
            price_a: 10.0,
            price_b: 10.0 + diff,
            diff,
            margin,
            buy_link: String::new(),
            matched_by: MatchedBy::KeyExact,
            observed_at: Utc::now(),
        }
    }

    fn surface_with(pairs: Vec<Pair>) -> QuerySurface {
        let result_set = ResultSet {
            pairs,
            built_at: Some(Utc::now()),
            key_exact_count: 0,
            name_exact_count: 0,
        };
        QuerySurface::new(Arc::new(ArcSwap::from_pointee(result_set)))
    }

    #[test]
    fn list_filters_by_min_diff() {
        let surface = surface_with(vec![pair("a", 2.0, 0.1), pair("b", 6.0, 0.2)]);
        let out = surface.list(Some(5.0), SortBy::Diff, None);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key, "b");
    }

    #[test]
    fn list_respects_limit_and_sort() {
        let surface = surface_with(vec![pair("a", 2.0, 0.5), pair("b", 6.0, 0.1), pair("c", 4.0, 0.9)]);
        let out = surface.list(None, SortBy::Margin, Some(2));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].key, "c");
        assert_eq!(out[1].key, "a");
    }

    #[test]
    fn stats_on_empty_result_set_does_not_panic() {
        let surface = surface_with(vec![]);
        let stats = surface.stats();
        assert_eq!(stats.count, 0);
    }

    #[test]
    fn stats_aggregates_across_pairs() {
        let surface = surface_with(vec![pair("a", 2.0, 0.2), pair("b", 4.0, 0.4)]);
        let stats = surface.stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min_diff, 2.0);
        assert_eq!(stats.max_diff, 4.0);
        assert!((stats.mean_diff - 3.0).abs() < 1e-9);
    }
}
