//! Matcher & Ranker (C4).
//!
//! Joins A-side and B-side catalogues on the canonical hash key, falling
//! back to an exact display-name match, and ranks the result by margin.

use std::collections::HashMap;

use chrono::Utc;

use crate::models::{Item, MatchedBy, Pair, ResultSet, buy_link_for};

pub struct MatchParams {
    pub diff_lo: f64,
    pub diff_hi: f64,
    pub price_lo: f64,
    pub price_hi: f64,
    pub max_output: usize,
}

/// Runs the full join-and-rank pass over an A-side and B-side catalogue.
pub fn match_and_rank(a_items: &[Item], b_items: &[Item], params: &MatchParams) -> ResultSet {
    let mut by_key: HashMap<&str, f64> = HashMap::new();
    let mut by_name: HashMap<&str, f64> = HashMap::new();

    for b in b_items {
        let Some(price) = b.price else { continue };
        by_key
            .entry(b.key.as_str())
            .and_modify(|p| *p = p.min(price))
            .or_insert(price);
        by_name
            .entry(b.display_name.as_str())
            .and_modify(|p| *p = p.min(price))
            .or_insert(price);
    }

    let mut pairs = Vec::new();
    let now = Utc::now();

    for a in a_items {
        let Some(price_a) = a.price else { continue };
        if price_a < params.price_lo || price_a > params.price_hi {
            continue;
        }

        let (price_b, matched_by) = if let Some(&p) = by_key.get(a.key.as_str()) {
            (p, MatchedBy::KeyExact)
        } else if let Some(&p) = by_name.get(a.display_name.as_str()) {
            (p, MatchedBy::NameExact)
        } else {
            continue;
        };

        let diff = price_b - price_a;
        if diff < params.diff_lo || diff > params.diff_hi {
            continue;
        }
        let margin = diff / price_a;

        pairs.push(Pair {
            key: a.key.clone(),
            display_name: a.display_name.clone(),
            price_a,
            price_b,
            diff,
            margin,
            buy_link: buy_link_for(&a.key),
            matched_by,
            observed_at: now,
        });
    }

    pairs.sort_by(|x, y| {
        y.margin
            .partial_cmp(&x.margin)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| y.diff.partial_cmp(&x.diff).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| x.key.cmp(&y.key))
    });
    pairs.truncate(params.max_output);

    let key_exact_count = pairs.iter().filter(|p| p.matched_by == MatchedBy::KeyExact).count();
    let name_exact_count = pairs.iter().filter(|p| p.matched_by == MatchedBy::NameExact).count();

    ResultSet {
        pairs,
        built_at: Some(now),
        key_exact_count,
        name_exact_count,
    }
}
