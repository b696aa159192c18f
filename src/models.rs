//! Core domain model.
//!
//! These types are shared by every component of the price-differential
//! pipeline: the two marketplace clients produce `Item`s, the matcher turns
//! them into `Pair`s, and the orchestrator publishes a `ResultSet`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which upstream marketplace a value came from or applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Marketplace {
    A,
    B,
}

impl Marketplace {
    pub fn as_str(self) -> &'static str {
        match self {
            Marketplace::A => "a",
            Marketplace::B => "b",
        }
    }
}

/// One listing as observed on a single marketplace.
///
/// `key` is the canonical cross-market identity string (`weapon | finish
/// (wear)`); it is unique per marketplace within a single refresh, and
/// `price` is the lowest asking price observed for that key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub key: String,
    pub display_name: String,
    pub price: Option<f64>,
    pub sell_count: Option<u64>,
    pub source_link: String,
    pub fetched_at: DateTime<Utc>,
}

/// How a `Pair` was joined across marketplaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    KeyExact,
    NameExact,
}

/// A matched cross-market record with its computed price differential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pair {
    pub key: String,
    pub display_name: String,
    pub price_a: f64,
    pub price_b: f64,
    pub diff: f64,
    pub margin: f64,
    pub buy_link: String,
    pub matched_by: MatchedBy,
    pub observed_at: DateTime<Utc>,
}

/// Ordered result of one refresh cycle.
///
/// Every pair satisfies the diff band and the A-price band that were active
/// when the refresh ran; pairs are sorted by descending margin, with diff
/// descending and key ascending as tiebreaks, and truncated to `max_output`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultSet {
    pub pairs: Vec<Pair>,
    pub built_at: Option<DateTime<Utc>>,
    pub key_exact_count: usize,
    pub name_exact_count: usize,
}

/// Constructs the deterministic buy-link for an A-side item identifier.
pub fn buy_link_for(a_item_key: &str) -> String {
    format!("https://market-a.example/item/{}", percent_escape(a_item_key))
}

/// Minimal percent-escape for the handful of reserved characters that show
/// up in canonical keys (`|`, parentheses, spaces). Avoids pulling in a
/// dedicated URL-encoding crate for a single call site.
fn percent_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_link_escapes_reserved_characters() {
        let link = buy_link_for("AWP | Chromatic Aberration (Minimal Wear)");
        assert!(link.starts_with("https://market-a.example/item/"));
        assert!(!link.contains(' '));
        assert!(!link.contains('|'));
    }
}
