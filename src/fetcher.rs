//! Catalogue fetcher (C3).
//!
//! Drives a single marketplace client across pages sequentially — the
//! client, not this module, owns concurrency, since the global pacing clock
//! has to see every request in order to hold its delay invariant.

use tracing::{debug, warn};

use crate::client::MarketClient;
use crate::error::PipelineError;
use crate::models::{Item, Marketplace};

#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub items: Vec<Item>,
    pub successful_pages: u32,
    pub failed_pages: u32,
    pub total_items: usize,
}

pub async fn fetch_catalogue(
    client: &dyn MarketClient,
    max_pages: u32,
    page_size: Option<u32>,
) -> FetchOutcome {
    let mut outcome = FetchOutcome::default();

    let first = match client.fetch_page(1, page_size).await {
        Ok(page) => page,
        Err(PipelineError::Cancelled) => {
            debug!("{}: fetch cancelled before first page", client.marketplace().as_str());
            return outcome;
        }
        Err(e) => {
            warn!("{}: first page failed: {}", client.marketplace().as_str(), e);
            outcome.failed_pages += 1;
            return outcome;
        }
    };

    let pages = first
        .advertised_total_pages
        .map(|advertised| advertised.min(max_pages))
        .unwrap_or(max_pages);

    // B never advertises a total page count, so an empty page is its only
    // end-of-stream signal. A does advertise one, and A's own price filter
    // can legitimately empty an interior page (every listing off-sale) while
    // more pages remain, so A must not treat an empty page as a stop rule.
    let stops_on_empty_page = client.marketplace() == Marketplace::B;

    let first_is_empty = first.items.is_empty();
    outcome.items.extend(first.items);
    outcome.successful_pages += 1;

    if first_is_empty && stops_on_empty_page {
        outcome.total_items = outcome.items.len();
        return outcome;
    }

    for page_index in 2..=pages {
        match client.fetch_page(page_index, page_size).await {
            Ok(page) => {
                let empty = page.items.is_empty();
                outcome.items.extend(page.items);
                outcome.successful_pages += 1;
                if empty && stops_on_empty_page {
                    break;
                }
            }
            Err(PipelineError::Cancelled) => {
                debug!(
                    "{}: cancelled at page {}, returning {} items collected so far",
                    client.marketplace().as_str(),
                    page_index,
                    outcome.items.len()
                );
                break;
            }
            Err(e) => {
                warn!("{}: page {} failed: {}", client.marketplace().as_str(), page_index, e);
                outcome.failed_pages += 1;
            }
        }
    }

    outcome.total_items = outcome.items.len();
    outcome
}
