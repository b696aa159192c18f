//! Runtime configuration (C8).
//!
//! Holds the mutable parameters that shape matching, output, fetch bounds,
//! pacing, and scheduler cadence. Mutating the diff band, A-price band, or
//! `max_output` invalidates the interesting-key cache (C5) — those three
//! parameters change what "interesting" means, so stale keys from before
//! the change can no longer be trusted by an incremental refresh.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::keycache::KeyCache;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeParams {
    pub diff_lo: f64,
    pub diff_hi: f64,
    pub price_lo: f64,
    pub price_hi: f64,
    pub max_output: usize,
    pub a_max_pages: u32,
    pub b_max_pages: u32,
    pub a_page_size: u32,
    pub b_page_size: u32,
    pub a_min_delay_secs: f64,
    pub b_min_delay_secs: f64,
    pub heavy_cadence_secs: u64,
    pub light_cadence_secs: u64,
}

impl Default for RuntimeParams {
    fn default() -> Self {
        Self {
            diff_lo: 3.0,
            diff_hi: 5.0,
            price_lo: 0.0,
            price_hi: f64::INFINITY,
            max_output: 300,
            a_max_pages: 100,
            b_max_pages: 50,
            a_page_size: 80,
            b_page_size: 100,
            a_min_delay_secs: 1.0,
            b_min_delay_secs: 3.0,
            heavy_cadence_secs: 3600,
            light_cadence_secs: 300,
        }
    }
}

impl RuntimeParams {
    pub fn a_min_delay(&self) -> Duration {
        Duration::from_secs_f64(self.a_min_delay_secs)
    }

    pub fn b_min_delay(&self) -> Duration {
        Duration::from_secs_f64(self.b_min_delay_secs)
    }

    pub fn heavy_cadence(&self) -> Duration {
        Duration::from_secs(self.heavy_cadence_secs)
    }

    pub fn light_cadence(&self) -> Duration {
        Duration::from_secs(self.light_cadence_secs)
    }
}

/// Subset of `RuntimeParams` accepted by the settings-mutation endpoints.
/// Every field is optional so a POST can patch just the fields it cares
/// about without the caller re-sending the whole object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeParamsPatch {
    pub diff_lo: Option<f64>,
    pub diff_hi: Option<f64>,
    pub price_lo: Option<f64>,
    pub price_hi: Option<f64>,
    pub max_output: Option<usize>,
    pub a_max_pages: Option<u32>,
    pub b_max_pages: Option<u32>,
    pub a_page_size: Option<u32>,
    pub b_page_size: Option<u32>,
    pub a_min_delay_secs: Option<f64>,
    pub b_min_delay_secs: Option<f64>,
    pub heavy_cadence_secs: Option<u64>,
    pub light_cadence_secs: Option<u64>,
}

fn validate(p: &RuntimeParams) -> Result<(), PipelineError> {
    if !(0.0 <= p.diff_lo && p.diff_lo <= p.diff_hi) {
        return Err(PipelineError::ValidationFailed(
            "diff band must satisfy 0 <= diff_lo <= diff_hi".into(),
        ));
    }
    if !(0.0 <= p.price_lo && p.price_lo <= p.price_hi) {
        return Err(PipelineError::ValidationFailed(
            "price band must satisfy 0 <= price_lo <= price_hi".into(),
        ));
    }
    if !(1..=10_000).contains(&p.max_output) {
        return Err(PipelineError::ValidationFailed(
            "max_output must be in 1..=10000".into(),
        ));
    }
    if p.a_max_pages < 1 || p.b_max_pages < 1 {
        return Err(PipelineError::ValidationFailed(
            "max_pages must be >= 1".into(),
        ));
    }
    if !(1..=200).contains(&p.a_page_size) || !(1..=200).contains(&p.b_page_size) {
        return Err(PipelineError::ValidationFailed(
            "page_size must be in 1..=200".into(),
        ));
    }
    if p.a_min_delay_secs < 0.0 || p.b_min_delay_secs < 0.0 {
        return Err(PipelineError::ValidationFailed(
            "min delay must be >= 0".into(),
        ));
    }
    if p.heavy_cadence_secs < 30 || p.light_cadence_secs < 30 {
        return Err(PipelineError::ValidationFailed(
            "cadences must be >= 30 seconds".into(),
        ));
    }
    Ok(())
}

/// Live, mutable configuration shared across the pipeline.
pub struct ConfigStore {
    params: RwLock<RuntimeParams>,
    key_cache: Arc<KeyCache>,
}

impl ConfigStore {
    pub fn new(initial: RuntimeParams, key_cache: Arc<KeyCache>) -> Self {
        Self {
            params: RwLock::new(initial),
            key_cache,
        }
    }

    pub fn get(&self) -> RuntimeParams {
        self.params.read().clone()
    }

    /// Applies a patch, validating the merged result before committing it.
    /// If the diff band, price band, or `max_output` actually changed,
    /// clears the interesting-key cache (spec's control edge C8 -> C5).
    pub fn apply_patch(&self, patch: RuntimeParamsPatch) -> Result<RuntimeParams, PipelineError> {
        let mut guard = self.params.write();
        let before = guard.clone();
        let mut next = before.clone();

        if let Some(v) = patch.diff_lo {
            next.diff_lo = v;
        }
        if let Some(v) = patch.diff_hi {
            next.diff_hi = v;
        }
        if let Some(v) = patch.price_lo {
            next.price_lo = v;
        }
        if let Some(v) = patch.price_hi {
            next.price_hi = v;
        }
        if let Some(v) = patch.max_output {
            next.max_output = v;
        }
        if let Some(v) = patch.a_max_pages {
            next.a_max_pages = v;
        }
        if let Some(v) = patch.b_max_pages {
            next.b_max_pages = v;
        }
        if let Some(v) = patch.a_page_size {
            next.a_page_size = v;
        }
        if let Some(v) = patch.b_page_size {
            next.b_page_size = v;
        }
        if let Some(v) = patch.a_min_delay_secs {
            next.a_min_delay_secs = v;
        }
        if let Some(v) = patch.b_min_delay_secs {
            next.b_min_delay_secs = v;
        }
        if let Some(v) = patch.heavy_cadence_secs {
            next.heavy_cadence_secs = v;
        }
        if let Some(v) = patch.light_cadence_secs {
            next.light_cadence_secs = v;
        }

        validate(&next)?;

        let filter_params_changed = before.diff_lo != next.diff_lo
            || before.diff_hi != next.diff_hi
            || before.price_lo != next.price_lo
            || before.price_hi != next.price_hi
            || before.max_output != next.max_output;

        *guard = next.clone();
        drop(guard);

        if filter_params_changed {
            self.key_cache.clear();
            tracing::info!("filter parameters changed; interesting-key cache invalidated");
        }

        Ok(next)
    }

    /// Convenience used directly by the `/price_range` endpoint.
    pub fn set_diff_band(&self, lo: f64, hi: f64) -> Result<RuntimeParams, PipelineError> {
        self.apply_patch(RuntimeParamsPatch {
            diff_lo: Some(lo),
            diff_hi: Some(hi),
            ..Default::default()
        })
    }

    /// Convenience used directly by the `/buff_price_range` endpoint.
    pub fn set_price_band(&self, lo: f64, hi: f64) -> Result<RuntimeParams, PipelineError> {
        self.apply_patch(RuntimeParamsPatch {
            price_lo: Some(lo),
            price_hi: Some(hi),
            ..Default::default()
        })
    }
}
