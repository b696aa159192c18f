//! Scheduler (C7).
//!
//! A single periodic driver with two independently reconfigurable cadences:
//! heavy (full refresh) and light (incremental refresh). Each tick re-reads
//! its cadence from C8 rather than capturing it once at spawn time, so an
//! operator can change the schedule through `/settings` without a restart.

use std::sync::Arc;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::config::ConfigStore;
use crate::orchestrator::Orchestrator;

pub fn spawn(orchestrator: Arc<Orchestrator>, config: Arc<ConfigStore>) {
    tokio::spawn(heavy_loop(orchestrator.clone(), config.clone()));
    tokio::spawn(light_loop(orchestrator, config));
}

async fn heavy_loop(orchestrator: Arc<Orchestrator>, config: Arc<ConfigStore>) {
    let mut ticker = interval(config.get().heavy_cadence());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let cadence = config.get().heavy_cadence();
        if ticker.period() != cadence {
            ticker = interval(cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        if orchestrator.is_busy() {
            info!("heavy tick skipped: refresh already running");
            continue;
        }

        info!("heavy tick: starting full refresh");
        if let Err(e) = orchestrator.refresh_full().await {
            warn!("scheduled full refresh failed: {}", e);
        }
    }
}

async fn light_loop(orchestrator: Arc<Orchestrator>, config: Arc<ConfigStore>) {
    let mut ticker = interval(config.get().light_cadence());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let cadence = config.get().light_cadence();
        if ticker.period() != cadence {
            ticker = interval(cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        if orchestrator.is_busy() {
            info!("light tick skipped: refresh already running");
            continue;
        }

        info!("light tick: starting incremental refresh");
        if let Err(e) = orchestrator.refresh_incremental().await {
            warn!("scheduled incremental refresh failed: {}", e);
        }
    }
}
