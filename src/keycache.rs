//! Interesting-key cache (C5).
//!
//! An on-disk set of canonical keys that previously satisfied the active
//! filters, plus the timestamp of the full refresh that built it. The
//! incremental refresh mode uses this set to decide which A-side items are
//! still worth revisiting; it is emptied whenever a filter parameter changes
//! (wired through `ConfigStore`) and rebuilt at the end of every full
//! refresh.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedState {
    keys: HashSet<String>,
    last_built_at: Option<DateTime<Utc>>,
}

pub struct KeyCache {
    path: PathBuf,
    state: RwLock<PersistedState>,
}

impl KeyCache {
    pub fn new(path: PathBuf) -> Self {
        let state = Self::load(&path).unwrap_or_default();
        Self {
            path,
            state: RwLock::new(state),
        }
    }

    fn load(path: &PathBuf) -> Option<PersistedState> {
        let raw = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("interesting-key cache at {:?} is corrupt, starting empty: {}", path, e);
                None
            }
        }
    }

    /// Snapshot of the current key set.
    pub fn get_keys(&self) -> HashSet<String> {
        self.state.read().keys.clone()
    }

    pub fn last_built_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_built_at
    }

    /// Overwrites both fields and persists atomically (write-to-temp, then
    /// rename) so a crash mid-write never leaves a half-written file.
    pub fn replace(&self, keys: HashSet<String>) {
        let state = PersistedState {
            keys,
            last_built_at: Some(Utc::now()),
        };

        if let Err(e) = self.persist(&state) {
            warn!("failed to persist interesting-key cache: {}", e);
        }

        *self.state.write() = state;
    }

    /// Empties both fields and deletes the backing file. Called whenever a
    /// filter parameter (diff band, price band, output cap) changes.
    pub fn clear(&self) {
        *self.state.write() = PersistedState::default();
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("interesting-key cache file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove interesting-key cache file: {}", e),
        }
    }

    fn persist(&self, state: &PersistedState) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string(state)?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, &self.path)?;

        info!(
            "interesting-key cache saved: {} keys at {:?}",
            state.keys.len(),
            self.path
        );
        Ok(())
    }
}
