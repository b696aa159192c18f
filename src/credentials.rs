//! Credential store (C1).
//!
//! Holds the late-bound authentication material for both marketplaces.
//! Credentials are read fresh by the rate-limited clients on every request
//! (see `client/mod.rs`) so an operator can rotate a token through the HTTP
//! facade without restarting anything. Mutations are serialized by a writer
//! lock; reads are a cheap clone of the live snapshot and never touch disk.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::models::Marketplace;

/// Named fields read by the clients when building a request. Not every
/// marketplace uses every field; `update` enforces the subset each requires.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamedFields {
    pub session_token: Option<String>,
    pub csrf_token: Option<String>,
    pub device_id: Option<String>,
    pub user_key: Option<String>,
    pub trace_id: Option<String>,
    pub authorization: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub fields: NamedFields,
    pub configured: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CredentialFile {
    market_a: CredentialRecord,
    market_b: CredentialRecord,
}

impl CredentialFile {
    fn get(&self, marketplace: Marketplace) -> &CredentialRecord {
        match marketplace {
            Marketplace::A => &self.market_a,
            Marketplace::B => &self.market_b,
        }
    }

    fn get_mut(&mut self, marketplace: Marketplace) -> &mut CredentialRecord {
        match marketplace {
            Marketplace::A => &mut self.market_a,
            Marketplace::B => &mut self.market_b,
        }
    }
}

/// Fields accepted by the update operation. Any subset may be supplied; a
/// `None` leaves the corresponding field untouched on the live record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NamedFieldsPatch {
    pub session_token: Option<String>,
    pub csrf_token: Option<String>,
    pub device_id: Option<String>,
    pub user_key: Option<String>,
    pub trace_id: Option<String>,
    pub authorization: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketplaceStatus {
    pub configured: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub session_token_set: bool,
    pub csrf_token_set: bool,
    pub device_id_set: bool,
    pub user_key_set: bool,
    pub trace_id_set: bool,
    pub authorization_set: bool,
}

pub struct CredentialStore {
    path: PathBuf,
    state: RwLock<CredentialFile>,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        let state = Self::load(&path).unwrap_or_default();
        Self {
            path,
            state: RwLock::new(state),
        }
    }

    fn load(path: &PathBuf) -> Option<CredentialFile> {
        let raw = fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw)
            .map_err(|e| warn!("credential store at {:?} is corrupt, starting fresh: {}", path, e))
            .ok()
    }

    /// Never blocks on I/O: a cheap clone of the in-memory snapshot.
    pub fn get(&self, marketplace: Marketplace) -> CredentialRecord {
        self.state.read().get(marketplace).clone()
    }

    pub fn status(&self) -> HashMap<&'static str, MarketplaceStatus> {
        let state = self.state.read();
        let mut out = HashMap::with_capacity(2);
        out.insert(Marketplace::A.as_str(), Self::status_of(&state.market_a));
        out.insert(Marketplace::B.as_str(), Self::status_of(&state.market_b));
        out
    }

    fn status_of(record: &CredentialRecord) -> MarketplaceStatus {
        MarketplaceStatus {
            configured: record.configured,
            last_updated: record.last_updated,
            session_token_set: record.fields.session_token.is_some(),
            csrf_token_set: record.fields.csrf_token.is_some(),
            device_id_set: record.fields.device_id.is_some(),
            user_key_set: record.fields.user_key.is_some(),
            trace_id_set: record.fields.trace_id.is_some(),
            authorization_set: record.fields.authorization.is_some(),
        }
    }

    /// Validates, merges, stamps `last_updated`, and persists the whole
    /// store atomically. The live record is left untouched if validation or
    /// the write fails.
    pub fn update(
        &self,
        marketplace: Marketplace,
        patch: NamedFieldsPatch,
        headers: Option<HashMap<String, String>>,
        cookies: Option<HashMap<String, String>>,
    ) -> Result<CredentialRecord, PipelineError> {
        let mut guard = self.state.write();
        let mut candidate = guard.get(marketplace).clone();

        if let Some(v) = patch.session_token {
            candidate.fields.session_token = Some(v);
        }
        if let Some(v) = patch.csrf_token {
            candidate.fields.csrf_token = Some(v);
        }
        if let Some(v) = patch.device_id {
            candidate.fields.device_id = Some(v);
        }
        if let Some(v) = patch.user_key {
            candidate.fields.user_key = Some(v);
        }
        if let Some(v) = patch.trace_id {
            candidate.fields.trace_id = Some(v);
        }
        if let Some(v) = patch.authorization {
            candidate.fields.authorization = Some(v);
        }
        if let Some(h) = headers {
            candidate.headers.extend(h);
        }
        if let Some(c) = cookies {
            candidate.cookies.extend(c);
        }

        Self::validate_required(marketplace, &candidate)?;

        candidate.configured = true;
        candidate.last_updated = Some(Utc::now());

        *guard.get_mut(marketplace) = candidate.clone();
        let snapshot = guard.clone();
        drop(guard);

        self.persist(&snapshot).map_err(|e| {
            PipelineError::PersistFailed(format!("failed to write credential store: {}", e))
        })?;

        info!(marketplace = marketplace.as_str(), "credentials updated");
        Ok(candidate)
    }

    fn validate_required(
        marketplace: Marketplace,
        candidate: &CredentialRecord,
    ) -> Result<(), PipelineError> {
        let blank = |v: &Option<String>| v.as_deref().map(str::trim).unwrap_or("").is_empty();

        match marketplace {
            Marketplace::A => {
                if blank(&candidate.fields.session_token) || blank(&candidate.fields.csrf_token) {
                    return Err(PipelineError::ValidationFailed(
                        "market A requires session_token and csrf_token".into(),
                    ));
                }
            }
            Marketplace::B => {
                if blank(&candidate.fields.device_id)
                    || blank(&candidate.fields.user_key)
                    || blank(&candidate.fields.authorization)
                {
                    return Err(PipelineError::ValidationFailed(
                        "market B requires device_id, user_key, and authorization".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn persist(&self, file: &CredentialFile) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(file)?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CredentialStore {
        CredentialStore::new(dir.path().join("credentials.json"))
    }

    #[test]
    fn update_then_get_returns_just_written_fields() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store
            .update(
                Marketplace::A,
                NamedFieldsPatch {
                    session_token: Some("sess-1".into()),
                    csrf_token: Some("csrf-1".into()),
                    ..Default::default()
                },
                None,
                None,
            )
            .unwrap();

        let record = store.get(Marketplace::A);
        assert_eq!(record.fields.session_token.as_deref(), Some("sess-1"));
        assert_eq!(record.fields.csrf_token.as_deref(), Some("csrf-1"));
        assert!(record.configured);
    }

    #[test]
    fn second_identical_update_only_changes_last_updated() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let patch = NamedFieldsPatch {
            session_token: Some("sess-1".into()),
            csrf_token: Some("csrf-1".into()),
            ..Default::default()
        };
        let first = store.update(Marketplace::A, patch.clone(), None, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = store.update(Marketplace::A, patch, None, None).unwrap();

        assert_eq!(first.fields.session_token, second.fields.session_token);
        assert_eq!(first.fields.csrf_token, second.fields.csrf_token);
        assert_ne!(first.last_updated, second.last_updated);
    }

    #[test]
    fn blank_required_field_is_rejected_and_leaves_record_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store
            .update(
                Marketplace::B,
                NamedFieldsPatch {
                    device_id: Some("dev-1".into()),
                    user_key: Some("uk-1".into()),
                    authorization: Some("auth-1".into()),
                    ..Default::default()
                },
                None,
                None,
            )
            .unwrap();

        let err = store
            .update(
                Marketplace::B,
                NamedFieldsPatch {
                    authorization: Some("   ".into()),
                    ..Default::default()
                },
                None,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::ValidationFailed(_)));

        let record = store.get(Marketplace::B);
        assert_eq!(record.fields.authorization.as_deref(), Some("auth-1"));
    }

    #[test]
    fn status_reports_populated_named_fields() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store
            .update(
                Marketplace::A,
                NamedFieldsPatch {
                    session_token: Some("sess-1".into()),
                    csrf_token: Some("csrf-1".into()),
                    ..Default::default()
                },
                None,
                None,
            )
            .unwrap();

        let status = store.status();
        let a = &status[Marketplace::A.as_str()];
        assert!(a.configured);
        assert!(a.session_token_set);
        assert!(a.csrf_token_set);
        assert!(!a.device_id_set);
    }
}
