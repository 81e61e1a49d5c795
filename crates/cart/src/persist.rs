//! Local persistence of cart snapshots.
//!
//! One record per browser profile. The persisted record is also the unit of
//! cross-context communication: another tab writing the same profile bumps
//! `revision`, which the synchronizer detects and reconciles. Persistence is
//! best-effort; a failed write degrades to a warning, never a blocked cart.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sartoria_core::ProfileId;

use crate::error::StorageError;
use crate::types::{Address, AppliedPromo, CartState, LineItem};

/// The on-disk cart record for one browser profile.
///
/// `revision` and `updated_at` exist for cross-context change detection and
/// scalar last-write-wins merging; everything else mirrors the live
/// [`CartState`] minus derived totals (recomputed on load).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedCart {
    /// Monotonic per-profile write counter.
    pub revision: u64,
    /// Wall-clock time of the write, used for scalar LWW merging.
    pub updated_at: DateTime<Utc>,
    /// Line items.
    pub items: Vec<LineItem>,
    /// Applied promo, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promo: Option<AppliedPromo>,
    /// Shipping address, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<Address>,
    /// Last successful remote reconciliation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl PersistedCart {
    /// Snapshot the live state into a record at the given revision.
    #[must_use]
    pub fn from_state(state: &CartState, revision: u64) -> Self {
        Self {
            revision,
            updated_at: Utc::now(),
            items: state.items.clone(),
            promo: state.promo.clone(),
            shipping_address: state.shipping_address.clone(),
            last_synced_at: state.last_synced_at,
        }
    }
}

/// Storage backend for persisted cart records.
///
/// Implementations must be cheap to call from the mutation path: local
/// operations stay synchronous, so no network-backed implementations here.
pub trait CartStorage: Send + Sync {
    /// Load the record for a profile, `None` if none has been saved yet.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the record exists but cannot be read.
    fn load(&self, profile: &ProfileId) -> Result<Option<PersistedCart>, StorageError>;

    /// Write the record for a profile, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    fn save(&self, profile: &ProfileId, record: &PersistedCart) -> Result<(), StorageError>;
}

// =============================================================================
// JsonFileStorage
// =============================================================================

/// File-backed storage: one JSON file per profile under a directory.
///
/// Writes go through a temp file + rename so a crashed write never leaves a
/// half-written record behind.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    dir: PathBuf,
}

impl JsonFileStorage {
    /// Create storage rooted at `dir` (created lazily on first save).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, profile: &ProfileId) -> PathBuf {
        // Profile ids come from the embedding application; keep filenames tame.
        let safe: String = profile
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl CartStorage for JsonFileStorage {
    fn load(&self, profile: &ProfileId) -> Result<Option<PersistedCart>, StorageError> {
        let path = self.record_path(profile);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record = serde_json::from_slice(&bytes)?;
        Ok(Some(record))
    }

    fn save(&self, profile: &ProfileId, record: &PersistedCart) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.record_path(profile);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(record)?;
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

// =============================================================================
// MemoryStorage
// =============================================================================

/// In-memory storage, shared between clones.
///
/// Two stores constructed over clones of the same `MemoryStorage` see each
/// other's writes, which is exactly how tests simulate two browser tabs
/// sharing one persisted record.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    records: Arc<Mutex<HashMap<ProfileId, PersistedCart>>>,
}

impl MemoryStorage {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CartStorage for MemoryStorage {
    fn load(&self, profile: &ProfileId) -> Result<Option<PersistedCart>, StorageError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(profile).cloned())
    }

    fn save(&self, profile: &ProfileId, record: &PersistedCart) -> Result<(), StorageError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(profile.clone(), record.clone());
        Ok(())
    }
}
