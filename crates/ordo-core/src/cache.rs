//! Durable run state
//!
//! - [`AddressCache`]: unit name to address, plus the `stage` cursor
//!   (`deploy-cache.json`)
//! - [`UpgradeSuccessCache`]: units already upgraded (`upgrade-cache.json`)
//! - [`write_pending_transactions`]: multisig payloads left for manual
//!   signing (`transactions.json`, overwritten every upgrade run)
//!
//! All writes go through the artifact store's atomic temp-then-rename.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ordo_artifact::{write_json_atomic, Address};
use ordo_ledger::PendingTransaction;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// A cache entry: a bare address or an `{ "address": ... }` record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CachedAddress {
    Plain(Address),
    Record { address: Address },
}

impl CachedAddress {
    #[inline]
    #[must_use]
    pub const fn address(&self) -> Address {
        match self {
            Self::Plain(a) | Self::Record { address: a } => *a,
        }
    }
}

/// Unit addresses and the last completed configuration stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressCache {
    #[serde(default)]
    stage: u32,

    #[serde(flatten)]
    entries: BTreeMap<String, CachedAddress>,
}

impl AddressCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Address> {
        self.entries.get(name).map(CachedAddress::address)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Record a deployed unit
    pub fn insert(&mut self, name: impl Into<String>, address: Address) {
        self.entries.insert(name.into(), CachedAddress::Plain(address));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unit names with their addresses, sorted by name
    pub fn iter(&self) -> impl Iterator<Item = (&str, Address)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.address()))
    }

    #[inline]
    #[must_use]
    pub const fn stage(&self) -> u32 {
        self.stage
    }

    /// Move the cursor forward to `stage`; never moves it backwards
    ///
    /// Returns whether the cursor moved.
    pub fn advance_stage(&mut self, stage: u32) -> bool {
        if stage > self.stage {
            self.stage = stage;
            true
        } else {
            false
        }
    }

    /// Load from `path`; a missing file is an empty cache
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        load_json_or_default(path)
    }

    /// Atomically persist to `path`
    ///
    /// # Errors
    /// Returns error if the write fails
    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        write_json_atomic(path, self)?;
        Ok(())
    }
}

/// Address cache shared between the pipeline and the interrupt guard
#[derive(Debug, Clone)]
pub struct SharedAddressCache {
    inner: Arc<Mutex<AddressCache>>,
    path: PathBuf,
}

impl SharedAddressCache {
    #[must_use]
    pub fn new(cache: AddressCache, path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(cache)),
            path: path.into(),
        }
    }

    /// Load the cache file at `path`
    ///
    /// # Errors
    /// Returns error if the file exists but is unreadable
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let cache = AddressCache::load(&path)?;
        if cache.is_empty() {
            tracing::info!("Starting with an empty address cache at {}", path.display());
        } else {
            tracing::info!(
                "Resuming from {} with {} units at stage {}",
                path.display(),
                cache.len(),
                cache.stage()
            );
        }
        Ok(Self::new(cache, path))
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Address> {
        self.inner.lock().get(name)
    }

    #[must_use]
    pub fn stage(&self) -> u32 {
        self.inner.lock().stage()
    }

    /// Copy of the current state
    #[must_use]
    pub fn snapshot(&self) -> AddressCache {
        self.inner.lock().clone()
    }

    /// Record a unit only in memory
    pub fn insert(&self, name: &str, address: Address) {
        self.inner.lock().insert(name, address);
    }

    /// Record a newly deployed unit and persist immediately
    ///
    /// # Errors
    /// Returns error if the write fails; the in-memory entry is kept
    pub fn record(&self, name: &str, address: Address) -> Result<(), CacheError> {
        let snapshot = {
            let mut cache = self.inner.lock();
            cache.insert(name, address);
            cache.clone()
        };
        snapshot.save(&self.path)
    }

    /// Advance the stage cursor and persist
    ///
    /// # Errors
    /// Returns error if the write fails
    pub fn complete_stage(&self, stage: u32) -> Result<(), CacheError> {
        let snapshot = {
            let mut cache = self.inner.lock();
            if !cache.advance_stage(stage) {
                return Ok(());
            }
            cache.clone()
        };
        snapshot.save(&self.path)
    }

    /// Write the current state to disk
    ///
    /// # Errors
    /// Returns error if the write fails
    pub fn flush(&self) -> Result<(), CacheError> {
        self.snapshot().save(&self.path)
    }
}

/// Units whose upgrade has already succeeded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpgradeSuccessCache {
    done: BTreeMap<String, bool>,
}

impl UpgradeSuccessCache {
    /// Load from `path`; a missing file is an empty cache
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        load_json_or_default(path)
    }

    /// # Errors
    /// Returns error if the write fails
    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        write_json_atomic(path, self)?;
        Ok(())
    }

    #[must_use]
    pub fn is_done(&self, unit: &str) -> bool {
        self.done.get(unit).copied().unwrap_or(false)
    }

    pub fn mark_done(&mut self, unit: &str) {
        self.done.insert(unit.to_string(), true);
    }
}

/// Overwrite `path` with the pending transactions of this run
///
/// # Errors
/// Returns error if the write fails
pub fn write_pending_transactions(path: &Path, transactions: &[PendingTransaction]) -> Result<(), CacheError> {
    write_json_atomic(path, transactions)?;
    tracing::info!("Wrote {} pending transactions to {}", transactions.len(), path.display());
    Ok(())
}

/// Read pending transactions written by an earlier run
///
/// # Errors
/// Returns error if the file exists but cannot be read or parsed
pub fn read_pending_transactions(path: &Path) -> Result<Vec<PendingTransaction>, CacheError> {
    load_json_or_default(path)
}

fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, CacheError> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(CacheError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&raw).map_err(|source| CacheError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_entry_shapes_and_stage() {
        let cache: AddressCache = serde_json::from_str(
            r#"{
                "stage": 7,
                "DIDRegistry": "0x0000000000000000000000000000000000000001",
                "NFT1155Upgradeable": {"address": "0x0000000000000000000000000000000000000002"}
            }"#,
        )
        .unwrap();
        assert_eq!(cache.stage(), 7);
        assert_eq!(cache.get("DIDRegistry"), Some(Address::new({
            let mut a = [0; 20];
            a[19] = 1;
            a
        })));
        assert!(cache.get("NFT1155Upgradeable").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn stage_only_moves_forward() {
        let mut cache = AddressCache::new();
        assert!(cache.advance_stage(3));
        assert!(!cache.advance_stage(2));
        assert!(!cache.advance_stage(3));
        assert_eq!(cache.stage(), 3);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AddressCache::load(&dir.path().join("deploy-cache.json")).unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.stage(), 0);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy-cache.json");
        std::fs::write(&path, b"[1,2").unwrap();
        assert!(matches!(AddressCache::load(&path), Err(CacheError::Parse { .. })));
    }

    #[test]
    fn shared_cache_persists_each_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy-cache.json");
        let shared = SharedAddressCache::open(&path).unwrap();
        shared.record("A", Address::new([1; 20])).unwrap();
        shared.complete_stage(2).unwrap();

        let reloaded = AddressCache::load(&path).unwrap();
        assert_eq!(reloaded.get("A"), Some(Address::new([1; 20])));
        assert_eq!(reloaded.stage(), 2);
    }

    #[test]
    fn upgrade_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upgrade-cache.json");
        let mut cache = UpgradeSuccessCache::load(&path).unwrap();
        assert!(!cache.is_done("DIDRegistry"));
        cache.mark_done("DIDRegistry");
        cache.save(&path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"DIDRegistry\": true"));
        assert!(UpgradeSuccessCache::load(&path).unwrap().is_done("DIDRegistry"));
    }
}
