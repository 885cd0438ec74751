//! Deduplication index over every persisted record id.
//!
//! The index is derived data. It is rebuilt from the stores whenever the
//! sidecar cache is missing or does not match the files on disk, and that
//! rebuild doubles as the recovery path after an interrupted dual write.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pipeline::verify;
use crate::storage::ArchiveStorage;

/// Sidecar format version for cache busting.
pub const SIDECAR_VERSION: u32 = 1;

/// Cached seen-id set, as written to `.seen_ids.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeenSidecar {
    /// Version for cache busting
    pub version: u32,
    /// Storage fingerprint at the time the sidecar was written
    pub fingerprint: String,
    /// Number of ids, checked against `ids.len()`
    pub count: usize,
    /// Sorted ids
    pub ids: Vec<u64>,
}

/// Where an index load got its ids from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    /// Sidecar matched the storage fingerprint
    Sidecar,
    /// Stores were scanned; `repaired` records were copied across views
    Rebuilt { repaired: usize },
}

/// In-memory set of persisted ids.
#[derive(Debug, Clone, Default)]
pub struct DeduplicationIndex {
    ids: HashSet<u64>,
}

impl DeduplicationIndex {
    /// Load the index, preferring a sidecar that matches the storage.
    pub async fn load(
        storage: &dyn ArchiveStorage,
        today: NaiveDate,
    ) -> Result<(Self, IndexSource)> {
        let fingerprint = storage.fingerprint().await?;

        match storage.load_index().await {
            Ok(Some(sidecar)) if sidecar.is_valid_for(&fingerprint) => {
                log::info!("Loaded {} seen ids from sidecar", sidecar.count);
                return Ok((Self::from_ids(sidecar.ids), IndexSource::Sidecar));
            }
            Ok(Some(_)) => log::warn!("Seen-id sidecar is stale, rebuilding from storage"),
            Ok(None) => log::info!("No seen-id sidecar, rebuilding from storage"),
            Err(e) => log::warn!("Seen-id sidecar unreadable ({}), rebuilding from storage", e),
        }

        let repaired = Self::repair_storage(storage, today).await?;
        let index = Self::rebuild(storage).await?;
        if let Err(e) = index.save(storage).await {
            log::warn!("Failed to write seen-id sidecar: {}", e);
        }
        log::info!("Rebuilt index with {} seen ids", index.len());
        Ok((index, IndexSource::Rebuilt { repaired }))
    }

    /// Bring the two views back in line before reading ids from them.
    async fn repair_storage(storage: &dyn ArchiveStorage, today: NaiveDate) -> Result<usize> {
        let scan = storage.scan().await?;
        let report = verify::check(&scan);
        if report.is_consistent() {
            return Ok(0);
        }
        report.log();
        verify::repair(storage, &scan, &report, today).await
    }

    /// Union of the ids of both stores.
    pub async fn rebuild(storage: &dyn ArchiveStorage) -> Result<Self> {
        let scan = storage.scan().await?;
        let ids = scan
            .daily_records()
            .chain(scan.dictionary_records())
            .map(|r| r.id);
        Ok(Self::from_ids(ids))
    }

    /// Build an index from known ids.
    pub fn from_ids(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Whether `id` has been persisted.
    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    /// Mark `id` as persisted. Returns false if it was already known.
    ///
    /// Call only after both store writes succeeded.
    pub fn register(&mut self, id: u64) -> bool {
        self.ids.insert(id)
    }

    /// Number of known ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no ids are known.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Snapshot for the sidecar, stamped with the current storage fingerprint.
    pub fn to_sidecar(&self, fingerprint: String) -> SeenSidecar {
        let mut ids: Vec<u64> = self.ids.iter().copied().collect();
        ids.sort_unstable();
        SeenSidecar {
            version: SIDECAR_VERSION,
            fingerprint,
            count: ids.len(),
            ids,
        }
    }

    /// Write the sidecar for the current storage state.
    pub async fn save(&self, storage: &dyn ArchiveStorage) -> Result<()> {
        let fingerprint = storage.fingerprint().await?;
        storage.save_index(&self.to_sidecar(fingerprint)).await
    }
}

impl SeenSidecar {
    fn is_valid_for(&self, fingerprint: &str) -> bool {
        self.version == SIDECAR_VERSION
            && self.fingerprint == fingerprint
            && self.count == self.ids.len()
    }
}
