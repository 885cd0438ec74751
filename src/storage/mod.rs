//! Storage abstractions for the definition archive.
//!
//! Two views over the same set of records:
//! - Daily: `data/YYYY-MM-DD.json` - records observed that UTC day, in arrival order
//! - Dictionary: `dictionary/{LETTER}.json` - `word -> [record]`, insertion ordered
//!
//! ## Directory Structure
//!
//! ```text
//! {root}/
//! ├── .seen_ids.json        # Seen-id sidecar (cache, rebuildable)
//! ├── .archiver.lock        # Single-writer lock
//! ├── data/
//! │   ├── 2025-09-09.json
//! │   └── 2025-09-10.json
//! └── dictionary/
//!     ├── 0.json            # Terms not starting with A-Z
//!     ├── A.json
//!     └── R.json
//! ```

pub mod local;
pub mod lock;

use async_trait::async_trait;
use chrono::NaiveDate;
use indexmap::IndexMap;

use crate::error::Result;
use crate::models::{Bucket, Record};
use crate::pipeline::SeenSidecar;

// Re-export for convenience
pub use local::LocalStorage;
pub use lock::ArchiveLock;

/// Contents of one dictionary file.
pub type TermMap = IndexMap<String, Vec<Record>>;

/// Outcome of appending a record to a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Record added and file replaced
    Appended,
    /// Id already present in that file; nothing written
    AlreadyPresent,
}

/// Full read of both views.
#[derive(Debug, Clone, Default)]
pub struct ArchiveScan {
    /// Daily files sorted by date
    pub daily: Vec<(NaiveDate, Vec<Record>)>,
    /// Dictionary files sorted by bucket
    pub dictionary: Vec<(Bucket, TermMap)>,
}

impl ArchiveScan {
    /// Every record in the daily view, in date then arrival order.
    pub fn daily_records(&self) -> impl Iterator<Item = &Record> {
        self.daily.iter().flat_map(|(_, records)| records.iter())
    }

    /// Every record in the dictionary view.
    pub fn dictionary_records(&self) -> impl Iterator<Item = &Record> {
        self.dictionary
            .iter()
            .flat_map(|(_, terms)| terms.values().flat_map(|records| records.iter()))
    }
}

/// Trait for archive storage backends.
#[async_trait]
pub trait ArchiveStorage: Send + Sync {
    /// Append a record to the daily file for `date`.
    async fn append_daily(&self, date: NaiveDate, record: &Record) -> Result<AppendOutcome>;

    /// Append a record under its term in its bucket's dictionary file.
    async fn append_dictionary(&self, record: &Record) -> Result<AppendOutcome>;

    /// Read both views in full.
    async fn scan(&self) -> Result<ArchiveScan>;

    /// Cheap digest of the archive files (names and sizes, no parsing).
    ///
    /// Appends always grow a file, so every pipeline write changes the
    /// digest. An outside edit that keeps a file's size does not; run
    /// `verify` or delete the sidecar after editing stores by hand.
    async fn fingerprint(&self) -> Result<String>;

    /// Load the seen-id sidecar, if any.
    async fn load_index(&self) -> Result<Option<SeenSidecar>>;

    /// Replace the seen-id sidecar.
    async fn save_index(&self, index: &SeenSidecar) -> Result<()>;

    /// Human-readable location of a daily file, for logs and errors.
    fn daily_location(&self, date: NaiveDate) -> String;

    /// Human-readable location of a dictionary file, for logs and errors.
    fn dictionary_location(&self, bucket: Bucket) -> String;
}
