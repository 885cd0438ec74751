//! Pipeline entry points for archiver operations.
//!
//! - `run_archiver`: One fetch -> deduplicate -> persist cycle
//! - `run_verify`: Cross-view consistency check, optionally repairing
//! - `run_info`: Archive summary

pub mod cycle;
pub mod index;
pub mod persist;
pub mod retry;
pub mod verify;

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::Config;
use crate::services::HttpFetcher;
use crate::storage::{ArchiveLock, ArchiveStorage, LocalStorage};
use crate::utils::today_utc;

pub use cycle::{CycleState, RunCycle, RunOptions, RunSummary};
pub use index::{DeduplicationIndex, IndexSource, SIDECAR_VERSION, SeenSidecar};
pub use persist::{DualStorageWriter, PersistReceipt};
pub use retry::RetryPolicy;
pub use verify::ConsistencyReport;

/// Run one archiving cycle against the configured endpoint and storage.
///
/// Holds the archive lock for the whole cycle.
pub async fn run_archiver(config: &Config, cancel: CancellationToken) -> Result<RunSummary> {
    let _lock = ArchiveLock::acquire(config.storage.lock_path())?;

    let fetcher = HttpFetcher::new(&config.api)?;
    let storage = LocalStorage::from_config(&config.storage);
    log::info!(
        "Archiving from {} into {}",
        fetcher.endpoint(),
        storage.root().display()
    );

    RunCycle::new(&fetcher, &storage)
        .with_policy(RetryPolicy::from_config(&config.retry))
        .with_options(RunOptions::from_config(config))
        .with_cancellation(cancel)
        .run()
        .await
}

/// Check both views and optionally repair one-sided records.
pub async fn run_verify(config: &Config, repair: bool) -> Result<ConsistencyReport> {
    let _lock = ArchiveLock::acquire(config.storage.lock_path())?;
    let storage = LocalStorage::from_config(&config.storage);

    let report = verify::run_check(&storage, repair, today_utc()).await?;
    if repair {
        // Stores may have changed; refresh the cache so the next run takes the fast path.
        DeduplicationIndex::rebuild(&storage).await?.save(&storage).await?;
    }
    Ok(report)
}

/// Counts reported by `run_info`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub days: usize,
    pub daily_records: usize,
    pub buckets: usize,
    pub terms: usize,
    pub unique_ids: usize,
    pub sidecar_fresh: bool,
}

/// Summarize the archive.
pub async fn run_info(config: &Config) -> Result<ArchiveInfo> {
    let storage = LocalStorage::from_config(&config.storage);
    archive_info(&storage).await
}

async fn archive_info(storage: &dyn ArchiveStorage) -> Result<ArchiveInfo> {
    let scan = storage.scan().await?;
    let fingerprint = storage.fingerprint().await?;
    let sidecar_fresh = matches!(
        storage.load_index().await,
        Ok(Some(sidecar)) if sidecar.fingerprint == fingerprint
    );

    let unique_ids: HashSet<u64> = scan
        .daily_records()
        .chain(scan.dictionary_records())
        .map(|r| r.id)
        .collect();

    let info = ArchiveInfo {
        days: scan.daily.len(),
        daily_records: scan.daily_records().count(),
        buckets: scan.dictionary.len(),
        terms: scan.dictionary.iter().map(|(_, terms)| terms.len()).sum(),
        unique_ids: unique_ids.len(),
        sidecar_fresh,
    };

    log::info!(
        "Daily view: {} days, {} records",
        info.days,
        info.daily_records
    );
    log::info!(
        "Dictionary view: {} buckets, {} terms",
        info.buckets,
        info.terms
    );
    log::info!(
        "Unique ids: {} (sidecar {})",
        info.unique_ids,
        if info.sidecar_fresh { "fresh" } else { "stale or missing" }
    );
    Ok(info)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for pipeline tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone, Utc};

    use crate::error::{AppError, Result};
    use crate::models::{Bucket, Record};
    use crate::services::RecordSource;
    use crate::storage::{AppendOutcome, ArchiveScan, ArchiveStorage, LocalStorage};

    use super::SeenSidecar;

    pub fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 9).unwrap()
    }

    pub fn sample_record(id: u64, term: &str) -> Record {
        Record {
            id,
            term: term.to_string(),
            body: format!("definition of {term}"),
            usage_example: format!("an example using {term}"),
            submitted_at: Utc.with_ymd_and_hms(2025, 9, 9, 21, 31, 0).unwrap(),
        }
    }

    /// Replays a fixed list of fetch results, one per call.
    pub struct ScriptedSource {
        script: Mutex<VecDeque<Result<Vec<Record>>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        pub fn new(script: Vec<Result<Vec<Record>>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RecordSource for ScriptedSource {
        async fn fetch_batch(&self) -> Result<Vec<Record>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AppError::fatal(None, "script exhausted")))
        }
    }

    /// Local storage whose dictionary writes always fail.
    pub struct FailingDictionary {
        inner: LocalStorage,
    }

    impl FailingDictionary {
        pub fn new(inner: LocalStorage) -> Self {
            Self { inner }
        }
    }

    #[async_trait]
    impl ArchiveStorage for FailingDictionary {
        async fn append_daily(&self, date: NaiveDate, record: &Record) -> Result<AppendOutcome> {
            self.inner.append_daily(date, record).await
        }

        async fn append_dictionary(&self, _record: &Record) -> Result<AppendOutcome> {
            Err(AppError::Io(std::io::Error::other("no space left on device")))
        }

        async fn scan(&self) -> Result<ArchiveScan> {
            self.inner.scan().await
        }

        async fn fingerprint(&self) -> Result<String> {
            self.inner.fingerprint().await
        }

        async fn load_index(&self) -> Result<Option<SeenSidecar>> {
            self.inner.load_index().await
        }

        async fn save_index(&self, index: &SeenSidecar) -> Result<()> {
            self.inner.save_index(index).await
        }

        fn daily_location(&self, date: NaiveDate) -> String {
            self.inner.daily_location(date)
        }

        fn dictionary_location(&self, bucket: Bucket) -> String {
            self.inner.dictionary_location(bucket)
        }
    }
}
