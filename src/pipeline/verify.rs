// src/pipeline/verify.rs

//! Cross-view consistency check and repair.
//!
//! Both views must hold exactly the same ids, each at most once. A crash
//! between the daily write and the dictionary write leaves an id in one view
//! only; repair copies it across. Nothing is ever removed, so duplicates are
//! reported but left for a human.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::Result;
use crate::models::Record;
use crate::storage::{AppendOutcome, ArchiveScan, ArchiveStorage};

/// Result of comparing the two views.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Records in the daily view
    pub daily_records: usize,
    /// Records in the dictionary view
    pub dictionary_records: usize,
    /// Ids stored more than once in the daily view
    pub daily_duplicates: Vec<u64>,
    /// Ids stored more than once in the dictionary view
    pub dictionary_duplicates: Vec<u64>,
    /// Ids in the daily view but not the dictionary
    pub missing_from_dictionary: Vec<u64>,
    /// Ids in the dictionary but not the daily view
    pub missing_from_daily: Vec<u64>,
}

impl ConsistencyReport {
    /// Both views hold the same ids, each once.
    pub fn is_consistent(&self) -> bool {
        self.daily_duplicates.is_empty()
            && self.dictionary_duplicates.is_empty()
            && !self.needs_repair()
    }

    /// Some id is present in one view only.
    pub fn needs_repair(&self) -> bool {
        !self.missing_from_dictionary.is_empty() || !self.missing_from_daily.is_empty()
    }

    /// Log the findings.
    pub fn log(&self) {
        if self.is_consistent() {
            log::info!(
                "Archive consistent: {} records in both views",
                self.daily_records
            );
            return;
        }
        if !self.daily_duplicates.is_empty() {
            log::error!("Duplicate ids in daily view: {:?}", self.daily_duplicates);
        }
        if !self.dictionary_duplicates.is_empty() {
            log::error!(
                "Duplicate ids in dictionary view: {:?}",
                self.dictionary_duplicates
            );
        }
        if !self.missing_from_dictionary.is_empty() {
            log::warn!(
                "Ids missing from dictionary: {:?}",
                self.missing_from_dictionary
            );
        }
        if !self.missing_from_daily.is_empty() {
            log::warn!("Ids missing from daily view: {:?}", self.missing_from_daily);
        }
    }
}

/// Ids that occur more than once, sorted.
fn duplicates<'a>(records: impl Iterator<Item = &'a Record>) -> (HashSet<u64>, Vec<u64>) {
    let mut seen = HashSet::new();
    let mut dupes = HashSet::new();
    for record in records {
        if !seen.insert(record.id) {
            dupes.insert(record.id);
        }
    }
    let mut dupes: Vec<u64> = dupes.into_iter().collect();
    dupes.sort_unstable();
    (seen, dupes)
}

fn sorted_difference(a: &HashSet<u64>, b: &HashSet<u64>) -> Vec<u64> {
    let mut ids: Vec<u64> = a.difference(b).copied().collect();
    ids.sort_unstable();
    ids
}

/// Compare the two views of a scan.
pub fn check(scan: &ArchiveScan) -> ConsistencyReport {
    let (daily_ids, daily_duplicates) = duplicates(scan.daily_records());
    let (dictionary_ids, dictionary_duplicates) = duplicates(scan.dictionary_records());

    ConsistencyReport {
        daily_records: scan.daily_records().count(),
        dictionary_records: scan.dictionary_records().count(),
        missing_from_dictionary: sorted_difference(&daily_ids, &dictionary_ids),
        missing_from_daily: sorted_difference(&dictionary_ids, &daily_ids),
        daily_duplicates,
        dictionary_duplicates,
    }
}

/// Copy one-sided records into the other view. Returns the number appended.
///
/// Records missing from the daily view are filed under `today`, the day the
/// repair observed them.
pub async fn repair(
    storage: &dyn ArchiveStorage,
    scan: &ArchiveScan,
    report: &ConsistencyReport,
    today: NaiveDate,
) -> Result<usize> {
    let daily: HashMap<u64, &Record> = scan.daily_records().map(|r| (r.id, r)).collect();
    let dictionary: HashMap<u64, &Record> =
        scan.dictionary_records().map(|r| (r.id, r)).collect();

    let mut repaired = 0;
    for id in &report.missing_from_dictionary {
        if let Some(record) = daily.get(id) {
            if storage.append_dictionary(record).await? == AppendOutcome::Appended {
                log::info!(
                    "Repaired record {} into {}",
                    id,
                    storage.dictionary_location(record.bucket())
                );
                repaired += 1;
            }
        }
    }
    for id in &report.missing_from_daily {
        if let Some(record) = dictionary.get(id) {
            if storage.append_daily(today, record).await? == AppendOutcome::Appended {
                log::info!(
                    "Repaired record {} into {}",
                    id,
                    storage.daily_location(today)
                );
                repaired += 1;
            }
        }
    }
    Ok(repaired)
}

/// Scan, report and optionally repair the archive.
pub async fn run_check(
    storage: &dyn ArchiveStorage,
    fix: bool,
    today: NaiveDate,
) -> Result<ConsistencyReport> {
    let scan = storage.scan().await?;
    let report = check(&scan);
    report.log();

    if fix && report.needs_repair() {
        let repaired = repair(storage, &scan, &report, today).await?;
        log::info!("Repaired {} records", repaired);
        let after = check(&storage.scan().await?);
        after.log();
        return Ok(after);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{day, sample_record};
    use crate::storage::LocalStorage;
    use tempfile::TempDir;

    async fn both(storage: &LocalStorage, record: &Record) {
        storage.append_daily(day(), record).await.unwrap();
        storage.append_dictionary(record).await.unwrap();
    }

    #[tokio::test]
    async fn consistent_archive() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        both(&storage, &sample_record(1, "rizz")).await;
        both(&storage, &sample_record(2, "123abc")).await;

        let report = check(&storage.scan().await.unwrap());
        assert!(report.is_consistent());
        assert_eq!(report.daily_records, 2);
        assert_eq!(report.dictionary_records, 2);
    }

    #[tokio::test]
    async fn detects_and_repairs_one_sided_records() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        both(&storage, &sample_record(1, "rizz")).await;
        storage
            .append_daily(day(), &sample_record(2, "yeet"))
            .await
            .unwrap();
        storage
            .append_dictionary(&sample_record(3, "bet"))
            .await
            .unwrap();

        let report = run_check(&storage, false, day()).await.unwrap();
        assert_eq!(report.missing_from_dictionary, vec![2]);
        assert_eq!(report.missing_from_daily, vec![3]);
        assert!(!report.is_consistent());

        let repaired_day = NaiveDate::from_ymd_opt(2025, 9, 10).unwrap();
        let report = run_check(&storage, true, repaired_day).await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.daily_records, 3);

        let scan = storage.scan().await.unwrap();
        let (date, records) = scan.daily.last().unwrap();
        assert_eq!(*date, repaired_day);
        assert_eq!(records[0].id, 3);
    }

    #[test]
    fn reports_duplicates_within_a_view() {
        let record = sample_record(5, "sus");
        let scan = ArchiveScan {
            daily: vec![
                (day(), vec![record.clone()]),
                (NaiveDate::from_ymd_opt(2025, 9, 10).unwrap(), vec![record.clone()]),
            ],
            dictionary: Vec::new(),
        };

        let report = check(&scan);
        assert_eq!(report.daily_duplicates, vec![5]);
        assert_eq!(report.missing_from_dictionary, vec![5]);
        assert!(!report.is_consistent());
    }
}
