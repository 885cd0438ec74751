//! Dual write of a record into the daily and dictionary views.

use chrono::NaiveDate;

use crate::error::{AppError, Result};
use crate::models::{Bucket, Record};
use crate::storage::{AppendOutcome, ArchiveStorage};

/// What a successful persist touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistReceipt {
    pub id: u64,
    pub date: NaiveDate,
    pub bucket: Bucket,
    pub daily: AppendOutcome,
    pub dictionary: AppendOutcome,
}

/// Writes a record to both views as one logical unit.
///
/// The daily file is written first. If the dictionary write then fails the
/// error is [`AppError::PartialWrite`]; the caller must not register the id,
/// and the next index rebuild copies the record across.
pub struct DualStorageWriter<'a> {
    storage: &'a dyn ArchiveStorage,
}

impl<'a> DualStorageWriter<'a> {
    pub fn new(storage: &'a dyn ArchiveStorage) -> Self {
        Self { storage }
    }

    /// Persist under the given UTC date.
    pub async fn persist(&self, record: &Record, date: NaiveDate) -> Result<PersistReceipt> {
        let bucket = record.bucket();

        let daily = self.storage.append_daily(date, record).await?;

        let dictionary = self
            .storage
            .append_dictionary(record)
            .await
            .map_err(|e| {
                AppError::partial_write(
                    record.id,
                    self.storage.daily_location(date),
                    self.storage.dictionary_location(bucket),
                    e,
                )
            })?;

        log::info!(
            "Persisted record id={} word={:?} date={} bucket={}",
            record.id,
            record.term,
            date,
            bucket
        );

        Ok(PersistReceipt {
            id: record.id,
            date,
            bucket,
            daily,
            dictionary,
        })
    }
}
