//! Local filesystem storage implementation.
//!
//! Every file update is read-modify-write followed by write-to-temp and an
//! atomic rename, so a reader (or a crashed run) never observes a
//! half-written JSON document.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{Bucket, Record, StorageConfig};
use crate::pipeline::SeenSidecar;
use crate::storage::{AppendOutcome, ArchiveScan, ArchiveStorage, TermMap};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
    data_dir: String,
    dictionary_dir: String,
    index_file: String,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory with the
    /// default layout.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self::from_config(&StorageConfig::rooted(root_dir))
    }

    /// Create a LocalStorage from the storage section of the config.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            root_dir: config.root.clone(),
            data_dir: config.data_dir.clone(),
            dictionary_dir: config.dictionary_dir.clone(),
            index_file: config.index_file.clone(),
        }
    }

    /// Root directory of the archive.
    pub fn root(&self) -> &PathBuf {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    ///
    /// A file that exists but does not parse is an error naming the file;
    /// overwriting it with a fresh document would lose archived records.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| AppError::validation(format!("corrupt archive file {key}: {e}"))),
            None => Ok(None),
        }
    }

    /// Daily key for a given date.
    fn daily_key(&self, date: NaiveDate) -> String {
        format!("{}/{}.json", self.data_dir, date.format(DATE_FORMAT))
    }

    /// Dictionary key for a given bucket.
    fn dictionary_key(&self, bucket: Bucket) -> String {
        format!("{}/{}.json", self.dictionary_dir, bucket.file_stem())
    }

    /// List `*.json` files in a directory as `(stem, size)`, sorted by stem.
    ///
    /// A missing directory is an empty archive, not an error.
    async fn list_json(&self, dir: &str) -> Result<Vec<(String, u64)>> {
        let mut entries = match tokio::fs::read_dir(self.path(dir)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                files.push((stem.to_string(), metadata.len()));
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl ArchiveStorage for LocalStorage {
    async fn append_daily(&self, date: NaiveDate, record: &Record) -> Result<AppendOutcome> {
        let key = self.daily_key(date);
        let mut records: Vec<Record> = self.read_json(&key).await?.unwrap_or_default();

        if records.iter().any(|r| r.id == record.id) {
            log::debug!("Record {} already in {}", record.id, key);
            return Ok(AppendOutcome::AlreadyPresent);
        }

        records.push(record.clone());
        self.write_json(&key, &records).await?;
        log::debug!("Daily: {} records in {}", records.len(), key);
        Ok(AppendOutcome::Appended)
    }

    async fn append_dictionary(&self, record: &Record) -> Result<AppendOutcome> {
        let key = self.dictionary_key(record.bucket());
        let mut terms: TermMap = self.read_json(&key).await?.unwrap_or_default();

        let present = terms
            .values()
            .flat_map(|entries| entries.iter())
            .any(|r| r.id == record.id);
        if present {
            log::debug!("Record {} already in {}", record.id, key);
            return Ok(AppendOutcome::AlreadyPresent);
        }

        terms
            .entry(record.term.clone())
            .or_default()
            .push(record.clone());
        self.write_json(&key, &terms).await?;
        log::debug!("Dictionary: {} terms in {}", terms.len(), key);
        Ok(AppendOutcome::Appended)
    }

    async fn scan(&self) -> Result<ArchiveScan> {
        let mut scan = ArchiveScan::default();

        for (stem, _) in self.list_json(&self.data_dir).await? {
            let Ok(date) = NaiveDate::parse_from_str(&stem, DATE_FORMAT) else {
                log::warn!("Ignoring unexpected file {}/{}.json", self.data_dir, stem);
                continue;
            };
            let records: Vec<Record> = self
                .read_json(&self.daily_key(date))
                .await?
                .unwrap_or_default();
            scan.daily.push((date, records));
        }

        for (stem, _) in self.list_json(&self.dictionary_dir).await? {
            let Some(bucket) = Bucket::from_file_stem(&stem) else {
                log::warn!(
                    "Ignoring unexpected file {}/{}.json",
                    self.dictionary_dir,
                    stem
                );
                continue;
            };
            let terms: TermMap = self
                .read_json(&self.dictionary_key(bucket))
                .await?
                .unwrap_or_default();
            scan.dictionary.push((bucket, terms));
        }

        scan.daily.sort_by_key(|(date, _)| *date);
        scan.dictionary.sort_by_key(|(bucket, _)| *bucket);
        Ok(scan)
    }

    /// SHA-256 over `dir/stem.json:size` lines, sorted by name.
    async fn fingerprint(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        for dir in [&self.data_dir, &self.dictionary_dir] {
            for (stem, size) in self.list_json(dir).await? {
                hasher.update(format!("{dir}/{stem}.json:{size}\n").as_bytes());
            }
        }
        Ok(hex::encode(hasher.finalize()))
    }

    async fn load_index(&self) -> Result<Option<SeenSidecar>> {
        self.read_json(&self.index_file).await
    }

    async fn save_index(&self, index: &SeenSidecar) -> Result<()> {
        self.write_json(&self.index_file, index).await
    }

    fn daily_location(&self, date: NaiveDate) -> String {
        self.path(&self.daily_key(date)).display().to_string()
    }

    fn dictionary_location(&self, bucket: Bucket) -> String {
        self.path(&self.dictionary_key(bucket)).display().to_string()
    }
}
