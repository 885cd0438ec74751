// src/pipeline/cycle.rs

//! One fetch -> deduplicate -> persist invocation.
//!
//! ```text
//! Idle -> Fetching -> Deduplicating -> Persisting -> Done
//!            \              \               \
//!             +-------------+---------------+--> Aborted
//! ```
//!
//! Nothing survives between invocations except the files. The index is
//! loaded at the start and an id is registered only after both store writes
//! succeeded.

use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{Config, Record};
use crate::pipeline::{DeduplicationIndex, DualStorageWriter, IndexSource, RetryPolicy};
use crate::services::RecordSource;
use crate::storage::ArchiveStorage;
use crate::utils::today_utc;

/// Run cycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Fetching,
    Deduplicating,
    Persisting,
    Done,
    Aborted,
}

/// Knobs for a run that do not belong to the retry policy.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Fetch rounds per run
    pub requests_per_run: usize,
    /// Pause between rounds
    pub request_delay: Duration,
    /// Deadline for all fetching in the run
    pub deadline: Duration,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            requests_per_run: config.run.requests_per_run.max(1),
            request_delay: Duration::from_millis(config.run.request_delay_ms),
            deadline: Duration::from_secs(config.retry.deadline_secs),
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Candidates returned by the source
    pub fetched: usize,
    /// Ids written in this run, in order
    pub persisted: Vec<u64>,
    /// Candidates already in the archive
    pub duplicates: usize,
    /// How the index was loaded
    pub index_source: IndexSource,
    /// Index size at the end of the run
    pub index_size: usize,
    /// Fetch rounds that failed and were skipped
    pub failed_rounds: usize,
}

impl RunSummary {
    /// Log the run summary.
    pub fn log(&self) {
        log::info!(
            "Run complete: fetched={} persisted={} duplicates={} failed_rounds={} index_size={} index_source={:?}",
            self.fetched,
            self.persisted.len(),
            self.duplicates,
            self.failed_rounds,
            self.index_size,
            self.index_source
        );
    }
}

/// A single invocation of the pipeline.
pub struct RunCycle<'a> {
    source: &'a dyn RecordSource,
    storage: &'a dyn ArchiveStorage,
    policy: RetryPolicy,
    options: RunOptions,
    cancel: CancellationToken,
    date: Option<NaiveDate>,
    state: CycleState,
}

impl<'a> RunCycle<'a> {
    pub fn new(source: &'a dyn RecordSource, storage: &'a dyn ArchiveStorage) -> Self {
        Self {
            source,
            storage,
            policy: RetryPolicy::default(),
            options: RunOptions::default(),
            cancel: CancellationToken::new(),
            date: None,
            state: CycleState::Idle,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Pin the daily bucket instead of reading the UTC clock.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Current state.
    pub fn state(&self) -> CycleState {
        self.state
    }

    fn transition(&mut self, next: CycleState) {
        if self.state != next {
            log::debug!("Run state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn today(&self) -> NaiveDate {
        self.date.unwrap_or_else(today_utc)
    }

    /// Execute the cycle. Any error leaves the state at `Aborted`.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let deadline = Instant::now() + self.options.deadline;
        match self.drive(deadline).await {
            Ok(summary) => {
                self.transition(CycleState::Done);
                summary.log();
                Ok(summary)
            }
            Err(e) => {
                self.transition(CycleState::Aborted);
                log::error!("Run aborted: kind={} error={}", e.kind(), e);
                Err(e)
            }
        }
    }

    async fn drive(&mut self, deadline: Instant) -> Result<RunSummary> {
        let (mut index, index_source) =
            DeduplicationIndex::load(self.storage, self.today()).await?;
        let mut summary = RunSummary {
            fetched: 0,
            persisted: Vec::new(),
            duplicates: 0,
            index_source,
            index_size: index.len(),
            failed_rounds: 0,
        };
        let rounds = self.options.requests_per_run;
        let mut last_error = None;

        for round in 0..rounds {
            if round > 0 {
                self.pause(deadline).await?;
            }

            self.transition(CycleState::Fetching);
            let batch = match self.fetch(deadline).await {
                Ok(batch) => batch,
                Err(e @ (AppError::Cancelled | AppError::DeadlineExceeded(_))) => {
                    return Err(e);
                }
                Err(e) => {
                    log::warn!(
                        "Fetch round {}/{} failed, skipping: kind={} error={}",
                        round + 1,
                        rounds,
                        e.kind(),
                        e
                    );
                    summary.failed_rounds += 1;
                    last_error = Some(e);
                    continue;
                }
            };
            summary.fetched += batch.len();

            for record in batch {
                self.transition(CycleState::Deduplicating);
                if index.contains(record.id) {
                    log::info!(
                        "Duplicate record id={} word={:?}, skipping",
                        record.id,
                        record.term
                    );
                    summary.duplicates += 1;
                    continue;
                }

                self.persist(&record).await?;
                index.register(record.id);
                summary.persisted.push(record.id);
            }
        }

        if summary.failed_rounds == rounds {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        summary.index_size = index.len();
        if !summary.persisted.is_empty() {
            if let Err(e) = index.save(self.storage).await {
                log::warn!("Failed to write seen-id sidecar: {}", e);
            }
        }
        Ok(summary)
    }

    async fn persist(&mut self, record: &Record) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        self.transition(CycleState::Persisting);
        DualStorageWriter::new(self.storage)
            .persist(record, self.today())
            .await?;
        Ok(())
    }

    async fn fetch(&self, deadline: Instant) -> Result<Vec<Record>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AppError::Cancelled),
            result = tokio::time::timeout_at(deadline, self.policy.fetch_with_retry(self.source)) => {
                result.unwrap_or_else(|_| Err(AppError::DeadlineExceeded(self.options.deadline)))
            }
        }
    }

    async fn pause(&self, deadline: Instant) -> Result<()> {
        if self.options.request_delay.is_zero() {
            return Ok(());
        }
        let wake = Instant::now() + self.options.request_delay;
        if wake >= deadline {
            return Err(AppError::DeadlineExceeded(self.options.deadline));
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AppError::Cancelled),
            _ = tokio::time::sleep_until(wake) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{FailingDictionary, ScriptedSource, day, sample_record};
    use crate::pipeline::verify;
    use crate::storage::LocalStorage;
    use tempfile::TempDir;

    fn fast_options(requests_per_run: usize) -> RunOptions {
        RunOptions {
            requests_per_run,
            request_delay: Duration::ZERO,
            deadline: Duration::from_secs(5),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1)).without_jitter()
    }

    #[tokio::test]
    async fn new_record_is_persisted_and_registered() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let source = ScriptedSource::new(vec![Ok(vec![sample_record(1, "rizz")])]);

        let mut cycle = RunCycle::new(&source, &storage)
            .with_policy(fast_policy())
            .with_date(day());
        let summary = cycle.run().await.unwrap();

        assert_eq!(cycle.state(), CycleState::Done);
        assert_eq!(summary.persisted, vec![1]);
        assert_eq!(summary.duplicates, 0);
        assert_eq!(summary.index_size, 1);
    }

    #[tokio::test]
    async fn duplicate_is_a_successful_no_op() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let record = sample_record(1, "rizz");

        let first = ScriptedSource::new(vec![Ok(vec![record.clone()])]);
        RunCycle::new(&first, &storage)
            .with_date(day())
            .run()
            .await
            .unwrap();
        let before = storage.fingerprint().await.unwrap();

        let second = ScriptedSource::new(vec![Ok(vec![record])]);
        let mut cycle = RunCycle::new(&second, &storage).with_date(day());
        let summary = cycle.run().await.unwrap();

        assert_eq!(cycle.state(), CycleState::Done);
        assert!(summary.persisted.is_empty());
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.index_source, IndexSource::Sidecar);
        assert_eq!(storage.fingerprint().await.unwrap(), before);
    }

    #[tokio::test]
    async fn duplicates_within_a_batch_are_written_once() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let source = ScriptedSource::new(vec![
            Ok(vec![sample_record(1, "rizz"), sample_record(2, "yeet")]),
            Ok(vec![sample_record(2, "yeet"), sample_record(1, "rizz")]),
        ]);

        let summary = RunCycle::new(&source, &storage)
            .with_options(fast_options(2))
            .with_date(day())
            .run()
            .await
            .unwrap();

        assert_eq!(summary.fetched, 4);
        assert_eq!(summary.persisted, vec![1, 2]);
        assert_eq!(summary.duplicates, 2);
        let report = verify::check(&storage.scan().await.unwrap());
        assert!(report.is_consistent());
        assert_eq!(report.daily_records, 2);
    }

    #[tokio::test]
    async fn fetch_failure_aborts_without_touching_storage() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let source = ScriptedSource::new(vec![Err(AppError::fatal(Some(403), "HTTP 403"))]);

        let mut cycle = RunCycle::new(&source, &storage)
            .with_policy(fast_policy())
            .with_date(day());
        let err = cycle.run().await.unwrap_err();

        assert!(matches!(err, AppError::Fatal { .. }));
        assert_eq!(cycle.state(), CycleState::Aborted);
        assert!(!tmp.path().join("data").exists());
        assert!(!tmp.path().join("dictionary").exists());
    }

    #[tokio::test]
    async fn exhausted_retries_abort() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let source = ScriptedSource::new(vec![
            Err(AppError::transient("HTTP 503")),
            Err(AppError::transient("HTTP 503")),
            Err(AppError::transient("HTTP 503")),
        ]);

        let err = RunCycle::new(&source, &storage)
            .with_policy(fast_policy())
            .with_date(day())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn partial_write_aborts_and_next_run_heals() {
        let tmp = TempDir::new().unwrap();
        let record = sample_record(1, "rizz");

        let failing = FailingDictionary::new(LocalStorage::new(tmp.path()));
        let source = ScriptedSource::new(vec![Ok(vec![record.clone()])]);
        let mut cycle = RunCycle::new(&source, &failing).with_date(day());
        let err = cycle.run().await.unwrap_err();
        assert!(matches!(err, AppError::PartialWrite { id: 1, .. }));
        assert_eq!(cycle.state(), CycleState::Aborted);

        let storage = LocalStorage::new(tmp.path());
        let source = ScriptedSource::new(vec![Ok(vec![record])]);
        let summary = RunCycle::new(&source, &storage)
            .with_date(day())
            .run()
            .await
            .unwrap();

        assert_eq!(summary.index_source, IndexSource::Rebuilt { repaired: 1 });
        assert_eq!(summary.duplicates, 1);
        let report = verify::check(&storage.scan().await.unwrap());
        assert!(report.is_consistent());
        assert_eq!(report.dictionary_records, 1);
    }

    #[tokio::test]
    async fn cancellation_aborts_without_writes() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let source = ScriptedSource::new(vec![Ok(vec![sample_record(1, "rizz")])]);
        let token = CancellationToken::new();
        token.cancel();

        let err = RunCycle::new(&source, &storage)
            .with_cancellation(token)
            .with_date(day())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Cancelled));
        assert!(!tmp.path().join("data").exists());
    }

    #[tokio::test]
    async fn deadline_bounds_the_fetch_phase() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let source = ScriptedSource::new(vec![
            Err(AppError::transient("timeout")),
            Ok(vec![sample_record(1, "rizz")]),
        ]);
        let slow = RetryPolicy::new(3, Duration::from_secs(10)).without_jitter();

        let err = RunCycle::new(&source, &storage)
            .with_policy(slow)
            .with_options(RunOptions {
                requests_per_run: 1,
                request_delay: Duration::ZERO,
                deadline: Duration::from_millis(50),
            })
            .with_date(day())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::DeadlineExceeded(_)));
        assert!(!tmp.path().join("data").exists());
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let source = ScriptedSource::new(vec![
            Err(AppError::transient("HTTP 503")),
            Ok(vec![sample_record(1, "rizz")]),
        ]);
        let slow = RetryPolicy::new(3, Duration::from_secs(30)).without_jitter();
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let mut cycle = RunCycle::new(&source, &storage)
            .with_policy(slow)
            .with_cancellation(token)
            .with_date(day());
        let err = cycle.run().await.unwrap_err();

        assert!(matches!(err, AppError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(source.calls(), 1);
        assert_eq!(cycle.state(), CycleState::Aborted);
        assert!(!tmp.path().join("data").exists());
    }

    #[tokio::test]
    async fn failed_round_is_skipped_when_others_succeed() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let source = ScriptedSource::new(vec![
            Ok(vec![sample_record(1, "rizz")]),
            Err(AppError::fatal(Some(404), "HTTP 404")),
            Ok(vec![sample_record(2, "yeet")]),
        ]);

        let summary = RunCycle::new(&source, &storage)
            .with_policy(fast_policy())
            .with_options(fast_options(3))
            .with_date(day())
            .run()
            .await
            .unwrap();

        assert_eq!(source.calls(), 3);
        assert_eq!(summary.persisted, vec![1, 2]);
        assert_eq!(summary.failed_rounds, 1);

        let sidecar = storage.load_index().await.unwrap().unwrap();
        assert_eq!(sidecar.ids, vec![1, 2]);
        assert_eq!(sidecar.fingerprint, storage.fingerprint().await.unwrap());
    }

    #[tokio::test]
    async fn every_round_failing_aborts() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let source = ScriptedSource::new(vec![
            Err(AppError::malformed("not JSON")),
            Err(AppError::fatal(Some(404), "HTTP 404")),
        ]);

        let mut cycle = RunCycle::new(&source, &storage)
            .with_policy(fast_policy())
            .with_options(fast_options(2))
            .with_date(day());
        let err = cycle.run().await.unwrap_err();

        assert!(matches!(err, AppError::Fatal { status: Some(404), .. }));
        assert_eq!(cycle.state(), CycleState::Aborted);
        assert!(!tmp.path().join("data").exists());
    }
}
