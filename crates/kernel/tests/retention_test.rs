#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Job log retention sweep tests.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Map;
use uuid::Uuid;

use datacat_kernel::jobs::{Job, JobRun};
use datacat_kernel::joblog::{JobTag, LogEntry, LogLevel, LogRecord, LogRetentionSweeper, RetentionPolicy};
use datacat_kernel::store::{JobStore, MemoryStore, StoreError};

/// Create a job with one run and return its tag.
async fn seed_run(store: &dyn JobStore) -> JobTag {
    let job = Job::new("test.jobs:noop", Vec::new(), Map::new());
    store.insert_job(&job).await.unwrap();
    let run = JobRun::started(job.id);
    store.insert_run(&run).await.unwrap();
    JobTag {
        job_id: job.id,
        job_run_id: run.id,
    }
}

/// Insert a record `age_days` old and return its message.
async fn seed_log(
    store: &dyn JobStore,
    tag: JobTag,
    now: DateTime<Utc>,
    level: LogLevel,
    age_days: i64,
) -> String {
    let message = format!("{level} {age_days}d");
    let record = LogEntry::new(level, message.clone())
        .into_record(tag, now - TimeDelta::days(age_days));
    store.insert_log(&record).await.unwrap();
    message
}

async fn remaining(store: &dyn JobStore, tag: JobTag) -> Vec<String> {
    store
        .list_logs(tag.job_run_id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.message)
        .collect()
}

#[tokio::test]
async fn test_default_policy_sweeps_per_level() {
    let store = Arc::new(MemoryStore::new());
    let tag = seed_run(&*store).await;
    let now = Utc::now();

    seed_log(&*store, tag, now, LogLevel::Debug, 20).await;
    seed_log(&*store, tag, now, LogLevel::Info, 40).await;
    seed_log(&*store, tag, now, LogLevel::Error, 200).await;
    let error = seed_log(&*store, tag, now, LogLevel::Error, 100).await;
    let fresh_debug = seed_log(&*store, tag, now, LogLevel::Debug, 1).await;

    let sweeper = LogRetentionSweeper::new(store.clone(), RetentionPolicy::default());
    let report = sweeper.cleanup_at(now).await;

    assert!(report.is_clean());
    assert_eq!(report.total(), 3);
    assert!(report.deleted.contains(&(LogLevel::Debug, 1)));
    assert!(report.deleted.contains(&(LogLevel::Info, 1)));
    assert!(report.deleted.contains(&(LogLevel::Error, 1)));
    assert_eq!(remaining(&*store, tag).await, vec![error, fresh_debug]);
}

#[tokio::test]
async fn test_global_cap_applies_to_every_level() {
    let store = Arc::new(MemoryStore::new());
    let tag = seed_run(&*store).await;
    let now = Utc::now();

    seed_log(&*store, tag, now, LogLevel::Critical, 400).await;
    let kept = seed_log(&*store, tag, now, LogLevel::Critical, 100).await;

    // Critical keeps 180 days, but nothing outlives the global cap.
    let policy = RetentionPolicy::default().with_level(LogLevel::Critical, TimeDelta::days(1000));
    let sweeper = LogRetentionSweeper::new(store.clone(), policy);
    let report = sweeper.cleanup_at(now).await;

    assert_eq!(report.expired, 1);
    assert_eq!(remaining(&*store, tag).await, vec![kept]);
}

#[tokio::test]
async fn test_global_only_policy() {
    let store = Arc::new(MemoryStore::new());
    let tag = seed_run(&*store).await;
    let now = Utc::now();

    seed_log(&*store, tag, now, LogLevel::Debug, 11).await;
    let kept = seed_log(&*store, tag, now, LogLevel::Debug, 9).await;

    let sweeper = LogRetentionSweeper::new(store.clone(), RetentionPolicy::global_only(TimeDelta::days(10)));
    let report = sweeper.cleanup_at(now).await;

    assert!(report.deleted.is_empty());
    assert_eq!(report.expired, 1);
    assert_eq!(remaining(&*store, tag).await, vec![kept]);
}

#[tokio::test]
async fn test_sweep_leaves_runs_and_jobs() {
    let store = Arc::new(MemoryStore::new());
    let tag = seed_run(&*store).await;
    let now = Utc::now();
    seed_log(&*store, tag, now, LogLevel::Info, 500).await;

    let sweeper = LogRetentionSweeper::new(store.clone(), RetentionPolicy::default());
    sweeper.cleanup_old_messages().await;

    assert_eq!(store.log_count(), 0);
    assert!(store.get_run(tag.job_run_id).await.unwrap().is_some());
    assert!(store.get_job(tag.job_id).await.unwrap().is_some());
}

/// Store whose per-level delete fails for one level.
struct FlakyStore {
    inner: MemoryStore,
    broken: LogLevel,
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        self.inner.insert_job(job).await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        self.inner.get_job(id).await
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_job(id).await
    }

    async fn insert_run(&self, run: &JobRun) -> Result<(), StoreError> {
        self.inner.insert_run(run).await
    }

    async fn finish_run(
        &self,
        id: Uuid,
        end_time: DateTime<Utc>,
        success: bool,
    ) -> Result<bool, StoreError> {
        self.inner.finish_run(id, end_time, success).await
    }

    async fn update_progress(
        &self,
        id: Uuid,
        current: i64,
        total: i64,
    ) -> Result<bool, StoreError> {
        self.inner.update_progress(id, current, total).await
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<JobRun>, StoreError> {
        self.inner.get_run(id).await
    }

    async fn list_runs(&self, job_id: Uuid) -> Result<Vec<JobRun>, StoreError> {
        self.inner.list_runs(job_id).await
    }

    async fn delete_run(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_run(id).await
    }

    async fn insert_log(&self, record: &LogRecord) -> Result<(), StoreError> {
        self.inner.insert_log(record).await
    }

    async fn list_logs(&self, run_id: Uuid) -> Result<Vec<LogRecord>, StoreError> {
        self.inner.list_logs(run_id).await
    }

    async fn delete_logs_at_level(
        &self,
        level: LogLevel,
        before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if level == self.broken {
            return Err(StoreError::Corrupt("disk on fire".to_string()));
        }
        self.inner.delete_logs_at_level(level, before).await
    }

    async fn delete_logs_before(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.delete_logs_before(before).await
    }
}

#[tokio::test]
async fn test_failed_pass_does_not_stop_sweep() {
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        broken: LogLevel::Debug,
    });
    let tag = seed_run(&*store).await;
    let now = Utc::now();

    let stuck = seed_log(&*store, tag, now, LogLevel::Debug, 20).await;
    seed_log(&*store, tag, now, LogLevel::Info, 40).await;
    seed_log(&*store, tag, now, LogLevel::Warning, 400).await;

    let sweeper = LogRetentionSweeper::new(store.clone(), RetentionPolicy::default());
    let report = sweeper.cleanup_at(now).await;

    assert!(!report.is_clean());
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].contains("DEBUG"));
    assert_eq!(report.total(), 2);
    assert_eq!(remaining(&*store, tag).await, vec![stuck]);
}
