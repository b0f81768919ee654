//! In-process store for tests and single-process development.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use super::{JobStore, KeyValueStore, StoreError};
use crate::jobs::{Job, JobRun};
use crate::joblog::{LogLevel, LogRecord};

/// Memory-backed implementation of both store traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    kv: RwLock<BTreeMap<String, Value>>,
    jobs: RwLock<HashMap<Uuid, Job>>,
    runs: RwLock<Vec<JobRun>>,
    logs: RwLock<Vec<LogRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().len()
    }

    /// Number of log records currently held.
    pub fn log_count(&self) -> usize {
        self.logs.read().len()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.kv.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.kv.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.kv.write().remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.kv.read().keys().cloned().collect())
    }

    async fn entries(&self) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(self
            .kv
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.write().insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().get(&id).cloned())
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool, StoreError> {
        self.logs.write().retain(|r| r.job_id != id);
        self.runs.write().retain(|r| r.job_id != id);
        Ok(self.jobs.write().remove(&id).is_some())
    }

    async fn insert_run(&self, run: &JobRun) -> Result<(), StoreError> {
        if !self.jobs.read().contains_key(&run.job_id) {
            return Err(StoreError::Corrupt(format!(
                "run {} references missing job {}",
                run.id, run.job_id
            )));
        }
        self.runs.write().push(run.clone());
        Ok(())
    }

    async fn finish_run(
        &self,
        id: Uuid,
        end_time: DateTime<Utc>,
        success: bool,
    ) -> Result<bool, StoreError> {
        let mut runs = self.runs.write();
        match runs.iter_mut().find(|r| r.id == id && !r.finished) {
            Some(run) => {
                run.end_time = Some(end_time);
                run.finished = true;
                run.success = Some(success);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_progress(
        &self,
        id: Uuid,
        current: i64,
        total: i64,
    ) -> Result<bool, StoreError> {
        let mut runs = self.runs.write();
        match runs.iter_mut().find(|r| r.id == id && !r.finished) {
            Some(run) => {
                run.progress_current = Some(current);
                run.progress_total = Some(total);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<JobRun>, StoreError> {
        Ok(self.runs.read().iter().find(|r| r.id == id).cloned())
    }

    async fn list_runs(&self, job_id: Uuid) -> Result<Vec<JobRun>, StoreError> {
        let mut runs: Vec<JobRun> = self
            .runs
            .read()
            .iter()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.start_time);
        Ok(runs)
    }

    async fn delete_run(&self, id: Uuid) -> Result<bool, StoreError> {
        self.logs.write().retain(|r| r.job_run_id != id);
        let mut runs = self.runs.write();
        let before = runs.len();
        runs.retain(|r| r.id != id);
        Ok(runs.len() != before)
    }

    async fn insert_log(&self, record: &LogRecord) -> Result<(), StoreError> {
        let run_exists = self
            .runs
            .read()
            .iter()
            .any(|r| r.id == record.job_run_id && r.job_id == record.job_id);
        if !run_exists {
            return Err(StoreError::Corrupt(format!(
                "log record references missing run {}",
                record.job_run_id
            )));
        }
        self.logs.write().push(record.clone());
        Ok(())
    }

    async fn list_logs(&self, run_id: Uuid) -> Result<Vec<LogRecord>, StoreError> {
        Ok(self
            .logs
            .read()
            .iter()
            .filter(|r| r.job_run_id == run_id)
            .cloned()
            .collect())
    }

    async fn delete_logs_at_level(
        &self,
        level: LogLevel,
        before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut logs = self.logs.write();
        let len = logs.len();
        logs.retain(|r| !(r.level == level && r.created < before));
        Ok((len - logs.len()) as u64)
    }

    async fn delete_logs_before(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut logs = self.logs.write();
        let len = logs.len();
        logs.retain(|r| r.created >= before);
        Ok((len - logs.len()) as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::joblog::{JobTag, LogEntry};
    use chrono::TimeDelta;
    use serde_json::json;

    fn job() -> Job {
        Job::new("pkg:Job", vec![], Default::default())
    }

    fn log_for(run: &JobRun, level: LogLevel, created: DateTime<Utc>) -> LogRecord {
        let tag = JobTag {
            job_id: run.job_id,
            job_run_id: run.id,
        };
        LogEntry::new(level, "msg").into_record(tag, created)
    }

    #[tokio::test]
    async fn kv_roundtrip_and_sorted_keys() {
        let store = MemoryStore::new();
        store.set("b", json!(2)).await.unwrap();
        store.set("a", json!([1])).await.unwrap();
        store.set("b", json!(3)).await.unwrap();
        assert_eq!(store.get("b").await.unwrap(), Some(json!(3)));
        assert_eq!(store.keys().await.unwrap(), vec!["a", "b"]);
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn finished_run_is_immutable() {
        let store = MemoryStore::new();
        let job = job();
        store.insert_job(&job).await.unwrap();
        let run = JobRun::started(job.id);
        store.insert_run(&run).await.unwrap();

        let end = Utc::now();
        assert!(store.finish_run(run.id, end, false).await.unwrap());
        assert!(!store.finish_run(run.id, Utc::now(), true).await.unwrap());
        assert!(!store.update_progress(run.id, 1, 2).await.unwrap());

        let stored = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.success, Some(false));
        assert_eq!(stored.end_time, Some(end));
        assert_eq!(stored.progress_current, None);
    }

    #[tokio::test]
    async fn run_requires_existing_job() {
        let store = MemoryStore::new();
        let err = store.insert_run(&JobRun::started(Uuid::now_v7())).await;
        assert!(matches!(err, Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn delete_run_cascades_to_logs() {
        let store = MemoryStore::new();
        let job = job();
        store.insert_job(&job).await.unwrap();
        let keep = JobRun::started(job.id);
        let drop = JobRun::started(job.id);
        store.insert_run(&keep).await.unwrap();
        store.insert_run(&drop).await.unwrap();
        store
            .insert_log(&log_for(&keep, LogLevel::Info, Utc::now()))
            .await
            .unwrap();
        store
            .insert_log(&log_for(&drop, LogLevel::Info, Utc::now()))
            .await
            .unwrap();

        assert!(store.delete_run(drop.id).await.unwrap());
        assert_eq!(store.list_logs(drop.id).await.unwrap().len(), 0);
        assert_eq!(store.list_logs(keep.id).await.unwrap().len(), 1);
        assert_eq!(store.list_runs(job.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn level_deletion_is_exact() {
        let store = MemoryStore::new();
        let job = job();
        store.insert_job(&job).await.unwrap();
        let run = JobRun::started(job.id);
        store.insert_run(&run).await.unwrap();
        let old = Utc::now() - TimeDelta::days(10);
        for level in LogLevel::ALL {
            store.insert_log(&log_for(&run, level, old)).await.unwrap();
        }

        let deleted = store
            .delete_logs_at_level(LogLevel::Info, Utc::now())
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.log_count(), 4);

        let deleted = store.delete_logs_before(old).await.unwrap();
        assert_eq!(deleted, 0);
        let deleted = store.delete_logs_before(Utc::now()).await.unwrap();
        assert_eq!(deleted, 4);
    }
}
