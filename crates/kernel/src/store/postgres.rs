//! PostgreSQL-backed store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

use super::{JobStore, KeyValueStore, StoreError};
use crate::jobs::{Job, JobRun};
use crate::joblog::{ExceptionInfo, LogLevel, LogRecord};

/// Store over the `info` table and the three background job tables.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    ctime: DateTime<Utc>,
    runner: String,
    args: Value,
    kwargs: Value,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let args = match row.args {
            Value::Array(items) => items,
            other => {
                return Err(StoreError::Corrupt(format!(
                    "job {} args is not an array: {other}",
                    row.id
                )));
            }
        };
        let kwargs = match row.kwargs {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::Corrupt(format!(
                    "job {} kwargs is not an object: {other}",
                    row.id
                )));
            }
        };
        Ok(Job {
            id: row.id,
            ctime: row.ctime,
            runner: row.runner,
            args,
            kwargs,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    job_id: Uuid,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    started: bool,
    finished: bool,
    success: Option<bool>,
    progress_current: Option<i64>,
    progress_total: Option<i64>,
}

impl From<RunRow> for JobRun {
    fn from(row: RunRow) -> Self {
        JobRun {
            id: row.id,
            job_id: row.job_id,
            start_time: row.start_time,
            end_time: row.end_time,
            started: row.started,
            finished: row.finished,
            success: row.success,
            progress_current: row.progress_current,
            progress_total: row.progress_total,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: Uuid,
    job_id: Uuid,
    job_run_id: Uuid,
    created: DateTime<Utc>,
    levelno: i32,
    message: String,
    target: String,
    filename: Option<String>,
    lineno: Option<i32>,
    thread_id: String,
    thread_name: Option<String>,
    fields: Value,
    exc_class: Option<String>,
    exc_message: Option<String>,
    exc_repr: Option<String>,
    exc_traceback: Option<String>,
}

impl TryFrom<LogRow> for LogRecord {
    type Error = StoreError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        let level = LogLevel::from_levelno(row.levelno).ok_or_else(|| {
            StoreError::Corrupt(format!("log {} has unknown level {}", row.id, row.levelno))
        })?;
        let fields = match row.fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let exception = row.exc_class.map(|class| ExceptionInfo {
            class,
            message: row.exc_message.unwrap_or_default(),
            repr: row.exc_repr.unwrap_or_default(),
            traceback: row.exc_traceback.unwrap_or_default(),
        });
        Ok(LogRecord {
            id: row.id,
            job_id: row.job_id,
            job_run_id: row.job_run_id,
            created: row.created,
            level,
            message: row.message,
            target: row.target,
            file: row.filename,
            line: row.lineno.and_then(|l| u32::try_from(l).ok()),
            thread_id: row.thread_id,
            thread_name: row.thread_name,
            fields,
            exception,
        })
    }
}

const RUN_COLUMNS: &str = "id, job_id, start_time, end_time, started, finished, success, \
                           progress_current, progress_total";

const LOG_COLUMNS: &str = "id, job_id, job_run_id, created, levelno, message, target, filename, \
                           lineno, thread_id, thread_name, fields, exc_class, exc_message, \
                           exc_repr, exc_traceback";

#[async_trait]
impl KeyValueStore for PgStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let value = sqlx::query_scalar::<_, Value>("SELECT value FROM info WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO info (key, value, updated)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = $2, updated = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM info WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let keys = sqlx::query_scalar::<_, String>("SELECT key FROM info ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(keys)
    }

    async fn entries(&self) -> Result<Vec<(String, Value)>, StoreError> {
        let rows = sqlx::query_as::<_, (String, Value)>("SELECT key, value FROM info ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO background_job (id, ctime, runner, args, kwargs) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(job.id)
        .bind(job.ctime)
        .bind(&job.runner)
        .bind(Value::Array(job.args.clone()))
        .bind(Value::Object(job.kwargs.clone()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT id, ctime, runner, args, kwargs FROM background_job WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Job::try_from).transpose()
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM background_job_run_log WHERE job_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM background_job_run WHERE job_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM background_job WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_run(&self, run: &JobRun) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO background_job_run ({RUN_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(run.id)
        .bind(run.job_id)
        .bind(run.start_time)
        .bind(run.end_time)
        .bind(run.started)
        .bind(run.finished)
        .bind(run.success)
        .bind(run.progress_current)
        .bind(run.progress_total)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_run(
        &self,
        id: Uuid,
        end_time: DateTime<Utc>,
        success: bool,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE background_job_run SET end_time = $2, finished = TRUE, success = $3 \
             WHERE id = $1 AND finished = FALSE",
        )
        .bind(id)
        .bind(end_time)
        .bind(success)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_progress(
        &self,
        id: Uuid,
        current: i64,
        total: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE background_job_run SET progress_current = $2, progress_total = $3 \
             WHERE id = $1 AND finished = FALSE",
        )
        .bind(id)
        .bind(current)
        .bind(total)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<JobRun>, StoreError> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM background_job_run WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(JobRun::from))
    }

    async fn list_runs(&self, job_id: Uuid) -> Result<Vec<JobRun>, StoreError> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM background_job_run WHERE job_id = $1 ORDER BY start_time, id"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(JobRun::from).collect())
    }

    async fn delete_run(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM background_job_run_log WHERE job_run_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM background_job_run WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_log(&self, record: &LogRecord) -> Result<(), StoreError> {
        let exc = record.exception.as_ref();
        sqlx::query(
            r#"
            INSERT INTO background_job_run_log
                (id, job_id, job_run_id, created, levelno, levelname, message, target,
                 filename, lineno, thread_id, thread_name, fields,
                 exc_class, exc_message, exc_repr, exc_traceback)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(record.id)
        .bind(record.job_id)
        .bind(record.job_run_id)
        .bind(record.created)
        .bind(record.level.levelno())
        .bind(record.level.name())
        .bind(&record.message)
        .bind(&record.target)
        .bind(&record.file)
        .bind(record.line.and_then(|l| i32::try_from(l).ok()))
        .bind(&record.thread_id)
        .bind(&record.thread_name)
        .bind(Value::Object(record.fields.clone()))
        .bind(exc.map(|e| e.class.as_str()))
        .bind(exc.map(|e| e.message.as_str()))
        .bind(exc.map(|e| e.repr.as_str()))
        .bind(exc.map(|e| e.traceback.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_logs(&self, run_id: Uuid) -> Result<Vec<LogRecord>, StoreError> {
        let rows = sqlx::query_as::<_, LogRow>(&format!(
            "SELECT {LOG_COLUMNS} FROM background_job_run_log \
             WHERE job_run_id = $1 ORDER BY created, id"
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(LogRecord::try_from).collect()
    }

    async fn delete_logs_at_level(
        &self,
        level: LogLevel,
        before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM background_job_run_log WHERE levelno = $1 AND created < $2")
                .bind(level.levelno())
                .bind(before)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn delete_logs_before(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM background_job_run_log WHERE created < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
