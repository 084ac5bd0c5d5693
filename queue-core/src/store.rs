//! Persistent job storage backed by a single SQLite file.
//!
//! Producers, workers, and the operator CLI are separate OS processes sharing
//! nothing but this store, so every mutation here is a single atomic
//! statement. Transient lock contention is absorbed by the connection's busy
//! timeout; anything that survives it surfaces as a database error.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::config::{ConfigKey, DEFAULT_MAX_RETRIES};
use crate::error::QueueError;
use crate::types::{format_timestamp, parse_timestamp, Job, JobRow, JobState, NewJob, StateCounts};

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id          TEXT PRIMARY KEY,
    command     TEXT NOT NULL,
    state       TEXT NOT NULL,
    attempts    INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    locked_by   TEXT,
    locked_at   TEXT,
    retry_at    TEXT
);

CREATE TABLE IF NOT EXISTS config (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the store at `path`, apply the schema, and
    /// seed the default configuration.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        tracing::debug!("opened job store");

        for key in ConfigKey::ALL {
            sqlx::query("INSERT OR IGNORE INTO config (key, value) VALUES (?1, ?2)")
                .bind(key.as_str())
                .bind(key.default_value())
                .execute(&pool)
                .await?;
        }

        Ok(Self { pool })
    }

    /// Create a job in state pending. A missing retry budget is resolved from
    /// config here, at creation time, so later `config set` calls do not
    /// affect existing jobs.
    pub async fn create_job(&self, new: NewJob, now: DateTime<Utc>) -> Result<Job, QueueError> {
        let max_retries = match new.max_retries {
            Some(n) => n,
            None => self.default_max_retries().await?,
        };
        let ts = format_timestamp(now);

        let inserted = sqlx::query(
            "INSERT INTO jobs (id, command, state, attempts, max_retries, created_at, updated_at) \
             VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?4)",
        )
        .bind(&new.id)
        .bind(&new.command)
        .bind(max_retries)
        .bind(&ts)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {
                // A concurrent worker may lease the row the instant the
                // insert commits, so the returned snapshot is built from the
                // inserted values rather than read back.
                let created_at = parse_timestamp(&ts)?;
                Ok(Job {
                    id: new.id,
                    command: new.command,
                    state: JobState::Pending,
                    attempts: 0,
                    max_retries,
                    created_at,
                    updated_at: created_at,
                    locked_by: None,
                    locked_at: None,
                    retry_at: None,
                })
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(QueueError::AlreadyExists(new.id))
            }
            Err(error) => Err(error.into()),
        }
    }

    pub async fn job(&self, id: &str) -> Result<Job, QueueError> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(QueueError::NotFound(id.to_owned())),
        }
    }

    /// Atomically lease the next eligible job for `worker_id`, transitioning
    /// it to processing.
    ///
    /// Retry-ready failed jobs take priority (oldest `updated_at` first);
    /// otherwise pending jobs are leased FIFO by `created_at`. Each pass is
    /// one UPDATE with a subquery, so two workers calling concurrently can
    /// never both lease the same job.
    pub async fn lease_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, QueueError> {
        let ts = format_timestamp(now);

        let retry_ready = sqlx::query_as::<_, JobRow>(
            r#"
UPDATE jobs
SET
    state = 'processing',
    locked_by = ?1,
    locked_at = ?2,
    updated_at = ?2,
    retry_at = NULL
WHERE id = (
    SELECT id FROM jobs
    WHERE state = 'failed'
      AND (retry_at IS NULL OR retry_at <= ?2)
    ORDER BY updated_at ASC
    LIMIT 1
)
AND state = 'failed'
RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(&ts)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = retry_ready {
            return Ok(Some(row.try_into()?));
        }

        let pending = sqlx::query_as::<_, JobRow>(
            r#"
UPDATE jobs
SET
    state = 'processing',
    locked_by = ?1,
    locked_at = ?2,
    updated_at = ?2,
    retry_at = NULL
WHERE id = (
    SELECT id FROM jobs
    WHERE state = 'pending'
    ORDER BY created_at ASC
    LIMIT 1
)
AND state = 'pending'
RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(&ts)
        .fetch_optional(&self.pool)
        .await?;

        pending.map(Job::try_from).transpose()
    }

    /// Record a successful attempt. The job must currently be processing.
    pub async fn mark_completed(&self, id: &str, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.finish_processing(id, JobState::Completed, now, None)
            .await
    }

    /// Record a failed attempt with budget remaining. Does not touch
    /// `attempts`; callers increment before deciding on retry_at.
    pub async fn mark_failed_for_retry(
        &self,
        id: &str,
        now: DateTime<Utc>,
        retry_at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.finish_processing(id, JobState::Failed, now, Some(retry_at))
            .await
    }

    /// Park an exhausted job in the dead letter queue.
    pub async fn mark_dead(&self, id: &str, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.finish_processing(id, JobState::Dead, now, None).await
    }

    async fn finish_processing(
        &self,
        id: &str,
        to: JobState,
        now: DateTime<Utc>,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET state = ?1, locked_by = NULL, locked_at = NULL, retry_at = ?2, updated_at = ?3 \
             WHERE id = ?4 AND state = 'processing'",
        )
        .bind(to.as_str())
        .bind(retry_at.map(format_timestamp))
        .bind(format_timestamp(now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // NotFound if the id is unknown, IllegalTransition otherwise.
            let job = self.job(id).await?;
            return Err(QueueError::IllegalTransition {
                id: id.to_owned(),
                from: job.state,
                to,
            });
        }

        Ok(())
    }

    /// Add one completed attempt and return the new count.
    pub async fn increment_attempts(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<i64, QueueError> {
        sqlx::query_scalar::<_, i64>(
            "UPDATE jobs SET attempts = attempts + 1, updated_at = ?1 WHERE id = ?2 \
             RETURNING attempts",
        )
        .bind(format_timestamp(now))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| QueueError::NotFound(id.to_owned()))
    }

    /// Re-arm a job: back to pending with a fresh attempt budget and no lock
    /// or retry gate. The dead-only restriction on DLQ retry is enforced by
    /// the caller.
    pub async fn reset_to_pending(&self, id: &str, now: DateTime<Utc>) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET state = 'pending', attempts = 0, locked_by = NULL, locked_at = NULL, \
                 retry_at = NULL, updated_at = ?1 \
             WHERE id = ?2",
        )
        .bind(format_timestamp(now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(id.to_owned()));
        }

        Ok(())
    }

    /// List jobs newest-first, optionally filtered by state.
    pub async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>, QueueError> {
        let rows = match state {
            Some(state) => {
                sqlx::query_as::<_, JobRow>(
                    "SELECT * FROM jobs WHERE state = ?1 ORDER BY created_at DESC",
                )
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, JobRow>("SELECT * FROM jobs ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(Job::try_from).collect()
    }

    /// Job counts per state, zero-filled for states with no jobs.
    pub async fn stats_by_state(&self) -> Result<StateCounts, QueueError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT state, COUNT(*) FROM jobs GROUP BY state",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StateCounts::default();
        for (state, count) in rows {
            counts.set(state.parse()?, count);
        }

        Ok(counts)
    }

    pub async fn get_config(&self, key: &str) -> Result<Option<String>, QueueError> {
        Ok(
            sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<(), QueueError> {
        sqlx::query("INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn default_max_retries(&self) -> Result<i64, QueueError> {
        let key = ConfigKey::MaxRetries;
        match self.get_config(key.as_str()).await? {
            Some(value) => value.parse().map_err(|_| QueueError::InvalidConfig {
                key: key.as_str().to_owned(),
                value,
            }),
            None => Ok(DEFAULT_MAX_RETRIES),
        }
    }

    /// Backoff base from config, applied by workers at startup.
    pub async fn backoff_base(&self) -> Result<f64, QueueError> {
        let key = ConfigKey::BackoffBase;
        match self.get_config(key.as_str()).await? {
            Some(value) => value.parse().map_err(|_| QueueError::InvalidConfig {
                key: key.as_str().to_owned(),
                value,
            }),
            None => Ok(crate::config::DEFAULT_BACKOFF_BASE),
        }
    }
}
