use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Stored timestamp format: ISO-8601 UTC at second precision with a trailing
/// "Z". Lexicographic order on this format is chronological order, which the
/// store's ordering queries depend on.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, QueueError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| QueueError::InvalidTimestamp(raw.to_owned()))
}

/// Enumeration of possible states for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting in the queue to be picked up by a worker.
    Pending,
    /// Leased by a worker and currently executing.
    Processing,
    /// Finished with exit code 0. Terminal.
    Completed,
    /// Failed with attempts remaining; eligible again once `retry_at` elapses.
    Failed,
    /// Retry budget exhausted; parked in the dead letter queue until an
    /// operator re-arms it.
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            invalid => Err(QueueError::ParseJobState(invalid.to_owned())),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The chunk of data needed to enqueue a job.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct NewJob {
    pub id: String,
    pub command: String,
    /// Total attempts permitted before the job lands in the DLQ. When absent,
    /// the store snapshots the configured default at creation time.
    pub max_retries: Option<i64>,
}

/// A job as recorded in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    /// Count of completed execution attempts.
    pub attempts: i64,
    pub max_retries: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Identifier of the worker holding the lease. Non-null iff processing.
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    /// Earliest wall-clock time a failed job may be leased again.
    pub retry_at: Option<DateTime<Utc>>,
}

/// Raw row shape as stored; timestamps stay TEXT until validated.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JobRow {
    pub id: String,
    pub command: String,
    pub state: String,
    pub attempts: i64,
    pub max_retries: i64,
    pub created_at: String,
    pub updated_at: String,
    pub locked_by: Option<String>,
    pub locked_at: Option<String>,
    pub retry_at: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            state: row.state.parse()?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            locked_at: row.locked_at.as_deref().map(parse_timestamp).transpose()?,
            retry_at: row.retry_at.as_deref().map(parse_timestamp).transpose()?,
            id: row.id,
            command: row.command,
            attempts: row.attempts,
            max_retries: row.max_retries,
            locked_by: row.locked_by,
        })
    }
}

/// Per-state job counts, zero-filled so every state is always present.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StateCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub dead: i64,
}

impl StateCounts {
    pub fn get(&self, state: JobState) -> i64 {
        match state {
            JobState::Pending => self.pending,
            JobState::Processing => self.processing,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Dead => self.dead,
        }
    }

    pub(crate) fn set(&mut self, state: JobState, count: i64) {
        match state {
            JobState::Pending => self.pending = count,
            JobState::Processing => self.processing = count,
            JobState::Completed => self.completed = count,
            JobState::Failed => self.failed = count,
            JobState::Dead => self.dead = count,
        }
    }

    pub fn total(&self) -> i64 {
        JobState::ALL.iter().map(|s| self.get(*s)).sum()
    }

    /// Counts in state-enum order, one entry per state.
    pub fn iter(&self) -> impl Iterator<Item = (JobState, i64)> + '_ {
        JobState::ALL.into_iter().map(|s| (s, self.get(s)))
    }
}
