use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use getset::Getters;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// Lifecycle state of a job.
///
/// `Completed`, `Discarded` and `Cancelled` are terminal: once reached, a
/// job never leaves them except through an explicit operator retry of a
/// discarded job.
#[derive(
    sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default,
)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Eligible for dequeue now
    #[default]
    Available,
    /// Waiting for its scheduled time
    Scheduled,
    /// Claimed by a dispatcher, currently running
    Executing,
    /// Failed and waiting for its backoff to elapse
    Retryable,
    /// Finished successfully
    Completed,
    /// Failed permanently (attempts exhausted or explicit discard)
    Discarded,
    /// Cancelled by an operator
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Available => "available",
            JobState::Scheduled => "scheduled",
            JobState::Executing => "executing",
            JobState::Retryable => "retryable",
            JobState::Completed => "completed",
            JobState::Discarded => "discarded",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Discarded | JobState::Cancelled
        )
    }

    /// Whether moving from `self` to `to` is a legal transition.
    ///
    /// The dispatcher's claim collapses the lazy promotion of due
    /// `scheduled`/`retryable` rows with the claim itself, so both edges to
    /// `Executing` are legal here in addition to the promotion edges to
    /// `Available`.
    pub fn allows(&self, to: JobState) -> bool {
        use JobState::*;
        match (self, to) {
            (Scheduled, Available) | (Retryable, Available) => true,
            (Available, Executing) | (Scheduled, Executing) | (Retryable, Executing) => true,
            (Executing, Completed) | (Executing, Retryable) | (Executing, Discarded) => true,
            // Operator cancel of any non-terminal job
            (from, Cancelled) if !from.is_terminal() => true,
            // Operator retry of a permanently failed job
            (Discarded, Available) => true,
            _ => false,
        }
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One recorded failure. Jobs carry an append-only list of these, one per
/// failed or retried attempt.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorEntry {
    /// The attempt number this failure belongs to
    pub attempt: i64,
    /// When the failure was recorded
    pub recorded_at: DateTime<Utc>,
    /// The failure reason
    pub message: String,
}

/// A job as stored in the database: one persisted unit of work with state,
/// payload and scheduling metadata.
#[derive(FromRow, Getters, Debug, Clone, PartialEq)]
#[getset(get = "pub")]
pub struct Job {
    /// Unique, monotonically assigned identifier; also the dequeue tie-break
    id: i64,
    /// The logical work lane this job belongs to
    queue: String,
    /// Identifier of the registered worker that runs this job
    worker: String,
    /// The JSON args passed to the worker
    args: Json<serde_json::Value>,
    /// Current lifecycle state
    state: JobState,
    /// Lower value is served first
    priority: i64,
    /// How many times this job has been attempted
    attempt: i64,
    /// The limit for the number of times it may be attempted
    max_attempts: i64,
    /// Earliest time the job becomes eligible for dequeue
    scheduled_at: DateTime<Utc>,
    /// When the job row was created
    inserted_at: DateTime<Utc>,
    /// When the latest attempt was claimed
    attempted_at: Option<DateTime<Utc>>,
    /// Set once when the job completes
    completed_at: Option<DateTime<Utc>>,
    /// Set once when the job is discarded
    discarded_at: Option<DateTime<Utc>>,
    /// Set once when the job is cancelled
    cancelled_at: Option<DateTime<Utc>>,
    /// Node id of the engine instance holding the claim
    attempted_by: Option<String>,
    /// Deduplication fingerprint, when uniqueness is configured
    unique_key: Option<String>,
    /// Append-only failure log, one entry per failed attempt
    errors: Json<Vec<ErrorEntry>>,
}

impl Job {
    /// The args as a plain JSON value.
    pub fn args_value(&self) -> &serde_json::Value {
        &self.args.0
    }

    /// The recorded failures as a plain slice.
    pub fn error_entries(&self) -> &[ErrorEntry] {
        &self.errors.0
    }
}
