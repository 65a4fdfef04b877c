use chrono::{DateTime, Utc};
use derive_builder::Builder;
use getset::Getters;
use serde_json::Value;

use crate::errors::Result;
use crate::job::Job;
use crate::unique::UniqueOpts;
use crate::worker::{Worker, WorkerConfig};

/// What to do when a unique insert collides with an existing active job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnConflict {
    /// Keep the existing job untouched and report the conflict
    #[default]
    Reject,
    /// Update the existing job's schedule, args, priority and attempt
    /// ceiling in place, unless it is already executing
    Replace,
}

/// Per-insert overrides, merged over the worker's [`WorkerConfig`] and the
/// engine defaults.
///
/// ```
/// use conveyor::InsertSpec;
/// use chrono::{Duration, Utc};
///
/// let spec = InsertSpec::builder()
///     .queue("payments")
///     .priority(1)
///     .scheduled_at(Utc::now() + Duration::minutes(5))
///     .build();
/// ```
///
/// [`WorkerConfig`]: crate::WorkerConfig
#[derive(Getters, Debug, Default, Clone, Builder)]
#[getset(get = "pub")]
#[builder(default, pattern = "owned", setter(strip_option), build_fn(private, name = "build_internal"))]
pub struct InsertSpec {
    /// Target queue; falls back to the worker's queue, then `"default"`
    #[builder(setter(into))]
    queue: Option<String>,
    /// Earliest execution time; defaults to now
    scheduled_at: Option<DateTime<Utc>>,
    /// Attempt ceiling override
    max_attempts: Option<i64>,
    /// Priority override; lower runs first
    priority: Option<i64>,
    /// Uniqueness override; replaces the worker's policy entirely
    #[builder(setter(into))]
    unique: Option<UniqueOpts>,
    /// Conflict resolution when uniqueness matches an existing job
    on_conflict: Option<OnConflict>,
}

impl InsertSpec {
    pub fn builder() -> InsertSpecBuilder {
        InsertSpecBuilder::default()
    }
}

impl InsertSpecBuilder {
    pub fn build(self) -> InsertSpec {
        // All fields are optional and defaulted, so this cannot fail.
        self.build_internal().unwrap_or_default()
    }
}

/// A candidate for a bulk insert: a worker identifier, its args and the
/// per-insert overrides.
#[derive(Debug, Clone)]
pub struct JobInsert {
    pub(crate) worker: String,
    pub(crate) args: Value,
    pub(crate) spec: InsertSpec,
    /// Captured at construction for typed candidates; raw candidates
    /// resolve against the registry instead.
    pub(crate) config: Option<WorkerConfig>,
}

impl JobInsert {
    /// A candidate from a typed worker payload.
    pub fn new<W: Worker>(payload: W) -> Result<Self> {
        Ok(JobInsert {
            worker: W::IDENTIFIER.to_string(),
            args: serde_json::to_value(payload)?,
            spec: InsertSpec::default(),
            config: Some(W::config()),
        })
    }

    /// A candidate from a raw identifier and args value.
    pub fn raw(worker: impl Into<String>, args: Value) -> Self {
        JobInsert {
            worker: worker.into(),
            args,
            spec: InsertSpec::default(),
            config: None,
        }
    }

    pub fn with_spec(mut self, spec: InsertSpec) -> Self {
        self.spec = spec;
        self
    }
}

/// Filter for operator-facing listings and bulk retry.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub(crate) queue: Option<String>,
    pub(crate) worker: Option<String>,
    pub(crate) state: Option<crate::job::JobState>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    pub fn state(mut self, state: crate::job::JobState) -> Self {
        self.state = Some(state);
        self
    }
}

/// The result of inserting one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertResult {
    /// A new row was created
    Inserted(Job),
    /// An active job with the same fingerprint already existed. Carries the
    /// existing row (updated in place under [`OnConflict::Replace`]).
    Conflict(Job),
}

impl InsertResult {
    pub fn job(&self) -> &Job {
        match self {
            InsertResult::Inserted(job) | InsertResult::Conflict(job) => job,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            InsertResult::Inserted(job) | InsertResult::Conflict(job) => job,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, InsertResult::Conflict(_))
    }
}
