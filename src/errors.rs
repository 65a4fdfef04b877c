use thiserror::Error;

use crate::job::JobState;

/// Errors surfaced by engine operations.
///
/// Races lost while claiming jobs are not represented here: a lost claim is
/// indistinguishable from "no eligible job" and is absorbed by the
/// dispatcher. Everything else is returned to the caller or recorded on the
/// job's error log.
#[derive(Error, Debug)]
pub enum EngineError {
    /// An error occurred while executing an SQL query
    #[error("Error occured while query: {0}")]
    SqlError(#[from] sqlx::Error),

    /// An error occurred while serializing or deserializing JSON data
    #[error("Error while serializing job args: {0}")]
    JsonSerializeError(#[from] serde_json::Error),

    /// An operator action targeted a queue this engine does not run
    #[error("No queue named '{0}' is configured")]
    QueueNotFound(String),

    /// An operator action targeted a job id that does not exist
    #[error("Job {0} not found")]
    JobNotFound(i64),

    /// An illegal state change was attempted
    #[error("Job {job_id} cannot transition from '{from}' to '{to}'")]
    InvalidTransition {
        job_id: i64,
        from: JobState,
        to: JobState,
    },
}

/// A Result type alias for EngineError.
pub type Result<T> = core::result::Result<T, EngineError>;

/// A single problem found while validating engine configuration.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Queue name must not be empty")]
    EmptyQueueName,

    #[error("Queue '{0}' has a concurrency limit of 0")]
    ZeroConcurrency(String),

    #[error("Cron rule '{rule}' references worker '{worker}', which is not registered")]
    UnknownCronWorker { rule: String, worker: String },

    #[error("More than one cron rule uses the identifier '{0}'")]
    DuplicateCronId(String),
}

/// Errors that can occur when initializing an engine.
#[derive(Error, Debug)]
pub enum EngineBuildError {
    /// Failed to open the database
    #[error("Error occurred while connecting to the database: {0}")]
    ConnectError(#[from] sqlx::Error),

    /// Failed while executing a setup query
    #[error("Error occurred while executing a query: {0}")]
    QueryError(#[from] EngineError),

    /// Neither a database URL nor a pool was supplied
    #[error("Missing database_url configuration - must provide either database_url or pool")]
    MissingDatabaseUrl,

    /// The configuration did not validate; the engine refuses to start
    #[error("Invalid engine configuration: {0:?}")]
    Invalid(Vec<ConfigError>),
}
