//! Durable background-job engine backed by SQLite.
//!
//! Jobs are rows: every insert, claim, retry and settlement is a database
//! transition, so pending work survives restarts and crashes. The engine
//! runs one dispatcher per queue, claims jobs atomically in priority
//! order, retries failures with exponential backoff, deduplicates inserts
//! by fingerprint and fires recurring jobs from a crontab-style schedule.
//!
//! ```no_run
//! use conveyor::{EngineOptions, IntoOutcome, JobContext, Worker, WorkerConfig};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct SendEmail {
//!     to: String,
//! }
//!
//! impl Worker for SendEmail {
//!     const IDENTIFIER: &'static str = "send_email";
//!
//!     fn config() -> WorkerConfig {
//!         WorkerConfig::new().queue("mail").max_attempts(5)
//!     }
//!
//!     async fn perform(self, _cx: JobContext) -> impl IntoOutcome {
//!         println!("emailing {}", self.to);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = EngineOptions::default()
//!         .database_url("sqlite://jobs.db")
//!         .define_worker::<SendEmail>()
//!         .init()
//!         .await?;
//!
//!     let utils = engine.create_utils();
//!     utils.insert(SendEmail { to: "ada@example.com".into() }).await?;
//!
//!     engine.run().await?;
//!     Ok(())
//! }
//! ```

pub mod backoff;
mod context;
mod controller;
mod cron;
mod dispatcher;
mod engine;
pub mod errors;
mod executor;
pub mod job;
mod job_spec;
mod migrate;
mod sql;
mod unique;
mod utils;
mod worker;

pub use backoff::RetryPolicy;
pub use context::JobContext;
pub use controller::QueueStatus;
pub use engine::{Engine, EngineOptions};
pub use errors::{ConfigError, EngineBuildError, EngineError, Result};
pub use job::{ErrorEntry, Job, JobState};
pub use job_spec::{InsertResult, InsertSpec, InsertSpecBuilder, JobFilter, JobInsert, OnConflict};
pub use unique::{UniqueFields, UniqueOpts, UniquePeriod};
pub use utils::EngineUtils;
pub use worker::{IntoOutcome, Outcome, Worker, WorkerConfig};

pub use conveyor_schedule as schedule;
