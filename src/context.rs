use std::sync::Arc;

use getset::Getters;
use tokio_util::sync::CancellationToken;

use crate::job::Job;

/// Everything a worker's `perform` gets handed: the claimed job row, the
/// shared pool for follow-up inserts, the identity of the executing node,
/// and a cancellation token that fires when an operator cancels the job.
#[derive(Clone, Getters)]
#[getset(get = "pub")]
pub struct JobContext {
    job: Arc<Job>,
    pool: sqlx::SqlitePool,
    node_id: String,
    cancel: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(
        job: Arc<Job>,
        pool: sqlx::SqlitePool,
        node_id: String,
        cancel: CancellationToken,
    ) -> Self {
        JobContext {
            job,
            pool,
            node_id,
            cancel,
        }
    }

    /// Shortcut to the job's args.
    pub fn args(&self) -> &serde_json::Value {
        self.job.args_value()
    }

    /// Whether an operator has requested cancellation of this job.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
