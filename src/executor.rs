use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::RetryPolicy;
use crate::context::JobContext;
use crate::errors::Result;
use crate::job::Job;
use crate::sql::complete_job::complete_job;
use crate::sql::fail_job::fail_job;
use crate::worker::{Outcome, Registry};

/// Cancellation tokens of currently executing jobs, keyed by job id.
/// Operator cancels fire the token; the executor removes its entry when
/// the job settles.
pub(crate) type ActiveJobs = Arc<Mutex<HashMap<i64, CancellationToken>>>;

/// Runs one claimed job to settlement: executes the work function,
/// interprets its outcome and releases the claim.
///
/// The work function runs on its own task, so a panic unwinds that task
/// alone and surfaces here as a recoverable failure. A configured timeout
/// aborts the task on expiry, also a recoverable failure. An operator
/// cancel aborts the task and leaves the row alone, the cancel already
/// settled it.
pub(crate) async fn execute_job(
    pool: &SqlitePool,
    registry: &Registry,
    job: Job,
    node_id: &str,
    policy: &RetryPolicy,
    active: &ActiveJobs,
) -> Result<()> {
    let job = Arc::new(job);
    let job_id = *job.id();

    let Some(registered) = registry.get(job.worker()) else {
        warn!(job_id, worker = %job.worker(), "Claimed a job with no registered worker");
        let outcome = Outcome::failure(format!("No worker registered for '{}'", job.worker()));
        return release_job(pool, &job, node_id, policy, outcome).await;
    };

    let token = CancellationToken::new();
    active
        .lock()
        .expect("active job table poisoned")
        .insert(job_id, token.clone());

    let cx = JobContext::new(
        job.clone(),
        pool.clone(),
        node_id.to_string(),
        token.clone(),
    );
    debug!(job_id, worker = %job.worker(), attempt = *job.attempt(), "Executing job");

    let timeout = registered.config.timeout;
    let handle = tokio::spawn((registered.run)(cx));
    let abort_on_timeout = handle.abort_handle();
    let abort_on_cancel = handle.abort_handle();

    let settled = async {
        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort_on_timeout.abort();
                    return Outcome::failure(format!("Execution timed out after {limit:?}"));
                }
            },
            None => handle.await,
        };
        match joined {
            Ok(outcome) => outcome,
            Err(join_error) if join_error.is_panic() => {
                Outcome::failure(format!("Worker panicked: {join_error}"))
            }
            Err(join_error) => Outcome::failure(format!("Worker task failed: {join_error}")),
        }
    };

    let outcome = tokio::select! {
        outcome = settled => Some(outcome),
        _ = token.cancelled() => {
            abort_on_cancel.abort();
            None
        }
    };

    active
        .lock()
        .expect("active job table poisoned")
        .remove(&job_id);

    let Some(outcome) = outcome else {
        debug!(job_id, "Job cancelled mid-execution");
        return Ok(());
    };

    release_job(pool, &job, node_id, policy, outcome).await
}

/// Maps an outcome to the job's next state and releases the claim.
///
/// A recoverable failure with attempts left becomes `retryable` at
/// `now + delay`, where the delay is the outcome's own when it names one
/// and the engine's backoff policy otherwise. A recoverable failure out of
/// attempts, and any explicit discard, becomes `discarded`.
async fn release_job(
    pool: &SqlitePool,
    job: &Job,
    node_id: &str,
    policy: &RetryPolicy,
    outcome: Outcome,
) -> Result<()> {
    let job_id = *job.id();
    match outcome {
        Outcome::Complete => match complete_job(pool, job, node_id).await? {
            Some(_) => info!(job_id, worker = %job.worker(), "Job completed"),
            None => debug!(job_id, "Claim was already released"),
        },
        Outcome::Discard { reason } => {
            error!(job_id, worker = %job.worker(), %reason, "Job discarded");
            fail_job(pool, job, node_id, &reason, None).await?;
        }
        Outcome::Retry { delay, reason } => {
            if job.attempt() >= job.max_attempts() {
                error!(
                    job_id,
                    worker = %job.worker(),
                    %reason,
                    attempt = *job.attempt(),
                    "Job failed and exhausted its attempts"
                );
                fail_job(pool, job, node_id, &reason, None).await?;
            } else {
                let delay = delay.unwrap_or_else(|| policy.delay(*job.attempt()));
                let retry_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
                warn!(
                    job_id,
                    worker = %job.worker(),
                    %reason,
                    attempt = *job.attempt(),
                    retry_in = ?delay,
                    "Job failed, scheduling retry"
                );
                fail_job(pool, job, node_id, &reason, Some(retry_at)).await?;
            }
        }
    }
    Ok(())
}
