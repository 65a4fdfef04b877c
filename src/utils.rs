use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::errors::{EngineError, Result};
use crate::job::{Job, JobState};
use crate::job_spec::{InsertResult, InsertSpec, JobFilter, JobInsert};
use crate::migrate::migrate;
use crate::sql::cancel_job::cancel_job;
use crate::sql::get_job::{get_job, jobs_where};
use crate::sql::insert_job::{insert_jobs, ResolvedInsert, ResolvedUnique};
use crate::sql::maintenance::{prune_jobs, release_stale_job, stale_executing};
use crate::sql::retry_job::{retry_job, retry_jobs};
use crate::executor::ActiveJobs;
use crate::worker::{Registry, Worker, WorkerConfig};

/// Standalone handle for inserting and administering jobs.
///
/// An engine hands one out through [`Engine::create_utils`]; a producer
/// process that never executes jobs can build its own with
/// [`EngineUtils::new`] over a shared pool.
///
/// [`Engine::create_utils`]: crate::engine::Engine::create_utils
#[derive(Clone)]
pub struct EngineUtils {
    pool: SqlitePool,
    registry: Arc<Registry>,
    active: ActiveJobs,
}

impl EngineUtils {
    /// A utils handle with no worker registry. Inserts resolve against the
    /// per-insert spec and engine defaults only.
    pub fn new(pool: SqlitePool) -> Self {
        EngineUtils {
            pool,
            registry: Arc::new(Registry::default()),
            active: ActiveJobs::default(),
        }
    }

    pub(crate) fn with_engine(pool: SqlitePool, registry: Arc<Registry>, active: ActiveJobs) -> Self {
        EngineUtils {
            pool,
            registry,
            active,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cron-runner insert: one job per rule occurrence. When the worker
    /// defines no uniqueness of its own, occurrences dedupe on the
    /// fingerprint plus the occurrence time, so the same minute fired
    /// twice (restart, concurrent nodes) yields one row while consecutive
    /// minutes insert separately.
    pub(crate) async fn insert_occurrence(
        &self,
        worker: &str,
        args: Value,
        spec: InsertSpec,
        occurrence: DateTime<Utc>,
    ) -> Result<InsertResult> {
        let config = self.registry.config(worker).cloned().unwrap_or_default();
        let mut resolved = resolve(worker, &config, args, &spec);
        if resolved.unique.is_none() {
            let opts = crate::unique::UniqueOpts::new().forever();
            resolved.unique = Some(ResolvedUnique {
                key: opts.fingerprint(worker, &resolved.queue, &resolved.args),
                states: opts.active_states(),
                period: opts.period,
                match_scheduled_at: Some(occurrence),
            });
        }
        self.insert_resolved(vec![resolved]).await.map(take_single)
    }

    /// Ensures the schema exists. The engine does this at init; standalone
    /// producers call it once at startup.
    pub async fn migrate(&self) -> Result<()> {
        migrate(&self.pool).await
    }

    /// Inserts one job from a typed worker payload with default options.
    pub async fn insert<W: Worker>(&self, payload: W) -> Result<InsertResult> {
        self.insert_with::<W>(payload, InsertSpec::default()).await
    }

    /// Inserts one job from a typed worker payload with per-insert
    /// overrides.
    pub async fn insert_with<W: Worker>(
        &self,
        payload: W,
        spec: InsertSpec,
    ) -> Result<InsertResult> {
        let args = serde_json::to_value(payload)?;
        let resolved = resolve(W::IDENTIFIER, &W::config(), args, &spec);
        self.insert_resolved(vec![resolved]).await.map(take_single)
    }

    /// Inserts one job by worker identifier and raw args. The worker's
    /// config applies when the identifier is registered.
    pub async fn insert_raw(
        &self,
        worker: &str,
        args: Value,
        spec: InsertSpec,
    ) -> Result<InsertResult> {
        let config = self.registry.config(worker).cloned().unwrap_or_default();
        let resolved = resolve(worker, &config, args, &spec);
        self.insert_resolved(vec![resolved]).await.map(take_single)
    }

    /// Inserts a batch of candidates in one transaction.
    ///
    /// All-or-nothing: an error aborts the whole batch. Results come back
    /// in input order, and candidates sharing a uniqueness fingerprint
    /// collapse onto one row within the batch.
    pub async fn insert_all(&self, candidates: Vec<JobInsert>) -> Result<Vec<InsertResult>> {
        let resolved = candidates
            .into_iter()
            .map(|c| {
                let config = c
                    .config
                    .or_else(|| self.registry.config(&c.worker).cloned())
                    .unwrap_or_default();
                resolve(&c.worker, &config, c.args, &c.spec)
            })
            .collect();
        self.insert_resolved(resolved).await
    }

    async fn insert_resolved(&self, resolved: Vec<ResolvedInsert>) -> Result<Vec<InsertResult>> {
        let mut conn = self.pool.acquire().await?;
        // Write lock up front; the uniqueness check and the insert must be
        // one atomic step.
        sqlx::query("begin immediate").execute(&mut *conn).await?;
        match insert_jobs(&mut conn, &resolved).await {
            Ok(results) => match sqlx::query("commit").execute(&mut *conn).await {
                Ok(_) => Ok(results),
                Err(e) => {
                    abandon_transaction(conn).await;
                    Err(e.into())
                }
            },
            Err(e) => {
                abandon_transaction(conn).await;
                Err(e)
            }
        }
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
        get_job(&self.pool, job_id).await
    }

    /// Lists jobs matching the filter, oldest first.
    pub async fn jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        jobs_where(&self.pool, filter).await
    }

    /// Cancels a non-terminal job. An executing job's work function is
    /// interrupted cooperatively through its cancellation token; the row
    /// settles as `cancelled` either way.
    pub async fn cancel_job(&self, job_id: i64) -> Result<Job> {
        let current = get_job(&self.pool, job_id)
            .await?
            .ok_or(EngineError::JobNotFound(job_id))?;
        if !current.state().allows(JobState::Cancelled) {
            return Err(EngineError::InvalidTransition {
                job_id,
                from: *current.state(),
                to: JobState::Cancelled,
            });
        }

        match cancel_job(&self.pool, job_id).await? {
            Some(job) => {
                let token = self
                    .active
                    .lock()
                    .expect("active job table poisoned")
                    .remove(&job_id);
                if let Some(token) = token {
                    token.cancel();
                }
                info!(job_id, "Job cancelled");
                Ok(job)
            }
            None => {
                // The row settled between the check and the update.
                let settled = get_job(&self.pool, job_id)
                    .await?
                    .ok_or(EngineError::JobNotFound(job_id))?;
                Err(EngineError::InvalidTransition {
                    job_id,
                    from: *settled.state(),
                    to: JobState::Cancelled,
                })
            }
        }
    }

    /// Returns a discarded job to `available` with a fresh attempt budget.
    pub async fn retry_job(&self, job_id: i64) -> Result<Job> {
        match retry_job(&self.pool, job_id).await? {
            Some(job) => {
                info!(job_id, "Job queued for retry");
                Ok(job)
            }
            None => {
                let current = get_job(&self.pool, job_id)
                    .await?
                    .ok_or(EngineError::JobNotFound(job_id))?;
                Err(EngineError::InvalidTransition {
                    job_id,
                    from: *current.state(),
                    to: JobState::Available,
                })
            }
        }
    }

    /// Retries every discarded job matching the filter. Returns how many
    /// jobs moved back to `available`.
    pub async fn retry_all(&self, filter: &JobFilter) -> Result<u64> {
        let moved = retry_jobs(&self.pool, filter).await?;
        if moved > 0 {
            info!(moved, "Discarded jobs queued for retry");
        }
        Ok(moved)
    }

    /// Releases claims held longer than the threshold, typically by a
    /// crashed node. Released jobs become available again, or discarded
    /// when the interrupted attempt was their last.
    pub async fn release_stale_jobs(&self, threshold: Duration) -> Result<u64> {
        let cutoff = subtract(Utc::now(), threshold);
        let stale = stale_executing(&self.pool, cutoff).await?;
        let mut released = 0;
        for job in &stale {
            let holder = job.attempted_by().as_deref().unwrap_or("unknown");
            let message = format!("Job lease expired on node '{holder}'");
            if release_stale_job(&self.pool, job, &message).await?.is_some() {
                released += 1;
            }
        }
        if released > 0 {
            warn!(released, "Released stale executing jobs");
        }
        Ok(released)
    }

    /// Deletes terminal jobs that settled before `now - older_than`.
    pub async fn prune_jobs(&self, older_than: Duration) -> Result<u64> {
        let cutoff = subtract(Utc::now(), older_than);
        let pruned = prune_jobs(&self.pool, cutoff).await?;
        if pruned > 0 {
            info!(pruned, "Pruned settled jobs");
        }
        Ok(pruned)
    }
}

/// Rolls back a failed batch. A connection still inside a transaction must
/// never return to the pool, so when the rollback itself fails the
/// connection is detached and dropped instead.
async fn abandon_transaction(mut conn: sqlx::pool::PoolConnection<sqlx::Sqlite>) {
    if sqlx::query("rollback").execute(&mut *conn).await.is_err() {
        warn!("Rollback failed, discarding the connection");
        drop(conn.detach());
    }
}

fn subtract(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at - chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX)
}

fn take_single(mut results: Vec<InsertResult>) -> InsertResult {
    results.pop().expect("one result per inserted candidate")
}

/// Merges the per-insert spec over the worker's config and the engine
/// defaults, and computes the uniqueness fingerprint.
pub(crate) fn resolve(
    worker: &str,
    config: &WorkerConfig,
    args: Value,
    spec: &InsertSpec,
) -> ResolvedInsert {
    let queue = spec
        .queue()
        .clone()
        .or_else(|| config.queue.clone())
        .unwrap_or_else(|| "default".to_string());
    let priority = (*spec.priority()).or(config.priority).unwrap_or(0);
    // A ceiling below 1 would be overrun by the very first claim, which
    // increments the attempt counter unconditionally.
    let max_attempts = (*spec.max_attempts())
        .or(config.max_attempts)
        .unwrap_or(20)
        .max(1);
    let scheduled_at = (*spec.scheduled_at()).unwrap_or_else(Utc::now);
    let on_conflict = (*spec.on_conflict()).unwrap_or_default();

    let unique = spec
        .unique()
        .clone()
        .or_else(|| config.unique.clone())
        .map(|opts| ResolvedUnique {
            key: opts.fingerprint(worker, &queue, &args),
            states: opts.active_states(),
            period: opts.period,
            match_scheduled_at: None,
        });

    ResolvedInsert {
        worker: worker.to_string(),
        queue,
        args,
        priority,
        max_attempts,
        scheduled_at,
        unique,
        on_conflict,
    }
}
