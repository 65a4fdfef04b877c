use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::backoff::RetryPolicy;
use crate::executor::{execute_job, ActiveJobs};
use crate::job::Job;
use crate::sql::claim_job::claim_job;
use crate::worker::Registry;

/// Live, operator adjustable knobs for one queue.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueRuntime {
    /// Concurrency limit, applied on the next claim cycle
    pub(crate) limit: usize,
    /// While set, no new claims; in-flight jobs run to settlement
    pub(crate) paused: bool,
    /// While set, the dispatcher detaches entirely
    pub(crate) stopped: bool,
}

/// Engine-side handle for one queue: the control channel written by
/// operator calls and read by the dispatcher, plus shared execution
/// accounting.
pub(crate) struct QueueHandle {
    pub(crate) runtime: watch::Sender<QueueRuntime>,
    pub(crate) executing: Arc<AtomicUsize>,
    pub(crate) wake: Arc<Notify>,
    /// Whether a dispatcher task currently owns this queue.
    pub(crate) attached: Arc<AtomicBool>,
}

impl QueueHandle {
    pub(crate) fn new(limit: usize) -> Self {
        let (runtime, _) = watch::channel(QueueRuntime {
            limit,
            paused: false,
            stopped: false,
        });
        QueueHandle {
            runtime,
            executing: Arc::new(AtomicUsize::new(0)),
            wake: Arc::new(Notify::new()),
            attached: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// The claim loop for one queue.
///
/// Each cycle claims jobs until the concurrency limit is saturated or the
/// queue runs dry, then sleeps until a control change, a finished
/// execution, shutdown, or the poll interval, whichever comes first. The
/// poll wakeup is what picks up newly due `scheduled` and `retryable`
/// rows, whose eligibility changes without any notification.
pub(crate) struct Dispatcher {
    pub(crate) queue: String,
    pub(crate) pool: SqlitePool,
    pub(crate) registry: Arc<Registry>,
    pub(crate) node_id: String,
    pub(crate) poll_interval: Duration,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) active: ActiveJobs,
    pub(crate) runtime: watch::Receiver<QueueRuntime>,
    pub(crate) executing: Arc<AtomicUsize>,
    pub(crate) wake: Arc<Notify>,
    pub(crate) shutdown: CancellationToken,
}

impl Dispatcher {
    pub(crate) async fn run(mut self) {
        info!(queue = %self.queue, "Dispatcher started");
        loop {
            let runtime = *self.runtime.borrow_and_update();
            if runtime.stopped {
                info!(queue = %self.queue, "Dispatcher stopped");
                return;
            }

            if !runtime.paused {
                self.claim_until_saturated(runtime.limit).await;
            }

            let wake = self.wake.clone();
            let shutdown = self.shutdown.clone();
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(queue = %self.queue, "Dispatcher shutting down");
                    return;
                }
                changed = self.runtime.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = wake.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn claim_until_saturated(&self, limit: usize) {
        while self.executing.load(Ordering::SeqCst) < limit {
            let claimed = claim_job(
                &self.pool,
                &self.queue,
                &self.registry.identifiers(),
                &self.node_id,
                Utc::now(),
            )
            .await;
            match claimed {
                Ok(Some(job)) => self.spawn_executor(job),
                Ok(None) => break,
                Err(e) => {
                    error!(queue = %self.queue, error = ?e, "Failed to claim a job");
                    break;
                }
            }
        }
    }

    fn spawn_executor(&self, job: Job) {
        // Counted before the spawn so the claim loop sees the slot as taken.
        self.executing.fetch_add(1, Ordering::SeqCst);

        let pool = self.pool.clone();
        let registry = self.registry.clone();
        let node_id = self.node_id.clone();
        let policy = self.retry_policy.clone();
        let active = self.active.clone();
        let executing = self.executing.clone();
        let wake = self.wake.clone();

        tokio::spawn(async move {
            let job_id = *job.id();
            if let Err(e) = execute_job(&pool, &registry, job, &node_id, &policy, &active).await {
                error!(job_id, error = ?e, "Failed to release job after execution");
            }
            executing.fetch_sub(1, Ordering::SeqCst);
            wake.notify_one();
        });
    }
}
