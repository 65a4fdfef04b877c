use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use conveyor_schedule::{parse_cron, CronEntry, ScheduleParseError};
use rand::Rng;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backoff::RetryPolicy;
use crate::cron::{cron_runner, insert_due_entries, validate_entries};
use crate::dispatcher::{Dispatcher, QueueHandle};
use crate::errors::{ConfigError, EngineBuildError, Result};
use crate::executor::{execute_job, ActiveJobs};
use crate::migrate::migrate;
use crate::sql::claim_job::claim_job;
use crate::utils::EngineUtils;
use crate::worker::{Registry, Worker};

/// Builder for an [`Engine`].
///
/// ```no_run
/// # use conveyor::EngineOptions;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = EngineOptions::default()
///     .database_url("sqlite://jobs.db")
///     .concurrency(8)
///     .add_queue("mail", 2)
///     .init()
///     .await?;
/// engine.run().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct EngineOptions {
    concurrency: Option<usize>,
    poll_interval: Option<Duration>,
    database_url: Option<String>,
    pool: Option<SqlitePool>,
    max_connections: Option<u32>,
    queues: HashMap<String, usize>,
    registry: Registry,
    cron_entries: Vec<CronEntry>,
    retry_policy: Option<RetryPolicy>,
}

impl EngineOptions {
    /// Default concurrency limit for queues without an explicit one.
    /// Defaults to the number of CPUs.
    pub fn concurrency(mut self, value: usize) -> Self {
        self.concurrency = Some(value);
        self
    }

    /// How often idle dispatchers re-check for newly due jobs.
    pub fn poll_interval(mut self, value: Duration) -> Self {
        self.poll_interval = Some(value);
        self
    }

    pub fn database_url(mut self, value: &str) -> Self {
        self.database_url = Some(value.into());
        self
    }

    /// Use an existing pool instead of opening one from `database_url`.
    pub fn pool(mut self, value: SqlitePool) -> Self {
        self.pool = Some(value);
        self
    }

    pub fn max_connections(mut self, value: u32) -> Self {
        self.max_connections = Some(value);
        self
    }

    /// Declares a queue with an explicit concurrency limit. Queues named
    /// only by worker configs are created implicitly with the default
    /// limit.
    pub fn add_queue(mut self, name: &str, limit: usize) -> Self {
        self.queues.insert(name.to_string(), limit);
        self
    }

    /// Registers a worker type.
    pub fn define_worker<W: Worker>(mut self) -> Self {
        self.registry.insert::<W>();
        self
    }

    /// Parses a schedule file and appends its rules.
    pub fn with_crontab(mut self, input: &str) -> core::result::Result<Self, ScheduleParseError> {
        let entries = parse_cron(input)?;
        self.cron_entries.extend(entries);
        Ok(self)
    }

    /// Overrides the default retry backoff.
    pub fn retry_policy(mut self, value: RetryPolicy) -> Self {
        self.retry_policy = Some(value);
        self
    }

    /// Checks the configuration without touching the database. Returns
    /// every problem found, not just the first.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut issues = Vec::new();
        for (name, limit) in &self.queues {
            if name.is_empty() {
                issues.push(ConfigError::EmptyQueueName);
            }
            if *limit == 0 {
                issues.push(ConfigError::ZeroConcurrency(name.clone()));
            }
        }
        issues.extend(validate_entries(&self.cron_entries, &self.registry));
        issues
    }

    /// Validates, connects, migrates and assembles the engine. A
    /// configuration problem fails startup rather than degrading at
    /// runtime.
    pub async fn init(self) -> core::result::Result<Engine, EngineBuildError> {
        let issues = self.validate();
        if !issues.is_empty() {
            return Err(EngineBuildError::Invalid(issues));
        }

        let pool = match self.pool {
            Some(pool) => pool,
            None => {
                let url = self
                    .database_url
                    .as_deref()
                    .ok_or(EngineBuildError::MissingDatabaseUrl)?;
                SqlitePoolOptions::new()
                    .max_connections(self.max_connections.unwrap_or(5))
                    .connect(url)
                    .await?
            }
        };
        migrate(&pool).await.map_err(EngineBuildError::QueryError)?;

        let default_limit = self.concurrency.unwrap_or_else(num_cpus::get).max(1);
        let mut queues: HashMap<String, QueueHandle> = HashMap::new();
        for (name, limit) in &self.queues {
            queues.insert(name.clone(), QueueHandle::new(*limit));
        }
        for name in self.registry.queue_names() {
            queues
                .entry(name.to_string())
                .or_insert_with(|| QueueHandle::new(default_limit));
        }
        for entry in &self.cron_entries {
            if let Some(queue) = entry.options().queue() {
                queues
                    .entry(queue.clone())
                    .or_insert_with(|| QueueHandle::new(default_limit));
            }
        }
        queues
            .entry("default".to_string())
            .or_insert_with(|| QueueHandle::new(default_limit));

        Ok(Engine {
            pool,
            registry: Arc::new(self.registry),
            queues,
            node_id: generate_node_id(),
            poll_interval: self.poll_interval.unwrap_or(Duration::from_secs(1)),
            retry_policy: self.retry_policy.unwrap_or_default(),
            cron_entries: self.cron_entries,
            active: ActiveJobs::default(),
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
        })
    }
}

fn generate_node_id() -> String {
    let mut bytes = [0u8; 9];
    rand::rng().fill(&mut bytes);
    format!("conveyor_{}", hex::encode(bytes))
}

/// A configured job engine: one dispatcher per queue, a cron runner and
/// the operator surface.
pub struct Engine {
    pub(crate) pool: SqlitePool,
    pub(crate) registry: Arc<Registry>,
    pub(crate) queues: HashMap<String, QueueHandle>,
    pub(crate) node_id: String,
    pub(crate) poll_interval: Duration,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) cron_entries: Vec<CronEntry>,
    pub(crate) active: ActiveJobs,
    pub(crate) shutdown: CancellationToken,
    pub(crate) running: AtomicBool,
}

impl Engine {
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// An administration handle sharing this engine's pool and registry.
    pub fn create_utils(&self) -> EngineUtils {
        EngineUtils::with_engine(self.pool.clone(), self.registry.clone(), self.active.clone())
    }

    /// Runs dispatchers and the cron runner until shutdown.
    ///
    /// Shutdown comes from [`request_shutdown`] or an interrupt signal.
    /// New claims stop immediately; executing jobs get a grace period to
    /// settle before `run` returns.
    ///
    /// [`request_shutdown`]: Engine::request_shutdown
    pub async fn run(&self) -> Result<()> {
        info!(
            node_id = %self.node_id,
            queues = self.queues.len(),
            workers = self.registry.identifiers().len(),
            "Engine starting"
        );
        self.running.store(true, Ordering::SeqCst);
        for name in self.queues.keys() {
            self.spawn_dispatcher(name);
        }

        let cron_task = {
            let utils = self.create_utils();
            let entries = self.cron_entries.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = cron_runner(&utils, &entries, shutdown).await {
                    error!(error = ?e, "Cron runner failed");
                }
            })
        };

        let signal_shutdown = self.shutdown.clone();
        let signal_task = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, shutting down");
                    signal_shutdown.cancel();
                }
                Err(e) => error!(error = ?e, "Failed to listen for interrupt"),
            }
        });

        self.shutdown.cancelled().await;
        signal_task.abort();
        let _ = cron_task.await;

        self.drain(Duration::from_secs(10)).await;
        self.running.store(false, Ordering::SeqCst);
        info!("Engine stopped");
        Ok(())
    }

    /// Drains every queue once, executing jobs sequentially on the calling
    /// task, and returns when nothing more is due.
    ///
    /// Eligibility is frozen at entry: a job that fails and reschedules
    /// during the pass is not picked up again, even with a zero backoff.
    /// Paused and stopped queues are skipped. Intended for tests and batch
    /// jobs, not as a substitute for [`run`].
    ///
    /// [`run`]: Engine::run
    pub async fn run_once(&self) -> Result<()> {
        let now = Utc::now();
        let mut names: Vec<&String> = self.queues.keys().collect();
        names.sort();

        for name in names {
            let handle = &self.queues[name.as_str()];
            let runtime = *handle.runtime.borrow();
            if runtime.paused || runtime.stopped {
                continue;
            }
            loop {
                let claimed = claim_job(
                    &self.pool,
                    name,
                    &self.registry.identifiers(),
                    &self.node_id,
                    now,
                )
                .await?;
                match claimed {
                    Some(job) => {
                        execute_job(
                            &self.pool,
                            &self.registry,
                            job,
                            &self.node_id,
                            &self.retry_policy,
                            &self.active,
                        )
                        .await?;
                    }
                    None => break,
                }
            }
        }
        Ok(())
    }

    /// Evaluates every schedule rule against the given minute and inserts
    /// the due occurrences. The minute-boundary runner inside [`run`] does
    /// this automatically; this entry point exists for embedders driving
    /// time themselves.
    ///
    /// [`run`]: Engine::run
    pub async fn evaluate_cron_at(&self, at: DateTime<Utc>) -> Result<usize> {
        insert_due_entries(&self.create_utils(), &self.cron_entries, at).await
    }

    /// Asks a running engine to stop. Idempotent.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub(crate) fn spawn_dispatcher(&self, name: &str) {
        let Some(handle) = self.queues.get(name) else {
            return;
        };
        // One dispatcher per queue, ever.
        if handle.attached.swap(true, Ordering::SeqCst) {
            return;
        }

        let dispatcher = Dispatcher {
            queue: name.to_string(),
            pool: self.pool.clone(),
            registry: self.registry.clone(),
            node_id: self.node_id.clone(),
            poll_interval: self.poll_interval,
            retry_policy: self.retry_policy.clone(),
            active: self.active.clone(),
            runtime: handle.runtime.subscribe(),
            executing: handle.executing.clone(),
            wake: handle.wake.clone(),
            shutdown: self.shutdown.clone(),
        };
        let attached = handle.attached.clone();
        tokio::spawn(async move {
            dispatcher.run().await;
            attached.store(false, Ordering::SeqCst);
        });
    }

    async fn drain(&self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let executing: usize = self
                .queues
                .values()
                .map(|h| h.executing.load(Ordering::SeqCst))
                .sum();
            if executing == 0 {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(executing, "Grace period expired with jobs still executing");
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}
