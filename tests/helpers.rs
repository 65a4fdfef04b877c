#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use conveyor::{Engine, EngineOptions, Job};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing_subscriber::EnvFilter;

/// Installs the tracing subscriber for the test binary. Later calls are
/// no-ops; `RUST_LOG` controls the filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A fresh in-memory database. Single connection and no recycling, so the
/// memory database lives as long as the pool.
pub async fn test_pool() -> SqlitePool {
    init_tracing();
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory database")
}

/// Engine options preconfigured for tests: shared pool, fast polling.
pub async fn test_options() -> (EngineOptions, SqlitePool) {
    let pool = test_pool().await;
    let options = EngineOptions::default()
        .pool(pool.clone())
        .poll_interval(std::time::Duration::from_millis(20));
    (options, pool)
}

pub async fn fetch_job(pool: &SqlitePool, job_id: i64) -> Job {
    sqlx::query_as("select * from conveyor_jobs where id = ?")
        .bind(job_id)
        .fetch_one(pool)
        .await
        .expect("job row should exist")
}

pub async fn count_jobs(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("select count(*) from conveyor_jobs")
        .fetch_one(pool)
        .await
        .expect("count query failed")
}

/// Forces a job row into an arbitrary shape, for scenarios that are hard
/// to reach through the public API alone.
pub async fn force_job_state(
    pool: &SqlitePool,
    job_id: i64,
    state: &str,
    attempted_at: Option<DateTime<Utc>>,
    attempted_by: Option<&str>,
) {
    sqlx::query("update conveyor_jobs set state = ?, attempted_at = ?, attempted_by = ? where id = ?")
        .bind(state)
        .bind(attempted_at)
        .bind(attempted_by)
        .bind(job_id)
        .execute(pool)
        .await
        .expect("failed to force job state");
}

/// Waits until the engine has settled the expected number of jobs, or
/// panics after a couple of seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool, what: &str) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Spawns `engine.run()` on its own task.
pub fn spawn_engine(engine: std::sync::Arc<Engine>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        engine.run().await.expect("engine run failed");
    })
}

/// Shared counter for asserting how often a worker ran.
#[derive(Default)]
pub struct StaticCounter {
    count: AtomicUsize,
}

impl StaticCounter {
    pub const fn new() -> Self {
        StaticCounter {
            count: AtomicUsize::new(0),
        }
    }

    pub fn increment(&self) -> usize {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }
}

/// Shared log recording the order workers observed their payloads.
#[derive(Default)]
pub struct StaticLog {
    entries: Mutex<Vec<i64>>,
}

impl StaticLog {
    pub const fn new() -> Self {
        StaticLog {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, value: i64) {
        self.entries.lock().unwrap().push(value);
    }

    pub fn snapshot(&self) -> Vec<i64> {
        self.entries.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.entries.lock().unwrap().clear();
    }
}
