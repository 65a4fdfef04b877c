mod helpers;

use chrono::{Duration, Utc};
use conveyor::{
    EngineUtils, InsertSpec, IntoOutcome, JobContext, JobState, OnConflict, UniqueOpts, Worker,
    WorkerConfig,
};
use helpers::{count_jobs, fetch_job, force_job_state, test_pool};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct Plain {
    n: i64,
}

impl Worker for Plain {
    const IDENTIFIER: &'static str = "plain";

    async fn perform(self, _cx: JobContext) -> impl IntoOutcome {}
}

#[derive(Serialize, Deserialize)]
struct Refund {
    id: i64,
    #[serde(default)]
    note: String,
}

impl Worker for Refund {
    const IDENTIFIER: &'static str = "refund";

    fn config() -> WorkerConfig {
        WorkerConfig::new()
            .queue("payments")
            .unique(UniqueOpts::new().by_arg_keys(["id"]).forever())
    }

    async fn perform(self, _cx: JobContext) -> impl IntoOutcome {}
}

#[derive(Serialize, Deserialize)]
struct Digest {
    day: String,
}

impl Worker for Digest {
    const IDENTIFIER: &'static str = "digest";

    fn config() -> WorkerConfig {
        WorkerConfig::new().unique(
            UniqueOpts::new()
                .states([JobState::Available, JobState::Discarded])
                .forever(),
        )
    }

    async fn perform(self, _cx: JobContext) -> impl IntoOutcome {}
}

async fn utils() -> (EngineUtils, sqlx::SqlitePool) {
    let pool = test_pool().await;
    let utils = EngineUtils::new(pool.clone());
    utils.migrate().await.expect("migration failed");
    (utils, pool)
}

#[tokio::test]
async fn insert_applies_engine_defaults() {
    let (utils, _pool) = utils().await;

    let result = utils.insert(Plain { n: 1 }).await.unwrap();
    assert!(!result.is_conflict());

    let job = result.job();
    assert_eq!(job.queue(), "default");
    assert_eq!(job.state(), &JobState::Available);
    assert_eq!(job.priority(), &0);
    assert_eq!(job.attempt(), &0);
    assert_eq!(job.max_attempts(), &20);
    assert_eq!(job.unique_key(), &None);
    assert!(job.scheduled_at() <= &Utc::now());
}

#[tokio::test]
async fn future_inserts_start_scheduled() {
    let (utils, _pool) = utils().await;

    let spec = InsertSpec::builder()
        .scheduled_at(Utc::now() + Duration::minutes(10))
        .build();
    let result = utils.insert_with(Plain { n: 1 }, spec).await.unwrap();

    assert_eq!(result.job().state(), &JobState::Scheduled);
}

#[tokio::test]
async fn worker_config_sets_queue_and_fingerprint() {
    let (utils, _pool) = utils().await;

    let result = utils
        .insert(Refund {
            id: 7,
            note: String::new(),
        })
        .await
        .unwrap();
    assert_eq!(result.job().queue(), "payments");
    assert!(result.job().unique_key().is_some());
}

#[tokio::test]
async fn duplicate_by_arg_key_conflicts_despite_other_args() {
    let (utils, pool) = utils().await;

    let first = utils
        .insert(Refund {
            id: 1,
            note: "first".into(),
        })
        .await
        .unwrap();
    assert!(!first.is_conflict());

    let second = utils
        .insert(Refund {
            id: 1,
            note: "second".into(),
        })
        .await
        .unwrap();
    assert!(second.is_conflict());
    assert_eq!(second.job().id(), first.job().id());
    // The existing row keeps its original args under the default policy.
    assert_eq!(second.job().args_value()["note"], "first");

    let third = utils
        .insert(Refund {
            id: 2,
            note: String::new(),
        })
        .await
        .unwrap();
    assert!(!third.is_conflict());
    assert_eq!(count_jobs(&pool).await, 2);
}

#[tokio::test]
async fn replace_policy_updates_the_existing_row() {
    let (utils, pool) = utils().await;

    let first = utils
        .insert(Refund {
            id: 4,
            note: "old".into(),
        })
        .await
        .unwrap();

    let later = Utc::now() + Duration::minutes(30);
    let spec = InsertSpec::builder()
        .priority(5)
        .scheduled_at(later)
        .on_conflict(OnConflict::Replace)
        .build();
    let second = utils
        .insert_with(
            Refund {
                id: 4,
                note: "new".into(),
            },
            spec,
        )
        .await
        .unwrap();

    assert!(second.is_conflict());
    assert_eq!(second.job().id(), first.job().id());
    assert_eq!(second.job().priority(), &5);
    assert_eq!(second.job().args_value()["note"], "new");

    let row = fetch_job(&pool, *first.job().id()).await;
    assert_eq!(row.priority(), &5);
    assert_eq!(count_jobs(&pool).await, 1);
}

#[tokio::test]
async fn replace_never_touches_an_executing_job() {
    let (utils, pool) = utils().await;

    let first = utils
        .insert(Refund {
            id: 5,
            note: "claimed".into(),
        })
        .await
        .unwrap();
    force_job_state(&pool, *first.job().id(), "executing", Some(Utc::now()), Some("node")).await;

    let spec = InsertSpec::builder()
        .priority(9)
        .on_conflict(OnConflict::Replace)
        .build();
    let second = utils
        .insert_with(
            Refund {
                id: 5,
                note: "replaced".into(),
            },
            spec,
        )
        .await
        .unwrap();

    assert!(second.is_conflict());
    let row = fetch_job(&pool, *first.job().id()).await;
    assert_eq!(row.priority(), &0);
    assert_eq!(row.args_value()["note"], "claimed");
}

#[tokio::test]
async fn dedupe_window_expires() {
    let (utils, pool) = utils().await;

    // Same fingerprint, but a 60 second window instead of forever.
    let windowed = UniqueOpts::new().by_arg_keys(["id"]).period_secs(60);
    let spec = InsertSpec::builder().unique(windowed.clone()).build();

    let first = utils
        .insert_with(
            Plain { n: 1 },
            InsertSpec::builder().unique(windowed.clone()).build(),
        )
        .await
        .unwrap();
    assert!(!first.is_conflict());

    // Age the row beyond the window.
    sqlx::query("update conveyor_jobs set inserted_at = ? where id = ?")
        .bind(Utc::now() - Duration::minutes(2))
        .bind(first.job().id())
        .execute(&pool)
        .await
        .unwrap();

    let second = utils.insert_with(Plain { n: 1 }, spec).await.unwrap();
    assert!(!second.is_conflict());
    assert_eq!(count_jobs(&pool).await, 2);
}

#[tokio::test]
async fn default_active_states_ignore_discarded_jobs() {
    let (utils, pool) = utils().await;

    let first = utils
        .insert(Refund {
            id: 6,
            note: String::new(),
        })
        .await
        .unwrap();
    force_job_state(&pool, *first.job().id(), "discarded", None, None).await;

    let second = utils
        .insert(Refund {
            id: 6,
            note: String::new(),
        })
        .await
        .unwrap();
    assert!(!second.is_conflict());
}

#[tokio::test]
async fn custom_active_states_can_block_on_discarded() {
    let (utils, pool) = utils().await;

    let first = utils
        .insert(Digest { day: "mon".into() })
        .await
        .unwrap();
    force_job_state(&pool, *first.job().id(), "discarded", None, None).await;

    let second = utils.insert(Digest { day: "mon".into() }).await.unwrap();
    assert!(second.is_conflict());
    assert_eq!(count_jobs(&pool).await, 1);
}

#[tokio::test]
async fn queue_is_part_of_the_default_fingerprint() {
    let (utils, _pool) = utils().await;

    let first = utils
        .insert(Refund {
            id: 8,
            note: String::new(),
        })
        .await
        .unwrap();
    assert!(!first.is_conflict());

    let other_queue = InsertSpec::builder().queue("backfill").build();
    let second = utils
        .insert_with(
            Refund {
                id: 8,
                note: String::new(),
            },
            other_queue,
        )
        .await
        .unwrap();
    assert!(!second.is_conflict());
}
