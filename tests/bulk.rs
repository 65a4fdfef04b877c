mod helpers;

use conveyor::{
    EngineUtils, IntoOutcome, JobContext, JobInsert, UniqueOpts, Worker, WorkerConfig,
};
use helpers::{count_jobs, test_pool};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct Sync {
    id: i64,
}

impl Worker for Sync {
    const IDENTIFIER: &'static str = "sync";

    fn config() -> WorkerConfig {
        WorkerConfig::new().unique(UniqueOpts::new().by_arg_keys(["id"]).forever())
    }

    async fn perform(self, _cx: JobContext) -> impl IntoOutcome {}
}

#[derive(Serialize, Deserialize)]
struct Notify {
    user: String,
}

impl Worker for Notify {
    const IDENTIFIER: &'static str = "notify";

    async fn perform(self, _cx: JobContext) -> impl IntoOutcome {}
}

#[tokio::test]
async fn batch_results_come_back_in_input_order() {
    let pool = test_pool().await;
    let utils = EngineUtils::new(pool.clone());
    utils.migrate().await.unwrap();

    let results = utils
        .insert_all(vec![
            JobInsert::new(Notify { user: "a".into() }).unwrap(),
            JobInsert::new(Sync { id: 1 }).unwrap(),
            JobInsert::new(Notify { user: "b".into() }).unwrap(),
        ])
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].job().worker(), "notify");
    assert_eq!(results[0].job().args_value()["user"], "a");
    assert_eq!(results[1].job().worker(), "sync");
    assert_eq!(results[2].job().args_value()["user"], "b");
    assert!(results[0].job().id() < results[1].job().id());
    assert!(results[1].job().id() < results[2].job().id());
}

#[tokio::test]
async fn in_batch_duplicates_collapse_onto_one_row() {
    let pool = test_pool().await;
    let utils = EngineUtils::new(pool.clone());
    utils.migrate().await.unwrap();

    let results = utils
        .insert_all(vec![
            JobInsert::new(Sync { id: 1 }).unwrap(),
            JobInsert::new(Sync { id: 1 }).unwrap(),
            JobInsert::new(Sync { id: 2 }).unwrap(),
            JobInsert::new(Sync { id: 1 }).unwrap(),
        ])
        .await
        .unwrap();

    assert!(!results[0].is_conflict());
    assert!(results[1].is_conflict());
    assert!(!results[2].is_conflict());
    assert!(results[3].is_conflict());
    assert_eq!(results[1].job().id(), results[0].job().id());
    assert_eq!(results[3].job().id(), results[0].job().id());
    assert_eq!(count_jobs(&pool).await, 2);
}

#[tokio::test]
async fn batch_conflicts_against_existing_rows() {
    let pool = test_pool().await;
    let utils = EngineUtils::new(pool.clone());
    utils.migrate().await.unwrap();

    let existing = utils.insert(Sync { id: 9 }).await.unwrap();

    let results = utils
        .insert_all(vec![
            JobInsert::new(Sync { id: 9 }).unwrap(),
            JobInsert::new(Sync { id: 10 }).unwrap(),
        ])
        .await
        .unwrap();

    assert!(results[0].is_conflict());
    assert_eq!(results[0].job().id(), existing.job().id());
    assert!(!results[1].is_conflict());
    assert_eq!(count_jobs(&pool).await, 2);
}

#[tokio::test]
async fn batches_leave_no_transaction_behind() {
    // Single-connection pool: any batch that leaked its transaction would
    // poison every insert after it.
    let pool = test_pool().await;
    let utils = EngineUtils::new(pool.clone());
    utils.migrate().await.unwrap();

    for _ in 0..3 {
        let results = utils
            .insert_all(vec![
                JobInsert::new(Sync { id: 1 }).unwrap(),
                JobInsert::new(Sync { id: 1 }).unwrap(),
            ])
            .await
            .unwrap();
        assert!(results[1].is_conflict());
    }

    utils.insert(Notify { user: "z".into() }).await.unwrap();
    assert_eq!(count_jobs(&pool).await, 2);
}

#[tokio::test]
async fn empty_batches_are_fine() {
    let pool = test_pool().await;
    let utils = EngineUtils::new(pool.clone());
    utils.migrate().await.unwrap();

    let results = utils.insert_all(vec![]).await.unwrap();
    assert!(results.is_empty());
    assert_eq!(count_jobs(&pool).await, 0);
}

#[tokio::test]
async fn per_candidate_specs_apply() {
    let pool = test_pool().await;
    let utils = EngineUtils::new(pool.clone());
    utils.migrate().await.unwrap();

    let spec = conveyor::InsertSpec::builder().queue("vip").priority(1).build();
    let results = utils
        .insert_all(vec![
            JobInsert::new(Notify { user: "a".into() }).unwrap().with_spec(spec),
            JobInsert::new(Notify { user: "b".into() }).unwrap(),
        ])
        .await
        .unwrap();

    assert_eq!(results[0].job().queue(), "vip");
    assert_eq!(results[0].job().priority(), &1);
    assert_eq!(results[1].job().queue(), "default");
}
