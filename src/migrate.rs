use indoc::indoc;
use sqlx::SqlitePool;

use crate::errors::Result;

/// Idempotent schema setup, run once at engine init.
///
/// The supporting indexes mirror the two hot paths: dequeue ordering on
/// `(queue, state, priority, scheduled_at)` and conflict detection on the
/// uniqueness fingerprint.
const SCHEMA: &[&str] = &[
    indoc! {r#"
        create table if not exists conveyor_jobs (
            id integer primary key autoincrement,
            queue text not null,
            worker text not null,
            args text not null default '{}',
            state text not null default 'available',
            priority integer not null default 0,
            attempt integer not null default 0,
            max_attempts integer not null default 20,
            scheduled_at text not null,
            inserted_at text not null,
            attempted_at text,
            completed_at text,
            discarded_at text,
            cancelled_at text,
            attempted_by text,
            unique_key text,
            errors text not null default '[]'
        );
    "#},
    indoc! {r#"
        create index if not exists conveyor_jobs_dequeue_idx
            on conveyor_jobs (queue, state, priority, scheduled_at);
    "#},
    indoc! {r#"
        create index if not exists conveyor_jobs_unique_key_idx
            on conveyor_jobs (unique_key)
            where unique_key is not null;
    "#},
];

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
