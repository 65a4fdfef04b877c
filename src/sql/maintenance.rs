use chrono::{DateTime, Utc};
use indoc::indoc;
use sqlx::types::Json;
use sqlx::SqliteExecutor;

use crate::errors::Result;
use crate::job::{ErrorEntry, Job};

/// Jobs still marked `executing` whose claim is older than the cutoff.
/// These belong to a node that crashed or lost its lease.
pub(crate) async fn stale_executing<'e>(
    executor: impl SqliteExecutor<'e>,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Job>> {
    let sql = indoc! {r#"
        select *
            from conveyor_jobs
            where state = 'executing'
                and attempted_at <= ?
            order by id asc
    "#};

    let jobs: Vec<Job> = sqlx::query_as(sql).bind(cutoff).fetch_all(executor).await?;
    Ok(jobs)
}

/// Releases one stale claim, recording the expiry on the error log.
///
/// The interrupted attempt was already counted at claim time, so a job
/// out of attempts is discarded; otherwise it becomes available again
/// immediately.
pub(crate) async fn release_stale_job<'e>(
    executor: impl SqliteExecutor<'e>,
    job: &Job,
    message: &str,
) -> Result<Option<Job>> {
    let now = Utc::now();
    let mut errors = job.error_entries().to_vec();
    errors.push(ErrorEntry {
        attempt: *job.attempt(),
        recorded_at: now,
        message: message.to_string(),
    });

    let exhausted = job.attempt() >= job.max_attempts();
    let updated: Option<Job> = if exhausted {
        let sql = indoc! {r#"
            update conveyor_jobs
                set
                    state = 'discarded',
                    discarded_at = ?,
                    errors = ?,
                    attempted_by = null
                where id = ?
                    and state = 'executing'
                returning *
        "#};
        sqlx::query_as(sql)
            .bind(now)
            .bind(Json(&errors))
            .bind(job.id())
            .fetch_optional(executor)
            .await?
    } else {
        let sql = indoc! {r#"
            update conveyor_jobs
                set
                    state = 'available',
                    scheduled_at = ?,
                    errors = ?,
                    attempted_by = null
                where id = ?
                    and state = 'executing'
                returning *
        "#};
        sqlx::query_as(sql)
            .bind(now)
            .bind(Json(&errors))
            .bind(job.id())
            .fetch_optional(executor)
            .await?
    };

    Ok(updated)
}

/// Deletes terminal jobs that reached their final state before the cutoff.
/// Returns how many rows were removed.
pub(crate) async fn prune_jobs<'e>(
    executor: impl SqliteExecutor<'e>,
    cutoff: DateTime<Utc>,
) -> Result<u64> {
    let sql = indoc! {r#"
        delete from conveyor_jobs
            where (state = 'completed' and completed_at <= ?)
                or (state = 'discarded' and discarded_at <= ?)
                or (state = 'cancelled' and cancelled_at <= ?)
    "#};

    let result = sqlx::query(sql)
        .bind(cutoff)
        .bind(cutoff)
        .bind(cutoff)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}
