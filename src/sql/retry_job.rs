use chrono::Utc;
use indoc::indoc;
use sqlx::SqliteExecutor;

use crate::errors::Result;
use crate::job::Job;
use crate::job_spec::JobFilter;

/// Returns a discarded job to `available` for a fresh run.
///
/// The attempt counter resets to zero and the discard timestamp clears, so
/// the job gets its full attempt budget again. The error log is kept. Only
/// discarded jobs match.
pub(crate) async fn retry_job<'e>(
    executor: impl SqliteExecutor<'e>,
    job_id: i64,
) -> Result<Option<Job>> {
    let sql = indoc! {r#"
        update conveyor_jobs
            set
                state = 'available',
                attempt = 0,
                scheduled_at = ?,
                discarded_at = null,
                attempted_by = null
            where id = ?
                and state = 'discarded'
            returning *
    "#};

    let updated: Option<Job> = sqlx::query_as(sql)
        .bind(Utc::now())
        .bind(job_id)
        .fetch_optional(executor)
        .await?;

    Ok(updated)
}

/// Bulk variant of [`retry_job`]: every discarded job matching the filter
/// becomes available again. Returns how many rows moved.
pub(crate) async fn retry_jobs<'e>(
    executor: impl SqliteExecutor<'e>,
    filter: &JobFilter,
) -> Result<u64> {
    let mut sql = String::from(indoc! {r#"
        update conveyor_jobs
            set
                state = 'available',
                attempt = 0,
                scheduled_at = ?,
                discarded_at = null,
                attempted_by = null
            where state = 'discarded'
    "#});
    if filter.queue.is_some() {
        sql.push_str(" and queue = ?");
    }
    if filter.worker.is_some() {
        sql.push_str(" and worker = ?");
    }

    let mut query = sqlx::query(&sql).bind(Utc::now());
    if let Some(queue) = &filter.queue {
        query = query.bind(queue);
    }
    if let Some(worker) = &filter.worker {
        query = query.bind(worker);
    }

    let result = query.execute(executor).await?;
    Ok(result.rows_affected())
}
