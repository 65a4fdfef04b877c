use chrono::Utc;
use indoc::indoc;
use sqlx::SqliteExecutor;

use crate::errors::Result;
use crate::job::Job;

/// Moves a non-terminal job to `cancelled`.
///
/// The state guard makes the cancel race-safe against a job finishing at
/// the same moment: a job that just completed stays completed and the
/// update returns `None`. Cooperative interruption of an executing job is
/// the caller's concern.
pub(crate) async fn cancel_job<'e>(
    executor: impl SqliteExecutor<'e>,
    job_id: i64,
) -> Result<Option<Job>> {
    let sql = indoc! {r#"
        update conveyor_jobs
            set
                state = 'cancelled',
                cancelled_at = ?,
                attempted_by = null
            where id = ?
                and state in ('available', 'scheduled', 'executing', 'retryable')
            returning *
    "#};

    let updated: Option<Job> = sqlx::query_as(sql)
        .bind(Utc::now())
        .bind(job_id)
        .fetch_optional(executor)
        .await?;

    Ok(updated)
}
