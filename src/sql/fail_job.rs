use chrono::{DateTime, Utc};
use indoc::indoc;
use sqlx::types::Json;
use sqlx::SqliteExecutor;

use crate::errors::Result;
use crate::job::{ErrorEntry, Job};

/// Releases a failed claim, appending the failure to the job's error log.
///
/// With `retry_at` the job becomes `retryable` and is next eligible at that
/// time; without it the job is `discarded`. Like [`complete_job`], the
/// update is conditional on the claim so a concurrent cancel wins.
///
/// [`complete_job`]: crate::sql::complete_job::complete_job
pub(crate) async fn fail_job<'e>(
    executor: impl SqliteExecutor<'e>,
    job: &Job,
    node_id: &str,
    message: &str,
    retry_at: Option<DateTime<Utc>>,
) -> Result<Option<Job>> {
    let now = Utc::now();
    let mut errors = job.error_entries().to_vec();
    errors.push(ErrorEntry {
        attempt: *job.attempt(),
        recorded_at: now,
        message: message.to_string(),
    });

    let updated: Option<Job> = match retry_at {
        Some(retry_at) => {
            let sql = indoc! {r#"
                update conveyor_jobs
                    set
                        state = 'retryable',
                        scheduled_at = ?,
                        errors = ?,
                        attempted_by = null
                    where id = ?
                        and state = 'executing'
                        and attempted_by = ?
                    returning *
            "#};
            sqlx::query_as(sql)
                .bind(retry_at)
                .bind(Json(&errors))
                .bind(job.id())
                .bind(node_id)
                .fetch_optional(executor)
                .await?
        }
        None => {
            let sql = indoc! {r#"
                update conveyor_jobs
                    set
                        state = 'discarded',
                        discarded_at = ?,
                        errors = ?,
                        attempted_by = null
                    where id = ?
                        and state = 'executing'
                        and attempted_by = ?
                    returning *
            "#};
            sqlx::query_as(sql)
                .bind(now)
                .bind(Json(&errors))
                .bind(job.id())
                .bind(node_id)
                .fetch_optional(executor)
                .await?
        }
    };

    Ok(updated)
}
