use chrono::{DateTime, Utc};
use indoc::formatdoc;
use sqlx::SqliteExecutor;

use crate::errors::Result;
use crate::job::Job;
use crate::sql::worker_list;

/// Claims the single most eligible job on a queue, or `None` when nothing
/// is due.
///
/// Promotion of due `scheduled` and `retryable` rows is folded into the
/// claim itself: any row in a claimable state whose `scheduled_at` has
/// passed goes straight to `executing` without touching `available` first.
/// The conditional update makes the claim atomic, so a row is handed to at
/// most one caller.
///
/// Ordering: lowest `priority` first, then earliest `scheduled_at`, then
/// lowest `id`.
pub(crate) async fn claim_job<'e>(
    executor: impl SqliteExecutor<'e>,
    queue: &str,
    workers: &[&str],
    node_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<Job>> {
    if workers.is_empty() {
        return Ok(None);
    }

    let sql = formatdoc!(
        r#"
            update conveyor_jobs
                set
                    state = 'executing',
                    attempt = attempt + 1,
                    attempted_at = ?,
                    attempted_by = ?
                where id = (
                    select id
                        from conveyor_jobs
                        where queue = ?
                            and state in ('available', 'scheduled', 'retryable')
                            and scheduled_at <= ?
                            and worker in ({workers})
                        order by priority asc, scheduled_at asc, id asc
                        limit 1
                )
                and state in ('available', 'scheduled', 'retryable')
                returning *
        "#,
        workers = worker_list(workers),
    );

    let job: Option<Job> = sqlx::query_as(&sql)
        .bind(now)
        .bind(node_id)
        .bind(queue)
        .bind(now)
        .fetch_optional(executor)
        .await?;

    Ok(job)
}
