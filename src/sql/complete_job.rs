use chrono::Utc;
use indoc::indoc;
use sqlx::SqliteExecutor;

use crate::errors::Result;
use crate::job::Job;

/// Marks an executing job completed and releases the claim.
///
/// Conditional on the claim still being held by this node: if an operator
/// cancelled the job mid-flight the update matches nothing and the cancel
/// wins. Returns the updated row, or `None` when the claim was gone.
pub(crate) async fn complete_job<'e>(
    executor: impl SqliteExecutor<'e>,
    job: &Job,
    node_id: &str,
) -> Result<Option<Job>> {
    let sql = indoc! {r#"
        update conveyor_jobs
            set
                state = 'completed',
                completed_at = ?,
                attempted_by = null
            where id = ?
                and state = 'executing'
                and attempted_by = ?
            returning *
    "#};

    let updated: Option<Job> = sqlx::query_as(sql)
        .bind(Utc::now())
        .bind(job.id())
        .bind(node_id)
        .fetch_optional(executor)
        .await?;

    Ok(updated)
}
