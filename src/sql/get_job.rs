use indoc::indoc;
use sqlx::SqliteExecutor;

use crate::errors::Result;
use crate::job::Job;
use crate::job_spec::JobFilter;

pub(crate) async fn get_job<'e>(
    executor: impl SqliteExecutor<'e>,
    job_id: i64,
) -> Result<Option<Job>> {
    let sql = indoc! {r#"
        select *
            from conveyor_jobs
            where id = ?
    "#};

    let job: Option<Job> = sqlx::query_as(sql)
        .bind(job_id)
        .fetch_optional(executor)
        .await?;

    Ok(job)
}

/// Lists jobs matching the filter, oldest first.
pub(crate) async fn jobs_where<'e>(
    executor: impl SqliteExecutor<'e>,
    filter: &JobFilter,
) -> Result<Vec<Job>> {
    let mut sql = String::from("select * from conveyor_jobs where 1 = 1");
    if filter.queue.is_some() {
        sql.push_str(" and queue = ?");
    }
    if filter.worker.is_some() {
        sql.push_str(" and worker = ?");
    }
    if filter.state.is_some() {
        sql.push_str(" and state = ?");
    }
    sql.push_str(" order by id asc");

    let mut query = sqlx::query_as(&sql);
    if let Some(queue) = &filter.queue {
        query = query.bind(queue);
    }
    if let Some(worker) = &filter.worker {
        query = query.bind(worker);
    }
    if let Some(state) = &filter.state {
        query = query.bind(state);
    }

    let jobs: Vec<Job> = query.fetch_all(executor).await?;
    Ok(jobs)
}
