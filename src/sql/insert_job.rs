use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use indoc::{formatdoc, indoc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::SqliteConnection;

use crate::errors::Result;
use crate::job::{Job, JobState};
use crate::job_spec::{InsertResult, OnConflict};
use crate::sql::state_list;
use crate::unique::UniquePeriod;

/// A fully resolved insert candidate: every default already applied, the
/// uniqueness fingerprint already computed.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedInsert {
    pub(crate) worker: String,
    pub(crate) queue: String,
    pub(crate) args: Value,
    pub(crate) priority: i64,
    pub(crate) max_attempts: i64,
    pub(crate) scheduled_at: DateTime<Utc>,
    pub(crate) unique: Option<ResolvedUnique>,
    pub(crate) on_conflict: OnConflict,
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedUnique {
    pub(crate) key: String,
    pub(crate) states: Vec<JobState>,
    pub(crate) period: UniquePeriod,
    /// When set, only jobs scheduled for exactly this time conflict. Used
    /// by the cron runner to dedupe per occurrence.
    pub(crate) match_scheduled_at: Option<DateTime<Utc>>,
}

/// Inserts a batch of candidates, applying uniqueness per candidate.
///
/// The caller wraps this in a write transaction, which gives the
/// check-and-insert its atomicity and makes the whole batch all-or-nothing.
/// Results come back in input order; candidates in the same batch that
/// share a fingerprint collapse onto the first one's row.
pub(crate) async fn insert_jobs(
    conn: &mut SqliteConnection,
    candidates: &[ResolvedInsert],
) -> Result<Vec<InsertResult>> {
    let now = Utc::now();
    let mut results: Vec<InsertResult> = Vec::with_capacity(candidates.len());
    let mut seen: HashMap<String, usize> = HashMap::new();

    for candidate in candidates {
        if let Some(unique) = &candidate.unique {
            if let Some(&idx) = seen.get(&unique.key) {
                let earlier = results[idx].job().clone();
                results.push(InsertResult::Conflict(earlier));
                continue;
            }
            if let Some(existing) = find_conflict(&mut *conn, unique, now).await? {
                let resolved = resolve_conflict(&mut *conn, candidate, existing).await?;
                seen.insert(unique.key.clone(), results.len());
                results.push(InsertResult::Conflict(resolved));
                continue;
            }
        }

        let inserted = insert_one(&mut *conn, candidate, now).await?;
        if let Some(unique) = &candidate.unique {
            seen.insert(unique.key.clone(), results.len());
        }
        results.push(InsertResult::Inserted(inserted));
    }

    Ok(results)
}

async fn find_conflict(
    conn: &mut SqliteConnection,
    unique: &ResolvedUnique,
    now: DateTime<Utc>,
) -> Result<Option<Job>> {
    let cutoff = match unique.period {
        UniquePeriod::Forever => None,
        UniquePeriod::Seconds(secs) => Some(now - Duration::seconds(secs as i64)),
    };

    let mut sql = formatdoc!(
        r#"
            select *
                from conveyor_jobs
                where unique_key = ?
                    and state in ({states})
        "#,
        states = state_list(&unique.states),
    );
    if cutoff.is_some() {
        sql.push_str(" and inserted_at >= ?");
    }
    if unique.match_scheduled_at.is_some() {
        sql.push_str(" and scheduled_at = ?");
    }
    sql.push_str(" order by id desc limit 1");

    let mut query = sqlx::query_as(&sql).bind(&unique.key);
    if let Some(cutoff) = cutoff {
        query = query.bind(cutoff);
    }
    if let Some(at) = unique.match_scheduled_at {
        query = query.bind(at);
    }

    let existing: Option<Job> = query.fetch_optional(conn).await?;
    Ok(existing)
}

/// Applies the candidate's conflict policy to the existing row.
///
/// `Replace` rewrites schedule, args, priority and attempt ceiling in
/// place; an executing job is never touched, its claim holder owns it.
async fn resolve_conflict(
    conn: &mut SqliteConnection,
    candidate: &ResolvedInsert,
    existing: Job,
) -> Result<Job> {
    if candidate.on_conflict == OnConflict::Reject {
        return Ok(existing);
    }

    let sql = indoc! {r#"
        update conveyor_jobs
            set
                scheduled_at = ?,
                args = ?,
                priority = ?,
                max_attempts = ?
            where id = ?
                and state != 'executing'
            returning *
    "#};

    let updated: Option<Job> = sqlx::query_as(sql)
        .bind(candidate.scheduled_at)
        .bind(Json(&candidate.args))
        .bind(candidate.priority)
        .bind(candidate.max_attempts)
        .bind(existing.id())
        .fetch_optional(conn)
        .await?;

    Ok(updated.unwrap_or(existing))
}

async fn insert_one(
    conn: &mut SqliteConnection,
    candidate: &ResolvedInsert,
    now: DateTime<Utc>,
) -> Result<Job> {
    let state = if candidate.scheduled_at > now {
        JobState::Scheduled
    } else {
        JobState::Available
    };

    let sql = indoc! {r#"
        insert into conveyor_jobs
            (queue, worker, args, state, priority, max_attempts, scheduled_at, inserted_at, unique_key)
            values (?, ?, ?, ?, ?, ?, ?, ?, ?)
            returning *
    "#};

    let job: Job = sqlx::query_as(sql)
        .bind(&candidate.queue)
        .bind(&candidate.worker)
        .bind(Json(&candidate.args))
        .bind(state)
        .bind(candidate.priority)
        .bind(candidate.max_attempts)
        .bind(candidate.scheduled_at)
        .bind(now)
        .bind(candidate.unique.as_ref().map(|u| u.key.as_str()))
        .fetch_one(conn)
        .await?;

    Ok(job)
}
