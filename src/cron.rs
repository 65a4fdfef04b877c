use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, DurationRound, Utc};
use conveyor_schedule::CronEntry;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::errors::{ConfigError, Result};
use crate::job_spec::{InsertResult, InsertSpec};
use crate::utils::EngineUtils;
use crate::worker::Registry;

/// Startup validation of schedule rules against the worker registry.
pub(crate) fn validate_entries(entries: &[CronEntry], registry: &Registry) -> Vec<ConfigError> {
    let mut issues = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for entry in entries {
        if !registry.contains(entry.worker()) {
            issues.push(ConfigError::UnknownCronWorker {
                rule: entry.identifier().to_string(),
                worker: entry.worker().clone(),
            });
        }
        if !seen.insert(entry.identifier()) {
            issues.push(ConfigError::DuplicateCronId(entry.identifier().to_string()));
        }
    }
    issues
}

/// Evaluates every rule against one wall-clock minute and inserts the due
/// ones through the regular unique-checked path. Returns how many new jobs
/// were created; occurrences another node already inserted come back as
/// conflicts and are not counted.
pub(crate) async fn insert_due_entries(
    utils: &EngineUtils,
    entries: &[CronEntry],
    at: DateTime<Utc>,
) -> Result<usize> {
    let mut inserted = 0;
    for entry in entries.iter().filter(|e| e.should_run_at(&at.naive_utc())) {
        let mut builder = InsertSpec::builder().scheduled_at(at);
        if let Some(queue) = entry.options().queue() {
            builder = builder.queue(queue.clone());
        }
        if let Some(max) = entry.options().max() {
            builder = builder.max_attempts(i64::from(*max));
        }
        if let Some(priority) = entry.options().priority() {
            builder = builder.priority(i64::from(*priority));
        }

        let args = entry.args().clone().unwrap_or_else(|| json!({}));
        let result = utils
            .insert_occurrence(entry.worker(), args, builder.build(), at)
            .await?;
        match result {
            InsertResult::Inserted(job) => {
                debug!(rule = entry.identifier(), job_id = *job.id(), "Cron rule fired");
                inserted += 1;
            }
            InsertResult::Conflict(_) => {
                debug!(rule = entry.identifier(), "Cron occurrence already inserted");
            }
        }
    }
    Ok(inserted)
}

/// Fires schedule rules on minute boundaries until shutdown.
///
/// Each cycle sleeps to the next minute boundary and evaluates every rule
/// against that minute. Minutes that pass while the engine is down are not
/// backfilled.
pub(crate) async fn cron_runner(
    utils: &EngineUtils,
    entries: &[CronEntry],
    shutdown: CancellationToken,
) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    info!(rules = entries.len(), "Cron runner started");

    loop {
        let now = Utc::now();
        let next = next_minute(now);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Cron runner shutting down");
                return Ok(());
            }
            _ = tokio::time::sleep(wait) => {}
        }

        if let Err(e) = insert_due_entries(utils, entries, next).await {
            error!(error = ?e, "Failed to insert cron occurrences");
        }
    }
}

fn next_minute(now: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = now
        .duration_trunc(chrono::Duration::minutes(1))
        .unwrap_or(now);
    truncated + chrono::Duration::minutes(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use conveyor_schedule::parse_cron;

    #[test]
    fn next_minute_rounds_up() {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 10, 15, 42).unwrap();
        let next = next_minute(at);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 2, 10, 16, 0).unwrap());
    }

    #[test]
    fn duplicate_rule_ids_are_rejected() {
        let entries = parse_cron("0 * * * * cleanup\n30 * * * * cleanup\n").unwrap();
        let issues = validate_entries(&entries, &Registry::default());
        assert!(issues
            .iter()
            .any(|i| matches!(i, ConfigError::DuplicateCronId(id) if id == "cleanup")));
    }

    #[test]
    fn unknown_workers_are_rejected() {
        let entries = parse_cron("* * * * * nobody\n").unwrap();
        let issues = validate_entries(&entries, &Registry::default());
        assert!(issues.iter().any(|i| matches!(
            i,
            ConfigError::UnknownCronWorker { worker, .. } if worker == "nobody"
        )));
    }
}
