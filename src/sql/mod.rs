pub(crate) mod cancel_job;
pub(crate) mod claim_job;
pub(crate) mod complete_job;
pub(crate) mod fail_job;
pub(crate) mod get_job;
pub(crate) mod insert_job;
pub(crate) mod maintenance;
pub(crate) mod retry_job;

use crate::job::JobState;

/// Renders a quoted, comma separated state list for a `state in (...)`
/// clause. States are enum constants, never user input.
pub(crate) fn state_list(states: &[JobState]) -> String {
    states
        .iter()
        .map(|s| format!("'{s}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Same for worker identifiers, which come from `Worker::IDENTIFIER`
/// constants registered at build time.
pub(crate) fn worker_list(workers: &[&str]) -> String {
    workers
        .iter()
        .map(|w| format!("'{w}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_list_quotes_and_joins() {
        let list = state_list(&[JobState::Available, JobState::Retryable]);
        assert_eq!(list, "'available', 'retryable'");
    }

    #[test]
    fn worker_list_quotes_identifiers() {
        assert_eq!(worker_list(&["a", "b"]), "'a', 'b'");
    }
}
