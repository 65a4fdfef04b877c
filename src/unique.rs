use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::job::JobState;

/// How long a fingerprint blocks conflicting inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniquePeriod {
    /// Conflicts only against jobs inserted within the last `n` seconds
    Seconds(u64),
    /// Conflicts against any matching job, regardless of age
    Forever,
}

impl Default for UniquePeriod {
    fn default() -> Self {
        UniquePeriod::Seconds(60)
    }
}

/// Which job fields feed the deduplication fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqueFields {
    pub worker: bool,
    pub queue: bool,
    pub args: bool,
}

impl Default for UniqueFields {
    fn default() -> Self {
        UniqueFields {
            worker: true,
            queue: true,
            args: true,
        }
    }
}

/// Uniqueness policy for a worker: which fields form the fingerprint, which
/// states count as active conflicts, and for how long.
///
/// Defaults: fingerprint over worker, queue and the full args object;
/// every state except `cancelled` and `discarded` is active; 60 second
/// period.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UniqueOpts {
    pub(crate) fields: UniqueFields,
    /// When non-empty, only these top-level arg keys feed the fingerprint
    pub(crate) keys: Vec<String>,
    /// Overrides the default active-state set when non-empty
    pub(crate) states: Vec<JobState>,
    pub(crate) period: UniquePeriod,
}

impl UniqueOpts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the fingerprint to the given top-level arg keys.
    pub fn by_arg_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Exclude a field group from the fingerprint.
    pub fn fields(mut self, fields: UniqueFields) -> Self {
        self.fields = fields;
        self
    }

    /// Override the active-state set.
    pub fn states(mut self, states: impl IntoIterator<Item = JobState>) -> Self {
        self.states = states.into_iter().collect();
        self
    }

    pub fn period(mut self, period: UniquePeriod) -> Self {
        self.period = period;
        self
    }

    pub fn period_secs(self, secs: u64) -> Self {
        self.period(UniquePeriod::Seconds(secs))
    }

    pub fn forever(self) -> Self {
        self.period(UniquePeriod::Forever)
    }

    /// The states in which an existing job blocks a new insert.
    pub fn active_states(&self) -> Vec<JobState> {
        if !self.states.is_empty() {
            return self.states.clone();
        }
        vec![
            JobState::Available,
            JobState::Scheduled,
            JobState::Executing,
            JobState::Retryable,
            JobState::Completed,
        ]
    }

    /// Compute the deduplication fingerprint for a candidate job.
    ///
    /// The args object serializes with sorted keys (serde_json's default map
    /// is ordered), so two payloads that are equal as JSON values always
    /// hash identically.
    pub fn fingerprint(&self, worker: &str, queue: &str, args: &Value) -> String {
        let mut hasher = Sha256::new();
        if self.fields.worker {
            hasher.update(worker.as_bytes());
        }
        hasher.update([0u8]);
        if self.fields.queue {
            hasher.update(queue.as_bytes());
        }
        hasher.update([0u8]);
        if self.fields.args {
            let selected = self.select_args(args);
            hasher.update(selected.to_string().as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    fn select_args(&self, args: &Value) -> Value {
        if self.keys.is_empty() {
            return args.clone();
        }
        match args {
            Value::Object(map) => {
                let filtered = map
                    .iter()
                    .filter(|(k, _)| self.keys.iter().any(|key| key == *k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Value::Object(filtered)
            }
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_candidates_share_a_fingerprint() {
        let opts = UniqueOpts::new();
        let a = opts.fingerprint("refund", "payments", &json!({"id": 1}));
        let b = opts.fingerprint("refund", "payments", &json!({"id": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn differing_args_change_the_fingerprint() {
        let opts = UniqueOpts::new();
        let a = opts.fingerprint("refund", "payments", &json!({"id": 1}));
        let b = opts.fingerprint("refund", "payments", &json!({"id": 2}));
        assert_ne!(a, b);
    }

    #[test]
    fn key_selection_ignores_other_args() {
        let opts = UniqueOpts::new().by_arg_keys(["id"]);
        let a = opts.fingerprint("refund", "payments", &json!({"id": 1}));
        let b = opts.fingerprint("refund", "payments", &json!({"id": 1, "reason": "x"}));
        assert_eq!(a, b);
    }

    #[test]
    fn key_order_does_not_matter() {
        let opts = UniqueOpts::new();
        let a = opts.fingerprint("refund", "q", &json!({"a": 1, "b": 2}));
        let b: Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        assert_eq!(a, opts.fingerprint("refund", "q", &b));
    }

    #[test]
    fn disabled_fields_drop_out() {
        let opts = UniqueOpts::new().fields(UniqueFields {
            worker: true,
            queue: false,
            args: true,
        });
        let a = opts.fingerprint("refund", "payments", &json!({"id": 1}));
        let b = opts.fingerprint("refund", "backfill", &json!({"id": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn default_active_states_exclude_cancelled_and_discarded() {
        let states = UniqueOpts::new().active_states();
        assert!(!states.contains(&JobState::Cancelled));
        assert!(!states.contains(&JobState::Discarded));
        assert!(states.contains(&JobState::Executing));
        assert!(states.contains(&JobState::Completed));
    }
}
