use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::JobContext;
use crate::unique::UniqueOpts;

/// The result of running one job's work function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The job finished; it transitions to `completed`.
    Complete,
    /// The job failed recoverably. It transitions to `retryable` (with the
    /// custom delay when given, the engine's backoff policy otherwise), or
    /// to `discarded` when its attempts are exhausted.
    Retry {
        delay: Option<Duration>,
        reason: String,
    },
    /// The job must not be retried; it transitions to `discarded`
    /// regardless of remaining attempts.
    Discard { reason: String },
}

impl Outcome {
    /// A recoverable failure using the engine's backoff policy.
    pub fn failure(reason: impl Into<String>) -> Self {
        Outcome::Retry {
            delay: None,
            reason: reason.into(),
        }
    }

    /// An explicit "retry later" with a custom delay.
    pub fn retry_in(delay: Duration, reason: impl Into<String>) -> Self {
        Outcome::Retry {
            delay: Some(delay),
            reason: reason.into(),
        }
    }

    /// An explicit "do not retry".
    pub fn discard(reason: impl Into<String>) -> Self {
        Outcome::Discard {
            reason: reason.into(),
        }
    }
}

/// Conversion of handler return values into an [`Outcome`].
///
/// Lets `perform` return `()`, an explicit `Outcome`, or any
/// `Result<_, E: Debug>`; errors map to a recoverable failure.
pub trait IntoOutcome {
    fn into_outcome(self) -> Outcome;
}

impl IntoOutcome for Outcome {
    fn into_outcome(self) -> Outcome {
        self
    }
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Outcome {
        Outcome::Complete
    }
}

impl<T, E> IntoOutcome for Result<T, E>
where
    T: IntoOutcome,
    E: Debug,
{
    fn into_outcome(self) -> Outcome {
        match self {
            Ok(inner) => inner.into_outcome(),
            Err(e) => Outcome::failure(format!("{e:?}")),
        }
    }
}

/// Declarative per-worker policy, resolved by lookup at insert and
/// execution time. Unset fields fall back to engine defaults.
#[derive(Debug, Clone, Default)]
pub struct WorkerConfig {
    /// Queue this worker's jobs land on (default: "default")
    pub(crate) queue: Option<String>,
    /// Attempt ceiling before a failing job is discarded (default: 20)
    pub(crate) max_attempts: Option<i64>,
    /// Default priority for this worker's jobs (default: 0)
    pub(crate) priority: Option<i64>,
    /// Per-job execution timeout; expiry counts as a recoverable failure
    pub(crate) timeout: Option<Duration>,
    /// Uniqueness policy applied at insert time
    pub(crate) unique: Option<UniqueOpts>,
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(mut self, value: &str) -> Self {
        self.queue = Some(value.into());
        self
    }

    pub fn max_attempts(mut self, value: i64) -> Self {
        self.max_attempts = Some(value);
        self
    }

    pub fn priority(mut self, value: i64) -> Self {
        self.priority = Some(value);
        self
    }

    pub fn timeout(mut self, value: Duration) -> Self {
        self.timeout = Some(value);
        self
    }

    pub fn unique(mut self, value: UniqueOpts) -> Self {
        self.unique = Some(value);
        self
    }
}

/// A unit of work the engine knows how to run.
///
/// The type doubles as the args schema: a job's JSON args deserialize into
/// `Self` before `perform` runs.
///
/// # Example
///
/// ```
/// use conveyor::{IntoOutcome, JobContext, Worker, WorkerConfig};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct SendEmail {
///     to: String,
/// }
///
/// impl Worker for SendEmail {
///     const IDENTIFIER: &'static str = "send_email";
///
///     fn config() -> WorkerConfig {
///         WorkerConfig::new().queue("mail").max_attempts(5)
///     }
///
///     async fn perform(self, _cx: JobContext) -> impl IntoOutcome {
///         Ok::<(), String>(())
///     }
/// }
/// ```
pub trait Worker: Serialize + DeserializeOwned + Send + Sized + 'static {
    /// Registry identifier stored on job rows.
    const IDENTIFIER: &'static str;

    /// Policy record for this worker. Plain data, no inheritance.
    fn config() -> WorkerConfig {
        WorkerConfig::default()
    }

    fn perform(self, cx: JobContext) -> impl Future<Output = impl IntoOutcome + Send> + Send;
}

/// Type-erased work function stored in the registry.
pub(crate) type WorkerFn =
    Box<dyn Fn(JobContext) -> Pin<Box<dyn Future<Output = Outcome> + Send>> + Send + Sync>;

pub(crate) struct Registered {
    pub(crate) config: WorkerConfig,
    pub(crate) run: WorkerFn,
}

/// Maps worker identifiers to their policy and work function.
#[derive(Default)]
pub(crate) struct Registry {
    workers: HashMap<String, Registered>,
}

impl Registry {
    pub(crate) fn insert<W: Worker>(&mut self) {
        let run: WorkerFn = Box::new(move |cx: JobContext| {
            Box::pin(async move {
                let args = cx.job().args_value().clone();
                match serde_json::from_value::<W>(args) {
                    Ok(worker) => worker.perform(cx).await.into_outcome(),
                    Err(e) => Outcome::failure(format!("Failed to deserialize args: {e}")),
                }
            })
        });
        self.workers.insert(
            W::IDENTIFIER.to_string(),
            Registered {
                config: W::config(),
                run,
            },
        );
    }

    pub(crate) fn get(&self, identifier: &str) -> Option<&Registered> {
        self.workers.get(identifier)
    }

    pub(crate) fn config(&self, identifier: &str) -> Option<&WorkerConfig> {
        self.workers.get(identifier).map(|w| &w.config)
    }

    pub(crate) fn contains(&self, identifier: &str) -> bool {
        self.workers.contains_key(identifier)
    }

    /// Queues named by worker configs.
    pub(crate) fn queue_names(&self) -> Vec<&str> {
        self.workers
            .values()
            .filter_map(|w| w.config.queue.as_deref())
            .collect()
    }

    pub(crate) fn identifiers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.workers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_return_completes() {
        assert_eq!(().into_outcome(), Outcome::Complete);
    }

    #[test]
    fn ok_result_completes_and_err_fails() {
        let ok: Result<(), String> = Ok(());
        assert_eq!(ok.into_outcome(), Outcome::Complete);

        let err: Result<(), String> = Err("boom".into());
        match err.into_outcome() {
            Outcome::Retry { delay, reason } => {
                assert_eq!(delay, None);
                assert!(reason.contains("boom"));
            }
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn nested_outcome_passes_through() {
        let explicit: Result<Outcome, String> = Ok(Outcome::discard("bad input"));
        assert_eq!(
            explicit.into_outcome(),
            Outcome::Discard {
                reason: "bad input".into()
            }
        );
    }
}
