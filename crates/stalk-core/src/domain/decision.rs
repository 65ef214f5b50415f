//! Decision model: handler result -> outcome.
//!
//! Classification is a pure function of the handler result and the retry
//! predicate registered for the job's own tube. There is no attempt counting
//! and no backoff here; a job that keeps failing with a retryable error is
//! released and redelivered until something outside changes.

use std::sync::Arc;

use super::outcome::{JobError, Outcome};

/// Decides whether a handler error should be retried.
pub type RetryPredicate = Arc<dyn Fn(&JobError) -> bool + Send + Sync>;

/// Retry errors whose `kind` equals `kind`.
pub fn retry_on_kind(kind: impl Into<String>) -> RetryPredicate {
    let kind = kind.into();
    Arc::new(move |err: &JobError| err.is_kind(&kind))
}

/// Retry errors whose `kind` is one of `kinds`.
pub fn retry_on_kinds<I, S>(kinds: I) -> RetryPredicate
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let kinds: Vec<String> = kinds.into_iter().map(Into::into).collect();
    Arc::new(move |err: &JobError| kinds.iter().any(|k| err.is_kind(k)))
}

/// Retry every handler error.
pub fn retry_always() -> RetryPredicate {
    Arc::new(|_: &JobError| true)
}

/// Wrap an arbitrary closure as a predicate.
pub fn retry_when<F>(f: F) -> RetryPredicate
where
    F: Fn(&JobError) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Classify a handler result.
///
/// - `Ok(())` -> `Succeeded`
/// - `Err(e)` and `retry` says yes -> `Retryable(e)`
/// - `Err(e)` otherwise (including no predicate) -> `Fatal(e)`
pub fn classify(result: Result<(), JobError>, retry: Option<&RetryPredicate>) -> Outcome {
    match result {
        Ok(()) => Outcome::Succeeded,
        Err(err) => match retry {
            Some(predicate) if predicate(&err) => Outcome::Retryable(err),
            _ => Outcome::Fatal(err),
        },
    }
}
