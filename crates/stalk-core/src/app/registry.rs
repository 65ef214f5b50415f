//! HandlerRegistry - tube -> handler (+ retry predicate).
//!
//! Built during initialization (mutable), then moved into the dispatcher and
//! only read from. No locks needed.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{classify, Job, Outcome, RetryPredicate, Tube};

use super::handler::JobHandler;

/// What runs for one tube.
#[derive(Clone)]
pub struct HandlerEntry {
    tube: Tube,
    handler: Arc<dyn JobHandler>,
    retry: Option<RetryPredicate>,
}

impl HandlerEntry {
    pub fn new(tube: Tube, handler: Arc<dyn JobHandler>, retry: Option<RetryPredicate>) -> Self {
        Self {
            tube,
            handler,
            retry,
        }
    }

    pub fn tube(&self) -> &Tube {
        &self.tube
    }

    pub fn retry(&self) -> Option<&RetryPredicate> {
        self.retry.as_ref()
    }

    pub fn has_retry(&self) -> bool {
        self.retry.is_some()
    }

    /// Run the handler and classify its result with this entry's predicate.
    pub async fn invoke(&self, job: &Job) -> Outcome {
        let result = self.handler.handle(job).await;
        classify(result, self.retry.as_ref())
    }
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("tube", &self.tube)
            .field("retry", &self.retry.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default, Debug)]
pub struct HandlerRegistry {
    handlers: HashMap<Tube, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a tube. Last registration wins; the replaced
    /// entry is returned.
    pub fn register(
        &mut self,
        tube: Tube,
        handler: Arc<dyn JobHandler>,
        retry: Option<RetryPredicate>,
    ) -> Option<HandlerEntry> {
        let entry = HandlerEntry::new(tube.clone(), handler, retry);
        self.handlers.insert(tube, entry)
    }

    pub fn lookup(&self, tube: &Tube) -> Option<&HandlerEntry> {
        self.handlers.get(tube)
    }

    pub fn contains(&self, tube: &str) -> bool {
        self.handlers.contains_key(tube)
    }

    /// Registered tubes, sorted.
    pub fn tubes(&self) -> Vec<Tube> {
        let mut tubes: Vec<Tube> = self.handlers.keys().cloned().collect();
        tubes.sort();
        tubes
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::handler::handler_fn;
    use crate::domain::{retry_on_kind, Disposition, JobError, JobId};

    fn tube(name: &str) -> Tube {
        Tube::new(name).unwrap()
    }

    fn ok_handler() -> Arc<dyn JobHandler> {
        Arc::new(handler_fn(|_job: Job| async { Ok(()) }))
    }

    fn failing_handler(kind: &'static str) -> Arc<dyn JobHandler> {
        Arc::new(handler_fn(move |_job: Job| async move { Err(JobError::new(kind, "failed")) }))
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.register(tube("emails"), ok_handler(), None).is_none());

        assert!(registry.lookup(&tube("emails")).is_some());
        assert!(registry.lookup(&tube("orders")).is_none());
        assert!(registry.contains("emails"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = HandlerRegistry::new();
        registry.register(tube("emails"), ok_handler(), None);
        let replaced = registry.register(tube("emails"), ok_handler(), Some(retry_on_kind("timeout")));

        assert!(replaced.is_some_and(|e| !e.has_retry()));
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(&tube("emails")).unwrap().has_retry());
    }

    #[test]
    fn tubes_are_sorted() {
        let mut registry = HandlerRegistry::new();
        registry.register(tube("orders"), ok_handler(), None);
        registry.register(tube("emails"), ok_handler(), None);
        assert_eq!(registry.tubes(), vec![tube("emails"), tube("orders")]);
    }

    #[tokio::test]
    async fn invoke_uses_entry_predicate() {
        let job = Job::new(JobId::new(1), "x");

        let entry = HandlerEntry::new(tube("a"), failing_handler("timeout"), Some(retry_on_kind("timeout")));
        assert_eq!(entry.invoke(&job).await.disposition(), Disposition::Release);

        let entry = HandlerEntry::new(tube("a"), failing_handler("validation"), Some(retry_on_kind("timeout")));
        assert_eq!(entry.invoke(&job).await.disposition(), Disposition::Bury);

        let entry = HandlerEntry::new(tube("a"), ok_handler(), None);
        assert_eq!(entry.invoke(&job).await.disposition(), Disposition::Delete);
    }
}
