//! Worker - a built, watching consumer.

use std::time::Duration;

use ulid::Ulid;

use crate::domain::{Job, WorkerError};

use super::builder::WorkerBuilder;
use super::dispatcher::{Dispatched, Dispatcher};
use super::registry::HandlerRegistry;
use super::run_loop::{RunLoop, RunStats, ShutdownHandle};

/// One connection, one registry, one job at a time.
///
/// Scale out by building several workers, each on its own connection
/// (see `WorkerGroup`).
pub struct Worker {
    dispatcher: Dispatcher,
    reserve_timeout: Option<Duration>,
    shutdown: ShutdownHandle,
}

impl Worker {
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder::new()
    }

    pub(crate) fn new(dispatcher: Dispatcher, reserve_timeout: Option<Duration>) -> Self {
        Self {
            dispatcher,
            reserve_timeout,
            shutdown: ShutdownHandle::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.dispatcher.worker_id()
    }

    pub fn registry(&self) -> &HandlerRegistry {
        self.dispatcher.registry()
    }

    pub fn reserve_timeout(&self) -> Option<Duration> {
        self.reserve_timeout
    }

    /// Reserve and process a single job. `Ok(None)` on reserve timeout.
    pub async fn process_one(&self, timeout: Option<Duration>) -> Result<Option<Job>, WorkerError> {
        self.dispatcher.process_one(timeout).await
    }

    /// Same as `process_one`, with the full report.
    pub async fn dispatch_one(&self, timeout: Option<Duration>) -> Result<Option<Dispatched>, WorkerError> {
        self.dispatcher.dispatch_one(timeout).await
    }

    /// Loop until `shutdown_handle().request()` or an error.
    pub async fn run(&self) -> Result<RunStats, WorkerError> {
        self.run_loop().run().await
    }

    /// Loop until `limit` jobs were reserved, shutdown, or an error.
    pub async fn run_for(&self, limit: u64) -> Result<RunStats, WorkerError> {
        self.run_loop().run_for(limit).await
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    fn run_loop(&self) -> RunLoop<'_> {
        RunLoop::new(&self.dispatcher, self.reserve_timeout, self.shutdown.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::handler::handler_fn;
    use crate::domain::{retry_on_kind, Disposition, JobError, JobState, Tube};
    use crate::impls::InMemoryServer;
    use std::sync::Arc;

    #[tokio::test]
    async fn worker_processes_and_stops_on_request() {
        let server = InMemoryServer::new();
        let conn = Arc::new(server.connect().await);
        let worker = Worker::builder()
            .register_with_retry(
                "emails",
                handler_fn(|job: Job| async move {
                    if job.body_str() == Some("slow") {
                        Err(JobError::new("timeout", "smtp timed out"))
                    } else {
                        Ok(())
                    }
                }),
                retry_on_kind("timeout"),
            )
            .unwrap()
            .reserve_timeout(Some(Duration::from_millis(10)))
            .build(conn.clone())
            .await
            .unwrap();

        let emails = Tube::new("emails").unwrap();
        let ok = server.put(&emails, "hello").await;
        let slow = server.put(&emails, "slow").await;

        assert_eq!(worker.process_one(Some(Duration::ZERO)).await.unwrap().map(|j| j.id()), Some(ok));
        let report = worker.dispatch_one(Some(Duration::ZERO)).await.unwrap().unwrap();
        assert_eq!(report.job.id(), slow);
        assert_eq!(report.disposition, Disposition::Release);
        assert_eq!(server.job_state(slow).await, Some(JobState::Ready));

        let shutdown = worker.shutdown_handle();
        let worker = Arc::new(worker);
        let running = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.request();

        let stats = running.await.unwrap().unwrap();
        // "slow" keeps failing and being released until shutdown
        assert!(stats.reserved >= 1);
        assert_eq!(stats.deleted, 0);
        assert_eq!(stats.buried, 0);
        assert_eq!(stats.released, stats.reserved);
    }

    #[tokio::test]
    async fn run_for_stops_after_limit() {
        let server = InMemoryServer::new();
        let conn = Arc::new(server.connect().await);
        let worker = Worker::builder()
            .register("emails", handler_fn(|_job: Job| async { Ok(()) }))
            .unwrap()
            .reserve_timeout(Some(Duration::ZERO))
            .build(conn)
            .await
            .unwrap();
        let emails = Tube::new("emails").unwrap();
        for i in 0..3 {
            server.put(&emails, format!("job-{i}")).await;
        }

        let stats = worker.run_for(2).await.unwrap();
        assert_eq!(stats.deleted, 2);
        assert_eq!(server.counts(&emails).await.ready, 1);
    }
}
