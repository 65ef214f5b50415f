//! RunLoop - Dispatcher を繰り返し回す
//!
//! 1 ワーカー 1 ループ、同時に処理する job は最大 1 つ。
//! shutdown はループの先頭でチェックし、さらに reserve の待ち時間とだけ競合させる。
//! handler の実行中に shutdown が来ても、その job の disposition までは必ず終わらせる。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::domain::{Disposition, WorkerError};

use super::dispatcher::{Dispatched, Dispatcher};

/// Counters for one `run` / `run_for` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Jobs reserved (every one of them got a disposition).
    pub reserved: u64,
    pub deleted: u64,
    pub released: u64,
    pub buried: u64,
    /// Reserve calls that timed out without a job.
    pub idle: u64,
}

impl RunStats {
    fn record(&mut self, dispatched: &Dispatched) {
        self.reserved += 1;
        match dispatched.disposition {
            Disposition::Delete => self.deleted += 1,
            Disposition::Release => self.released += 1,
            Disposition::Bury => self.buried += 1,
        }
    }

    pub fn merge(&mut self, other: &RunStats) {
        self.reserved += other.reserved;
        self.deleted += other.deleted;
        self.released += other.released;
        self.buried += other.buried;
        self.idle += other.idle;
    }
}

/// Asks a running loop to stop. Clones share the same signal.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Stop taking new jobs. A job already reserved is still finished.
    pub fn request(&self) {
        // receiver が居なくても値は残す
        self.tx.send_replace(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RunLoop<'a> {
    dispatcher: &'a Dispatcher,
    reserve_timeout: Option<Duration>,
    shutdown: ShutdownHandle,
}

impl<'a> RunLoop<'a> {
    pub fn new(dispatcher: &'a Dispatcher, reserve_timeout: Option<Duration>, shutdown: ShutdownHandle) -> Self {
        Self {
            dispatcher,
            reserve_timeout,
            shutdown,
        }
    }

    /// Process jobs until shutdown is requested or dispatch fails.
    pub async fn run(&self) -> Result<RunStats, WorkerError> {
        self.drive(None).await
    }

    /// Like `run`, but also stops after `limit` reserved jobs. Reserve
    /// timeouts do not count towards the limit.
    pub async fn run_for(&self, limit: u64) -> Result<RunStats, WorkerError> {
        self.drive(Some(limit)).await
    }

    async fn drive(&self, limit: Option<u64>) -> Result<RunStats, WorkerError> {
        let mut rx = self.shutdown.subscribe();
        let mut stats = RunStats::default();
        let worker_id = self.dispatcher.worker_id();

        let tubes: Vec<String> = self
            .dispatcher
            .registry()
            .tubes()
            .iter()
            .map(|t| t.to_string())
            .collect();
        tracing::info!(worker_id = %worker_id, tubes = ?tubes, "Start processing jobs");

        loop {
            if *rx.borrow() {
                tracing::info!(worker_id = %worker_id, "Shutdown requested; stopping");
                break;
            }
            if limit.is_some_and(|n| stats.reserved >= n) {
                break;
            }

            let cancel = async {
                let _ = rx.wait_for(|stop| *stop).await;
            };
            let result = self.dispatcher.dispatch_one_until(self.reserve_timeout, cancel).await;
            match result {
                Ok(Some(dispatched)) => stats.record(&dispatched),
                Ok(None) => {
                    if !*rx.borrow() {
                        stats.idle += 1;
                    }
                }
                Err(err) => {
                    tracing::error!(worker_id = %worker_id, error = %err, "Stopping worker");
                    return Err(err);
                }
            }
        }

        tracing::info!(
            worker_id = %worker_id,
            reserved = stats.reserved,
            deleted = stats.deleted,
            released = stats.released,
            buried = stats.buried,
            "Stopped processing jobs"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::handler::{handler_fn, JobHandler};
    use crate::app::registry::HandlerRegistry;
    use crate::config::DispositionConfig;
    use crate::domain::{retry_on_kind, Job, JobError, JobState, RetryPredicate, Tube};
    use crate::impls::{Command, InMemoryQueue, InMemoryServer};
    use crate::ports::{ClientError, NoopProbe, QueueClient};
    use ulid::Ulid;

    fn tube(name: &str) -> Tube {
        Tube::new(name).unwrap()
    }

    async fn dispatcher(
        server: &InMemoryServer,
        handlers: Vec<(&str, Arc<dyn JobHandler>, Option<RetryPredicate>)>,
    ) -> (Arc<InMemoryQueue>, Dispatcher) {
        let conn = Arc::new(server.connect().await);
        let mut registry = HandlerRegistry::new();
        for (name, handler, retry) in handlers {
            conn.watch(&tube(name)).await.unwrap();
            registry.register(tube(name), handler, retry);
        }
        let dispatcher = Dispatcher::new(
            Ulid::new(),
            conn.clone(),
            registry,
            DispositionConfig::default(),
            Arc::new(NoopProbe),
        );
        (conn, dispatcher)
    }

    /// Fails every job whose body starts with `fail:<kind>`.
    fn scripted() -> Arc<dyn JobHandler> {
        Arc::new(handler_fn(|job: Job| async move {
            match job.body_str().and_then(|b| b.strip_prefix("fail:")) {
                Some(kind) => Err(JobError::new(kind.to_string(), "scripted failure")),
                None => Ok(()),
            }
        }))
    }

    #[tokio::test]
    async fn run_for_counts_each_disposition() {
        let server = InMemoryServer::new();
        let (conn, dispatcher) =
            dispatcher(&server, vec![("emails", scripted(), Some(retry_on_kind("timeout")))]).await;
        let emails = tube("emails");
        let ok = server.put(&emails, "ok").await;
        let buried = server.put(&emails, "fail:validation").await;
        server.put(&emails, "ok").await;

        let run_loop = RunLoop::new(&dispatcher, Some(Duration::ZERO), ShutdownHandle::new());
        let stats = run_loop.run_for(3).await.unwrap();

        assert_eq!(
            stats,
            RunStats {
                reserved: 3,
                deleted: 2,
                released: 0,
                buried: 1,
                idle: 0,
            }
        );
        assert_eq!(conn.dispositions().len(), 3);
        assert_eq!(server.job_state(ok).await, None);
        assert_eq!(server.job_state(buried).await, Some(JobState::Buried));
    }

    #[tokio::test]
    async fn run_for_ignores_idle_polls() {
        let server = InMemoryServer::new();
        let (_conn, dispatcher) = dispatcher(&server, vec![("emails", scripted(), None)]).await;

        let producer = tokio::spawn({
            let server = server.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                server.put(&Tube::new("emails").unwrap(), "late").await
            }
        });

        let run_loop = RunLoop::new(&dispatcher, Some(Duration::from_millis(10)), ShutdownHandle::new());
        let stats = run_loop.run_for(1).await.unwrap();
        let id = producer.await.unwrap();

        assert_eq!(stats.reserved, 1);
        assert_eq!(stats.deleted, 1);
        assert!(stats.idle >= 1);
        assert_eq!(server.job_state(id).await, None);
    }

    #[tokio::test]
    async fn unknown_tube_stops_the_loop() {
        let server = InMemoryServer::new();
        let (conn, dispatcher) = dispatcher(&server, vec![("emails", scripted(), None)]).await;
        conn.watch(&tube("orders")).await.unwrap();
        let first = server.put(&tube("emails"), "ok").await;
        let stray = server.put(&tube("orders"), "o-1").await;

        let run_loop = RunLoop::new(&dispatcher, Some(Duration::ZERO), ShutdownHandle::new());
        let err = run_loop.run_for(10).await.unwrap_err();

        assert!(matches!(err, WorkerError::UnknownTube { job_id, .. } if job_id == stray));
        assert_eq!(server.job_state(first).await, None);
        assert_eq!(server.job_state(stray).await, Some(JobState::Ready));
    }

    #[tokio::test]
    async fn default_tube_job_does_not_stop_the_loop() {
        let server = InMemoryServer::new();
        let (conn, dispatcher) = dispatcher(&server, vec![("emails", scripted(), None)]).await;
        server.put(&Tube::default_tube(), "stray").await;
        server.put(&tube("emails"), "ok").await;

        let run_loop = RunLoop::new(&dispatcher, Some(Duration::ZERO), ShutdownHandle::new());
        let stats = run_loop.run_for(2).await.unwrap();

        assert_eq!(stats.released, 1);
        assert_eq!(stats.deleted, 1);
        assert_eq!(conn.ignored(), vec![Tube::default_tube()]);
    }

    #[tokio::test]
    async fn default_only_watch_set_stops_instead_of_spinning() {
        let server = InMemoryServer::new();
        let (conn, dispatcher) = dispatcher(&server, Vec::new()).await;
        let id = server.put(&Tube::default_tube(), "stray").await;

        let run_loop = RunLoop::new(&dispatcher, Some(Duration::ZERO), ShutdownHandle::new());
        let err = run_loop.run_for(50).await.unwrap_err();

        assert!(matches!(err, WorkerError::Client(ClientError::NotIgnored(_))));
        assert_eq!(conn.dispositions(), vec![(id, Disposition::Release)]);
        assert_eq!(conn.ignored().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_before_start_processes_nothing() {
        let server = InMemoryServer::new();
        let (conn, dispatcher) = dispatcher(&server, vec![("emails", scripted(), None)]).await;
        server.put(&tube("emails"), "ok").await;

        let shutdown = ShutdownHandle::new();
        shutdown.request();
        let stats = RunLoop::new(&dispatcher, None, shutdown).run().await.unwrap();

        assert_eq!(stats, RunStats::default());
        assert!(!conn
            .commands()
            .iter()
            .any(|c| matches!(c, Command::Reserve { .. })));
    }

    #[tokio::test]
    async fn shutdown_interrupts_blocking_reserve() {
        let server = InMemoryServer::new();
        let (conn, dispatcher) = dispatcher(&server, vec![("emails", scripted(), None)]).await;

        let shutdown = ShutdownHandle::new();
        let stopper = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                shutdown.request();
            }
        });

        let stats = tokio::time::timeout(
            Duration::from_secs(5),
            RunLoop::new(&dispatcher, None, shutdown.clone()).run(),
        )
        .await
        .expect("run loop did not observe shutdown")
        .unwrap();
        stopper.await.unwrap();

        assert!(shutdown.is_requested());
        assert_eq!(stats.reserved, 0);
        assert_eq!(stats.idle, 0);
        assert!(conn.dispositions().is_empty());
    }

    #[tokio::test]
    async fn shutdown_during_handler_still_disposes_the_job() {
        let server = InMemoryServer::new();
        let shutdown = ShutdownHandle::new();
        let slow: Arc<dyn JobHandler> = Arc::new(handler_fn({
            let shutdown = shutdown.clone();
            move |_job: Job| {
                let shutdown = shutdown.clone();
                async move {
                    shutdown.request();
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(())
                }
            }
        }));
        let (conn, dispatcher) = dispatcher(&server, vec![("emails", slow, None)]).await;
        let id = server.put(&tube("emails"), "x").await;
        server.put(&tube("emails"), "y").await;

        let stats = RunLoop::new(&dispatcher, None, shutdown).run().await.unwrap();

        assert_eq!(stats.reserved, 1);
        assert_eq!(stats.deleted, 1);
        assert_eq!(conn.dispositions(), vec![(id, Disposition::Delete)]);
    }

    #[test]
    fn merge_adds_counters() {
        let mut total = RunStats {
            reserved: 1,
            deleted: 1,
            ..Default::default()
        };
        total.merge(&RunStats {
            reserved: 2,
            released: 1,
            buried: 1,
            idle: 4,
            ..Default::default()
        });
        assert_eq!(
            total,
            RunStats {
                reserved: 3,
                deleted: 1,
                released: 1,
                buried: 1,
                idle: 4,
            }
        );
    }
}
