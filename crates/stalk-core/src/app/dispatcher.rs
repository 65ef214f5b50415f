//! Dispatcher - one reservation, start to finish.
//!
//! # フロー
//! 1. `QueueClient::reserve()` で job を取得（timeout なら `None`）
//! 2. `QueueClient::stats_job()` で tube を解決
//! 3. registry から handler を引く
//! 4. handler 実行 → `Outcome`
//! 5. delete / release / bury のどれか一つだけを発行
//!
//! Every reserved job gets exactly one disposition, on every path.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use crate::config::DispositionConfig;
use crate::domain::{Disposition, Job, JobStats, Outcome, Tube, WorkerError};
use crate::ports::resource_probe::memory_delta;
use crate::ports::{QueueClient, ResourceProbe};

use super::registry::{HandlerEntry, HandlerRegistry};

/// How a reserved job was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Succeeded,
    RetryableFailure,
    FatalFailure,
    /// Job came from `default` and nothing handles `default`.
    DefaultTubeUnhandled,
}

/// Report for one processed job.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub job: Job,
    pub tube: Tube,
    pub resolution: Resolution,
    pub disposition: Disposition,
}

pub struct Dispatcher {
    worker_id: Ulid,
    client: Arc<dyn QueueClient>,
    registry: HandlerRegistry,
    disposition: DispositionConfig,
    probe: Arc<dyn ResourceProbe>,
    default_ignored: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        worker_id: Ulid,
        client: Arc<dyn QueueClient>,
        registry: HandlerRegistry,
        disposition: DispositionConfig,
        probe: Arc<dyn ResourceProbe>,
    ) -> Self {
        Self {
            worker_id,
            client,
            registry,
            disposition,
            probe,
            default_ignored: AtomicBool::new(false),
        }
    }

    pub fn worker_id(&self) -> Ulid {
        self.worker_id
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Reserve and process one job.
    ///
    /// Returns `Ok(None)` when no job arrived within `timeout` (`None` waits
    /// forever). Returns `Err(WorkerError::UnknownTube)` after releasing a job
    /// from a tube nobody handles; that error is meant to stop the caller.
    pub async fn process_one(&self, timeout: Option<Duration>) -> Result<Option<Job>, WorkerError> {
        Ok(self.dispatch_one(timeout).await?.map(|d| d.job))
    }

    /// Like `process_one`, but gives up waiting for a job as soon as `cancel`
    /// completes. Cancellation never interrupts a handler.
    pub async fn process_one_until<F>(
        &self,
        timeout: Option<Duration>,
        cancel: F,
    ) -> Result<Option<Job>, WorkerError>
    where
        F: Future<Output = ()> + Send,
    {
        Ok(self.dispatch_one_until(timeout, cancel).await?.map(|d| d.job))
    }

    pub async fn dispatch_one(&self, timeout: Option<Duration>) -> Result<Option<Dispatched>, WorkerError> {
        self.dispatch_one_until(timeout, std::future::pending()).await
    }

    pub async fn dispatch_one_until<F>(
        &self,
        timeout: Option<Duration>,
        cancel: F,
    ) -> Result<Option<Dispatched>, WorkerError>
    where
        F: Future<Output = ()> + Send,
    {
        // reserve だけが中断可能。job を取った後は最後まで処理する
        let reserved = tokio::select! {
            biased;
            _ = cancel => return Ok(None),
            reserved = self.client.reserve(timeout) => reserved?,
        };
        let Some(job) = reserved else {
            return Ok(None);
        };

        let stats = match self.client.stats_job(&job).await {
            Ok(stats) => stats,
            Err(err) => {
                tracing::error!(
                    worker_id = %self.worker_id,
                    job_id = %job.id(),
                    error = %err,
                    "Failed to resolve tube for job; releasing"
                );
                self.release_quietly(&job).await;
                return Err(err.into());
            }
        };

        match self.registry.lookup(&stats.tube) {
            Some(entry) => self.invoke(entry, job).await.map(Some),
            None if stats.tube.is_default() => self.release_default(job, stats).await.map(Some),
            None => {
                let tube = stats.tube;
                tracing::error!(
                    worker_id = %self.worker_id,
                    job_id = %job.id(),
                    tube = %tube,
                    "Job fetched for unknown tube"
                );
                self.dispose(&job, Disposition::Release).await?;
                Err(WorkerError::UnknownTube {
                    tube: tube.to_string(),
                    job_id: job.id(),
                })
            }
        }
    }

    async fn invoke(&self, entry: &HandlerEntry, job: Job) -> Result<Dispatched, WorkerError> {
        let tube = entry.tube().clone();
        let started = Instant::now();
        let mem_before = self.probe.memory_bytes();

        let outcome = entry.invoke(&job).await;
        let disposition = outcome.disposition();

        let resolution = match &outcome {
            Outcome::Succeeded => {
                self.dispose(&job, disposition).await?;
                let elapsed = started.elapsed();
                let mem_delta = memory_delta(mem_before, self.probe.memory_bytes());
                tracing::info!(
                    worker_id = %self.worker_id,
                    job_id = %job.id(),
                    tube = %tube,
                    elapsed_ms = millis(elapsed),
                    memory_delta = mem_delta,
                    "Job complete"
                );
                Resolution::Succeeded
            }
            Outcome::Retryable(err) => {
                tracing::warn!(
                    worker_id = %self.worker_id,
                    job_id = %job.id(),
                    tube = %tube,
                    error = %err,
                    trace = %err.trace(),
                    "Job failed. Releasing job and retrying again."
                );
                self.dispose(&job, disposition).await?;
                Resolution::RetryableFailure
            }
            Outcome::Fatal(err) => {
                tracing::error!(
                    worker_id = %self.worker_id,
                    job_id = %job.id(),
                    tube = %tube,
                    error = %err,
                    trace = %err.trace(),
                    "Job failed. Burying job."
                );
                self.dispose(&job, disposition).await?;
                Resolution::FatalFailure
            }
        };

        Ok(Dispatched {
            job,
            tube,
            resolution,
            disposition,
        })
    }

    /// A job from `default` with no handler: the watch set is wrong, not the
    /// job. Put it back and stop watching `default`.
    ///
    /// The flag is only set once `ignore` succeeded, so a failed ignore is
    /// retried with the next stray job. `NotIgnored` (nothing else is
    /// watched) is returned as an error; the job would otherwise come straight
    /// back forever.
    async fn release_default(&self, job: Job, stats: JobStats) -> Result<Dispatched, WorkerError> {
        let stats_json = serde_json::to_string(&stats).unwrap_or_default();
        tracing::warn!(
            worker_id = %self.worker_id,
            job_id = %job.id(),
            stats = %stats_json,
            "Job reserved from default tube. Releasing job and ignoring default tube."
        );
        self.dispose(&job, Disposition::Release).await?;

        let tube = stats.tube;
        if !self.default_ignored.load(Ordering::SeqCst) {
            match self.client.ignore(&tube).await {
                Ok(_) => self.default_ignored.store(true, Ordering::SeqCst),
                Err(err) => {
                    tracing::error!(
                        worker_id = %self.worker_id,
                        job_id = %job.id(),
                        tube = %tube,
                        error = %err,
                        "Failed to ignore default tube"
                    );
                    return Err(err.into());
                }
            }
        }

        Ok(Dispatched {
            job,
            tube,
            resolution: Resolution::DefaultTubeUnhandled,
            disposition: Disposition::Release,
        })
    }

    async fn dispose(&self, job: &Job, disposition: Disposition) -> Result<(), WorkerError> {
        let result = match disposition {
            Disposition::Delete => self.client.delete(job).await,
            Disposition::Release => {
                self.client
                    .release(
                        job,
                        self.disposition.release_priority,
                        self.disposition.release_delay(),
                    )
                    .await
            }
            Disposition::Bury => self.client.bury(job, self.disposition.bury_priority).await,
        };

        result.map_err(|err| {
            tracing::error!(
                worker_id = %self.worker_id,
                job_id = %job.id(),
                %disposition,
                error = %err,
                "Disposition failed"
            );
            err.into()
        })
    }

    async fn release_quietly(&self, job: &Job) {
        let _ = self.dispose(job, Disposition::Release).await;
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
