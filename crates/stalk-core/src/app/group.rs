//! WorkerGroup - 複数の Worker を並行に走らせる
//!
//! 各 Worker は自分の接続と RunLoop を持つ。グループは spawn / shutdown / join だけを担当。

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::domain::WorkerError;

use super::run_loop::{RunStats, ShutdownHandle};
use super::worker::Worker;

/// Result of one worker's run.
#[derive(Debug)]
pub struct WorkerReport {
    pub worker_id: ulid::Ulid,
    pub result: Result<RunStats, WorkerError>,
}

/// Handle for a set of running workers.
/// - `request_shutdown()` で全ワーカーに停止を依頼（実行中の handler は止めない）
/// - `join()` で全ワーカーの終了を待つ
pub struct WorkerGroup {
    shutdowns: Vec<ShutdownHandle>,
    joins: Vec<(ulid::Ulid, JoinHandle<Result<RunStats, WorkerError>>)>,
}

impl WorkerGroup {
    /// Spawn `run()` for every worker.
    pub fn spawn(workers: Vec<Worker>) -> Self {
        let mut shutdowns = Vec::with_capacity(workers.len());
        let mut joins = Vec::with_capacity(workers.len());

        for worker in workers {
            let worker = Arc::new(worker);
            shutdowns.push(worker.shutdown_handle());
            let id = worker.id();
            let join = tokio::spawn(async move { worker.run().await });
            joins.push((id, join));
        }

        Self { shutdowns, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn request_shutdown(&self) {
        for shutdown in &self.shutdowns {
            shutdown.request();
        }
    }

    /// Wait for every worker to stop on its own (shutdown or error).
    /// A panicked worker is logged and left out of the reports.
    pub async fn join(self) -> Vec<WorkerReport> {
        let mut reports = Vec::with_capacity(self.joins.len());
        for (worker_id, join) in self.joins {
            match join.await {
                Ok(result) => reports.push(WorkerReport { worker_id, result }),
                Err(err) => {
                    tracing::error!(worker_id = %worker_id, error = %err, "Worker task panicked");
                }
            }
        }
        reports
    }

    pub async fn shutdown_and_join(self) -> Vec<WorkerReport> {
        self.request_shutdown();
        self.join().await
    }
}

/// Sum the stats of every worker that stopped cleanly.
pub fn total_stats(reports: &[WorkerReport]) -> RunStats {
    let mut total = RunStats::default();
    for report in reports {
        if let Ok(stats) = &report.result {
            total.merge(stats);
        }
    }
    total
}
