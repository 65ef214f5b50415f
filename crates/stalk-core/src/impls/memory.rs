//! InMemoryQueue - 開発・テスト用のキュー
//!
//! A small beanstalkd lookalike living in-process:
//! - `InMemoryServer` holds the jobs (ready / reserved / delayed / buried).
//! - `InMemoryQueue` is one connection with its own watch set. Like a fresh
//!   beanstalkd connection it starts out watching `default`.
//! - Every command a connection issues is appended to a bounded journal
//!   (`JOURNAL_LIMIT`) so tests can assert exactly which dispositions happened.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::{Disposition, Job, JobId, JobState, JobStats, Tube};
use crate::ports::{
    Clock, ClientError, Connect, ConnectOptions, QueueClient, SystemClock, DEFAULT_PRIORITY,
};

/// Time-to-run reported for jobs put without one.
pub const DEFAULT_TTR: Duration = Duration::from_secs(60);

/// Commands kept per connection; older entries are dropped first.
pub const JOURNAL_LIMIT: usize = 1024;

/// A command issued by one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Watch(Tube),
    Ignore(Tube),
    Reserve { timeout: Option<Duration> },
    StatsJob(JobId),
    Delete(JobId),
    Release { id: JobId, priority: u32, delay: Duration },
    Bury { id: JobId, priority: u32 },
}

impl Command {
    pub fn disposition(&self) -> Option<(JobId, Disposition)> {
        match self {
            Command::Delete(id) => Some((*id, Disposition::Delete)),
            Command::Release { id, .. } => Some((*id, Disposition::Release)),
            Command::Bury { id, .. } => Some((*id, Disposition::Bury)),
            _ => None,
        }
    }
}

/// Per-tube job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TubeCounts {
    pub ready: usize,
    pub reserved: usize,
    pub delayed: usize,
    pub buried: usize,
}

#[derive(Debug, Clone)]
struct JobRecord {
    id: JobId,
    tube: Tube,
    body: Vec<u8>,
    state: JobState,
    priority: u32,
    delay: Duration,
    ttr: Duration,
    created_at: DateTime<Utc>,
    ready_at: Option<Instant>,
    reserved_by: Option<u64>,
    reserves: u32,
    releases: u32,
    buries: u32,
}

#[derive(Default)]
struct ServerState {
    jobs: HashMap<JobId, JobRecord>,
    /// Ready jobs per tube ordered by (priority, id).
    ready: HashMap<Tube, BTreeSet<(u32, JobId)>>,
    next_job_id: u64,
    next_conn_id: u64,
}

impl ServerState {
    fn allocate_job_id(&mut self) -> JobId {
        self.next_job_id += 1;
        JobId::new(self.next_job_id)
    }

    fn make_ready(&mut self, id: JobId) {
        if let Some(job) = self.jobs.get_mut(&id) {
            job.state = JobState::Ready;
            job.ready_at = None;
            job.reserved_by = None;
            self.ready
                .entry(job.tube.clone())
                .or_default()
                .insert((job.priority, id));
        }
    }

    fn promote_delayed(&mut self, now: Instant) {
        let due: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| j.state == JobState::Delayed && j.ready_at.is_some_and(|at| at <= now))
            .map(|j| j.id)
            .collect();
        for id in due {
            self.make_ready(id);
        }
    }

    fn next_delayed_at(&self) -> Option<Instant> {
        self.jobs
            .values()
            .filter(|j| j.state == JobState::Delayed)
            .filter_map(|j| j.ready_at)
            .min()
    }

    /// Take the most urgent ready job across `watched`.
    fn pop_ready(&mut self, watched: &BTreeSet<Tube>) -> Option<JobId> {
        let (tube, key) = watched
            .iter()
            .filter_map(|t| self.ready.get(t).and_then(|set| set.first()).map(|k| (t, *k)))
            .min_by_key(|(_, k)| *k)?;
        let tube = tube.clone();
        self.ready.get_mut(&tube)?.remove(&key);
        Some(key.1)
    }

    /// Look up a job that must be reserved by `conn`.
    fn reserved_by(&mut self, id: JobId, conn: u64) -> Result<&mut JobRecord, ClientError> {
        let job = self.jobs.get_mut(&id).ok_or(ClientError::NotFound(id))?;
        if !job.state.accepts_disposition() || job.reserved_by != Some(conn) {
            return Err(ClientError::NotReserved(id));
        }
        Ok(job)
    }
}

struct Shared {
    state: Mutex<ServerState>,
    notify: Notify,
    clock: Arc<dyn Clock>,
}

/// The in-process queue server. Cheap to clone; clones share jobs.
#[derive(Clone)]
pub struct InMemoryServer {
    shared: Arc<Shared>,
}

impl InMemoryServer {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Use `clock` for job ages (see `ports::FixedClock`).
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ServerState::default()),
                notify: Notify::new(),
                clock,
            }),
        }
    }

    /// Open a new connection watching `default`.
    pub async fn connect(&self) -> InMemoryQueue {
        let conn_id = {
            let mut state = self.shared.state.lock().await;
            state.next_conn_id += 1;
            state.next_conn_id
        };
        let mut watched = BTreeSet::new();
        watched.insert(Tube::default_tube());
        InMemoryQueue {
            conn_id,
            server: self.clone(),
            watched: Mutex::new(watched),
            journal: StdMutex::new(VecDeque::new()),
        }
    }

    /// Put a job with default priority, no delay.
    pub async fn put(&self, tube: &Tube, body: impl Into<Vec<u8>>) -> JobId {
        self.put_with(tube, body, DEFAULT_PRIORITY, Duration::ZERO, DEFAULT_TTR)
            .await
    }

    pub async fn put_with(
        &self,
        tube: &Tube,
        body: impl Into<Vec<u8>>,
        priority: u32,
        delay: Duration,
        ttr: Duration,
    ) -> JobId {
        let id = {
            let mut state = self.shared.state.lock().await;
            let id = state.allocate_job_id();
            let delayed = !delay.is_zero();
            state.jobs.insert(
                id,
                JobRecord {
                    id,
                    tube: tube.clone(),
                    body: body.into(),
                    state: JobState::Delayed,
                    priority,
                    delay,
                    ttr,
                    created_at: self.shared.clock.now(),
                    ready_at: delayed.then(|| Instant::now() + delay),
                    reserved_by: None,
                    reserves: 0,
                    releases: 0,
                    buries: 0,
                },
            );
            if !delayed {
                state.make_ready(id);
            }
            id
        };
        self.shared.notify.notify_waiters();
        id
    }

    /// Move up to `bound` buried jobs of `tube` back to ready. Returns how many moved.
    pub async fn kick(&self, tube: &Tube, bound: usize) -> usize {
        let kicked = {
            let mut state = self.shared.state.lock().await;
            let mut buried: Vec<JobId> = state
                .jobs
                .values()
                .filter(|j| &j.tube == tube && j.state == JobState::Buried)
                .map(|j| j.id)
                .collect();
            buried.sort();
            buried.truncate(bound);
            for id in &buried {
                state.make_ready(*id);
            }
            buried.len()
        };
        if kicked > 0 {
            self.shared.notify.notify_waiters();
        }
        kicked
    }

    pub async fn job_state(&self, id: JobId) -> Option<JobState> {
        let state = self.shared.state.lock().await;
        state.jobs.get(&id).map(|j| j.state)
    }

    pub async fn counts(&self, tube: &Tube) -> TubeCounts {
        let state = self.shared.state.lock().await;
        let mut counts = TubeCounts::default();
        for job in state.jobs.values().filter(|j| &j.tube == tube) {
            match job.state {
                JobState::Ready => counts.ready += 1,
                JobState::Reserved => counts.reserved += 1,
                JobState::Delayed => counts.delayed += 1,
                JobState::Buried => counts.buried += 1,
            }
        }
        counts
    }
}

impl Default for InMemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

/// One connection to an `InMemoryServer`.
pub struct InMemoryQueue {
    conn_id: u64,
    server: InMemoryServer,
    watched: Mutex<BTreeSet<Tube>>,
    journal: StdMutex<VecDeque<Command>>,
}

impl InMemoryQueue {
    pub fn server(&self) -> &InMemoryServer {
        &self.server
    }

    pub async fn watched(&self) -> Vec<Tube> {
        self.watched.lock().await.iter().cloned().collect()
    }

    /// The last `JOURNAL_LIMIT` commands issued on this connection, in order.
    pub fn commands(&self) -> Vec<Command> {
        self.journal_guard().iter().cloned().collect()
    }

    /// Only delete/release/bury, in order.
    pub fn dispositions(&self) -> Vec<(JobId, Disposition)> {
        self.journal_guard()
            .iter()
            .filter_map(Command::disposition)
            .collect()
    }

    pub fn count(&self, disposition: Disposition) -> usize {
        self.dispositions()
            .iter()
            .filter(|(_, d)| *d == disposition)
            .count()
    }

    pub fn ignored(&self) -> Vec<Tube> {
        self.journal_guard()
            .iter()
            .filter_map(|c| match c {
                Command::Ignore(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, command: Command) {
        let mut journal = self.journal_guard();
        if journal.len() == JOURNAL_LIMIT {
            journal.pop_front();
        }
        journal.push_back(command);
    }

    fn journal_guard(&self) -> std::sync::MutexGuard<'_, VecDeque<Command>> {
        self.journal.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn shared(&self) -> &Shared {
        &self.server.shared
    }

    /// Reserve a ready job, or report when the next delayed job is due.
    async fn try_reserve(&self) -> Result<Job, Option<Instant>> {
        let watched = self.watched.lock().await.clone();
        let mut state = self.shared().state.lock().await;
        state.promote_delayed(Instant::now());

        let Some(id) = state.pop_ready(&watched) else {
            return Err(state.next_delayed_at());
        };
        let Some(job) = state.jobs.get_mut(&id) else {
            return Err(None);
        };
        job.state = JobState::Reserved;
        job.reserved_by = Some(self.conn_id);
        job.reserves += 1;
        Ok(Job::new(job.id, job.body.clone()))
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn watch(&self, tube: &Tube) -> Result<usize, ClientError> {
        self.record(Command::Watch(tube.clone()));
        let mut watched = self.watched.lock().await;
        watched.insert(tube.clone());
        Ok(watched.len())
    }

    async fn ignore(&self, tube: &Tube) -> Result<usize, ClientError> {
        self.record(Command::Ignore(tube.clone()));
        let mut watched = self.watched.lock().await;
        if watched.len() == 1 && watched.contains(tube) {
            return Err(ClientError::NotIgnored(tube.clone()));
        }
        watched.remove(tube);
        Ok(watched.len())
    }

    async fn reserve(&self, timeout: Option<Duration>) -> Result<Option<Job>, ClientError> {
        self.record(Command::Reserve { timeout });
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            // 通知の取りこぼしを防ぐため、状態を見る前に登録しておく
            let notified = self.shared().notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_delayed = match self.try_reserve().await {
                Ok(job) => return Ok(Some(job)),
                Err(next) => next,
            };

            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(None);
            }

            let wake = match (deadline, next_delayed) {
                (Some(d), Some(n)) => Some(d.min(n)),
                (d, n) => d.or(n),
            };
            match wake {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {},
                        _ = tokio::time::sleep_until(at) => {},
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn stats_job(&self, job: &Job) -> Result<JobStats, ClientError> {
        self.record(Command::StatsJob(job.id()));
        let now = self.shared().clock.now();
        let state = self.shared().state.lock().await;
        let record = state
            .jobs
            .get(&job.id())
            .ok_or(ClientError::NotFound(job.id()))?;
        let age = (now - record.created_at).to_std().unwrap_or(Duration::ZERO);
        Ok(JobStats {
            id: record.id,
            tube: record.tube.clone(),
            state: record.state,
            priority: record.priority,
            age,
            delay: record.delay,
            ttr: record.ttr,
            reserves: record.reserves,
            releases: record.releases,
            buries: record.buries,
        })
    }

    async fn delete(&self, job: &Job) -> Result<(), ClientError> {
        self.record(Command::Delete(job.id()));
        let mut state = self.shared().state.lock().await;
        state.reserved_by(job.id(), self.conn_id)?;
        state.jobs.remove(&job.id());
        Ok(())
    }

    async fn release(&self, job: &Job, priority: u32, delay: Duration) -> Result<(), ClientError> {
        self.record(Command::Release {
            id: job.id(),
            priority,
            delay,
        });
        {
            let mut state = self.shared().state.lock().await;
            let record = state.reserved_by(job.id(), self.conn_id)?;
            record.priority = priority;
            record.delay = delay;
            record.releases += 1;
            if delay.is_zero() {
                state.make_ready(job.id());
            } else {
                record.state = JobState::Delayed;
                record.reserved_by = None;
                record.ready_at = Some(Instant::now() + delay);
            }
        }
        self.shared().notify.notify_waiters();
        Ok(())
    }

    async fn bury(&self, job: &Job, priority: u32) -> Result<(), ClientError> {
        self.record(Command::Bury {
            id: job.id(),
            priority,
        });
        let mut state = self.shared().state.lock().await;
        let record = state.reserved_by(job.id(), self.conn_id)?;
        record.state = JobState::Buried;
        record.priority = priority;
        record.reserved_by = None;
        record.buries += 1;
        Ok(())
    }
}

#[async_trait]
impl Connect for InMemoryQueue {
    /// Starts a private server; the address is only used for logging.
    async fn connect(options: &ConnectOptions) -> Result<Self, ClientError> {
        tracing::debug!(addr = %options.addr(), "connecting to in-memory queue");
        Ok(InMemoryServer::new().connect().await)
    }
}
