//! QueueClient port - the beanstalkd-style work queue a worker consumes.
//!
//! The worker never frames protocol bytes itself; it talks to the queue
//! only through this trait. `impls::memory::InMemoryQueue` is the
//! in-process implementation used for development and tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Job, JobId, JobStats, Tube};

/// beanstalkd's default port.
pub const DEFAULT_PORT: u16 = 11300;

/// Priority used for release/bury when nothing else is configured (beanstalkd default).
pub const DEFAULT_PRIORITY: u32 = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connect to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {0} is not reserved by this connection")]
    NotReserved(JobId),

    /// The server refuses to drop the last watched tube.
    #[error("cannot ignore {0}: it is the only watched tube")]
    NotIgnored(Tube),

    #[error("connection closed")]
    Closed,

    #[error("operation failed: {0}")]
    OperationFailed(String),
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Option<Duration>,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            connect_timeout: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::new("127.0.0.1")
    }
}

/// Queue operations a worker needs.
///
/// Every reserved job must receive exactly one of `delete`, `release` or
/// `bury`. Implementations are shared behind `Arc<dyn QueueClient>`, so the
/// watch set lives behind interior mutability.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Add `tube` to the watch set. Returns the number of watched tubes.
    async fn watch(&self, tube: &Tube) -> Result<usize, ClientError>;

    /// Remove `tube` from the watch set. Returns the number of watched tubes.
    async fn ignore(&self, tube: &Tube) -> Result<usize, ClientError>;

    /// Reserve the next ready job from any watched tube.
    ///
    /// `None` timeout waits indefinitely. Returns `Ok(None)` when the timeout
    /// elapses without a job.
    async fn reserve(&self, timeout: Option<Duration>) -> Result<Option<Job>, ClientError>;

    /// Metadata for a job, including the tube it lives in.
    async fn stats_job(&self, job: &Job) -> Result<JobStats, ClientError>;

    async fn delete(&self, job: &Job) -> Result<(), ClientError>;

    async fn release(&self, job: &Job, priority: u32, delay: Duration) -> Result<(), ClientError>;

    async fn bury(&self, job: &Job, priority: u32) -> Result<(), ClientError>;
}

/// Establish a client connection.
#[async_trait]
pub trait Connect: QueueClient + Sized {
    async fn connect(options: &ConnectOptions) -> Result<Self, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_options_default_to_beanstalkd_port() {
        let opts = ConnectOptions::new("queue.internal");
        assert_eq!(opts.port, DEFAULT_PORT);
        assert_eq!(opts.addr(), "queue.internal:11300");
        assert_eq!(opts.connect_timeout, None);
    }

    #[test]
    fn connect_options_builder() {
        let opts = ConnectOptions::default()
            .with_port(11301)
            .with_connect_timeout(Duration::from_secs(2));
        assert_eq!(opts.addr(), "127.0.0.1:11301");
        assert_eq!(opts.connect_timeout, Some(Duration::from_secs(2)));
    }
}
