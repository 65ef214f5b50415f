//! Errors surfaced by the worker runtime.
//!
//! Per-job failures (handler errors, the unhandled `default` tube) are
//! resolved locally by the dispatcher and never show up here. What remains
//! are structural problems the caller has to decide about.

use thiserror::Error;

use super::job::JobId;
use crate::config::ConfigError;
use crate::ports::ClientError;

/// Coarse classification of a `WorkerError`, handy for restart policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Watch set and registry drifted apart; restarting will not help.
    Invariant,
    /// Bad input at build/registration time.
    Configuration,
    /// Transport failure talking to the queue.
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    /// A job was reserved from a tube that has no handler (and is not `default`).
    /// The job has already been released when this is returned.
    #[error("job {job_id} fetched for unknown tube \"{tube}\"")]
    UnknownTube { tube: String, job_id: JobId },

    #[error("invalid tube name {name:?}: {reason}")]
    InvalidTube { name: String, reason: String },

    #[error("missing handlers for tubes: {0:?}")]
    MissingHandlers(Vec<String>),

    #[error("queue client: {0}")]
    Client(#[from] ClientError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),
}

impl WorkerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::UnknownTube { .. } => ErrorKind::Invariant,
            WorkerError::InvalidTube { .. }
            | WorkerError::MissingHandlers(_)
            | WorkerError::Config(_) => ErrorKind::Configuration,
            WorkerError::Client(_) => ErrorKind::Infrastructure,
        }
    }
}
