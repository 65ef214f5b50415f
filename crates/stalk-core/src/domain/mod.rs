//! Domain model (tubes, jobs, outcomes, decisions, errors).

pub mod decision;
pub mod errors;
pub mod job;
pub mod outcome;
pub mod state;
pub mod tube;

pub use self::decision::{
    classify, retry_always, retry_on_kind, retry_on_kinds, retry_when, RetryPredicate,
};
pub use self::errors::{ErrorKind, WorkerError};
pub use self::job::{Job, JobId, JobStats};
pub use self::outcome::{Disposition, JobError, Outcome};
pub use self::state::JobState;
pub use self::tube::Tube;
