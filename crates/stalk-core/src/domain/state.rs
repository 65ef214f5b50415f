//! Job state as reported by the queue backend.

use serde::{Deserialize, Serialize};

/// Job state (beanstalkd's four states).
///
/// State transitions seen from a worker:
/// - Ready -> Reserved -> (deleted)
/// - Ready -> Reserved -> Ready (release without delay)
/// - Ready -> Reserved -> Delayed -> Ready (release with delay)
/// - Ready -> Reserved -> Buried (manual kick needed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be reserved.
    Ready,

    /// Held by exactly one consumer.
    Reserved,

    /// Released with a delay; becomes ready once it elapses.
    Delayed,

    /// Parked for inspection; excluded from normal delivery.
    Buried,
}

impl JobState {
    /// Can a consumer reserve a job in this state?
    pub fn is_reservable(self) -> bool {
        matches!(self, JobState::Ready)
    }

    /// Only reserved jobs accept delete/release/bury from a worker.
    pub fn accepts_disposition(self) -> bool {
        matches!(self, JobState::Reserved)
    }
}
