//! Reserved job handle and its metadata.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::state::JobState;
use super::tube::Tube;

/// Job identifier assigned by the queue backend.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for JobId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A reserved job.
///
/// The handle deliberately does not carry its tube: the reservation API does
/// not disclose it, so the dispatcher resolves it through `stats_job`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    id: JobId,
    body: Vec<u8>,
}

impl Job {
    pub fn new(id: JobId, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            body: body.into(),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as UTF-8, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// Per-job metadata (`stats-job`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    pub id: JobId,
    pub tube: Tube,
    pub state: JobState,
    pub priority: u32,
    /// Time since the job was put.
    #[serde(with = "secs")]
    pub age: Duration,
    #[serde(with = "secs")]
    pub delay: Duration,
    #[serde(with = "secs")]
    pub ttr: Duration,
    pub reserves: u32,
    pub releases: u32,
    pub buries: u32,
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_exposes_id_and_body() {
        let job = Job::new(JobId::new(42), "hello");
        assert_eq!(job.id().get(), 42);
        assert_eq!(job.body(), b"hello");
        assert_eq!(job.body_str(), Some("hello"));
    }

    #[test]
    fn non_utf8_body_has_no_str_view() {
        let job = Job::new(JobId::new(1), vec![0xff, 0xfe]);
        assert_eq!(job.body_str(), None);
    }

    #[test]
    fn stats_serialize_durations_as_seconds() {
        let stats = JobStats {
            id: JobId::new(3),
            tube: Tube::new("emails").unwrap(),
            state: JobState::Reserved,
            priority: 1024,
            age: Duration::from_secs(12),
            delay: Duration::ZERO,
            ttr: Duration::from_secs(60),
            reserves: 1,
            releases: 0,
            buries: 0,
        };

        let v = serde_json::to_value(&stats).unwrap();
        assert_eq!(v["id"], 3);
        assert_eq!(v["tube"], "emails");
        assert_eq!(v["state"], "reserved");
        assert_eq!(v["age"], 12);
        assert_eq!(v["ttr"], 60);
    }
}
