//! Outcome model: what a handler reported and what the queue is told.
//!
//! Handlers return `Result<(), JobError>`. The dispatcher turns that into an
//! `Outcome` (see `decision::classify`) and each outcome maps to exactly one
//! `Disposition`.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error returned by a job handler.
///
/// `kind` is a classification tag chosen by the handler (e.g. `"timeout"`,
/// `"validation"`). Retry predicates match on it instead of on error types.
#[derive(Debug)]
pub struct JobError {
    kind: Cow<'static, str>,
    message: String,
    source: Option<BoxError>,
}

impl JobError {
    /// Tag used by `JobError::msg`.
    pub const GENERIC: &'static str = "error";

    pub fn new(kind: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Untagged error (kind `"error"`).
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Self::GENERIC, message)
    }

    /// Wrap an underlying error, using its `Display` as the message.
    pub fn from_source(
        kind: impl Into<Cow<'static, str>>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: kind.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Message followed by the chain of sources, one per line.
    pub fn trace(&self) -> String {
        let mut out = format!("[{}] {}", self.kind, self.message);
        let mut next = std::error::Error::source(self);
        while let Some(err) = next {
            out.push_str("\ncaused by: ");
            out.push_str(&err.to_string());
            next = err.source();
        }
        out
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Classified result of one handler invocation.
#[derive(Debug)]
pub enum Outcome {
    Succeeded,
    Retryable(JobError),
    Fatal(JobError),
}

impl Outcome {
    pub fn disposition(&self) -> Disposition {
        match self {
            Outcome::Succeeded => Disposition::Delete,
            Outcome::Retryable(_) => Disposition::Release,
            Outcome::Fatal(_) => Disposition::Bury,
        }
    }

    pub fn error(&self) -> Option<&JobError> {
        match self {
            Outcome::Succeeded => None,
            Outcome::Retryable(e) | Outcome::Fatal(e) => Some(e),
        }
    }
}

/// Terminal action issued for a reserved job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// Acknowledge and remove.
    Delete,
    /// Return to the queue for redelivery.
    Release,
    /// Park in the buried state.
    Bury,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Disposition::Delete => "delete",
            Disposition::Release => "release",
            Disposition::Bury => "bury",
        };
        f.write_str(s)
    }
}
