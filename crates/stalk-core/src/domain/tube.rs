//! Tube - named work queue identifier.
//!
//! Tube names follow the beanstalkd naming rules:
//! - 1..=200 bytes
//! - `A-Z a-z 0-9` and `- + / ; . $ _ ( )`
//! - must not start with `-`

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use super::errors::WorkerError;

/// Maximum tube name length in bytes.
pub const MAX_TUBE_LEN: usize = 200;

/// A validated tube name.
///
/// Cheap to clone and hashable, so it can be used directly as a registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tube(String);

impl Tube {
    /// Name of the tube every connection watches on connect.
    pub const DEFAULT_NAME: &'static str = "default";

    pub fn new(name: impl Into<String>) -> Result<Self, WorkerError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// The well-known `default` tube.
    pub fn default_tube() -> Self {
        Self(Self::DEFAULT_NAME.to_string())
    }

    pub fn validate(name: &str) -> Result<(), WorkerError> {
        let invalid = |reason: &str| WorkerError::InvalidTube {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("empty name"));
        }
        if name.len() > MAX_TUBE_LEN {
            return Err(invalid("longer than 200 bytes"));
        }
        if name.starts_with('-') {
            return Err(invalid("must not start with '-'"));
        }
        if let Some(c) = name.chars().find(|c| !is_tube_char(*c)) {
            return Err(invalid(&format!("illegal character {c:?}")));
        }
        Ok(())
    }

    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT_NAME
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_tube_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '/' | ';' | '.' | '$' | '_' | '(' | ')')
}

impl fmt::Display for Tube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Tube {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Tube {
    type Error = WorkerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Tube {
    type Error = WorkerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Tube> for String {
    fn from(tube: Tube) -> Self {
        tube.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("emails")]
    #[case("default")]
    #[case("billing.charge.v1")]
    #[case("a+b/c;d$e_(f)")]
    #[case("x-1")]
    fn accepts_valid_names(#[case] name: &str) {
        let tube = Tube::new(name).unwrap();
        assert_eq!(tube.as_str(), name);
    }

    #[rstest]
    #[case("")]
    #[case("-leading-dash")]
    #[case("has space")]
    #[case("emoji🙂")]
    #[case("star*")]
    fn rejects_invalid_names(#[case] name: &str) {
        let err = Tube::new(name).unwrap_err();
        assert!(matches!(err, WorkerError::InvalidTube { .. }));
    }

    #[test]
    fn rejects_overlong_names() {
        let name = "a".repeat(MAX_TUBE_LEN + 1);
        assert!(Tube::new(name).is_err());
        assert!(Tube::new("a".repeat(MAX_TUBE_LEN)).is_ok());
    }

    #[test]
    fn default_tube_is_recognised() {
        assert!(Tube::default_tube().is_default());
        assert!(Tube::new("default").unwrap().is_default());
        assert!(!Tube::new("emails").unwrap().is_default());
    }

    #[test]
    fn deserialize_validates() {
        let ok: Tube = serde_json::from_str("\"orders\"").unwrap();
        assert_eq!(ok.as_str(), "orders");

        let bad: Result<Tube, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
    }
}
