//! Error types for the buildfarm job generator.
//!
//! The variants mirror how a pass fails: validation and cycle errors abort
//! before any backend mutation, fetch errors abort unless the exclusion
//! policy is enabled, and backend errors are collected per job.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("Failed to fetch metadata for package '{package}': {reason}")]
    Fetch { package: String, reason: String },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Render error for '{name}': {reason}")]
    Render { name: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pass cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    pub fn fetch(package: impl Into<String>, reason: impl ToString) -> Self {
        Error::Fetch {
            package: package.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error is raised before the backend is touched.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::Cycle(_) | Error::Fetch { .. } | Error::Render { .. }
        )
    }
}

/// A value that is not among the choices the build file declares, or that
/// is not a well-formed identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Invalid {field} '{value}' {}", choices_hint(.choices))]
pub struct ValidationError {
    pub field: String,
    pub value: String,
    /// Sorted valid choices; empty when the value is malformed rather than unknown.
    pub choices: Vec<String>,
}

fn choices_hint(choices: &[String]) -> String {
    if choices.is_empty() {
        "(malformed identifier)".to_string()
    } else {
        format!("choose one of the following: {}", choices.join(", "))
    }
}

impl ValidationError {
    pub fn unknown(
        field: impl Into<String>,
        value: impl Into<String>,
        choices: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut choices: Vec<String> = choices.into_iter().map(Into::into).collect();
        choices.sort();
        choices.dedup();
        Self {
            field: field.into(),
            value: value.into(),
            choices,
        }
    }

    pub fn malformed(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            choices: Vec::new(),
        }
    }
}

/// The dependency graph is not acyclic.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Dependency cycle detected: {}", format_cycle(.cycle))]
pub struct CycleError {
    /// Packages along one cycle, in dependency order, without repeating the first.
    pub cycle: Vec<String>,
}

fn format_cycle(cycle: &[String]) -> String {
    match cycle.first() {
        Some(first) => format!("{} -> {}", cycle.join(" -> "), first),
        None => String::new(),
    }
}

/// How the backend classified a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    /// Worth retrying later (timeouts, 5xx, connection resets).
    Transient,
    /// Will not succeed without intervention (auth, malformed config).
    Fatal,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendErrorKind::Transient => write!(f, "transient"),
            BackendErrorKind::Fatal => write!(f, "fatal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Backend error ({kind}): {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Fatal,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == BackendErrorKind::Transient
    }
}
