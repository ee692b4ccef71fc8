//! Build targets and identifier rules.

use crate::error::ValidationError;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Architecture value that denotes a source-only job.
pub const SOURCE_ARCH: &str = "source";

/// A build environment: operating system, distribution code name and
/// architecture (or [`SOURCE_ARCH`]).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct Target {
    pub os_name: String,
    pub os_code_name: String,
    pub arch: String,
}

impl Target {
    pub fn new(
        os_name: impl Into<String>,
        os_code_name: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            os_name: os_name.into(),
            os_code_name: os_code_name.into(),
            arch: arch.into(),
        }
    }

    pub fn is_source(&self) -> bool {
        self.arch == SOURCE_ARCH
    }

    /// Whether `other` runs on the same OS and code name.
    pub fn same_platform(&self, other: &Target) -> bool {
        self.os_name == other.os_name && self.os_code_name == other.os_code_name
    }

    /// Reject identifiers that would make job names ambiguous.
    pub fn check_identifiers(&self) -> Result<(), ValidationError> {
        check_identifier(IdentifierKind::OsName, &self.os_name)?;
        check_identifier(IdentifierKind::OsCodeName, &self.os_code_name)?;
        check_identifier(IdentifierKind::Arch, &self.arch)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.os_name, self.os_code_name, self.arch)
    }
}

/// The identifier classes that end up inside job names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Distribution,
    BuildName,
    OsName,
    OsCodeName,
    Arch,
    Package,
}

impl IdentifierKind {
    pub fn label(self) -> &'static str {
        match self {
            IdentifierKind::Distribution => "distribution name",
            IdentifierKind::BuildName => "build name",
            IdentifierKind::OsName => "OS name",
            IdentifierKind::OsCodeName => "OS code name",
            IdentifierKind::Arch => "architecture",
            IdentifierKind::Package => "package name",
        }
    }

    fn pattern(self) -> &'static Regex {
        // Only architectures may contain underscores, and never a double
        // underscore, which separates job name fields.
        static WORD: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9.+-]*$").expect("valid regex"));
        static ARCH: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:[_.-][a-z0-9]+)*$").expect("valid regex"));
        static PACKAGE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"^[A-Za-z0-9@+][A-Za-z0-9@._+-]*$").expect("valid regex")
        });
        match self {
            IdentifierKind::Distribution
            | IdentifierKind::BuildName
            | IdentifierKind::OsName
            | IdentifierKind::OsCodeName => &WORD,
            IdentifierKind::Arch => &ARCH,
            IdentifierKind::Package => &PACKAGE,
        }
    }
}

pub fn check_identifier(kind: IdentifierKind, value: &str) -> Result<(), ValidationError> {
    if kind.pattern().is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::malformed(kind.label(), value))
    }
}
