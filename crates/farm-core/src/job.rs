//! Job specifications, build plans and the records handed to the renderer.

use crate::target::Target;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Binary,
    Source,
    Import,
    SyncToTesting,
    SyncToMain,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobKind::Binary => "binary",
            JobKind::Source => "source",
            JobKind::Import => "import",
            JobKind::SyncToTesting => "sync-to-testing",
            JobKind::SyncToMain => "sync-to-main",
        };
        write!(f, "{s}")
    }
}

/// What a job is about.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum JobScope {
    /// Per-package, per-target jobs (binary and source).
    Package { package: String, target: Target },
    /// Per code name and architecture (sync-to-testing).
    Platform { os_code_name: String, arch: String },
    /// One per distribution (import, sync-to-main).
    Distribution,
}

/// A desired job definition, synthesised fresh on every pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub kind: JobKind,
    #[serde(flatten)]
    pub scope: JobScope,
    /// Jobs that must complete before this one is triggered.
    pub upstream: BTreeSet<String>,
    /// Jobs triggered after this one succeeds.
    pub children: BTreeSet<String>,
    pub disabled: bool,
    /// Backend-native configuration document, filled in after rendering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, kind: JobKind, scope: JobScope) -> Self {
        Self {
            name: name.into(),
            kind,
            scope,
            upstream: BTreeSet::new(),
            children: BTreeSet::new(),
            disabled: false,
            payload: None,
        }
    }

    pub fn package(&self) -> Option<&str> {
        match &self.scope {
            JobScope::Package { package, .. } => Some(package),
            _ => None,
        }
    }

    pub fn target(&self) -> Option<&Target> {
        match &self.scope {
            JobScope::Package { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// One `(package, target)` step of a build plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub package: String,
    pub target: Target,
}

/// `(package, target)` pairs in dependency-respecting order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPlan {
    pub entries: Vec<PlanEntry>,
}

impl BuildPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of `package` at `target`, if planned.
    pub fn position(&self, package: &str, target: &Target) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.package == package && &e.target == target)
    }
}

/// Parameters opaque to the graph builder that the renderer needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParams {
    pub distribution: String,
    pub build_name: String,
    pub repository_url: Option<String>,
    pub priority: Option<u32>,
    pub node_label: Option<String>,
    pub timeout_minutes: Option<u32>,
    pub notify_emails: Vec<String>,
    pub maintainer_emails: Vec<String>,
    pub credential_id: Option<String>,
    pub target_repository: Option<String>,
    pub target_queue: Option<String>,
    pub append_timestamp: bool,
    pub import_job_name: String,
}

/// Everything the renderer needs to produce one job's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub name: String,
    pub kind: JobKind,
    #[serde(flatten)]
    pub scope: JobScope,
    pub upstream: Vec<String>,
    pub children: Vec<String>,
    pub disabled: bool,
    pub params: JobParams,
}

/// A dashboard view: jobs whose names match `include_regex`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSpec {
    pub name: String,
    pub include_regex: String,
    pub target: Target,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_accessors() {
        let target = Target::new("archlinux", "rosarch", "x86_64");
        let spec = JobSpec::new(
            "job",
            JobKind::Binary,
            JobScope::Package {
                package: "poco".to_string(),
                target: target.clone(),
            },
        );
        assert_eq!(spec.package(), Some("poco"));
        assert_eq!(spec.target(), Some(&target));

        let import = JobSpec::new("import", JobKind::Import, JobScope::Distribution);
        assert_eq!(import.package(), None);
    }

    #[test]
    fn test_spec_serializes_flat_scope() {
        let spec = JobSpec::new(
            "sync",
            JobKind::SyncToTesting,
            JobScope::Platform {
                os_code_name: "rosarch".to_string(),
                arch: "x86_64".to_string(),
            },
        );
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["kind"], "sync_to_testing");
        assert_eq!(json["scope"], "platform");
        assert_eq!(json["arch"], "x86_64");
        assert!(json.get("payload").is_none());
    }
}
