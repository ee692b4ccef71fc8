//! Structured per-pass reporting.

use chrono::{DateTime, Utc};
use farm_core::error::{BackendError, BackendErrorKind, Error};
use farm_core::ids::PassId;
use farm_core::job::JobKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the reconciler decided for one job name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    Create,
    Update,
    Unchanged,
    /// Owned by this build but no longer desired; left in place.
    Stale,
    /// Stale and removed because pruning was requested.
    Delete,
}

impl JobAction {
    pub fn is_mutation(self) -> bool {
        matches!(self, JobAction::Create | JobAction::Update | JobAction::Delete)
    }
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobAction::Create => "create",
            JobAction::Update => "update",
            JobAction::Unchanged => "unchanged",
            JobAction::Stale => "stale",
            JobAction::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

/// How applying an action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyResult {
    Applied,
    /// Computed under dry-run; nothing was sent.
    Planned,
    /// Nothing to send (unchanged or stale).
    Noop,
    /// Not attempted because the pass was cancelled.
    Skipped,
    Failed,
}

impl fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApplyResult::Applied => "applied",
            ApplyResult::Planned => "planned",
            ApplyResult::Noop => "noop",
            ApplyResult::Skipped => "skipped",
            ApplyResult::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<JobKind>,
    pub action: JobAction,
    pub result: ApplyResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BackendError>,
}

impl JobOutcome {
    pub fn is_failed(&self) -> bool {
        self.result == ApplyResult::Failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewOutcome {
    pub name: String,
    pub include_regex: String,
    pub result: ApplyResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BackendError>,
}

/// Per-action counts of a reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub create: usize,
    pub update: usize,
    pub unchanged: usize,
    pub stale: usize,
    pub delete: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ReconcileSummary {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a JobOutcome>) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome.action {
                JobAction::Create => summary.create += 1,
                JobAction::Update => summary.update += 1,
                JobAction::Unchanged => summary.unchanged += 1,
                JobAction::Stale => summary.stale += 1,
                JobAction::Delete => summary.delete += 1,
            }
            match outcome.result {
                ApplyResult::Failed => summary.failed += 1,
                ApplyResult::Skipped => summary.skipped += 1,
                _ => {}
            }
        }
        summary
    }
}

impl fmt::Display for ReconcileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} unchanged, {} stale, {} to delete, {} failed, {} skipped",
            self.create, self.update, self.unchanged, self.stale, self.delete, self.failed, self.skipped
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    Succeeded,
    /// Some job or view operations failed or were skipped.
    PartiallyFailed,
    /// Nothing was applied: the pass stopped before reconciling.
    FailedPrecondition,
}

impl fmt::Display for PassStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PassStatus::Succeeded => "succeeded",
            PassStatus::PartiallyFailed => "partially failed",
            PassStatus::FailedPrecondition => "failed precondition",
        };
        write!(f, "{s}")
    }
}

/// Why a pass stopped before reconciling, in a serialisable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PassFailure {
    Validation {
        field: String,
        value: String,
        choices: Vec<String>,
    },
    Cycle {
        cycle: Vec<String>,
    },
    Fetch {
        package: String,
        reason: String,
    },
    Backend {
        kind: BackendErrorKind,
        message: String,
    },
    Render {
        name: String,
        reason: String,
    },
    Other {
        message: String,
    },
}

impl From<&Error> for PassFailure {
    fn from(err: &Error) -> Self {
        match err {
            Error::Validation(v) => PassFailure::Validation {
                field: v.field.clone(),
                value: v.value.clone(),
                choices: v.choices.clone(),
            },
            Error::Cycle(c) => PassFailure::Cycle {
                cycle: c.cycle.clone(),
            },
            Error::Fetch { package, reason } => PassFailure::Fetch {
                package: package.clone(),
                reason: reason.clone(),
            },
            Error::Backend(b) => PassFailure::Backend {
                kind: b.kind,
                message: b.message.clone(),
            },
            Error::Render { name, reason } => PassFailure::Render {
                name: name.clone(),
                reason: reason.clone(),
            },
            other => PassFailure::Other {
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for PassFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassFailure::Validation {
                field,
                value,
                choices,
            } if choices.is_empty() => write!(f, "invalid {field} '{value}'"),
            PassFailure::Validation {
                field,
                value,
                choices,
            } => write!(
                f,
                "invalid {field} '{value}', choose one of: {}",
                choices.join(", ")
            ),
            PassFailure::Cycle { cycle } => {
                write!(f, "dependency cycle: {}", cycle.join(" -> "))?;
                match cycle.first() {
                    Some(first) => write!(f, " -> {first}"),
                    None => Ok(()),
                }
            }
            PassFailure::Fetch { package, reason } => {
                write!(f, "failed to fetch '{package}': {reason}")
            }
            PassFailure::Backend { kind, message } => write!(f, "backend ({kind}): {message}"),
            PassFailure::Render { name, reason } => write!(f, "failed to render '{name}': {reason}"),
            PassFailure::Other { message } => write!(f, "{message}"),
        }
    }
}

/// The single structured report a pass produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassReport {
    pub pass_id: PassId,
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub order: Vec<String>,
    pub warnings: Vec<String>,
    pub outcomes: Vec<JobOutcome>,
    pub views: Vec<ViewOutcome>,
    pub summary: ReconcileSummary,
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<PassFailure>,
    /// Closing the session or flushing the script sink failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_failure: Option<PassFailure>,
    pub status: PassStatus,
}

impl PassReport {
    pub fn new(pass_id: PassId, mode: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            pass_id,
            mode: mode.into(),
            started_at: now,
            finished_at: now,
            order: Vec::new(),
            warnings: Vec::new(),
            outcomes: Vec::new(),
            views: Vec::new(),
            summary: ReconcileSummary::default(),
            cancelled: false,
            failure: None,
            release_failure: None,
            status: PassStatus::Succeeded,
        }
    }

    /// Record a precondition failure; nothing after it is applied.
    pub fn fail(&mut self, err: &Error) {
        self.failure = Some(PassFailure::from(err));
    }

    /// Record a failure to release the backend handle. Work already
    /// applied stays in the report.
    pub fn release_failed(&mut self, err: &Error) {
        self.warnings.push(format!("Failed to release backend: {err}"));
        self.release_failure = Some(PassFailure::from(err));
    }

    /// Compute the summary and status and stamp the finish time.
    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self.summary = ReconcileSummary::from_outcomes(&self.outcomes);
        let views_failed = self
            .views
            .iter()
            .any(|v| matches!(v.result, ApplyResult::Failed | ApplyResult::Skipped));

        self.status = if self.failure.is_some() {
            PassStatus::FailedPrecondition
        } else if self.summary.failed > 0
            || self.summary.skipped > 0
            || views_failed
            || self.release_failure.is_some()
        {
            PassStatus::PartiallyFailed
        } else {
            PassStatus::Succeeded
        };
        self
    }

    pub fn failed_jobs(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| o.is_failed())
    }

    pub fn is_success(&self) -> bool {
        self.status == PassStatus::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_core::error::{CycleError, ValidationError};
    use pretty_assertions::assert_eq;

    fn outcome(name: &str, action: JobAction, result: ApplyResult) -> JobOutcome {
        JobOutcome {
            name: name.to_string(),
            kind: None,
            action,
            result,
            error: None,
        }
    }

    #[test]
    fn test_summary_counts() {
        let outcomes = [
            outcome("a", JobAction::Create, ApplyResult::Applied),
            outcome("b", JobAction::Update, ApplyResult::Failed),
            outcome("c", JobAction::Unchanged, ApplyResult::Noop),
            outcome("d", JobAction::Stale, ApplyResult::Noop),
            outcome("e", JobAction::Create, ApplyResult::Skipped),
        ];
        let summary = ReconcileSummary::from_outcomes(&outcomes);
        assert_eq!(
            summary,
            ReconcileSummary {
                create: 2,
                update: 1,
                unchanged: 1,
                stale: 1,
                delete: 0,
                failed: 1,
                skipped: 1,
            }
        );
    }

    #[test]
    fn test_status_from_outcomes() {
        let mut report = PassReport::new(PassId::new(), "connected");
        report.outcomes.push(outcome("a", JobAction::Create, ApplyResult::Applied));
        assert_eq!(report.clone().finish().status, PassStatus::Succeeded);

        report.outcomes.push(outcome("b", JobAction::Update, ApplyResult::Failed));
        let finished = report.finish();
        assert_eq!(finished.status, PassStatus::PartiallyFailed);
        assert_eq!(finished.failed_jobs().count(), 1);
    }

    #[test]
    fn test_release_failure_keeps_outcomes() {
        let mut report = PassReport::new(PassId::new(), "offline-script");
        report.outcomes.push(outcome("a", JobAction::Create, ApplyResult::Applied));
        report.release_failed(&Error::Io(std::io::Error::other("disk full")));
        let report = report.finish();

        assert_eq!(report.status, PassStatus::PartiallyFailed);
        assert_eq!(report.summary.create, 1);
        assert_eq!(report.warnings.len(), 1);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["release_failure"]["type"], "other");
    }

    #[test]
    fn test_precondition_failure_wins() {
        let mut report = PassReport::new(PassId::new(), "dry-run");
        report.fail(&Error::Cycle(CycleError {
            cycle: vec!["A".to_string(), "B".to_string()],
        }));
        let report = report.finish();
        assert_eq!(report.status, PassStatus::FailedPrecondition);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failure"]["type"], "cycle");
        assert_eq!(json["failure"]["cycle"][1], "B");
        assert_eq!(json["status"], "failed_precondition");
    }

    #[test]
    fn test_validation_failure_keeps_choices() {
        let err = Error::from(ValidationError::unknown("OS name", "windows", ["archlinux"]));
        assert_eq!(
            PassFailure::from(&err),
            PassFailure::Validation {
                field: "OS name".to_string(),
                value: "windows".to_string(),
                choices: vec!["archlinux".to_string()],
            }
        );
        assert_eq!(
            PassFailure::from(&err).to_string(),
            "invalid OS name 'windows', choose one of: archlinux"
        );
    }
}
