//! Reconciliation of the desired job set against the backend inventory.
//!
//! A pass reads the owned part of the inventory once, classifies every
//! name as create, update, unchanged or stale, then applies the mutating
//! actions with bounded parallelism. Each name appears in at most one
//! action, so no two operations ever race on the same job.

use crate::jobs::JobGraph;
use crate::naming::JobNamer;
use crate::report::{ApplyResult, JobAction, JobOutcome, ReconcileSummary};
use farm_core::error::{BackendError, Error, Result};
use farm_core::inventory::{JobInventory, payloads_match};
use farm_core::job::JobKind;
use farm_core::ports::{BackendHandle, CiSession};
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// One planned action on one job name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOp {
    pub name: String,
    pub kind: Option<JobKind>,
    pub action: JobAction,
    /// Desired document for create and update.
    pub payload: Option<String>,
}

/// The diff between desired and current state, sorted by job name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub ops: Vec<PlannedOp>,
}

impl ReconcilePlan {
    pub fn names(&self, action: JobAction) -> Vec<&str> {
        self.ops
            .iter()
            .filter(|op| op.action == action)
            .map(|op| op.name.as_str())
            .collect()
    }

    /// Keep stale entries and the desired entries `selected` accepts.
    pub fn narrowed(mut self, selected: impl Fn(&str) -> bool) -> Self {
        self.ops.retain(|op| {
            matches!(op.action, JobAction::Stale | JobAction::Delete) || selected(&op.name)
        });
        self
    }

    pub fn mutations(&self) -> usize {
        self.ops.iter().filter(|op| op.action.is_mutation()).count()
    }

    /// Counts as they would be reported before anything is applied.
    pub fn summary(&self) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        for op in &self.ops {
            match op.action {
                JobAction::Create => summary.create += 1,
                JobAction::Update => summary.update += 1,
                JobAction::Unchanged => summary.unchanged += 1,
                JobAction::Stale => summary.stale += 1,
                JobAction::Delete => summary.delete += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Delete stale jobs instead of only reporting them.
    pub prune: bool,
    /// Upper bound on concurrent backend calls.
    pub concurrency: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            prune: false,
            concurrency: 4,
        }
    }
}

/// Result of applying a [`ReconcilePlan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub outcomes: Vec<JobOutcome>,
    pub cancelled: bool,
}

impl ReconcileReport {
    pub fn summary(&self) -> ReconcileSummary {
        ReconcileSummary::from_outcomes(&self.outcomes)
    }

    pub fn failed(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| o.is_failed())
    }
}

/// Read the owned part of the backend's job inventory.
///
/// Foreign jobs (other distributions, other builds, hand-made jobs) are
/// never loaded and therefore never classified as stale.
pub async fn load_inventory(
    session: &dyn CiSession,
    namer: &JobNamer,
    concurrency: usize,
) -> std::result::Result<JobInventory, BackendError> {
    let names: Vec<String> = session
        .list_jobs()
        .await?
        .into_iter()
        .filter(|name| namer.owns(name))
        .collect();
    debug!(owned = names.len(), "Loading job configurations");

    stream::iter(names)
        .map(|name| async move {
            let config = session.job_config(&name).await?;
            Ok::<_, BackendError>((name, config))
        })
        .buffer_unordered(concurrency.max(1))
        .try_collect()
        .await
}

#[derive(Debug, Default)]
pub struct JobReconciler;

impl JobReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Classify every desired job and every owned inventory entry.
    ///
    /// Fails if a desired job has not been rendered yet.
    pub fn diff(
        &self,
        desired: &JobGraph,
        inventory: &JobInventory,
        namer: &JobNamer,
        prune: bool,
    ) -> Result<ReconcilePlan> {
        let mut ops = Vec::with_capacity(desired.len());

        for spec in desired.jobs() {
            let payload = spec.payload.as_deref().ok_or_else(|| Error::Render {
                name: spec.name.clone(),
                reason: "job was not rendered".to_string(),
            })?;
            let action = match inventory.get(&spec.name) {
                None => JobAction::Create,
                Some(stored) if payloads_match(stored, payload) => JobAction::Unchanged,
                Some(_) => JobAction::Update,
            };
            ops.push(PlannedOp {
                name: spec.name.clone(),
                kind: Some(spec.kind),
                action,
                payload: (action != JobAction::Unchanged).then(|| payload.to_string()),
            });
        }

        for name in inventory.names() {
            if desired.get(name).is_some() || !namer.owns(name) {
                continue;
            }
            ops.push(PlannedOp {
                name: name.to_string(),
                kind: namer.kind_of(name),
                action: if prune { JobAction::Delete } else { JobAction::Stale },
                payload: None,
            });
        }

        ops.sort_by(|a, b| a.name.cmp(&b.name));
        let plan = ReconcilePlan { ops };
        info!(summary = %plan.summary(), "Computed reconciliation diff");
        Ok(plan)
    }

    /// Apply `plan` through `handle`.
    ///
    /// Dry-run handles never receive a mutating call. Failures are collected
    /// per job; once `shutdown` flips, no new mutation starts and the
    /// remaining actions are reported as skipped.
    pub async fn apply(
        &self,
        plan: ReconcilePlan,
        handle: &BackendHandle,
        options: ReconcileOptions,
        shutdown: &watch::Receiver<bool>,
    ) -> ReconcileReport {
        let mut outcomes = Vec::with_capacity(plan.ops.len());
        let mut pending = Vec::new();

        for op in plan.ops {
            if !op.action.is_mutation() {
                outcomes.push(outcome(&op, ApplyResult::Noop, None));
            } else if handle.is_dry_run() {
                outcomes.push(outcome(&op, ApplyResult::Planned, None));
            } else {
                pending.push(op);
            }
        }

        let applied: Vec<JobOutcome> = stream::iter(pending)
            .map(|op| async move {
                if *shutdown.borrow() {
                    return outcome(&op, ApplyResult::Skipped, None);
                }
                match apply_op(handle, &op).await {
                    Ok(()) => {
                        debug!(job = %op.name, action = %op.action, "Applied");
                        outcome(&op, ApplyResult::Applied, None)
                    }
                    Err(err) => {
                        warn!(job = %op.name, action = %op.action, error = %err, "Job operation failed");
                        outcome(&op, ApplyResult::Failed, Some(err))
                    }
                }
            })
            .buffer_unordered(options.concurrency.max(1))
            .collect()
            .await;

        outcomes.extend(applied);
        outcomes.sort_by(|a, b| a.name.cmp(&b.name));

        let cancelled = outcomes.iter().any(|o| o.result == ApplyResult::Skipped);
        if cancelled {
            warn!("Reconciliation cancelled; remaining job operations skipped");
        }
        ReconcileReport {
            outcomes,
            cancelled,
        }
    }
}

async fn apply_op(handle: &BackendHandle, op: &PlannedOp) -> std::result::Result<(), BackendError> {
    let payload = op.payload.as_deref().unwrap_or_default();
    match handle {
        BackendHandle::Connected(session) => match op.action {
            JobAction::Create => session.create_job(&op.name, payload).await,
            JobAction::Update => session.update_job(&op.name, payload).await,
            JobAction::Delete => session.delete_job(&op.name).await,
            JobAction::Unchanged | JobAction::Stale => Ok(()),
        },
        BackendHandle::OfflineScript(sink) => match op.action {
            JobAction::Create | JobAction::Update => sink
                .write_job(&op.name, payload)
                .await
                .map_err(|e| BackendError::fatal(e.to_string())),
            _ => Ok(()),
        },
        BackendHandle::DryRun(_) => Ok(()),
    }
}

fn outcome(op: &PlannedOp, result: ApplyResult, error: Option<BackendError>) -> JobOutcome {
    JobOutcome {
        name: op.name.clone(),
        kind: op.kind,
        action: op.action,
        result,
        error,
    }
}
