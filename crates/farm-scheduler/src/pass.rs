//! One end-to-end reconciliation pass.
//!
//! `plan_pass` is pure with respect to the backend: it collects metadata,
//! resolves the order and synthesises the job graph. `run_pass` acquires a
//! backend handle, plans, reconciles jobs and views, and releases the
//! handle on every exit path.

use crate::dag::{DependencyResolver, ResolvedOrder};
use crate::jobs::{JobGraph, JobGraphBuilder};
use crate::matrix::{TargetFilter, TargetMatrix};
use crate::metadata::{MetadataSet, collect_metadata};
use crate::naming::JobNamer;
use crate::reconcile::{JobReconciler, ReconcileOptions, load_inventory};
use crate::report::{ApplyResult, PassReport};
use crate::views::ViewManager;
use farm_core::build_file::BuildFile;
use farm_core::error::{Error, Result, ValidationError};
use farm_core::ids::PassId;
use farm_core::inventory::JobInventory;
use farm_core::job::{JobScope, JobSpec, ViewSpec};
use farm_core::ports::{BackendHandle, CiBackend, JobRenderer, MetadataProvider, ScriptSink};
use std::collections::BTreeSet;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// What to plan.
///
/// The whole whitelist is always resolved across every declared target, so
/// dependency edges and staleness never depend on the selection. `filter`
/// and `packages` only choose which package jobs a pass creates or updates.
#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub build_file: &'a BuildFile,
    pub filter: TargetFilter,
    /// Narrow the build file's whitelist; empty selects the whole whitelist.
    pub packages: Vec<String>,
}

impl<'a> PlanRequest<'a> {
    pub fn new(build_file: &'a BuildFile) -> Self {
        Self {
            build_file,
            filter: TargetFilter::all(),
            packages: Vec::new(),
        }
    }

    /// Selected packages, validated against the whitelist.
    pub fn selected_packages(&self) -> Result<Vec<String>> {
        let whitelist = &self.build_file.package_whitelist;
        for name in &self.packages {
            if !whitelist.contains(name) {
                return Err(
                    ValidationError::unknown("package", name, whitelist.iter().cloned()).into(),
                );
            }
        }
        let mut selected = if self.packages.is_empty() {
            whitelist.clone()
        } else {
            self.packages.clone()
        };
        selected.sort();
        selected.dedup();
        Ok(selected)
    }

    /// Whether the request narrows the plan at all.
    pub fn is_narrowed(&self) -> bool {
        !self.packages.is_empty() || !self.filter.is_unrestricted()
    }

    /// Whether `spec` falls inside the selection.
    ///
    /// Aggregate jobs are rendered from the full plan and stay selected.
    pub fn selects(&self, spec: &JobSpec) -> bool {
        match &spec.scope {
            JobScope::Package { package, target } => {
                (self.packages.is_empty() || self.packages.contains(package))
                    && self.filter.matches(target)
            }
            JobScope::Platform { .. } | JobScope::Distribution => true,
        }
    }

    fn whitelist(&self) -> Vec<String> {
        let mut names = self.build_file.package_whitelist.clone();
        names.sort();
        names.dedup();
        names
    }
}

/// Everything computed before the backend is touched.
#[derive(Debug, Clone)]
pub struct PassPlan {
    pub namer: JobNamer,
    pub matrix: TargetMatrix,
    pub metadata: MetadataSet,
    pub order: ResolvedOrder,
    pub graph: JobGraph,
    pub views: Vec<ViewSpec>,
    /// Names of the desired jobs the request selects.
    pub selected: BTreeSet<String>,
}

impl PassPlan {
    pub fn is_selected(&self, name: &str) -> bool {
        self.selected.contains(name)
    }

    /// Selected desired jobs, in name order.
    pub fn selected_jobs(&self) -> impl Iterator<Item = &JobSpec> {
        self.graph.jobs().filter(|spec| self.selected.contains(&spec.name))
    }
}

/// Collect metadata, resolve the order and build the job graph.
///
/// When `renderer` is given every job payload is rendered as well.
pub async fn plan_pass(
    request: &PlanRequest<'_>,
    provider: &dyn MetadataProvider,
    renderer: Option<&dyn JobRenderer>,
) -> Result<PassPlan> {
    let build_file = request.build_file;
    let namer = JobNamer::new(&build_file.distribution, &build_file.build_name)?;
    // Reject unknown selections before anything is fetched.
    TargetMatrix::from_build_file(build_file, &request.filter)?;
    request.selected_packages()?;

    let matrix = TargetMatrix::from_build_file(build_file, &TargetFilter::all())?;
    let names = request.whitelist();

    let metadata = collect_metadata(
        provider,
        &names,
        build_file.farm.on_fetch_failure,
        build_file.farm.fetch_concurrency,
    )
    .await?;

    let order = DependencyResolver::new().resolve(&metadata.packages)?;
    let mut graph = JobGraphBuilder::new(build_file, &namer).build(&order, &matrix)?;
    if let Some(renderer) = renderer {
        graph.render(renderer, build_file, &namer, &metadata.packages)?;
    }
    let views = ViewManager::new(&namer).derive(&matrix);
    let selected = graph
        .jobs()
        .filter(|spec| request.selects(spec))
        .map(|spec| spec.name.clone())
        .collect();

    Ok(PassPlan {
        namer,
        matrix,
        metadata,
        order,
        graph,
        views,
        selected,
    })
}

/// How a pass reaches the CI backend.
pub enum BackendTarget<'a> {
    /// Connect to a live backend; `dry_run` suppresses every mutation.
    Live {
        backend: &'a dyn CiBackend,
        dry_run: bool,
    },
    /// Never contact the backend; write documents to a script sink.
    Offline(Box<dyn ScriptSink>),
}

impl BackendTarget<'_> {
    fn mode(&self) -> &'static str {
        match self {
            BackendTarget::Live { dry_run: false, .. } => "connected",
            BackendTarget::Live { dry_run: true, .. } => "dry-run",
            BackendTarget::Offline(_) => "offline-script",
        }
    }

    async fn acquire(self) -> Result<BackendHandle> {
        match self {
            BackendTarget::Live { backend, dry_run } => {
                let session = backend.connect().await?;
                Ok(if dry_run {
                    BackendHandle::DryRun(session)
                } else {
                    BackendHandle::Connected(session)
                })
            }
            BackendTarget::Offline(sink) => Ok(BackendHandle::OfflineScript(sink)),
        }
    }
}

/// Inputs of [`run_pass`].
pub struct PassContext<'a> {
    pub request: PlanRequest<'a>,
    pub provider: &'a dyn MetadataProvider,
    pub renderer: &'a dyn JobRenderer,
    pub backend: BackendTarget<'a>,
    pub prune: bool,
    pub shutdown: watch::Receiver<bool>,
}

/// Run one pass and report on it.
///
/// Validation, cycle, fetch and connection failures are recorded in the
/// report as a failed precondition; nothing is applied after them and a
/// script sink is not flushed. The backend handle is released on every
/// path. A failed release is recorded in the report alongside whatever was
/// already applied.
pub async fn run_pass(ctx: PassContext<'_>) -> Result<PassReport> {
    let pass_id = PassId::new();
    let mut report = PassReport::new(pass_id, ctx.backend.mode());
    info!(pass_id = %pass_id, mode = %report.mode, "Starting pass");

    let handle = match ctx.backend.acquire().await {
        Ok(handle) => handle,
        Err(err) => {
            error!(pass_id = %pass_id, error = %err, "Backend unavailable");
            report.fail(&err);
            return Ok(report.finish());
        }
    };

    let outcome = reconcile_with(
        &handle,
        &ctx.request,
        ctx.provider,
        ctx.renderer,
        ctx.prune,
        &ctx.shutdown,
        &mut report,
    )
    .await;
    let released = match &outcome {
        Ok(()) => handle.release().await,
        Err(err) => {
            error!(pass_id = %pass_id, error = %err, "Pass stopped before reconciling");
            report.fail(err);
            handle.abandon().await
        }
    };
    if let Err(err) = &released {
        warn!(pass_id = %pass_id, error = %err, "Failed to release backend handle");
        report.release_failed(err);
    }

    let report = report.finish();
    info!(
        pass_id = %pass_id,
        status = %report.status,
        summary = %report.summary,
        "Pass finished"
    );
    Ok(report)
}

async fn reconcile_with(
    handle: &BackendHandle,
    request: &PlanRequest<'_>,
    provider: &dyn MetadataProvider,
    renderer: &dyn JobRenderer,
    prune: bool,
    shutdown: &watch::Receiver<bool>,
    report: &mut PassReport,
) -> Result<()> {
    let plan = plan_pass(request, provider, Some(renderer)).await?;
    report.order = plan.order.order().to_vec();
    report.warnings.extend(plan.metadata.warnings.iter().cloned());

    let policy = &request.build_file.farm;
    let inventory = match handle.reader() {
        Some(session) => load_inventory(session, &plan.namer, policy.backend_concurrency).await?,
        None => {
            if prune {
                report.warnings.push(
                    "Prune ignored in offline script mode: the backend inventory is not read"
                        .to_string(),
                );
            }
            JobInventory::new()
        }
    };

    let reconciler = JobReconciler::new();
    let diff = reconciler
        .diff(&plan.graph, &inventory, &plan.namer, prune)?
        .narrowed(|name| plan.is_selected(name));
    if request.is_narrowed() {
        info!(
            selected = plan.selected.len(),
            planned = plan.graph.len(),
            "Applying a narrowed selection"
        );
    }
    if *shutdown.borrow() {
        warn!("Cancelled before applying changes");
    }

    let options = ReconcileOptions {
        prune,
        concurrency: policy.backend_concurrency,
    };
    let applied = reconciler.apply(diff, handle, options, shutdown).await;
    report.cancelled = applied.cancelled;
    report.outcomes = applied.outcomes;

    report.views = ViewManager::new(&plan.namer)
        .apply(handle, renderer, &plan.views, shutdown)
        .await;
    if report.views.iter().any(|v| v.result == ApplyResult::Skipped) {
        report.cancelled = true;
    }

    Ok(())
}
