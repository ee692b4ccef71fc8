//! Dependency resolution, job graph synthesis and reconciliation for the
//! buildfarm.

pub mod dag;
pub mod jobs;
pub mod matrix;
pub mod metadata;
pub mod naming;
pub mod pass;
pub mod reconcile;
pub mod report;
pub mod views;

pub use dag::{DependencyResolver, ResolvedOrder};
pub use jobs::{JobGraph, JobGraphBuilder};
pub use matrix::{TargetFilter, TargetMatrix};
pub use metadata::{MetadataSet, collect_metadata};
pub use naming::JobNamer;
pub use pass::{BackendTarget, PassContext, PassPlan, PlanRequest, plan_pass, run_pass};
pub use reconcile::{JobReconciler, ReconcileOptions, ReconcilePlan, ReconcileReport};
pub use report::{ApplyResult, JobAction, JobOutcome, PassReport, PassStatus, ViewOutcome};
pub use views::ViewManager;
