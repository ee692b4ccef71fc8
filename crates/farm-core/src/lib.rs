//! Buildfarm Core
//!
//! Domain types, traits, and error handling shared by the job generator.
//! This crate has minimal dependencies and defines the vocabulary used by
//! the resolver, the reconciler and the backend adapters.

pub mod build_file;
pub mod error;
pub mod ids;
pub mod inventory;
pub mod job;
pub mod package;
pub mod ports;
pub mod target;

pub use build_file::{BuildFile, FetchFailurePolicy};
pub use error::{BackendError, BackendErrorKind, CycleError, Error, Result, ValidationError};
pub use ids::*;
pub use inventory::JobInventory;
pub use job::{BuildPlan, JobKind, JobRecord, JobScope, JobSpec, PlanEntry, ViewSpec};
pub use package::Package;
pub use target::{SOURCE_ARCH, Target};
