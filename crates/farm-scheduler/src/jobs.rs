//! Job graph synthesis.
//!
//! Expands the resolved package order over the target matrix into named
//! job specifications, then adds the per-distribution aggregation jobs.

use crate::dag::ResolvedOrder;
use crate::matrix::TargetMatrix;
use crate::naming::JobNamer;
use farm_core::build_file::BuildFile;
use farm_core::error::{Error, Result};
use farm_core::job::{BuildPlan, JobKind, JobParams, JobRecord, JobScope, JobSpec, PlanEntry};
use farm_core::package::Package;
use farm_core::ports::JobRenderer;
use farm_core::target::{IdentifierKind, Target, check_identifier};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// The desired job set for one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobGraph {
    plan: BuildPlan,
    jobs: BTreeMap<String, JobSpec>,
}

impl JobGraph {
    pub fn plan(&self) -> &BuildPlan {
        &self.plan
    }

    pub fn get(&self, name: &str) -> Option<&JobSpec> {
        self.jobs.get(name)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobSpec> {
        self.jobs.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn into_jobs(self) -> Vec<JobSpec> {
        self.jobs.into_values().collect()
    }

    /// `(job, referenced name)` pairs whose reference is not in the graph.
    pub fn dangling_references(&self) -> Vec<(String, String)> {
        self.jobs
            .values()
            .flat_map(|spec| {
                spec.upstream
                    .iter()
                    .chain(spec.children.iter())
                    .filter(|name| !self.jobs.contains_key(*name))
                    .map(|name| (spec.name.clone(), name.clone()))
            })
            .collect()
    }

    /// Records handed to the templating collaborator, one per job.
    pub fn records(
        &self,
        build_file: &BuildFile,
        namer: &JobNamer,
        packages: &BTreeMap<String, Package>,
    ) -> Vec<JobRecord> {
        self.jobs
            .values()
            .map(|spec| JobRecord {
                name: spec.name.clone(),
                kind: spec.kind,
                scope: spec.scope.clone(),
                upstream: spec.upstream.iter().cloned().collect(),
                children: spec.children.iter().cloned().collect(),
                disabled: spec.disabled,
                params: job_params(spec, build_file, namer, packages),
            })
            .collect()
    }

    /// Render every job through `renderer`, filling in payloads.
    pub fn render(
        &mut self,
        renderer: &dyn JobRenderer,
        build_file: &BuildFile,
        namer: &JobNamer,
        packages: &BTreeMap<String, Package>,
    ) -> Result<()> {
        for record in self.records(build_file, namer, packages) {
            let payload = renderer.render_job(&record).map_err(|e| match e {
                Error::Render { .. } => e,
                other => Error::Render {
                    name: record.name.clone(),
                    reason: other.to_string(),
                },
            })?;
            if let Some(spec) = self.jobs.get_mut(&record.name) {
                spec.payload = Some(payload);
            }
        }
        Ok(())
    }
}

fn job_params(
    spec: &JobSpec,
    build_file: &BuildFile,
    namer: &JobNamer,
    packages: &BTreeMap<String, Package>,
) -> JobParams {
    let mut params = JobParams {
        distribution: build_file.distribution.clone(),
        build_name: build_file.build_name.clone(),
        notify_emails: build_file.notify.emails.clone(),
        import_job_name: namer.import(),
        ..Default::default()
    };

    let maintainers = |package: &str| -> Vec<String> {
        if !build_file.notify.maintainers {
            return Vec::new();
        }
        packages
            .get(package)
            .map(|p| p.maintainers.clone())
            .unwrap_or_default()
    };

    match spec.kind {
        JobKind::Binary => {
            let package = spec.package().unwrap_or_default();
            params.repository_url = Some(build_file.repository_url(package));
            params.priority = build_file.jenkins_binary_job_priority;
            params.node_label = Some(build_file.binary_node_label());
            params.timeout_minutes = build_file.jenkins_binary_job_timeout;
            params.maintainer_emails = maintainers(package);
            params.credential_id = build_file.upload_credential_id.clone();
            params.target_repository = build_file.target_repository.clone();
            params.append_timestamp = build_file.abi_incompatibility_assumed;
        }
        JobKind::Source => {
            let package = spec.package().unwrap_or_default();
            params.repository_url = Some(build_file.repository_url(package));
            params.maintainer_emails = maintainers(package);
            params.credential_id = build_file.upload_credential_id.clone();
        }
        JobKind::Import => {
            params.target_queue = build_file.target_queue.clone();
            params.append_timestamp = build_file.abi_incompatibility_assumed;
        }
        JobKind::SyncToTesting => {
            params.target_repository = build_file.target_repository.clone();
        }
        JobKind::SyncToMain => {}
    }

    params
}

/// Expands a resolved order into a [`JobGraph`].
pub struct JobGraphBuilder<'a> {
    build_file: &'a BuildFile,
    namer: &'a JobNamer,
}

impl<'a> JobGraphBuilder<'a> {
    pub fn new(build_file: &'a BuildFile, namer: &'a JobNamer) -> Self {
        Self { build_file, namer }
    }

    /// Build the desired job set.
    ///
    /// Every target is validated against the build file before any job is
    /// produced; an undeclared OS, code name or architecture fails the
    /// whole build.
    pub fn build(&self, order: &ResolvedOrder, matrix: &TargetMatrix) -> Result<JobGraph> {
        for target in matrix.targets() {
            target.check_identifiers()?;
            self.build_file.validate_target(target)?;
        }
        for package in order.order() {
            check_identifier(IdentifierKind::Package, package)?;
        }

        let mut plan = BuildPlan::default();
        let mut jobs: BTreeMap<String, JobSpec> = BTreeMap::new();

        for package in order.order() {
            let deps = order.dependencies(package).cloned().unwrap_or_default();
            for target in matrix.targets() {
                plan.entries.push(PlanEntry {
                    package: package.clone(),
                    target: target.clone(),
                });
                let spec = self.package_job(package, target, &deps);
                insert_unique(&mut jobs, spec)?;
            }
        }

        for spec in self.aggregate_jobs(matrix) {
            insert_unique(&mut jobs, spec)?;
        }

        let graph = JobGraph { plan, jobs };
        let dangling = graph.dangling_references();
        if let Some((job, reference)) = dangling.first() {
            return Err(Error::Config(format!(
                "job '{job}' references unknown job '{reference}'"
            )));
        }

        info!(
            packages = order.len(),
            targets = matrix.len(),
            jobs = graph.len(),
            "Synthesized job graph"
        );
        Ok(graph)
    }

    fn package_job(&self, package: &str, target: &Target, deps: &BTreeSet<String>) -> JobSpec {
        let scope = JobScope::Package {
            package: package.to_string(),
            target: target.clone(),
        };

        let mut spec = if target.is_source() {
            JobSpec::new(self.namer.source(package, target), JobKind::Source, scope)
        } else {
            let mut spec = JobSpec::new(self.namer.binary(package, target), JobKind::Binary, scope);
            spec.upstream = deps
                .iter()
                .map(|dep| self.namer.binary(dep, target))
                .collect();
            spec.children
                .insert(self.namer.sync_to_testing(&target.os_code_name, &target.arch));
            spec
        };
        spec.disabled = self.build_file.is_disabled(package);

        debug!(job = %spec.name, upstream = spec.upstream.len(), "Package job");
        spec
    }

    fn aggregate_jobs(&self, matrix: &TargetMatrix) -> Vec<JobSpec> {
        let import_name = self.namer.import();
        let mut import = JobSpec::new(import_name.clone(), JobKind::Import, JobScope::Distribution);

        let mut jobs = Vec::new();
        for (code, arch) in matrix.platforms() {
            let name = self.namer.sync_to_testing(&code, &arch);
            import.children.insert(name.clone());

            let mut sync = JobSpec::new(
                name,
                JobKind::SyncToTesting,
                JobScope::Platform {
                    os_code_name: code,
                    arch,
                },
            );
            sync.upstream.insert(import_name.clone());
            jobs.push(sync);
        }

        jobs.push(import);
        jobs.push(JobSpec::new(
            self.namer.sync_to_main(),
            JobKind::SyncToMain,
            JobScope::Distribution,
        ));
        jobs
    }
}

fn insert_unique(jobs: &mut BTreeMap<String, JobSpec>, spec: JobSpec) -> Result<()> {
    if let Some(existing) = jobs.get(&spec.name) {
        return Err(Error::Config(format!(
            "job name '{}' produced for both {:?} and {:?}",
            spec.name, existing.scope, spec.scope
        )));
    }
    jobs.insert(spec.name.clone(), spec);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::DependencyResolver;
    use crate::matrix::TargetFilter;
    use pretty_assertions::assert_eq;

    fn build_file(targets: &str) -> BuildFile {
        BuildFile::from_yaml(&format!(
            "distribution: kinetic\nnotify:\n  emails: [farm@example.org]\n  maintainers: true\ntargets:\n{targets}"
        ))
        .unwrap()
    }

    fn resolve(pkgs: Vec<Package>) -> (BTreeMap<String, Package>, ResolvedOrder) {
        let packages: BTreeMap<String, Package> =
            pkgs.into_iter().map(|p| (p.name.clone(), p)).collect();
        let order = DependencyResolver::new().resolve(&packages).unwrap();
        (packages, order)
    }

    #[test]
    fn test_single_target_example() {
        let build_file = build_file("  archlinux:\n    rosarch: [x86_64]\n");
        let namer = JobNamer::new("kinetic", "default").unwrap();
        let (_, order) = resolve(vec![
            Package::new("B").with_build_dependencies(["A"]),
            Package::new("A"),
        ]);
        let matrix = TargetMatrix::from_build_file(&build_file, &TargetFilter::all()).unwrap();

        let graph = JobGraphBuilder::new(&build_file, &namer)
            .build(&order, &matrix)
            .unwrap();

        let target = Target::new("archlinux", "rosarch", "x86_64");
        assert_eq!(order.order(), ["A", "B"]);
        let b = graph.get(&namer.binary("B", &target)).unwrap();
        assert_eq!(b.upstream, BTreeSet::from([namer.binary("A", &target)]));
        assert_eq!(
            b.children,
            BTreeSet::from([namer.sync_to_testing("rosarch", "x86_64")])
        );
        assert!(graph.get(&namer.binary("A", &target)).unwrap().upstream.is_empty());
        // 2 binary + import + 1 sync-to-testing + sync-to-main
        assert_eq!(graph.len(), 5);
        assert!(graph.dangling_references().is_empty());
    }

    #[test]
    fn test_no_cross_target_coupling() {
        let build_file = build_file("  archlinux:\n    rosarch: [x86_64, aarch64, source]\n");
        let namer = JobNamer::new("kinetic", "default").unwrap();
        let (_, order) = resolve(vec![
            Package::new("b").with_build_dependencies(["a"]),
            Package::new("a"),
        ]);
        let matrix = TargetMatrix::from_build_file(&build_file, &TargetFilter::all()).unwrap();
        let graph = JobGraphBuilder::new(&build_file, &namer)
            .build(&order, &matrix)
            .unwrap();

        for target in matrix.binary_targets() {
            let b = graph.get(&namer.binary("b", target)).unwrap();
            assert_eq!(b.upstream, BTreeSet::from([namer.binary("a", target)]));
        }
        for target in matrix.source_targets() {
            let b = graph.get(&namer.source("b", target)).unwrap();
            assert_eq!(b.kind, JobKind::Source);
            assert!(b.upstream.is_empty());
            assert!(b.children.is_empty());
        }
        assert_eq!(graph.plan().len(), 6);
        assert!(
            graph.plan().position("a", &matrix.targets()[0])
                < graph.plan().position("b", &matrix.targets()[0])
        );
    }

    #[test]
    fn test_aggregation_wiring() {
        let build_file =
            build_file("  archlinux:\n    rosarch: [x86_64, aarch64]\n  manjaro:\n    rosarch: [x86_64]\n");
        let namer = JobNamer::new("kinetic", "default").unwrap();
        let (_, order) = resolve(vec![Package::new("a")]);
        let matrix = TargetMatrix::from_build_file(&build_file, &TargetFilter::all()).unwrap();
        let graph = JobGraphBuilder::new(&build_file, &namer)
            .build(&order, &matrix)
            .unwrap();

        let count = |kind: JobKind| graph.jobs().filter(|j| j.kind == kind).count();
        assert_eq!(count(JobKind::Import), 1);
        assert_eq!(count(JobKind::SyncToMain), 1);
        // (rosarch, x86_64) is shared by both OSes.
        assert_eq!(count(JobKind::SyncToTesting), 2);
        assert_eq!(count(JobKind::Binary), 3);

        let import = graph.get(&namer.import()).unwrap();
        assert_eq!(
            import.children,
            BTreeSet::from([
                namer.sync_to_testing("rosarch", "aarch64"),
                namer.sync_to_testing("rosarch", "x86_64"),
            ])
        );
        let sync = graph.get(&namer.sync_to_testing("rosarch", "x86_64")).unwrap();
        assert_eq!(sync.upstream, BTreeSet::from([namer.import()]));
    }

    #[test]
    fn test_undeclared_target_is_a_precondition_failure() {
        let build_file = build_file("  archlinux:\n    rosarch: [x86_64]\n");
        let namer = JobNamer::new("kinetic", "default").unwrap();
        let (_, order) = resolve(vec![Package::new("a")]);
        let matrix = TargetMatrix::from_targets([
            Target::new("archlinux", "rosarch", "x86_64"),
            Target::new("windows", "rosarch", "x86_64"),
        ]);

        let err = JobGraphBuilder::new(&build_file, &namer)
            .build(&order, &matrix)
            .unwrap_err();
        match err {
            Error::Validation(v) => {
                assert_eq!(v.value, "windows");
                assert_eq!(v.choices, ["archlinux"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_disabled_packages_and_records() {
        let mut build_file = build_file("  archlinux:\n    rosarch: [x86_64]\n");
        build_file.disabled_packages = vec!["pcl".to_string()];
        build_file.target_queue = Some("incoming".to_string());
        let namer = JobNamer::new("kinetic", "default").unwrap();
        let mut pcl = Package::new("pcl");
        pcl.maintainers = vec!["maint@example.org".to_string()];
        let (packages, order) = resolve(vec![pcl, Package::new("poco")]);
        let matrix = TargetMatrix::from_build_file(&build_file, &TargetFilter::all()).unwrap();
        let graph = JobGraphBuilder::new(&build_file, &namer)
            .build(&order, &matrix)
            .unwrap();

        let target = Target::new("archlinux", "rosarch", "x86_64");
        assert!(graph.get(&namer.binary("pcl", &target)).unwrap().disabled);
        assert!(!graph.get(&namer.binary("poco", &target)).unwrap().disabled);

        let records = graph.records(&build_file, &namer, &packages);
        let pcl_record = records
            .iter()
            .find(|r| r.name == namer.binary("pcl", &target))
            .unwrap();
        assert_eq!(pcl_record.params.maintainer_emails, ["maint@example.org"]);
        assert_eq!(
            pcl_record.params.repository_url.as_deref(),
            Some("https://github.com/ros-archlinux/pcl")
        );
        assert_eq!(pcl_record.params.import_job_name, namer.import());

        let import = records.iter().find(|r| r.kind == JobKind::Import).unwrap();
        assert_eq!(import.params.target_queue.as_deref(), Some("incoming"));
    }

    struct NameRenderer;

    impl JobRenderer for NameRenderer {
        fn render_job(&self, record: &JobRecord) -> Result<String> {
            Ok(format!("<job>{}</job>", record.name))
        }

        fn render_view(&self, view: &farm_core::job::ViewSpec) -> Result<String> {
            Ok(view.name.clone())
        }
    }

    #[test]
    fn test_render_fills_payloads() {
        let build_file = build_file("  archlinux:\n    rosarch: [x86_64]\n");
        let namer = JobNamer::new("kinetic", "default").unwrap();
        let (packages, order) = resolve(vec![Package::new("a")]);
        let matrix = TargetMatrix::from_build_file(&build_file, &TargetFilter::all()).unwrap();
        let mut graph = JobGraphBuilder::new(&build_file, &namer)
            .build(&order, &matrix)
            .unwrap();

        graph.render(&NameRenderer, &build_file, &namer, &packages).unwrap();
        for job in graph.jobs() {
            assert_eq!(job.payload.as_deref(), Some(format!("<job>{}</job>", job.name).as_str()));
        }
    }
}
