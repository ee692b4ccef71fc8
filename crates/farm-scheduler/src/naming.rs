//! Deterministic job and view names.
//!
//! Layout, with `R` the release prefix (`{distribution}` or
//! `{distribution}_{build}` for non-default builds):
//!
//! ```text
//! binary view    R-bin_{os}_{code}_{arch}
//! source view    R-src_{os}_{code}
//! binary job     {binary view}__{package}__{os}_{code}_{arch}__binary
//! source job     {source view}__{package}__{os}_{code}__source
//! import         R__import-package
//! sync testing   R__sync-packages-to-testing__{code}_{arch}
//! sync main      R__sync-packages-to-main
//! ```
//!
//! Distribution, build, OS and code names carry no underscore and no field
//! carries a double underscore, so every name parses back to exactly one
//! `(distribution, build, package, target, kind)` tuple.

use farm_core::error::Result;
use farm_core::job::JobKind;
use farm_core::target::{IdentifierKind, Target, check_identifier};

const DEFAULT_BUILD_NAME: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNamer {
    distribution: String,
    build_name: String,
    prefix: String,
}

impl JobNamer {
    pub fn new(distribution: impl Into<String>, build_name: impl Into<String>) -> Result<Self> {
        let distribution = distribution.into();
        let build_name = build_name.into();
        check_identifier(IdentifierKind::Distribution, &distribution)?;
        check_identifier(IdentifierKind::BuildName, &build_name)?;

        let prefix = if build_name == DEFAULT_BUILD_NAME {
            distribution.clone()
        } else {
            format!("{distribution}_{build_name}")
        };

        Ok(Self {
            distribution,
            build_name,
            prefix,
        })
    }

    pub fn distribution(&self) -> &str {
        &self.distribution
    }

    pub fn build_name(&self) -> &str {
        &self.build_name
    }

    /// Release prefix shared by every job this namer produces.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// View grouping the jobs of `target`.
    pub fn view(&self, target: &Target) -> String {
        if target.is_source() {
            format!("{}-src_{}_{}", self.prefix, target.os_name, target.os_code_name)
        } else {
            format!(
                "{}-bin_{}_{}_{}",
                self.prefix, target.os_name, target.os_code_name, target.arch
            )
        }
    }

    pub fn binary(&self, package: &str, target: &Target) -> String {
        format!(
            "{}__{}__{}_{}_{}__binary",
            self.view(target),
            package,
            target.os_name,
            target.os_code_name,
            target.arch
        )
    }

    pub fn source(&self, package: &str, target: &Target) -> String {
        format!(
            "{}__{}__{}_{}__source",
            self.view(target),
            package,
            target.os_name,
            target.os_code_name
        )
    }

    /// Name of a package job; binary or source depending on the target.
    pub fn package_job(&self, package: &str, target: &Target) -> String {
        if target.is_source() {
            self.source(package, target)
        } else {
            self.binary(package, target)
        }
    }

    pub fn import(&self) -> String {
        format!("{}__import-package", self.prefix)
    }

    pub fn sync_to_testing(&self, os_code_name: &str, arch: &str) -> String {
        format!(
            "{}__sync-packages-to-testing__{}_{}",
            self.prefix, os_code_name, arch
        )
    }

    pub fn sync_to_main(&self) -> String {
        format!("{}__sync-packages-to-main", self.prefix)
    }

    /// Regex matching the job names that belong in `view(target)`.
    pub fn view_pattern(&self, target: &Target) -> String {
        let view = regex::escape(&self.view(target));
        if target.is_source() {
            format!(
                "{}__.+__{}_{}__source",
                view,
                regex::escape(&target.os_name),
                regex::escape(&target.os_code_name)
            )
        } else {
            format!(
                "{}__.+__{}_{}_{}__binary",
                view,
                regex::escape(&target.os_name),
                regex::escape(&target.os_code_name),
                regex::escape(&target.arch)
            )
        }
    }

    /// Whether `name` lies in the namespace this namer owns.
    ///
    /// Jobs of other distributions or other builds of the same distribution
    /// are never claimed.
    pub fn owns(&self, name: &str) -> bool {
        let Some(rest) = name.strip_prefix(self.prefix.as_str()) else {
            return false;
        };
        let rest = rest
            .strip_prefix("-bin_")
            .or_else(|| rest.strip_prefix("-src_"))
            .or_else(|| rest.strip_prefix("__"));
        // Every field after a separator starts with a lowercase letter, which
        // keeps `kinetic` from claiming `kinetic-bin__import-package`.
        rest.and_then(|r| r.chars().next())
            .is_some_and(|c| c.is_ascii_lowercase())
    }

    /// Kind suggested by a job name's suffix; `None` for foreign names.
    pub fn kind_of(&self, name: &str) -> Option<JobKind> {
        if !self.owns(name) {
            return None;
        }
        if name.ends_with("__binary") {
            Some(JobKind::Binary)
        } else if name.ends_with("__source") {
            Some(JobKind::Source)
        } else if name == self.import() {
            Some(JobKind::Import)
        } else if name == self.sync_to_main() {
            Some(JobKind::SyncToMain)
        } else if name.starts_with(&format!("{}__sync-packages-to-testing__", self.prefix)) {
            Some(JobKind::SyncToTesting)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn x86() -> Target {
        Target::new("archlinux", "rosarch", "x86_64")
    }

    #[test]
    fn test_names_for_default_build() {
        let namer = JobNamer::new("kinetic", "default").unwrap();
        assert_eq!(namer.view(&x86()), "kinetic-bin_archlinux_rosarch_x86_64");
        assert_eq!(
            namer.binary("poco", &x86()),
            "kinetic-bin_archlinux_rosarch_x86_64__poco__archlinux_rosarch_x86_64__binary"
        );
        assert_eq!(
            namer.source("poco", &Target::new("archlinux", "rosarch", "source")),
            "kinetic-src_archlinux_rosarch__poco__archlinux_rosarch__source"
        );
        assert_eq!(namer.import(), "kinetic__import-package");
        assert_eq!(
            namer.sync_to_testing("rosarch", "x86_64"),
            "kinetic__sync-packages-to-testing__rosarch_x86_64"
        );
        assert_eq!(namer.sync_to_main(), "kinetic__sync-packages-to-main");
    }

    #[test]
    fn test_non_default_build_in_prefix() {
        let namer = JobNamer::new("kinetic", "arm").unwrap();
        assert_eq!(namer.import(), "kinetic_arm__import-package");
    }

    #[test]
    fn test_malformed_distribution_rejected() {
        assert!(JobNamer::new("kinetic_arm", "default").is_err());
        assert!(JobNamer::new("Kinetic", "default").is_err());
    }

    #[test]
    fn test_ownership_is_scoped_to_build() {
        let default = JobNamer::new("kinetic", "default").unwrap();
        let arm = JobNamer::new("kinetic", "arm").unwrap();

        let arm_job = arm.binary("poco", &x86());
        assert!(arm.owns(&arm_job));
        assert!(!default.owns(&arm_job));
        assert!(!arm.owns(&default.import()));
        assert!(!default.owns("kinetically-unrelated"));
        assert!(!default.owns("melodic__import-package"));

        let bin_distro = JobNamer::new("kinetic-bin", "default").unwrap();
        assert!(!default.owns(&bin_distro.import()));
        assert!(bin_distro.owns(&bin_distro.import()));
    }

    #[test]
    fn test_view_pattern_matches_only_its_target() {
        let namer = JobNamer::new("kinetic", "default").unwrap();
        let pattern = regex::Regex::new(&format!("^{}$", namer.view_pattern(&x86()))).unwrap();
        let arm = Target::new("archlinux", "rosarch", "aarch64");

        assert!(pattern.is_match(&namer.binary("poco", &x86())));
        assert!(!pattern.is_match(&namer.binary("poco", &arm)));
        assert!(!pattern.is_match(&namer.import()));
    }

    #[test]
    fn test_kind_of_round_trips() {
        let namer = JobNamer::new("kinetic", "default").unwrap();
        let src = Target::new("archlinux", "rosarch", "source");
        assert_eq!(namer.kind_of(&namer.binary("a", &x86())), Some(JobKind::Binary));
        assert_eq!(namer.kind_of(&namer.source("a", &src)), Some(JobKind::Source));
        assert_eq!(namer.kind_of(&namer.import()), Some(JobKind::Import));
        assert_eq!(
            namer.kind_of(&namer.sync_to_testing("rosarch", "x86_64")),
            Some(JobKind::SyncToTesting)
        );
        assert_eq!(namer.kind_of(&namer.sync_to_main()), Some(JobKind::SyncToMain));
    }

    #[test]
    fn test_names_are_injective_over_tricky_inputs() {
        let namers = [
            JobNamer::new("kinetic", "default").unwrap(),
            JobNamer::new("kinetic", "arm").unwrap(),
            JobNamer::new("kinetic-arm", "default").unwrap(),
            JobNamer::new("kin", "default").unwrap(),
        ];
        let packages = ["a", "a-b", "a.b", "a+b", "b", "x86-64", "archlinux-rosarch"];
        let targets = [
            Target::new("archlinux", "rosarch", "x86_64"),
            Target::new("archlinux", "rosarch", "x86"),
            Target::new("archlinux", "rosarch", "64"),
            Target::new("archlinux", "rosarch", "source"),
            Target::new("arch", "linux", "x86_64"),
            Target::new("archlinux", "ros", "arch_x86_64"),
        ];
        for package in packages {
            check_identifier(IdentifierKind::Package, package).unwrap();
        }
        for target in &targets {
            check_identifier(IdentifierKind::OsName, &target.os_name).unwrap();
            check_identifier(IdentifierKind::OsCodeName, &target.os_code_name).unwrap();
            check_identifier(IdentifierKind::Arch, &target.arch).unwrap();
        }

        // sync-to-testing is keyed on (code name, arch) and shared by every
        // target with that pair.
        let platforms: HashSet<(&str, &str)> = targets
            .iter()
            .map(|t| (t.os_code_name.as_str(), t.arch.as_str()))
            .collect();
        assert_eq!(platforms.len(), 6);

        let mut seen = HashSet::new();
        for namer in &namers {
            for target in &targets {
                for package in packages {
                    assert!(seen.insert(namer.package_job(package, target)));
                }
            }
            for (code, arch) in &platforms {
                assert!(seen.insert(namer.sync_to_testing(code, arch)));
            }
            assert!(seen.insert(namer.import()));
            assert!(seen.insert(namer.sync_to_main()));
        }
        assert_eq!(
            seen.len(),
            namers.len() * (targets.len() * packages.len() + platforms.len() + 2)
        );
    }
}
