//! Test fixtures for creating sample data.

use farm_core::build_file::BuildFile;
use farm_core::package::Package;

/// Factory for creating test build files.
pub struct BuildFileFixture;

impl BuildFileFixture {
    /// `kinetic` on `archlinux rosarch x86_64`.
    pub fn single_target(packages: &[&str]) -> BuildFile {
        Self::with_arches(packages, &["x86_64"])
    }

    /// `kinetic` on `archlinux rosarch` for every arch in `arches`.
    pub fn with_arches(packages: &[&str], arches: &[&str]) -> BuildFile {
        let yaml = format!(
            "distribution: kinetic\n\
             targets:\n  archlinux:\n    rosarch: [{}]\n\
             package_whitelist: [{}]\n\
             notify:\n  emails: [farm@example.org]\n\
             target_repository: repo@example.org:/srv/repo\n",
            arches.join(", "),
            packages.join(", ")
        );
        match BuildFile::from_yaml(&yaml) {
            Ok(build_file) => build_file,
            Err(err) => panic!("fixture build file is invalid: {err}"),
        }
    }
}

/// A package whose run dependencies are `deps`.
pub fn pkg(name: &str, deps: &[&str]) -> Package {
    Package::new(name).with_run_dependencies(deps.iter().copied())
}

/// A package with separate build and run dependencies.
pub fn pkg_with_build_deps(name: &str, build: &[&str], run: &[&str]) -> Package {
    Package::new(name)
        .with_build_dependencies(build.iter().copied())
        .with_run_dependencies(run.iter().copied())
}
