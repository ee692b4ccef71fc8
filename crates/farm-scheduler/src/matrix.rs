//! Target matrix expansion.
//!
//! The matrix is the cross product `os name x code name x arch` declared by
//! the build file, optionally narrowed by an explicit filter.

use farm_core::build_file::BuildFile;
use farm_core::error::{Result, ValidationError};
use farm_core::target::Target;
use std::collections::BTreeSet;

/// Restricts the declared targets. Every set field must name a declared
/// value or expansion fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetFilter {
    pub os_name: Option<String>,
    pub os_code_name: Option<String>,
    pub arch: Option<String>,
}

impl TargetFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches(&self, target: &Target) -> bool {
        self.os_name.as_ref().is_none_or(|os| os == &target.os_name)
            && self
                .os_code_name
                .as_ref()
                .is_none_or(|code| code == &target.os_code_name)
            && self.arch.as_ref().is_none_or(|arch| arch == &target.arch)
    }

    /// Whether a sync-to-testing job for `(os_code_name, arch)` falls inside
    /// the filter.
    pub fn matches_platform(&self, os_code_name: &str, arch: &str) -> bool {
        self.os_code_name
            .as_ref()
            .is_none_or(|code| code == os_code_name)
            && self.arch.as_ref().is_none_or(|a| a == arch)
    }

    pub fn is_unrestricted(&self) -> bool {
        self.os_name.is_none() && self.os_code_name.is_none() && self.arch.is_none()
    }
}

/// The targets a pass plans for, in `(os, code name, arch)` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetMatrix {
    targets: Vec<Target>,
}

impl TargetMatrix {
    /// Expand the build file's targets through `filter`.
    pub fn from_build_file(build_file: &BuildFile, filter: &TargetFilter) -> Result<Self> {
        let declared = build_file.targets();

        if let Some(os_name) = &filter.os_name {
            let choices: BTreeSet<&str> = declared.iter().map(|t| t.os_name.as_str()).collect();
            if !choices.contains(os_name.as_str()) {
                return Err(ValidationError::unknown("OS name", os_name, choices).into());
            }
        }
        if let Some(code) = &filter.os_code_name {
            let choices: BTreeSet<&str> = declared
                .iter()
                .filter(|t| filter.os_name.as_ref().is_none_or(|os| os == &t.os_name))
                .map(|t| t.os_code_name.as_str())
                .collect();
            if !choices.contains(code.as_str()) {
                return Err(ValidationError::unknown("OS code name", code, choices).into());
            }
        }
        if let Some(arch) = &filter.arch {
            let choices: BTreeSet<&str> = declared
                .iter()
                .filter(|t| {
                    filter.os_name.as_ref().is_none_or(|os| os == &t.os_name)
                        && filter
                            .os_code_name
                            .as_ref()
                            .is_none_or(|code| code == &t.os_code_name)
                })
                .map(|t| t.arch.as_str())
                .collect();
            if !choices.contains(arch.as_str()) {
                return Err(ValidationError::unknown("architecture", arch, choices).into());
            }
        }

        let targets = declared.into_iter().filter(|t| filter.matches(t)).collect();
        Ok(Self { targets })
    }

    /// Build a matrix from explicit targets; used when callers bypass the
    /// build file. Targets are sorted and de-duplicated.
    pub fn from_targets(targets: impl IntoIterator<Item = Target>) -> Self {
        let targets: BTreeSet<Target> = targets.into_iter().collect();
        Self {
            targets: targets.into_iter().collect(),
        }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn binary_targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().filter(|t| !t.is_source())
    }

    pub fn source_targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().filter(|t| t.is_source())
    }

    /// Distinct `(code name, arch)` pairs of the binary targets.
    pub fn platforms(&self) -> BTreeSet<(String, String)> {
        self.binary_targets()
            .map(|t| (t.os_code_name.clone(), t.arch.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
