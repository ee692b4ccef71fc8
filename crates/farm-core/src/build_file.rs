//! Build file: the declared target matrix plus naming and notification
//! parameters for one release build of a distribution.

use crate::error::{Error, Result, ValidationError};
use crate::target::{IdentifierKind, SOURCE_ARCH, Target, check_identifier};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// `os_name -> os_code_name -> [arch]`
pub type TargetTable = BTreeMap<String, BTreeMap<String, Vec<String>>>;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BuildFile {
    /// Distribution the jobs are generated for (e.g. "kinetic").
    pub distribution: String,
    /// Release build name; "default" is omitted from job names.
    #[serde(default = "default_build_name")]
    pub build_name: String,
    pub targets: TargetTable,
    /// Packages the farm builds. Dependencies outside this set are ignored.
    #[serde(default)]
    pub package_whitelist: Vec<String>,
    /// Packages whose jobs are generated disabled.
    #[serde(default)]
    pub disabled_packages: Vec<String>,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub jenkins_binary_job_priority: Option<u32>,
    #[serde(default)]
    pub jenkins_binary_job_label: Option<String>,
    #[serde(default)]
    pub jenkins_binary_job_timeout: Option<u32>,
    #[serde(default)]
    pub upload_credential_id: Option<String>,
    #[serde(default)]
    pub target_repository: Option<String>,
    #[serde(default)]
    pub target_queue: Option<String>,
    #[serde(default)]
    pub abi_incompatibility_assumed: bool,
    /// URL of a package's build-recipe; `{package}` is substituted.
    #[serde(default = "default_recipe_url_template")]
    pub recipe_url_template: String,
    /// URL of a package's source repository; `{package}` is substituted.
    #[serde(default = "default_repository_url_template")]
    pub repository_url_template: String,
    #[serde(default)]
    pub farm: FarmPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct NotifyConfig {
    #[serde(default)]
    pub emails: Vec<String>,
    /// Also notify the maintainers listed in each build-recipe.
    #[serde(default)]
    pub maintainers: bool,
}

/// Knobs controlling how a pass talks to its collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FarmPolicy {
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default = "default_backend_concurrency")]
    pub backend_concurrency: usize,
    #[serde(default)]
    pub on_fetch_failure: FetchFailurePolicy,
}

impl Default for FarmPolicy {
    fn default() -> Self {
        Self {
            fetch_concurrency: default_fetch_concurrency(),
            backend_concurrency: default_backend_concurrency(),
            on_fetch_failure: FetchFailurePolicy::default(),
        }
    }
}

/// What to do when a package's build-recipe cannot be fetched or parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailurePolicy {
    /// Fail the whole pass.
    #[default]
    Abort,
    /// Drop the package from the plan and report a warning.
    Exclude,
}

fn default_build_name() -> String {
    "default".to_string()
}

fn default_recipe_url_template() -> String {
    "https://raw.githubusercontent.com/ros-archlinux/{package}/rosarch/PKGBUILD".to_string()
}

fn default_repository_url_template() -> String {
    "https://github.com/ros-archlinux/{package}".to_string()
}

fn default_fetch_concurrency() -> usize {
    8
}

fn default_backend_concurrency() -> usize {
    4
}

impl BuildFile {
    /// Load a build file from YAML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let build_file: BuildFile = serde_yaml::from_str(contents)?;
        build_file.validate()?;
        Ok(build_file)
    }

    /// Structural checks that do not depend on the requested targets.
    pub fn validate(&self) -> Result<()> {
        check_identifier(IdentifierKind::Distribution, &self.distribution)?;
        check_identifier(IdentifierKind::BuildName, &self.build_name)?;

        if self.targets.values().all(|codes| codes.values().all(Vec::is_empty)) {
            return Err(Error::Config(
                "build file declares no targets".to_string(),
            ));
        }
        for target in self.targets() {
            target.check_identifiers()?;
        }
        for name in &self.package_whitelist {
            check_identifier(IdentifierKind::Package, name)?;
        }
        for (key, template) in [
            ("recipe_url_template", &self.recipe_url_template),
            ("repository_url_template", &self.repository_url_template),
        ] {
            if !template.contains("{package}") {
                return Err(Error::Config(format!(
                    "{key} must contain the {{package}} placeholder"
                )));
            }
        }
        if self.farm.fetch_concurrency == 0 || self.farm.backend_concurrency == 0 {
            return Err(Error::Config("concurrency limits must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Check that `os_name` and `os_code_name` are declared.
    pub fn validate_platform(&self, os_name: &str, os_code_name: &str) -> Result<()> {
        let codes = self.targets.get(os_name).ok_or_else(|| {
            ValidationError::unknown("OS name", os_name, self.targets.keys().cloned())
        })?;
        if !codes.contains_key(os_code_name) {
            return Err(
                ValidationError::unknown("OS code name", os_code_name, codes.keys().cloned())
                    .into(),
            );
        }
        Ok(())
    }

    /// Check that a full target is declared, including its architecture.
    pub fn validate_target(&self, target: &Target) -> Result<()> {
        self.validate_platform(&target.os_name, &target.os_code_name)?;
        let arches = &self.targets[&target.os_name][&target.os_code_name];
        if !arches.iter().any(|arch| arch == &target.arch) {
            return Err(
                ValidationError::unknown("architecture", &target.arch, arches.iter().cloned())
                    .into(),
            );
        }
        Ok(())
    }

    /// Every declared target, in `(os, code name, arch)` order.
    pub fn targets(&self) -> Vec<Target> {
        let mut targets: Vec<Target> = self
            .targets
            .iter()
            .flat_map(|(os_name, codes)| {
                codes.iter().flat_map(move |(code, arches)| {
                    arches.iter().map(move |arch| Target::new(os_name, code, arch))
                })
            })
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }

    /// Whether any declared target produces source jobs.
    pub fn has_source_targets(&self) -> bool {
        self.targets().iter().any(|t| t.arch == SOURCE_ARCH)
    }

    pub fn is_disabled(&self, package: &str) -> bool {
        self.disabled_packages.iter().any(|p| p == package)
    }

    pub fn recipe_url(&self, package: &str) -> String {
        self.recipe_url_template.replace("{package}", package)
    }

    pub fn repository_url(&self, package: &str) -> String {
        self.repository_url_template.replace("{package}", package)
    }

    /// Node label for binary jobs, falling back to a per-build default.
    pub fn binary_node_label(&self) -> String {
        self.jenkins_binary_job_label.clone().unwrap_or_else(|| {
            format!("{}_binarydeb_{}", self.distribution, self.build_name)
        })
    }
}
