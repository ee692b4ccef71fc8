//! Package metadata as seen by the resolver.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A package and the raw dependency names its build-recipe declares.
///
/// Dependency names are unfiltered: they may name system packages that are
/// not built by the farm. The resolver drops those.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    #[serde(default)]
    pub build_dependencies: BTreeSet<String>,
    #[serde(default)]
    pub run_dependencies: BTreeSet<String>,
    /// Maintainer e-mail addresses, used for notifications when enabled.
    #[serde(default)]
    pub maintainers: Vec<String>,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            build_dependencies: BTreeSet::new(),
            run_dependencies: BTreeSet::new(),
            maintainers: Vec::new(),
        }
    }

    pub fn with_build_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.build_dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_run_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Build and run dependencies combined.
    pub fn all_dependencies(&self) -> impl Iterator<Item = &String> {
        self.build_dependencies.union(&self.run_dependencies)
    }
}
