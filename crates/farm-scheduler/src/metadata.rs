//! Package metadata collection.
//!
//! Recipes are fetched with bounded parallelism; graph construction only
//! starts once every fetch has finished, successfully or not.

use farm_core::build_file::FetchFailurePolicy;
use farm_core::error::{Error, Result};
use farm_core::package::Package;
use farm_core::ports::MetadataProvider;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Packages whose metadata was collected, plus what was dropped on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataSet {
    pub packages: BTreeMap<String, Package>,
    /// Package name -> failure reason, for packages dropped under
    /// [`FetchFailurePolicy::Exclude`].
    pub excluded: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

/// Fetch metadata for every name in `names`.
///
/// Under [`FetchFailurePolicy::Abort`] the first failure (by package name)
/// fails the call after all fetches have settled. Under
/// [`FetchFailurePolicy::Exclude`] failed packages are dropped, and every
/// collected package that depends on one gets a warning about its missing
/// upstream link.
pub async fn collect_metadata(
    provider: &dyn MetadataProvider,
    names: &[String],
    policy: FetchFailurePolicy,
    concurrency: usize,
) -> Result<MetadataSet> {
    let results: Vec<(String, Result<Package>)> = stream::iter(names.iter().cloned())
        .map(|name| async move {
            let result = provider.fetch(&name).await;
            (name, result)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut set = MetadataSet::default();
    let mut failures: BTreeMap<String, Error> = BTreeMap::new();

    for (name, result) in results {
        match result {
            Ok(mut package) => {
                package.name = name.clone();
                set.packages.insert(name, package);
            }
            Err(err) => {
                warn!(package = %name, error = %err, "Failed to fetch package metadata");
                failures.insert(name, err);
            }
        }
    }

    if policy == FetchFailurePolicy::Abort {
        if let Some((name, err)) = failures.into_iter().next() {
            return Err(match err {
                Error::Fetch { .. } => err,
                other => Error::fetch(name, other),
            });
        }
        info!(packages = set.packages.len(), "Collected package metadata");
        return Ok(set);
    }

    for (name, err) in failures {
        let reason = match err {
            Error::Fetch { reason, .. } => reason,
            other => other.to_string(),
        };
        set.warnings
            .push(format!("Excluded package '{name}': {reason}"));
        set.excluded.insert(name, reason);
    }

    for package in set.packages.values() {
        for dep in package.all_dependencies() {
            if set.excluded.contains_key(dep) {
                let warning = format!(
                    "Package '{}' depends on excluded package '{dep}'; its upstream link is omitted",
                    package.name
                );
                warn!(package = %package.name, dependency = %dep, "Missing upstream link");
                set.warnings.push(warning);
            }
        }
    }

    info!(
        packages = set.packages.len(),
        excluded = set.excluded.len(),
        "Collected package metadata"
    );
    Ok(set)
}
