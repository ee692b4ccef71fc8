//! [`MetadataProvider`] implementations backed by PKGBUILD recipes.

use crate::error::PkgbuildError;
use crate::parser::parse_pkgbuild;
use async_trait::async_trait;
use farm_core::build_file::BuildFile;
use farm_core::error::{Error, Result};
use farm_core::package::Package;
use farm_core::ports::MetadataProvider;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

const PACKAGE_PLACEHOLDER: &str = "{package}";

/// Fetches `PKGBUILD` files over HTTP.
pub struct HttpRecipeProvider {
    client: reqwest::Client,
    url_template: String,
}

impl HttpRecipeProvider {
    /// `url_template` must contain `{package}`.
    pub fn new(url_template: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url_template = url_template.into();
        if !url_template.contains(PACKAGE_PLACEHOLDER) {
            return Err(Error::Config(format!(
                "recipe URL template '{url_template}' has no {PACKAGE_PLACEHOLDER} placeholder"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("farm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url_template,
        })
    }

    pub fn from_build_file(build_file: &BuildFile, timeout: Duration) -> Result<Self> {
        Self::new(build_file.recipe_url_template.clone(), timeout)
    }

    pub fn recipe_url(&self, package: &str) -> String {
        self.url_template.replace(PACKAGE_PLACEHOLDER, package)
    }

    async fn fetch_text(&self, package: &str) -> std::result::Result<String, PkgbuildError> {
        let url = self.recipe_url(package);
        debug!(package = %package, url = %url, "Fetching recipe");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PkgbuildError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl MetadataProvider for HttpRecipeProvider {
    async fn fetch(&self, package: &str) -> Result<Package> {
        let text = self
            .fetch_text(package)
            .await
            .map_err(|e| Error::fetch(package, e))?;
        let recipe = parse_pkgbuild(&text).map_err(|e| Error::fetch(package, e))?;
        Ok(recipe.into_package(package))
    }
}

/// Reads `{root}/{package}/PKGBUILD` from a local checkout.
pub struct DirectoryRecipeProvider {
    root: PathBuf,
}

impl DirectoryRecipeProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn recipe_path(&self, package: &str) -> PathBuf {
        self.root.join(package).join("PKGBUILD")
    }
}

#[async_trait]
impl MetadataProvider for DirectoryRecipeProvider {
    async fn fetch(&self, package: &str) -> Result<Package> {
        let path = self.recipe_path(package);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::fetch(package, PkgbuildError::from(e)))?;
        let recipe = parse_pkgbuild(&text).map_err(|e| Error::fetch(package, e))?;
        Ok(recipe.into_package(package))
    }
}
