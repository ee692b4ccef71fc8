//! CLI configuration management.

use anyhow::{Context, Result, anyhow, bail};
use farm_jenkins::JenkinsConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Jenkins base URL.
    #[serde(default = "default_jenkins_url")]
    pub jenkins_url: String,
    pub user: Option<String>,
    /// API token.
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Output format.
    #[serde(default)]
    pub output_format: OutputFormat,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            jenkins_url: default_jenkins_url(),
            user: None,
            token: None,
            timeout_secs: default_timeout_secs(),
            output_format: OutputFormat::default(),
        }
    }
}

fn default_jenkins_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

impl CliConfig {
    /// Load configuration from `path`, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };
        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid configuration in {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to `path`, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("org", "buildfarm", "farm")
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "jenkins_url" => self.jenkins_url = value.to_string(),
            "user" => self.user = Some(value.to_string()),
            "token" => self.token = Some(value.to_string()),
            "timeout_secs" => {
                self.timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid timeout: {value}"))?;
            }
            "output_format" => {
                self.output_format = match value {
                    "table" => OutputFormat::Table,
                    "json" => OutputFormat::Json,
                    "yaml" => OutputFormat::Yaml,
                    _ => bail!("Invalid output format: {value}"),
                };
            }
            _ => bail!("Unknown config key: {key}"),
        }
        Ok(())
    }

    pub fn jenkins(&self) -> JenkinsConfig {
        JenkinsConfig {
            user: self.user.clone(),
            token: self.token.clone(),
            timeout_secs: self.timeout_secs,
            ..JenkinsConfig::new(self.jenkins_url.clone())
        }
    }
}
