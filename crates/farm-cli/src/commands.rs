//! CLI command definitions.

use crate::config::OutputFormat;
use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve the build order and print the desired jobs
    Plan {
        #[command(flatten)]
        selection: Selection,

        /// Output format (defaults to the configured one)
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },

    /// Bring the CI backend in line with the desired jobs
    Reconcile {
        #[command(flatten)]
        selection: Selection,

        /// Compute the changes without applying them
        #[arg(long, conflicts_with = "script")]
        dry_run: bool,

        /// Delete jobs this build owns that are no longer desired
        #[arg(long)]
        prune: bool,

        /// Write job documents and a Groovy script to DIR instead of
        /// contacting the backend
        #[arg(long, value_name = "DIR")]
        script: Option<PathBuf>,

        /// Output format (defaults to the configured one)
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },

    /// Print the dashboard views of the target matrix
    Views {
        #[command(flatten)]
        targets: TargetArgs,

        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },

    /// Validate the build file
    Validate,

    /// Print the JSON schema of the build file
    Schema,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Narrows the target matrix.
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// OS name, e.g. archlinux
    #[arg(long)]
    pub os: Option<String>,

    /// OS code name, e.g. rosarch
    #[arg(long)]
    pub code: Option<String>,

    /// Architecture, or "source"
    #[arg(long)]
    pub arch: Option<String>,
}

/// What a pass covers and where recipes come from.
#[derive(Args, Debug, Clone, Default)]
pub struct Selection {
    #[command(flatten)]
    pub targets: TargetArgs,

    /// Plan only these whitelisted packages (repeatable)
    #[arg(short, long = "package", value_name = "NAME")]
    pub packages: Vec<String>,

    /// Read recipes from DIR/<package>/PKGBUILD instead of over HTTP
    #[arg(long, value_name = "DIR")]
    pub recipes: Option<PathBuf>,

    /// Drop packages whose recipe cannot be fetched instead of failing
    #[arg(long)]
    pub exclude_failed: bool,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
