//! Command handlers.

use crate::commands::{Selection, TargetArgs};
use crate::config::{CliConfig, OutputFormat};
use anyhow::{Context, Result};
use console::style;
use farm_core::build_file::{BuildFile, FetchFailurePolicy};
use farm_core::job::{JobSpec, ViewSpec};
use farm_core::ports::MetadataProvider;
use farm_jenkins::{GroovyScriptSink, JenkinsBackend, XmlJobRenderer};
use farm_pkgbuild::{DirectoryRecipeProvider, HttpRecipeProvider};
use farm_scheduler::{
    ApplyResult, BackendTarget, JobAction, JobNamer, PassContext, PassReport, PassStatus, PlanRequest,
    TargetFilter, TargetMatrix, ViewManager, plan_pass, run_pass,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

const RECIPE_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit status for a finished pass.
pub fn exit_status(status: PassStatus) -> u8 {
    match status {
        PassStatus::Succeeded => 0,
        PassStatus::PartiallyFailed => 1,
        PassStatus::FailedPrecondition => 2,
    }
}

fn load_build_file(path: &Path, selection: Option<&Selection>) -> Result<BuildFile> {
    let mut build_file = BuildFile::from_file(path)
        .with_context(|| format!("Failed to load build file {}", path.display()))?;
    if selection.is_some_and(|s| s.exclude_failed) {
        build_file.farm.on_fetch_failure = FetchFailurePolicy::Exclude;
    }
    Ok(build_file)
}

fn filter(targets: &TargetArgs) -> TargetFilter {
    TargetFilter {
        os_name: targets.os.clone(),
        os_code_name: targets.code.clone(),
        arch: targets.arch.clone(),
    }
}

fn request<'a>(build_file: &'a BuildFile, selection: &Selection) -> PlanRequest<'a> {
    PlanRequest {
        filter: filter(&selection.targets),
        packages: selection.packages.clone(),
        ..PlanRequest::new(build_file)
    }
}

fn provider(build_file: &BuildFile, selection: &Selection) -> Result<Box<dyn MetadataProvider>> {
    Ok(match &selection.recipes {
        Some(dir) => Box::new(DirectoryRecipeProvider::new(dir)),
        None => Box::new(HttpRecipeProvider::from_build_file(
            build_file,
            RECIPE_TIMEOUT,
        )?),
    })
}

fn print_structured<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        OutputFormat::Json | OutputFormat::Table => {
            println!("{}", serde_json::to_string_pretty(value)?)
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct PlanOutput<'a> {
    order: &'a [String],
    warnings: &'a [String],
    excluded: &'a BTreeMap<String, String>,
    jobs: Vec<&'a JobSpec>,
    views: &'a [ViewSpec],
}

/// Print the build order and the desired jobs without touching a backend.
pub async fn plan(
    config: &CliConfig,
    build_file_path: &Path,
    selection: Selection,
    output: Option<OutputFormat>,
) -> Result<ExitCode> {
    let build_file = load_build_file(build_file_path, Some(&selection))?;
    let provider = provider(&build_file, &selection)?;
    let plan = plan_pass(&request(&build_file, &selection), provider.as_ref(), None).await?;

    let format = output.unwrap_or(config.output_format);
    if format != OutputFormat::Table {
        print_structured(
            &PlanOutput {
                order: plan.order.order(),
                warnings: &plan.metadata.warnings,
                excluded: &plan.metadata.excluded,
                jobs: plan.selected_jobs().collect(),
                views: &plan.views,
            },
            format,
        )?;
        return Ok(ExitCode::SUCCESS);
    }

    for warning in &plan.metadata.warnings {
        println!("{} {}", style("!").yellow(), warning);
    }
    println!("{}", style("Build order").bold());
    for (i, package) in plan.order.order().iter().enumerate() {
        println!("  {:>3}. {}", i + 1, package);
    }
    println!();
    println!("{}", style("Jobs").bold());
    for job in plan.selected_jobs() {
        let disabled = if job.disabled {
            style(" (disabled)").dim().to_string()
        } else {
            String::new()
        };
        println!(
            "  {:<16} {}{}",
            style(job.kind.to_string()).cyan(),
            job.name,
            disabled
        );
        for upstream in &job.upstream {
            println!("      {} {}", style("after").dim(), upstream);
        }
    }
    println!();
    println!(
        "{} {} packages, {} targets, {} of {} jobs selected, {} views",
        style("✓").green(),
        plan.order.len(),
        plan.matrix.len(),
        plan.selected.len(),
        plan.graph.len(),
        plan.views.len()
    );
    Ok(ExitCode::SUCCESS)
}

/// Run a reconciliation pass.
pub async fn reconcile(
    config: &CliConfig,
    build_file_path: &Path,
    selection: Selection,
    dry_run: bool,
    prune: bool,
    script: Option<PathBuf>,
    output: Option<OutputFormat>,
) -> Result<ExitCode> {
    let build_file = load_build_file(build_file_path, Some(&selection))?;
    let provider = provider(&build_file, &selection)?;
    let renderer = XmlJobRenderer::new();
    let jenkins = JenkinsBackend::new(config.jenkins());

    let backend = match &script {
        Some(dir) => BackendTarget::Offline(Box::new(GroovyScriptSink::create(dir).await?)),
        None => BackendTarget::Live {
            backend: &jenkins,
            dry_run,
        },
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing in-flight operations");
            let _ = shutdown_tx.send(true);
        }
    });

    let report = run_pass(PassContext {
        request: request(&build_file, &selection),
        provider: provider.as_ref(),
        renderer: &renderer,
        backend,
        prune,
        shutdown: shutdown_rx,
    })
    .await?;

    let format = output.unwrap_or(config.output_format);
    if format == OutputFormat::Table {
        print_report(&report);
        if let Some(dir) = &script {
            println!(
                "  Script: {}",
                dir.join(farm_jenkins::script::SCRIPT_FILE).display()
            );
        }
    } else {
        print_structured(&report, format)?;
    }
    Ok(ExitCode::from(exit_status(report.status)))
}

fn print_report(report: &PassReport) {
    let status = match report.status {
        PassStatus::Succeeded => style(report.status.to_string()).green(),
        PassStatus::PartiallyFailed => style(report.status.to_string()).yellow(),
        PassStatus::FailedPrecondition => style(report.status.to_string()).red(),
    };
    println!(
        "Pass {} ({}): {}",
        style(report.pass_id).bold(),
        report.mode,
        status
    );
    if let Some(failure) = &report.failure {
        println!("  {} {}", style("✗").red(), failure);
    }
    for warning in &report.warnings {
        println!("  {} {}", style("!").yellow(), warning);
    }

    for outcome in &report.outcomes {
        let marker = match outcome.result {
            ApplyResult::Applied => style("✓").green(),
            ApplyResult::Planned => style("~").cyan(),
            ApplyResult::Noop => continue,
            ApplyResult::Skipped => style("-").dim(),
            ApplyResult::Failed => style("✗").red(),
        };
        print!("  {} {:<7} {}", marker, outcome.action, outcome.name);
        match &outcome.error {
            Some(err) => println!(": {}", style(err).red()),
            None => println!(),
        }
    }
    for outcome in &report.outcomes {
        if outcome.action == JobAction::Stale {
            println!("  {} stale   {}", style("!").yellow(), outcome.name);
        }
    }
    for view in report.views.iter().filter(|v| v.result == ApplyResult::Failed) {
        if let Some(err) = &view.error {
            println!("  {} view {}: {}", style("✗").red(), view.name, style(err).red());
        }
    }

    println!("  {}", report.summary);
    if report.cancelled {
        println!("  {} Cancelled before all changes were applied", style("!").yellow());
    }
}

#[derive(Serialize)]
struct ViewRow<'a> {
    name: &'a str,
    include_regex: &'a str,
}

/// Print the views the target matrix produces.
pub fn views(
    config: &CliConfig,
    build_file_path: &Path,
    targets: TargetArgs,
    output: Option<OutputFormat>,
) -> Result<ExitCode> {
    let build_file = load_build_file(build_file_path, None)?;
    let namer = JobNamer::new(&build_file.distribution, &build_file.build_name)?;
    let matrix = TargetMatrix::from_build_file(&build_file, &filter(&targets))?;
    let views = ViewManager::new(&namer).derive(&matrix);

    let format = output.unwrap_or(config.output_format);
    if format == OutputFormat::Table {
        for view in &views {
            println!("{:<40} {}", style(&view.name).bold(), view.include_regex);
        }
    } else {
        let rows: Vec<ViewRow<'_>> = views
            .iter()
            .map(|v| ViewRow {
                name: &v.name,
                include_regex: &v.include_regex,
            })
            .collect();
        print_structured(&rows, format)?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Validate a build file.
pub fn validate(build_file_path: &Path) -> Result<ExitCode> {
    let build_file = load_build_file(build_file_path, None)?;
    let namer = JobNamer::new(&build_file.distribution, &build_file.build_name)?;
    let targets = build_file.targets();

    println!(
        "{} Build file for \"{}\" is valid",
        style("✓").green(),
        namer.prefix()
    );
    println!("  Targets: {}", targets.len());
    for target in &targets {
        println!("    - {target}");
    }
    println!("  Packages: {}", build_file.package_whitelist.len());
    if !build_file.disabled_packages.is_empty() {
        println!("  Disabled: {}", build_file.disabled_packages.join(", "));
    }
    Ok(ExitCode::SUCCESS)
}

/// Print the build file JSON schema.
pub fn schema() -> Result<ExitCode> {
    let schema = schemars::schema_for!(BuildFile);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(ExitCode::SUCCESS)
}

/// Show configuration.
pub fn show_config(config: &CliConfig, path: Option<&Path>) -> Result<ExitCode> {
    println!("Current configuration:");
    println!("  jenkins_url: {}", config.jenkins_url);
    println!("  user: {}", config.user.as_deref().unwrap_or("(not set)"));
    println!(
        "  token: {}",
        if config.token.is_some() {
            "***"
        } else {
            "(not set)"
        }
    );
    println!("  timeout_secs: {}", config.timeout_secs);
    println!("  output_format: {:?}", config.output_format);

    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => CliConfig::config_path().ok(),
    };
    if let Some(path) = path {
        println!("\nConfig file: {}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

/// Set configuration.
pub fn set_config(path: Option<&Path>, key: &str, value: &str) -> Result<ExitCode> {
    let mut config = CliConfig::load(path)?;
    config.set(key, value)?;
    config.save(path)?;

    let shown = if key == "token" { "***" } else { value };
    println!("{} Set {} = {}", style("✓").green(), key, shown);
    Ok(ExitCode::SUCCESS)
}
