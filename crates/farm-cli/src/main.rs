//! Buildfarm CLI entrypoint.

use clap::{ArgAction, Parser};
use console::style;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod handlers;

use commands::{Commands, ConfigCommands};
use config::CliConfig;

#[derive(Parser)]
#[command(name = "farm")]
#[command(author, version, about = "Generates and reconciles buildfarm CI jobs", long_about = None)]
struct Cli {
    /// Build file describing the distribution and its targets
    #[arg(short = 'f', long, global = true, default_value = "build.yaml")]
    build_file: PathBuf,

    /// CLI configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

fn init_tracing(verbose: u8, json: bool) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config_path = cli.config.as_deref();
    let config = CliConfig::load(config_path)?;

    match cli.command {
        Commands::Plan { selection, output } => {
            handlers::plan(&config, &cli.build_file, selection, output).await
        }
        Commands::Reconcile {
            selection,
            dry_run,
            prune,
            script,
            output,
        } => {
            handlers::reconcile(
                &config,
                &cli.build_file,
                selection,
                dry_run,
                prune,
                script,
                output,
            )
            .await
        }
        Commands::Views { targets, output } => {
            handlers::views(&config, &cli.build_file, targets, output)
        }
        Commands::Validate => handlers::validate(&cli.build_file),
        Commands::Schema => handlers::schema(),
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config, config_path),
            ConfigCommands::Set { key, value } => handlers::set_config(config_path, &key, &value),
        },
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", style("✗").red(), err);
            ExitCode::from(2)
        }
    }
}
