//! Archiver CLI
//!
//! Runs one fetch cycle by default. Schedule it with cron or a systemd timer.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use archiver::{
    error::{AppError, Result},
    models::Config,
    pipeline,
    utils::signal,
};

/// Random-record archiver
#[derive(Parser, Debug)]
#[command(
    name = "archiver",
    version,
    about = "Archive random dictionary entries into daily and alphabetical views"
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, global = true, default_value = "archiver.toml")]
    config: PathBuf,

    /// Override the storage root directory
    #[arg(short, long, global = true)]
    storage_root: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Default)]
enum Command {
    /// Fetch, deduplicate and persist one batch (default)
    #[default]
    Run,

    /// Check that both views hold the same records
    Verify {
        /// Copy one-sided records into the missing view
        #[arg(long)]
        repair: bool,

        /// Print the report as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration
    Validate,

    /// Show archive summary
    Info,
}

/// Initialize logging. `RUST_LOG` wins over the configured level.
fn init_logging(level: &str, verbose: bool) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Read the config file if present, then apply env and CLI overrides.
fn resolve_config(cli: &Cli, file: Config) -> Result<Config> {
    let mut config = file;
    config.apply_env_with(|key| std::env::var(key).ok())?;
    if let Some(root) = &cli.storage_root {
        config.storage.root = root.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn execute(cli: Cli, config: Config) -> Result<()> {
    match cli.command.unwrap_or_default() {
        Command::Run => {
            let cancel = CancellationToken::new();
            signal::cancel_on_signal(cancel.clone());

            pipeline::run_archiver(&config, cancel).await?;
        }

        Command::Verify { repair, json } => {
            let report = pipeline::run_verify(&config, repair).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            if !report.is_consistent() {
                return Err(AppError::validation("archive views are inconsistent"));
            }
        }

        Command::Validate => {
            log::info!("✓ Config OK");
            log::info!("Endpoint: {}", config.api.endpoint);
            log::info!("Storage root: {}", config.storage.root.display());
        }

        Command::Info => {
            log::info!("Storage root: {}", config.storage.root.display());
            pipeline::run_info(&config).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = if cli.config.exists() {
        Config::load(&cli.config)
    } else {
        Ok(Config::default())
    };
    let level = loaded
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    init_logging(&level, cli.verbose);

    let config = match loaded.and_then(|file| resolve_config(&cli, file)) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration ({}): {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match execute(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{} error: {}", e.kind(), e);
            ExitCode::FAILURE
        }
    }
}
