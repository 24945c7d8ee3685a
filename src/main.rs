//! minicache - artifact cache CLI
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use minicache::cli::{Cli, Commands, OutputFormat};
use minicache::config::{Config, ConfigManager};
use minicache::env;
use minicache::error::{CacheError, CacheResult};
use minicache::progress::{self, EventEmitter, OutputMode};
use minicache::ui::{self, UiContext};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    progress::set_output_mode(match cli.output {
        OutputFormat::Text => OutputMode::Text,
        OutputFormat::Json => OutputMode::Json,
    });

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> CacheResult<()> {
    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_tracing(cli.verbose, &config);
    ui::init_theme();

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match cli.command {
        Commands::Fetch(args) => minicache::cli::commands::fetch(args, &config, &cancel).await,
        Commands::Path(args) => minicache::cli::commands::path(args, &config).await,
        Commands::Verify(args) => minicache::cli::commands::verify(args, &config, &cancel).await,
        Commands::Clean(args) => minicache::cli::commands::clean(args, &config).await,
        Commands::Config(args) => {
            minicache::cli::commands::config(args, &config, &config_manager).await
        }
    }
}

/// Initialize logging: 0 = warn, 1 = info, 2+ = debug. Logs go to stderr
/// so stdout stays clean for paths and JSON events.
fn init_tracing(verbose: u8, config: &Config) {
    let filter = match verbose {
        0 => EnvFilter::new("minicache=warn"),
        1 => EnvFilter::new("minicache=info"),
        _ => EnvFilter::new("minicache=debug"),
    };
    let spans = if env::profiling_enabled() {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(spans)
        .with_writer(std::io::stderr)
        .with_target(false);

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}

/// Ctrl-C trips the token; partial downloads stay on disk for resume.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted, cancelling downloads");
                cancel.cancel();
            }
            Err(e) => debug!("Cannot listen for Ctrl-C: {}", e),
        }
    });
}

fn report_error(e: &CacheError) {
    match progress::output_mode() {
        OutputMode::Json => {
            EventEmitter::stdout().error(e.kind().as_str(), e.exit_code(), &e.to_string())
        }
        OutputMode::Text => {
            if let CacheError::NoSourceAvailable { failures, .. } = e {
                for failure in failures {
                    debug!("Attempt failed: {}", failure);
                }
            }
            ui::error_line(&UiContext::detect(), &e.to_string(), e.hint());
        }
    }
}
