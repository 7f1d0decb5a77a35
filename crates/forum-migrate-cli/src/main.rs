//! forum-migrate CLI - resumable import of legacy forum databases.

use clap::{Parser, Subcommand};
use forum_migrate::{Config, ImportResult, MigrateError, Orchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "forum-migrate")]
#[command(about = "Resumable, idempotent import of legacy forum databases")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to state file for resume capability
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    /// Write row errors to this file as JSON lines
    #[arg(long)]
    error_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new import run
    Run {
        /// Dry run: map and count everything without creating anything
        #[arg(long)]
        dry_run: bool,

        /// Override rows per batch
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Resume a previously interrupted import run
    Resume {
        /// Override rows per batch
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Compare source row counts with imported mappings
    Counts,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            dry_run,
            batch_size,
        } => {
            if let Some(size) = batch_size {
                config.import.batch_size = size;
            }

            let mut orchestrator = if dry_run {
                Orchestrator::dry_run(config).await?
            } else {
                Orchestrator::new(config).await?
            };
            if let Some(ref path) = cli.state_file {
                orchestrator = orchestrator.with_state_file(path.clone());
            }
            if let Some(ref path) = cli.error_log {
                orchestrator = orchestrator.with_error_log(path.clone());
            }
            orchestrator = orchestrator.with_progress(cli.progress);

            let cancel_token = setup_signal_handler()?;
            let result = orchestrator.run(Some(cancel_token)).await?;

            let status_msg = if dry_run {
                "Dry run completed!"
            } else {
                "Import completed!"
            };
            print_result(&result, status_msg, cli.output_json)?;
        }

        Commands::Resume { batch_size } => {
            let state_file = cli.state_file.ok_or_else(|| {
                MigrateError::Config("--state-file is required for resume".to_string())
            })?;
            if !state_file.exists() {
                return Err(MigrateError::Config(format!(
                    "State file not found: {:?}",
                    state_file
                )));
            }

            if let Some(size) = batch_size {
                config.import.batch_size = size;
            }

            let mut orchestrator = Orchestrator::new(config)
                .await?
                .with_state_file(state_file)
                .resume()?
                .with_progress(cli.progress);
            if let Some(ref path) = cli.error_log {
                orchestrator = orchestrator.with_error_log(path.clone());
            }

            let cancel_token = setup_signal_handler()?;
            let result = orchestrator.run(Some(cancel_token)).await?;
            print_result(&result, "Import resumed and completed!", cli.output_json)?;
        }

        Commands::Counts => {
            let orchestrator = Orchestrator::new(config).await?;
            let counts = orchestrator.counts().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&counts)?);
            } else {
                println!("{:<18} {:>12} {:>12}", "kind", "source", "mapped");
                for count in &counts {
                    let source = match (count.enabled, count.source_rows) {
                        (false, _) => "disabled".to_string(),
                        (true, Some(rows)) => rows.to_string(),
                        (true, None) => "-".to_string(),
                    };
                    println!("{:<18} {:>12} {:>12}", count.kind.as_str(), source, count.mapped);
                }
            }
        }
    }

    Ok(())
}

fn print_result(result: &ImportResult, status_msg: &str, json: bool) -> Result<(), MigrateError> {
    if json {
        println!("{}", result.to_json()?);
        return Ok(());
    }

    println!("\n{}", status_msg);
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    for kind in &result.kinds {
        println!(
            "  {:<18} {} created, {} already imported, {} skipped, {} failed",
            kind.kind.as_str(), kind.created, kind.already_imported, kind.skipped, kind.failed
        );
    }
    println!("  Created: {}", result.rows_created);
    if result.rows_failed > 0 {
        println!(
            "  Failed rows: {} (they will be retried on the next run)",
            result.rows_failed
        );
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("unknown verbosity '{}'", other)),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format '{}'", other)),
    }

    Ok(())
}

/// Cancel the run on SIGINT (Ctrl-C) or SIGTERM. The import stops at the
/// next batch boundary.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!("\nReceived {}. Stopping after the current batch...", name);
        token.cancel();
    });

    Ok(cancel_token)
}

/// Windows only has Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current batch...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
