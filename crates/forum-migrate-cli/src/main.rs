//! forum-migrate CLI - Flarum to Discourse forum migration.

use clap::{Parser, Subcommand};
use forum_migrate::{
    health_check, Config, ContentTransformer, MigrateError, MigrationResult, Migrator, Pass,
    UserDirectory,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "forum-migrate")]
#[command(about = "Flarum to Discourse forum migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file (optional; environment variables override it)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Seconds to wait for the current page after a shutdown signal (default: 60)
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migration. Safe to repeat: imported records are skipped.
    Run {
        /// Write to an in-memory target instead of PostgreSQL
        #[arg(long)]
        dry_run: bool,

        /// Override the page size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Run only this pass (repeatable): users, categories, posts, likes,
        /// reactions, groups, close
        #[arg(long = "pass", value_parser = parse_pass)]
        passes: Vec<Pass>,
    },

    /// Compare source counts with imported records
    Validate,

    /// Test database connections
    HealthCheck,

    /// Convert one Flarum post body to Markdown, without a database
    Transform {
        /// File holding the body [default: stdin]
        file: Option<PathBuf>,

        /// Username for mentions of unknown users
        #[arg(long, default_value = "guest")]
        guest: String,

        /// Known user for mention lookup, as `username` or `username=Display Name`
        /// (repeatable)
        #[arg(long = "user")]
        users: Vec<String>,
    },
}

fn parse_pass(s: &str) -> Result<Pass, String> {
    Pass::parse(s).map_err(|e| e.to_string())
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

    // Handle transform separately (no config, no logging on stdout)
    if let Commands::Transform { file, guest, users } = cli.command {
        return transform(file, &guest, &users).await;
    }

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    if dotenv::dotenv().is_ok() {
        info!("Loaded environment from .env");
    }
    let mut config = Config::load_with_env(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Transform { .. } => unreachable!(), // Handled above
        Commands::Run {
            dry_run,
            batch_size,
            passes,
        } => {
            if let Some(size) = batch_size {
                config.migration.batch_size = size;
            }
            if !passes.is_empty() {
                config.migration.passes = passes;
            }
            config.validate()?;

            // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
            let cancel_token = setup_signal_handler(cli.shutdown_timeout);

            let migrator = Migrator::connect(config, dry_run)
                .await?
                .with_cancel(cancel_token.clone())
                .with_progress(cli.progress);

            let (result, outcome) =
                run_until_shutdown(&migrator, &cancel_token, cli.shutdown_timeout).await?;

            // Report the passes that finished even when the run stopped early
            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                print_summary(&result, dry_run);
            }
            outcome?;
        }

        Commands::Validate => {
            let migrator = Migrator::connect(config, false).await?;
            let report = migrator.validate().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Validation Results:");
                for kind in &report.kinds {
                    println!(
                        "  {} {}: {} source, {} imported",
                        if kind.is_complete() { "✓" } else { "✗" },
                        kind.kind,
                        kind.source,
                        kind.mapped
                    );
                }
            }

            if !report.is_complete() {
                return Err(MigrateError::Validation(
                    "some source records are not imported".to_string(),
                ));
            }
        }

        Commands::HealthCheck => {
            let result = health_check(&config).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (Flarum MySQL): {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target (PostgreSQL): {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::Config("Health check failed".to_string()));
            }
        }
    }

    Ok(())
}

/// Run the migration. Once a shutdown signal arrives the current page gets
/// `shutdown_timeout` seconds to finish before the run is abandoned, in which
/// case there is nothing to report.
async fn run_until_shutdown(
    migrator: &Migrator,
    cancel_token: &CancellationToken,
    shutdown_timeout: u64,
) -> Result<(MigrationResult, Result<(), MigrateError>), MigrateError> {
    let run = migrator.run_with_report();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result,
        _ = async {
            cancel_token.cancelled().await;
            tokio::time::sleep(Duration::from_secs(shutdown_timeout)).await;
        } => {
            warn!("Shutdown timeout of {}s reached, abandoning the run", shutdown_timeout);
            Err(MigrateError::Cancelled)
        }
    }
}

fn print_summary(result: &MigrationResult, dry_run: bool) {
    let run_kind = if dry_run { "Dry run" } else { "Migration" };
    println!("\n{} {}!", run_kind, result.status);
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    for pass in &result.passes {
        println!(
            "  {:<11} {} created, {} updated, {} already imported, {} skipped, {} failed",
            format!("{}:", pass.pass),
            pass.created,
            pass.updated,
            pass.already_imported,
            pass.skipped,
            pass.failed
        );
    }
    if result.records_failed > 0 {
        println!("  Failed records: {}", result.records_failed);
    }
    if let Some(ref err) = result.error {
        println!("  Stopped: {}", err);
    }
}

async fn transform(
    file: Option<PathBuf>,
    guest: &str,
    users: &[String],
) -> Result<(), MigrateError> {
    let raw = match file {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => {
            let mut raw = String::new();
            tokio::io::stdin().read_to_string(&mut raw).await?;
            raw
        }
    };

    let mut directory = UserDirectory::new();
    for user in users {
        match user.split_once('=') {
            Some((username, name)) => directory.insert(username.trim(), Some(name.trim())),
            None => directory.insert(user.trim(), None),
        }
    }

    let markdown = ContentTransformer::new(&directory, guest).transform(Some(&raw));
    let mut stdout = tokio::io::stdout();
    stdout.write_all(markdown.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("Invalid verbosity '{}'", other)),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("Invalid log format '{}'", other)),
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler(shutdown_timeout: u64) -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to set up {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!(
                "\nReceived {}. Stopping after the current page (timeout: {}s)...",
                name, shutdown_timeout
            );
            token.cancel();
        });
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler(shutdown_timeout: u64) -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to set up Ctrl-C handler: {}", e);
            return;
        }
        eprintln!(
            "\nReceived Ctrl-C. Stopping after the current page (timeout: {}s)...",
            shutdown_timeout
        );
        token.cancel();
    });

    cancel_token
}
