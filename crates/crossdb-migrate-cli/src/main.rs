//! crossdb-migrate CLI - cross-engine table replication between PostgreSQL and MySQL.

use clap::{Parser, Subcommand};
use crossdb_migrate::{
    health_check, Config, HealthReport, MigrateError, MigrationPlan, MigrationReport,
    Orchestrator, TableStatus, VerifyReport,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "crossdb-migrate")]
#[command(about = "Cross-engine table replication between PostgreSQL and MySQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "migrate.yaml", global = true)]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log format: text or json
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    /// Report format on stdout: text or json
    #[arg(long, default_value = "text")]
    output: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: plan, reconcile, copy, verify
    Run {
        /// Stop after planning and print the plan without copying data
        #[arg(long)]
        dry_run: bool,
    },

    /// Compare row counts between source and target without copying
    Verify,

    /// Test connectivity and catalog access on both sides
    HealthCheck,

    /// Write a commented starter configuration file
    Init {
        /// Output path [default: the --config path]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let json_output = cli.output == "json";

    // init needs no config file and no logging
    if let Commands::Init { output, force } = cli.command {
        let path = output.unwrap_or(cli.config);
        return init_config(&path, force);
    }

    setup_logging(cli.verbose, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!(path = %cli.config.display(), "configuration loaded");

    match cli.command {
        Commands::Init { .. } => unreachable!(), // handled above

        Commands::Run { dry_run } => {
            let orchestrator = Orchestrator::new(config).await?;

            if dry_run {
                let plan = orchestrator.plan_only().await;
                orchestrator.close().await;
                let plan = plan?;
                if json_output {
                    println!("{}", serde_json::to_string_pretty(&plan)?);
                } else {
                    render_plan(&plan);
                }
                return Ok(ExitCode::SUCCESS);
            }

            let cancel = spawn_signal_handler();
            let report = orchestrator.run(cancel).await;
            orchestrator.close().await;
            let report = report?;

            if json_output {
                println!("{}", report.to_json()?);
            } else {
                render_report(&report);
            }
            Ok(exit_for_report(&report))
        }

        Commands::Verify => {
            let orchestrator = Orchestrator::new(config).await?;
            let report = orchestrator.verify_only().await;
            orchestrator.close().await;
            let report = report?;

            if json_output {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                render_verification(&report);
            }
            if report.is_clean() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(2))
            }
        }

        Commands::HealthCheck => {
            let report = health_check(&config).await;

            if json_output {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                render_health(&report);
            }
            if report.healthy() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(3))
            }
        }
    }
}

fn init_config(path: &PathBuf, force: bool) -> Result<ExitCode, MigrateError> {
    if path.exists() && !force {
        return Err(MigrateError::Config(format!(
            "{} already exists; pass --force to overwrite",
            path.display()
        )));
    }
    std::fs::write(path, crossdb_migrate::config::STARTER_TEMPLATE)?;
    println!("Wrote starter configuration to {}", path.display());
    println!("Edit the connection profiles and table levels, then run:");
    println!("  crossdb-migrate --config {} health-check", path.display());
    Ok(ExitCode::SUCCESS)
}

/// Exit code from a finished run: 0 only for a fully clean run.
fn exit_for_report(report: &MigrationReport) -> ExitCode {
    if report.was_cancelled() {
        ExitCode::from(130)
    } else if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}

fn render_plan(plan: &MigrationPlan) {
    println!("\nPlan: {} tables in {} levels", plan.len(), plan.level_count());
    let mut current = None;
    for table in &plan.tables {
        if current != Some(table.level) {
            println!("  Level {}:", table.level + 1);
            current = Some(table.level);
        }
        println!("    {}", table.name);
    }
    if !plan.missing_on_source.is_empty() {
        println!("  Missing on source: {}", plan.missing_on_source.join(", "));
    }
    if !plan.missing_on_target.is_empty() {
        println!("  Missing on target: {}", plan.missing_on_target.join(", "));
    }
    if !plan.undeclared.is_empty() {
        println!("  Undeclared (not copied): {}", plan.undeclared.join(", "));
    }
}

fn render_report(report: &MigrationReport) {
    let heading = match report.status.as_str() {
        "completed" => "Migration completed!",
        "cancelled" => "Migration cancelled.",
        _ => "Migration completed with failures.",
    };
    println!("\n{}", heading);
    println!("  Duration: {:.2}s", report.duration_seconds);
    println!(
        "  Tables: {}/{}",
        report.tables_completed, report.tables_total
    );
    println!("  Rows inserted: {}", report.rows_inserted);
    if report.rows_skipped > 0 {
        println!("  Rows skipped: {}", report.rows_skipped);
    }
    if report.rows_failed > 0 {
        println!("  Rows failed: {}", report.rows_failed);
    }
    println!("  Throughput: {} rows/sec", report.rows_per_second);
    if !report.failed_tables.is_empty() {
        println!("  Failed tables: {}", report.failed_tables.join(", "));
    }

    println!("\nTables:");
    for t in &report.tables {
        let mark = if t.status == TableStatus::Completed {
            "✓"
        } else {
            "✗"
        };
        println!(
            "  {} {}: {} inserted, {} skipped in {:.2}s ({} rows/sec)",
            mark, t.table, t.rows_inserted, t.rows_skipped, t.duration_seconds, t.rows_per_second
        );
        if let Some(ref err) = t.error {
            println!("      {}", err);
        }
        if t.rows_failed > 0 {
            println!("      {} rows failed", t.rows_failed);
        }
    }

    if let Some(ref verification) = report.verification {
        render_verification(verification);
    }

    if !report.warnings.is_empty() {
        println!("\nWarnings:");
        for w in &report.warnings {
            println!("  {}", w);
        }
    }
}

fn render_verification(report: &VerifyReport) {
    println!("\nVerification:");
    for r in &report.results {
        let key = if r.key_table { " [key]" } else { "" };
        match &r.error {
            Some(e) => println!("  ✗ {}{}: {}", r.table, key, e),
            None => {
                let mark = if r.matched { "✓" } else { "✗" };
                println!(
                    "  {} {}{}: source={} target={}",
                    mark, r.table, key, r.source_count, r.target_count
                );
            }
        }
    }
    println!(
        "  Checked: {}, mismatched: {}",
        report.tables_checked, report.mismatched
    );
}

fn render_health(report: &HealthReport) {
    println!("Health Check Results:");
    for (label, side) in [("Source", &report.source), ("Target", &report.target)] {
        println!(
            "  {} ({}): {}",
            label,
            side.engine,
            if side.ok { "OK" } else { "FAILED" }
        );
        println!("    Endpoint: {}", side.endpoint);
        if side.ok {
            println!("    Tables: {}", side.tables);
        }
        if let Some(ref err) = side.error {
            println!("    Error: {}", err);
        }
    }
    println!(
        "\n  Overall: {}",
        if report.healthy() {
            "HEALTHY"
        } else {
            "UNHEALTHY"
        }
    );
}

fn setup_logging(verbose: u8, format: &str) {
    let default_directive = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Install SIGINT and SIGTERM handlers. The first signal cancels the token
/// so the run stops after the current batch; the second aborts the process.
#[cfg(unix)]
fn spawn_signal_handler() -> CancellationToken {
    let cancel = CancellationToken::new();

    let token = cancel.clone();
    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Stopping after the current batch (press again to abort)...");
        token.cancel();
        sigint.recv().await;
        eprintln!("Aborted.");
        std::process::exit(130);
    });

    let token = cancel.clone();
    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Stopping after the current batch...");
        token.cancel();
        sigterm.recv().await;
        eprintln!("Aborted.");
        std::process::exit(130);
    });

    cancel
}

#[cfg(not(unix))]
fn spawn_signal_handler() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current batch (press again to abort)...");
            token.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Aborted.");
                std::process::exit(130);
            }
        }
    });

    cancel
}
