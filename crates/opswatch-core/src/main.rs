//! Opswatch CLI
//!
//! Command-line interface for the opswatch monitoring daemon.

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use opswatch::alerting::SqliteRepository;
use opswatch::models::StatusReport;
use opswatch::{Config, Monitor};

/// Opswatch - threshold alerting for hosts and endpoints
#[derive(Parser)]
#[command(name = "opswatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        global = true,
        env = "OPSWATCH_CONFIG",
        default_value = "monitoring_config.json"
    )]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an initial check, then monitor continuously until Ctrl+C
    Run,

    /// Run a single monitoring cycle and print the status report
    Check {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show recorded incidents, or samples of one metric
    History {
        /// Maximum number of rows
        #[arg(long, default_value = "20", value_parser = clap::value_parser!(u32).range(1..))]
        limit: u32,

        /// Show samples of this metric instead of incidents
        #[arg(long)]
        metric: Option<String>,

        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::InitConfig { force } = cli.command {
        let _guard = init_logging(&cli, &Config::default())?;
        return run_init_config(&cli.config, force);
    }

    let config = Config::load_or_create(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let _guard = init_logging(&cli, &config)?;

    match cli.command {
        Commands::Run => run_monitor(&config).await,
        Commands::Check { json } => run_check(&config, json).await,
        Commands::History {
            limit,
            metric,
            json,
        } => run_history(&config, i64::from(limit), metric.as_deref(), json).await,
        Commands::InitConfig { .. } => Ok(()),
    }
}

/// Console logging plus an optional plain-text log file
fn init_logging(cli: &Cli, config: &Config) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if cli.verbose {
        "debug"
    } else {
        config.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console = match cli.log_format {
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    };

    let (file, guard) = match &config.log_file {
        Some(path) => {
            let path = Path::new(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow!("invalid log file path: {}", path.display()))?;

            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = fmt::layer().with_writer(writer).with_ansi(false).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))?;

    Ok(guard)
}

fn run_init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists, use --force to overwrite", path.display());
    }

    Config::write_default(path)?;
    println!("✅ Wrote default configuration to {}", path.display());
    Ok(())
}

async fn run_monitor(config: &Config) -> anyhow::Result<()> {
    let monitor = Monitor::from_config(config).await?;

    println!("🏢 Opswatch");
    println!("   Monitoring interval: {}s", config.monitoring_interval_seconds);
    println!("   Monitored APIs:      {}", config.critical_apis.len());
    println!("   Email recipients:    {}", config.email_recipients.len());
    println!("   Automatic actions:   {}", config.automatic_actions);
    println!();

    info!("Running initial check");
    match monitor.run_cycle_guarded().await {
        Ok(_) => print_report(&monitor.last_status_report()),
        Err(e) => error!(error = %e, "Initial check failed"),
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let driver = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.run(stop_rx).await })
    };

    println!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    stop_tx.send(true).ok();
    driver.await?;
    Ok(())
}

async fn run_check(config: &Config, json: bool) -> anyhow::Result<()> {
    let monitor = Monitor::from_config(config).await?;
    monitor.run_cycle_guarded().await?;
    let report = monitor.last_status_report();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

async fn run_history(
    config: &Config,
    limit: i64,
    metric: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let repository = SqliteRepository::connect(&config.database_url).await?;
    repository.migrate().await?;

    if let Some(metric) = metric {
        let rows = repository.metric_history(metric, limit).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&rows)?);
            return Ok(());
        }
        println!("{:<27} {:>12}  STATUS", "TIMESTAMP", "VALUE");
        for row in rows {
            println!(
                "{:<27} {:>12.2}  {}",
                row.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                row.value,
                row.status
            );
        }
        return Ok(());
    }

    let rows = repository.recent_incidents(limit).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    println!(
        "{:<27} {:<9} {:<9} {:<24} MESSAGE",
        "RECORDED", "SEVERITY", "STATE", "ALERT"
    );
    for row in rows {
        println!(
            "{:<27} {:<9} {:<9} {:<24} {}",
            row.recorded_at.format("%Y-%m-%d %H:%M:%S UTC"),
            row.severity,
            if row.resolved { "resolved" } else { "active" },
            row.alert_key,
            row.message
        );
    }
    Ok(())
}

fn print_report(report: &StatusReport) {
    println!("📊 System Status ({})", report.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    println!(
        "   Healthy: {}",
        if report.system_healthy { "✅ yes" } else { "❌ no" }
    );

    for (name, value) in &report.system_metrics {
        println!("   {name:<22} {value:>10.2}");
    }

    println!(
        "   Active alerts: {} critical, {} warnings",
        report.total_critical, report.total_warning
    );
    for (key, alert) in &report.active_alerts {
        let active = std::time::Duration::from_secs(alert.active_duration_seconds.max(0.0) as u64);
        println!(
            "   [{}] {key}: {} (active {})",
            alert.severity.as_str().to_uppercase(),
            alert.message,
            humantime::format_duration(active)
        );
    }
}
