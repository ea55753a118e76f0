//! CLI binary for docket-watch.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use docket_watch::credentials::create_manager;
use docket_watch::notify::{Notifier, TelegramNotifier};
use docket_watch::portal::HttpPortal;
use docket_watch::session::{ArtifactFile, SessionManager};
use docket_watch::store::SqliteStateStore;
use docket_watch::config::SecretField;
use docket_watch::{CycleOutcome, Monitor, MonitorConfig, StateStore};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// docket-watch: court portal notification monitor.
#[derive(Parser)]
#[command(name = "docket-watch", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Check the portal periodically until interrupted.
    Run,

    /// Run a single verification cycle. Exits 1 if the run failed.
    Check,

    /// Show record counts and recent runs.
    Status {
        /// Number of recent runs to show.
        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List notifications detected but not yet delivered.
    Pending,

    /// Delete every stored record and run.
    Reset {
        /// Confirm the wipe.
        #[arg(long)]
        yes: bool,
    },

    /// Store a secret in the platform keyring and reference it from the config.
    SetSecret {
        /// `portal.password` or `notifier.bot_token`.
        field: SecretField,

        /// Secret value. Read from stdin when omitted.
        #[arg(long)]
        value: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(MonitorConfig::default_config_path);
    let config = MonitorConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let _log_guard = docket_watch::logging::init(&config.logging, &config.log_directory())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Check => check(config).await,
        Command::Status { limit, json } => status(&config, limit, json),
        Command::Pending => pending(&config),
        Command::Reset { yes } => reset(&config, yes),
        Command::SetSecret { field, value } => set_secret(&config_path, field, value),
    }
}

fn open_store(config: &MonitorConfig) -> anyhow::Result<Arc<SqliteStateStore>> {
    let path = config.database_path();
    let store =
        SqliteStateStore::open(&path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Arc::new(store))
}

fn build_monitor(config: &MonitorConfig) -> anyhow::Result<Arc<Monitor>> {
    config.validate()?;
    let credentials = create_manager();

    let password = config
        .portal
        .password
        .resolve(credentials.as_ref())
        .context("resolving portal password")?;
    let portal = Arc::new(HttpPortal::new(
        config.portal_endpoints()?,
        config.inbox_options(),
        config.portal.username.clone(),
        password,
    )?);

    let notifier: Option<Arc<dyn Notifier>> = if config.notifier.enabled {
        let telegram = config
            .telegram_config(credentials.as_ref())
            .context("resolving Telegram bot token")?;
        Some(Arc::new(TelegramNotifier::new(telegram)?))
    } else {
        info!("notifications disabled; detections are recorded only");
        None
    };

    let session = SessionManager::new(
        portal.clone(),
        Some(ArtifactFile::new(config.artifact_path())),
        config.session_settings(),
    );

    Ok(Arc::new(Monitor::new(
        config.monitor_settings(),
        session,
        portal,
        open_store(config)?,
        notifier,
    )))
}

async fn run(config: MonitorConfig) -> anyhow::Result<ExitCode> {
    println!("docket-watch v{}", env!("CARGO_PKG_VERSION"));
    let monitor = build_monitor(&config)?;
    let cancel = CancellationToken::new();

    // Handle Ctrl+C
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });

    println!(
        "Checking every {} minutes. Press Ctrl+C to stop.",
        monitor.settings().check_interval.as_secs() / 60
    );
    let handle = monitor.start(cancel);
    handle.await.context("monitor loop panicked")?;
    monitor.shutdown().await;

    let status = monitor.status();
    println!(
        "Stopped after {} checks ({} ok, {} failed).",
        status.total_checks, status.successful_checks, status.failed_checks
    );
    Ok(ExitCode::SUCCESS)
}

async fn check(config: MonitorConfig) -> anyhow::Result<ExitCode> {
    let monitor = build_monitor(&config)?;
    let outcome = monitor.run_cycle().await;
    monitor.shutdown().await;

    let CycleOutcome::Finished(run) = outcome else {
        println!("Skipped: another verification is running.");
        return Ok(ExitCode::SUCCESS);
    };

    println!("Run {}", run.id);
    println!("  observed:  {}", run.records_observed);
    println!("  new:       {}", run.new_notifications);
    println!("  delivered: {}", run.notifications_delivered);
    println!("  duration:  {} ms", run.duration_ms);
    for e in &run.errors {
        println!("  error: {e}");
    }

    if run.success {
        println!("OK");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("FAILED");
        Ok(ExitCode::from(1))
    }
}

fn status(config: &MonitorConfig, limit: usize, json: bool) -> anyhow::Result<ExitCode> {
    let store = open_store(config)?;
    let stats = store.stats()?;
    let runs = store.recent_runs(limit)?;

    if json {
        let body = serde_json::json!({ "stats": stats, "runs": runs });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("Database:           {}", store.path().display());
    println!("Records:            {}", stats.total_records);
    println!("With notification:  {}", stats.with_notification);
    println!("Delivered:          {}", stats.sent);
    println!("Pending delivery:   {}", stats.pending_unsent);
    if runs.is_empty() {
        println!("\nNo runs recorded yet.");
    } else {
        println!("\nRecent runs:");
        for run in &runs {
            println!(
                "  {}  {:<6} observed={} new={} delivered={} errors={}",
                run.timestamp.format("%Y-%m-%d %H:%M:%S"),
                if run.success { "ok" } else { "FAILED" },
                run.records_observed,
                run.new_notifications,
                run.notifications_delivered,
                run.errors.len()
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn pending(config: &MonitorConfig) -> anyhow::Result<ExitCode> {
    let store = open_store(config)?;
    let records = store.pending_unsent()?;
    if records.is_empty() {
        println!("No pending notifications.");
    }
    for r in &records {
        println!(
            "{}  {}  (checked {})",
            r.number,
            r.title,
            r.last_checked_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn reset(config: &MonitorConfig, yes: bool) -> anyhow::Result<ExitCode> {
    if !yes {
        eprintln!("Refusing to wipe state without --yes.");
        return Ok(ExitCode::from(2));
    }
    let store = open_store(config)?;
    store.reset()?;
    info!(path = %config.database_path().display(), "state store reset");
    println!("State store cleared.");
    Ok(ExitCode::SUCCESS)
}

fn set_secret(
    config_path: &Path,
    field: SecretField,
    value: Option<String>,
) -> anyhow::Result<ExitCode> {
    let value = match value {
        Some(v) => v,
        None => {
            eprintln!("Enter value for {}:", field.account());
            let mut line = String::new();
            std::io::stdin()
                .read_line(&mut line)
                .context("reading secret from stdin")?;
            line.trim().to_owned()
        }
    };
    if value.is_empty() {
        eprintln!("Refusing to store an empty secret.");
        return Ok(ExitCode::from(2));
    }

    // Environment overrides must not be written back to the file.
    let mut config = if config_path.exists() {
        MonitorConfig::from_file(config_path)?
    } else {
        MonitorConfig::default()
    };
    let credentials = create_manager();
    config.store_secret(field, &value, credentials.as_ref())?;
    config.save_to_file(config_path)?;

    info!(field = field.account(), path = %config_path.display(), "secret moved to keyring");
    println!("Stored {} in the keyring.", field.account());
    Ok(ExitCode::SUCCESS)
}
