use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use canvas_backup::course_import::{ImportReport, import_courses_from_path};
use canvas_backup::{BackupCoordinator, BackupStatus, CanvasClient, Config, CourseId, Result};

/// canvas-backup - back up Canvas LMS courses listed in a CSV file
#[derive(Parser, Debug)]
#[command(name = "canvas-backup")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    CANVAS_API_TOKEN    API access token\n    CANVAS_BASE_URL     Canvas instance URL\n    RUST_LOG            Log filter (overridden by --debug)"
)]
struct Cli {
    /// Configuration file (default: <config dir>/canvas-backup/config.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Canvas instance URL, e.g. https://school.instructure.com
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// Back up every course in the CSV file
    Backup {
        /// CSV with "Course Name" and "Course URL" columns
        csv: PathBuf,

        /// Directory receiving the course archives
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of courses backed up at once
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Re-run failed courses up to this many times
        #[arg(long, value_name = "ROUNDS", default_value_t = 0)]
        retry_failed: u32,
    },

    /// Check a course list without contacting Canvas
    CheckCsv {
        /// CSV with "Course Name" and "Course URL" columns
        csv: PathBuf,
    },

    /// Check that the base URL is reachable and the API token is accepted
    ValidateToken,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let result = match &cli.command {
        Command::CheckCsv { csv } => check_csv(csv),
        Command::ValidateToken => match load_config(&cli) {
            Ok(config) => validate_token(&config).await,
            Err(e) => Err(e),
        },
        Command::Backup {
            csv,
            output,
            concurrency,
            retry_failed,
        } => match load_config(&cli) {
            Ok(mut config) => {
                if let Some(output) = output {
                    config.backup.output_dir = output.clone();
                }
                if let Some(concurrency) = concurrency {
                    config.backup.max_concurrent_backups = *concurrency;
                }
                backup(config, csv, *retry_failed).await
            }
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "canvas-backup failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("canvas_backup=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "canvas_backup=info,warn".into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();
}

/// Config file (explicit or default location), then environment, then flags
fn load_config(cli: &Cli) -> Result<Config> {
    let default_path = dirs::config_dir().map(|dir| dir.join("canvas-backup").join("config.toml"));
    let mut config = match (&cli.config, default_path) {
        (Some(path), _) => Config::load(path)?,
        (None, Some(path)) if path.is_file() => {
            tracing::debug!(path = %path.display(), "Using default config file");
            Config::load(&path)?
        }
        _ => Config::default(),
    };

    config.apply_env();
    if let Some(base_url) = &cli.base_url {
        config.canvas.base_url = base_url.clone();
    }
    config.validate()?;
    Ok(config)
}

fn check_csv(csv: &Path) -> Result<ExitCode> {
    let report = import_courses_from_path(csv)?;
    print_import_report(&report);
    for task in &report.tasks {
        println!("  {:>10}  {}", task.course_id, task.course_name);
    }
    Ok(if report.has_skipped_rows() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_import_report(report: &ImportReport) {
    println!(
        "{} course(s) to back up, {} invalid row(s), {} duplicate(s)",
        report.tasks.len(),
        report.invalid.len(),
        report.duplicates.len()
    );
    for row in &report.invalid {
        println!("  line {}: {}", row.line, row.reason);
    }
    for dup in &report.duplicates {
        println!(
            "  line {}: course {} ({}) already listed on line {}",
            dup.line, dup.course_id, dup.course_name, dup.first_line
        );
    }
}

async fn check_connection(client: &CanvasClient) -> Result<()> {
    client.probe_base_url().await?;
    let user = client.validate_token().await?;
    println!(
        "Authenticated as {} ({})",
        user.name.as_deref().unwrap_or("unknown user"),
        user.email().unwrap_or("no email")
    );
    Ok(())
}

async fn validate_token(config: &Config) -> Result<ExitCode> {
    let client = CanvasClient::new(config)?;
    check_connection(&client).await?;
    Ok(ExitCode::SUCCESS)
}

async fn backup(config: Config, csv: &Path, retry_rounds: u32) -> Result<ExitCode> {
    let report = import_courses_from_path(csv)?;
    print_import_report(&report);
    if report.tasks.is_empty() {
        println!("Nothing to back up");
        return Ok(ExitCode::FAILURE);
    }

    let coordinator = BackupCoordinator::new(config)?;
    check_connection(coordinator.client()).await?;
    println!(
        "Backing up into {}",
        coordinator.config().backup.output_dir.display()
    );

    let printer = spawn_status_printer(&coordinator);
    let listener = canvas_backup::cancel_on_signal(&coordinator);

    let mut summary = coordinator.process_queue(report.tasks).await;
    for round in 1..=retry_rounds {
        if summary.all_completed() || coordinator.cancellation_token().is_cancelled() {
            break;
        }
        tracing::info!(round, "Retrying failed courses");
        summary = coordinator.retry_failed().await;
    }

    listener.abort();
    printer.abort();

    let tasks = coordinator.snapshot();
    let completed = tasks
        .iter()
        .filter(|t| t.status == BackupStatus::Completed)
        .count();
    println!();
    println!("{completed} of {} course(s) backed up", tasks.len());
    for task in tasks.iter().filter(|t| t.status != BackupStatus::Completed) {
        println!("  {:<9} {} ({})", task.status, task.course_name, task.course_id);
    }

    Ok(if completed == tasks.len() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Print each course's status changes (progress ticks are left to the log)
fn spawn_status_printer(coordinator: &BackupCoordinator) -> tokio::task::JoinHandle<()> {
    let mut updates = coordinator.subscribe();
    tokio::spawn(async move {
        let mut last: HashMap<CourseId, BackupStatus> = HashMap::new();
        loop {
            match updates.recv().await {
                Ok(update) => {
                    if last.insert(update.course_id.clone(), update.status) == Some(update.status) {
                        continue;
                    }
                    println!(
                        "[{:<11}] {} ({})",
                        update.status.as_str(),
                        update.course_name,
                        update.course_id
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Status printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
