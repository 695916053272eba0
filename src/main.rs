use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use statement_scraper::{
    Config, ConsolePrompt, DownloadStatus, ExtractionRequest, ExtractionService, Halt,
    RetryPolicy, RunReport, RunSettings, StaticCredentials, UnitOutcome,
};
use tokio::sync::watch;
use tower::Service;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Download DNB account statements as PDF files")]
struct Cli {
    /// Job configuration file (TOML, or YAML with a .yaml/.yml extension)
    config: PathBuf,

    /// Directory the statements are saved to
    #[arg(short, long, default_value = "./statements")]
    output: PathBuf,

    /// Show the browser window
    #[arg(long, default_value_t = false)]
    show: bool,

    /// Never prompt; SSN must be in the config, PIN/OTP in DNB_PIN/DNB_OTP
    #[arg(long, default_value_t = false)]
    no_prompt: bool,

    /// Seconds to wait for page elements
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Seconds to wait for the portal to finish logging in
    #[arg(long, default_value_t = 60)]
    login_timeout: u64,

    /// Attempts per statement on transient page failures
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    retries: u32,

    /// Chrome/Chromium executable
    #[arg(long)]
    chrome: Option<PathBuf>,

    /// Write the run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Also append logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let default_filter = if verbose {
        "statement_scraper=debug,info,chromiumoxide=warn,chromiumoxide::conn=off,chromiumoxide::handler=off"
    } else {
        "statement_scraper=info,chromiumoxide=warn,chromiumoxide::conn=off,chromiumoxide::handler=off"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(file_layer)
        .init();
    Ok(())
}

fn settings_from(cli: &Cli) -> RunSettings {
    let mut settings = RunSettings::new(&cli.output)
        .with_headless(!cli.show)
        .with_timeout(Duration::from_secs(cli.timeout))
        .with_login_timeout(Duration::from_secs(cli.login_timeout))
        .with_retry(RetryPolicy::new(cli.retries, RetryPolicy::default().initial_backoff));
    if let Some(chrome) = &cli.chrome {
        settings = settings.with_chrome_path(chrome);
    }
    settings
}

fn print_report(report: &RunReport) {
    println!();
    println!("=== Statements ===");
    for unit in &report.units {
        let name = unit.display_name.as_deref().unwrap_or(&unit.account_id);
        let line = match &unit.outcome {
            UnitOutcome::Resolved(result) => match &result.status {
                DownloadStatus::Saved => format!("saved      {}", result.target_path.display()),
                DownloadStatus::SkippedExisting => {
                    format!("exists     {}", result.target_path.display())
                }
                DownloadStatus::Failed { cause } => format!("FAILED     {}", cause),
            },
            UnitOutcome::NotFound { reason } => format!("not found  {}", reason),
            UnitOutcome::NotAttempted => "not run".to_string(),
        };
        println!("{:<20} {}  {}", name, unit.month, line);
    }

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        println!();
        println!("=== Failed ({}) ===", failures.len());
        for unit in failures {
            println!("{} {}", unit.account_id, unit.month);
        }
    }

    match &report.halted {
        Some(Halt::Fatal(reason)) => println!("\nRun aborted: {}", reason),
        Some(Halt::Cancelled) => println!("\nRun cancelled"),
        None => {}
    }
    println!("\n{}", report.summary());
}

fn write_report(path: &Path, report: &RunReport) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    info!("Report written to {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    // ブラウザを起動する前に設定を検証する
    let config = match Config::load(&cli.config, cli.no_prompt) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration {}: {}", cli.config.display(), e);
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(2);
        }
    };
    info!(
        "Loaded {} jobs ({} statements) from {}",
        config.jobs.len(),
        config.unit_count(),
        cli.config.display()
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, stopping after the current statement");
                let _ = stop_tx.send(true);
            }
            Err(e) => error!("Unable to listen for shutdown signal: {}", e),
        }
    });

    let request = ExtractionRequest::new(config)
        .with_settings(settings_from(&cli))
        .with_stop_signal(stop_rx);

    let result = if cli.no_prompt {
        ExtractionService::new(StaticCredentials::from_env())
            .call(request)
            .await
    } else {
        ExtractionService::new(ConsolePrompt::new())
            .call(request)
            .await
    };

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            error!("Extraction failed: {}", e);
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    print_report(&report);

    if let Some(path) = &cli.report {
        if let Err(e) = write_report(path, &report) {
            error!("{:#}", e);
        }
    }

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
