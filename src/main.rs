//! Binary entry point for the EBS janitor.

use std::io::{self, Write};
use std::process;

use chrono::Local;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use ebs_janitor::{
    AwsProviderFactory, ConfigError, Janitor, JanitorSettings, RunMode, RunReport,
};

mod cli;

use cli::Cli;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Sweep(String),
    #[error("failed to write run report: {0}")]
    Report(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(report) if report.has_failures() => 1,
        Ok(_) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
}

async fn run(cli: Cli) -> Result<RunReport, CliError> {
    let mode = RunMode::from_flag(cli.dry_run.as_deref())?;
    let settings = resolve_settings(&cli)?;
    let endpoint_url = settings.endpoint_url.clone();
    let config = settings.into_run_config(mode, Local::now().date_naive())?;

    let home_region = config.home_region().to_owned();
    let factory = AwsProviderFactory::new(&home_region, endpoint_url).await;
    let janitor = Janitor::new(factory, config);
    let report = janitor
        .sweep(io::stdout())
        .await
        .map_err(|err| CliError::Sweep(err.to_string()))?;

    if cli.summary_json {
        write_report(io::stdout(), &report)?;
    }
    Ok(report)
}

fn resolve_settings(cli: &Cli) -> Result<JanitorSettings, ConfigError> {
    let mut settings = JanitorSettings::load_without_cli_args()?;
    if let Some(regions) = &cli.regions {
        settings.regions.clone_from(regions);
    }
    if let Some(output_dir) = &cli.output_dir {
        settings.output_dir.clone_from(output_dir);
    }
    if cli.no_audit {
        settings.export_audit = false;
    }
    if cli.fail_fast {
        settings.fail_fast = true;
    }
    if cli.wait_for_snapshots {
        settings.wait_for_snapshots = true;
    }
    Ok(settings)
}

fn write_report(mut target: impl Write, report: &RunReport) -> Result<(), CliError> {
    serde_json::to_writer_pretty(&mut target, report)
        .map_err(|err| CliError::Report(err.to_string()))?;
    writeln!(target).map_err(|err| CliError::Report(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
