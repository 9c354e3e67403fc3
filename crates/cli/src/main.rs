//! `artifex`: fetch and store build artifacts in the tiered cache

// The binary is the one place allowed to write to the console.
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod cli;
mod commands;
mod errors;
mod logging;
mod settings;

use crate::cli::Cli;
use crate::errors::CliError;
use crate::settings::Settings;
use artifex_cache::{AlertSeverity, Alerts};
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(error) = run(cli).await {
        eprintln!("{:?}", miette::Report::new(error));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    logging::init(cli.level, cli.json_logs)?;
    let settings = Settings::load(&cli.config)?;

    let alerts = Alerts::new();
    let result = commands::execute(cli.command, &settings, &alerts).await;
    report_alerts(&alerts);

    println!("{}", result?);
    Ok(())
}

fn report_alerts(alerts: &Alerts) {
    for alert in alerts.take() {
        let label = match alert.severity {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
        };
        eprintln!("{label}: {}", alert.message);
    }
}
