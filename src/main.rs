//! Binary entry point for the quickserver operator CLI.

mod cli;

use std::io::{self, Write};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use quickserver::{
    Catalog, CatalogError, ConfigError, ConsoleError, ConsoleSettings, FleetConfig, HealthProbe,
    ProbeError, ReadinessSettings, RemoteConsole, SourceRcon, StatusReport,
};

use cli::{Cli, ConsoleTarget, SayCommand, StatusCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("status query failed: {0}")]
    Probe(#[from] ProbeError),
    #[error("broadcast failed: {0}")]
    Console(#[from] ConsoleError),
    #[error("message must not be empty")]
    EmptyMessage,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            writeln!(io::stderr(), "{err}").ok();
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Status(command) => status(command).await,
        Cli::Say(command) => say(command).await,
        Cli::CheckConfig => check_config(),
    }
}

const fn console_settings(target: &ConsoleTarget) -> ConsoleSettings {
    ConsoleSettings {
        port: target.port,
        timeout: Duration::from_millis(target.timeout_ms),
    }
}

async fn status(command: StatusCommand) -> Result<(), CliError> {
    let target = &command.target;
    let probe = HealthProbe::new(
        Arc::new(SourceRcon::new()),
        console_settings(target),
        ReadinessSettings::default(),
    );
    let report = probe.status(&target.host, &target.password).await?;
    write_report(io::stdout(), &report);
    Ok(())
}

fn write_report(mut out: impl Write, report: &StatusReport) {
    let unknown = String::from("-");
    let game = report
        .game
        .as_ref()
        .map_or_else(|| unknown.clone(), ToString::to_string);
    let tv = report
        .tv
        .as_ref()
        .map_or_else(|| unknown.clone(), ToString::to_string);
    writeln!(out, "players: {}", report.players).ok();
    writeln!(out, "map: {}", report.map.as_deref().unwrap_or("-")).ok();
    writeln!(out, "game: {game}").ok();
    writeln!(out, "tv: {tv}").ok();
}

async fn say(command: SayCommand) -> Result<(), CliError> {
    let message = command.message.join(" ");
    if message.trim().is_empty() {
        return Err(CliError::EmptyMessage);
    }
    let target = &command.target;
    let settings = console_settings(target);
    let reply = SourceRcon::new()
        .query(
            &target.host,
            settings.port,
            &target.password,
            &format!("say {message}"),
            settings.timeout,
        )
        .await?;
    if !reply.trim().is_empty() {
        writeln!(io::stdout(), "{}", reply.trim_end()).ok();
    }
    Ok(())
}

fn check_config() -> Result<(), CliError> {
    let config = FleetConfig::load_without_cli_args()?;
    config.validate()?;
    let catalog = Catalog::load(&config.catalog_path())?;
    for (region, settings) in catalog.regions() {
        catalog_line(&format!("region {region}: {}", settings.backend));
    }
    let variants = catalog.variant_names().count();
    let regions = catalog.regions().count();
    catalog_line(&format!(
        "configuration ok: {variants} variants, {regions} regions, credits {}",
        if config.credits_enabled {
            "enabled"
        } else {
            "disabled"
        }
    ));
    Ok(())
}

fn catalog_line(line: &str) {
    writeln!(io::stdout(), "{line}").ok();
}
