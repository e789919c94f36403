mod addresses;
mod cli;
mod commands;
mod config;
mod ports;
mod proxy;
mod shutdown;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use cli::Cli;
use config::settings::{MergedSettings, Overrides};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "lanproxy", &mut std::io::stdout());
        return Ok(());
    }

    init_logging(cli.verbose);

    let overrides = Overrides {
        external_port: cli.external,
        internal_port: cli.internal,
        rewrite_host_headers: cli.rewrite_host_headers,
        engine_program: cli.engine,
        engine_args: cli.engine_args,
    };
    let settings = match &cli.config {
        Some(path) => MergedSettings::load_from(path, overrides)?,
        None => MergedSettings::load(overrides)?,
    };

    commands::start::execute(settings, !cli.no_stdin)
}

/// RUST_LOG wins; otherwise -v raises the level from warn
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
