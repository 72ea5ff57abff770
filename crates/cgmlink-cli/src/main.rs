//! `cgmlink`: command-line front end for CGM transmitter sessions.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scan` | Scan for nearby transmitters |
//! | `demo` | Run a simulated session end to end and store its readings |
//! | `readings` | List, summarize, or prune stored readings |
//! | `pairing` | Show or forget the paired transmitter |
//! | `config` | Manage `config.toml` |
//! | `completions` | Generate shell completions |
//!
//! Settings come from flags, then `CGMLINK_*` environment variables, then
//! `config.toml` in the platform config directory.

mod cli;
mod commands;
mod config;
mod format;
mod sink;
mod style;
mod util;

use std::io;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::{cmd_config, cmd_demo, cmd_pairing, cmd_readings, cmd_scan};
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions before tracing init
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "cgmlink", &mut io::stdout());
        return Ok(());
    }

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config_path = Config::path();
    let config = Config::load();
    let user = cli.user.as_deref();
    let database = config.database_path(cli.database.as_deref());

    match cli.command {
        Commands::Scan { timeout, format } => {
            let timeout = config.scan_timeout(timeout);
            cmd_scan(
                timeout,
                format,
                cli.output.as_ref(),
                cli.quiet,
                config.cgm_config(user, None)?,
            )
            .await
        }
        Commands::Demo(args) => {
            let out = commands::DemoOutput {
                unit: config.unit()?,
                no_color: cli.no_color,
                quiet: cli.quiet,
            };
            cmd_demo(
                &args,
                config.cgm_config(user, args.max_attempts)?,
                &database,
                out,
            )
            .await
        }
        Commands::Readings { action } => {
            let store = util::open_store(&database)?;
            let scope = user.map(str::to_string).or_else(|| config.user.clone());
            let ctx = commands::ReadingsContext {
                scope: scope.as_deref(),
                unit: config.unit()?,
                output: cli.output.as_ref(),
                no_color: cli.no_color,
            };
            cmd_readings(action, &store, ctx)
        }
        Commands::Pairing { action } => {
            let store = util::open_store(&database)?;
            cmd_pairing(action, &store)
        }
        Commands::Config { action } => cmd_config(action, &config_path),
        Commands::Completions { .. } => Ok(()),
    }
}
