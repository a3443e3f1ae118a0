//! updaterctl - two-phase firmware update boot hook
//!
//! Runs the update worker once per boot and lets an operator stage packages,
//! inspect the boot mode and override it.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod error;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use updater_core::BootMode;

#[derive(Parser)]
#[command(name = "updaterctl")]
#[command(about = "Back up and restore settings around a firmware flash")]
#[command(version)]
#[command(long_about = "
updaterctl drives the two-phase firmware update protocol.

On a pre-update boot `run` backs the settings store up into the staged package
and hands over to the bootloader. On the post-update boot it restores the
store and unpacks the package's resource bundle. Any other boot is a no-op.

Use --json for machine-readable output suitable for scripting.
")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "UPDATER_CONFIG")]
    config: Option<PathBuf>,

    /// Output in JSON format for machine parsing
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the update phase selected by the boot mode
    Run,

    /// Stage a package and request a pre-update boot
    Prepare {
        /// Package directory holding the manifest
        package_dir: PathBuf,
    },

    /// Show the boot mode and the staged package
    Status,

    /// Overwrite the boot mode register
    SetMode {
        /// normal, pre-update, update or post-update
        mode: BootMode,
    },
}

fn log_filter(verbose: u8) -> String {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    format!("updaterctl={level},updater_core={level}")
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter(cli.verbose).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match execute_command(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }
            ExitCode::from(error::exit_code(&e))
        }
    }
}

async fn execute_command(cli: &Cli) -> Result<()> {
    let config = commands::load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::Run => commands::run::execute(&config, cli.json).await,
        Commands::Prepare { package_dir } => {
            commands::prepare::execute(&config, package_dir, cli.json)
        }
        Commands::Status => commands::status::execute(&config, cli.json),
        Commands::SetMode { mode } => commands::mode::execute(&config, *mode, cli.json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn parse_run_defaults() -> TestResult {
        let cli = Cli::try_parse_from(["updaterctl", "run"])?;
        assert!(!cli.json);
        assert_eq!(cli.verbose, 0);
        assert!(matches!(cli.command, Commands::Run));
        Ok(())
    }

    #[test]
    fn parse_global_flags_after_subcommand() -> TestResult {
        let cli = Cli::try_parse_from([
            "updaterctl",
            "status",
            "--json",
            "-vv",
            "--config",
            "/tmp/updater.json",
        ])?;
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/updater.json")));
        Ok(())
    }

    #[test]
    fn parse_prepare_package_dir() -> TestResult {
        let cli = Cli::try_parse_from(["updaterctl", "prepare", "/ext/update/f7-update-0.43.1"])?;
        match &cli.command {
            Commands::Prepare { package_dir } => {
                assert_eq!(package_dir, &PathBuf::from("/ext/update/f7-update-0.43.1"));
            }
            _ => return Err("expected Prepare command".into()),
        }
        Ok(())
    }

    #[test]
    fn parse_set_mode_values() -> TestResult {
        for mode in BootMode::ALL {
            let cli = Cli::try_parse_from(["updaterctl", "set-mode", mode.as_str()])?;
            assert!(matches!(cli.command, Commands::SetMode { mode: m } if m == mode));
        }
        Ok(())
    }

    #[test]
    fn parse_set_mode_rejects_unknown() {
        assert!(matches!(
            Cli::try_parse_from(["updaterctl", "set-mode", "flashing"]),
            Err(_)
        ));
    }

    #[test]
    fn prepare_requires_package_dir() {
        assert!(matches!(Cli::try_parse_from(["updaterctl", "prepare"]), Err(_)));
    }

    #[test]
    fn log_filter_follows_verbosity() {
        assert_eq!(log_filter(0), "updaterctl=warn,updater_core=warn");
        assert_eq!(log_filter(1), "updaterctl=info,updater_core=info");
        assert_eq!(log_filter(7), "updaterctl=trace,updater_core=trace");
    }
}
