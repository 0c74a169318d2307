// ledgercheck CLI - standardize billing exports and reconcile them against the ledger

mod exit_codes;
mod recon;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use exit_codes::{EXIT_ERROR, EXIT_INVALID_CONFIG, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "ledgercheck")]
#[command(about = "Standardize practitioner billing exports and reconcile them against a reference ledger")]
#[command(version)]
struct Cli {
    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Errors only (overridden by RUST_LOG)
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan, normalize, aggregate and reconcile every configured system
    #[command(after_help = "\
Examples:
  ledgercheck run ledgercheck.toml
  ledgercheck run final_config.json --json
  ledgercheck run ledgercheck.toml --output report.json")]
    Run {
        /// Path to the TOML (or .json) config file
        config: PathBuf,

        /// Output the JSON run report to stdout
        #[arg(long)]
        json: bool,

        /// Write the JSON run report to a file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Parse and validate a config without running
    #[command(after_help = "\
Examples:
  ledgercheck validate ledgercheck.toml")]
    Validate {
        /// Path to the TOML (or .json) config file
        config: PathBuf,
    },
}

fn setup_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stderr keeps stdout clean for --json
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Run { config, json, output } => recon::cmd_run(config, json, output),
        Commands::Validate { config } => recon::cmd_validate(config),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self { code: EXIT_INVALID_CONFIG, message: msg.into(), hint: None }
    }

    pub fn general(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
