mod app;
mod cmd;
mod output;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fnbuild_lib::check::CheckKind;

use crate::app::{App, engine_config};
use crate::cmd::{cmd_build, cmd_bundle, cmd_check, cmd_watch};
use crate::output::{OutputFormat, print_error};

/// fnbuild - Build and bundle serverless functions
#[derive(Parser)]
#[command(name = "fnbuild")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Application description file
  #[arg(short, long, global = true, default_value = "fnbuild.json")]
  app: PathBuf,

  /// Engine configuration file (JSON)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build functions for local development
  Build {
    /// Only these function ids
    #[arg(long)]
    id: Vec<String>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Bundle functions into deployment artifacts
  Bundle {
    /// Only these function ids
    #[arg(long)]
    id: Vec<String>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Run type and lint checks
  Check {
    /// Only these function ids
    #[arg(long)]
    id: Vec<String>,

    /// Only these checks (type, lint); defaults to the configured set
    #[arg(short, long)]
    kind: Vec<CheckKind>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Rebuild functions as their sources change
  Watch {
    /// Only these function ids
    #[arg(long)]
    id: Vec<String>,

    /// Quiet period collecting related file events (e.g., "50ms", "1s")
    #[arg(long, value_parser = humantime::parse_duration, default_value = "50ms")]
    debounce: Duration,
  },
}

fn main() {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  if let Err(e) = run(cli) {
    print_error(&format!("{:#}", e));
    std::process::exit(1);
  }
}

fn run(cli: Cli) -> Result<()> {
  let app = App::load(&cli.app)?;
  let config = engine_config(cli.config.as_deref())?;

  match cli.command {
    Commands::Build { id, output } => cmd_build(&app, config, &id, output),
    Commands::Bundle { id, output } => cmd_bundle(&app, config, &id, output),
    Commands::Check { id, kind, output } => cmd_check(&app, config, &id, &kind, output),
    Commands::Watch { id, debounce } => cmd_watch(&app, config, &id, debounce),
  }
}
