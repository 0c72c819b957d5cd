//! # latexgate command-line entry point
//!
//! ```text
//! main()
//!   │
//!   ├─> Parse CLI arguments (clap)
//!   ├─> Load config file + environment overrides
//!   ├─> Initialize logging in the configured log directory
//!   └─> Run the command
//!         └─> `schedule` alone starts a Tokio runtime
//! ```
//!
//! ```bash
//! latexgate check 12345
//! latexgate convert --id 12345 --latex 'x^2'
//! latexgate report
//! latexgate init-config
//! ```

#![warn(clippy::all, rust_2018_idioms)]
#![expect(clippy::print_stdout)] // command output goes to stdout

mod cli;

use anyhow::{Context as _, Result};
use clap::Parser as _;
use latexgate::config::{AppConfig, default_config_path};
use latexgate::logging;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    logging::init(&config.log_dir)?;
    tracing::debug!(config = %config_path.display(), "Configuration loaded");

    cli::run_command(&config, &config_path, cli.command)
}
