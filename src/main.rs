//! YYS Clicker
//!
//! Watches the screen for configured UI elements (template images) and clicks
//! them with randomized position and timing. Targets are described in
//! `targets.json`; see `targets.example.json`.

mod automation;
mod capture;
mod config;
mod error;
mod input;
mod logging;
mod matching;
mod paths;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use crate::automation::ExitStatus;
use crate::config::{DelayRange, Overrides};
use crate::error::{ConfigError, RunError};

/// Onmyoji auto-battle clicker
#[derive(Parser, Debug)]
#[command(name = "yys-clicker", version, about)]
struct Args {
    /// Path to the targets configuration JSON file
    #[arg(long, value_name = "PATH")]
    targets: Option<PathBuf>,

    /// Random delay range (seconds) between screen scans when nothing is found
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"])]
    scan_interval: Option<Vec<f64>>,

    /// Override confidence for all targets (0-1). Uses per-target value if omitted
    #[arg(long)]
    confidence: Option<f64>,

    /// Do not stop when the mouse is moved to the top-left corner
    #[arg(long)]
    no_failsafe: bool,

    /// Log debug details (match scores, sampled clicks) to the console
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> Result<Overrides, ConfigError> {
        let scan_interval = match self.scan_interval.as_deref() {
            None => None,
            Some(&[min, max]) => Some(
                DelayRange::new(min, max)
                    .map_err(|e| ConfigError::Invalid(format!("--scan-interval: {}", e)))?,
            ),
            Some(other) => {
                return Err(ConfigError::Invalid(format!(
                    "--scan-interval takes MIN and MAX, got {} values",
                    other.len()
                )));
            }
        };
        Ok(Overrides {
            scan_interval,
            confidence: self.confidence,
            no_failsafe: self.no_failsafe,
        })
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose);

    let overrides = match args.overrides() {
        Ok(overrides) => overrides,
        Err(e) => return fail(e.into()),
    };

    let targets_path = args.targets.unwrap_or_else(paths::default_targets_path);
    tracing::debug!("Looking for targets at: {}", targets_path.display());
    let config = match config::load_config(&targets_path) {
        Ok(config) => config,
        Err(e) => return fail(e),
    };
    tracing::info!(
        "Loaded {} targets from {}",
        config.catalog.len(),
        config.source.display()
    );

    automation::run(&config, &overrides).into()
}

fn fail(err: RunError) -> ExitCode {
    tracing::error!("{}", err);
    ExitStatus::from(&err).into()
}
