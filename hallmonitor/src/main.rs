//! hallmonitor - command-line entry point
//!
//! ```bash
//! hallmonitor /data/study              # validate both trees, run QA, update tracker
//! hallmonitor /data/study --setup      # accept the current data dictionary
//! hallmonitor /data/study --raw-only --no-qa -vv
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use hallmonitor::monitor::{self, RunOptions, Scope};
use hallmonitor::redcap::{ColumnRemap, ColumnRename, ColumnReplace};
use hallmonitor_common::config::HallMonitorConfig;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for hallmonitor
#[derive(Parser, Debug)]
#[command(name = "hallmonitor")]
#[command(about = "Validate a dataset's raw and checked data trees and run the QA workflow")]
#[command(version)]
struct Args {
    /// Dataset root directory
    #[arg(env = "HALLMONITOR_DATASET")]
    dataset: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Validate only the raw tree
    #[arg(long, conflicts_with = "checked_only")]
    raw_only: bool,

    /// Validate only the checked tree
    #[arg(long)]
    checked_only: bool,

    /// Skip the QA workflow
    #[arg(long)]
    no_qa: bool,

    /// Accept bare deviation.txt / no-data.txt markers in the checked tree
    #[arg(long)]
    legacy_exceptions: bool,

    /// Rename a REDCap export column before the tracker update
    #[arg(long = "map", value_name = "OLD=NEW")]
    map: Vec<ColumnRename>,

    /// Replace a REDCap export header by 0-based position
    #[arg(long = "replace", value_name = "INDEX=NEW")]
    replace: Vec<ColumnReplace>,

    /// Config file (default: <dataset>/data-monitoring/hallmonitor.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Snapshot the current data dictionary and exit
    #[arg(long)]
    setup: bool,
}

impl Args {
    fn scope(&self) -> Scope {
        match (self.raw_only, self.checked_only) {
            (true, _) => Scope::RawOnly,
            (_, true) => Scope::CheckedOnly,
            _ => Scope::All,
        }
    }
}

/// Step `base` up once per `-v`
fn log_level(base: &str, verbose: u8) -> &str {
    const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    let start = LEVELS
        .iter()
        .position(|l| l.eq_ignore_ascii_case(base.trim()))
        .unwrap_or(2);
    LEVELS[(start + verbose as usize).min(LEVELS.len() - 1)]
}

fn init_tracing(config: &HallMonitorConfig, verbose: u8) -> Result<()> {
    let level = log_level(&config.logging.level, verbose);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("hallmonitor={level},hallmonitor_common={level},warn"))
    });

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let (config, config_path) = HallMonitorConfig::resolve(args.config.as_deref(), &args.dataset)
        .context("Failed to load configuration")?;
    init_tracing(&config, args.verbose)?;

    info!("hallmonitor {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = config_path {
        info!("Configuration: {}", path.display());
    }

    if args.setup {
        return monitor::setup(&args.dataset);
    }

    let options = RunOptions {
        scope: args.scope(),
        skip_qa: args.no_qa,
        legacy_exceptions: args.legacy_exceptions,
        remap: ColumnRemap {
            renames: args.map,
            replacements: args.replace,
        },
        dataset: args.dataset,
    };
    monitor::run(&config, &options)?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Configuration errors arrive before the subscriber is up
            if tracing::dispatcher::has_been_set() {
                error!("{:#}", e);
            } else {
                eprintln!("hallmonitor: {:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_steps_from_configured_level() {
        assert_eq!(log_level("info", 0), "info");
        assert_eq!(log_level("info", 1), "debug");
        assert_eq!(log_level("info", 5), "trace");
        assert_eq!(log_level("warn", 1), "info");
        assert_eq!(log_level("bogus", 0), "info");
    }

    #[test]
    fn test_cli_parses_remaps_and_scope() {
        let args = Args::parse_from([
            "hallmonitor",
            "/data/study",
            "-vv",
            "--raw-only",
            "--map",
            "age_v2=age",
            "--replace",
            "0=record_id",
        ]);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.scope(), Scope::RawOnly);
        assert_eq!(args.map[0].new, "age");
        assert_eq!(args.replace[0].index, 0);
    }

    #[test]
    fn test_scope_flags_conflict() {
        assert!(Args::try_parse_from(["hallmonitor", "/d", "--raw-only", "--checked-only"]).is_err());
    }
}
