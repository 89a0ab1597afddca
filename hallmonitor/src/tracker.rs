//! Central tracker handoff
//!
//! The tracker updater is an external program. It receives the checked tree,
//! the dataset root, the REDCap exports and the identifiers that passed or
//! failed this run; any non-zero exit means the tracker is inconsistent and
//! the run fails.

use crate::context::DatasetPaths;
use hallmonitor_common::config::TrackerConfig;
use hallmonitor_common::{Error, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Command;
use tracing::{info, warn};

/// Everything the tracker updater is told about a run
#[derive(Debug, Clone, Default)]
pub struct TrackerUpdate {
    pub redcap_files: Vec<PathBuf>,
    pub passed: BTreeSet<String>,
    pub failed: BTreeSet<String>,
}

/// Positional arguments after the configured command
pub fn tracker_args(config: &TrackerConfig, paths: &DatasetPaths, update: &TrackerUpdate) -> Vec<String> {
    let redcap: Vec<String> = update
        .redcap_files
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    vec![
        paths.checked.display().to_string(),
        paths.root.display().to_string(),
        redcap.join(","),
        config
            .session_filter
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "none".to_string()),
        config.child_data.to_string(),
        join(&update.passed),
        join(&update.failed),
    ]
}

fn join(ids: &BTreeSet<String>) -> String {
    ids.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

/// Run the tracker updater; skipped when no command is configured
pub fn update_tracker(config: &TrackerConfig, paths: &DatasetPaths, update: &TrackerUpdate) -> Result<bool> {
    let Some((program, leading)) = config.command.split_first() else {
        warn!("No [tracker] command configured, skipping tracker update");
        return Ok(false);
    };

    let args = tracker_args(config, paths, update);
    info!(
        program = %program,
        passed = update.passed.len(),
        failed = update.failed.len(),
        "Updating central tracker"
    );
    let status = Command::new(program)
        .args(leading)
        .args(&args)
        .status()
        .map_err(|e| Error::Tracker(format!("cannot start {}: {}", program, e)))?;

    if !status.success() {
        return Err(Error::Tracker(format!("{} exited with {}", program, status)));
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update() -> TrackerUpdate {
        TrackerUpdate {
            redcap_files: vec![PathBuf::from("/r/a.csv"), PathBuf::from("/r/b.csv")],
            passed: ["x".to_string(), "y".to_string()].into_iter().collect(),
            failed: BTreeSet::new(),
        }
    }

    #[test]
    fn test_argument_order() {
        let paths = DatasetPaths::new("/ds");
        let config = TrackerConfig {
            command: vec!["python3".into(), "update.py".into()],
            session_filter: None,
            child_data: true,
        };
        assert_eq!(
            tracker_args(&config, &paths, &update()),
            vec![
                "/ds/sourcedata/checked",
                "/ds",
                "/r/a.csv,/r/b.csv",
                "none",
                "true",
                "x,y",
                "",
            ]
        );
    }

    #[test]
    fn test_unconfigured_tracker_is_skipped() {
        let paths = DatasetPaths::new("/ds");
        assert!(!update_tracker(&TrackerConfig::default(), &paths, &update()).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_fatal() {
        let paths = DatasetPaths::new("/ds");
        let failing = TrackerConfig {
            command: vec!["false".into()],
            ..TrackerConfig::default()
        };
        assert!(matches!(
            update_tracker(&failing, &paths, &update()),
            Err(Error::Tracker(_))
        ));

        let succeeding = TrackerConfig {
            command: vec!["true".into()],
            ..TrackerConfig::default()
        };
        assert!(update_tracker(&succeeding, &paths, &update()).unwrap());
    }
}
