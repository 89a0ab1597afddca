//! One monitoring run over a dataset
//!
//! Order of operations:
//! 1. Acquire the dataset lock
//! 2. Load the data dictionary and fail on drift from the setup snapshot
//! 3. Discover REDCap exports (a misplaced export stops the run here, before
//!    anything is written)
//! 4. Validate the checked tree and demote its failures
//! 5. Validate the raw tree
//! 6. Write the pending tables
//! 7. QA pass: promote signed-off identifiers, stage new passes
//! 8. Hand the results to the tracker updater

use crate::checkers::CheckerRegistry;
use crate::context::{DatasetContext, DatasetPaths};
use crate::layout::TreeKind;
use crate::lock::DatasetLock;
use crate::qa::{self, QaOutcome, QaWorkflow};
use crate::redcap::{self, ColumnRemap};
use crate::tracker::{self, TrackerUpdate};
use crate::validator::{ValidationReport, Validator};
use anyhow::{Context, Result};
use hallmonitor_common::config::HallMonitorConfig;
use hallmonitor_common::datadict::{check_drift, write_snapshot};
use hallmonitor_common::tables::{write_pending, PendingPaths, ValidatedFileRecord};
use hallmonitor_common::{ErrorRecord, Identifier, RecordStamp};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;

/// Which trees a run validates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    All,
    RawOnly,
    CheckedOnly,
}

impl Scope {
    pub fn includes(&self, tree: TreeKind) -> bool {
        match self {
            Scope::All => true,
            Scope::RawOnly => tree == TreeKind::Raw,
            Scope::CheckedOnly => tree == TreeKind::Checked,
        }
    }
}

/// Per-run options from the command line
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dataset: PathBuf,
    pub scope: Scope,
    pub skip_qa: bool,
    pub legacy_exceptions: bool,
    pub remap: ColumnRemap,
}

/// What a run did
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub checked: Option<ValidationReport>,
    pub raw: Option<ValidationReport>,
    pub demoted: usize,
    pub pending: PendingPaths,
    pub qa: Option<QaOutcome>,
    pub tracker_updated: bool,
}

impl RunSummary {
    pub fn records(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.checked
            .iter()
            .chain(self.raw.iter())
            .flat_map(|r| r.records.iter())
    }

    /// Log totals per tree, errors by kind and QA transitions
    pub fn log(&self) {
        for report in self.checked.iter().chain(self.raw.iter()) {
            info!(
                tree = %report.tree,
                files = report.files_scanned,
                errors = report.error_count(),
                passed = report.passed().len(),
                "Run summary"
            );
            for (kind, count) in report.count_by_kind() {
                info!(tree = %report.tree, "  {}: {}", kind, count);
            }
        }
        if self.demoted > 0 {
            info!(demoted = self.demoted, "Demoted from the validated-file record");
        }
        if let Some(qa) = &self.qa {
            info!(
                staged = qa.staged.len(),
                promoted = qa.promoted.len(),
                awaiting = qa.awaiting.len(),
                "QA transitions"
            );
        }
        info!(pending_errors = %self.pending.errors.display(), "Errors written");
    }
}

/// Snapshot the data dictionary as the accepted version
pub fn setup(dataset: &std::path::Path) -> Result<()> {
    let paths = DatasetPaths::new(dataset);
    let dict = write_snapshot(&paths.datadict, &paths.datadict_latest)
        .context("Failed to snapshot the data dictionary")?;
    info!(variables = dict.len(), "Setup complete");
    Ok(())
}

/// Run validation, QA and the tracker handoff
pub fn run(config: &HallMonitorConfig, options: &RunOptions) -> Result<RunSummary> {
    let paths = DatasetPaths::new(&options.dataset);
    if !paths.root.is_dir() {
        anyhow::bail!("Dataset directory not found: {}", paths.root.display());
    }
    let _lock = DatasetLock::acquire(&paths.lock).context("Failed to lock the dataset")?;

    let dict = check_drift(&paths.datadict, &paths.datadict_latest)?;
    let ctx = DatasetContext::new(paths, dict).with_legacy_exceptions(options.legacy_exceptions);

    let exports = redcap::find_exports(&ctx.paths)?;
    let stamp = RecordStamp::new(config.operator());
    let checkers = CheckerRegistry::with_defaults(&config.psychopy);
    info!(operator = %stamp.user, dataset = %ctx.paths.root.display(), "Starting run");

    let mut demoted = 0;
    let checked = if options.scope.includes(TreeKind::Checked) {
        let report = Validator::new(&ctx, TreeKind::Checked, &checkers)
            .validate(&stamp)
            .context("Failed to scan the checked tree")?;
        demoted = qa::demote(&ctx, &report.failed())?;
        Some(report)
    } else {
        None
    };

    let raw = if options.scope.includes(TreeKind::Raw) {
        Some(
            Validator::new(&ctx, TreeKind::Raw, &checkers)
                .validate(&stamp)
                .context("Failed to scan the raw tree")?,
        )
    } else {
        None
    };

    let records: Vec<ErrorRecord> = checked
        .iter()
        .chain(raw.iter())
        .flat_map(|r| r.records.iter().cloned())
        .collect();
    let pending = write_pending(&ctx.paths.pending, &stamp, &records)?;

    let qa = if options.skip_qa || raw.is_none() {
        info!("Skipping QA pass");
        None
    } else {
        Some(QaWorkflow::new(&ctx, &stamp).run()?)
    };

    // Remapped copies must outlive the tracker process
    let remap_dir = tempfile::TempDir::new().context("Failed to create a temporary directory")?;
    let update = TrackerUpdate {
        redcap_files: options.remap.remap_exports(&exports, remap_dir.path())?,
        passed: ValidatedFileRecord::load(&ctx.paths.validated_record)?.identifiers(),
        failed: failed_identifiers(&records),
    };
    let tracker_updated = tracker::update_tracker(&config.tracker, &ctx.paths, &update)?;

    let summary = RunSummary {
        checked,
        raw,
        demoted,
        pending,
        qa,
        tracker_updated,
    };
    summary.log();

    if let Some(outcome) = &summary.qa {
        qa::ensure_transfers_succeeded(outcome)?;
    }
    Ok(summary)
}

/// Identifiers with at least one error; unparseable filenames are left out
fn failed_identifiers(records: &[ErrorRecord]) -> BTreeSet<String> {
    records
        .iter()
        .filter(|r| r.is_error())
        .filter(|r| r.identifier.parse::<Identifier>().is_ok())
        .map(|r| r.identifier.clone())
        .collect()
}
