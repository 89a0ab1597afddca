//! QA workflow
//!
//! ```text
//! raw-validated ──copy──▶ pending-qa (checklist row qa=0, localMove=0)
//! pending-qa ──(qa=1 and localMove=1) move──▶ checked (validated-file-record row)
//! ```
//!
//! Staging copies, so the raw tree is never modified. Promotion is gated on
//! both manual sign-offs; a row with only one stays put across runs.
//! Tables are saved after every identifier so an interrupted run leaves them
//! consistent with the trees.

use crate::context::DatasetContext;
use crate::layout::TreeKind;
use crate::transfer::{remove_empty_dirs, transfer_identifier, TransferFile, TransferMode};
use hallmonitor_common::identifier::{parse_exception_marker, parse_filename, ExceptionKind};
use hallmonitor_common::records::ErrorRecord;
use hallmonitor_common::tables::{latest_pending_files, read_table, QaChecklist, ValidatedFileRecord};
use hallmonitor_common::{Error, Identifier, RecordStamp, Result};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{error, info, warn};

/// What one QA pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QaOutcome {
    /// Copied raw → pending-qa this run
    pub staged: Vec<String>,
    /// Moved pending-qa → checked this run
    pub promoted: Vec<String>,
    /// Checklist rows still waiting for sign-off or correction
    pub awaiting: Vec<String>,
    /// Identifiers whose transfer failed; left in their current stage
    pub failed: Vec<String>,
}

pub struct QaWorkflow<'a> {
    ctx: &'a DatasetContext,
    stamp: &'a RecordStamp,
}

impl<'a> QaWorkflow<'a> {
    pub fn new(ctx: &'a DatasetContext, stamp: &'a RecordStamp) -> Self {
        Self { ctx, stamp }
    }

    pub fn run(&self) -> Result<QaOutcome> {
        let paths = &self.ctx.paths;
        let mut validated = ValidatedFileRecord::load(&paths.validated_record)?;
        let mut checklist = QaChecklist::load(&paths.qa_checklist)?;
        let mut outcome = QaOutcome::default();

        self.promote(&mut validated, &mut checklist, &mut outcome)?;
        self.stage(&validated, &mut checklist, &mut outcome)?;

        info!(
            staged = outcome.staged.len(),
            promoted = outcome.promoted.len(),
            awaiting = outcome.awaiting.len(),
            failed = outcome.failed.len(),
            "QA pass complete"
        );
        Ok(outcome)
    }

    /// pending-qa → checked for signed-off rows
    fn promote(
        &self,
        validated: &mut ValidatedFileRecord,
        checklist: &mut QaChecklist,
        outcome: &mut QaOutcome,
    ) -> Result<()> {
        let paths = &self.ctx.paths;
        let rows: Vec<(String, bool)> = checklist
            .entries()
            .iter()
            .map(|e| (e.identifier.clone(), e.is_signed_off()))
            .collect();

        for (key, signed_off) in rows {
            if !signed_off {
                outcome.awaiting.push(key);
                continue;
            }
            let Some((identifier, data_type)) = self.resolve(&key) else {
                outcome.awaiting.push(key);
                continue;
            };
            let src = TreeKind::PendingQa.identifier_dir(paths, &identifier, &data_type);
            let dst = TreeKind::Checked.identifier_dir(paths, &identifier, &data_type);
            let files = identifier_files(&src, &identifier)?;

            if files.is_empty() {
                if identifier_files(&dst, &identifier)?.is_empty() {
                    warn!("{} is signed off but has no files in {}", key, src.display());
                    outcome.awaiting.push(key);
                    continue;
                }
                info!("{} already in {}, recording promotion", key, dst.display());
            } else if let Err(e) = transfer_identifier(&key, &files, &dst, TransferMode::Move) {
                error!("Promotion failed: {}", e);
                outcome.failed.push(key);
                continue;
            }

            remove_empty_dirs(&src, &paths.pending_qa)?;
            validated.add(self.stamp, key.clone());
            checklist.remove(&key);
            validated.save(&paths.validated_record)?;
            checklist.save(&paths.qa_checklist)?;
            info!("Promoted {} to checked", key);
            outcome.promoted.push(key);
        }
        Ok(())
    }

    /// raw → pending-qa for newly raw-validated identifiers
    fn stage(
        &self,
        validated: &ValidatedFileRecord,
        checklist: &mut QaChecklist,
        outcome: &mut QaOutcome,
    ) -> Result<()> {
        let paths = &self.ctx.paths;
        let Some(pending) = latest_pending_files(&paths.pending)? else {
            info!("No pending-files table yet, nothing to stage");
            return Ok(());
        };
        let records: Vec<ErrorRecord> = read_table(&pending)?;
        let passed: BTreeSet<String> = records
            .into_iter()
            .filter(|r| r.pass_raw && !r.is_error())
            .map(|r| r.identifier)
            .collect();

        for key in passed {
            if validated.contains(&key) || checklist.contains(&key) {
                continue;
            }
            let Some((identifier, data_type)) = self.resolve(&key) else {
                continue;
            };
            let src = TreeKind::Raw.identifier_dir(paths, &identifier, &data_type);
            let dst = TreeKind::PendingQa.identifier_dir(paths, &identifier, &data_type);
            let files = identifier_files(&src, &identifier)?;
            if files.is_empty() {
                warn!("{} passed raw validation but has no files in {}", key, src.display());
                continue;
            }
            if let Err(e) = transfer_identifier(&key, &files, &dst, TransferMode::Copy) {
                error!("Staging for QA failed: {}", e);
                outcome.failed.push(key);
                continue;
            }

            checklist.add(self.stamp, key.clone());
            checklist.save(&paths.qa_checklist)?;
            info!("Staged {} for QA", key);
            outcome.staged.push(key);
        }
        Ok(())
    }

    fn resolve(&self, key: &str) -> Option<(Identifier, String)> {
        let identifier: Identifier = match key.parse() {
            Ok(identifier) => identifier,
            Err(e) => {
                warn!("Skipping unparseable identifier {:?}: {}", key, e);
                return None;
            }
        };
        match self.ctx.datadict.get(&identifier.variable) {
            Some(entry) => {
                let data_type = entry.data_type.clone();
                Some((identifier, data_type))
            }
            None => {
                warn!("Skipping {}: variable not in the data dictionary", key);
                None
            }
        }
    }
}

/// Files in `dir` belonging to `identifier`
///
/// Bare exception markers are renamed to their qualified form so that only
/// qualified markers ever reach pending-qa and checked.
pub fn identifier_files(dir: &Path, identifier: &Identifier) -> Result<Vec<TransferFile>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    let files = names
        .into_iter()
        .filter_map(|name| {
            let dest_name = if let Some(kind) = ExceptionKind::from_bare_file_name(&name) {
                identifier.marker_file_name(kind)
            } else if let Some((id, _)) = parse_exception_marker(&name) {
                (id == *identifier).then(|| name.clone())?
            } else {
                let parsed = parse_filename(&name).ok()?;
                (parsed.identifier == *identifier).then(|| name.clone())?
            };
            Some(TransferFile {
                source: dir.join(&name),
                dest_name,
            })
        })
        .collect();
    Ok(files)
}

/// Remove checked-tree failures from the validated-file record
pub fn demote(ctx: &DatasetContext, failed: &BTreeSet<String>) -> Result<usize> {
    let path = &ctx.paths.validated_record;
    let mut validated = ValidatedFileRecord::load(path)?;
    let demoted: Vec<&String> = failed.iter().filter(|id| validated.contains(id)).collect();
    if demoted.is_empty() {
        return Ok(0);
    }
    for id in &demoted {
        warn!("Demoting {}: checked-tree validation failed", id);
    }
    let removed = validated.remove_all(failed);
    validated.save(path)?;
    Ok(removed)
}

/// Fail if any transfer of the pass failed
pub fn ensure_transfers_succeeded(outcome: &QaOutcome) -> Result<()> {
    match outcome.failed.first() {
        None => Ok(()),
        Some(first) => Err(Error::Transfer {
            identifier: first.clone(),
            message: format!(
                "{} identifier(s) could not be transferred: {}",
                outcome.failed.len(),
                outcome.failed.join(", ")
            ),
        }),
    }
}
