//! Data tree validator
//!
//! One pass over a tree (raw or checked) produces the complete list of error
//! and pass records for that tree. Nothing here aborts on a bad file: every
//! problem becomes a record and processing continues.
//!
//! Per directory, records come out in a fixed order: directory-level naming
//! and misplacement findings, the blame they cast on absent identifiers,
//! `issue.txt`, then each identifier's own checks. Tree-wide
//! missing-identifier and combination findings follow, then pass records
//! (raw tree only).

mod blame;
mod combination;
mod directory;

use crate::checkers::{CheckInput, CheckerRegistry};
use crate::context::DatasetContext;
use crate::expectations::{expected_files, expected_identifiers};
use crate::layout::TreeKind;
use crate::scanner::{ScanError, TreeScan, TreeScanner};
use directory::DirectoryContents;
use hallmonitor_common::identifier::ExceptionKind;
use hallmonitor_common::{ErrorKind, ErrorRecord, Identifier, RecordStamp};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, info};

/// Which exception marker spellings a tree accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionNaming {
    /// `<identifier>-deviation.txt` / `<identifier>-no-data.txt` only
    Qualified,
    /// Qualified markers plus bare `deviation.txt` / `no-data.txt`
    QualifiedOrBare,
}

impl ExceptionNaming {
    pub fn accepts_bare(&self) -> bool {
        matches!(self, ExceptionNaming::QualifiedOrBare)
    }
}

/// One error, before it is stamped into a record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Finding {
    pub identifier: String,
    pub kind: ErrorKind,
    pub details: String,
}

impl Finding {
    pub fn new(identifier: impl Into<String>, kind: ErrorKind, details: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            kind,
            details: details.into(),
        }
    }

    fn into_record(self, stamp: &RecordStamp) -> ErrorRecord {
        ErrorRecord::error(stamp, self.identifier, self.kind, self.details)
    }
}

// ============================================================================
// Report
// ============================================================================

/// Outcome of validating one tree
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub tree: TreeKind,
    pub records: Vec<ErrorRecord>,
    /// Identifiers found on disk (files or markers)
    pub present: BTreeSet<Identifier>,
    pub files_scanned: usize,
}

impl ValidationReport {
    pub fn errors(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.records.iter().filter(|r| r.is_error())
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    /// Identifiers with a pass record
    pub fn passed(&self) -> BTreeSet<String> {
        self.records
            .iter()
            .filter(|r| r.pass_raw)
            .map(|r| r.identifier.clone())
            .collect()
    }

    /// Identifiers (or unparseable filenames) with at least one error
    pub fn failed(&self) -> BTreeSet<String> {
        self.errors().map(|r| r.identifier.clone()).collect()
    }

    pub fn count_by_kind(&self) -> BTreeMap<ErrorKind, usize> {
        let mut counts = BTreeMap::new();
        for kind in self.errors().filter_map(|r| r.error_type) {
            *counts.entry(kind).or_insert(0) += 1;
        }
        counts
    }
}

// ============================================================================
// Validator
// ============================================================================

pub struct Validator<'a> {
    ctx: &'a DatasetContext,
    tree: TreeKind,
    naming: ExceptionNaming,
    checkers: &'a CheckerRegistry,
}

impl<'a> Validator<'a> {
    /// Validator for the raw or checked tree
    ///
    /// Raw folders may carry bare exception markers; the checked tree only
    /// accepts them in legacy mode.
    pub fn new(ctx: &'a DatasetContext, tree: TreeKind, checkers: &'a CheckerRegistry) -> Self {
        let naming = match tree {
            TreeKind::Raw => ExceptionNaming::QualifiedOrBare,
            _ if ctx.legacy_exceptions => ExceptionNaming::QualifiedOrBare,
            _ => ExceptionNaming::Qualified,
        };
        Self {
            ctx,
            tree,
            naming,
            checkers,
        }
    }

    pub fn validate(&self, stamp: &RecordStamp) -> Result<ValidationReport, ScanError> {
        let root = self.tree.root(&self.ctx.paths);
        info!("Validating {} tree at {}", self.tree, root.display());
        let scan = TreeScanner::new().scan(root)?;
        let report = self.validate_scan(&scan, stamp);
        info!(
            tree = %self.tree,
            files = report.files_scanned,
            identifiers = report.present.len(),
            errors = report.error_count(),
            passed = report.passed().len(),
            "Validation complete"
        );
        Ok(report)
    }

    /// Validate an already-scanned tree
    pub fn validate_scan(&self, scan: &TreeScan, stamp: &RecordStamp) -> ValidationReport {
        let paths = &self.ctx.paths;
        let dict = &self.ctx.datadict;

        let mut dirs: Vec<DirectoryContents> = scan
            .dirs
            .iter()
            .map(|(dir, files)| {
                DirectoryContents::classify(dir, self.tree.locate(paths, dir), files, self.naming)
            })
            .collect();

        let on_disk: BTreeSet<Identifier> = dirs
            .iter()
            .flat_map(|d| d.identifiers())
            .cloned()
            .collect();
        let expected = expected_identifiers(dict, &on_disk);

        // Absent identifiers with something to look for, and their home
        let mut missing: Vec<(Identifier, PathBuf)> = expected
            .difference(&on_disk)
            .filter_map(|id| {
                let entry = dict.get(&id.variable)?;
                if entry.expected_file_ext.is_empty() || dict.is_combination_component(&id.variable) {
                    return None;
                }
                Some((id.clone(), self.tree.identifier_dir(paths, id, &entry.data_type)))
            })
            .collect();

        // A bare no-data marker in the home directory stands in for the files
        let dir_index: BTreeMap<PathBuf, usize> =
            dirs.iter().enumerate().map(|(i, d)| (d.dir.clone(), i)).collect();
        missing.retain(|(id, home)| match dir_index.get(home) {
            Some(&i) if dirs[i].bare_markers.contains(&ExceptionKind::NoData) => {
                dirs[i].implied.insert(id.clone());
                false
            }
            _ => true,
        });

        let present: BTreeSet<Identifier> = dirs
            .iter()
            .flat_map(|d| d.identifiers())
            .cloned()
            .collect();

        let mut findings = Vec::new();
        for contents in &dirs {
            let dir_label = paths.relative(&contents.dir).display().to_string();
            let batch = directory::check_directory(dict, self.tree, paths, contents);
            let blamed: Vec<&Identifier> = missing
                .iter()
                .filter(|(_, home)| *home == contents.dir)
                .map(|(id, _)| id)
                .collect();

            findings.extend(batch.findings.iter().cloned());
            findings.extend(blame::propagate(&batch, &dir_label, &blamed));
            findings.extend(directory::issue_findings(contents, &dir_label, &blamed));
            for identifier in contents.identifiers() {
                self.check_identifier(contents, &dir_label, identifier, &mut findings);
            }
        }

        for (id, home) in &missing {
            findings.push(Finding::new(
                id.to_string(),
                ErrorKind::MissingIdentifier,
                format!("no files for {} in {}", id, paths.relative(home).display()),
            ));
        }

        findings.extend(combination::check_combinations(dict, &present));

        let failed: BTreeSet<String> = findings.iter().map(|f| f.identifier.clone()).collect();
        let mut records: Vec<ErrorRecord> = findings.into_iter().map(|f| f.into_record(stamp)).collect();

        if self.tree == TreeKind::Raw {
            for id in &present {
                let key = id.to_string();
                if !failed.contains(&key) {
                    records.push(ErrorRecord::pass(stamp, key));
                }
            }
        }

        ValidationReport {
            tree: self.tree,
            records,
            present,
            files_scanned: scan.file_count(),
        }
    }

    /// Per-identifier checks within one directory
    fn check_identifier(
        &self,
        contents: &DirectoryContents,
        dir_label: &str,
        identifier: &Identifier,
        findings: &mut Vec<Finding>,
    ) {
        let dict = &self.ctx.datadict;
        let key = identifier.to_string();
        let mut push = |kind: ErrorKind, details: String| findings.push(Finding::new(key.clone(), kind, details));

        let Some(entry) = dict.get(&identifier.variable) else {
            push(
                ErrorKind::ImproperVariableName,
                format!("{} is not in the data dictionary", identifier.variable),
            );
            return;
        };
        if !entry.is_ordinary() {
            push(
                ErrorKind::ImproperDirectoryStructure,
                format!(
                    "{} is a {} variable and has no data directory",
                    identifier.variable, entry.data_type
                ),
            );
            return;
        }
        if contents.location.is_none() {
            push(
                ErrorKind::ImproperDirectoryStructure,
                format!("{} does not follow the {} tree layout", dir_label, self.tree),
            );
            return;
        }

        let files = contents.data_files(identifier);
        for file in files.iter().filter(|f| f.size == 0) {
            push(ErrorKind::EmptyFile, format!("{} is empty", file.name));
        }

        let flags = contents.exceptions(identifier);
        if flags.deviation && flags.no_data.is_some() {
            push(
                ErrorKind::ImproperExceptionFiles,
                format!("both deviation and no-data markers present in {}", dir_label),
            );
        }
        if flags.deviation && flags.no_data.is_none() && files.is_empty() {
            push(
                ErrorKind::ImproperExceptionFiles,
                "deviation marker without any data files; use a no-data marker instead".to_string(),
            );
        }

        // Presence
        let mut present: BTreeSet<String> = files.iter().map(|f| f.name.clone()).collect();
        let expected: Vec<String> = if let Some(marker) = &flags.no_data {
            present.insert(marker.clone());
            vec![marker.clone()]
        } else if flags.deviation {
            present.iter().cloned().collect()
        } else if entry.allows_suffix(&identifier.sre) {
            expected_files(dict, identifier)
        } else {
            Vec::new()
        };
        for name in expected.iter().filter(|n| !present.contains(*n)) {
            push(ErrorKind::MissingFile, format!("{} not found in {}", name, dir_label));
        }
        for name in present.iter().filter(|n| !expected.contains(*n)) {
            push(
                ErrorKind::UnexpectedFile,
                format!("{} is not expected for {}", name, identifier.variable),
            );
        }

        // Content checks
        if flags.deviation || flags.no_data.is_some() || !entry.allows_suffix(&identifier.sre) {
            return;
        }
        let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
        let input = CheckInput {
            identifier,
            dir: &contents.dir,
            files: &names,
        };
        for finding in self.checkers.check(&entry.data_type, &input) {
            debug!(identifier = %key, kind = %finding.kind, "Content check failed");
            push(finding.kind, finding.details);
        }
    }
}
