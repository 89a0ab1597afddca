//! Per-directory classification and directory-level checks
//!
//! Naming and misplacement are judged over the whole directory listing, not
//! per identifier, and are recorded once per violation per directory.

use super::{ExceptionNaming, Finding};
use crate::context::DatasetPaths;
use crate::layout::{DirLocation, TreeKind};
use crate::scanner::ScannedFile;
use hallmonitor_common::identifier::{parse_exception_marker, parse_filename, ExceptionKind, ISSUE_FILE};
use hallmonitor_common::{DataDictionary, ErrorKind, Identifier};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// A correctly-named data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DataFile {
    pub name: String,
    pub size: u64,
    pub info: Option<String>,
    pub extension: String,
}

/// Exception markers in effect for one identifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ExceptionFlags {
    pub deviation: bool,
    /// Filename of the no-data marker in effect
    pub no_data: Option<String>,
}

/// Classified listing of one directory
#[derive(Debug, Clone)]
pub(crate) struct DirectoryContents {
    pub dir: PathBuf,
    pub location: Option<DirLocation>,
    pub data: BTreeMap<Identifier, Vec<DataFile>>,
    pub markers: BTreeMap<Identifier, BTreeMap<ExceptionKind, String>>,
    pub bare_markers: BTreeSet<ExceptionKind>,
    /// Filenames that fail the grammar, with one detail per problem
    pub unparsed: Vec<(String, Vec<String>)>,
    pub issue_file: bool,
    /// Absent identifiers covered by a bare no-data marker in this directory
    pub implied: BTreeSet<Identifier>,
}

impl DirectoryContents {
    pub fn classify(
        dir: &Path,
        location: Option<DirLocation>,
        files: &[ScannedFile],
        naming: ExceptionNaming,
    ) -> Self {
        let mut contents = Self {
            dir: dir.to_path_buf(),
            location,
            data: BTreeMap::new(),
            markers: BTreeMap::new(),
            bare_markers: BTreeSet::new(),
            unparsed: Vec::new(),
            issue_file: false,
            implied: BTreeSet::new(),
        };

        for file in files {
            let name = file.name.as_str();
            if name == ISSUE_FILE {
                contents.issue_file = true;
                continue;
            }
            if let Some(kind) = ExceptionKind::from_bare_file_name(name) {
                if naming.accepts_bare() {
                    contents.bare_markers.insert(kind);
                } else {
                    contents.unparsed.push((
                        name.to_string(),
                        vec![format!(
                            "{}: bare exception marker, expected <identifier>-{}",
                            name, name
                        )],
                    ));
                }
                continue;
            }
            if let Some((identifier, kind)) = parse_exception_marker(name) {
                contents
                    .markers
                    .entry(identifier)
                    .or_default()
                    .insert(kind, name.to_string());
                continue;
            }
            match parse_filename(name) {
                Ok(parsed) => contents.data.entry(parsed.identifier).or_default().push(DataFile {
                    name: name.to_string(),
                    size: file.size,
                    info: parsed.info,
                    extension: parsed.extension,
                }),
                Err(issues) => contents.unparsed.push((
                    name.to_string(),
                    issues.iter().map(|i| format!("{}: {}", name, i)).collect(),
                )),
            }
        }
        contents
    }

    /// Identifiers validated in this directory
    pub fn identifiers(&self) -> BTreeSet<&Identifier> {
        self.data
            .keys()
            .chain(self.markers.keys())
            .chain(self.implied.iter())
            .collect()
    }

    pub fn data_files(&self, identifier: &Identifier) -> &[DataFile] {
        self.data.get(identifier).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn exceptions(&self, identifier: &Identifier) -> ExceptionFlags {
        let own = self.markers.get(identifier);
        let has = |kind: ExceptionKind| own.map_or(false, |m| m.contains_key(&kind)) || self.bare_markers.contains(&kind);
        let no_data = own
            .and_then(|m| m.get(&ExceptionKind::NoData).cloned())
            .or_else(|| {
                self.bare_markers
                    .contains(&ExceptionKind::NoData)
                    .then(|| ExceptionKind::NoData.bare_file_name().to_string())
            });
        ExceptionFlags {
            deviation: has(ExceptionKind::Deviation),
            no_data,
        }
    }
}

// ============================================================================
// Directory batch
// ============================================================================

/// Deduplicated directory-level violations
#[derive(Debug, Clone, Default)]
pub(crate) struct DirectoryBatch {
    pub findings: BTreeSet<Finding>,
    /// Offending filenames per violation kind, for blame propagation
    pub offenders: BTreeMap<ErrorKind, BTreeSet<String>>,
}

impl DirectoryBatch {
    fn record(&mut self, kind: ErrorKind, identifier: String, file: &str, details: String) {
        self.findings.insert(Finding::new(identifier, kind, details));
        self.offenders.entry(kind).or_default().insert(file.to_string());
    }
}

/// Naming and misplacement checks over every file in a directory
pub(crate) fn check_directory(
    dict: &DataDictionary,
    tree: TreeKind,
    paths: &DatasetPaths,
    contents: &DirectoryContents,
) -> DirectoryBatch {
    let mut batch = DirectoryBatch::default();

    for (name, problems) in &contents.unparsed {
        for details in problems {
            batch.record(ErrorKind::NamingError, name.clone(), name, details.clone());
        }
    }

    for (identifier, files) in &contents.data {
        // Unknown variables are reported per identifier
        let Some(entry) = dict.get(&identifier.variable) else {
            continue;
        };
        let key = identifier.to_string();
        let flags = contents.exceptions(identifier);

        for file in files {
            if !dict.subject_allowed(&identifier.variable, identifier.subject) {
                batch.record(
                    ErrorKind::NamingError,
                    key.clone(),
                    &file.name,
                    format!(
                        "subject {} is not an allowed value for {}",
                        identifier.subject, identifier.variable
                    ),
                );
            }
            if !entry.allows_suffix(&identifier.sre) {
                batch.record(
                    ErrorKind::NamingError,
                    key.clone(),
                    &file.name,
                    format!(
                        "suffix {} is not allowed for {}",
                        identifier.sre, identifier.variable
                    ),
                );
            }
            if !flags.deviation && !entry.allows_extension(&file.extension) {
                batch.record(
                    ErrorKind::NamingError,
                    key.clone(),
                    &file.name,
                    format!(
                        "extension {} is not expected for {}",
                        file.extension, identifier.variable
                    ),
                );
            }
            if let Some(info) = &file.info {
                let problem = if flags.no_data.is_some() {
                    Some("is not allowed alongside a no-data marker")
                } else if !flags.deviation {
                    Some("requires a deviation marker")
                } else {
                    None
                };
                if let Some(problem) = problem {
                    batch.record(
                        ErrorKind::NamingError,
                        key.clone(),
                        &file.name,
                        format!("info tag {:?} {}", info, problem),
                    );
                }
            }
        }

        if flags.deviation && files.len() == 1 {
            batch.record(
                ErrorKind::ImproperExceptionFiles,
                key.clone(),
                &files[0].name,
                format!(
                    "deviation marker accompanies a single file ({}); use a no-data marker instead",
                    files[0].name
                ),
            );
        }
    }

    // Files in a directory outside the layout are reported per identifier
    if contents.location.is_some() {
        let marker_files = contents
            .markers
            .iter()
            .flat_map(|(id, kinds)| kinds.values().map(move |name| (id, name)));
        let data_files = contents
            .data
            .iter()
            .flat_map(|(id, files)| files.iter().map(move |f| (id, &f.name)));

        for (identifier, name) in data_files.chain(marker_files) {
            let Some(entry) = dict.get(&identifier.variable) else {
                continue;
            };
            if !entry.is_ordinary() {
                continue;
            }
            let home = tree.identifier_dir(paths, identifier, &entry.data_type);
            if home != contents.dir {
                batch.record(
                    ErrorKind::MisplacedFile,
                    identifier.to_string(),
                    name,
                    format!("{} belongs in {}", name, paths.relative(&home).display()),
                );
            }
        }
    }

    batch
}

/// `issue.txt` findings for a directory
///
/// Charged to every identifier validated in the directory; failing that, to
/// the absent identifiers whose home it is; failing that, to the marker file
/// itself.
pub(crate) fn issue_findings(
    contents: &DirectoryContents,
    dir_label: &str,
    missing: &[&Identifier],
) -> Vec<Finding> {
    if !contents.issue_file {
        return Vec::new();
    }
    let details = format!("{} present in {}", ISSUE_FILE, dir_label);
    let mut owners: Vec<String> = contents.identifiers().iter().map(|id| id.to_string()).collect();
    if owners.is_empty() {
        owners = missing.iter().map(|id| id.to_string()).collect();
    }
    if owners.is_empty() {
        owners.push(format!("{}/{}", dir_label, ISSUE_FILE));
    }
    owners
        .into_iter()
        .map(|owner| Finding::new(owner, ErrorKind::IssueFile, details.clone()))
        .collect()
}
