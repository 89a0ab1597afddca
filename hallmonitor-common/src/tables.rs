//! Flat CSV tables that double as durable run state
//!
//! Tables are read in full and rewritten whole. Writes go to a sibling
//! temporary file that is renamed over the target, so a crash never leaves a
//! half-written table behind.

use crate::records::{ErrorRecord, QaChecklistEntry, RecordStamp, ValidatedFileEntry};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const PENDING_FILES_PREFIX: &str = "pending-files-";
const PENDING_ERRORS_PREFIX: &str = "pending-errors-";

/// Read every row of a CSV table
pub fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut rdr = csv::Reader::from_path(path).map_err(|e| table_error(path, e))?;
    let rows = rdr
        .deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .map_err(|e| table_error(path, e))?;
    debug!(path = %path.display(), rows = rows.len(), "Read table");
    Ok(rows)
}

/// Replace a CSV table with `rows`
pub fn write_table<T: Serialize>(path: &Path, rows: &[T], headers: &[&str]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    {
        // Headers are written explicitly so empty tables still carry them
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&tmp)
            .map_err(|e| table_error(path, e))?;
        wtr.write_record(headers).map_err(|e| table_error(path, e))?;
        for row in rows {
            wtr.serialize(row).map_err(|e| table_error(path, e))?;
        }
        wtr.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    debug!(path = %path.display(), rows = rows.len(), "Wrote table");
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn table_error(path: &Path, err: csv::Error) -> Error {
    Error::Table {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

// ============================================================================
// Pending files / errors
// ============================================================================

pub const ERROR_RECORD_HEADERS: [&str; 6] = [
    "datetime",
    "user",
    "identifier",
    "passRaw",
    "errorType",
    "errorDetails",
];

/// Paths written by [`write_pending`]
#[derive(Debug, Clone)]
pub struct PendingPaths {
    pub files: PathBuf,
    pub errors: PathBuf,
}

/// Length of a `file_stamp`, `YYYY-MM-DD_HH-MM-SS`
const FILE_STAMP_LEN: usize = 19;

fn pending_paths(dir: &Path, file_stamp: &str, seq: u32) -> PendingPaths {
    let suffix = match seq {
        0 => format!("{}.csv", file_stamp),
        n => format!("{}-{}.csv", file_stamp, n),
    };
    PendingPaths {
        files: dir.join(format!("{}{}", PENDING_FILES_PREFIX, suffix)),
        errors: dir.join(format!("{}{}", PENDING_ERRORS_PREFIX, suffix)),
    }
}

/// Write one run's records: every record to pending-files, errors only to
/// pending-errors
///
/// A second run within the same second gets a `-<n>` suffix instead of
/// replacing the earlier tables.
pub fn write_pending(dir: &Path, stamp: &RecordStamp, records: &[ErrorRecord]) -> Result<PendingPaths> {
    let file_stamp = crate::time::file_stamp(&stamp.datetime);
    let mut seq = 0;
    let paths = loop {
        let candidate = pending_paths(dir, &file_stamp, seq);
        if !candidate.files.exists() && !candidate.errors.exists() {
            break candidate;
        }
        seq += 1;
    };

    let errors: Vec<&ErrorRecord> = records.iter().filter(|r| r.is_error()).collect();
    write_table(&paths.files, records, &ERROR_RECORD_HEADERS)?;
    write_table(&paths.errors, &errors, &ERROR_RECORD_HEADERS)?;

    info!(
        pending_files = %paths.files.display(),
        records = records.len(),
        errors = errors.len(),
        "Wrote pending tables"
    );
    Ok(paths)
}

/// Timestamp and same-second sequence of a pending-files table name
fn pending_files_key(name: &str) -> Option<(&str, u32)> {
    let rest = name.strip_prefix(PENDING_FILES_PREFIX)?.strip_suffix(".csv")?;
    let stamp = rest.get(..FILE_STAMP_LEN)?;
    let seq = match rest.get(FILE_STAMP_LEN..)? {
        "" => 0,
        tail => tail.strip_prefix('-')?.parse().ok()?,
    };
    Some((stamp, seq))
}

/// Most recent `pending-files-<stamp>[-<n>].csv` in `dir`
pub fn latest_pending_files(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut latest: Option<((String, u32), PathBuf)> = None;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        // Stamps sort lexicographically in chronological order
        let Some((stamp, seq)) = pending_files_key(name) else {
            continue;
        };
        let key = (stamp.to_string(), seq);
        if latest.as_ref().map_or(true, |(best, _)| key > *best) {
            latest = Some((key, path));
        }
    }
    Ok(latest.map(|(_, path)| path))
}

// ============================================================================
// QA checklist
// ============================================================================

pub const QA_CHECKLIST_HEADERS: [&str; 5] = ["identifier", "datetime", "user", "qa", "localMove"];

/// `qa-checklist.csv`: identifiers awaiting manual review
#[derive(Debug, Clone, Default)]
pub struct QaChecklist {
    entries: Vec<QaChecklistEntry>,
}

impl QaChecklist {
    /// Load the checklist; a missing file is an empty checklist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Ok(Self {
            entries: read_table(path)?,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_table(path, &self.entries, &QA_CHECKLIST_HEADERS)
    }

    pub fn entries(&self) -> &[QaChecklistEntry] {
        &self.entries
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.iter().any(|e| e.identifier == identifier)
    }

    /// Add a fresh `qa=0, localMove=0` row
    pub fn add(&mut self, stamp: &RecordStamp, identifier: impl Into<String>) {
        self.entries.push(QaChecklistEntry {
            identifier: identifier.into(),
            datetime: stamp.datetime,
            user: stamp.user.clone(),
            qa: false,
            local_move: false,
        });
    }

    pub fn remove(&mut self, identifier: &str) {
        self.entries.retain(|e| e.identifier != identifier);
    }

    /// Mutable access for operators' sign-off tooling and tests
    pub fn get_mut(&mut self, identifier: &str) -> Option<&mut QaChecklistEntry> {
        self.entries.iter_mut().find(|e| e.identifier == identifier)
    }
}

// ============================================================================
// Validated file record
// ============================================================================

pub const VALIDATED_RECORD_HEADERS: [&str; 3] = ["datetime", "user", "identifier"];

/// `validated-file-record.csv`: identifiers that passed raw validation and QA
#[derive(Debug, Clone, Default)]
pub struct ValidatedFileRecord {
    entries: Vec<ValidatedFileEntry>,
}

impl ValidatedFileRecord {
    /// Load the record; a missing file is an empty record
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Ok(Self {
            entries: read_table(path)?,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_table(path, &self.entries, &VALIDATED_RECORD_HEADERS)
    }

    pub fn entries(&self) -> &[ValidatedFileEntry] {
        &self.entries
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.iter().any(|e| e.identifier == identifier)
    }

    pub fn identifiers(&self) -> BTreeSet<String> {
        self.entries.iter().map(|e| e.identifier.clone()).collect()
    }

    pub fn add(&mut self, stamp: &RecordStamp, identifier: impl Into<String>) {
        let identifier = identifier.into();
        if !self.contains(&identifier) {
            self.entries.push(ValidatedFileEntry {
                datetime: stamp.datetime,
                user: stamp.user.clone(),
                identifier,
            });
        }
    }

    /// Demote identifiers; returns how many rows were removed
    pub fn remove_all(&mut self, identifiers: &BTreeSet<String>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !identifiers.contains(&e.identifier));
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_pending_tables_split_errors() {
        let dir = TempDir::new().unwrap();
        let stamp = RecordStamp::new("tester");
        let records = vec![
            ErrorRecord::pass(&stamp, "sub-1_a_s1_r1_e1"),
            ErrorRecord::error(&stamp, "sub-1_b_s1_r1_e1", ErrorKind::MissingFile, "missing x"),
        ];
        let paths = write_pending(dir.path(), &stamp, &records).unwrap();

        let files: Vec<ErrorRecord> = read_table(&paths.files).unwrap();
        let errors: Vec<ErrorRecord> = read_table(&paths.errors).unwrap();
        assert_eq!(files, records);
        assert_eq!(errors, vec![records[1].clone()]);
        assert_eq!(latest_pending_files(dir.path()).unwrap(), Some(paths.files));
    }

    #[test]
    fn test_latest_pending_files_picks_newest() {
        let dir = TempDir::new().unwrap();
        for stamp in ["2024-01-01_00-00-00", "2024-03-01_00-00-00", "2024-02-01_00-00-00"] {
            std::fs::write(
                dir.path().join(format!("pending-files-{}.csv", stamp)),
                ERROR_RECORD_HEADERS.join(","),
            )
            .unwrap();
        }
        std::fs::write(dir.path().join("pending-errors-2025-01-01_00-00-00.csv"), "").unwrap();
        let latest = latest_pending_files(dir.path()).unwrap().unwrap();
        assert!(latest.ends_with("pending-files-2024-03-01_00-00-00.csv"));
    }

    #[test]
    fn test_same_second_runs_keep_both_tables() {
        let dir = TempDir::new().unwrap();
        let stamp = RecordStamp::new("tester");
        let first = vec![ErrorRecord::pass(&stamp, "sub-1_a_s1_r1_e1")];
        let second = vec![ErrorRecord::pass(&stamp, "sub-2_a_s1_r1_e1")];

        let a = write_pending(dir.path(), &stamp, &first).unwrap();
        let b = write_pending(dir.path(), &stamp, &second).unwrap();
        assert_ne!(a.files, b.files);
        assert_ne!(a.errors, b.errors);
        assert_eq!(read_table::<ErrorRecord>(&a.files).unwrap(), first);
        assert_eq!(read_table::<ErrorRecord>(&b.files).unwrap(), second);

        let c = write_pending(dir.path(), &stamp, &first).unwrap();
        assert!(c.files.to_string_lossy().ends_with("-2.csv"));
        assert_eq!(latest_pending_files(dir.path()).unwrap(), Some(c.files));
    }

    #[test]
    fn test_sequence_orders_numerically() {
        assert_eq!(
            pending_files_key("pending-files-2024-03-01_00-00-00.csv"),
            Some(("2024-03-01_00-00-00", 0))
        );
        assert!(
            pending_files_key("pending-files-2024-03-01_00-00-00-10.csv")
                > pending_files_key("pending-files-2024-03-01_00-00-00-9.csv")
        );
        assert!(
            pending_files_key("pending-files-2024-03-01_00-00-01.csv")
                > pending_files_key("pending-files-2024-03-01_00-00-00-9.csv")
        );
        assert_eq!(pending_files_key("pending-files-2024-03-01_00-00-00x.csv"), None);
        assert_eq!(pending_files_key("pending-errors-2024-03-01_00-00-00.csv"), None);
    }

    #[test]
    fn test_empty_table_keeps_headers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("qa-checklist.csv");
        QaChecklist::default().save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim(), "identifier,datetime,user,qa,localMove");
        assert!(QaChecklist::load(&path).unwrap().entries().is_empty());
    }

    #[test]
    fn test_checklist_accepts_spreadsheet_flags() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("qa-checklist.csv");
        std::fs::write(
            &path,
            "identifier,datetime,user,qa,localMove\n\
             sub-1_a_s1_r1_e1,2024-01-01 10:00:00,ra,TRUE,1.0\n\
             sub-2_a_s1_r1_e1,2024-01-01 10:00:00,ra,1,0\n",
        )
        .unwrap();
        let checklist = QaChecklist::load(&path).unwrap();
        assert!(checklist.entries()[0].is_signed_off());
        assert!(!checklist.entries()[1].is_signed_off());
    }

    #[test]
    fn test_unreadable_checklist_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("qa-checklist.csv");
        std::fs::write(&path, "identifier,datetime\nsub-1_a_s1_r1_e1,yesterday\n").unwrap();
        assert!(matches!(QaChecklist::load(&path), Err(Error::Table { .. })));
    }

    #[test]
    fn test_validated_record_demotion() {
        let stamp = RecordStamp::new("tester");
        let mut record = ValidatedFileRecord::default();
        record.add(&stamp, "a");
        record.add(&stamp, "b");
        record.add(&stamp, "a");
        assert_eq!(record.entries().len(), 2);
        let removed = record.remove_all(&["a".to_string()].into_iter().collect());
        assert_eq!(removed, 1);
        assert!(!record.contains("a"));
        assert!(record.contains("b"));
    }
}
