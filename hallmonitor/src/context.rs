//! Dataset paths and the immutable per-run context
//!
//! Everything the expectation engine and validator need is threaded through
//! [`DatasetContext`]; nothing re-reads the data dictionary mid-run.

use hallmonitor_common::DataDictionary;
use std::path::{Path, PathBuf};

/// Well-known locations inside a dataset
#[derive(Debug, Clone)]
pub struct DatasetPaths {
    pub root: PathBuf,
    pub raw: PathBuf,
    pub checked: PathBuf,
    pub pending_qa: PathBuf,
    pub data_monitoring: PathBuf,
    pub datadict: PathBuf,
    pub datadict_latest: PathBuf,
    pub pending: PathBuf,
    pub qa_checklist: PathBuf,
    pub validated_record: PathBuf,
    pub lock: PathBuf,
}

impl DatasetPaths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let sourcedata = root.join("sourcedata");
        let data_monitoring = root.join("data-monitoring");
        let dict_dir = data_monitoring.join("data-dictionary");
        let pending_qa = sourcedata.join("pending-qa");
        Self {
            raw: sourcedata.join("raw"),
            checked: sourcedata.join("checked"),
            qa_checklist: pending_qa.join("qa-checklist.csv"),
            pending_qa,
            datadict: dict_dir.join("central-tracker_datadict.csv"),
            datadict_latest: dict_dir.join("central-tracker_datadict_latest.csv"),
            pending: data_monitoring.join("pending"),
            validated_record: data_monitoring.join("validated-file-record.csv"),
            lock: data_monitoring.join(".hallmonitor.lock"),
            data_monitoring,
            root,
        }
    }

    /// Path relative to the dataset root, for error details
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

/// Loaded dataset state shared by every component of a run
#[derive(Debug, Clone)]
pub struct DatasetContext {
    pub paths: DatasetPaths,
    pub datadict: DataDictionary,
    /// Accept bare `deviation.txt`/`no-data.txt` in the checked tree
    pub legacy_exceptions: bool,
}

impl DatasetContext {
    pub fn new(paths: DatasetPaths, datadict: DataDictionary) -> Self {
        Self {
            paths,
            datadict,
            legacy_exceptions: false,
        }
    }

    pub fn with_legacy_exceptions(mut self, legacy: bool) -> Self {
        self.legacy_exceptions = legacy;
        self
    }
}
