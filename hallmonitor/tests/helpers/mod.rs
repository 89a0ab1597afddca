//! Dataset fixture builder shared by the integration tests

#![allow(dead_code)]

use hallmonitor::checkers::CheckerRegistry;
use hallmonitor::{DatasetContext, DatasetPaths, TreeKind, ValidationReport, Validator};
use hallmonitor_common::{DataDictionary, ErrorKind, ErrorRecord, Identifier, RecordStamp};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const SUBJECT: u64 = 3000001;

/// One psychopy task collected at three sessions
pub const PSYCHOPY_DICT: &str = "\
variable,dataType,description,allowedSuffix,expectedFileExt,allowedValues,provenance
id,id,participant id,NA,NA,\"[3000000,3009999]\",NA
flanker_psychopy,psychopy,flanker task,\"s1_r1_e1, s2_r1_e1, s3_r1_e1\",\".csv, .log, .psydat\",NA,NA
";

/// Psychopy task plus resting EEG at session 1
pub const EEG_DICT: &str = "\
variable,dataType,description,allowedSuffix,expectedFileExt,allowedValues,provenance
id,id,participant id,NA,NA,\"[3000000,3009999]\",NA
flanker_psychopy,psychopy,flanker task,\"s1_r1_e1, s2_r1_e1\",\".csv, .log, .psydat\",NA,NA
rest_eeg,eeg,resting eeg,s1_r1_e1,\".eeg, .vmrk, .vhdr\",NA,NA
";

/// Two interchangeable task versions behind a combination row
pub const COMBINATION_DICT: &str = "\
variable,dataType,description,allowedSuffix,expectedFileExt,allowedValues,provenance
id,id,participant id,NA,NA,\"[3000000,3009999]\",NA
flanker_psychopy,psychopy,flanker task,s1_r1_e1,\".csv, .log, .psydat\",NA,NA
alert_a_psychopy,psychopy,alert version a,s1_r1_e1,.csv,NA,NA
alert_b_psychopy,psychopy,alert version b,s1_r1_e1,.csv,NA,NA
alert,combination,alert task,s1_r1_e1,NA,NA,\"variables: \"\"alert_a_psychopy\"\",\"\"alert_b_psychopy\"\"\"
";

pub struct Dataset {
    pub temp: TempDir,
    pub paths: DatasetPaths,
}

impl Dataset {
    /// Dataset with `dict` installed and snapshotted
    pub fn new(dict: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let paths = DatasetPaths::new(temp.path());
        fs::create_dir_all(paths.datadict.parent().unwrap()).unwrap();
        fs::write(&paths.datadict, dict).unwrap();
        fs::write(&paths.datadict_latest, dict).unwrap();
        Self { temp, paths }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn context(&self) -> DatasetContext {
        let dict = DataDictionary::load(&self.paths.datadict).unwrap();
        DatasetContext::new(self.paths.clone(), dict)
    }

    /// Canonical directory of an identifier in `tree`, created
    pub fn dir(&self, tree: TreeKind, identifier: &Identifier, data_type: &str) -> PathBuf {
        let dir = tree.identifier_dir(&self.paths, identifier, data_type);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn write(&self, dir: &Path, name: &str, contents: impl AsRef<[u8]>) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    /// Write a consistent `.csv`/`.log`/`.psydat` task into its canonical directory
    pub fn psychopy_task(&self, tree: TreeKind, identifier: &Identifier) -> PathBuf {
        let dir = self.dir(tree, identifier, "psychopy");
        self.psychopy_task_in(&dir, identifier);
        dir
    }

    /// Same as [`Dataset::psychopy_task`] but into an arbitrary directory
    pub fn psychopy_task_in(&self, dir: &Path, identifier: &Identifier) {
        let stem = identifier.to_string();
        self.write(
            dir,
            &format!("{}.csv", stem),
            format!("trial,id,rt\n0,{},0.51\n1,{},0.47\n", identifier.subject, identifier.subject),
        );
        self.write(
            dir,
            &format!("{}.log", stem),
            format!(
                "10.2 \tEXP \tsaved data to '/lab/data/{stem}.csv'\n\
                 10.3 \tEXP \tsaved data to '/lab/data/{stem}.psydat'\n",
                stem = stem
            ),
        );
        self.write(dir, &format!("{}.psydat", stem), b"psydat");
    }

    /// Single-file psychopy variable (`.csv` only)
    pub fn psychopy_csv(&self, tree: TreeKind, identifier: &Identifier) -> PathBuf {
        let dir = self.dir(tree, identifier, "psychopy");
        self.write(
            &dir,
            &identifier.file_name(".csv"),
            format!("trial,id\n0,{}\n", identifier.subject),
        );
        dir
    }

    /// Write a consistent BrainVision recording
    pub fn eeg_recording(&self, tree: TreeKind, identifier: &Identifier) -> PathBuf {
        let dir = self.dir(tree, identifier, "eeg");
        let stem = identifier.to_string();
        self.write(&dir, &format!("{}.eeg", stem), b"\x01\x02\x03");
        self.write(
            &dir,
            &format!("{}.vhdr", stem),
            format!(
                "Brain Vision Data Exchange Header File Version 1.0\n\
                 [Common Infos]\nDataFile={stem}.eeg\nMarkerFile={stem}.vmrk\n",
                stem = stem
            ),
        );
        self.write(
            &dir,
            &format!("{}.vmrk", stem),
            format!("Brain Vision Data Exchange Marker File, Version 1.0\n[Common Infos]\nDataFile={}.eeg\n", stem),
        );
        dir
    }

    pub fn validate(&self, tree: TreeKind) -> ValidationReport {
        self.validate_with(&self.context(), tree)
    }

    pub fn validate_with(&self, ctx: &DatasetContext, tree: TreeKind) -> ValidationReport {
        let checkers = CheckerRegistry::default();
        Validator::new(ctx, tree, &checkers)
            .validate(&RecordStamp::new("tester"))
            .unwrap()
    }
}

pub fn id(text: &str) -> Identifier {
    text.parse().unwrap()
}

/// `sub-3000001_<variable>_<sre>`
pub fn subject_id(variable: &str, sre: &str) -> Identifier {
    id(&format!("sub-{}_{}_{}", SUBJECT, variable, sre))
}

/// Error records as (identifier, kind) pairs
pub fn errors(report: &ValidationReport) -> Vec<(String, ErrorKind)> {
    report
        .errors()
        .map(|r| (r.identifier.clone(), r.error_type.unwrap()))
        .collect()
}

pub fn errors_of_kind<'a>(report: &'a ValidationReport, kind: ErrorKind) -> Vec<&'a ErrorRecord> {
    report.errors().filter(|r| r.error_type == Some(kind)).collect()
}
