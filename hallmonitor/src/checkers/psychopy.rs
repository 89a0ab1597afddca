//! Psychopy task output consistency
//!
//! The task log records where psychopy saved its outputs ("saved data to
//! ..."); after a rename those paths go stale. The trial `.csv` also carries
//! the subject number typed in at the start of the task, which must agree
//! with the filename.

use super::{CheckFinding, CheckInput, DatatypeChecker};
use hallmonitor_common::ErrorKind;
use std::collections::BTreeSet;

const SAVED_MARKER: &str = "saved data to";

pub struct PsychopyChecker {
    id_column: String,
}

impl PsychopyChecker {
    pub fn new(id_column: impl Into<String>) -> Self {
        Self {
            id_column: id_column.into(),
        }
    }

    fn check_log(&self, input: &CheckInput<'_>, log: &str, findings: &mut Vec<CheckFinding>) {
        let text = match std::fs::read(input.path(log)) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                findings.push(CheckFinding::new(
                    ErrorKind::PsychopyError,
                    format!("cannot read {}: {}", log, e),
                ));
                return;
            }
        };
        let saved = saved_file_names(&text);

        for ext in [".csv", ".psydat"] {
            let Some(actual) = input.find(ext) else {
                continue;
            };
            let declared: Vec<&String> = saved.iter().filter(|n| n.ends_with(ext)).collect();
            if declared.is_empty() {
                findings.push(CheckFinding::new(
                    ErrorKind::PsychopyError,
                    format!("{} does not record saving a {} file", log, ext),
                ));
            } else if !declared.iter().any(|n| n.as_str() == actual) {
                let names: Vec<&str> = declared.iter().map(|n| n.as_str()).collect();
                findings.push(CheckFinding::new(
                    ErrorKind::PsychopyError,
                    format!("{} records saving {} but found {}", log, names.join(", "), actual),
                ));
            }
        }
    }

    fn check_csv(&self, input: &CheckInput<'_>, csv_file: &str, findings: &mut Vec<CheckFinding>) {
        let mut error = |details: String| findings.push(CheckFinding::new(ErrorKind::PsychopyError, details));

        let mut rdr = match csv::ReaderBuilder::new().flexible(true).from_path(input.path(csv_file)) {
            Ok(rdr) => rdr,
            Err(e) => return error(format!("cannot read {}: {}", csv_file, e)),
        };
        let column = match rdr.headers() {
            Ok(headers) => headers.iter().position(|h| h.trim() == self.id_column),
            Err(e) => return error(format!("cannot read header of {}: {}", csv_file, e)),
        };
        let Some(column) = column else {
            return error(format!("{} has no {:?} column", csv_file, self.id_column));
        };

        let subject = input.identifier.subject;
        let mut mismatched = BTreeSet::new();
        for record in rdr.records() {
            let record = match record {
                Ok(record) => record,
                Err(e) => return error(format!("malformed row in {}: {}", csv_file, e)),
            };
            let value = record.get(column).map(str::trim).unwrap_or("");
            if !value.is_empty() && !same_subject(value, subject) {
                mismatched.insert(value.to_string());
            }
        }
        for value in mismatched {
            error(format!(
                "{} column {:?} holds {} but the file is named for subject {}",
                csv_file, self.id_column, value, subject
            ));
        }
    }
}

/// Basenames of every "saved data to" path in a log
fn saved_file_names(log: &str) -> Vec<String> {
    log.lines()
        .filter_map(|line| {
            let pos = line.to_ascii_lowercase().find(SAVED_MARKER)?;
            let path = line[pos + SAVED_MARKER.len()..]
                .trim()
                .trim_end_matches('.')
                .trim_matches(|c| c == '\'' || c == '"');
            let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

/// Spreadsheet exports sometimes render the id as `3000001.0`
fn same_subject(value: &str, subject: u64) -> bool {
    value.parse::<u64>().map(|v| v == subject).unwrap_or(false)
        || value
            .strip_suffix(".0")
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v == subject)
            .unwrap_or(false)
}

impl DatatypeChecker for PsychopyChecker {
    fn data_type(&self) -> &str {
        "psychopy"
    }

    fn check(&self, input: &CheckInput<'_>) -> Vec<CheckFinding> {
        let mut findings = Vec::new();
        if let Some(log) = input.find(".log") {
            self.check_log(input, log, &mut findings);
        }
        if let Some(csv_file) = input.find(".csv") {
            self.check_csv(input, csv_file, &mut findings);
        }
        findings
    }
}
