//! BrainVision EEG consistency
//!
//! A recording is three files: the `.vhdr` header names its `.eeg` data and
//! `.vmrk` marker files, and the marker file names the data file again. A
//! renamed recording whose internal references were not rewritten cannot be
//! opened, so every reference must match the file actually on disk.

use super::{CheckFinding, CheckInput, DatatypeChecker};
use hallmonitor_common::ErrorKind;

pub struct EegChecker;

/// `Key=value` lookup, ignoring section headers and `;` comments
fn declared<'t>(text: &'t str, key: &str) -> Option<&'t str> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.starts_with(';') && !l.starts_with('['))
        .find_map(|l| {
            let (k, v) = l.split_once('=')?;
            (k.trim() == key).then(|| v.trim())
        })
}

impl EegChecker {
    fn check_reference(
        input: &CheckInput<'_>,
        findings: &mut Vec<CheckFinding>,
        source: &str,
        key: &str,
        ext: &str,
    ) {
        let text = match std::fs::read(input.path(source)) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                findings.push(CheckFinding::new(
                    ErrorKind::EegError,
                    format!("cannot read {}: {}", source, e),
                ));
                return;
            }
        };
        let Some(actual) = input.find(ext) else {
            return;
        };
        match declared(&text, key) {
            None => findings.push(CheckFinding::new(
                ErrorKind::EegError,
                format!("{} has no {}= entry", source, key),
            )),
            Some(name) if name != actual => findings.push(CheckFinding::new(
                ErrorKind::EegError,
                format!("{} declares {}={} but found {}", source, key, name, actual),
            )),
            Some(_) => {}
        }
    }
}

impl DatatypeChecker for EegChecker {
    fn data_type(&self) -> &str {
        "eeg"
    }

    fn check(&self, input: &CheckInput<'_>) -> Vec<CheckFinding> {
        let mut findings = Vec::new();
        if let Some(header) = input.find(".vhdr") {
            Self::check_reference(input, &mut findings, header, "DataFile", ".eeg");
            Self::check_reference(input, &mut findings, header, "MarkerFile", ".vmrk");
        }
        if let Some(marker) = input.find(".vmrk") {
            Self::check_reference(input, &mut findings, marker, "DataFile", ".eeg");
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hallmonitor_common::Identifier;
    use std::fs;
    use tempfile::TempDir;

    const STEM: &str = "sub-1_rest_eeg_s1_r1_e1";

    fn write_recording(dir: &std::path::Path, data_ref: &str, marker_ref: &str) -> Vec<String> {
        let files = vec![
            format!("{}.eeg", STEM),
            format!("{}.vhdr", STEM),
            format!("{}.vmrk", STEM),
        ];
        fs::write(dir.join(&files[0]), b"\x00\x01").unwrap();
        fs::write(
            dir.join(&files[1]),
            format!(
                "Brain Vision Data Exchange Header File Version 1.0\n\
                 ; comment\n\
                 [Common Infos]\n\
                 DataFile={}\n\
                 MarkerFile={}\n",
                data_ref, marker_ref
            ),
        )
        .unwrap();
        fs::write(
            dir.join(&files[2]),
            format!("[Common Infos]\nDataFile={}\n", data_ref),
        )
        .unwrap();
        files
    }

    fn run(dir: &std::path::Path, files: &[String]) -> Vec<CheckFinding> {
        let id: Identifier = STEM.parse().unwrap();
        EegChecker.check(&CheckInput {
            identifier: &id,
            dir,
            files,
        })
    }

    #[test]
    fn test_consistent_recording_passes() {
        let temp = TempDir::new().unwrap();
        let files = write_recording(
            temp.path(),
            &format!("{}.eeg", STEM),
            &format!("{}.vmrk", STEM),
        );
        assert!(run(temp.path(), &files).is_empty());
    }

    #[test]
    fn test_stale_references_are_reported() {
        let temp = TempDir::new().unwrap();
        let files = write_recording(temp.path(), "old_name.eeg", "old_name.vmrk");
        let findings = run(temp.path(), &files);
        // header DataFile, header MarkerFile, marker DataFile
        assert_eq!(findings.len(), 3);
        assert!(findings.iter().all(|f| f.kind == ErrorKind::EegError));
        assert!(findings[0].details.contains("DataFile=old_name.eeg"));
    }

    #[test]
    fn test_missing_companions_are_not_checked() {
        let temp = TempDir::new().unwrap();
        let files = write_recording(temp.path(), "old_name.eeg", "old_name.vmrk");
        // Only the header is part of the identifier's file set
        let findings = run(temp.path(), &files[1..2]);
        assert!(findings.is_empty());
    }
}
