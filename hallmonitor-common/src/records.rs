//! Error/pass records and lifecycle table rows
//!
//! Every validation outcome is an [`ErrorRecord`]. The taxonomy is closed:
//! adding a kind means adding an [`ErrorKind`] variant and its persisted label.

use crate::time::record_datetime;
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Error taxonomy, persisted by label in the `errorType` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    MissingIdentifier,
    CombinationVariable,
    ImproperVariableName,
    ImproperDirectoryStructure,
    EmptyFile,
    ImproperExceptionFiles,
    NamingError,
    IssueFile,
    MisplacedFile,
    MissingFile,
    UnexpectedFile,
    EegError,
    PsychopyError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 13] = [
        ErrorKind::MissingIdentifier,
        ErrorKind::CombinationVariable,
        ErrorKind::ImproperVariableName,
        ErrorKind::ImproperDirectoryStructure,
        ErrorKind::EmptyFile,
        ErrorKind::ImproperExceptionFiles,
        ErrorKind::NamingError,
        ErrorKind::IssueFile,
        ErrorKind::MisplacedFile,
        ErrorKind::MissingFile,
        ErrorKind::UnexpectedFile,
        ErrorKind::EegError,
        ErrorKind::PsychopyError,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::MissingIdentifier => "Missing identifier",
            ErrorKind::CombinationVariable => "Combination variable error",
            ErrorKind::ImproperVariableName => "Improper variable name",
            ErrorKind::ImproperDirectoryStructure => "Improper directory structure",
            ErrorKind::EmptyFile => "Empty file",
            ErrorKind::ImproperExceptionFiles => "Improper exception files",
            ErrorKind::NamingError => "Naming error",
            ErrorKind::IssueFile => "Issue file",
            ErrorKind::MisplacedFile => "Misplaced file",
            ErrorKind::MissingFile => "Missing file",
            ErrorKind::UnexpectedFile => "Unexpected file",
            ErrorKind::EegError => "EEG error",
            ErrorKind::PsychopyError => "Psychopy error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // Older tables used "Improper file name" for naming errors
        if s == "Improper file name" {
            return Ok(ErrorKind::NamingError);
        }
        ErrorKind::ALL
            .iter()
            .copied()
            .find(|k| k.label() == s)
            .ok_or_else(|| format!("unknown error type {:?}", s))
    }
}

/// `NA` in the `errorType` column marks a pass record
mod error_type {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<ErrorKind>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value.map(|k| k.label()).unwrap_or("NA"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<ErrorKind>, D::Error> {
        let text = String::deserialize(d)?;
        match text.trim() {
            "" | "NA" => Ok(None),
            other => other.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}

/// `0`/`1` flags, tolerant of spreadsheet edits (`TRUE`, `1.0`)
mod flag {
    use super::*;

    pub fn serialize<S: Serializer>(value: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        let text = String::deserialize(d)?;
        match text.trim().to_ascii_lowercase().as_str() {
            "1" | "1.0" | "true" => Ok(true),
            "0" | "0.0" | "false" | "" | "na" => Ok(false),
            other => Err(serde::de::Error::custom(format!("bad flag {:?}", other))),
        }
    }
}

// ============================================================================
// Error / pass records
// ============================================================================

/// One validation outcome row of pending-files / pending-errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    #[serde(with = "record_datetime")]
    pub datetime: NaiveDateTime,
    pub user: String,
    /// Identifier string, or the offending filename when it does not parse
    pub identifier: String,
    #[serde(rename = "passRaw", with = "flag")]
    pub pass_raw: bool,
    #[serde(rename = "errorType", with = "error_type")]
    pub error_type: Option<ErrorKind>,
    #[serde(rename = "errorDetails")]
    pub error_details: String,
}

impl ErrorRecord {
    pub fn error(
        stamp: &RecordStamp,
        identifier: impl Into<String>,
        kind: ErrorKind,
        details: impl Into<String>,
    ) -> Self {
        Self {
            datetime: stamp.datetime,
            user: stamp.user.clone(),
            identifier: identifier.into(),
            pass_raw: false,
            error_type: Some(kind),
            error_details: details.into(),
        }
    }

    pub fn pass(stamp: &RecordStamp, identifier: impl Into<String>) -> Self {
        Self {
            datetime: stamp.datetime,
            user: stamp.user.clone(),
            identifier: identifier.into(),
            pass_raw: true,
            error_type: None,
            error_details: "NA".to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_type.is_some()
    }

    /// Comparison key excluding the datetime and operator
    pub fn content_key(&self) -> (String, bool, Option<ErrorKind>, String) {
        (
            self.identifier.clone(),
            self.pass_raw,
            self.error_type,
            self.error_details.clone(),
        )
    }
}

/// Who and when, shared by every row written in one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordStamp {
    pub datetime: NaiveDateTime,
    pub user: String,
}

impl RecordStamp {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            datetime: crate::time::now(),
            user: user.into(),
        }
    }
}

// ============================================================================
// Lifecycle tables
// ============================================================================

/// Row of `validated-file-record.csv`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedFileEntry {
    #[serde(with = "record_datetime")]
    pub datetime: NaiveDateTime,
    pub user: String,
    pub identifier: String,
}

/// Row of `qa-checklist.csv`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaChecklistEntry {
    pub identifier: String,
    #[serde(with = "record_datetime")]
    pub datetime: NaiveDateTime,
    pub user: String,
    #[serde(with = "flag")]
    pub qa: bool,
    #[serde(rename = "localMove", with = "flag")]
    pub local_move: bool,
}

impl QaChecklistEntry {
    /// Both manual sign-offs present
    pub fn is_signed_off(&self) -> bool {
        self.qa && self.local_move
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_labels_parse_back() {
        for kind in ErrorKind::ALL {
            assert_eq!(kind.label().parse::<ErrorKind>().unwrap(), kind);
        }
        assert_eq!(
            "Improper file name".parse::<ErrorKind>().unwrap(),
            ErrorKind::NamingError
        );
        assert!("Bogus".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_pass_record_has_no_error_type() {
        let stamp = RecordStamp::new("tester");
        let pass = ErrorRecord::pass(&stamp, "sub-1_a_s1_r1_e1");
        assert!(pass.pass_raw);
        assert!(!pass.is_error());

        let err = ErrorRecord::error(&stamp, "sub-1_a_s1_r1_e1", ErrorKind::EmptyFile, "x");
        assert!(!err.pass_raw);
        assert!(err.is_error());
    }

    #[test]
    fn test_checklist_sign_off_needs_both_flags() {
        let entry = QaChecklistEntry {
            identifier: "sub-1_a_s1_r1_e1".to_string(),
            datetime: crate::time::now(),
            user: "tester".to_string(),
            qa: true,
            local_move: false,
        };
        assert!(!entry.is_signed_off());
        assert!(QaChecklistEntry {
            local_move: true,
            ..entry
        }
        .is_signed_off());
    }
}
