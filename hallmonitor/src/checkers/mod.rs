//! Datatype-specific content checks
//!
//! A checker inspects the files of one identifier after the generic naming
//! and presence checks have run. Checkers never raise on missing files
//! (presence is reported elsewhere) and report every problem as a
//! [`CheckFinding`] rather than an error.
//!
//! New datatypes plug in by implementing [`DatatypeChecker`] and registering
//! with a [`CheckerRegistry`].

mod eeg;
mod psychopy;

pub use eeg::EegChecker;
pub use psychopy::PsychopyChecker;

use hallmonitor_common::config::PsychopyConfig;
use hallmonitor_common::{ErrorKind, Identifier};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ============================================================================
// Checker trait
// ============================================================================

/// Files of one identifier handed to a checker
#[derive(Debug, Clone, Copy)]
pub struct CheckInput<'a> {
    pub identifier: &'a Identifier,
    pub dir: &'a Path,
    /// Data filenames of the identifier found in `dir`
    pub files: &'a [String],
}

impl<'a> CheckInput<'a> {
    /// First file whose name ends with `ext`
    pub fn find(&self, ext: &str) -> Option<&'a str> {
        self.files.iter().map(String::as_str).find(|f| f.ends_with(ext))
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }
}

/// One content problem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFinding {
    pub kind: ErrorKind,
    pub details: String,
}

impl CheckFinding {
    pub fn new(kind: ErrorKind, details: impl Into<String>) -> Self {
        Self {
            kind,
            details: details.into(),
        }
    }
}

/// Content check for one datatype
pub trait DatatypeChecker: Send + Sync {
    /// Datatype name as it appears in the data dictionary
    fn data_type(&self) -> &str;

    fn check(&self, input: &CheckInput<'_>) -> Vec<CheckFinding>;
}

// ============================================================================
// Registry
// ============================================================================

/// Datatype name → checker
pub struct CheckerRegistry {
    checkers: HashMap<String, Box<dyn DatatypeChecker>>,
}

impl CheckerRegistry {
    pub fn empty() -> Self {
        Self {
            checkers: HashMap::new(),
        }
    }

    /// Registry with the built-in EEG and psychopy checkers
    pub fn with_defaults(psychopy: &PsychopyConfig) -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(EegChecker));
        registry.register(Box::new(PsychopyChecker::new(psychopy.id_column.clone())));
        registry
    }

    /// Register a checker, replacing any previous one for its datatype
    pub fn register(&mut self, checker: Box<dyn DatatypeChecker>) {
        self.checkers.insert(checker.data_type().to_string(), checker);
    }

    pub fn get(&self, data_type: &str) -> Option<&dyn DatatypeChecker> {
        self.checkers.get(data_type).map(|c| c.as_ref())
    }

    /// Run the checker for `data_type`, if any
    pub fn check(&self, data_type: &str, input: &CheckInput<'_>) -> Vec<CheckFinding> {
        self.get(data_type).map(|c| c.check(input)).unwrap_or_default()
    }
}

impl Default for CheckerRegistry {
    fn default() -> Self {
        Self::with_defaults(&PsychopyConfig::default())
    }
}
