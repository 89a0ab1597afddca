//! Common error types for hallmonitor
//!
//! Only fatal conditions live here. Per-identifier validation problems are
//! data ([`crate::records::ErrorRecord`]), never raised.

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for hallmonitor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors that halt a run
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reading or writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data dictionary could not be read or is malformed
    #[error("Data dictionary error in {path}: {message}")]
    DataDictionary { path: PathBuf, message: String },

    /// Data dictionary changed since the last setup
    #[error("Data dictionary has changed since last setup ({path}); re-run with --setup after review:\n{diff}")]
    DataDictionaryDrift { path: PathBuf, diff: String },

    /// A persisted table is unreadable or has unexpected columns
    #[error("Table error in {path}: {message}")]
    Table { path: PathBuf, message: String },

    /// A REDCap export was found in the wrong session folder
    #[error("REDCap export {file} belongs to session {expected} but was found under {found}")]
    RedcapMisplaced {
        file: PathBuf,
        expected: String,
        found: String,
    },

    /// External tracker updater failed
    #[error("Tracker update failed: {0}")]
    Tracker(String),

    /// Another run holds the dataset lock
    #[error("Dataset is locked by another run: {0}")]
    DatasetLocked(PathBuf),

    /// Copy/move between lifecycle stages failed (already rolled back)
    #[error("Transfer of {identifier} failed: {message}")]
    Transfer { identifier: String, message: String },
}
