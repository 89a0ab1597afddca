//! # hallmonitor common library
//!
//! Shared code for the hallmonitor data-tree auditor:
//! - Identifier grammar (filenames, exception markers)
//! - Data dictionary loading and drift detection
//! - Error/pass records and the persisted lifecycle tables
//! - Configuration loading

pub mod config;
pub mod datadict;
pub mod error;
pub mod identifier;
pub mod records;
pub mod tables;
pub mod time;

pub use datadict::DataDictionary;
pub use error::{Error, Result};
pub use identifier::{Identifier, SessionRunEvent};
pub use records::{ErrorKind, ErrorRecord, RecordStamp};
