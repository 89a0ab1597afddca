//! hallmonitor - data-tree auditor for study datasets
//!
//! Validates the raw and checked data trees of a dataset against its data
//! dictionary, records every problem as an error row, and walks raw-validated
//! identifiers through manual QA into the checked tree.

pub mod checkers;
pub mod context;
pub mod expectations;
pub mod layout;
pub mod lock;
pub mod monitor;
pub mod qa;
pub mod redcap;
pub mod scanner;
pub mod tracker;
pub mod transfer;
pub mod validator;

pub use context::{DatasetContext, DatasetPaths};
pub use layout::TreeKind;
pub use monitor::{RunOptions, RunSummary, Scope};
pub use validator::{ValidationReport, Validator};
