//! Data tree scanner
//!
//! Walks a data tree once and groups every regular file under its parent
//! directory. Directory contents are returned in a stable (sorted) order so
//! that validation output is deterministic.
//!
//! Symbolic links are not followed. A tree with entries that cannot be read
//! fails the scan, since files hidden behind them could never be reported.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// Scanner errors
#[derive(Debug, Error)]
pub enum ScanError {
    /// Path exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Part of the tree could not be read
    #[error("{count} unreadable entries under {root} (first: {first})")]
    Unreadable {
        root: PathBuf,
        count: usize,
        first: String,
    },
}

/// A regular file found in the tree
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScannedFile {
    pub name: String,
    pub size: u64,
}

/// Files of a tree, grouped by containing directory
#[derive(Debug, Clone, Default)]
pub struct TreeScan {
    pub dirs: BTreeMap<PathBuf, Vec<ScannedFile>>,
}

impl TreeScan {
    pub fn file_count(&self) -> usize {
        self.dirs.values().map(Vec::len).sum()
    }
}

/// Data tree scanner
pub struct TreeScanner {
    ignore_patterns: Vec<String>,
}

impl TreeScanner {
    /// Create a scanner with default ignore patterns
    ///
    /// Ignores OS clutter (.DS_Store, Thumbs.db), VCS directories, REDCap
    /// export folders and staging directories left by interrupted transfers.
    pub fn new() -> Self {
        Self {
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                ".git".to_string(),
                ".svn".to_string(),
                crate::transfer::STAGING_PREFIX.to_string(),
            ],
        }
    }

    /// Scan a tree; a missing root is an empty tree
    pub fn scan(&self, root: &Path) -> Result<TreeScan, ScanError> {
        let mut scan = TreeScan::default();
        if !root.exists() {
            tracing::debug!("Tree {} does not exist, nothing to scan", root.display());
            return Ok(scan);
        }
        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }

        let mut unreadable: Vec<String> = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| self.should_process_entry(e));

        for entry in walker {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_symlink() {
                        tracing::warn!("Skipping symbolic link {}", entry.path().display());
                        continue;
                    }
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let size = match entry.metadata() {
                        Ok(meta) => meta.len(),
                        Err(e) => {
                            tracing::warn!("Cannot stat {}: {}", entry.path().display(), e);
                            unreadable.push(e.to_string());
                            continue;
                        }
                    };
                    let dir = entry
                        .path()
                        .parent()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| root.to_path_buf());
                    scan.dirs.entry(dir).or_default().push(ScannedFile {
                        name: entry.file_name().to_string_lossy().into_owned(),
                        size,
                    });
                }
                Err(e) => {
                    tracing::warn!("Error accessing entry: {}", e);
                    unreadable.push(e.to_string());
                }
            }
        }

        if let Some(first) = unreadable.first() {
            return Err(ScanError::Unreadable {
                root: root.to_path_buf(),
                count: unreadable.len(),
                first: first.clone(),
            });
        }

        tracing::debug!(
            "Scanned {}: {} files in {} directories",
            root.display(),
            scan.file_count(),
            scan.dirs.len()
        );
        Ok(scan)
    }

    fn should_process_entry(&self, entry: &DirEntry) -> bool {
        let file_name = entry.file_name().to_string_lossy();

        for pattern in &self.ignore_patterns {
            if file_name.contains(pattern.as_str()) {
                return false;
            }
        }

        // REDCap exports sit beside the datatype folders of a session
        if entry.depth() == 2 && entry.file_type().is_dir() && file_name == "redcap" {
            return false;
        }

        true
    }
}

impl Default for TreeScanner {
    fn default() -> Self {
        Self::new()
    }
}
