//! All-or-nothing file transfers between data trees
//!
//! Every file of an identifier is first copied into a uniquely named staging
//! directory beside the destination, then renamed into place. Sources are
//! only removed (for moves) once every file has landed. A failure before that
//! point rolls back whatever was placed, so an identifier never ends up split
//! between two trees.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Prefix of staging directories; the tree scanner skips them
pub const STAGING_PREFIX: &str = ".staging-";

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{identifier}: destination already holds {path}")]
    DestinationExists { identifier: String, path: PathBuf },

    #[error("{identifier}: {action} {path}: {source}")]
    Io {
        identifier: String,
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Copy keeps the sources; move removes them after the commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Copy,
    Move,
}

/// One file to transfer: source path and destination filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFile {
    pub source: PathBuf,
    pub dest_name: String,
}

/// Transfer one identifier's files into `dest_dir`
///
/// Returns the destination paths. Existing destination files are never
/// overwritten.
pub fn transfer_identifier(
    identifier: &str,
    files: &[TransferFile],
    dest_dir: &Path,
    mode: TransferMode,
) -> Result<Vec<PathBuf>, TransferError> {
    let io_err = |action: &'static str, path: &Path| {
        let identifier = identifier.to_string();
        let path = path.to_path_buf();
        move |source: io::Error| TransferError::Io {
            identifier,
            action,
            path,
            source,
        }
    };

    for file in files {
        let target = dest_dir.join(&file.dest_name);
        if target.exists() {
            return Err(TransferError::DestinationExists {
                identifier: identifier.to_string(),
                path: target,
            });
        }
    }

    fs::create_dir_all(dest_dir).map_err(io_err("create", dest_dir))?;
    let staging = dest_dir.join(format!("{}{}", STAGING_PREFIX, Uuid::new_v4()));
    fs::create_dir(&staging).map_err(io_err("create", &staging))?;

    let result = stage_and_commit(files, &staging, dest_dir, &io_err);
    // Staging is empty after a commit and disposable after a failure
    if let Err(e) = fs::remove_dir_all(&staging) {
        tracing::warn!("Cannot remove staging directory {}: {}", staging.display(), e);
    }
    let placed = result?;

    if mode == TransferMode::Move {
        for file in files {
            // The identifier is complete at the destination; a leftover source
            // is reported but does not undo the transfer
            if let Err(e) = fs::remove_file(&file.source) {
                tracing::warn!(
                    "{}: transferred but cannot remove source {}: {}",
                    identifier,
                    file.source.display(),
                    e
                );
            }
        }
    }

    tracing::debug!(
        identifier,
        files = placed.len(),
        dest = %dest_dir.display(),
        ?mode,
        "Transferred identifier"
    );
    Ok(placed)
}

fn stage_and_commit<F, M>(
    files: &[TransferFile],
    staging: &Path,
    dest_dir: &Path,
    io_err: &F,
) -> Result<Vec<PathBuf>, TransferError>
where
    F: Fn(&'static str, &Path) -> M,
    M: FnOnce(io::Error) -> TransferError,
{
    for file in files {
        fs::copy(&file.source, staging.join(&file.dest_name)).map_err(io_err("copy", &file.source))?;
    }

    let mut placed = Vec::with_capacity(files.len());
    for file in files {
        let target = dest_dir.join(&file.dest_name);
        if let Err(e) = fs::rename(staging.join(&file.dest_name), &target) {
            for done in &placed {
                let _ = fs::remove_file(done);
            }
            return Err(io_err("commit", &target)(e));
        }
        placed.push(target);
    }
    Ok(placed)
}

/// Remove `start` and its parents while they are empty, stopping at `stop`
pub fn remove_empty_dirs(start: &Path, stop: &Path) -> io::Result<usize> {
    let mut removed = 0;
    let mut dir = start.to_path_buf();
    while dir.starts_with(stop) && dir != stop {
        let is_empty = match fs::read_dir(&dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e),
        };
        if !is_empty {
            break;
        }
        fs::remove_dir(&dir)?;
        removed += 1;
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => break,
        }
    }
    Ok(removed)
}
