//! Single-flight lock per dataset
//!
//! Runs read-modify-write flat tables and move files between trees; two runs
//! on one dataset would corrupt both. The lock file is created exclusively and
//! removed when the guard drops.

use hallmonitor_common::{Error, Result};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct DatasetLock {
    path: PathBuf,
}

impl DatasetLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::DatasetLocked(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(
            file,
            "pid={} started={}",
            std::process::id(),
            hallmonitor_common::time::now().format(hallmonitor_common::time::RECORD_FORMAT)
        )?;
        tracing::debug!(lock = %path.display(), "Acquired dataset lock");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DatasetLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("Failed to remove lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data-monitoring/.hallmonitor.lock");

        let lock = DatasetLock::acquire(&path).unwrap();
        assert!(lock.path().exists());
        assert!(matches!(DatasetLock::acquire(&path), Err(Error::DatasetLocked(_))));

        drop(lock);
        assert!(!path.exists());
        assert!(DatasetLock::acquire(&path).is_ok());
    }
}
