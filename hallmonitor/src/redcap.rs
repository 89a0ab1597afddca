//! REDCap survey exports
//!
//! Exports live under `raw/<sN_rN>/redcap/` and are handed to the tracker
//! updater. An export whose filename names a different session than its
//! folder would update the wrong session, so it stops the run. Column headers
//! can be rewritten (`--map OLD=NEW`, `--replace INDEX=NEW`) into temporary
//! copies when an export does not match what the tracker expects; the
//! originals are never touched.

use crate::context::DatasetPaths;
use hallmonitor_common::identifier::parse_session_run;
use hallmonitor_common::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// `s<N>_r<N>` token embedded in an export filename
static SESSION_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[_-])(s\d+_r\d+)(?:_e\d+)?(?:[_.-]|$)").expect("valid regex"));

const REDCAP_DIR: &str = "redcap";

/// Every REDCap export in the raw tree, sorted
///
/// Fails on the first export filed under the wrong session folder.
pub fn find_exports(paths: &DatasetPaths) -> Result<Vec<PathBuf>> {
    let mut exports = Vec::new();
    if !paths.raw.is_dir() {
        return Ok(exports);
    }

    for session in std::fs::read_dir(&paths.raw)? {
        let session = session?;
        let folder = session.file_name().to_string_lossy().into_owned();
        if parse_session_run(&folder).is_none() {
            continue;
        }
        let dir = session.path().join(REDCAP_DIR);
        if !dir.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_csv = path
                .extension()
                .map(|e| e.eq_ignore_ascii_case("csv"))
                .unwrap_or(false);
            if !path.is_file() || !is_csv {
                continue;
            }
            check_session(&path, &folder)?;
            exports.push(path);
        }
    }

    exports.sort();
    debug!(count = exports.len(), "Found REDCap exports");
    Ok(exports)
}

fn check_session(path: &Path, folder: &str) -> Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Some(caps) = SESSION_TOKEN_RE.captures(&name) {
        let found = &caps[1];
        if found != folder {
            return Err(Error::RedcapMisplaced {
                file: path.to_path_buf(),
                expected: folder.to_string(),
                found: found.to_string(),
            });
        }
    }
    Ok(())
}

// ============================================================================
// Header remapping
// ============================================================================

/// `OLD=NEW` column rename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRename {
    pub old: String,
    pub new: String,
}

impl FromStr for ColumnRename {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((old, new)) if !old.trim().is_empty() && !new.trim().is_empty() => Ok(Self {
                old: old.trim().to_string(),
                new: new.trim().to_string(),
            }),
            _ => Err(format!("expected OLD=NEW, got {:?}", s)),
        }
    }
}

/// `INDEX=NEW` positional header replacement (0-based)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnReplace {
    pub index: usize,
    pub new: String,
}

impl FromStr for ColumnReplace {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (index, new) = s
            .split_once('=')
            .ok_or_else(|| format!("expected INDEX=NEW, got {:?}", s))?;
        let index = index
            .trim()
            .parse()
            .map_err(|_| format!("column index must be a non-negative integer, got {:?}", index))?;
        if new.trim().is_empty() {
            return Err(format!("empty replacement name in {:?}", s));
        }
        Ok(Self {
            index,
            new: new.trim().to_string(),
        })
    }
}

/// Header rewrites applied to every export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnRemap {
    pub renames: Vec<ColumnRename>,
    pub replacements: Vec<ColumnReplace>,
}

impl ColumnRemap {
    pub fn is_empty(&self) -> bool {
        self.renames.is_empty() && self.replacements.is_empty()
    }

    /// Rewrite one header row
    pub fn apply(&self, headers: &mut [String]) {
        for replace in &self.replacements {
            if let Some(h) = headers.get_mut(replace.index) {
                *h = replace.new.clone();
            }
        }
        for rename in &self.renames {
            for h in headers.iter_mut().filter(|h| **h == rename.old) {
                *h = rename.new.clone();
            }
        }
    }

    /// Write remapped copies of `exports` into `out_dir`
    ///
    /// Without rewrites the originals are returned unchanged.
    pub fn remap_exports(&self, exports: &[PathBuf], out_dir: &Path) -> Result<Vec<PathBuf>> {
        if self.is_empty() {
            return Ok(exports.to_vec());
        }
        let mut remapped = Vec::with_capacity(exports.len());
        for (i, export) in exports.iter().enumerate() {
            let name = export
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("export-{}.csv", i));
            // Several sessions may export under the same filename
            let target = out_dir.join(format!("{}-{}", i, name));
            self.remap_file(export, &target)?;
            remapped.push(target);
        }
        info!(count = remapped.len(), "Remapped REDCap export headers");
        Ok(remapped)
    }

    fn remap_file(&self, source: &Path, target: &Path) -> Result<()> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(source)?;
        let mut wtr = csv::Writer::from_path(target)?;
        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            if row == 0 {
                let mut headers: Vec<String> = record.iter().map(str::to_string).collect();
                self.apply(&mut headers);
                for replace in &self.replacements {
                    if replace.index >= headers.len() {
                        return Err(Error::Config(format!(
                            "--replace index {} is out of range for {} ({} columns)",
                            replace.index,
                            source.display(),
                            headers.len()
                        )));
                    }
                }
                wtr.write_record(&headers)?;
            } else {
                wtr.write_record(&record)?;
            }
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn export(paths: &DatasetPaths, session: &str, name: &str, body: &str) -> PathBuf {
        let dir = paths.raw.join(session).join("redcap");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_find_exports_across_sessions() {
        let temp = TempDir::new().unwrap();
        let paths = DatasetPaths::new(temp.path());
        let a = export(&paths, "s1_r1", "bbs_DATA_2024-01-01_s1_r1_e1.csv", "a\n");
        let b = export(&paths, "s2_r1", "consent.csv", "a\n");
        export(&paths, "s2_r1", "notes.txt", "x");

        assert_eq!(find_exports(&paths).unwrap(), vec![a, b]);
    }

    #[test]
    fn test_misplaced_export_is_fatal() {
        let temp = TempDir::new().unwrap();
        let paths = DatasetPaths::new(temp.path());
        export(&paths, "s1_r1", "bbs_DATA_s2_r1_e1.csv", "a\n");

        match find_exports(&paths) {
            Err(Error::RedcapMisplaced { expected, found, .. }) => {
                assert_eq!(expected, "s1_r1");
                assert_eq!(found, "s2_r1");
            }
            other => panic!("expected RedcapMisplaced, got {:?}", other),
        }
    }

    #[test]
    fn test_remap_headers_into_copies() {
        let temp = TempDir::new().unwrap();
        let paths = DatasetPaths::new(temp.path());
        let original = export(&paths, "s1_r1", "survey.csv", "record_id,age_v2,score\n1,9,3\n");
        let out = TempDir::new().unwrap();

        let remap = ColumnRemap {
            renames: vec!["age_v2=age".parse().unwrap()],
            replacements: vec!["0=id".parse().unwrap()],
        };
        let copies = remap.remap_exports(&[original.clone()], out.path()).unwrap();
        let text = fs::read_to_string(&copies[0]).unwrap();
        assert_eq!(text, "id,age,score\n1,9,3\n");
        assert_eq!(
            fs::read_to_string(&original).unwrap(),
            "record_id,age_v2,score\n1,9,3\n"
        );
    }

    #[test]
    fn test_replace_out_of_range() {
        let temp = TempDir::new().unwrap();
        let paths = DatasetPaths::new(temp.path());
        let original = export(&paths, "s1_r1", "survey.csv", "a,b\n");
        let remap = ColumnRemap {
            renames: vec![],
            replacements: vec!["5=x".parse().unwrap()],
        };
        assert!(matches!(
            remap.remap_exports(&[original], temp.path()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_parse_remap_arguments() {
        assert!("old=".parse::<ColumnRename>().is_err());
        assert!("x=new".parse::<ColumnReplace>().is_err());
        assert_eq!(
            "3=new".parse::<ColumnReplace>().unwrap(),
            ColumnReplace {
                index: 3,
                new: "new".to_string()
            }
        );
    }
}
