//! Directory layouts of the three data trees
//!
//! ```text
//! raw:        sourcedata/raw/<sN_rN>/<datatype>/sub-<N>/
//! pending-qa: sourcedata/pending-qa/<sN_rN>/<datatype>/sub-<N>/
//! checked:    sourcedata/checked/sub-<N>/<sN_rN>/<datatype>/
//! ```

use crate::context::DatasetPaths;
use hallmonitor_common::identifier::{is_canonical_number, parse_session_run};
use hallmonitor_common::Identifier;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Which data tree a path belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeKind {
    Raw,
    PendingQa,
    Checked,
}

/// Identity encoded in a leaf data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirLocation {
    pub subject: u64,
    pub session: u32,
    pub run: u32,
    pub data_type: String,
}

impl TreeKind {
    pub fn root<'a>(&self, paths: &'a DatasetPaths) -> &'a Path {
        match self {
            TreeKind::Raw => &paths.raw,
            TreeKind::PendingQa => &paths.pending_qa,
            TreeKind::Checked => &paths.checked,
        }
    }

    /// Leaf directory holding files for a subject/session/run/datatype
    pub fn data_dir(&self, paths: &DatasetPaths, subject: u64, session_run: &str, data_type: &str) -> PathBuf {
        let subject = format!("sub-{}", subject);
        let root = self.root(paths);
        match self {
            TreeKind::Raw | TreeKind::PendingQa => root.join(session_run).join(data_type).join(subject),
            TreeKind::Checked => root.join(subject).join(session_run).join(data_type),
        }
    }

    /// Canonical directory of an identifier whose variable has `data_type`
    pub fn identifier_dir(&self, paths: &DatasetPaths, identifier: &Identifier, data_type: &str) -> PathBuf {
        self.data_dir(paths, identifier.subject, &identifier.sre.session_run(), data_type)
    }

    /// Decode a leaf directory; `None` when it does not follow this layout
    pub fn locate(&self, paths: &DatasetPaths, dir: &Path) -> Option<DirLocation> {
        let rel = dir.strip_prefix(self.root(paths)).ok()?;
        let parts: Vec<&str> = rel
            .components()
            .map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        let [a, b, c] = parts.as_slice() else {
            return None;
        };
        let (session_run, data_type, subject) = match self {
            TreeKind::Raw | TreeKind::PendingQa => (*a, *b, *c),
            TreeKind::Checked => (*b, *c, *a),
        };
        let (session, run) = parse_session_run(session_run)?;
        let subject = parse_subject_dir(subject)?;
        if data_type.is_empty() {
            return None;
        }
        Some(DirLocation {
            subject,
            session,
            run,
            data_type: data_type.to_string(),
        })
    }
}

impl fmt::Display for TreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TreeKind::Raw => "raw",
            TreeKind::PendingQa => "pending-qa",
            TreeKind::Checked => "checked",
        })
    }
}

fn parse_subject_dir(name: &str) -> Option<u64> {
    let digits = name.strip_prefix("sub-")?;
    if !is_canonical_number(digits) {
        return None;
    }
    digits.parse().ok()
}
