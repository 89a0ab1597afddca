//! Missing-identifier blame
//!
//! A misnamed or misplaced file in a directory may be the very file an
//! absent identifier is looking for. Each absent identifier whose home is the
//! directory inherits one record per such violation kind so the directory
//! problem is visible from the identifier's side too.

use super::directory::DirectoryBatch;
use super::Finding;
use hallmonitor_common::{ErrorKind, Identifier};

const BLAMED_KINDS: [ErrorKind; 2] = [ErrorKind::NamingError, ErrorKind::MisplacedFile];

pub(crate) fn propagate(batch: &DirectoryBatch, dir_label: &str, missing: &[&Identifier]) -> Vec<Finding> {
    let mut blamed = Vec::new();
    for kind in BLAMED_KINDS {
        let Some(files) = batch.offenders.get(&kind) else {
            continue;
        };
        let files: Vec<&str> = files.iter().map(String::as_str).collect();
        for identifier in missing {
            blamed.push(Finding::new(
                identifier.to_string(),
                kind,
                format!(
                    "{} is missing and {} has a {} ({})",
                    identifier,
                    dir_label,
                    kind.label().to_lowercase(),
                    files.join(", ")
                ),
            ));
        }
    }
    blamed
}
