//! Expectation engine
//!
//! Derives what *should* exist from what does: every (subject, session/run/
//! event) pair seen on disk expects one identifier per ordinary variable that
//! allows that suffix. The result over-generates on purpose; the validator
//! reconciles it against the present set.

use hallmonitor_common::{DataDictionary, Identifier, SessionRunEvent};
use std::collections::BTreeSet;

/// Identifiers expected given the identifiers present in a tree
pub fn expected_identifiers(dict: &DataDictionary, present: &BTreeSet<Identifier>) -> BTreeSet<Identifier> {
    let pairs: BTreeSet<(u64, SessionRunEvent)> = present.iter().map(|id| (id.subject, id.sre)).collect();

    let mut expected = BTreeSet::new();
    for (subject, sre) in pairs {
        // Combination components are ordinary rows of their own, so they are
        // expanded here like any other variable
        for entry in dict.entries().iter().filter(|e| e.is_ordinary()) {
            if entry.allows_suffix(&sre) {
                expected.insert(Identifier::new(subject, entry.variable.clone(), sre));
            }
        }
    }
    expected
}

/// Filenames an identifier should have, in dictionary extension order
///
/// Unknown variables and variables without declared extensions expect
/// nothing.
pub fn expected_files(dict: &DataDictionary, identifier: &Identifier) -> Vec<String> {
    dict.get(&identifier.variable)
        .map(|entry| {
            entry
                .expected_file_ext
                .iter()
                .map(|ext| identifier.file_name(ext))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DICT: &str = "\
variable,dataType,allowedSuffix,expectedFileExt,allowedValues,provenance
id,id,NA,NA,NA,NA
flanker_psychopy,psychopy,\"s1_r1_e1, s2_r1_e1\",\".csv, .log, .psydat\",NA,NA
rest_eeg,eeg,s1_r1_e1,\".eeg, .vmrk, .vhdr\",NA,NA
status,redcap_data,s1_r1_e1,NA,NA,NA
alert_a,psychopy,s1_r1_e1,.csv,NA,NA
alert_b,psychopy,s1_r1_e1,.csv,NA,NA
alert,combination,s1_r1_e1,NA,NA,\"variables: \"\"alert_a\"\",\"\"alert_b\"\"\"
";

    fn dict() -> DataDictionary {
        DataDictionary::from_reader(DICT.as_bytes()).unwrap()
    }

    fn id(text: &str) -> Identifier {
        text.parse().unwrap()
    }

    #[test]
    fn test_expected_identifiers_per_pair() {
        let present: BTreeSet<Identifier> = [id("sub-1_flanker_psychopy_s2_r1_e1")].into_iter().collect();
        let expected = expected_identifiers(&dict(), &present);
        // Only flanker allows s2_r1_e1
        assert_eq!(expected, present);
    }

    #[test]
    fn test_expected_identifiers_expand_components_and_skip_special_rows() {
        let present: BTreeSet<Identifier> = [id("sub-1_rest_eeg_s1_r1_e1")].into_iter().collect();
        let names: Vec<String> = expected_identifiers(&dict(), &present)
            .into_iter()
            .map(|i| i.variable)
            .collect();
        assert_eq!(
            names,
            vec!["alert_a", "alert_b", "flanker_psychopy", "rest_eeg", "status"]
        );
    }

    #[test]
    fn test_expected_files_in_declaration_order() {
        let files = expected_files(&dict(), &id("sub-1_rest_eeg_s1_r1_e1"));
        assert_eq!(
            files,
            vec![
                "sub-1_rest_eeg_s1_r1_e1.eeg",
                "sub-1_rest_eeg_s1_r1_e1.vmrk",
                "sub-1_rest_eeg_s1_r1_e1.vhdr",
            ]
        );
    }

    #[test]
    fn test_expected_files_empty_for_status_only_and_unknown() {
        assert!(expected_files(&dict(), &id("sub-1_status_s1_r1_e1")).is_empty());
        assert!(expected_files(&dict(), &id("sub-1_bogus_s1_r1_e1")).is_empty());
    }
}
