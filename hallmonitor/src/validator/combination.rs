//! Combination-row reconciliation
//!
//! A combination row names interchangeable task versions; each subject
//! completes exactly one of them per session.

use super::Finding;
use hallmonitor_common::{DataDictionary, ErrorKind, Identifier, SessionRunEvent};
use std::collections::BTreeSet;

pub(crate) fn check_combinations(dict: &DataDictionary, present: &BTreeSet<Identifier>) -> Vec<Finding> {
    let pairs: BTreeSet<(u64, SessionRunEvent)> = present.iter().map(|id| (id.subject, id.sre)).collect();
    let rows = dict.combination_rows();
    let mut findings = Vec::new();

    for (subject, sre) in pairs {
        for row in &rows {
            let relevant = row
                .components
                .iter()
                .filter_map(|c| dict.get(c))
                .any(|entry| entry.allows_suffix(&sre));
            if !relevant {
                continue;
            }

            let ids: Vec<Identifier> = row
                .components
                .iter()
                .map(|c| Identifier::new(subject, c.clone(), sre))
                .collect();
            let found: Vec<&Identifier> = ids.iter().filter(|id| present.contains(id)).collect();

            match found.len() {
                0 => {
                    let details = format!(
                        "no {} variable ({}) present for sub-{} {}",
                        row.name,
                        row.components.join(", "),
                        subject,
                        sre
                    );
                    findings.extend(
                        ids.iter()
                            .map(|id| Finding::new(id.to_string(), ErrorKind::CombinationVariable, details.clone())),
                    );
                }
                1 => {}
                _ => {
                    let names: Vec<&str> = found.iter().map(|id| id.variable.as_str()).collect();
                    let details = format!(
                        "{} expects one of its variables for sub-{} {}, found {}",
                        row.name,
                        subject,
                        sre,
                        names.join(", ")
                    );
                    findings.extend(
                        found
                            .iter()
                            .map(|id| Finding::new(id.to_string(), ErrorKind::CombinationVariable, details.clone())),
                    );
                }
            }
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    const DICT: &str = "\
variable,dataType,allowedSuffix,expectedFileExt,allowedValues,provenance
alert_a,psychopy,s1_r1_e1,.csv,NA,NA
alert_b,psychopy,s1_r1_e1,.csv,NA,NA
alert_c,psychopy,s1_r1_e1,.csv,NA,NA
rest_eeg,eeg,\"s1_r1_e1, s2_r1_e1\",.eeg,NA,NA
alert,combination,s1_r1_e1,NA,NA,\"variables: \"\"alert_a\"\",\"\"alert_b\"\",\"\"alert_c\"\"\"
";

    fn check(present: &[&str]) -> Vec<Finding> {
        let dict = DataDictionary::from_reader(DICT.as_bytes()).unwrap();
        let present: BTreeSet<Identifier> = present.iter().map(|s| s.parse().unwrap()).collect();
        check_combinations(&dict, &present)
    }

    #[test]
    fn test_exactly_one_component_is_clean() {
        assert!(check(&["sub-1_rest_eeg_s1_r1_e1", "sub-1_alert_b_s1_r1_e1"]).is_empty());
    }

    #[test]
    fn test_zero_components_blames_every_component() {
        let findings = check(&["sub-1_rest_eeg_s1_r1_e1"]);
        assert_eq!(findings.len(), 3);
        assert!(findings.iter().all(|f| f.kind == ErrorKind::CombinationVariable));
    }

    #[test]
    fn test_n_components_blames_each_present_one() {
        let findings = check(&[
            "sub-1_alert_a_s1_r1_e1",
            "sub-1_alert_b_s1_r1_e1",
            "sub-1_alert_c_s1_r1_e1",
        ]);
        assert_eq!(findings.len(), 3);
        let two = check(&["sub-1_alert_a_s1_r1_e1", "sub-1_alert_c_s1_r1_e1"]);
        assert_eq!(two.len(), 2);
        assert_eq!(two[1].identifier, "sub-1_alert_c_s1_r1_e1");
    }

    #[test]
    fn test_sessions_outside_the_row_are_ignored() {
        assert!(check(&["sub-1_rest_eeg_s2_r1_e1"]).is_empty());
    }
}
