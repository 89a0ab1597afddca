//! Data dictionary loading, lookup and drift detection
//!
//! The dictionary is a CSV keyed by `variable`. Columns used for validation:
//! `dataType`, `allowedSuffix`, `expectedFileExt`, `allowedValues`,
//! `provenance`. All other columns are carried through so that drift
//! detection sees every edit an operator makes.

use crate::identifier::SessionRunEvent;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

const REQUIRED_COLUMNS: [&str; 6] = [
    "variable",
    "dataType",
    "allowedSuffix",
    "expectedFileExt",
    "allowedValues",
    "provenance",
];

/// Datatypes that never carry per-subject files
const NON_FILE_TYPES: [&str; 4] = ["id", "consent", "assent", "combination"];

/// Datatype name of combination rows
pub const COMBINATION_TYPE: &str = "combination";

// ============================================================================
// Allowed values
// ============================================================================

/// Subject-number domain for a variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedValues {
    /// `NA`: no restriction declared
    NotApplicable,
    /// Union of closed intervals and explicit values
    Set {
        ranges: Vec<(u64, u64)>,
        values: BTreeSet<u64>,
    },
}

impl AllowedValues {
    /// Parse `NA`, `[a,b],[c,d]`, `1,2,3` or any mix of intervals and values
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let text = text.trim();
        if text.is_empty() || text.eq_ignore_ascii_case("NA") {
            return Ok(AllowedValues::NotApplicable);
        }

        let mut ranges = Vec::new();
        let mut values = BTreeSet::new();
        let mut rest = text;
        while !rest.is_empty() {
            rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
            if rest.is_empty() {
                break;
            }
            if let Some(after) = rest.strip_prefix('[') {
                let end = after
                    .find(']')
                    .ok_or_else(|| format!("unterminated interval in {:?}", text))?;
                let (lo, hi) = after[..end]
                    .split_once(',')
                    .ok_or_else(|| format!("interval without comma in {:?}", text))?;
                let lo = parse_value(lo)?;
                let hi = parse_value(hi)?;
                if lo > hi {
                    return Err(format!("empty interval [{},{}]", lo, hi));
                }
                ranges.push((lo, hi));
                rest = &after[end + 1..];
            } else {
                let end = rest.find(',').unwrap_or(rest.len());
                let token = &rest[..end];
                // NA alongside concrete values only marks the sentinel as legal
                if !token.trim().eq_ignore_ascii_case("NA") {
                    values.insert(parse_value(token)?);
                }
                rest = &rest[end..];
            }
        }
        Ok(AllowedValues::Set { ranges, values })
    }

    pub fn is_restricted(&self) -> bool {
        matches!(self, AllowedValues::Set { .. })
    }

    pub fn contains(&self, value: u64) -> bool {
        match self {
            AllowedValues::NotApplicable => true,
            AllowedValues::Set { ranges, values } => {
                values.contains(&value) || ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(&value))
            }
        }
    }
}

fn parse_value(token: &str) -> std::result::Result<u64, String> {
    token
        .trim()
        .parse()
        .map_err(|_| format!("invalid allowed value {:?}", token.trim()))
}

// ============================================================================
// Entries
// ============================================================================

/// One data dictionary row
#[derive(Debug, Clone, PartialEq)]
pub struct DataDictEntry {
    pub variable: String,
    pub data_type: String,
    pub allowed_suffix: Vec<SessionRunEvent>,
    /// Declaration order; each extension is one required file
    pub expected_file_ext: Vec<String>,
    pub allowed_values: AllowedValues,
    pub provenance: String,
    /// Components, for `combination` rows only
    pub components: Vec<String>,
}

impl DataDictEntry {
    pub fn is_combination(&self) -> bool {
        self.data_type == COMBINATION_TYPE
    }

    /// Task/datatype variables that identifiers are expected for
    pub fn is_ordinary(&self) -> bool {
        !NON_FILE_TYPES.contains(&self.data_type.as_str())
    }

    pub fn allows_suffix(&self, sre: &SessionRunEvent) -> bool {
        self.allowed_suffix.contains(sre)
    }

    pub fn allows_extension(&self, ext: &str) -> bool {
        self.expected_file_ext.iter().any(|e| e == ext)
    }
}

/// Derived view: exactly one component expected per subject/session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinationRow {
    pub name: String,
    pub components: Vec<String>,
}

// ============================================================================
// Dictionary
// ============================================================================

/// Loaded, immutable data dictionary
#[derive(Debug, Clone)]
pub struct DataDictionary {
    entries: Vec<DataDictEntry>,
    index: HashMap<String, usize>,
    /// Raw column values per variable, used for diffing
    raw: BTreeMap<String, BTreeMap<String, String>>,
}

impl DataDictionary {
    /// Load the dictionary from a CSV file
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| Error::DataDictionary {
            path: path.to_path_buf(),
            message: format!("cannot open: {}", e),
        })?;
        let dict = Self::from_reader(file).map_err(|e| match e {
            Error::DataDictionary { message, .. } => Error::DataDictionary {
                path: path.to_path_buf(),
                message,
            },
            Error::Csv(err) => Error::DataDictionary {
                path: path.to_path_buf(),
                message: err.to_string(),
            },
            other => other,
        })?;
        info!(
            path = %path.display(),
            variables = dict.entries.len(),
            "Loaded data dictionary"
        );
        Ok(dict)
    }

    /// Parse dictionary CSV from any reader
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers: Vec<String> = rdr
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        for column in REQUIRED_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                return Err(invalid(format!("missing column {:?}", column)));
            }
        }

        let mut entries = Vec::new();
        let mut index = HashMap::new();
        let mut raw = BTreeMap::new();

        for record in rdr.records() {
            let record = record?;
            let row: BTreeMap<String, String> = headers
                .iter()
                .cloned()
                .zip(record.iter().map(|v| v.trim().to_string()))
                .collect();
            let variable = cell(&row, "variable").to_string();
            if variable.is_empty() {
                continue;
            }
            if index.contains_key(&variable) {
                return Err(invalid(format!("duplicate variable {:?}", variable)));
            }

            let entry = parse_entry(&variable, &row)?;
            debug!(variable = %variable, data_type = %entry.data_type, "Parsed dictionary row");
            index.insert(variable.clone(), entries.len());
            entries.push(entry);
            raw.insert(variable, row);
        }

        let dict = Self {
            entries,
            index,
            raw,
        };
        dict.check_combinations()?;
        Ok(dict)
    }

    fn check_combinations(&self) -> Result<()> {
        for entry in self.entries.iter().filter(|e| e.is_combination()) {
            if entry.components.len() < 2 {
                return Err(invalid(format!(
                    "combination {:?} names fewer than two variables",
                    entry.variable
                )));
            }
            for component in &entry.components {
                match self.get(component) {
                    None => {
                        return Err(invalid(format!(
                            "combination {:?} references unknown variable {:?}",
                            entry.variable, component
                        )))
                    }
                    Some(c) if c.is_combination() => {
                        return Err(invalid(format!(
                            "combination {:?} nests combination {:?}",
                            entry.variable, component
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, variable: &str) -> Option<&DataDictEntry> {
        self.index.get(variable).map(|&i| &self.entries[i])
    }

    /// Entries in declaration order
    pub fn entries(&self) -> &[DataDictEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn data_type(&self, variable: &str) -> Option<&str> {
        self.get(variable).map(|e| e.data_type.as_str())
    }

    /// All combination rows in declaration order
    pub fn combination_rows(&self) -> Vec<CombinationRow> {
        self.entries
            .iter()
            .filter(|e| e.is_combination())
            .map(|e| CombinationRow {
                name: e.variable.clone(),
                components: e.components.clone(),
            })
            .collect()
    }

    /// Whether `variable` is a component of any combination row
    pub fn is_combination_component(&self, variable: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.is_combination() && e.components.iter().any(|c| c == variable))
    }

    /// Check a subject number against the variable's domain, falling back to
    /// the `id` row when the variable itself declares `NA`
    pub fn subject_allowed(&self, variable: &str, subject: u64) -> bool {
        let own = self.get(variable).map(|e| &e.allowed_values);
        match own {
            Some(values) if values.is_restricted() => values.contains(subject),
            _ => self
                .entries
                .iter()
                .find(|e| e.data_type == "id")
                .map(|e| e.allowed_values.contains(subject))
                .unwrap_or(true),
        }
    }

    /// Column-level difference from `previous` to `self`
    pub fn diff(&self, previous: &DataDictionary) -> DataDictDiff {
        let mut diff = DataDictDiff::default();
        for (variable, row) in &self.raw {
            match previous.raw.get(variable) {
                None => diff.added.push(variable.clone()),
                Some(old) => {
                    let columns: BTreeSet<&String> = row.keys().chain(old.keys()).collect();
                    let changed: Vec<String> = columns
                        .into_iter()
                        .filter(|c| row.get(*c) != old.get(*c))
                        .cloned()
                        .collect();
                    if !changed.is_empty() {
                        diff.changed.push((variable.clone(), changed));
                    }
                }
            }
        }
        diff.removed = previous
            .raw
            .keys()
            .filter(|v| !self.raw.contains_key(*v))
            .cloned()
            .collect();
        diff
    }
}

fn invalid(message: String) -> Error {
    Error::DataDictionary {
        path: Default::default(),
        message,
    }
}

fn cell<'r>(row: &'r BTreeMap<String, String>, column: &str) -> &'r str {
    row.get(column).map(String::as_str).unwrap_or("")
}

fn parse_entry(variable: &str, row: &BTreeMap<String, String>) -> Result<DataDictEntry> {
    let get = |column: &str| cell(row, column);
    let data_type = get("dataType").to_string();

    let allowed_suffix = split_list(get("allowedSuffix"))
        .map(|token| {
            token.parse::<SessionRunEvent>().map_err(|_| {
                invalid(format!(
                    "variable {:?} has invalid allowedSuffix token {:?}",
                    variable, token
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let expected_file_ext: Vec<String> = split_list(get("expectedFileExt"))
        .map(|ext| {
            if ext.starts_with('.') {
                ext.to_string()
            } else {
                format!(".{}", ext)
            }
        })
        .collect();

    if !expected_file_ext.is_empty() && allowed_suffix.is_empty() {
        return Err(invalid(format!(
            "variable {:?} expects files but declares no allowedSuffix",
            variable
        )));
    }

    let allowed_values = AllowedValues::parse(get("allowedValues"))
        .map_err(|e| invalid(format!("variable {:?}: {}", variable, e)))?;

    let provenance = get("provenance").to_string();
    let components = if data_type == COMBINATION_TYPE {
        parse_components(&provenance)
    } else {
        Vec::new()
    };

    Ok(DataDictEntry {
        variable: variable.to_string(),
        data_type,
        allowed_suffix,
        expected_file_ext,
        allowed_values,
        provenance,
        components,
    })
}

/// Split a comma-separated cell, ignoring `NA` and blanks
fn split_list(cell: &str) -> impl Iterator<Item = &str> {
    cell.split(',')
        .map(|t| t.trim().trim_matches('"').trim())
        .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("NA"))
}

/// `variables: "a","b"` → `[a, b]`
fn parse_components(provenance: &str) -> Vec<String> {
    let list = provenance
        .split_once(':')
        .filter(|(key, _)| key.trim().eq_ignore_ascii_case("variables"))
        .map(|(_, rest)| rest)
        .unwrap_or(provenance);
    split_list(list)
        .map(|t| t.trim_matches('\'').to_string())
        .collect()
}

// ============================================================================
// Drift detection
// ============================================================================

/// Variable-level changes between two dictionaries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataDictDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Variable and the columns whose values changed
    pub changed: Vec<(String, Vec<String>)>,
}

impl DataDictDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

impl fmt::Display for DataDictDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for variable in &self.added {
            writeln!(f, "  added: {}", variable)?;
        }
        for variable in &self.removed {
            writeln!(f, "  removed: {}", variable)?;
        }
        for (variable, columns) in &self.changed {
            writeln!(f, "  changed: {} ({})", variable, columns.join(", "))?;
        }
        Ok(())
    }
}

/// Fail if `current` differs from the `latest` snapshot taken at setup
pub fn check_drift(current: &Path, latest: &Path) -> Result<DataDictionary> {
    let dict = DataDictionary::load(current)?;
    if !latest.exists() {
        return Err(Error::Config(format!(
            "No data dictionary snapshot at {}; run with --setup first",
            latest.display()
        )));
    }
    let snapshot = DataDictionary::load(latest)?;
    let diff = dict.diff(&snapshot);
    if !diff.is_empty() {
        return Err(Error::DataDictionaryDrift {
            path: current.to_path_buf(),
            diff: diff.to_string(),
        });
    }
    Ok(dict)
}

/// Record the current dictionary as the accepted snapshot
pub fn write_snapshot(current: &Path, latest: &Path) -> Result<DataDictionary> {
    // Refuse to snapshot something that does not load
    let dict = DataDictionary::load(current)?;
    if let Some(parent) = latest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(current, latest)?;
    info!(snapshot = %latest.display(), "Data dictionary snapshot updated");
    Ok(dict)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DICT: &str = "\
variable,dataType,description,allowedSuffix,allowedValues,provenance,expectedFileExt
id,id,participant id,NA,\"[3000000,3009999],[3080000,3089999]\",NA,NA
consent,consent,consent form,\"s1_r1_e1\",\"0,1\",NA,NA
flanker_psychopy,psychopy,task,\"s1_r1_e1, s2_r1_e1\",NA,NA,\".csv, .log, .psydat\"
rest_eeg,eeg,resting eeg,s1_r1_e1,NA,NA,\"eeg, vmrk, vhdr\"
alert_a,psychopy,version a,s1_r1_e1,NA,NA,.csv
alert_b,psychopy,version b,s1_r1_e1,NA,NA,.csv
alert,combination,either version,s1_r1_e1,NA,\"variables: \"\"alert_a\"\",\"\"alert_b\"\"\",NA
";

    fn dict() -> DataDictionary {
        DataDictionary::from_reader(DICT.as_bytes()).unwrap()
    }

    #[test]
    fn test_load_preserves_declaration_order() {
        let d = dict();
        assert_eq!(d.len(), 7);
        let flanker = d.get("flanker_psychopy").unwrap();
        assert_eq!(flanker.expected_file_ext, vec![".csv", ".log", ".psydat"]);
        assert_eq!(
            flanker.allowed_suffix,
            vec![SessionRunEvent::new(1, 1, 1), SessionRunEvent::new(2, 1, 1)]
        );
        assert_eq!(
            d.get("rest_eeg").unwrap().expected_file_ext,
            vec![".eeg", ".vmrk", ".vhdr"]
        );
    }

    #[test]
    fn test_combination_components() {
        let rows = dict().combination_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "alert");
        assert_eq!(rows[0].components, vec!["alert_a", "alert_b"]);
        assert!(dict().is_combination_component("alert_b"));
        assert!(!dict().is_combination_component("rest_eeg"));
    }

    #[test]
    fn test_ordinary_excludes_id_consent_and_combination() {
        let d = dict();
        assert!(!d.get("id").unwrap().is_ordinary());
        assert!(!d.get("consent").unwrap().is_ordinary());
        assert!(!d.get("alert").unwrap().is_ordinary());
        assert!(d.get("alert_a").unwrap().is_ordinary());
    }

    #[test]
    fn test_subject_allowed_falls_back_to_id_row() {
        let d = dict();
        assert!(d.subject_allowed("flanker_psychopy", 3000001));
        assert!(d.subject_allowed("flanker_psychopy", 3080500));
        assert!(!d.subject_allowed("flanker_psychopy", 3050000));
    }

    #[test]
    fn test_allowed_values_parse() {
        assert_eq!(AllowedValues::parse("NA").unwrap(), AllowedValues::NotApplicable);
        let values = AllowedValues::parse("[1,3], 7, NA").unwrap();
        assert!(values.contains(2));
        assert!(values.contains(7));
        assert!(!values.contains(5));
        assert!(AllowedValues::parse("[3,1]").is_err());
        assert!(AllowedValues::parse("[1,3").is_err());
        assert!(AllowedValues::parse("x").is_err());
    }

    #[test]
    fn test_duplicate_variable_rejected() {
        let csv = "variable,dataType,allowedSuffix,expectedFileExt,allowedValues,provenance\n\
                   a,psychopy,s1_r1_e1,.csv,NA,NA\n\
                   a,psychopy,s1_r1_e1,.csv,NA,NA\n";
        let err = DataDictionary::from_reader(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("duplicate variable"));
    }

    #[test]
    fn test_missing_column_rejected() {
        let csv = "variable,dataType\na,psychopy\n";
        assert!(DataDictionary::from_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_combination_with_unknown_component_rejected() {
        let csv = "variable,dataType,allowedSuffix,expectedFileExt,allowedValues,provenance\n\
                   a,psychopy,s1_r1_e1,.csv,NA,NA\n\
                   c,combination,s1_r1_e1,NA,NA,\"variables: a,zzz\"\n";
        let err = DataDictionary::from_reader(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("unknown variable"));
    }

    #[test]
    fn test_diff_reports_changed_columns() {
        let old = dict();
        let edited = DICT.replace("resting eeg", "resting state eeg");
        let edited = edited.replace("alert_b,psychopy,version b,s1_r1_e1,NA,NA,.csv\n", "");
        let edited = edited.replace(
            "\"variables: \"\"alert_a\"\",\"\"alert_b\"\"\"",
            "\"variables: \"\"alert_a\"\",\"\"flanker_psychopy\"\"\"",
        );
        let new = DataDictionary::from_reader(edited.as_bytes()).unwrap();
        let diff = new.diff(&old);
        assert!(diff.added.is_empty());
        assert_eq!(diff.removed, vec!["alert_b"]);
        assert!(diff
            .changed
            .iter()
            .any(|(v, cols)| v == "rest_eeg" && cols == &vec!["description".to_string()]));
        assert!(diff.changed.iter().any(|(v, _)| v == "alert"));
        assert!(new.diff(&new).is_empty());
    }
}
