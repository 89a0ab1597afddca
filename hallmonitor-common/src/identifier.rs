//! Identifier grammar
//!
//! Filenames follow
//! `sub-<digits>_<variable>_s<digits>_r<digits>_e<digits>[_<info>].<ext>[.<ext>]*`.
//! Variable tokens may themselves contain underscores; the first
//! `_s<N>_r<N>_e<N>` run terminates the variable.
//!
//! [`parse_filename`] reports every structural problem it can find instead of
//! stopping at the first one, so a file with a missing run *and* an invalid
//! subject produces two issues.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Canonical unsigned number: no sign, no leading zeros
const NUMBER: &str = r"(0|[1-9]\d*)";

static FILENAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^sub-{n}_([A-Za-z0-9_-]+?)_s{n}_r{n}_e{n}(?:_([^.]+))?((?:\.[A-Za-z0-9]+)+)$",
        n = NUMBER
    ))
    .expect("filename pattern is valid")
});

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^sub-{n}_([A-Za-z0-9_-]+?)_s{n}_r{n}_e{n}$",
        n = NUMBER
    ))
    .expect("identifier pattern is valid")
});

static EXCEPTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(sub-{n}_[A-Za-z0-9_-]+?_s{n}_r{n}_e{n})-(deviation|no-data)\.txt$",
        n = r"(?:0|[1-9]\d*)"
    ))
    .expect("exception pattern is valid")
});

static EXTENSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\.[A-Za-z0-9]+)+$").expect("extension pattern is valid"));

static SESSION_RUN_RE: Lazy<Regex> =
    Lazy::new(|| {
        Regex::new(&format!(r"^s{n}_r{n}$", n = NUMBER)).expect("session/run pattern is valid")
    });

/// Bare issue marker, always reported
pub const ISSUE_FILE: &str = "issue.txt";

/// Parse failure for identifiers and session/run/event tokens
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind}: {value:?}")]
pub struct ParseError {
    kind: &'static str,
    value: String,
}

impl ParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ============================================================================
// Session / run / event
// ============================================================================

/// Composite `s<N>_r<N>_e<N>` token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionRunEvent {
    pub session: u32,
    pub run: u32,
    pub event: u32,
}

impl SessionRunEvent {
    pub fn new(session: u32, run: u32, event: u32) -> Self {
        Self {
            session,
            run,
            event,
        }
    }

    /// Directory-level `s<N>_r<N>` token
    pub fn session_run(&self) -> String {
        format!("s{}_r{}", self.session, self.run)
    }
}

impl fmt::Display for SessionRunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}_r{}_e{}", self.session, self.run, self.event)
    }
}

impl FromStr for SessionRunEvent {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError::new("session/run/event", s);
        let mut parts = s.trim().split('_');
        let mut field = |prefix: char| -> Result<u32, ParseError> {
            parts
                .next()
                .and_then(|t| t.strip_prefix(prefix))
                .filter(|d| is_canonical_number(d))
                .and_then(|d| d.parse().ok())
                .ok_or_else(|| err())
        };
        let sre = Self::new(field('s')?, field('r')?, field('e')?);
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(sre)
    }
}

/// Parse a `s<N>_r<N>` directory name into `(session, run)`
pub fn parse_session_run(dir_name: &str) -> Option<(u32, u32)> {
    let caps = SESSION_RUN_RE.captures(dir_name)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

// ============================================================================
// Identifier
// ============================================================================

/// Subject + variable + session/run/event: the unit of tracking
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier {
    pub subject: u64,
    pub variable: String,
    pub sre: SessionRunEvent,
}

impl Identifier {
    pub fn new(subject: u64, variable: impl Into<String>, sre: SessionRunEvent) -> Self {
        Self {
            subject,
            variable: variable.into(),
            sre,
        }
    }

    /// `sub-<N>` directory/file prefix
    pub fn subject_label(&self) -> String {
        format!("sub-{}", self.subject)
    }

    /// Filename for one extension (`ext` includes its leading dot)
    pub fn file_name(&self, ext: &str) -> String {
        format!("{}{}", self, ext)
    }

    /// Fully-qualified exception marker filename
    pub fn marker_file_name(&self, kind: ExceptionKind) -> String {
        format!("{}-{}", self, kind.bare_file_name())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}_{}_{}", self.subject, self.variable, self.sre)
    }
}

impl FromStr for Identifier {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = IDENTIFIER_RE
            .captures(s)
            .ok_or_else(|| ParseError::new("identifier", s))?;
        identifier_from_captures(&caps).ok_or_else(|| ParseError::new("identifier", s))
    }
}

fn identifier_from_captures(caps: &regex::Captures<'_>) -> Option<Identifier> {
    Some(Identifier {
        subject: caps[1].parse().ok()?,
        variable: caps[2].to_string(),
        sre: SessionRunEvent::new(
            caps[3].parse().ok()?,
            caps[4].parse().ok()?,
            caps[5].parse().ok()?,
        ),
    })
}

// ============================================================================
// Filenames
// ============================================================================

/// Structural fields of a filename
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Subject,
    Variable,
    Session,
    Run,
    Event,
    Extension,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Subject => "subject",
            Field::Variable => "variable",
            Field::Session => "session",
            Field::Run => "run",
            Field::Event => "event",
            Field::Extension => "extension",
        };
        f.write_str(name)
    }
}

/// Structural problem found while parsing a filename
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NamingIssue {
    MissingField(Field),
    InvalidField(Field, String),
}

impl fmt::Display for NamingIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamingIssue::MissingField(field) => write!(f, "missing {}", field),
            NamingIssue::InvalidField(field, value) => {
                write!(f, "invalid {} {:?}", field, value)
            }
        }
    }
}

/// Successfully parsed data filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    pub identifier: Identifier,
    /// Free-text tag after the event token, legal only under a deviation
    pub info: Option<String>,
    /// Full extension including the leading dot, e.g. `.csv` or `.tar.gz`
    pub extension: String,
}

/// Parse a data filename, diagnosing every structural field on failure
pub fn parse_filename(name: &str) -> Result<ParsedFilename, Vec<NamingIssue>> {
    if let Some(caps) = FILENAME_RE.captures(name) {
        if let Some(identifier) = identifier_from_captures(&caps) {
            return Ok(ParsedFilename {
                identifier,
                info: caps.get(6).map(|m| m.as_str().to_string()),
                extension: caps[7].to_string(),
            });
        }
    }
    Err(diagnose(name))
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Digits that format back unchanged (`0`, `7`, `3000001`; not `01`)
pub fn is_canonical_number(s: &str) -> bool {
    is_digits(s) && (s == "0" || !s.starts_with('0'))
}

fn is_structural_token(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some('s' | 'r' | 'e')) && is_digits(chars.as_str())
}

fn diagnose(name: &str) -> Vec<NamingIssue> {
    let mut issues = Vec::new();

    let (stem, ext) = match name.find('.') {
        Some(i) => (&name[..i], &name[i..]),
        None => (name, ""),
    };

    let tokens: Vec<&str> = stem.split('_').collect();
    let mut pos = 0;
    match tokens.first() {
        Some(t) if t.starts_with("sub-") => {
            let digits = &t[4..];
            if !is_canonical_number(digits) {
                issues.push(NamingIssue::InvalidField(Field::Subject, digits.to_string()));
            }
            pos = 1;
        }
        Some(t) if t.starts_with("sub") => {
            issues.push(NamingIssue::InvalidField(Field::Subject, t.to_string()));
            pos = 1;
        }
        _ => issues.push(NamingIssue::MissingField(Field::Subject)),
    }

    // First token that looks like s<N>, r<N> or e<N>
    let mut start = (pos..tokens.len())
        .find(|&i| is_structural_token(tokens[i]))
        .unwrap_or(tokens.len());

    // Walk back over malformed leading tokens (e.g. `sX_r1_e1`)
    if let Some(lead) = tokens.get(start).and_then(|t| t.chars().next()) {
        let preceding: &[char] = match lead {
            'r' => &['s'],
            'e' => &['r', 's'],
            _ => &[],
        };
        for letter in preceding {
            if start > pos + 1 && tokens[start - 1].starts_with(*letter) {
                start -= 1;
            } else {
                break;
            }
        }
    }

    let variable = tokens[pos.min(tokens.len())..start].join("_");
    if variable.is_empty() {
        issues.push(NamingIssue::MissingField(Field::Variable));
    }

    let mut i = start;
    for (field, letter) in [(Field::Session, 's'), (Field::Run, 'r'), (Field::Event, 'e')] {
        match tokens.get(i) {
            Some(t) if t.starts_with(letter) => {
                let value = &t[1..];
                if !is_canonical_number(value) {
                    issues.push(NamingIssue::InvalidField(field, value.to_string()));
                }
                i += 1;
            }
            _ => issues.push(NamingIssue::MissingField(field)),
        }
    }

    if ext.is_empty() {
        issues.push(NamingIssue::MissingField(Field::Extension));
    } else if !EXTENSION_RE.is_match(ext) {
        issues.push(NamingIssue::InvalidField(Field::Extension, ext.to_string()));
    }

    if issues.is_empty() {
        // Every field has the right shape, so the variable token itself is bad
        issues.push(NamingIssue::InvalidField(Field::Variable, variable));
    }
    issues
}

// ============================================================================
// Exception markers
// ============================================================================

/// Operator-authored exception marker kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExceptionKind {
    Deviation,
    NoData,
}

impl ExceptionKind {
    /// Legacy bare filename (`deviation.txt` / `no-data.txt`)
    pub fn bare_file_name(&self) -> &'static str {
        match self {
            ExceptionKind::Deviation => "deviation.txt",
            ExceptionKind::NoData => "no-data.txt",
        }
    }

    pub fn from_bare_file_name(name: &str) -> Option<Self> {
        match name {
            "deviation.txt" => Some(ExceptionKind::Deviation),
            "no-data.txt" => Some(ExceptionKind::NoData),
            _ => None,
        }
    }
}

/// Parse `<identifier>-deviation.txt` / `<identifier>-no-data.txt`
pub fn parse_exception_marker(name: &str) -> Option<(Identifier, ExceptionKind)> {
    let caps = EXCEPTION_RE.captures(name)?;
    let identifier = caps[1].parse().ok()?;
    let kind = match &caps[2] {
        "deviation" => ExceptionKind::Deviation,
        _ => ExceptionKind::NoData,
    };
    Some((identifier, kind))
}
