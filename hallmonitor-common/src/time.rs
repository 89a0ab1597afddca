//! Timestamp utilities
//!
//! Record timestamps are local wall-clock time at second precision, matching
//! what operators see when they open the tables.

use chrono::{Local, NaiveDateTime, SubsecRound};

/// Format of `datetime` cells in persisted tables
pub const RECORD_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format of the timestamp embedded in pending table filenames
pub const FILE_STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Current local time, truncated to whole seconds
pub fn now() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(0)
}

/// Timestamp suffix for `pending-files-<stamp>.csv`
pub fn file_stamp(at: &NaiveDateTime) -> String {
    at.format(FILE_STAMP_FORMAT).to_string()
}

/// Serde adapter for `datetime` cells
pub mod record_datetime {
    use super::RECORD_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(RECORD_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(text.trim(), RECORD_FORMAT)
            .map_err(|e| serde::de::Error::custom(format!("bad datetime {:?}: {}", text, e)))
    }
}
