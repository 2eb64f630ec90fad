//! Small shared helpers: column-name validation and rowid/label conversion

use crate::error::{Error, Result};
use regex::Regex;
use rusqlite::ffi;
use std::sync::OnceLock;

/// Tests whether the given string is a valid SQLite column name.
///
/// Requirements:
/// - begins with a letter or underscore
/// - followed by any combination of letters, digits, underscores or `$`
/// - is not a reserved SQL keyword
pub fn is_valid_column_name(name: &str) -> bool {
    static COLUMN_NAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = COLUMN_NAME_RE.get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_$]*$").unwrap());

    if name.is_empty() || !re.is_match(name) {
        return false;
    }

    // SQLite knows its own keyword list; no need to carry a copy.
    let is_keyword = unsafe {
        ffi::sqlite3_keyword_check(name.as_ptr() as *const std::os::raw::c_char, name.len() as i32)
    };
    is_keyword == 0
}

/// Convert a SQL rowid to an index label.
///
/// Labels are unsigned machine words. Rowids that do not fit are rejected
/// rather than truncated.
pub fn rowid_to_label(rowid: i64) -> Result<usize> {
    usize::try_from(rowid).map_err(|_| {
        Error::InvalidArgument(format!("rowid {rowid} is out of range for an index label"))
    })
}

/// The inverse of [`rowid_to_label`]. Labels always originate from valid
/// rowids, so failure here indicates index corruption.
pub fn label_to_rowid(label: usize) -> Result<i64> {
    i64::try_from(label)
        .map_err(|_| Error::Internal(format!("label {label} is out of range for a rowid")))
}
