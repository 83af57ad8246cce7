//! Conflict naming for keep-both resolution
//!
//! Generates names for conflict copies, following the pattern:
//! `filename (conflicted YYYY-MM-DD).ext`

use chrono::NaiveDate;

use drivesync_core::domain::RelativePath;

use crate::error::ConflictPolicyError;

/// Highest numeric suffix tried before giving up
const MAX_SUFFIX: u32 = 999;

/// Generates conflict copy names
pub struct ConflictNamer;

impl ConflictNamer {
    /// Builds the conflict copy file name for `original_name`
    ///
    /// Given "plan.txt" and 2024-01-01, produces
    /// "plan (conflicted 2024-01-01).txt". A `suffix` of `Some(n)` gives
    /// "plan (conflicted 2024-01-01) n.txt".
    pub fn generate(original_name: &str, date: NaiveDate, suffix: Option<u32>) -> String {
        let tag = match suffix {
            Some(n) => format!("(conflicted {}) {n}", date.format("%Y-%m-%d")),
            None => format!("(conflicted {})", date.format("%Y-%m-%d")),
        };

        // A leading dot marks a hidden file, not an extension
        match original_name.rfind('.') {
            Some(dot_pos) if dot_pos > 0 => {
                let stem = &original_name[..dot_pos];
                let ext = &original_name[dot_pos..];
                format!("{stem} {tag}{ext}")
            }
            _ => format!("{original_name} {tag}"),
        }
    }

    /// The conflict copy path for `path`, in the same directory
    pub fn conflict_name(
        path: &RelativePath,
        date: NaiveDate,
    ) -> Result<RelativePath, ConflictPolicyError> {
        Ok(path.with_file_name(&Self::generate(path.file_name(), date, None))?)
    }

    /// Like [`ConflictNamer::conflict_name`], but appends ` 2`, ` 3`, ...
    /// until `taken` reports the name as free
    pub fn generate_unique<F>(
        path: &RelativePath,
        date: NaiveDate,
        mut taken: F,
    ) -> Result<RelativePath, ConflictPolicyError>
    where
        F: FnMut(&RelativePath) -> bool,
    {
        let candidate = Self::conflict_name(path, date)?;
        if !taken(&candidate) {
            return Ok(candidate);
        }

        for i in 2..=MAX_SUFFIX {
            let numbered =
                path.with_file_name(&Self::generate(path.file_name(), date, Some(i)))?;
            if !taken(&numbered) {
                return Ok(numbered);
            }
        }

        Err(ConflictPolicyError::NoFreeName(path.clone()))
    }
}
