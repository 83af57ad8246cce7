//! Exclusion policy shared by the local and remote scans
//!
//! An excluded name is never listed on either side, so it is never
//! uploaded, downloaded or deleted.

use glob::Pattern;
use tracing::warn;

use drivesync_core::config::ExclusionsConfig;
use drivesync_core::domain::RelativePath;

/// Suffix of the temporary files written during atomic local writes
pub const TEMP_SUFFIX: &str = ".drivesync-tmp";

/// Decides which paths the scanners skip
#[derive(Debug, Clone)]
pub struct ExclusionPolicy {
    skip_hidden: bool,
    patterns: Vec<Pattern>,
    /// `dir` for every `dir/**` pattern, matched against full paths only
    dir_patterns: Vec<Pattern>,
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self::from_config(&ExclusionsConfig::default())
    }
}

impl ExclusionPolicy {
    /// Compiles the configured patterns; invalid globs are logged and ignored
    pub fn new(skip_hidden: bool, patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = %raw, error = %e, "Ignoring invalid exclusion pattern");
                    None
                }
            })
            .collect::<Vec<Pattern>>();

        let dir_patterns = patterns
            .iter()
            .filter_map(|p| p.as_str().strip_suffix("/**"))
            .filter(|dir| !dir.is_empty())
            .filter_map(|dir| Pattern::new(dir).ok())
            .collect();

        Self {
            skip_hidden,
            patterns,
            dir_patterns,
        }
    }

    pub fn from_config(config: &ExclusionsConfig) -> Self {
        Self::new(config.skip_hidden, &config.patterns)
    }

    /// Policy that only skips the engine's own temp files
    pub fn none() -> Self {
        Self::new(false, &[])
    }

    /// True when `path` must not take part in sync
    ///
    /// Patterns are tried against the final component and against the full
    /// relative path, so both `*.swp` and `build/**` work as expected. A
    /// `build/**` pattern also excludes `build` itself.
    pub fn is_excluded(&self, path: &RelativePath) -> bool {
        let name = path.file_name();

        if name.ends_with(TEMP_SUFFIX) {
            return true;
        }

        if self.skip_hidden && name.starts_with('.') {
            return true;
        }

        self.patterns
            .iter()
            .any(|p| p.matches(name) || p.matches(path.as_str()))
            || self.dir_patterns.iter().any(|p| p.matches(path.as_str()))
    }
}
