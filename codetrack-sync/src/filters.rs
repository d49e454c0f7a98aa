//! Suffix allow-list deciding which local files are eligible for upload.

use std::path::Path;

/// Capture videos, rotated logs, and source-code capture containers.
pub const DEFAULT_SUFFIXES: [&str; 3] = [".mp4", ".log", ".srcs"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filters {
    suffixes: Vec<String>,
}

impl Filters {
    pub fn suffixes<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes.into_iter().map(Into::into).collect(),
        }
    }

    /// True if the file name ends with one of the allowed suffixes.
    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.suffixes.iter().any(|suffix| name.ends_with(suffix.as_str()))
    }
}

impl Default for Filters {
    fn default() -> Self {
        Self::suffixes(DEFAULT_SUFFIXES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filters_accept_capture_artifacts() {
        let filters = Filters::default();
        assert!(filters.matches(Path::new("/store/screencast_1.mp4")));
        assert!(filters.matches(Path::new("/store/codetrack_20250101T000000_1.log")));
        assert!(filters.matches(Path::new("sourcecode_20250101T000000.srcs")));
    }

    #[test]
    fn default_filters_reject_markers_and_temp_files() {
        let filters = Filters::default();
        assert!(!filters.matches(Path::new("/store/codetrack_1.log.lock")));
        assert!(!filters.matches(Path::new("/store/notes.txt")));
        assert!(!filters.matches(Path::new("/")));
    }
}
