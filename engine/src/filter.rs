//! Exclusion filters for file types and directories.
//!
//! Exclude lists come from the configuration as `;`-delimited strings, once per
//! source and once globally. Both lists are merged into the effective filter
//! for a source root. Matching ignores case: file types match as a suffix of
//! the file name, directory fragments match anywhere in the directory's full
//! path.

use std::ffi::OsStr;
use std::path::Path;

use crate::config::{Options, Source};

/// A set of case-insensitive exclude patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludeList {
    patterns: Vec<String>,
}

impl ExcludeList {
    /// Parse a `;`-delimited list. Blank entries are dropped.
    pub fn parse(list: &str) -> Self {
        let patterns = list
            .split(';')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_lowercase)
            .collect();
        ExcludeList { patterns }
    }

    /// Merge a per-source list with the global one.
    pub fn combine(local: &ExcludeList, global: &ExcludeList) -> Self {
        let mut patterns = local.patterns.clone();
        patterns.extend(global.patterns.iter().cloned());
        ExcludeList { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// True if `name` ends with any pattern.
    pub fn matches_suffix(&self, name: &OsStr) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let name = name.to_string_lossy().to_lowercase();
        self.patterns.iter().any(|p| name.ends_with(p.as_str()))
    }

    /// True if `path` contains any pattern.
    pub fn matches_substring(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let path = path.to_string_lossy().to_lowercase();
        self.patterns.iter().any(|p| path.contains(p.as_str()))
    }
}

/// Effective filters for one source root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exclusions {
    pub file_types: ExcludeList,
    pub dirs: ExcludeList,
}

impl Exclusions {
    pub fn for_source(source: &Source, options: &Options) -> Self {
        Exclusions {
            file_types: ExcludeList::combine(
                &ExcludeList::parse(&source.exclude_file_types),
                &ExcludeList::parse(&options.global_exclude_file_types),
            ),
            dirs: ExcludeList::combine(
                &ExcludeList::parse(&source.exclude_dirs),
                &ExcludeList::parse(&options.global_exclude_dirs),
            ),
        }
    }

    /// True if the file called `name` must not be copied.
    pub fn excludes_file(&self, name: &OsStr) -> bool {
        self.file_types.matches_suffix(name)
    }

    /// True if the directory at `path` (and everything below it) must not be walked.
    pub fn excludes_dir(&self, path: &Path) -> bool {
        self.dirs.matches_substring(path)
    }
}
