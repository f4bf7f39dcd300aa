//! Exclusion patterns
//!
//! Patterns are literal strings where only `*` is a wildcard. They are
//! matched against an entry's basename, anchored at both ends. Path segments
//! are never matched, so a pattern like `build/out` cannot exclude anything.

use regex::Regex;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Name of the ignore file merged into the exclude list when enabled
pub const IGNORE_FILE: &str = ".gitignore";

/// A single compiled exclude pattern
#[derive(Debug, Clone)]
pub enum Matcher {
    Pattern(Regex),
    /// Fallback when a pattern cannot be compiled: compared verbatim
    Literal(String),
}

impl Matcher {
    /// Compile one pattern, escaping everything except `*`
    pub fn compile(pattern: &str) -> Self {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        match Regex::new(&format!("^{}$", body)) {
            Ok(re) => Matcher::Pattern(re),
            Err(e) => {
                warn!("Exclude pattern {:?} treated literally: {}", pattern, e);
                Matcher::Literal(pattern.to_string())
            }
        }
    }

    pub fn is_match(&self, basename: &str) -> bool {
        match self {
            Matcher::Pattern(re) => re.is_match(basename),
            Matcher::Literal(s) => s == basename,
        }
    }
}

/// Compiled exclude list
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    matchers: Vec<Matcher>,
}

impl ExcludeSet {
    /// Compile a list of patterns. Never fails.
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Self {
        Self {
            matchers: patterns.iter().map(|p| Matcher::compile(p.as_ref())).collect(),
        }
    }

    /// Compile `patterns`, optionally merged with the root's ignore file
    pub fn for_root<S: AsRef<str>>(root: &Path, patterns: &[S], include_ignore_file: bool) -> Self {
        let mut all: Vec<String> = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        if include_ignore_file {
            all.extend(load_ignore_file(root));
        }
        Self::compile(&all)
    }

    /// True iff any pattern fully matches `basename`
    pub fn should_exclude(&self, basename: &str) -> bool {
        self.matchers.iter().any(|m| m.is_match(basename))
    }

    /// Check the final component of `path`
    pub fn excludes_path(&self, path: &Path) -> bool {
        path.file_name()
            .map(|n| self.should_exclude(&n.to_string_lossy()))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

/// Read the root's ignore file, if any.
///
/// Blank lines and `#` comments are dropped; the rest are returned trimmed.
pub fn load_ignore_file(root: &Path) -> Vec<String> {
    let path = root.join(IGNORE_FILE);
    let content = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => {
            debug!("No ignore file at {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}
