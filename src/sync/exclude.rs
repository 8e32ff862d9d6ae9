//! Exclusion rules for directory-sourced artifact sets
//!
//! Handles the built-in exclusions, caller patterns and `.rcallignore` files.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::Path;

/// Default patterns never synchronized
const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    ".git/**",
    ".session",
    ".session/**",
    ".DS_Store",
    "**/.DS_Store",
    "target",
    "target/**",
];

/// Name of the per-directory ignore file
pub const IGNORE_FILE: &str = ".rcallignore";

/// Errors for exclusion rules
#[derive(Debug, thiserror::Error)]
pub enum ExcludeError {
    #[error("IO error reading ignore file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Glob pattern error: {0}")]
    GlobError(#[from] globset::Error),
}

/// Exclusion rules for filtering artifact paths
#[derive(Debug, Clone)]
pub struct ExcludeRules {
    patterns: Vec<String>,
    glob_set: GlobSet,
}

impl ExcludeRules {
    /// Create new exclusion rules with defaults
    pub fn new() -> Result<Self, ExcludeError> {
        Self::build(Vec::new())
    }

    fn build(patterns: Vec<String>) -> Result<Self, ExcludeError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in DEFAULT_EXCLUDES {
            builder.add(Glob::new(pattern)?);
        }
        for pattern in &patterns {
            builder.add(Glob::new(pattern)?);
        }

        Ok(Self {
            patterns,
            glob_set: builder.build()?,
        })
    }

    /// Add patterns from an ignore file
    pub fn with_ignore_file(self, path: &Path) -> Result<Self, ExcludeError> {
        let contents = fs::read_to_string(path)?;
        let patterns: Vec<&str> = contents
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect();

        self.with_patterns(&patterns)
    }

    /// Add additional patterns on top of the ones already present
    pub fn with_patterns<S: AsRef<str>>(self, patterns: &[S]) -> Result<Self, ExcludeError> {
        let mut all = self.patterns;
        all.extend(
            patterns
                .iter()
                .map(|p| p.as_ref().trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty()),
        );
        Self::build(all)
    }

    /// Check if a path relative to the artifact directory is excluded
    pub fn is_excluded(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        self.glob_set.is_match(path_str.as_ref())
    }
}
