//! Artifact manifest (`.session/manifest`)
//!
//! Maps remote absolute paths to the content hash of the bytes last
//! uploaded there. Text format, one record per line:
//!
//! ```text
//! <hex-hash> <remote-path>\n
//! ```
//!
//! The newline is the record separator, so a path containing one can never
//! be stored. Hashes are case-insensitive hex and are kept lowercase.

use std::collections::btree_map::{self, BTreeMap};

use crate::error::FormatError;

/// Remote path → content hash map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the hash of `path`.
    ///
    /// Rejects paths containing a newline, malformed hashes, and paths
    /// already present.
    pub fn insert(
        &mut self,
        path: impl Into<String>,
        hash: impl AsRef<str>,
    ) -> Result<(), FormatError> {
        let path = path.into();
        if path.contains('\n') {
            return Err(FormatError::NewlineInPath(path));
        }
        let hash = normalize_hash(hash.as_ref()).ok_or_else(|| FormatError::InvalidHash {
            line: 0,
            hash: hash.as_ref().to_string(),
        })?;

        match self.entries.entry(path) {
            btree_map::Entry::Occupied(entry) => Err(FormatError::DuplicatePath(entry.key().clone())),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(hash);
                Ok(())
            }
        }
    }

    /// Hash recorded for `path`, lowercase.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    /// Whether `path` is recorded with a hash equal to `hash` (case-insensitive).
    pub fn matches(&self, path: &str, hash: &str) -> bool {
        self.get(path)
            .map(|recorded| recorded.eq_ignore_ascii_case(hash))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by path.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, h)| (p.as_str(), h.as_str()))
    }

    /// Serialize to the manifest text format, sorted by path.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (path, hash) in &self.entries {
            out.push_str(hash);
            out.push(' ');
            out.push_str(path);
            out.push('\n');
        }
        out
    }

    /// Parse manifest text.
    ///
    /// Any malformed record rejects the whole manifest; callers treat that
    /// as "no manifest".
    pub fn parse(text: &str) -> Result<Self, FormatError> {
        if !text.is_empty() && !text.ends_with('\n') {
            return Err(FormatError::MissingNewline);
        }

        let mut manifest = Self::new();
        for (idx, line) in text.split_terminator('\n').enumerate() {
            let line_no = idx + 1;
            let (hash, path) = line
                .split_once(' ')
                .ok_or(FormatError::MissingSeparator { line: line_no })?;

            manifest.insert(path, hash).map_err(|e| match e {
                FormatError::InvalidHash { hash, .. } => FormatError::InvalidHash { line: line_no, hash },
                other => other,
            })?;
        }
        Ok(manifest)
    }

    /// Parse raw manifest bytes; non-UTF-8 content is treated as malformed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        let text = std::str::from_utf8(bytes).map_err(|_| FormatError::InvalidUtf8 { what: "manifest" })?;
        Self::parse(text)
    }
}

fn normalize_hash(hash: &str) -> Option<String> {
    if hash.is_empty() || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(hash.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    const H1: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
    const H2: &str = "486ea46224d1bb4fb680f34f7c9ad96a8f24ec88be73ea8e5a6c65260e9cb8a7";

    fn sample() -> Manifest {
        let mut manifest = Manifest::new();
        manifest.insert("/srv/session/app.bin", H1).unwrap();
        manifest.insert("/srv/session/lib/data file.txt", H2).unwrap();
        manifest
    }

    #[test]
    fn test_text_roundtrip() {
        let manifest = sample();
        let parsed = Manifest::parse(&manifest.to_text()).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn test_empty_roundtrip() {
        let manifest = Manifest::new();
        assert_eq!(manifest.to_text(), "");
        assert_eq!(Manifest::parse("").unwrap(), manifest);
    }

    #[test]
    fn test_serialization_format() {
        let text = sample().to_text();
        assert_eq!(
            text,
            format!(
                "{} /srv/session/app.bin\n{} /srv/session/lib/data file.txt\n",
                H1, H2
            )
        );
    }

    #[test]
    fn test_hash_case_insensitive() {
        let text = format!("{} /srv/a\n", H1.to_uppercase());
        let manifest = Manifest::parse(&text).unwrap();
        assert_eq!(manifest.get("/srv/a"), Some(H1));
        assert!(manifest.matches("/srv/a", &H1.to_uppercase()));
    }

    #[test]
    fn test_missing_separator_rejected() {
        let text = format!("{} /srv/a\n{}\n", H1, H2);
        assert_eq!(
            Manifest::parse(&text),
            Err(FormatError::MissingSeparator { line: 2 })
        );
    }

    #[test]
    fn test_missing_trailing_newline_rejected() {
        let text = format!("{} /srv/a", H1);
        assert_eq!(Manifest::parse(&text), Err(FormatError::MissingNewline));
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let text = format!("{} /srv/a\n{} /srv/a\n", H1, H2);
        assert_eq!(
            Manifest::parse(&text),
            Err(FormatError::DuplicatePath("/srv/a".to_string()))
        );
    }

    #[test]
    fn test_non_hex_hash_rejected() {
        let text = "not-a-hash /srv/a\n";
        assert!(matches!(
            Manifest::parse(text),
            Err(FormatError::InvalidHash { line: 1, .. })
        ));
    }

    #[test]
    fn test_newline_path_rejected_on_insert() {
        let mut manifest = Manifest::new();
        let result = manifest.insert("/srv/evil\nname", H1);
        assert!(matches!(result, Err(FormatError::NewlineInPath(_))));
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        assert!(Manifest::from_bytes(&[0xff, b' ', b'/', b'\n']).is_err());
    }
}
