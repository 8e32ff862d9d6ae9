//! Local artifact sets
//!
//! An [`ArtifactSet`] names the files to mirror into the session root. It is
//! only a description: enumeration and hashing happen when a sync runs.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use rcall_protocol::ContentHasher;
use tokio::io::AsyncReadExt;
use walkdir::WalkDir;

use super::exclude::{ExcludeRules, IGNORE_FILE};
use super::SyncError;

const HASH_CHUNK: usize = 64 * 1024;

/// One local file and the name it gets under the session root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    /// `/`-separated name relative to the session root
    pub name: String,
    /// Local path to read from
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
enum Source {
    Dir { root: PathBuf, exclude: ExcludeRules },
    Files(Vec<PathBuf>),
}

/// Files to synchronize into a session.
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    source: Source,
}

impl ArtifactSet {
    /// Every file under `dir`, minus the default exclusions and the patterns
    /// of `dir/.rcallignore` if present.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let root = dir.into();
        let mut exclude = ExcludeRules::new()?;
        let ignore = root.join(IGNORE_FILE);
        if ignore.is_file() {
            exclude = exclude.with_ignore_file(&ignore)?;
        }
        Ok(Self {
            source: Source::Dir { root, exclude },
        })
    }

    /// An explicit list of files, each synchronized under its file name.
    pub fn from_files<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            source: Source::Files(paths.into_iter().map(Into::into).collect()),
        }
    }

    /// Nothing to synchronize.
    pub fn empty() -> Self {
        Self::from_files(Vec::<PathBuf>::new())
    }

    /// Add exclusion patterns. Only meaningful for directory sets.
    pub fn with_excludes<S: AsRef<str>>(mut self, patterns: &[S]) -> Result<Self, SyncError> {
        if let Source::Dir { exclude, .. } = &mut self.source {
            *exclude = exclude.clone().with_patterns(patterns)?;
        }
        Ok(self)
    }

    /// Add patterns from an ignore file other than `.rcallignore`.
    pub fn with_ignore_file(mut self, path: &Path) -> Result<Self, SyncError> {
        if let Source::Dir { exclude, .. } = &mut self.source {
            if path.exists() {
                *exclude = exclude.clone().with_ignore_file(path)?;
            }
        }
        Ok(self)
    }

    /// Resolve the set to concrete files, sorted by name.
    ///
    /// Fails on names containing a newline and on two files claiming the
    /// same name.
    pub fn enumerate(&self) -> Result<Vec<LocalArtifact>, SyncError> {
        let mut found = BTreeMap::new();
        match &self.source {
            Source::Dir { root, exclude } => {
                let walker = WalkDir::new(root)
                    .follow_links(true)
                    .sort_by(|a, b| a.file_name().cmp(b.file_name()))
                    .into_iter()
                    .filter_entry(|entry| match entry.path().strip_prefix(root) {
                        Ok(rel) => rel.as_os_str().is_empty() || !exclude.is_excluded(rel),
                        Err(_) => false,
                    });

                for entry in walker {
                    let entry = entry?;
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let rel = entry
                        .path()
                        .strip_prefix(root)
                        .map_err(|_| SyncError::InvalidPath(entry.path().display().to_string()))?;
                    let name = relative_name(rel)?;
                    insert_unique(&mut found, name, entry.path().to_path_buf())?;
                }
            }
            Source::Files(paths) => {
                for path in paths {
                    let name = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .ok_or_else(|| SyncError::InvalidPath(path.display().to_string()))?;
                    insert_unique(&mut found, checked_name(name.to_string())?, path.clone())?;
                }
            }
        }

        Ok(found
            .into_iter()
            .map(|(name, path)| LocalArtifact { name, path })
            .collect())
    }
}

fn relative_name(rel: &Path) -> Result<String, SyncError> {
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| SyncError::InvalidPath(rel.display().to_string()))?,
            ),
            _ => return Err(SyncError::InvalidPath(rel.display().to_string())),
        }
    }
    checked_name(parts.join("/"))
}

fn checked_name(name: String) -> Result<String, SyncError> {
    if name.contains('\n') {
        return Err(SyncError::InvalidPath(name));
    }
    Ok(name)
}

fn insert_unique(
    found: &mut BTreeMap<String, PathBuf>,
    name: String,
    path: PathBuf,
) -> Result<(), SyncError> {
    if found.contains_key(&name) {
        return Err(SyncError::DuplicateArtifact(name));
    }
    found.insert(name, path);
    Ok(())
}

/// SHA-256 of a local file, read in chunks.
pub(crate) async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}
