//! Incremental artifact synchronization
//!
//! Mirrors a local [`ArtifactSet`] into the session root, uploading only
//! files whose content hash differs from the remote manifest:
//!
//! 1. Fetch the remote manifest. Missing or unreadable counts as empty.
//! 2. Hash every local artifact and compute its remote path.
//! 3. Skip files whose hash the remote manifest already records.
//! 4. On the first difference, delete the remote manifest (best-effort).
//! 5. Upload the changed files.
//! 6. If every upload succeeded, write the new manifest (best-effort).
//!
//! An interrupted sync leaves no manifest and the next sync uploads
//! everything again. A manifest that could not be deleted keeps the sync
//! incomplete until a new manifest overwrites it.

mod artifacts;
mod exclude;

use std::path::PathBuf;

use rcall_protocol::{FormatError, Manifest, SessionLayout};

use crate::best_effort::best_effort;
use crate::cancel::{CancelToken, Cancelled};
use crate::target::{ExecutionTarget, FileSource, TargetError};

use artifacts::hash_file;

pub use artifacts::{ArtifactSet, LocalArtifact};
pub use exclude::{ExcludeError, ExcludeRules, IGNORE_FILE};

/// Errors that abort a sync.
///
/// Upload failures are not among them: they are reported in
/// [`SyncReport::failed`].
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("artifact enumeration failed: {0}")]
    Enumerate(#[from] walkdir::Error),

    #[error("invalid artifact path: {0:?}")]
    InvalidPath(String),

    #[error("two artifacts named {0:?}")]
    DuplicateArtifact(String),

    #[error("failed to hash {}: {source}", path.display())]
    Hash {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("exclude rules error: {0}")]
    Exclude(#[from] ExcludeError),

    #[error("manifest error: {0}")]
    Manifest(#[from] FormatError),

    #[error("target error: {0}")]
    Target(#[from] TargetError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Outcome of one sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Remote paths uploaded, in upload order
    pub uploaded: Vec<String>,
    /// Number of artifacts skipped because the remote copy matched
    pub unchanged: usize,
    /// Remote paths whose upload failed
    pub failed: Vec<String>,
    /// Whether the new manifest was written to the target
    pub manifest_committed: bool,
    /// The previous manifest could not be removed before uploading. It
    /// stays authoritative until the new manifest overwrites it.
    pub stale_manifest: bool,
}

impl SyncReport {
    /// Every artifact is on the target with the expected content, and the
    /// target's manifest does not claim otherwise.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && (self.manifest_committed || !self.stale_manifest)
    }
}

/// Read the remote manifest, degrading every failure except cancellation
/// to an empty manifest.
async fn fetch_manifest<E>(
    target: &mut E,
    layout: &SessionLayout,
    cancel: &CancelToken,
) -> Result<Manifest, Cancelled>
where
    E: ExecutionTarget + ?Sized,
{
    let path = layout.manifest_path();
    let bytes = match target.read_file(&path, cancel).await {
        Ok(bytes) => bytes,
        Err(e) if e.is_cancelled() => return Err(Cancelled),
        Err(TargetError::NotFound(_)) => {
            tracing::debug!(%path, "no remote manifest");
            return Ok(Manifest::new());
        }
        Err(e) => {
            tracing::warn!(%path, error = %e, "could not read remote manifest, treating as empty");
            return Ok(Manifest::new());
        }
    };

    Ok(Manifest::from_bytes(&bytes).unwrap_or_else(|e| {
        tracing::warn!(%path, error = %e, "corrupt remote manifest, treating as empty");
        Manifest::new()
    }))
}

/// Synchronize `artifacts` into the session described by `layout`.
pub async fn sync<E>(
    target: &mut E,
    layout: &SessionLayout,
    artifacts: &ArtifactSet,
    cancel: &CancelToken,
) -> Result<SyncReport, SyncError>
where
    E: ExecutionTarget + ?Sized,
{
    let remote = fetch_manifest(target, layout, cancel).await?;
    let local = artifacts.enumerate()?;

    let mut report = SyncReport::default();
    let mut manifest = Manifest::new();
    let mut pending = Vec::new();

    for artifact in &local {
        cancel.check()?;
        let hash = hash_file(&artifact.path)
            .await
            .map_err(|source| SyncError::Hash {
                path: artifact.path.clone(),
                source,
            })?;
        let remote_path = layout.artifact_path(&artifact.name);

        if remote.matches(&remote_path, &hash) {
            tracing::debug!(path = %remote_path, "unchanged");
            report.unchanged += 1;
        } else {
            tracing::debug!(path = %remote_path, %hash, "changed");
            pending.push((artifact, remote_path.clone()));
        }
        manifest.insert(remote_path, &hash)?;
    }

    if pending.is_empty() && manifest == remote {
        tracing::debug!(unchanged = report.unchanged, "artifacts up to date");
        return Ok(report);
    }

    // From here until the new manifest lands, the target holds no manifest.
    let manifest_path = layout.manifest_path();
    report.stale_manifest = best_effort(
        "remove artifact manifest",
        target.remove_file(&manifest_path, cancel),
    )
    .await
    .is_none();
    cancel.check()?;

    for (artifact, remote_path) in pending {
        let source = FileSource::LocalFile(&artifact.path);
        match target.write_file(source, &remote_path, cancel).await {
            Ok(()) => report.uploaded.push(remote_path),
            Err(e) if e.is_cancelled() => return Err(SyncError::Cancelled(Cancelled)),
            Err(e) => {
                tracing::warn!(path = %remote_path, error = %e, "artifact upload failed");
                report.failed.push(remote_path);
            }
        }
    }

    if !report.failed.is_empty() {
        tracing::warn!(
            failed = report.failed.len(),
            stale_manifest = report.stale_manifest,
            "manifest not written, next sync uploads again"
        );
        return Ok(report);
    }

    let text = manifest.to_text();
    report.manifest_committed = best_effort(
        "write artifact manifest",
        target.write_file(FileSource::Bytes(text.as_bytes()), &manifest_path, cancel),
    )
    .await
    .is_some();
    if report.stale_manifest && !report.manifest_committed {
        tracing::warn!(path = %manifest_path, "stale manifest left on target, next sync uploads again");
    }

    tracing::info!(
        uploaded = report.uploaded.len(),
        unchanged = report.unchanged,
        committed = report.manifest_committed,
        "artifact sync finished"
    );
    Ok(report)
}
