//! Local execution target.
//!
//! Runs everything on this machine under a scratch directory. Used for
//! development and tests; behaves like a remote target whose transport is
//! the local filesystem.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use uuid::Uuid;

use super::{parent_dir, ExecutionTarget, FileSource, TargetError, Teardown};
use crate::cancel::{CancelToken, Cancelled};

/// Execution target backed by the local filesystem and processes.
#[derive(Debug)]
pub struct LocalTarget {
    root: String,
}

impl LocalTarget {
    /// Use `root` as the session root. It is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into().to_string_lossy().into_owned(),
        }
    }

    /// Fresh session root `<tmp>/rcall-<uuid>`.
    pub fn scratch() -> Self {
        Self::new(std::env::temp_dir().join(format!("rcall-{}", Uuid::new_v4())))
    }

    fn not_found(remote_path: &str, e: std::io::Error) -> TargetError {
        if e.kind() == std::io::ErrorKind::NotFound {
            TargetError::NotFound(remote_path.to_string())
        } else {
            TargetError::Io(e)
        }
    }
}

#[async_trait]
impl ExecutionTarget for LocalTarget {
    fn root_path(&self) -> &str {
        &self.root
    }

    async fn write_file(
        &mut self,
        source: FileSource<'_>,
        remote_path: &str,
        cancel: &CancelToken,
    ) -> Result<(), TargetError> {
        cancel.check()?;
        if let Some(parent) = parent_dir(remote_path) {
            fs::create_dir_all(parent).await?;
        }

        let write = async {
            match source {
                FileSource::Bytes(bytes) => fs::write(remote_path, bytes).await,
                FileSource::LocalFile(local) => fs::copy(local, remote_path).await.map(|_| ()),
                FileSource::Stream(reader) => {
                    let mut file = fs::File::create(remote_path).await?;
                    tokio::io::copy(reader, &mut file).await?;
                    file.flush().await
                }
            }
        };
        cancel.run(write).await??;
        Ok(())
    }

    async fn read_file(&mut self, remote_path: &str, cancel: &CancelToken) -> Result<Vec<u8>, TargetError> {
        cancel
            .run(fs::read(remote_path))
            .await?
            .map_err(|e| Self::not_found(remote_path, e))
    }

    async fn read_file_to(
        &mut self,
        remote_path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        cancel: &CancelToken,
    ) -> Result<u64, TargetError> {
        let copy = async {
            let mut file = fs::File::open(remote_path)
                .await
                .map_err(|e| Self::not_found(remote_path, e))?;
            let copied = tokio::io::copy(&mut file, sink).await?;
            sink.flush().await?;
            Ok::<_, TargetError>(copied)
        };
        cancel.run(copy).await?
    }

    async fn remove_file(&mut self, remote_path: &str, cancel: &CancelToken) -> Result<(), TargetError> {
        match cancel.run(fs::remove_file(remote_path)).await? {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TargetError::Io(e)),
        }
    }

    async fn execute(
        &mut self,
        command: &str,
        args: &[String],
        elevate: bool,
        cancel: &CancelToken,
    ) -> Result<i32, TargetError> {
        if elevate {
            return Err(TargetError::ElevationUnsupported);
        }
        cancel.check()?;
        fs::create_dir_all(&self.root).await?;

        tracing::debug!(command, ?args, root = %self.root, "spawning local process");
        let mut child = Command::new(command)
            .args(args)
            .current_dir(Path::new(&self.root))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if let Err(e) = child.start_kill() {
                    tracing::warn!(error = %e, "failed to kill local process");
                }
                Err(TargetError::Cancelled(Cancelled))
            }
            status = child.wait() => {
                let status = status?;
                Ok(status.code().unwrap_or(-1))
            }
        }
    }

    async fn teardown(&mut self, mode: Teardown) {
        if mode == Teardown::Keep {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.root).await {
            tracing::debug!(root = %self.root, error = %e, "ignoring scratch removal failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn target_in(dir: &TempDir) -> LocalTarget {
        LocalTarget::new(dir.path().join("session"))
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_reads_back() {
        let dir = TempDir::new().unwrap();
        let mut target = target_in(&dir);
        let cancel = CancelToken::new();
        let path = format!("{}/.session/deep/file.txt", target.root_path());

        target
            .write_file(FileSource::Bytes(b"hello"), &path, &cancel)
            .await
            .unwrap();
        assert_eq!(target.read_file(&path, &cancel).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_write_from_stream_and_local_file() {
        let dir = TempDir::new().unwrap();
        let mut target = target_in(&dir);
        let cancel = CancelToken::new();

        let mut reader: &[u8] = b"streamed";
        let streamed = format!("{}/s.txt", target.root_path());
        target
            .write_file(FileSource::Stream(&mut reader), &streamed, &cancel)
            .await
            .unwrap();

        let local = dir.path().join("local.txt");
        std::fs::write(&local, b"copied").unwrap();
        let copied = format!("{}/c.txt", target.root_path());
        target
            .write_file(FileSource::LocalFile(&local), &copied, &cancel)
            .await
            .unwrap();

        let mut sink = Vec::new();
        target.read_file_to(&streamed, &mut sink, &cancel).await.unwrap();
        assert_eq!(sink, b"streamed");
        assert_eq!(target.read_file(&copied, &cancel).await.unwrap(), b"copied");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let mut target = target_in(&dir);
        let cancel = CancelToken::new();
        let path = format!("{}/nope", target.root_path());

        let err = target.read_file(&path, &cancel).await.unwrap_err();
        assert!(matches!(err, TargetError::NotFound(_)));
        target.remove_file(&path, &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_elevation_rejected() {
        let dir = TempDir::new().unwrap();
        let mut target = target_in(&dir);
        let err = target
            .execute("true", &[], true, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TargetError::ElevationUnsupported));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_exit_status_and_cwd() {
        let dir = TempDir::new().unwrap();
        let mut target = target_in(&dir);
        let cancel = CancelToken::new();

        let status = target
            .execute("sh", &["-c".to_string(), "pwd > where; exit 3".to_string()], false, &cancel)
            .await
            .unwrap();
        assert_eq!(status, 3);

        let where_path = format!("{}/where", target.root_path());
        let cwd = String::from_utf8(target.read_file(&where_path, &cancel).await.unwrap()).unwrap();
        let expected = std::fs::canonicalize(target.root_path()).unwrap();
        assert_eq!(std::fs::canonicalize(cwd.trim()).unwrap(), expected);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_cancelled() {
        let dir = TempDir::new().unwrap();
        let mut target = target_in(&dir);
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = target
            .execute("sleep", &["30".to_string()], false, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_teardown_removes_or_keeps() {
        let dir = TempDir::new().unwrap();
        let cancel = CancelToken::new();

        let mut kept = LocalTarget::new(dir.path().join("kept"));
        let path = format!("{}/f", kept.root_path());
        kept.write_file(FileSource::Bytes(b"x"), &path, &cancel).await.unwrap();
        kept.teardown(Teardown::Keep).await;
        assert!(Path::new(&path).exists());

        let mut removed = LocalTarget::new(dir.path().join("removed"));
        let path = format!("{}/f", removed.root_path());
        removed.write_file(FileSource::Bytes(b"x"), &path, &cancel).await.unwrap();
        removed.teardown(Teardown::Remove).await;
        assert!(!Path::new(removed.root_path()).exists());

        // second teardown of a missing root is silent
        removed.teardown(Teardown::Remove).await;
    }
}
