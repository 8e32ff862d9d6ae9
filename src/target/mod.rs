//! Execution Targets
//!
//! Where an invocation runs. Both variants expose the same capability set:
//! write and read files under the session root, remove a file, execute a
//! command with the session root as working directory, and tear down.
//!
//! Paths passed to a target are absolute target paths (`/`-separated).

mod local;
mod remote;

use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::cancel::{CancelToken, Cancelled};
use crate::transport::TransportError;

pub use local::LocalTarget;
pub use remote::RemoteTarget;

/// Errors from execution target operations.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("elevated execution is not supported by the local target")]
    ElevationUnsupported,

    #[error("remote command `{command}` exited with {status}")]
    CommandFailed { command: String, status: i32 },

    #[error("file not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl TargetError {
    /// Whether the failure is a cancellation, at any layer.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            TargetError::Cancelled(_) | TargetError::Transport(TransportError::Cancelled(_))
        )
    }
}

/// Content to write to a target file.
pub enum FileSource<'a> {
    Bytes(&'a [u8]),
    Stream(&'a mut (dyn AsyncRead + Unpin + Send)),
    LocalFile(&'a Path),
}

/// What teardown does with the session root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Teardown {
    /// Delete the session root and everything under it.
    #[default]
    Remove,
    /// Leave the session root in place for a later session.
    Keep,
}

/// Capability surface over "where execution happens".
///
/// Methods take `&mut self`: one target serves one call at a time.
#[async_trait]
pub trait ExecutionTarget: Send {
    /// Absolute session root on the target.
    fn root_path(&self) -> &str;

    /// Write `source` to `remote_path`, creating parent directories.
    async fn write_file(
        &mut self,
        source: FileSource<'_>,
        remote_path: &str,
        cancel: &CancelToken,
    ) -> Result<(), TargetError>;

    /// Read the whole file at `remote_path`.
    async fn read_file(&mut self, remote_path: &str, cancel: &CancelToken) -> Result<Vec<u8>, TargetError>;

    /// Stream the file at `remote_path` into `sink`; returns the byte count.
    async fn read_file_to(
        &mut self,
        remote_path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        cancel: &CancelToken,
    ) -> Result<u64, TargetError>;

    /// Remove `remote_path`. Removing a missing file succeeds.
    async fn remove_file(&mut self, remote_path: &str, cancel: &CancelToken) -> Result<(), TargetError>;

    /// Run `command args…` from the session root and return its exit status.
    async fn execute(
        &mut self,
        command: &str,
        args: &[String],
        elevate: bool,
        cancel: &CancelToken,
    ) -> Result<i32, TargetError>;

    /// Release the target. Best-effort: never fails.
    async fn teardown(&mut self, mode: Teardown);
}

#[async_trait]
impl<T: ExecutionTarget + ?Sized> ExecutionTarget for Box<T> {
    fn root_path(&self) -> &str {
        (**self).root_path()
    }

    async fn write_file(
        &mut self,
        source: FileSource<'_>,
        remote_path: &str,
        cancel: &CancelToken,
    ) -> Result<(), TargetError> {
        (**self).write_file(source, remote_path, cancel).await
    }

    async fn read_file(&mut self, remote_path: &str, cancel: &CancelToken) -> Result<Vec<u8>, TargetError> {
        (**self).read_file(remote_path, cancel).await
    }

    async fn read_file_to(
        &mut self,
        remote_path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        cancel: &CancelToken,
    ) -> Result<u64, TargetError> {
        (**self).read_file_to(remote_path, sink, cancel).await
    }

    async fn remove_file(&mut self, remote_path: &str, cancel: &CancelToken) -> Result<(), TargetError> {
        (**self).remove_file(remote_path, cancel).await
    }

    async fn execute(
        &mut self,
        command: &str,
        args: &[String],
        elevate: bool,
        cancel: &CancelToken,
    ) -> Result<i32, TargetError> {
        (**self).execute(command, args, elevate, cancel).await
    }

    async fn teardown(&mut self, mode: Teardown) {
        (**self).teardown(mode).await
    }
}

/// Parent directory of a `/`-separated target path, if any.
pub(crate) fn parent_dir(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("/srv/s/a.txt"), Some("/srv/s"));
        assert_eq!(parent_dir("/a"), Some("/"));
        assert_eq!(parent_dir("relative"), None);
    }

    #[test]
    fn test_cancelled_detection() {
        assert!(TargetError::Cancelled(Cancelled).is_cancelled());
        assert!(TargetError::Transport(TransportError::Cancelled(Cancelled)).is_cancelled());
        assert!(!TargetError::ElevationUnsupported.is_cancelled());
    }
}
