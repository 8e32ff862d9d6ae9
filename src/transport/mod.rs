//! Transport Layer
//!
//! Abstracts the secure-shell connection to a remote host. Provides:
//! - [`Transport`]: connect, run a command line, upload and download bytes
//! - [`SshTransport`]: drives the system `ssh` client
//! - [`MockTransport`]: in-memory remote filesystem for tests

mod mock;
mod ssh;

use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::cancel::{CancelToken, Cancelled};

pub use mock::{MockState, MockTransport};
pub use ssh::{SshConfig, SshTransport};

/// Transport errors, surfaced verbatim to the caller.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("SSH error: {0}")]
    Ssh(String),

    #[error("Remote file not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Secure-shell style access to one remote host.
///
/// Command lines are passed to the remote shell as-is; callers quote every
/// interpolated word.
#[async_trait]
pub trait Transport: Send {
    /// Establish the underlying connection.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Run `cmdline` in the remote shell and return its exit status.
    ///
    /// If `cancel` fires, the remote process is asked to stop and the call
    /// resolves immediately with [`TransportError::Cancelled`].
    async fn run_command(&mut self, cmdline: &str, cancel: &CancelToken) -> Result<i32, TransportError>;

    /// Write `bytes` to `remote_path`, replacing it. The parent directory must exist.
    async fn upload_bytes(&mut self, bytes: &[u8], remote_path: &str) -> Result<(), TransportError>;

    /// Copy a local file to `remote_path`.
    async fn upload_file(&mut self, local: &Path, remote_path: &str) -> Result<(), TransportError>;

    /// Stream `reader` to `remote_path`.
    async fn upload_stream(
        &mut self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        remote_path: &str,
    ) -> Result<(), TransportError>;

    /// Stream the content of `remote_path` into `writer`; returns the byte count.
    async fn download_to_stream(
        &mut self,
        remote_path: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, TransportError>;

    /// Release the underlying connection. Never fails.
    async fn disconnect(&mut self);
}
