//! Remote execution target over a [`Transport`].
//!
//! The connection is established on first use. Directory creation is
//! memoized for the lifetime of the target: once `mkdir -p` succeeded for a
//! directory, neither it nor any of its ancestors is created again.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use super::{parent_dir, ExecutionTarget, FileSource, TargetError, Teardown};
use crate::best_effort::best_effort;
use crate::cancel::CancelToken;
use crate::shell;
use crate::transport::{Transport, TransportError};

/// Elevation directive prefixed to elevated commands.
const ELEVATE_PREFIX: &str = "sudo -n";

/// Execution target on a remote host.
pub struct RemoteTarget<T: Transport> {
    transport: T,
    root: String,
    connected: bool,
    created_dirs: HashSet<String>,
}

impl<T: Transport> RemoteTarget<T> {
    /// `root` must be an absolute path on the remote host.
    pub fn new(transport: T, root: impl Into<String>) -> Self {
        let mut root = root.into();
        while root.len() > 1 && root.ends_with('/') {
            root.pop();
        }
        Self {
            transport,
            root,
            connected: false,
            created_dirs: HashSet::new(),
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn ensure_connected(&mut self) -> Result<(), TargetError> {
        if !self.connected {
            self.transport.connect().await?;
            self.connected = true;
            tracing::debug!(root = %self.root, "remote target connected");
        }
        Ok(())
    }

    async fn run_checked(&mut self, cmdline: String, cancel: &CancelToken) -> Result<(), TargetError> {
        let status = self.transport.run_command(&cmdline, cancel).await?;
        if status != 0 {
            return Err(TargetError::CommandFailed {
                command: cmdline,
                status,
            });
        }
        Ok(())
    }

    async fn ensure_parent(&mut self, remote_path: &str, cancel: &CancelToken) -> Result<(), TargetError> {
        let Some(dir) = parent_dir(remote_path) else {
            return Ok(());
        };
        if self.created_dirs.contains(dir) {
            tracing::trace!(dir, "mkdir memoized");
            return Ok(());
        }

        self.run_checked(format!("mkdir -p {}", shell::quote(dir)), cancel)
            .await?;
        tracing::debug!(dir, "created remote directory");

        let mut current = Some(dir);
        while let Some(d) = current {
            if !self.created_dirs.insert(d.to_string()) {
                break;
            }
            if d == self.root || d == "/" || !d.starts_with(&self.root) {
                break;
            }
            current = parent_dir(d);
        }
        Ok(())
    }

    /// `cd <root> && [sudo -n] <command> <args…>`, every word quoted.
    fn execute_cmdline(&self, command: &str, args: &[String], elevate: bool) -> String {
        let mut cmdline = format!("cd {} && ", shell::quote(&self.root));
        if elevate {
            cmdline.push_str(ELEVATE_PREFIX);
            cmdline.push(' ');
        }
        cmdline.push_str(&shell::quote(command));
        for arg in args {
            cmdline.push(' ');
            cmdline.push_str(&shell::quote(arg));
        }
        cmdline
    }

    async fn upload(&mut self, source: FileSource<'_>, remote_path: &str) -> Result<(), TransportError> {
        match source {
            FileSource::Bytes(bytes) => self.transport.upload_bytes(bytes, remote_path).await,
            FileSource::LocalFile(local) => self.transport.upload_file(local, remote_path).await,
            FileSource::Stream(reader) => self.transport.upload_stream(reader, remote_path).await,
        }
    }
}

fn map_not_found(e: TransportError) -> TargetError {
    match e {
        TransportError::NotFound(path) => TargetError::NotFound(path),
        other => TargetError::Transport(other),
    }
}

#[async_trait]
impl<T: Transport> ExecutionTarget for RemoteTarget<T> {
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
        self.ensure_connected().await?;
        self.ensure_parent(remote_path, cancel).await?;
        cancel.run(self.upload(source, remote_path)).await??;
        Ok(())
    }

    async fn read_file(&mut self, remote_path: &str, cancel: &CancelToken) -> Result<Vec<u8>, TargetError> {
        let mut buf = Vec::new();
        self.read_file_to(remote_path, &mut buf, cancel).await?;
        Ok(buf)
    }

    async fn read_file_to(
        &mut self,
        remote_path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        cancel: &CancelToken,
    ) -> Result<u64, TargetError> {
        cancel.check()?;
        self.ensure_connected().await?;
        cancel
            .run(self.transport.download_to_stream(remote_path, sink))
            .await?
            .map_err(map_not_found)
    }

    async fn remove_file(&mut self, remote_path: &str, cancel: &CancelToken) -> Result<(), TargetError> {
        cancel.check()?;
        self.ensure_connected().await?;
        self.run_checked(format!("rm -f {}", shell::quote(remote_path)), cancel)
            .await
    }

    async fn execute(
        &mut self,
        command: &str,
        args: &[String],
        elevate: bool,
        cancel: &CancelToken,
    ) -> Result<i32, TargetError> {
        cancel.check()?;
        self.ensure_connected().await?;
        let cmdline = self.execute_cmdline(command, args, elevate);
        tracing::debug!(%cmdline, "executing remote command");
        let status = self.transport.run_command(&cmdline, cancel).await?;
        tracing::debug!(status, "remote command finished");
        Ok(status)
    }

    async fn teardown(&mut self, mode: Teardown) {
        if self.connected && mode == Teardown::Remove {
            let cmdline = format!("rm -rf {}", shell::quote(&self.root));
            let cancel = CancelToken::new();
            let removed = best_effort("remove session root", async {
                self.run_checked(cmdline, &cancel).await
            })
            .await;
            if removed.is_some() {
                tracing::debug!(root = %self.root, "removed remote session root");
            }
        }
        self.transport.disconnect().await;
        self.connected = false;
        self.created_dirs.clear();
    }
}
