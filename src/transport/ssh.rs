//! SSH transport for production use
//!
//! Drives the system `ssh` client. The first [`Transport::connect`] starts a
//! control master (`ControlMaster=auto` + `ControlPersist`); every later
//! command, upload and download is multiplexed over it. File transfer is
//! `cat` on the remote side with stdin/stdout piped.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::{Transport, TransportError};
use crate::cancel::{CancelToken, Cancelled};
use crate::shell;

/// Exit status ssh itself uses for connection and protocol failures.
const SSH_FAILURE_STATUS: i32 = 255;

/// Exit status of the download command when the remote file is missing.
const MISSING_FILE_STATUS: i32 = 66;

/// SSH transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Remote host
    pub host: String,
    /// SSH user
    #[serde(default = "default_user")]
    pub user: String,
    /// SSH port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path to SSH private key
    #[serde(default, alias = "identity_file")]
    pub key_path: Option<String>,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
    /// Server alive interval for detecting dead connections
    #[serde(default = "default_server_alive_interval")]
    pub server_alive_interval: u32,
    /// Server alive count max
    #[serde(default = "default_server_alive_count_max")]
    pub server_alive_count_max: u32,
    /// How long the control master outlives its last client
    #[serde(default = "default_control_persist")]
    pub control_persist_seconds: u32,
    /// Directory for the control socket (default: system temp dir)
    #[serde(default)]
    pub control_dir: Option<PathBuf>,
}

fn default_user() -> String {
    "rcall".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u32 {
    30
}

fn default_server_alive_interval() -> u32 {
    15
}

fn default_server_alive_count_max() -> u32 {
    2
}

fn default_control_persist() -> u32 {
    60
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: default_user(),
            port: default_port(),
            key_path: None,
            connect_timeout_seconds: default_connect_timeout(),
            server_alive_interval: default_server_alive_interval(),
            server_alive_count_max: default_server_alive_count_max(),
            control_persist_seconds: default_control_persist(),
            control_dir: None,
        }
    }
}

/// SSH transport for production use
pub struct SshTransport {
    config: SshConfig,
    connected: bool,
}

impl SshTransport {
    /// Create a new SSH transport with the given configuration
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            connected: false,
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.config.user, self.config.host)
    }

    fn control_path(&self) -> PathBuf {
        let dir = self
            .config
            .control_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        dir.join("rcall-%C")
    }

    /// Build SSH option arguments. Only the connect step may become master.
    fn build_ssh_args(&self, master: bool) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_seconds),
            "-o".to_string(),
            format!("ServerAliveInterval={}", self.config.server_alive_interval),
            "-o".to_string(),
            format!("ServerAliveCountMax={}", self.config.server_alive_count_max),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path().display()),
            "-o".to_string(),
            if master {
                "ControlMaster=auto".to_string()
            } else {
                "ControlMaster=no".to_string()
            },
            "-p".to_string(),
            self.config.port.to_string(),
        ];

        if master {
            args.push("-o".to_string());
            args.push(format!("ControlPersist={}", self.config.control_persist_seconds));
        }

        if let Some(ref key_path) = self.config.key_path {
            args.push("-i".to_string());
            args.push(key_path.clone());
        }

        args
    }

    fn command(&self, remote_cmdline: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.build_ssh_args(false))
            .arg(self.destination())
            .arg(remote_cmdline)
            .kill_on_drop(true);
        cmd
    }

    fn spawn(&self, remote_cmdline: &str, stdin: Stdio, stdout: Stdio) -> Result<Child, TransportError> {
        self.command(remote_cmdline)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TransportError::Ssh(format!("Failed to spawn SSH: {}", e)))
    }

    async fn finish(mut child: Child, stderr: JoinHandle<String>, what: &str) -> Result<(), TransportError> {
        let status = child
            .wait()
            .await
            .map_err(|e| TransportError::Ssh(format!("SSH process error: {}", e)))?;
        let stderr = stderr.await.unwrap_or_default();

        if !status.success() {
            return Err(TransportError::Ssh(format!(
                "{} failed with {}: {}",
                what,
                status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Collect the child's stderr on a separate task. The pipe must be drained
/// while stdin or stdout is streamed.
fn drain_stderr(child: &mut Child) -> JoinHandle<String> {
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut pipe) = stderr {
            let _ = pipe.read_to_string(&mut buf).await;
        }
        buf
    })
}

/// Wait for `child`, killing it if `cancel` fires first.
async fn wait_cancellable(child: &mut Child, cancel: &CancelToken) -> Result<ExitStatus, TransportError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            // Closing the channel is the only signal the remote side gets.
            if let Err(e) = child.start_kill() {
                tracing::warn!(error = %e, "failed to kill ssh client");
            }
            Err(TransportError::Cancelled(Cancelled))
        }
        status = child.wait() => Ok(status?),
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.connected {
            return Ok(());
        }

        // The persisted master keeps its inherited descriptors open, so
        // nothing of it may be piped or the wait below never returns.
        let status = Command::new("ssh")
            .args(self.build_ssh_args(true))
            .arg(self.destination())
            .arg("true")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to spawn SSH: {}", e)))?;

        if !status.success() {
            return Err(TransportError::ConnectionFailed(format!(
                "ssh to {} exited with {}",
                self.destination(),
                status
            )));
        }

        tracing::debug!(destination = %self.destination(), "ssh control master established");
        self.connected = true;
        Ok(())
    }

    async fn run_command(&mut self, cmdline: &str, cancel: &CancelToken) -> Result<i32, TransportError> {
        cancel.check()?;
        let mut child = self.spawn(cmdline, Stdio::null(), Stdio::inherit())?;
        let stderr_task = drain_stderr(&mut child);

        let status = match wait_cancellable(&mut child, cancel).await {
            Ok(status) => status,
            Err(e) => {
                stderr_task.abort();
                return Err(e);
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();
        let code = status.code().unwrap_or(-1);
        if code == SSH_FAILURE_STATUS {
            return Err(TransportError::Ssh(format!(
                "ssh exited with {}: {}",
                SSH_FAILURE_STATUS,
                stderr.trim()
            )));
        }
        if code != 0 && !stderr.trim().is_empty() {
            tracing::warn!(status = code, stderr = %stderr.trim(), "remote command failed");
        }
        Ok(code)
    }

    async fn upload_bytes(&mut self, bytes: &[u8], remote_path: &str) -> Result<(), TransportError> {
        let mut reader = bytes;
        self.upload_stream(&mut reader, remote_path).await
    }

    async fn upload_file(&mut self, local: &Path, remote_path: &str) -> Result<(), TransportError> {
        let mut file = tokio::fs::File::open(local).await?;
        self.upload_stream(&mut file, remote_path).await
    }

    async fn upload_stream(
        &mut self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        remote_path: &str,
    ) -> Result<(), TransportError> {
        let cmdline = format!("cat > {}", shell::quote(remote_path));
        let mut child = self.spawn(&cmdline, Stdio::piped(), Stdio::null())?;
        let stderr = drain_stderr(&mut child);

        if let Some(mut stdin) = child.stdin.take() {
            tokio::io::copy(reader, &mut stdin).await?;
            stdin.shutdown().await?;
        }

        Self::finish(child, stderr, "upload").await
    }

    async fn download_to_stream(
        &mut self,
        remote_path: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, TransportError> {
        let quoted = shell::quote(remote_path);
        let cmdline = format!("[ -f {q} ] || exit {}; cat {q}", MISSING_FILE_STATUS, q = quoted);
        let mut child = self.spawn(&cmdline, Stdio::null(), Stdio::piped())?;
        let stderr = drain_stderr(&mut child);

        let mut copied = 0;
        if let Some(mut stdout) = child.stdout.take() {
            copied = tokio::io::copy(&mut stdout, writer).await?;
        }
        writer.flush().await?;

        let status = child
            .wait()
            .await
            .map_err(|e| TransportError::Ssh(format!("SSH process error: {}", e)))?;
        let stderr = stderr.await.unwrap_or_default();
        match status.code() {
            Some(0) => Ok(copied),
            Some(MISSING_FILE_STATUS) => Err(TransportError::NotFound(remote_path.to_string())),
            _ => Err(TransportError::Ssh(format!(
                "download failed with {}: {}",
                status,
                stderr.trim()
            ))),
        }
    }

    async fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        let result = Command::new("ssh")
            .args(["-O", "exit", "-o"])
            .arg(format!("ControlPath={}", self.control_path().display()))
            .arg(self.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            tracing::debug!(error = %e, "ssh control master shutdown failed");
        }
        self.connected = false;
    }
}
