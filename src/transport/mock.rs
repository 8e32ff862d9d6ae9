//! Mock transport for testing - simulates a remote host in memory
//!
//! Keeps a fake filesystem and a log of everything that crossed the
//! transport. `mkdir -p`, `rm -f` and `rm -rf` command lines are applied to
//! the fake filesystem; any other command line goes to the configured
//! command handler (exit status 0 by default).

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{Transport, TransportError};
use crate::cancel::{CancelToken, Cancelled};
use crate::shell;

type CommandHandler = Box<dyn FnMut(&str, &mut MockState) -> i32 + Send>;

/// Observable state of the simulated remote host.
#[derive(Debug, Default)]
pub struct MockState {
    /// Remote files by absolute path
    pub files: BTreeMap<String, Vec<u8>>,
    /// Remote directories known to exist
    pub dirs: BTreeSet<String>,
    /// Every command line run, in order
    pub commands: Vec<String>,
    /// Every uploaded path, in order
    pub uploads: Vec<String>,
    /// Every downloaded path, in order
    pub downloads: Vec<String>,
    /// Number of connect calls
    pub connects: usize,
    /// Number of disconnect calls
    pub disconnects: usize,
    /// Uploads to these paths fail
    pub failing_uploads: BTreeSet<String>,
    /// These command lines fail at the transport level
    pub failing_commands: BTreeSet<String>,
    /// Command lines containing this text run until cancelled
    pub block_on: Option<String>,
}

impl MockState {
    fn parent_exists(&self, path: &str) -> bool {
        match path.rfind('/') {
            Some(0) => true,
            Some(idx) => self.dirs.contains(&path[..idx]),
            None => false,
        }
    }

    /// Number of `mkdir` command lines run so far.
    pub fn mkdir_count(&self) -> usize {
        self.commands.iter().filter(|c| c.starts_with("mkdir ")).count()
    }
}

/// Mock transport sharing its [`MockState`] with the test.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    handler: Arc<Mutex<Option<CommandHandler>>>,
}

impl MockTransport {
    /// Create a new mock transport with an empty remote host
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            handler: Arc::new(Mutex::new(None)),
        }
    }

    /// Handle non-filesystem command lines with `handler`, which returns the exit status.
    pub fn with_handler<F>(self, handler: F) -> Self
    where
        F: FnMut(&str, &mut MockState) -> i32 + Send + 'static,
    {
        *lock(&self.handler) = Some(Box::new(handler));
        self
    }

    /// Lock the simulated host state for inspection or setup.
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    fn apply_builtin(state: &mut MockState, words: &[String]) -> Option<i32> {
        match words {
            [cmd, flag, path] if cmd == "mkdir" && flag == "-p" => {
                let mut current = String::new();
                for part in path.split('/').filter(|p| !p.is_empty()) {
                    current.push('/');
                    current.push_str(part);
                    state.dirs.insert(current.clone());
                }
                Some(0)
            }
            [cmd, flag, path] if cmd == "rm" && flag == "-f" => {
                state.files.remove(path);
                Some(0)
            }
            [cmd, flag, path] if cmd == "rm" && flag == "-rf" => {
                let prefix = format!("{}/", path);
                state.files.retain(|p, _| !p.starts_with(&prefix));
                state.dirs.retain(|d| d != path && !d.starts_with(&prefix));
                Some(0)
            }
            _ => None,
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.state().connects += 1;
        Ok(())
    }

    async fn run_command(&mut self, cmdline: &str, cancel: &CancelToken) -> Result<i32, TransportError> {
        cancel.check()?;
        let words = shell::split(cmdline)
            .ok_or_else(|| TransportError::Ssh(format!("unparseable command line: {}", cmdline)))?;

        let blocks = {
            let mut state = self.state();
            state.commands.push(cmdline.to_string());
            if state.failing_commands.contains(cmdline) {
                return Err(TransportError::Ssh(format!("command failed: {}", cmdline)));
            }
            state
                .block_on
                .as_deref()
                .map_or(false, |needle| cmdline.contains(needle))
        };
        if blocks {
            cancel.cancelled().await;
            return Err(TransportError::Cancelled(Cancelled));
        }

        let mut state = self.state();
        if let Some(status) = Self::apply_builtin(&mut *state, &words) {
            return Ok(status);
        }

        let mut handler = lock(&self.handler);
        Ok(match handler.as_mut() {
            Some(handler) => handler(cmdline, &mut *state),
            None => 0,
        })
    }

    async fn upload_bytes(&mut self, bytes: &[u8], remote_path: &str) -> Result<(), TransportError> {
        let mut state = self.state();
        state.uploads.push(remote_path.to_string());
        if state.failing_uploads.contains(remote_path) {
            return Err(TransportError::Ssh(format!("upload to {} failed", remote_path)));
        }
        if !state.parent_exists(remote_path) {
            return Err(TransportError::Ssh(format!(
                "{}: No such file or directory",
                remote_path
            )));
        }
        state.files.insert(remote_path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn upload_file(&mut self, local: &Path, remote_path: &str) -> Result<(), TransportError> {
        let bytes = tokio::fs::read(local).await?;
        self.upload_bytes(&bytes, remote_path).await
    }

    async fn upload_stream(
        &mut self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        remote_path: &str,
    ) -> Result<(), TransportError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await?;
        self.upload_bytes(&bytes, remote_path).await
    }

    async fn download_to_stream(
        &mut self,
        remote_path: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, TransportError> {
        let bytes = {
            let mut state = self.state();
            state.downloads.push(remote_path.to_string());
            state
                .files
                .get(remote_path)
                .cloned()
                .ok_or_else(|| TransportError::NotFound(remote_path.to_string()))?
        };
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(bytes.len() as u64)
    }

    async fn disconnect(&mut self) {
        self.state().disconnects += 1;
    }
}
