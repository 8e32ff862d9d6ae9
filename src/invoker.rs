//! Invoker: the host side of a remote call.
//!
//! Per call:
//!
//! 1. Build the call descriptor from the plan.
//! 2. Write it to `<root>/.session/command`.
//! 3. Synchronize artifacts (first successful sync only).
//! 4. Run `<dispatcher> <root>` on the target.
//! 5. Nonzero exit: fail with [`InvokeError::Execution`] without reading a
//!    result. Otherwise read and decode `<root>/.session/result` (value
//!    calls only).

use std::path::Path;

use rcall_protocol::{wire, CodecError, FormatError, JsonCodec, RemoteFileRef, SessionLayout, ValueCodec};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::builder::{CallPlan, CallShape, DescriptorError};
use crate::cancel::{CancelToken, Cancelled};
use crate::config::{ConfigError, SessionConfig, TargetKind};
use crate::sync::{self, ArtifactSet, SyncError, SyncReport};
use crate::target::{ExecutionTarget, FileSource, LocalTarget, RemoteTarget, TargetError, Teardown};
use crate::transport::SshTransport;

/// The result of a value call could not be turned into a value.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("no result at {path}")]
    Missing { path: String },

    #[error("result at {path} is not UTF-8")]
    NotUtf8 { path: String },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors from [`Invoker`] operations.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("invalid call: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("call descriptor cannot be encoded: {0}")]
    Encode(#[from] FormatError),

    #[error("artifact sync failed: {0}")]
    Sync(SyncError),

    #[error("target error: {0}")]
    Target(TargetError),

    #[error("dispatcher exited with status {status}")]
    Execution { status: i32 },

    #[error("result decoding failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl From<TargetError> for InvokeError {
    fn from(e: TargetError) -> Self {
        if e.is_cancelled() {
            InvokeError::Cancelled(Cancelled)
        } else {
            InvokeError::Target(e)
        }
    }
}

impl From<SyncError> for InvokeError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Cancelled(c) => InvokeError::Cancelled(c),
            SyncError::Target(t) => t.into(),
            other => InvokeError::Sync(other),
        }
    }
}

/// Drives calls against one session on one execution target.
///
/// Methods take `&mut self`, so one invoker has at most one call in flight.
pub struct Invoker<E: ExecutionTarget, C: ValueCodec = JsonCodec> {
    target: E,
    codec: C,
    layout: SessionLayout,
    artifacts: ArtifactSet,
    dispatcher: String,
    elevate: bool,
    synced: bool,
}

impl<E: ExecutionTarget> Invoker<E, JsonCodec> {
    pub fn new(target: E, artifacts: ArtifactSet) -> Self {
        Self::with_codec(target, artifacts, JsonCodec)
    }
}

impl Invoker<Box<dyn ExecutionTarget>, JsonCodec> {
    /// Build an invoker for the session a configuration describes.
    pub fn from_config(config: &SessionConfig) -> Result<Self, InvokeError> {
        config.validate()?;

        let target: Box<dyn ExecutionTarget> = match config.target.kind {
            TargetKind::Local => match &config.target.root {
                Some(root) => Box::new(LocalTarget::new(root)),
                None => Box::new(LocalTarget::scratch()),
            },
            TargetKind::Remote => {
                let missing = |what: &str| {
                    ConfigError::ValidationError(format!("{} is required for remote targets", what))
                };
                let root = config.target.root.clone().ok_or_else(|| missing("target.root"))?;
                let ssh = config.target.ssh.clone().ok_or_else(|| missing("[target.ssh]"))?;
                Box::new(RemoteTarget::new(SshTransport::new(ssh), root))
            }
        };

        let artifacts = config.artifact_set()?;
        Ok(Self::new(target, artifacts)
            .with_dispatcher(config.invoke.dispatcher.clone())
            .with_elevation(config.invoke.elevate))
    }
}

impl<E: ExecutionTarget, C: ValueCodec> Invoker<E, C> {
    pub fn with_codec(target: E, artifacts: ArtifactSet, codec: C) -> Self {
        let layout = SessionLayout::new(target.root_path());
        Self {
            target,
            codec,
            layout,
            artifacts,
            dispatcher: "./rcall-dispatch".to_string(),
            elevate: false,
            synced: false,
        }
    }

    /// Command that starts the dispatcher, run from the session root.
    pub fn with_dispatcher(mut self, dispatcher: impl Into<String>) -> Self {
        self.dispatcher = dispatcher.into();
        self
    }

    /// Run the dispatcher elevated.
    pub fn with_elevation(mut self, elevate: bool) -> Self {
        self.elevate = elevate;
        self
    }

    pub fn layout(&self) -> &SessionLayout {
        &self.layout
    }

    pub fn target(&self) -> &E {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut E {
        &mut self.target
    }

    /// Whether artifacts have been fully synchronized in this session.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Start a plan for a static call, using this invoker's codec.
    pub fn plan(
        &self,
        artifact: impl Into<String>,
        type_name: impl Into<String>,
        method: impl Into<String>,
    ) -> CallPlan<C> {
        CallPlan::with_shape(
            self.codec.clone(),
            CallShape::Static(rcall_protocol::MethodIdentity::new(artifact, type_name, method)),
        )
    }

    /// Synchronize artifacts now, whether or not a sync already ran.
    pub async fn sync_artifacts(&mut self, cancel: &CancelToken) -> Result<SyncReport, InvokeError> {
        let report = sync::sync(&mut self.target, &self.layout, &self.artifacts, cancel).await?;
        if report.is_complete() {
            self.synced = true;
        }
        Ok(report)
    }

    async fn ensure_synced(&mut self, cancel: &CancelToken) -> Result<(), InvokeError> {
        if self.synced {
            tracing::trace!("artifacts already synchronized");
            return Ok(());
        }
        self.sync_artifacts(cancel).await.map(|_| ())
    }

    /// Steps 1 to 5 of a call, up to a successful dispatcher exit.
    async fn dispatch(&mut self, plan: &CallPlan<C>, cancel: &CancelToken) -> Result<(), InvokeError> {
        let descriptor = plan.build()?;
        let command = wire::encode(&descriptor)?;
        tracing::debug!(
            method = %descriptor.method,
            arguments = descriptor.arguments.len(),
            "invoking"
        );

        self.target
            .write_file(FileSource::Bytes(&command), &self.layout.command_path(), cancel)
            .await?;
        self.ensure_synced(cancel).await?;

        let args = [self.layout.root().to_string()];
        let status = self
            .target
            .execute(&self.dispatcher, &args, self.elevate, cancel)
            .await?;
        if status != 0 {
            tracing::warn!(method = %descriptor.method, status, "dispatcher failed");
            return Err(InvokeError::Execution { status });
        }
        Ok(())
    }

    /// Call a method that returns nothing.
    pub async fn call_void(&mut self, plan: &CallPlan<C>, cancel: &CancelToken) -> Result<(), InvokeError> {
        self.dispatch(plan, cancel).await
    }

    /// Call a method and decode its result.
    ///
    /// Synchronous and deferred remote methods are called the same way.
    /// A missing result, or `null` where `R` does not admit it, is a
    /// [`DecodeError`].
    pub async fn call<R: DeserializeOwned>(
        &mut self,
        plan: &CallPlan<C>,
        cancel: &CancelToken,
    ) -> Result<R, InvokeError> {
        self.dispatch(plan, cancel).await?;

        let path = self.layout.result_path();
        let bytes = match self.target.read_file(&path, cancel).await {
            Ok(bytes) => bytes,
            Err(TargetError::NotFound(_)) => return Err(DecodeError::Missing { path }.into()),
            Err(e) => return Err(e.into()),
        };
        let payload = String::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8 { path })?;
        let value = self
            .codec
            .decode(&payload, std::any::type_name::<R>())
            .map_err(DecodeError::from)?;
        Ok(value)
    }

    async fn upload(&mut self, source: FileSource<'_>, cancel: &CancelToken) -> Result<RemoteFileRef, InvokeError> {
        let file = self.layout.fresh_file();
        self.target.write_file(source, file.path(), cancel).await?;
        tracing::debug!(%file, "uploaded");
        Ok(file)
    }

    /// Upload a local file to a fresh session file.
    pub async fn upload_file(&mut self, local: &Path, cancel: &CancelToken) -> Result<RemoteFileRef, InvokeError> {
        self.upload(FileSource::LocalFile(local), cancel).await
    }

    /// Upload bytes to a fresh session file.
    pub async fn upload_bytes(&mut self, bytes: &[u8], cancel: &CancelToken) -> Result<RemoteFileRef, InvokeError> {
        self.upload(FileSource::Bytes(bytes), cancel).await
    }

    /// Upload a stream to a fresh session file.
    pub async fn upload_stream(
        &mut self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        cancel: &CancelToken,
    ) -> Result<RemoteFileRef, InvokeError> {
        self.upload(FileSource::Stream(reader), cancel).await
    }

    /// Contents of a file on the target.
    pub async fn download(&mut self, file: &RemoteFileRef, cancel: &CancelToken) -> Result<Vec<u8>, InvokeError> {
        Ok(self.target.read_file(file.path(), cancel).await?)
    }

    /// Stream a file on the target into `sink`.
    pub async fn download_to(
        &mut self,
        file: &RemoteFileRef,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        cancel: &CancelToken,
    ) -> Result<u64, InvokeError> {
        Ok(self.target.read_file_to(file.path(), sink, cancel).await?)
    }

    /// End the session, removing or keeping its root.
    pub async fn teardown(mut self, mode: Teardown) {
        tracing::debug!(root = %self.layout.root(), ?mode, "tearing down session");
        self.target.teardown(mode).await;
    }
}
