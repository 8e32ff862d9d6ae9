//! rcall - remote invocation lane
//!
//! Invokes a named method on an execution target (this machine or a remote
//! host reached over SSH), synchronizing the method's supporting artifacts
//! into a session directory lazily and incrementally.
//!
//! The host side lives here. The target side is the `rcall-dispatch`
//! crate; both share the wire types in `rcall-protocol`.

pub mod best_effort;
pub mod builder;
pub mod cancel;
pub mod config;
pub mod invoker;
pub mod shell;
pub mod sync;
pub mod target;
pub mod transport;

pub use best_effort::best_effort;
pub use builder::{CallPlan, CallShape, DescriptorError};
pub use cancel::{CancelToken, Cancelled};
pub use config::{ConfigError, SessionConfig, TargetKind};
pub use invoker::{DecodeError, InvokeError, Invoker};
pub use sync::{sync, ArtifactSet, SyncError, SyncReport};
pub use target::{ExecutionTarget, FileSource, LocalTarget, RemoteTarget, TargetError, Teardown};
pub use transport::{MockTransport, SshConfig, SshTransport, Transport, TransportError};

pub use rcall_protocol::{JsonCodec, RemoteFileRef, RemoteType, SessionLayout, ValueCodec};
