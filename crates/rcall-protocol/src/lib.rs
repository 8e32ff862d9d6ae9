//! rcall Protocol Types
//!
//! Defines everything the invoker (host) and the dispatcher (target) must
//! agree on: the call descriptor and its binary encoding, the artifact
//! manifest text format, the session directory layout, remote file
//! references and the value codec.

pub mod codec;
pub mod descriptor;
pub mod digest;
pub mod error;
pub mod file_ref;
pub mod manifest;
pub mod session;
pub mod wire;

pub use codec::{JsonCodec, RemoteType, ValueCodec};
pub use descriptor::{Argument, CallDescriptor, MethodIdentity};
pub use digest::{hash_bytes, ContentHasher};
pub use error::{CodecError, FormatError};
pub use file_ref::RemoteFileRef;
pub use manifest::Manifest;
pub use session::SessionLayout;

/// Name of the per-session bookkeeping directory under the session root.
pub const SESSION_DIR: &str = ".session";

/// File (under [`SESSION_DIR`]) holding the encoded call descriptor.
pub const COMMAND_FILE: &str = "command";

/// File (under [`SESSION_DIR`]) holding the encoded call result.
pub const RESULT_FILE: &str = "result";

/// File (under [`SESSION_DIR`]) holding the artifact manifest.
pub const MANIFEST_FILE: &str = "manifest";

/// Current lane version string.
pub const LANE_VERSION: &str = env!("CARGO_PKG_VERSION");
