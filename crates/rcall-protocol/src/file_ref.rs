//! Remote file references.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::RemoteType;

/// Opaque handle to a file on one execution target.
///
/// Wraps the absolute path on the target that owns the file. It is only
/// meaningful inside that environment: the host resolves it through the
/// execution target, the dispatcher through its local filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteFileRef {
    path: String,
}

impl RemoteFileRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Absolute path on the owning target.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn into_path(self) -> String {
        self.path
    }
}

impl fmt::Display for RemoteFileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote:{}", self.path)
    }
}

impl RemoteType for RemoteFileRef {
    const TYPE_NAME: &'static str = "rcall.RemoteFileRef";
}
