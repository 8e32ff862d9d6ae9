//! Session directory layout.
//!
//! ```text
//! <root>/<artifact files>
//! <root>/.session/command
//! <root>/.session/result
//! <root>/.session/manifest
//! <root>/.session/<uuid>        ad hoc uploads and fresh files
//! ```
//!
//! Paths are target paths and always use `/`, whatever the host platform.

use uuid::Uuid;

use crate::file_ref::RemoteFileRef;
use crate::{COMMAND_FILE, MANIFEST_FILE, RESULT_FILE, SESSION_DIR};

/// Computes every path of one session from its root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    root: String,
}

impl SessionLayout {
    /// Trailing slashes on `root` are dropped (except for `/` itself).
    pub fn new(root: impl Into<String>) -> Self {
        let mut root = root.into();
        while root.len() > 1 && root.ends_with('/') {
            root.pop();
        }
        Self { root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// `<root>/<relative>`.
    pub fn artifact_path(&self, relative: &str) -> String {
        join(&self.root, relative)
    }

    /// `<root>/.session`.
    pub fn session_dir(&self) -> String {
        join(&self.root, SESSION_DIR)
    }

    pub fn command_path(&self) -> String {
        join(&self.session_dir(), COMMAND_FILE)
    }

    pub fn result_path(&self) -> String {
        join(&self.session_dir(), RESULT_FILE)
    }

    pub fn manifest_path(&self) -> String {
        join(&self.session_dir(), MANIFEST_FILE)
    }

    /// A new, unused file reference under `<root>/.session/`.
    pub fn fresh_file(&self) -> RemoteFileRef {
        RemoteFileRef::new(join(&self.session_dir(), &Uuid::new_v4().to_string()))
    }
}

fn join(base: &str, name: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}
