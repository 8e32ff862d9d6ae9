//! Content hashing for artifacts.
//!
//! SHA-256, hex-encoded lowercase.

use sha2::{Digest, Sha256};

/// Incremental content hasher.
#[derive(Default)]
pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    /// Finish and return the lowercase hex digest.
    pub fn finish(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

/// Hash a complete buffer.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = ContentHasher::new();
    hasher.update(bytes);
    hasher.finish()
}
