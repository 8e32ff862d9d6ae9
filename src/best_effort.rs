//! Non-critical operations.
//!
//! Some steps may fail without affecting correctness: writing the artifact
//! manifest, deleting a session on teardown. Their failures are logged and
//! reported as `None`, never propagated.

use std::fmt::Display;
use std::future::Future;

/// Await `fut`, turning an error into a logged `None`.
pub async fn best_effort<T, E, F>(what: &str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(operation = what, error = %e, "non-critical operation failed");
            None
        }
    }
}
