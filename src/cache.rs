//! Content-cache collaborator contract.

use std::path::{Path, PathBuf};

use crate::error::Error;

/// A digest-keyed blob cache, coordinated outside the engine.
///
/// The client calls `prepare` lazily, once, before first use; a failed
/// preparation disables the cache for the client's lifetime rather than
/// failing the operation.
pub trait BundleCache: Send + Sync {
    /// One-time setup (create directories, open indexes).
    fn prepare(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Path of a cached blob, if present.
    fn get(&self, digest: &str) -> Option<PathBuf>;

    /// Store a blob under its digest.
    fn put(&self, digest: &str, blob: &Path) -> Result<(), Error>;
}
