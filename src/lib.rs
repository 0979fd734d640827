//! OCI artifact bundle distribution.
//!
//! Packages a directory tree as a seekable tar+gzip archive, uploads it as
//! an OCI artifact, and on retrieval extracts either the whole tree or a
//! selected subset — fetching only the bytes it needs when the registry
//! supports HTTP ranges, and validating every member against a security
//! policy chain before anything touches the filesystem.
//!
//! # Example
//!
//! ```ignore
//! use ocibundle::{CancelToken, Client, PullOptions, PushOptions};
//!
//! let client = Client::builder().registry(my_registry).build()?;
//! let token = CancelToken::new();
//!
//! client.push(&token, "./site", "registry.example.com/team/site:v1", &PushOptions::new())?;
//!
//! let options = PullOptions::new().files_to_extract(&["**/*.json"]);
//! client.pull(&token, "registry.example.com/team/site:v1", "./out", &options)?;
//! ```

pub mod archive;
mod cache;
mod cancel;
mod client;
mod entry;
mod error;
pub mod fetch;
mod matcher;
mod options;
pub mod policy;
mod reference;
pub mod registry;
mod verify;

pub use archive::{MEDIA_TYPE, NO_PREFETCH_LANDMARK, TOC_ENTRY_NAME};
pub use cache::BundleCache;
pub use cancel::CancelToken;
pub use client::{Client, ClientBuilder};
pub use entry::{EntryInfo, EntryKind, FileMetadata, ListResult, Report};
pub use error::{Error, RegistryError, SecurityError, SignatureError};
pub use fetch::{HttpRangeReader, ReadAt, SectionReader, SeekerReader, TocBytesReader};
pub use matcher::matches;
pub use options::{ExtractOptions, ProgressFn, PullOptions, PushOptions};
pub use policy::{sanitize_mode, ExtractionState, PathPolicy, Policy, PolicyChain};
pub use reference::Reference;
pub use registry::{blob_url, Descriptor, HttpConfig, PushDescriptor, Registry, RegistryAuth};
pub use verify::Verifier;

use std::io::{Read, Write};
use std::path::Path;

/// Archive a directory into `out` with default settings.
///
/// This is the "just works" convenience API around
/// [`archive::writer::write_archive`]: no cancellation, no progress
/// callback. Returns the total blob size in bytes.
///
/// # Example
///
/// ```no_run
/// let mut blob = Vec::new();
/// let size = ocibundle::archive_dir("./site", &mut blob)?;
/// # Ok::<(), ocibundle::Error>(())
/// ```
pub fn archive_dir<P, W>(source: P, out: W) -> Result<u64, Error>
where
    P: AsRef<Path>,
    W: Write,
{
    archive::writer::write_archive(&CancelToken::new(), source.as_ref(), out, None)
}

/// Extract a compressed bundle stream with default settings.
///
/// The destination directory is created if it doesn't exist. For bounds,
/// pattern selection, or cancellation, use
/// [`archive::stream::extract_stream`] directly.
///
/// # Example
///
/// ```no_run
/// let blob = std::fs::File::open("bundle.tar.gz")?;
/// let report = ocibundle::extract(blob, "/var/bundles/site")?;
/// println!("extracted {} files", report.files_extracted);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn extract<R, P>(reader: R, destination: P) -> Result<Report, Error>
where
    R: Read,
    P: AsRef<Path>,
{
    archive::stream::extract_stream(
        &CancelToken::new(),
        reader,
        destination.as_ref(),
        &ExtractOptions::default(),
    )
}
