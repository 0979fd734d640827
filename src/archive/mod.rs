//! Seekable archive engine.
//!
//! Bundles are gzip-compressed tar streams that additionally carry a table
//! of contents and a fixed-size footer encoding the TOC offset. Every
//! member sits in its own gzip stream, so a reader holding the TOC can
//! decompress exactly one member from its recorded offset. Unmodified
//! tar+gzip tools still extract the whole blob sequentially.

pub mod seekable;
pub mod select;
pub mod stream;
pub mod toc;
pub mod writer;

/// Media type identifying seekable tar+gzip bundles.
pub const MEDIA_TYPE: &str = "application/vnd.bundle.archive.v1.tar+gzip";

/// Reserved member marking the archive as non-prefetchable format metadata.
pub const NO_PREFETCH_LANDMARK: &str = ".no.prefetch.landmark";

/// Reserved member carrying the TOC as a file entry.
pub const TOC_ENTRY_NAME: &str = "stargz.index.json";

pub(crate) const LANDMARK_CONTENTS: u8 = 0x0f;

/// True for the two reserved member names that carry format metadata.
/// Consumers skip them during content extraction but never error on them.
pub fn is_reserved_name(name: &str) -> bool {
    name == NO_PREFETCH_LANDMARK || name == TOC_ENTRY_NAME
}
