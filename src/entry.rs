//! Archive member model shared by the writer, extractors, and listing API.

/// Kind of an archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink { target: String },
}

/// Metadata for one archive member, as seen by the security policies.
#[derive(Debug, Clone)]
pub struct EntryInfo {
    /// Archive-relative path, forward-slash separated.
    pub name: String,
    /// Uncompressed size in bytes. Zero for directories and symlinks.
    pub size: u64,
    pub kind: EntryKind,
    /// POSIX mode bits from the tar header, if present.
    pub mode: Option<u32>,
}

impl EntryInfo {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.kind, EntryKind::Symlink { .. })
    }
}

/// One row of the listing API output.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// Archive-relative path, forward-slash separated.
    pub name: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// POSIX permission+type bits.
    pub mode: u32,
    pub is_dir: bool,
    /// Symlink target, empty for other kinds.
    pub link_target: String,
    /// Raw type tag from the TOC (`dir`, `reg`, `symlink`, ...).
    pub type_tag: String,
}

/// Result of listing a bundle without downloading it.
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    /// Members in TOC order.
    pub files: Vec<FileMetadata>,
    pub file_count: usize,
    pub dir_count: usize,
    /// Sum of uncompressed file sizes.
    pub total_size: u64,
}

/// Extraction statistics.
#[derive(Debug, Clone, Default)]
pub struct Report {
    /// Number of regular files written.
    pub files_extracted: usize,
    /// Number of directories created.
    pub dirs_created: usize,
    /// Total bytes written.
    pub bytes_written: u64,
    /// Entries skipped (reserved members, filtered, unsupported symlinks).
    pub entries_skipped: usize,
}
