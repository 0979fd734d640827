//! Table-of-contents parsing and the listing API.

use std::io::{Cursor, Read};

use serde::{Deserialize, Serialize};

use crate::archive::seekable::{parse_footer, FOOTER_READ_SIZE, FOOTER_SIZE};
use crate::archive::{is_reserved_name, TOC_ENTRY_NAME};
use crate::entry::{EntryKind, FileMetadata, ListResult};
use crate::error::Error;
use crate::fetch::{read_full_at, ReadAt};
use crate::matcher;

/// The TOC document appended to every bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toc {
    pub version: u32,
    pub entries: Vec<TocEntry>,
}

/// One TOC row describing an archive member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TocEntry {
    /// Archive-relative path, forward-slash separated.
    pub name: String,
    /// `reg`, `dir`, or `symlink`.
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(default)]
    pub size: u64,
    /// Modification time, unix seconds.
    #[serde(default)]
    pub modtime: u64,
    /// Symlink target; empty otherwise.
    #[serde(default, rename = "linkName")]
    pub link_name: String,
    /// POSIX permission+type bits.
    #[serde(default)]
    pub mode: u32,
    /// Byte offset of the member's gzip stream within the blob.
    #[serde(default)]
    pub offset: u64,
}

impl TocEntry {
    /// Maps the raw type tag onto the entry model.
    ///
    /// Only `reg`, `dir`, and `symlink` are extractable. Every other tag
    /// (hard links, device nodes, fifos, tags from future format
    /// revisions) yields `None` so the selective extractor ignores it,
    /// mirroring how the streaming extractor treats the corresponding tar
    /// types. An unknown tag must never fall through as `File`: that
    /// would make the extractor chase a content offset that holds none.
    pub fn kind(&self) -> Option<EntryKind> {
        match self.entry_type.as_str() {
            "reg" => Some(EntryKind::File),
            "dir" => Some(EntryKind::Directory),
            "symlink" => Some(EntryKind::Symlink {
                target: self.link_name.clone(),
            }),
            _ => None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.entry_type == "dir"
    }

    pub fn to_metadata(&self) -> FileMetadata {
        FileMetadata {
            name: self.name.clone(),
            size: self.size,
            mode: self.mode,
            is_dir: self.is_dir(),
            link_target: self.link_name.clone(),
            type_tag: self.entry_type.clone(),
        }
    }
}

/// Locate and parse the TOC of a blob through a random-access reader.
///
/// Reads the last [`FOOTER_READ_SIZE`] bytes for the footer, then exactly
/// the `[toc_offset, size - footer_len)` range. No other blob bytes are
/// touched.
pub fn read_toc<R: ReadAt + ?Sized>(reader: &R, size: u64) -> Result<Toc, Error> {
    if size < FOOTER_SIZE as u64 {
        return Err(Error::Format {
            detail: format!("blob of {} bytes cannot hold a footer", size),
        });
    }

    let tail_len = size.min(FOOTER_READ_SIZE);
    let mut tail = vec![0u8; tail_len as usize];
    read_full_at(reader, &mut tail, size - tail_len)?;
    let (toc_offset, footer_len) = parse_footer(&tail)?;

    let toc_end = size - footer_len as u64;
    if toc_offset >= toc_end {
        return Err(Error::Format {
            detail: format!(
                "footer places the TOC at {} past its end at {}",
                toc_offset, toc_end
            ),
        });
    }

    let mut buf = vec![0u8; (toc_end - toc_offset) as usize];
    read_full_at(reader, &mut buf, toc_offset)?;
    parse_toc_member(&buf)
}

/// Decode the TOC member: a gzip stream holding the tar entry
/// `stargz.index.json` whose body is the JSON document.
fn parse_toc_member(bytes: &[u8]) -> Result<Toc, Error> {
    let gz = flate2::read::MultiGzDecoder::new(Cursor::new(bytes));
    let mut archive = tar::Archive::new(gz);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        if name == TOC_ENTRY_NAME {
            let mut json = Vec::new();
            entry.read_to_end(&mut json)?;
            let toc: Toc = serde_json::from_slice(&json)?;
            return Ok(toc);
        }
    }

    Err(Error::Format {
        detail: format!("'{}' member not found at TOC offset", TOC_ENTRY_NAME),
    })
}

/// Convert a TOC into the listing result, optionally filtered by glob
/// patterns. Reserved metadata members never appear in the output.
pub fn list_entries(toc: &Toc, patterns: &[String]) -> ListResult {
    let mut result = ListResult::default();

    for entry in &toc.entries {
        if is_reserved_name(&entry.name) || entry.kind().is_none() {
            continue;
        }
        if !patterns.is_empty() && !matcher::matches(&entry.name, patterns) {
            continue;
        }

        if entry.is_dir() {
            result.dir_count += 1;
        } else {
            result.file_count += 1;
            result.total_size += entry.size;
        }
        result.files.push(entry.to_metadata());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with_tag(tag: &str) -> TocEntry {
        TocEntry {
            name: "member".to_string(),
            entry_type: tag.to_string(),
            size: 0,
            modtime: 0,
            link_name: String::new(),
            mode: 0o644,
            offset: 128,
        }
    }

    #[test]
    fn only_extractable_tags_map_to_kinds() {
        assert_eq!(entry_with_tag("reg").kind(), Some(EntryKind::File));
        assert_eq!(entry_with_tag("dir").kind(), Some(EntryKind::Directory));
        assert!(matches!(
            entry_with_tag("symlink").kind(),
            Some(EntryKind::Symlink { .. })
        ));
    }

    #[test]
    fn special_and_unknown_tags_are_never_content() {
        for tag in ["hardlink", "fifo", "char", "block", "chunk", "REG", ""] {
            assert_eq!(entry_with_tag(tag).kind(), None, "tag {:?}", tag);
        }
    }

    #[test]
    fn unknown_tags_are_dropped_from_listings() {
        let toc = Toc {
            version: 1,
            entries: vec![entry_with_tag("reg"), entry_with_tag("fifo")],
        };
        let result = list_entries(&toc, &[]);
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.file_count, 1);
    }
}
