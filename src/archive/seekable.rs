//! Seekable blob serialization: per-member gzip streams, TOC member, and
//! the fixed-size footer.
//!
//! The footer is itself a complete gzip member with an empty payload; the
//! TOC offset rides in its FEXTRA field, so the blob stays valid to any
//! standard gzip reader while a seekable reader can recover the TOC from
//! the last bytes alone.

use std::io::{self, Cursor, Read, Write};

use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{EntryType, Header};

use crate::archive::toc::{Toc, TocEntry};
use crate::archive::{LANDMARK_CONTENTS, NO_PREFETCH_LANDMARK, TOC_ENTRY_NAME};
use crate::error::Error;

/// Size of the footer in bytes.
pub const FOOTER_SIZE: usize = 48;

/// How many trailing bytes a reader fetches to locate the footer.
pub const FOOTER_READ_SIZE: u64 = 100;

const FOOTER_MAGIC: &[u8; 6] = b"STARGZ";

/// Encode the footer for a TOC starting at `toc_offset`.
///
/// Layout: gzip header with FEXTRA (`SG` subfield: sixteen lowercase hex
/// digits of the offset followed by `STARGZ`), an empty final deflate
/// block, and zero CRC32/ISIZE.
pub fn footer_bytes(toc_offset: u64) -> [u8; FOOTER_SIZE] {
    let mut buf = [0u8; FOOTER_SIZE];
    buf[0] = 0x1f; // gzip magic
    buf[1] = 0x8b;
    buf[2] = 0x08; // deflate
    buf[3] = 0x04; // FLG: FEXTRA
    buf[9] = 0xff; // OS: unknown
    buf[10..12].copy_from_slice(&26u16.to_le_bytes()); // XLEN
    buf[12] = b'S';
    buf[13] = b'G';
    buf[14..16].copy_from_slice(&22u16.to_le_bytes());
    let hex = format!("{:016x}", toc_offset);
    buf[16..32].copy_from_slice(hex.as_bytes());
    buf[32..38].copy_from_slice(FOOTER_MAGIC);
    buf[38] = 0x03; // empty final deflate block
    buf[39] = 0x00;
    // CRC32 and ISIZE of the empty stream stay zero
    buf
}

/// Parse the footer from the last bytes of a blob.
///
/// `tail` holds at least the trailing [`FOOTER_SIZE`] bytes. Returns the
/// TOC offset and the actual footer length.
pub fn parse_footer(tail: &[u8]) -> Result<(u64, usize), Error> {
    if tail.len() < FOOTER_SIZE {
        return Err(Error::Format {
            detail: format!("blob too small for footer ({} bytes)", tail.len()),
        });
    }
    let f = &tail[tail.len() - FOOTER_SIZE..];

    if f[0] != 0x1f || f[1] != 0x8b || f[2] != 0x08 || f[3] != 0x04 {
        return Err(Error::Format {
            detail: "footer is not a gzip stream with an extra field".to_string(),
        });
    }
    if f[12] != b'S' || f[13] != b'G' || &f[32..38] != FOOTER_MAGIC {
        return Err(Error::Format {
            detail: "footer magic not found".to_string(),
        });
    }

    let hex = std::str::from_utf8(&f[16..32]).map_err(|_| Error::Format {
        detail: "footer offset is not valid UTF-8".to_string(),
    })?;
    let toc_offset = u64::from_str_radix(hex, 16).map_err(|_| Error::Format {
        detail: format!("footer offset '{}' is not hexadecimal", hex),
    })?;

    Ok((toc_offset, FOOTER_SIZE))
}

/// A writer that frames its input into independent gzip members.
///
/// Members are buffered and flushed to the sink on `cut`, which also
/// reports the byte offset where the next member will begin.
pub(crate) struct SegmentWriter<W: Write> {
    inner: W,
    encoder: Option<GzEncoder<Vec<u8>>>,
    written: u64,
}

impl<W: Write> SegmentWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self {
            inner,
            encoder: None,
            written: 0,
        }
    }

    /// Finish the open member (if any) and return the offset at which the
    /// next member starts.
    pub(crate) fn cut(&mut self) -> io::Result<u64> {
        if let Some(encoder) = self.encoder.take() {
            let member = encoder.finish()?;
            self.inner.write_all(&member)?;
            self.written += member.len() as u64;
        }
        Ok(self.written)
    }

    /// Flush the final member and return the sink with the total byte count.
    pub(crate) fn finish(mut self) -> io::Result<(W, u64)> {
        self.cut()?;
        Ok((self.inner, self.written))
    }
}

impl<W: Write> Write for SegmentWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder
            .get_or_insert_with(|| GzEncoder::new(Vec::new(), Compression::best()))
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Compress a tar stream into a seekable blob.
///
/// Emits the landmark member, one gzip member per tar entry, the TOC
/// member, the tar terminator, and the footer. Returns the total blob
/// size in bytes.
pub fn build_seekable<W: Write>(tar_bytes: &[u8], out: W) -> Result<u64, Error> {
    let segments = SegmentWriter::new(out);
    let mut writer = tar::Builder::new(segments);

    let mut landmark = Header::new_gnu();
    landmark.set_entry_type(EntryType::Regular);
    landmark.set_size(1);
    landmark.set_mode(0o600);
    landmark.set_mtime(0);
    writer.append_data(&mut landmark, NO_PREFETCH_LANDMARK, &[LANDMARK_CONTENTS][..])?;

    let mut toc_entries: Vec<TocEntry> = Vec::new();
    let mut archive = tar::Archive::new(Cursor::new(tar_bytes));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().replace('\\', "/");
        let mut header = entry.header().clone();
        let size = header.size()?;
        let mode = header.mode().unwrap_or(0);
        let mtime = header.mtime().unwrap_or(0);

        let offset = writer.get_mut().cut()?;

        match header.entry_type() {
            EntryType::Regular | EntryType::Continuous => {
                toc_entries.push(TocEntry {
                    name: name.clone(),
                    entry_type: "reg".to_string(),
                    size,
                    modtime: mtime,
                    link_name: String::new(),
                    mode,
                    offset,
                });
                writer.append_data(&mut header, &name, &mut entry)?;
            }
            EntryType::Directory => {
                toc_entries.push(TocEntry {
                    name: name.clone(),
                    entry_type: "dir".to_string(),
                    size: 0,
                    modtime: mtime,
                    link_name: String::new(),
                    mode,
                    offset,
                });
                writer.append_data(&mut header, &name, io::empty())?;
            }
            EntryType::Symlink => {
                let target = entry
                    .link_name()?
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                toc_entries.push(TocEntry {
                    name: name.clone(),
                    entry_type: "symlink".to_string(),
                    size: 0,
                    modtime: mtime,
                    link_name: target.clone(),
                    mode,
                    offset,
                });
                writer.append_link(&mut header, &name, &target)?;
            }
            // The archive writer only produces the three types above
            _ => continue,
        }
    }

    let toc_offset = writer.get_mut().cut()?;
    let toc = Toc {
        version: 1,
        entries: toc_entries,
    };
    let json = serde_json::to_vec(&toc)?;
    let mut toc_header = Header::new_gnu();
    toc_header.set_entry_type(EntryType::Regular);
    toc_header.set_size(json.len() as u64);
    toc_header.set_mode(0o444);
    toc_header.set_mtime(0);
    writer.append_data(&mut toc_header, TOC_ENTRY_NAME, &json[..])?;

    // Terminator blocks get their own member after the TOC
    writer.get_mut().cut()?;
    let segments = writer.into_inner()?;
    let (mut out, total) = segments.finish()?;

    out.write_all(&footer_bytes(toc_offset))?;
    out.flush()?;
    Ok(total + FOOTER_SIZE as u64)
}

/// Read one member's content from a gzip stream positioned at its offset.
///
/// The reader must be positioned at the start of the member's gzip stream;
/// `expected_name` guards against a TOC that lies about offsets.
pub(crate) fn open_member<R: Read>(
    reader: R,
    expected_name: &str,
    mut out: impl Write,
) -> Result<u64, Error> {
    let gz = flate2::read::MultiGzDecoder::new(reader);
    let mut archive = tar::Archive::new(gz);
    let mut entries = archive.entries()?;
    let entry = entries.next().ok_or_else(|| Error::Format {
        detail: format!("no member found at recorded offset for '{}'", expected_name),
    })?;
    let mut entry = entry?;
    let name = entry.path()?.to_string_lossy().replace('\\', "/");
    if name != expected_name {
        return Err(Error::Security(crate::error::SecurityError::ArchiveCorrupted {
            detail: format!(
                "TOC offset for '{}' points at member '{}'",
                expected_name, name
            ),
        }));
    }
    Ok(io::copy(&mut entry, &mut out)?)
}
