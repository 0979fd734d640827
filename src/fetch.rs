//! Range-based fetching: the random-access reader contract, adapters over
//! seekable readers and cached TOC bytes, the HTTP range reader, and the
//! registry range-support probe.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use tracing::debug;

use crate::error::Error;

/// Hard ceiling on the range-support probe, regardless of caller context.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Random access into a blob of known size.
///
/// `read_at` may return fewer bytes than requested; callers needing exact
/// windows go through [`read_full_at`].
pub trait ReadAt: Send + Sync {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
    fn size(&self) -> u64;
}

/// Fill `buf` exactly from `offset`, failing with an "unexpected end"
/// error on a short read.
pub(crate) fn read_full_at<R: ReadAt + ?Sized>(
    reader: &R,
    mut buf: &mut [u8],
    mut offset: u64,
) -> Result<(), Error> {
    while !buf.is_empty() {
        match reader.read_at(buf, offset) {
            Ok(0) => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected end of blob",
                )));
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(())
}

// ============================================================================
// Seeker adapter
// ============================================================================

/// Adapts a seek-capable reader to the [`ReadAt`] contract.
///
/// Concurrent callers are serialized through an internal mutex; each call
/// seeks to the requested offset and reads the full length.
pub struct SeekerReader<R> {
    inner: Mutex<R>,
    size: u64,
}

impl<R: Read + Seek + Send> SeekerReader<R> {
    pub fn new(seeker: R, size: u64) -> Self {
        Self {
            inner: Mutex::new(seeker),
            size,
        }
    }
}

impl<R: Read + Seek + Send> ReadAt for SeekerReader<R> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.seek(SeekFrom::Start(offset))?;

        // Full read of the requested length; EOF surfaces as a short count
        let mut filled = 0;
        while filled < buf.len() {
            let n = guard.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

// ============================================================================
// TOC-only reader
// ============================================================================

/// A [`ReadAt`] over only the fetched footer and TOC windows of a blob.
///
/// Reads inside either window return the cached bytes; reads anywhere else
/// return zeroes. Feeds the TOC parser when just metadata was downloaded.
pub struct TocBytesReader {
    footer: Vec<u8>,
    footer_offset: u64,
    toc: Vec<u8>,
    toc_offset: u64,
    size: u64,
}

impl TocBytesReader {
    pub fn new(size: u64, footer: Vec<u8>, footer_offset: u64, toc: Vec<u8>, toc_offset: u64) -> Self {
        Self {
            footer,
            footer_offset,
            toc,
            toc_offset,
            size,
        }
    }
}

fn overlay(buf: &mut [u8], buf_offset: u64, window: &[u8], window_offset: u64) {
    let buf_end = buf_offset + buf.len() as u64;
    let window_end = window_offset + window.len() as u64;
    let start = buf_offset.max(window_offset);
    let end = buf_end.min(window_end);
    if start >= end {
        return;
    }
    let dst = (start - buf_offset) as usize;
    let src = (start - window_offset) as usize;
    let len = (end - start) as usize;
    buf[dst..dst + len].copy_from_slice(&window[src..src + len]);
}

impl ReadAt for TocBytesReader {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let len = buf.len().min((self.size - offset) as usize);
        let buf = &mut buf[..len];
        buf.fill(0);
        overlay(buf, offset, &self.toc, self.toc_offset);
        overlay(buf, offset, &self.footer, self.footer_offset);
        Ok(len)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

// ============================================================================
// Section reader
// ============================================================================

/// A sequential [`Read`] view over a [`ReadAt`] starting at a fixed offset.
pub struct SectionReader<'a, R: ReadAt + ?Sized> {
    inner: &'a R,
    pos: u64,
}

impl<'a, R: ReadAt + ?Sized> SectionReader<'a, R> {
    pub fn new(inner: &'a R, offset: u64) -> Self {
        Self { inner, pos: offset }
    }
}

impl<R: ReadAt + ?Sized> Read for SectionReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

// ============================================================================
// HTTP range reader
// ============================================================================

/// A [`ReadAt`] issuing HTTP byte-range requests against a blob URL.
pub struct HttpRangeReader {
    client: HttpClient,
    url: String,
    size: u64,
}

impl HttpRangeReader {
    pub fn new(url: impl Into<String>, size: u64, allow_insecure: bool) -> Result<Self, Error> {
        let client = HttpClient::builder()
            .danger_accept_invalid_certs(allow_insecure)
            .build()
            .map_err(|e| {
                Error::Registry(crate::error::RegistryError::InvalidConfig {
                    detail: e.to_string(),
                })
            })?;
        Ok(Self {
            client,
            url: url.into(),
            size,
        })
    }

    /// Fetch one byte range eagerly as a vector.
    pub fn fetch_range(&self, offset: u64, len: u64) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; len as usize];
        read_full_at(self, &mut buf, offset)?;
        Ok(buf)
    }
}

impl ReadAt for HttpRangeReader {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let end = (offset + buf.len() as u64 - 1).min(self.size - 1);
        debug!(url = %self.url, offset, end, "range request");

        let response = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={}-{}", offset, end))
            .send()
            .map_err(io::Error::other)?;

        if response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(io::Error::other(format!(
                "server answered {} to a range request",
                response.status()
            )));
        }

        let body = response.bytes().map_err(io::Error::other)?;
        let n = body.len().min(buf.len());
        buf[..n].copy_from_slice(&body[..n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

// ============================================================================
// Range-support probe
// ============================================================================

/// Probe whether `url` honors HTTP byte-range requests.
///
/// Issues a single-byte range GET under a 5-second ceiling. Any failure
/// counts as unsupported.
pub fn supports_range(url: &str, allow_insecure: bool) -> bool {
    let client = match HttpClient::builder()
        .timeout(PROBE_TIMEOUT)
        .danger_accept_invalid_certs(allow_insecure)
        .build()
    {
        Ok(client) => client,
        Err(_) => return false,
    };

    match client.get(url).header(RANGE, "bytes=0-0").send() {
        Ok(response) => response.status() == StatusCode::PARTIAL_CONTENT,
        Err(e) => {
            debug!(url, error = %e, "range probe failed");
            false
        }
    }
}
