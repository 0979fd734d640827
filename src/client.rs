//! Bundle client: push, pull, and list against a content-addressable
//! registry.
//!
//! Extraction always lands in a staging directory first and is promoted to
//! the target per entry, so a failed pull never leaves partial results at
//! the target path.

use std::fs::{self, File};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::archive::select::extract_selected;
use crate::archive::stream::extract_stream;
use crate::archive::toc::{list_entries, read_toc};
use crate::archive::writer::write_archive;
use crate::archive::MEDIA_TYPE;
use crate::cache::BundleCache;
use crate::cancel::CancelToken;
use crate::entry::{ListResult, Report};
use crate::error::{Error, RegistryError};
use crate::fetch::{supports_range, HttpRangeReader, SeekerReader, TocBytesReader};
use crate::options::{PullOptions, PushOptions};
use crate::reference::Reference;
use crate::registry::{blob_url, Descriptor, HttpConfig, PushDescriptor, Registry, RegistryAuth};
use crate::verify::Verifier;

const LIST_MAX_RETRIES: u32 = 3;
const LIST_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Distributes bundles through a registry.
///
/// The client is internally immutable and safe to share across threads;
/// concurrent pulls and pushes are permitted.
pub struct Client {
    registry: Arc<dyn Registry>,
    verifier: Option<Arc<dyn Verifier>>,
    cache: Option<Arc<dyn BundleCache>>,
    cache_ready: OnceLock<bool>,
    http: HttpConfig,
    auth: RegistryAuth,
}

/// Builder for [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    registry: Option<Arc<dyn Registry>>,
    verifier: Option<Arc<dyn Verifier>>,
    cache: Option<Arc<dyn BundleCache>>,
    http: HttpConfig,
    auth: RegistryAuth,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry<R: Registry + 'static>(mut self, registry: R) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    pub fn verifier<V: Verifier + 'static>(mut self, verifier: V) -> Self {
        self.verifier = Some(Arc::new(verifier));
        self
    }

    pub fn cache<C: BundleCache + 'static>(mut self, cache: C) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    pub fn http_config(mut self, config: HttpConfig) -> Self {
        self.http = config;
        self
    }

    pub fn auth(mut self, auth: RegistryAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn build(self) -> Result<Client, Error> {
        let registry = self.registry.ok_or_else(|| {
            Error::Registry(RegistryError::InvalidConfig {
                detail: "no registry configured".to_string(),
            })
        })?;
        Ok(Client {
            registry,
            verifier: self.verifier,
            cache: self.cache,
            cache_ready: OnceLock::new(),
            http: self.http,
            auth: self.auth,
        })
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    // =========================================================================
    // Pull
    // =========================================================================

    /// Fetch a bundle and extract it (or the subset selected by
    /// `options.extract.files_to_extract`) into `target`.
    ///
    /// `target` must be absent or an empty directory. On any failure, no
    /// files appear at the target path.
    pub fn pull(
        &self,
        token: &CancelToken,
        reference: &str,
        target: impl AsRef<Path>,
        options: &PullOptions,
    ) -> Result<Report, Error> {
        self.pull_impl(token, reference, target.as_ref(), options)
            .map_err(|e| e.with_operation("pull", reference.to_string()))
    }

    fn pull_impl(
        &self,
        token: &CancelToken,
        reference: &str,
        target: &Path,
        options: &PullOptions,
    ) -> Result<Report, Error> {
        if reference.is_empty() {
            return Err(Error::EmptyReference);
        }
        if target.as_os_str().is_empty() {
            return Err(Error::EmptyTarget);
        }
        if target.exists() && fs::read_dir(target)?.next().is_some() {
            return Err(Error::TargetNotEmpty {
                path: target.display().to_string(),
            });
        }

        let reference = Reference::parse(reference)?;
        debug!(reference = %reference, "resolving bundle");

        let (descriptor, stream) = with_retry(token, options.max_retries, options.retry_delay, || {
            self.registry.pull(&reference, &self.auth)
        })?;

        if let Some(verifier) = &self.verifier {
            debug!(reference = %reference, digest = %descriptor.digest, "verifying signature");
            verifier.verify(token, &reference, &descriptor)?;
        }

        let staging = self.staging_dir(target)?;
        debug!(staging = %staging.path().display(), "extracting into staging");

        let report = if options.extract.files_to_extract.is_empty() {
            self.extract_full(token, &descriptor, stream, staging.path(), options)?
        } else {
            self.extract_selective(token, &reference, &descriptor, stream, staging.path(), options)?
        };

        debug!(target = %target.display(), "promoting staged files");
        move_files(staging.path(), target)?;
        Ok(report)
    }

    fn extract_full(
        &self,
        token: &CancelToken,
        descriptor: &Descriptor,
        stream: Box<dyn Read + Send>,
        staging: &Path,
        options: &PullOptions,
    ) -> Result<Report, Error> {
        if let Some(cached) = self.cache_get(&descriptor.digest) {
            debug!(digest = %descriptor.digest, "extracting from cache");
            let file = File::open(cached)?;
            return extract_stream(token, file, staging, &options.extract);
        }
        extract_stream(token, stream, staging, &options.extract)
    }

    fn extract_selective(
        &self,
        token: &CancelToken,
        reference: &Reference,
        descriptor: &Descriptor,
        mut stream: Box<dyn Read + Send>,
        staging: &Path,
        options: &PullOptions,
    ) -> Result<Report, Error> {
        let patterns = &options.extract.files_to_extract;

        if let Some(cached) = self.cache_get(&descriptor.digest) {
            let file = File::open(&cached)?;
            let size = file.metadata()?.len();
            let reader = SeekerReader::new(file, size);
            return extract_selected(token, &reader, size, staging, patterns, &options.extract);
        }

        let url = blob_url(&self.http, reference, &descriptor.digest);
        if supports_range(&url, self.http.allow_insecure) {
            debug!(url = %url, "registry supports byte ranges");
            drop(stream);
            let reader = HttpRangeReader::new(url, descriptor.size, self.http.allow_insecure)?;
            return extract_selected(
                token,
                &reader,
                descriptor.size,
                staging,
                patterns,
                &options.extract,
            );
        }

        warn!(url = %url, "registry does not support byte ranges; buffering full blob");
        let mut blob = Vec::new();
        stream.read_to_end(&mut blob)?;
        self.cache_put(&descriptor.digest, &blob);
        let size = blob.len() as u64;
        let reader = SeekerReader::new(Cursor::new(blob), size);
        extract_selected(token, &reader, size, staging, patterns, &options.extract)
    }

    // =========================================================================
    // Push
    // =========================================================================

    /// Archive `source` and upload it under `reference`.
    ///
    /// The temp archive is removed on success and on failure.
    pub fn push(
        &self,
        token: &CancelToken,
        source: impl AsRef<Path>,
        reference: &str,
        options: &PushOptions,
    ) -> Result<(), Error> {
        self.push_impl(token, source.as_ref(), reference, options)
            .map_err(|e| e.with_operation("push", reference.to_string()))
    }

    fn push_impl(
        &self,
        token: &CancelToken,
        source: &Path,
        reference: &str,
        options: &PushOptions,
    ) -> Result<(), Error> {
        if source.as_os_str().is_empty() {
            return Err(Error::EmptySource);
        }
        if reference.is_empty() {
            return Err(Error::EmptyReference);
        }
        if !source.exists() {
            return Err(Error::MissingSource {
                path: source.display().to_string(),
            });
        }

        let reference = Reference::parse(reference)?;

        // Temp directory owns the archive for the lifetime of the push
        let workdir = tempfile::tempdir()?;
        let blob_path = workdir.path().join("bundle.tar.gz");

        debug!(source = %source.display(), "building archive");
        let out = File::create(&blob_path)?;
        write_archive(token, source, out, options.progress.as_ref())?;

        let size = fs::metadata(&blob_path)?.len();
        let descriptor = PushDescriptor {
            media_type: MEDIA_TYPE.to_string(),
            size,
            annotations: options.annotations.clone(),
            platform: options.platform.clone(),
        };

        let mut blob = File::open(&blob_path)?;
        with_retry(token, options.max_retries, options.retry_delay, || {
            // Rewind before every attempt
            blob.seek(SeekFrom::Start(0))?;
            self.registry
                .push(&reference, &descriptor, &mut blob, &self.auth)
        })?;

        debug!(reference = %reference, size, "push complete");
        Ok(())
    }

    // =========================================================================
    // List
    // =========================================================================

    /// List a bundle's members without downloading its content.
    ///
    /// Fetches only the footer and the TOC through byte-range requests;
    /// fails if the registry does not support ranges.
    pub fn list_files(
        &self,
        token: &CancelToken,
        reference: &str,
        patterns: &[String],
    ) -> Result<ListResult, Error> {
        self.list_impl(token, reference, patterns)
            .map_err(|e| e.with_operation("list", reference.to_string()))
    }

    fn list_impl(
        &self,
        token: &CancelToken,
        reference: &str,
        patterns: &[String],
    ) -> Result<ListResult, Error> {
        if reference.is_empty() {
            return Err(Error::EmptyReference);
        }
        let reference = Reference::parse(reference)?;

        let descriptor = with_retry(token, LIST_MAX_RETRIES, LIST_RETRY_DELAY, || {
            self.registry.resolve(&reference, &self.auth)
        })?;

        let url = blob_url(&self.http, &reference, &descriptor.digest);
        if !supports_range(&url, self.http.allow_insecure) {
            return Err(Error::Registry(RegistryError::RangeNotSupported { url }));
        }

        let size = descriptor.size;
        let range_reader = HttpRangeReader::new(url, size, self.http.allow_insecure)?;

        use crate::archive::seekable::{parse_footer, FOOTER_READ_SIZE, FOOTER_SIZE};
        if size < FOOTER_SIZE as u64 {
            return Err(Error::Format {
                detail: format!("blob of {} bytes cannot hold a footer", size),
            });
        }
        let tail_len = size.min(FOOTER_READ_SIZE);
        let footer = range_reader.fetch_range(size - tail_len, tail_len)?;
        let (toc_offset, footer_len) = parse_footer(&footer)?;
        let toc_end = size - footer_len as u64;
        if toc_offset >= toc_end {
            return Err(Error::Format {
                detail: format!(
                    "footer places the TOC at {} past its end at {}",
                    toc_offset, toc_end
                ),
            });
        }
        let toc_bytes = range_reader.fetch_range(toc_offset, toc_end - toc_offset)?;

        let toc_reader =
            TocBytesReader::new(size, footer, size - tail_len, toc_bytes, toc_offset);
        let toc = read_toc(&toc_reader, size)?;
        Ok(list_entries(&toc, patterns))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Staging directory next to the target, so promotion renames stay on
    /// one filesystem.
    fn staging_dir(&self, target: &Path) -> Result<TempDir, Error> {
        let parent = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(parent)?;
        Ok(tempfile::Builder::new()
            .prefix(".bundle-staging-")
            .tempdir_in(parent)?)
    }

    /// Cache handle, gated by a one-shot prepare latch. A failed prepare
    /// disables the cache rather than failing the operation.
    fn cache(&self) -> Option<&Arc<dyn BundleCache>> {
        let cache = self.cache.as_ref()?;
        let ready = self.cache_ready.get_or_init(|| match cache.prepare() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "cache unavailable, continuing without it");
                false
            }
        });
        ready.then_some(cache)
    }

    fn cache_get(&self, digest: &str) -> Option<PathBuf> {
        self.cache().and_then(|c| c.get(digest))
    }

    fn cache_put(&self, digest: &str, bytes: &[u8]) {
        let Some(cache) = self.cache() else { return };
        let result = (|| -> Result<(), Error> {
            let mut tmp = tempfile::NamedTempFile::new()?;
            tmp.write_all(bytes)?;
            cache.put(digest, tmp.path())
        })();
        if let Err(e) = result {
            warn!(digest, error = %e, "failed to cache blob");
        }
    }
}

/// Promote a staged tree into the target directory.
///
/// Directories are recreated with their modes; files and symlinks move by
/// rename. On error the destination tree is removed best-effort.
pub(crate) fn move_files(staging: &Path, target: &Path) -> Result<(), Error> {
    let result = promote(staging, target);
    if result.is_err() {
        let _ = fs::remove_dir_all(target);
    }
    result
}

fn promote(staging: &Path, target: &Path) -> Result<(), Error> {
    fs::create_dir_all(target)?;

    for entry in WalkDir::new(staging).min_depth(1) {
        let entry = entry.map_err(|e| Error::Io(std::io::Error::other(e)))?;
        let rel = entry
            .path()
            .strip_prefix(staging)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
            .to_path_buf();
        let dest = target.join(&rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
            let meta = entry
                .metadata()
                .map_err(|e| Error::Io(std::io::Error::other(e)))?;
            fs::set_permissions(&dest, meta.permissions())?;
        } else if fs::rename(entry.path(), &dest).is_err() {
            // Rename can fail across filesystems; fall back to copying
            if entry.file_type().is_symlink() {
                let link = fs::read_link(entry.path())?;
                crate::archive::stream::create_symlink(&link.to_string_lossy(), &dest)?;
            } else {
                fs::copy(entry.path(), &dest)?;
                fs::remove_file(entry.path())?;
            }
        }
    }
    Ok(())
}

/// Run `op` with retries and exponential backoff.
///
/// Backoff is `delay * 2^(attempt-1)`. Non-retryable errors (security,
/// signature, cancellation, permanent registry failures) return
/// immediately.
pub(crate) fn with_retry<T>(
    token: &CancelToken,
    max_retries: u32,
    delay: Duration,
    mut op: impl FnMut() -> Result<T, Error>,
) -> Result<T, Error> {
    let attempts = max_retries.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        token.check("retry operation")?;
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < attempts => {
                let backoff = delay * (1u32 << (attempt - 1).min(16));
                debug!(attempt, ?backoff, error = %e, "retrying");
                token.sleep(backoff, "retry operation")?;
            }
            Err(e) => return Err(e),
        }
    }
}
