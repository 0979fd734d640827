//! Bundle writer: walks a source tree, serializes it as tar, and produces
//! the seekable compressed blob.
//!
//! Header preparation and file opening run on a small worker pool; a
//! single consumer serializes results in walk order so the tar layout is
//! deterministic.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use tar::{EntryType, Header};
use walkdir::WalkDir;

use crate::archive::seekable::build_seekable;
use crate::cancel::CancelToken;
use crate::error::Error;
use crate::options::ProgressFn;

const MAX_WORKERS: usize = 8;

struct WalkedEntry {
    index: usize,
    abs: PathBuf,
    rel: String,
    meta: Metadata,
}

enum PreparedContent {
    File(File),
    Directory,
    Symlink(PathBuf),
}

struct Prepared {
    index: usize,
    rel: String,
    header: Header,
    content: PreparedContent,
}

/// Archive `source` into `out` as a seekable compressed blob.
///
/// Entries appear in sorted walk order. `progress` receives
/// `(current, total)` byte counts over the regular-file payload. Returns
/// the total blob size in bytes.
pub fn write_archive<W: Write>(
    token: &CancelToken,
    source: &Path,
    out: W,
    progress: Option<&ProgressFn>,
) -> Result<u64, Error> {
    let meta = fs::metadata(source).map_err(|_| Error::MissingSource {
        path: source.display().to_string(),
    })?;
    if !meta.is_dir() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("source '{}' is not a directory", source.display()),
        )));
    }

    let entries = collect_entries(source)?;
    let total: u64 = if progress.is_some() {
        entries
            .iter()
            .filter(|e| e.meta.is_file())
            .map(|e| e.meta.len())
            .sum()
    } else {
        0
    };

    let mut tar_buf = Vec::new();
    serialize_tar(token, entries, &mut tar_buf, progress, total)?;
    build_seekable(&tar_buf, out)
}

/// Walk the source tree in deterministic order, skipping the root itself.
fn collect_entries(source: &Path) -> Result<Vec<WalkedEntry>, Error> {
    let mut out = Vec::new();
    let walker = WalkDir::new(source)
        .min_depth(1)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()));

    for entry in walker {
        let entry = entry.map_err(|e| Error::Io(io::Error::other(e)))?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::Io(io::Error::other(e)))?
            .to_string_lossy()
            .replace('\\', "/");
        let meta = entry
            .metadata()
            .map_err(|e| Error::Io(io::Error::other(e)))?;
        let index = out.len();
        out.push(WalkedEntry {
            index,
            abs: entry.into_path(),
            rel,
            meta,
        });
    }
    Ok(out)
}

/// Fan entries out to the worker pool and serialize results in order.
fn serialize_tar<W: Write>(
    token: &CancelToken,
    entries: Vec<WalkedEntry>,
    out: W,
    progress: Option<&ProgressFn>,
    total: u64,
) -> Result<(), Error> {
    let mut builder = tar::Builder::new(out);
    let workers = entries.len().min(MAX_WORKERS);
    if workers == 0 {
        builder.finish()?;
        return Ok(());
    }

    let queue = Arc::new(Mutex::new(entries.into_iter()));
    let (tx, rx) = mpsc::channel::<Result<Prepared, Error>>();
    let current = Cell::new(0u64);

    std::thread::scope(|scope| -> Result<(), Error> {
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let token = token.clone();
            scope.spawn(move || worker_loop(&token, &queue, &tx));
        }
        drop(tx);

        // Results arrive out of order; hold them until their turn comes so
        // the tar mirrors the walk order.
        let mut pending: BTreeMap<usize, Prepared> = BTreeMap::new();
        let mut next = 0usize;
        for result in rx {
            token.check("archiving")?;
            let prepared = result?;
            pending.insert(prepared.index, prepared);
            while let Some(prepared) = pending.remove(&next) {
                append_prepared(&mut builder, prepared, progress, &current, total)?;
                next += 1;
            }
        }
        Ok(())
    })?;

    builder.finish()?;
    Ok(())
}

fn worker_loop(
    token: &CancelToken,
    queue: &Mutex<std::vec::IntoIter<WalkedEntry>>,
    tx: &mpsc::Sender<Result<Prepared, Error>>,
) {
    loop {
        if token.is_cancelled() {
            let _ = tx.send(Err(Error::Cancelled { phase: "archiving" }));
            return;
        }
        let entry = {
            let mut guard = match queue.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.next()
        };
        let Some(entry) = entry else { return };

        let rel = entry.rel.clone();
        let result = prepare_entry(entry).map_err(|e| e.with_operation("archive", rel));
        if tx.send(result).is_err() {
            return;
        }
    }
}

/// Build the tar header for one walked entry, opening regular files.
fn prepare_entry(entry: WalkedEntry) -> Result<Prepared, Error> {
    let mut header = Header::new_gnu();
    header.set_mtime(mtime_secs(&entry.meta));
    header.set_uid(0);
    header.set_gid(0);

    let file_type = entry.meta.file_type();
    let content = if file_type.is_symlink() {
        let target = fs::read_link(&entry.abs)?;
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        PreparedContent::Symlink(target)
    } else if file_type.is_dir() {
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(mode_bits(&entry.meta, 0o755));
        PreparedContent::Directory
    } else {
        header.set_entry_type(EntryType::Regular);
        header.set_size(entry.meta.len());
        header.set_mode(mode_bits(&entry.meta, 0o644));
        PreparedContent::File(File::open(&entry.abs)?)
    };

    Ok(Prepared {
        index: entry.index,
        rel: entry.rel,
        header,
        content,
    })
}

fn append_prepared<W: Write>(
    builder: &mut tar::Builder<W>,
    mut prepared: Prepared,
    progress: Option<&ProgressFn>,
    current: &Cell<u64>,
    total: u64,
) -> Result<(), Error> {
    let annotate =
        |e: io::Error, rel: &str| Error::Io(e).with_operation("archive", rel.to_string());

    match prepared.content {
        PreparedContent::Directory => builder
            .append_data(&mut prepared.header, &prepared.rel, io::empty())
            .map_err(|e| annotate(e, &prepared.rel))?,
        PreparedContent::Symlink(target) => builder
            .append_link(&mut prepared.header, &prepared.rel, &target)
            .map_err(|e| annotate(e, &prepared.rel))?,
        PreparedContent::File(file) => {
            let reader = ProgressReader {
                inner: file,
                progress,
                current,
                total,
            };
            builder
                .append_data(&mut prepared.header, &prepared.rel, reader)
                .map_err(|e| annotate(e, &prepared.rel))?;
        }
    }
    Ok(())
}

struct ProgressReader<'a, R: Read> {
    inner: R,
    progress: Option<&'a ProgressFn>,
    current: &'a Cell<u64>,
    total: u64,
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.current.set(self.current.get() + n as u64);
            if let Some(cb) = self.progress {
                cb(self.current.get(), self.total);
            }
        }
        Ok(n)
    }
}

fn mtime_secs(meta: &Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(unix)]
fn mode_bits(meta: &Metadata, _default: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_bits(_meta: &Metadata, default: u32) -> u32 {
    default
}
