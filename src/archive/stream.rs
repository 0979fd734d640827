//! Streaming extraction of a compressed bundle.
//!
//! Members are processed in tar order. Every member passes the path
//! validator and the policy chain before a single byte reaches the target
//! filesystem.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::MultiGzDecoder;
use tar::EntryType;

use crate::archive::is_reserved_name;
use crate::cancel::CancelToken;
use crate::entry::{EntryInfo, EntryKind, Report};
use crate::error::{Error, SecurityError};
use crate::matcher;
use crate::options::ExtractOptions;
use crate::policy::{sanitize_mode, ExtractionState, PathPolicy, Policy, PolicyChain};

/// Extract a compressed bundle stream into `target`.
///
/// The target directory is created with mode `0o755` if missing. Reserved
/// format members are skipped silently.
pub fn extract_stream<R: Read>(
    token: &CancelToken,
    reader: R,
    target: &Path,
    options: &ExtractOptions,
) -> Result<Report, Error> {
    let root = prepare_target(target)?;
    let path_policy = PathPolicy::new(&root, options.allow_hidden_files)?;
    let chain = PolicyChain::default_chain(options);
    let mut state = ExtractionState::default();

    let gz = MultiGzDecoder::new(reader);
    let mut archive = tar::Archive::new(gz);

    for entry in archive.entries()? {
        token.check("extraction")?;
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().replace('\\', "/");

        if is_reserved_name(&name) {
            state.entries_skipped += 1;
            continue;
        }

        path_policy
            .check_path(&name)
            .map_err(|e| e.with_operation("extract", name.clone()))?;

        let stripped = strip_name(&name, &options.strip_prefix);
        let header = entry.header();
        let size = header.size()?;
        let mode = header.mode().ok();

        let kind = match header.entry_type() {
            EntryType::Regular | EntryType::Continuous => EntryKind::File,
            EntryType::Directory => EntryKind::Directory,
            EntryType::Symlink => {
                let target_path = entry
                    .link_name()?
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                EntryKind::Symlink {
                    target: target_path,
                }
            }
            // Hard links can alias paths outside the root
            EntryType::Link => {
                return Err(Error::Security(SecurityError::UnsupportedEntryType {
                    entry: name,
                    entry_type: "hard link".to_string(),
                }));
            }
            // Device nodes, fifos, and friends are ignored
            _ => {
                state.entries_skipped += 1;
                continue;
            }
        };

        let is_dir = matches!(kind, EntryKind::Directory);
        if !options.files_to_extract.is_empty()
            && !is_dir
            && !matcher::matches(&stripped, &options.files_to_extract)
        {
            state.entries_skipped += 1;
            continue;
        }

        let info = EntryInfo {
            name: stripped.clone(),
            size,
            kind,
            mode,
        };

        // Count only members accepted for processing
        if !is_dir {
            state.files_extracted += 1;
            if matches!(info.kind, EntryKind::File) {
                state.bytes_written += size;
            }
        }

        chain.check_file(&info)?;
        chain.check_archive(&state)?;

        let dest = safe_join(&root, &stripped)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        match &info.kind {
            EntryKind::Directory => {
                fs::create_dir_all(&dest)?;
                state.dirs_created += 1;
                set_mode(&dest, mode, options.preserve_permissions, 0o755)?;
            }
            EntryKind::File => {
                let mut out = File::create(&dest)?;
                io::copy(&mut entry, &mut out)?;
                drop(out);
                set_mode(&dest, mode, options.preserve_permissions, 0o644)?;
            }
            EntryKind::Symlink { target } => {
                path_policy.check_symlink(&name, target)?;
                if !create_symlink(target, &dest)? {
                    state.entries_skipped += 1;
                }
            }
        }
    }

    Ok(Report {
        files_extracted: state.files_extracted,
        dirs_created: state.dirs_created,
        bytes_written: state.bytes_written,
        entries_skipped: state.entries_skipped,
    })
}

/// Create the target directory if missing and resolve it once.
pub(crate) fn prepare_target(target: &Path) -> Result<PathBuf, Error> {
    if !target.exists() {
        fs::create_dir_all(target)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(target, fs::Permissions::from_mode(0o755))?;
        }
    }
    Ok(fs::canonicalize(target)?)
}

/// Remove `prefix` from a member name, dropping any leading slash left
/// behind.
pub(crate) fn strip_name(name: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return name.to_string();
    }
    match name.strip_prefix(prefix) {
        Some(rest) => rest.trim_start_matches('/').to_string(),
        None => name.to_string(),
    }
}

/// Resolve a member path under the extraction root.
///
/// The result must be the root itself or lie strictly under it; `..` and
/// absolute components never survive.
pub(crate) fn safe_join(root_abs: &Path, name: &str) -> Result<PathBuf, Error> {
    let mut out = root_abs.to_path_buf();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => {
                return Err(Error::Security(SecurityError::PathEscape {
                    entry: name.to_string(),
                    detail: "resolved path escapes extraction root".to_string(),
                }));
            }
        }
    }
    if !out.starts_with(root_abs) {
        return Err(Error::Security(SecurityError::PathEscape {
            entry: name.to_string(),
            detail: "resolved path escapes extraction root".to_string(),
        }));
    }
    Ok(out)
}

/// Apply permissions to an extracted path. Modes from the archive are
/// sanitized; without `preserve`, fixed defaults apply.
pub(crate) fn set_mode(
    path: &Path,
    mode: Option<u32>,
    preserve: bool,
    default: u32,
) -> Result<(), Error> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let bits = if preserve {
            mode.map(|m| sanitize_mode(m) & 0o777).unwrap_or(default)
        } else {
            default
        };
        fs::set_permissions(path, fs::Permissions::from_mode(bits))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode, preserve, default);
    }
    Ok(())
}

/// Create a symlink where the platform supports it. Returns false when
/// symlinks are unsupported and the member was skipped.
pub(crate) fn create_symlink(target: &str, dest: &Path) -> Result<bool, Error> {
    #[cfg(unix)]
    {
        if dest.exists() || fs::symlink_metadata(dest).is_ok() {
            fs::remove_file(dest)?;
        }
        std::os::unix::fs::symlink(target, dest)?;
        Ok(true)
    }
    #[cfg(not(unix))]
    {
        let _ = (target, dest);
        Ok(false)
    }
}
