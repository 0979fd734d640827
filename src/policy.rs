//! Security policies for bundle extraction.
//!
//! Policies validate member names, per-file properties, and running archive
//! totals before any byte is written to the target filesystem. The chain
//! runs them in order and fails on the first violation.

use std::path::Path;

use path_jail::Jail;

use crate::entry::EntryInfo;
use crate::error::{Error, SecurityError};
use crate::options::ExtractOptions;

/// State tracked during extraction for cumulative limit checks.
#[derive(Debug, Clone, Default)]
pub struct ExtractionState {
    /// Number of file members accepted so far.
    pub files_extracted: usize,
    /// Number of directories created.
    pub dirs_created: usize,
    /// Declared bytes accepted so far.
    pub bytes_written: u64,
    /// Entries skipped (reserved members, filtered, unsupported symlinks).
    pub entries_skipped: usize,
}

/// A security policy consulted before extraction.
///
/// The three hooks correspond to the three validation points of the
/// extraction loop: the member name, the member's own properties, and the
/// archive's running totals. Each defaults to a no-op so policies implement
/// only the hooks they care about.
pub trait Policy: Send + Sync {
    fn check_path(&self, _name: &str) -> Result<(), Error> {
        Ok(())
    }

    fn check_file(&self, _entry: &EntryInfo) -> Result<(), Error> {
        Ok(())
    }

    fn check_archive(&self, _state: &ExtractionState) -> Result<(), Error> {
        Ok(())
    }
}

/// A chain of policies that all must pass.
pub struct PolicyChain {
    policies: Vec<Box<dyn Policy>>,
}

impl PolicyChain {
    /// Create a new empty policy chain.
    pub fn new() -> Self {
        Self {
            policies: Vec::new(),
        }
    }

    /// Add a policy to the chain.
    pub fn with<P: Policy + 'static>(mut self, policy: P) -> Self {
        self.policies.push(Box::new(policy));
        self
    }

    /// The default chain: size bounds, file-count bound, permission
    /// sanitizer. Path traversal is validated separately by the extractor,
    /// ahead of the chain, for each member.
    pub fn default_chain(options: &ExtractOptions) -> Self {
        Self::new()
            .with(SizePolicy::new(options.max_file_size, options.max_size))
            .with(CountPolicy::new(options.max_files))
            .with(PermissionPolicy)
    }

    pub fn check_path(&self, name: &str) -> Result<(), Error> {
        for policy in &self.policies {
            policy.check_path(name)?;
        }
        Ok(())
    }

    pub fn check_file(&self, entry: &EntryInfo) -> Result<(), Error> {
        for policy in &self.policies {
            policy.check_file(entry)?;
        }
        Ok(())
    }

    pub fn check_archive(&self, state: &ExtractionState) -> Result<(), Error> {
        for policy in &self.policies {
            policy.check_archive(state)?;
        }
        Ok(())
    }
}

impl Default for PolicyChain {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Path Traversal Policy
// ============================================================================

/// Policy that prevents path traversal out of the extraction root.
pub struct PathPolicy {
    jail: Jail,
    allow_hidden: bool,
}

impl PathPolicy {
    /// Create a path policy rooted at `root`, which must exist.
    pub fn new(root: &Path, allow_hidden: bool) -> Result<Self, Error> {
        let jail = Jail::new(root).map_err(|e| {
            Error::Security(SecurityError::PathEscape {
                entry: root.display().to_string(),
                detail: e.to_string(),
            })
        })?;
        Ok(Self { jail, allow_hidden })
    }

    /// Validate a member name before it reaches the filesystem.
    ///
    /// Tar headers and TOC rows are attacker-controlled bytes; a name the
    /// engine's own writer could never have produced is rejected outright.
    fn validate_filename(name: &str) -> Result<(), &'static str> {
        if name.is_empty() {
            return Err("empty member name");
        }

        // NUL and other control bytes cannot round-trip through the TOC
        if name.chars().any(char::is_control) {
            return Err("member name contains control bytes");
        }

        // A backslash could smuggle a separator past the traversal checks
        if name.contains('\\') {
            return Err("member name contains a backslash");
        }

        // Longer than any GNU long-name record this engine emits
        if name.len() > 1024 {
            return Err("member name exceeds 1024 bytes");
        }

        Ok(())
    }

    fn contains_traversal(name: &str) -> bool {
        if name.split('/').any(|segment| segment == "..") {
            return true;
        }
        // Percent-encoded dot sequences smuggle traversal past naive checks
        let lower = name.to_ascii_lowercase();
        lower.contains("%2e%2e") || lower.contains("%2e.") || lower.contains(".%2e")
    }

    /// Validate a symlink member: the resolved target must stay inside the
    /// extraction root. Targets are resolved lexically relative to the
    /// link's parent directory.
    pub fn check_symlink(&self, entry: &str, target: &str) -> Result<(), Error> {
        let target = target.replace('\\', "/");
        if target.starts_with('/') {
            return Err(Error::Security(SecurityError::SymlinkEscape {
                entry: entry.to_string(),
                target,
            }));
        }

        // Depth of the directory containing the link
        let mut depth: i64 = entry
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .count() as i64
            - 1;

        for segment in target.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(Error::Security(SecurityError::SymlinkEscape {
                            entry: entry.to_string(),
                            target,
                        }));
                    }
                }
                _ => depth += 1,
            }
        }

        Ok(())
    }
}

impl Policy for PathPolicy {
    fn check_path(&self, name: &str) -> Result<(), Error> {
        if let Err(reason) = Self::validate_filename(name) {
            return Err(Error::Security(SecurityError::InvalidFilename {
                entry: name.to_string(),
                reason: reason.to_string(),
            }));
        }

        if name.starts_with('/') || Path::new(name).is_absolute() {
            return Err(Error::Security(SecurityError::PathEscape {
                entry: name.to_string(),
                detail: "absolute path".to_string(),
            }));
        }

        if Self::contains_traversal(name) {
            return Err(Error::Security(SecurityError::PathEscape {
                entry: name.to_string(),
                detail: "path contains '..' component".to_string(),
            }));
        }

        if !self.allow_hidden {
            let last = name.trim_end_matches('/').rsplit('/').next().unwrap_or(name);
            if last.starts_with('.') {
                return Err(Error::Security(SecurityError::HiddenFile {
                    entry: name.to_string(),
                }));
            }
        }

        // Path jail resolves against the root and rejects escapes
        self.jail.join(name).map_err(|e| {
            Error::Security(SecurityError::PathEscape {
                entry: name.to_string(),
                detail: e.to_string(),
            })
        })?;

        Ok(())
    }
}

// ============================================================================
// Size Limits Policy
// ============================================================================

/// Policy that enforces size bounds. A zero bound disables the check.
pub struct SizePolicy {
    /// Maximum size of a single file.
    pub max_file_size: u64,
    /// Maximum total bytes across all files.
    pub max_size: u64,
}

impl SizePolicy {
    pub fn new(max_file_size: u64, max_size: u64) -> Self {
        Self {
            max_file_size,
            max_size,
        }
    }
}

impl Policy for SizePolicy {
    fn check_file(&self, entry: &EntryInfo) -> Result<(), Error> {
        if self.max_file_size > 0 && entry.size > self.max_file_size {
            return Err(Error::Security(SecurityError::FileTooLarge {
                entry: entry.name.clone(),
                limit: self.max_file_size,
                size: entry.size,
            }));
        }
        Ok(())
    }

    fn check_archive(&self, state: &ExtractionState) -> Result<(), Error> {
        if self.max_size > 0 && state.bytes_written > self.max_size {
            return Err(Error::Security(SecurityError::TotalSizeExceeded {
                limit: self.max_size,
                would_be: state.bytes_written,
            }));
        }
        Ok(())
    }
}

// ============================================================================
// File Count Policy
// ============================================================================

/// Policy that enforces a maximum member count. Zero disables.
pub struct CountPolicy {
    pub max_files: usize,
}

impl CountPolicy {
    pub fn new(max_files: usize) -> Self {
        Self { max_files }
    }
}

impl Policy for CountPolicy {
    fn check_archive(&self, state: &ExtractionState) -> Result<(), Error> {
        if self.max_files > 0 && state.files_extracted > self.max_files {
            return Err(Error::Security(SecurityError::FileCountExceeded {
                limit: self.max_files,
                attempted: state.files_extracted,
            }));
        }
        Ok(())
    }
}

// ============================================================================
// Permission Sanitizer
// ============================================================================

/// Setuid and setgid bits.
const FORBIDDEN_MODE_BITS: u32 = 0o6000;

/// Policy that rejects members carrying setuid/setgid bits.
pub struct PermissionPolicy;

impl Policy for PermissionPolicy {
    fn check_file(&self, entry: &EntryInfo) -> Result<(), Error> {
        if let Some(mode) = entry.mode {
            if mode & FORBIDDEN_MODE_BITS != 0 {
                return Err(Error::Security(SecurityError::ForbiddenPermissions {
                    entry: entry.name.clone(),
                    mode,
                }));
            }
        }
        Ok(())
    }
}

/// Returns `mode` with the setuid and setgid bits cleared.
pub fn sanitize_mode(mode: u32) -> u32 {
    mode & !FORBIDDEN_MODE_BITS
}
