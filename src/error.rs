use std::fmt;
use std::io;

/// Errors raised while building, distributing, or extracting bundles.
#[derive(Debug)]
pub enum Error {
    /// Reference string is empty.
    EmptyReference,

    /// Source path is empty.
    EmptySource,

    /// Target path is empty.
    EmptyTarget,

    /// Source directory does not exist.
    MissingSource { path: String },

    /// Target directory exists and is not empty.
    TargetNotEmpty { path: String },

    /// Reference string does not parse as `host[:port]/path[:tag|@digest]`.
    InvalidReference { reference: String, detail: String },

    /// Archive, TOC, or footer bytes are not in the expected format.
    Format { detail: String },

    /// A security policy rejected the archive or one of its members.
    Security(SecurityError),

    /// Registry-side failure.
    Registry(RegistryError),

    /// Signature verification failure. Never retried.
    Signature(SignatureError),

    /// Operation was cancelled by the caller.
    Cancelled { phase: &'static str },

    /// Operation deadline elapsed.
    DeadlineExceeded { phase: &'static str },

    /// IO error.
    Io(io::Error),

    /// An error annotated with the failing operation and reference.
    Operation {
        operation: &'static str,
        reference: String,
        source: Box<Error>,
    },
}

/// Violations detected by the extraction security perimeter.
#[derive(Debug)]
pub enum SecurityError {
    /// Path escapes the extraction root (absolute, `..`, or jail breach).
    PathEscape { entry: String, detail: String },

    /// Symlink target resolves outside the extraction root.
    SymlinkEscape { entry: String, target: String },

    /// Filename contains invalid characters or reserved names.
    InvalidFilename { entry: String, reason: String },

    /// Hidden file encountered and `allow_hidden_files` is off.
    HiddenFile { entry: String },

    /// Single member exceeds the per-file size bound.
    FileTooLarge { entry: String, limit: u64, size: u64 },

    /// Running total exceeds the archive size bound.
    TotalSizeExceeded { limit: u64, would_be: u64 },

    /// Running member count exceeds the file-count bound.
    FileCountExceeded { limit: usize, attempted: usize },

    /// Member mode carries setuid or setgid bits.
    ForbiddenPermissions { entry: String, mode: u32 },

    /// Member type cannot be extracted safely (hard links).
    UnsupportedEntryType { entry: String, entry_type: String },

    /// Archive structure is damaged or actively hostile.
    ArchiveCorrupted { detail: String },
}

/// Registry-side error kinds.
#[derive(Debug)]
pub enum RegistryError {
    /// Credentials rejected by the registry.
    AuthenticationFailed { detail: String },

    /// Registry could not be reached (connection refused/reset, DNS).
    Unreachable { detail: String },

    /// Registry answered 503.
    ServiceUnavailable { detail: String },

    /// Registry answered 500 or another transient server-side failure.
    Internal { detail: String },

    /// Requested manifest or blob is absent.
    NotFound { reference: String },

    /// Registry does not support HTTP byte ranges for blobs.
    RangeNotSupported { url: String },

    /// Client-side registry configuration is missing or invalid.
    InvalidConfig { detail: String },
}

/// Signature-verifier error kinds. All are fatal for the call.
#[derive(Debug)]
pub enum SignatureError {
    NotFound { reference: String },
    Invalid { reference: String, detail: String },
    UntrustedSigner { reference: String, signer: String },
    TransparencyLog { detail: String },
    CertificateExpired { detail: String },
    AnnotationPolicy { detail: String },
}

/// Render a byte count with a binary-unit suffix for limit messages.
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [(u64, &str); 3] = [(1 << 30, "GB"), (1 << 20, "MB"), (1 << 10, "KB")];
    for (scale, unit) in UNITS {
        if bytes >= scale {
            return format!("{:.1} {}", bytes as f64 / scale as f64, unit);
        }
    }
    format!("{} bytes", bytes)
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyReference => write!(f, "reference must not be empty"),
            Self::EmptySource => write!(f, "source path must not be empty"),
            Self::EmptyTarget => write!(f, "target path must not be empty"),
            Self::MissingSource { path } => {
                write!(f, "source directory '{}' does not exist", path)
            }
            Self::TargetNotEmpty { path } => {
                write!(f, "target directory '{}' exists and is not empty", path)
            }
            Self::InvalidReference { reference, detail } => {
                write!(f, "invalid reference '{}': {}", reference, detail)
            }
            Self::Format { detail } => write!(f, "malformed archive: {}", detail),
            Self::Security(e) => write!(f, "security violation: {}", e),
            Self::Registry(e) => write!(f, "registry error: {}", e),
            Self::Signature(e) => write!(f, "signature verification failed: {}", e),
            Self::Cancelled { phase } => write!(f, "{} cancelled", phase),
            Self::DeadlineExceeded { phase } => write!(f, "{} deadline exceeded", phase),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Operation {
                operation,
                reference,
                source,
            } => write!(f, "{} failed for '{}': {}", operation, reference, source),
        }
    }
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathEscape { entry, detail } => {
                write!(f, "path '{}' escapes extraction root: {}", entry, detail)
            }
            Self::SymlinkEscape { entry, target } => {
                write!(
                    f,
                    "symlink '{}' targets '{}' outside the extraction root",
                    entry, target
                )
            }
            Self::InvalidFilename { entry, reason } => {
                write!(f, "invalid filename '{}': {}", entry, reason)
            }
            Self::HiddenFile { entry } => {
                write!(f, "hidden file '{}' not permitted", entry)
            }
            Self::FileTooLarge { entry, limit, size } => {
                write!(
                    f,
                    "file '{}' is {} (limit: {})",
                    entry,
                    format_bytes(*size),
                    format_bytes(*limit)
                )
            }
            Self::TotalSizeExceeded { limit, would_be } => {
                write!(
                    f,
                    "extraction would write {}, exceeding the {} limit",
                    format_bytes(*would_be),
                    format_bytes(*limit)
                )
            }
            Self::FileCountExceeded { limit, attempted } => {
                write!(
                    f,
                    "archive contains {} files, exceeding the {} file limit",
                    attempted, limit
                )
            }
            Self::ForbiddenPermissions { entry, mode } => {
                write!(
                    f,
                    "file '{}' carries setuid/setgid bits (mode {:o})",
                    entry, mode
                )
            }
            Self::UnsupportedEntryType { entry, entry_type } => {
                write!(f, "entry '{}' has unsupported type: {}", entry, entry_type)
            }
            Self::ArchiveCorrupted { detail } => write!(f, "archive corrupted: {}", detail),
        }
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthenticationFailed { detail } => {
                write!(f, "authentication failed: {}", detail)
            }
            Self::Unreachable { detail } => write!(f, "registry unreachable: {}", detail),
            Self::ServiceUnavailable { detail } => {
                write!(f, "service unavailable: {}", detail)
            }
            Self::Internal { detail } => write!(f, "internal server error: {}", detail),
            Self::NotFound { reference } => write!(f, "'{}' not found", reference),
            Self::RangeNotSupported { url } => {
                write!(f, "byte-range requests not supported for '{}'", url)
            }
            Self::InvalidConfig { detail } => {
                write!(f, "invalid registry configuration: {}", detail)
            }
        }
    }
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { reference } => {
                write!(f, "no signature found for '{}'", reference)
            }
            Self::Invalid { reference, detail } => {
                write!(f, "invalid signature for '{}': {}", reference, detail)
            }
            Self::UntrustedSigner { reference, signer } => {
                write!(f, "signer '{}' not trusted for '{}'", signer, reference)
            }
            Self::TransparencyLog { detail } => {
                write!(f, "transparency log check failed: {}", detail)
            }
            Self::CertificateExpired { detail } => {
                write!(f, "signing certificate expired: {}", detail)
            }
            Self::AnnotationPolicy { detail } => {
                write!(f, "annotation policy violation: {}", detail)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Operation { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl Error {
    /// Annotate an error with the failing operation and reference.
    pub fn with_operation(self, operation: &'static str, reference: impl Into<String>) -> Self {
        Self::Operation {
            operation,
            reference: reference.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, unwrapping operation annotations.
    pub fn root(&self) -> &Error {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// True if this error (or its root) was raised by the security perimeter.
    pub fn is_security(&self) -> bool {
        matches!(self.root(), Self::Security(_))
    }

    /// True if the registry rejected the caller's credentials.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self.root(),
            Self::Registry(RegistryError::AuthenticationFailed { .. })
        )
    }

    /// True if signature verification failed.
    pub fn is_signature(&self) -> bool {
        matches!(self.root(), Self::Signature(_))
    }

    /// True if the error was caused by cancellation or an elapsed deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self.root(),
            Self::Cancelled { .. } | Self::DeadlineExceeded { .. }
        )
    }

    /// Retry classification, in one place.
    ///
    /// Only transient transport failures and elapsed deadlines are worth a
    /// second attempt. Cancellation, security, and signature failures never
    /// are.
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Self::DeadlineExceeded { .. } => true,
            Self::Registry(e) => matches!(
                e,
                RegistryError::Unreachable { .. }
                    | RegistryError::ServiceUnavailable { .. }
                    | RegistryError::Internal { .. }
            ),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

// Automatic conversions for ease of use
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
impl From<SecurityError> for Error {
    fn from(e: SecurityError) -> Self {
        Self::Security(e)
    }
}
impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}
impl From<SignatureError> for Error {
    fn from(e: SignatureError) -> Self {
        Self::Signature(e)
    }
}
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Format {
            detail: format!("TOC document: {}", e),
        }
    }
}
