//! Options for pull, push, and extraction.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Progress callback: `(current_bytes, total_bytes)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Bounds and behavior applied while materializing archive members.
///
/// A zero value on any numeric bound disables that check.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Maximum number of members to extract.
    pub max_files: usize,
    /// Maximum total uncompressed bytes.
    pub max_size: u64,
    /// Maximum uncompressed bytes for a single member.
    pub max_file_size: u64,
    /// Permit members whose last path segment begins with `.`.
    pub allow_hidden_files: bool,
    /// Copy permission bits from the archive (after sanitizing).
    pub preserve_permissions: bool,
    /// Prefix removed from member names before matching and resolving.
    pub strip_prefix: String,
    /// Glob patterns selecting members to extract; empty extracts all.
    pub files_to_extract: Vec<String>,
}

impl ExtractOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_files(mut self, n: usize) -> Self {
        self.max_files = n;
        self
    }

    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size = bytes;
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn allow_hidden_files(mut self, allow: bool) -> Self {
        self.allow_hidden_files = allow;
        self
    }

    pub fn preserve_permissions(mut self, preserve: bool) -> Self {
        self.preserve_permissions = preserve;
        self
    }

    pub fn strip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.strip_prefix = prefix.into();
        self
    }

    pub fn files_to_extract<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        self.files_to_extract = patterns.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }
}

/// Options for [`Client::pull`](crate::Client::pull).
#[derive(Debug, Clone)]
pub struct PullOptions {
    pub extract: ExtractOptions,
    /// Attempts per descriptor fetch. Signature failures are never retried.
    pub max_retries: u32,
    /// Base backoff delay; doubles per attempt.
    pub retry_delay: Duration,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            extract: ExtractOptions::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl PullOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extract(mut self, options: ExtractOptions) -> Self {
        self.extract = options;
        self
    }

    pub fn files_to_extract<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        self.extract.files_to_extract =
            patterns.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// Options for [`Client::push`](crate::Client::push).
#[derive(Clone)]
pub struct PushOptions {
    /// Annotations attached to the uploaded descriptor.
    pub annotations: BTreeMap<String, String>,
    /// Optional platform string attached to the descriptor.
    pub platform: Option<String>,
    /// Byte-progress callback while archiving.
    pub progress: Option<ProgressFn>,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            annotations: BTreeMap::new(),
            platform: None,
            progress: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl PushOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn progress(mut self, f: ProgressFn) -> Self {
        self.progress = Some(f);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

impl std::fmt::Debug for PushOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushOptions")
            .field("annotations", &self.annotations)
            .field("platform", &self.platform)
            .field("progress", &self.progress.is_some())
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}
