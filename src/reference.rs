//! Bundle references: `host[:port]/path[:tag|@digest]`.

use crate::error::Error;

/// A parsed bundle reference.
///
/// References carrying a digest are immutable; tag references may move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    raw: String,
    host: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl Reference {
    /// Parse a reference string.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        if raw.is_empty() {
            return Err(Error::EmptyReference);
        }

        let invalid = |detail: &str| Error::InvalidReference {
            reference: raw.to_string(),
            detail: detail.to_string(),
        };

        let (host, remainder) = raw
            .split_once('/')
            .ok_or_else(|| invalid("missing '/' between host and repository"))?;
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        if remainder.is_empty() {
            return Err(invalid("empty repository path"));
        }

        let (path, tag, digest) = if let Some((path, digest)) = remainder.split_once('@') {
            if !digest.contains(':') {
                return Err(invalid("digest must be of the form algorithm:hex"));
            }
            (path, None, Some(digest.to_string()))
        } else if let Some((path, tag)) = remainder.rsplit_once(':') {
            // A colon inside a path segment would have a slash after it
            if tag.contains('/') {
                (remainder, None, None)
            } else if tag.is_empty() {
                return Err(invalid("empty tag"));
            } else {
                (path, Some(tag.to_string()), None)
            }
        } else {
            (remainder, None, None)
        };

        if path.is_empty() {
            return Err(invalid("empty repository path"));
        }

        Ok(Self {
            raw: raw.to_string(),
            host: host.to_string(),
            repository: path.to_string(),
            tag,
            digest,
        })
    }

    /// The original reference string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Registry host, including any port.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Repository path below `/v2/`.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// True when the reference pins content by digest.
    pub fn is_immutable(&self) -> bool {
        self.digest.is_some()
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
