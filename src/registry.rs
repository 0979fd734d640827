//! Registry collaborator contract.
//!
//! The engine never speaks the registry wire protocol itself beyond blob
//! GETs with byte ranges; manifest and blob transfer go through this trait.

use std::collections::BTreeMap;
use std::io::Read;

use crate::error::Error;
use crate::reference::Reference;

/// Descriptor of content held by a registry.
#[derive(Debug, Clone)]
pub struct Descriptor {
    /// Content-addressed identifier, e.g. `sha256:...`.
    pub digest: String,
    pub media_type: String,
    /// Total blob size in bytes.
    pub size: u64,
}

/// Descriptor of content being uploaded.
#[derive(Debug, Clone)]
pub struct PushDescriptor {
    pub media_type: String,
    pub size: u64,
    pub annotations: BTreeMap<String, String>,
    pub platform: Option<String>,
}

/// Credentials presented to the registry.
///
/// Defaults to anonymous access.
#[derive(Clone, Default)]
pub enum RegistryAuth {
    #[default]
    Anonymous,
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        token: String,
    },
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Credentials stay out of logs
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::Basic { username, .. } => write!(f, "Basic({})", username),
            Self::Bearer { .. } => f.write_str("Bearer"),
        }
    }
}

/// A content-addressable registry, as the engine sees it.
///
/// Implementations own the wire protocol. All methods may be called
/// concurrently.
pub trait Registry: Send + Sync {
    /// Resolve a reference to its descriptor without fetching content.
    fn resolve(&self, reference: &Reference, auth: &RegistryAuth) -> Result<Descriptor, Error>;

    /// Fetch the descriptor together with a read-once content stream.
    fn pull(
        &self,
        reference: &Reference,
        auth: &RegistryAuth,
    ) -> Result<(Descriptor, Box<dyn Read + Send>), Error>;

    /// Upload a blob and its manifest under `reference`.
    fn push(
        &self,
        reference: &Reference,
        descriptor: &PushDescriptor,
        blob: &mut dyn Read,
        auth: &RegistryAuth,
    ) -> Result<(), Error>;
}

/// Per-registry HTTP policy, applied at client build time.
#[derive(Debug, Clone, Default)]
pub struct HttpConfig {
    /// Permit plain-HTTP registries.
    pub allow_http: bool,
    /// Skip TLS certificate verification.
    pub allow_insecure: bool,
    /// Hosts the plain-HTTP permission applies to; empty means all.
    pub registries: Vec<String>,
}

impl HttpConfig {
    pub fn scheme_for(&self, host: &str) -> &'static str {
        if self.allow_http
            && (self.registries.is_empty() || self.registries.iter().any(|r| r == host))
        {
            "http"
        } else {
            "https"
        }
    }
}

/// Blob URL for direct byte-range access:
/// `{scheme}://{host}/v2/{repository}/blobs/{digest}`.
pub fn blob_url(config: &HttpConfig, reference: &Reference, digest: &str) -> String {
    format!(
        "{}://{}/v2/{}/blobs/{}",
        config.scheme_for(reference.host()),
        reference.host(),
        reference.repository(),
        digest
    )
}
