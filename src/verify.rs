//! Signature-verifier collaborator contract.

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::reference::Reference;
use crate::registry::Descriptor;

/// Validates an artifact's signature against a policy before extraction.
///
/// Called exactly once per pull, after the descriptor fetch and before any
/// extraction. Implementations must not consume the descriptor's data
/// stream; only the metadata is handed over. Failures are returned as
/// [`Error::Signature`](crate::Error::Signature) values and are never
/// retried.
pub trait Verifier: Send + Sync {
    fn verify(
        &self,
        token: &CancelToken,
        reference: &Reference,
        descriptor: &Descriptor,
    ) -> Result<(), Error>;
}
