//! Signing authority abstraction
//!
//! The workflow talks to whatever holds the signing key through this trait:
//! a remote code-signing service in production, [`crate::local::LocalAuthority`]
//! in tests and offline builds.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Result type for transport calls
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Identifier the signing authority assigns to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authority-side view of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    /// Waiting for more approvals
    Pending { approvals: usize, required: usize },
    /// Quorum reached; the signature can be fetched
    Approved,
    /// Withdrawn
    Cancelled,
}

/// Operations a signing authority must provide
pub trait SigningTransport: Send {
    /// Submit a code-sign module file for `project`
    fn submit(&mut self, project: &str, module: &[u8]) -> TransportResult<RequestId>;

    /// Record an approval under `role`
    fn approve(&mut self, id: RequestId, role: &str) -> TransportResult<()>;

    fn status(&self, id: RequestId) -> TransportResult<RemoteStatus>;

    /// Signed module file, available once the request is approved
    fn fetch_signature(&mut self, id: RequestId) -> TransportResult<Vec<u8>>;

    fn cancel(&mut self, id: RequestId) -> TransportResult<()>;

    /// Short name for logs
    fn authority_name(&self) -> &'static str;
}
