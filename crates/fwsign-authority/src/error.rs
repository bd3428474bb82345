//! Error types for the signing workflow

use thiserror::Error;

use crate::transport::RequestId;

/// Result type alias for authority operations
pub type Result<T> = std::result::Result<T, AuthorityError>;

/// Errors that can occur while requesting and collecting signatures
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// Container or crypto error
    #[error("Core error: {0}")]
    Core(#[from] fwsign_core::Error),

    /// Workflow rule violated
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Signing authority unreachable or refused
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthorityError {
    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthorityError::Transport(e) if e.is_retryable())
    }
}

impl From<serde_json::Error> for AuthorityError {
    fn from(e: serde_json::Error) -> Self {
        AuthorityError::Serialization(e.to_string())
    }
}

/// Request lifecycle violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("Unknown sign request: {0}")]
    UnknownRequest(RequestId),

    #[error("Sign request {id} is {state} and cannot be {action}")]
    RequestClosed {
        id: RequestId,
        state: String,
        action: &'static str,
    },

    #[error("Approval role '{role}' is not one of: {allowed}")]
    InvalidRole { role: String, allowed: String },

    #[error("Sign request {id} is awaiting approval ({approvals} of {required})")]
    AwaitingApproval {
        id: RequestId,
        approvals: usize,
        required: usize,
    },

    #[error("Sign request {0} was cancelled by the signing authority")]
    RemoteCancelled(RequestId),

    #[error("{field} {value:#x} does not fit in 32 bits")]
    OutOfRange { field: &'static str, value: u64 },

    #[error("Draft does not match the content hash recorded for request {0}")]
    DraftMismatch(RequestId),

    #[error("Signed module for request {0} does not match the submitted module")]
    SignedModuleMismatch(RequestId),

    #[error("Key chain already ends in a block0 entry")]
    KeychainTerminated,

    #[error("Engineering cert already carries a signature chain")]
    CertAlreadySigned,

    #[error("Cancellation id {0} is revoked by the trust policy")]
    CancelIdRevoked(u32),

    #[error("Cancellation id {cancel_id} is below the signing key's id {parent}")]
    CancelIdBelowParent { cancel_id: u32, parent: u32 },

    #[error("Permission {permission:#010x} is not held by the signing key ({held:#010x})")]
    PermissionNotHeld { permission: u32, held: u32 },

    #[error("Permission {permission:#010x} lacks required bits {required:#010x}")]
    MissingRequiredPermission { permission: u32, required: u32 },

    #[error("Block0 bytes do not match the descriptor's block0 hash")]
    ImageHashMismatch,

    #[error("Image draft has no block0 bytes")]
    MissingBlock0,

    #[error("Signature descriptor has no free chain slot ({used} in use)")]
    NoFreeChainSlot { used: usize },

    #[error("No key file named '{0}' in the vault")]
    KeyNotFound(String),

    #[error("Key file name '{name}' matches {matches} files in the vault")]
    AmbiguousKey { name: String, matches: usize },
}

/// Failures talking to the signing authority
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Signing authority unreachable: {0}")]
    Unreachable(String),

    #[error("Signing authority timed out")]
    Timeout,

    #[error("Signing authority rejected the call: {0}")]
    Rejected(String),

    #[error("Signing authority has no request {0}")]
    UnknownRequest(RequestId),
}

impl TransportError {
    /// Connectivity failures are retryable, refusals are not
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Unreachable(_) | TransportError::Timeout)
    }
}
