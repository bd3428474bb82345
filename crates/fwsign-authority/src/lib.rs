//! fwsign Authority - Sign-request workflow for firmware containers
//!
//! Builds keychains and engineering certs, submits their code-sign modules
//! to a signing authority, tracks approvals and embeds the returned
//! signatures.

pub mod config;
pub mod error;
pub mod local;
pub mod request;
pub mod transport;
pub mod vault;
pub mod workflow;

pub use config::AuthorityConfig;
pub use error::{AuthorityError, Result, TransportError, WorkflowError};
pub use local::LocalAuthority;
pub use request::{Approval, RequestKind, RequestState, SignRequest};
pub use transport::{RemoteStatus, RequestId, SigningTransport};
pub use vault::{load_keychain, DirectoryVault, KeyVault};
pub use workflow::{create_multi_root, create_root, Draft, SignTarget, SignWorkflow};
