//! Sign-request workflow
//!
//! Drives a keychain extension, an engineering cert or a firmware image
//! descriptor through request, approval and finalize against a
//! [`SigningTransport`]:
//!
//! 1. `request` builds the draft container and its module file, submits the
//!    module and records the request.
//! 2. `approve` forwards role approvals; the authority enforces the quorum.
//! 3. `finalize` fetches the signed module, embeds its signature into the
//!    draft and verifies the resulting chain.
//!
//! Calls that reach the authority happen before any local record changes,
//! so a transport failure can simply be retried.

use std::collections::BTreeMap;
use std::path::PathBuf;

use fwsign_core::descriptor::MAX_CHAINS;
use fwsign_core::{
    sha384, CodeSignModule, EngineeringCert, Layout, PublicKey, Signature, SignatureChain,
    SignatureChainEntry, SignatureDescriptor, StructuralError, ALL_PERMISSIONS, ROOT_CANCEL_ID,
};
use tracing::{debug, info, warn};

use crate::config::AuthorityConfig;
use crate::error::{AuthorityError, Result, WorkflowError};
use crate::request::{RequestKind, RequestState, SignRequest};
use crate::transport::{RemoteStatus, RequestId, SigningTransport};

/// Descriptor slots a production authority may fill; the rest stay free
/// for the device owner
pub const AUTHORITY_CHAIN_SLOTS: usize = 2;

/// What a sign request extends a keychain with
#[derive(Debug, Clone)]
pub enum SignTarget {
    /// A new code-signing key
    Key(PublicKey),
    /// An unsigned engineering cert
    Cert(EngineeringCert),
    /// A firmware image: its signature descriptor and the block0 bytes
    /// whose hash the descriptor stores
    Image {
        descriptor: SignatureDescriptor,
        block0: Vec<u8>,
    },
}

/// Container produced by `request`, carrying a blank signature until finalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Draft {
    /// Keychain ending in the new code-signing key entry
    KeyChain(SignatureChain),
    /// Cert whose chain 0 is the keychain plus a block0 entry
    Cert(EngineeringCert),
    /// Descriptor whose last chain is the keychain plus a block0 entry
    Image {
        descriptor: SignatureDescriptor,
        block0: Vec<u8>,
    },
}

impl Draft {
    pub fn kind(&self) -> RequestKind {
        match self {
            Draft::KeyChain(_) => RequestKind::Key,
            Draft::Cert(_) => RequestKind::Block0,
            Draft::Image { .. } => RequestKind::Image,
        }
    }

    /// Module file the authority signs for this draft
    pub fn module(&self) -> Result<CodeSignModule> {
        match self {
            Draft::KeyChain(chain) => {
                let key = chain
                    .last_entry()
                    .map(|entry| entry.key())
                    .transpose()?
                    .flatten()
                    .ok_or(AuthorityError::Core(StructuralError::EmptyChain.into()))?;
                Ok(CodeSignModule::for_key(&key)?)
            }
            Draft::Cert(cert) => Ok(CodeSignModule::for_block0(cert.header().raw())?),
            Draft::Image { block0, .. } => Ok(CodeSignModule::for_block0(block0)?),
        }
    }

    /// Container bytes; an image draft yields its descriptor
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(match self {
            Draft::KeyChain(chain) => chain.to_bytes()?,
            Draft::Cert(cert) => cert.to_bytes()?,
            Draft::Image { descriptor, .. } => descriptor.to_bytes()?,
        })
    }

    /// Rebuild a draft from `to_bytes` output; image drafts also need block0
    pub fn from_bytes(kind: RequestKind, bytes: &[u8], block0: Option<Vec<u8>>) -> Result<Self> {
        Ok(match kind {
            RequestKind::Key => Draft::KeyChain(SignatureChain::from_bytes(bytes)?),
            RequestKind::Block0 => Draft::Cert(EngineeringCert::from_bytes(bytes)?),
            RequestKind::Image => {
                let descriptor = SignatureDescriptor::from_bytes(bytes)?;
                let block0 = block0.ok_or(WorkflowError::MissingBlock0)?;
                if sha384(&block0) != descriptor.block0_hash()? {
                    return Err(WorkflowError::ImageHashMismatch.into());
                }
                Draft::Image { descriptor, block0 }
            }
        })
    }

    /// Put `signature` on the final entry and verify the whole chain
    fn complete(mut self, signature: &Signature, config: &AuthorityConfig) -> Result<Self> {
        match &mut self {
            Draft::KeyChain(chain) => {
                sign_last_entry(chain, signature)?;
                chain.update()?;
                chain.verify(&config.trust_policy, None)?;
            }
            Draft::Cert(cert) => {
                let mut chain = cert.chain()?;
                sign_last_entry(&mut chain, signature)?;
                cert.set_chain(&chain)?;
                cert.verify(&config.trust_policy)?;
            }
            Draft::Image { descriptor, .. } => {
                let slot = descriptor
                    .chain_count()?
                    .checked_sub(1)
                    .ok_or(AuthorityError::Core(StructuralError::EmptyChain.into()))?;
                let mut chain = descriptor.chain(slot)?;
                sign_last_entry(&mut chain, signature)?;
                chain.verify(&config.trust_policy, Some(&descriptor.block0_hash()?))?;
                descriptor.set_chain(slot, &chain)?;
            }
        }
        Ok(self)
    }
}

fn sign_last_entry(chain: &mut SignatureChain, signature: &Signature) -> Result<()> {
    chain
        .last_entry_mut()
        .ok_or(AuthorityError::Core(StructuralError::EmptyChain.into()))?
        .set_signature(signature)?;
    Ok(())
}

fn to_u32(field: &'static str, value: u64) -> std::result::Result<u32, WorkflowError> {
    u32::try_from(value).map_err(|_| WorkflowError::OutOfRange { field, value })
}

/// Start a keychain from a single root key
///
/// Root keys carry every permission bit and the reserved cancellation id.
pub fn create_root(mut key: PublicKey, hash_sel: u32) -> Result<SignatureChain> {
    key.set_permission(ALL_PERMISSIONS)?;
    key.set_cancel_id(ROOT_CANCEL_ID)?;
    Ok(SignatureChain::with_root(SignatureChainEntry::root(key, hash_sel)?)?)
}

/// Start a keychain from up to three multi-root keys
pub fn create_multi_root(keys: Vec<PublicKey>, hash_sel: u32) -> Result<SignatureChain> {
    let keys = keys
        .into_iter()
        .map(|mut key| {
            key.set_permission(ALL_PERMISSIONS)?;
            key.set_cancel_id(ROOT_CANCEL_ID)?;
            Ok(key)
        })
        .collect::<fwsign_core::Result<Vec<_>>>()?;
    Ok(SignatureChain::with_root(SignatureChainEntry::multi_root(
        keys, hash_sel,
    )?)?)
}

/// Request workflow bound to one signing authority
pub struct SignWorkflow<T: SigningTransport> {
    config: AuthorityConfig,
    transport: T,
    requests: BTreeMap<RequestId, SignRequest>,
}

impl<T: SigningTransport> SignWorkflow<T> {
    pub fn new(config: AuthorityConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            requests: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Local record of a request
    pub fn record(&self, id: RequestId) -> Option<&SignRequest> {
        self.requests.get(&id)
    }

    pub fn records(&self) -> impl Iterator<Item = &SignRequest> {
        self.requests.values()
    }

    fn open_record(&self, id: RequestId, action: &'static str) -> Result<&SignRequest> {
        let record = self
            .requests
            .get(&id)
            .ok_or(WorkflowError::UnknownRequest(id))?;
        record.ensure_open(action)?;
        Ok(record)
    }

    fn record_mut(&mut self, id: RequestId) -> Result<&mut SignRequest> {
        Ok(self
            .requests
            .get_mut(&id)
            .ok_or(WorkflowError::UnknownRequest(id))?)
    }

    /// Rules a new code-signing key must meet under the keychain's last key
    fn check_new_key(
        &self,
        keychain: &SignatureChain,
        permission: u32,
        cancel_id: u32,
    ) -> Result<()> {
        let policy = &self.config.trust_policy;
        if policy.is_cancelled(cancel_id) {
            return Err(WorkflowError::CancelIdRevoked(cancel_id).into());
        }
        let parent = keychain
            .last_key()?
            .ok_or(AuthorityError::Core(StructuralError::EmptyChain.into()))?;
        // Root keys do not constrain the cancellation id
        if keychain.len() > 1 && cancel_id < parent.cancel_id() {
            return Err(WorkflowError::CancelIdBelowParent {
                cancel_id,
                parent: parent.cancel_id(),
            }
            .into());
        }
        if permission & !parent.permission() != 0 {
            return Err(WorkflowError::PermissionNotHeld {
                permission,
                held: parent.permission(),
            }
            .into());
        }
        let required = policy.required_permission;
        if permission & required != required {
            return Err(WorkflowError::MissingRequiredPermission {
                permission,
                required,
            }
            .into());
        }
        Ok(())
    }

    /// Build the draft for `target`, submit its module and record the request
    ///
    /// `permission` and `cancel_id` apply to a new code-signing key and fall
    /// back to the configured defaults when `None`. Every trust-policy rule
    /// that `finalize` would enforce is checked before anything is submitted.
    pub fn request(
        &mut self,
        keychain: &SignatureChain,
        target: SignTarget,
        permission: Option<u64>,
        cancel_id: Option<u64>,
    ) -> Result<(RequestId, Draft)> {
        let permission = match permission {
            Some(value) => to_u32("permission", value)?,
            None => self.config.default_permission,
        };
        let cancel_id = match cancel_id {
            Some(value) => to_u32("cancel_id", value)?,
            None => self.config.default_cancel_id,
        };
        if keychain.is_terminated() {
            return Err(WorkflowError::KeychainTerminated.into());
        }
        keychain.verify(&self.config.trust_policy, None)?;

        let draft = match target {
            SignTarget::Key(mut key) => {
                self.check_new_key(keychain, permission, cancel_id)?;
                key.set_permission(permission)?;
                key.set_cancel_id(cancel_id)?;
                let mut chain = keychain.clone();
                chain.append(SignatureChainEntry::public_key(key)?)?;
                Draft::KeyChain(chain)
            }
            SignTarget::Cert(mut cert) => {
                if cert.descriptor().chain_count()? != 0 {
                    return Err(WorkflowError::CertAlreadySigned.into());
                }
                let mut chain = keychain.clone();
                chain.append(SignatureChainEntry::block0()?)?;
                cert.set_chain(&chain)?;
                cert.validate()?;
                Draft::Cert(cert)
            }
            SignTarget::Image {
                mut descriptor,
                block0,
            } => {
                if sha384(&block0) != descriptor.block0_hash()? {
                    return Err(WorkflowError::ImageHashMismatch.into());
                }
                let slots = if self.config.debug {
                    MAX_CHAINS
                } else {
                    AUTHORITY_CHAIN_SLOTS
                };
                let used = descriptor.chain_count()?;
                if used >= slots {
                    return Err(WorkflowError::NoFreeChainSlot { used }.into());
                }
                let mut chain = keychain.clone();
                chain.append(SignatureChainEntry::block0()?)?;
                descriptor.add_chain(&chain)?;
                Draft::Image { descriptor, block0 }
            }
        };

        let module = draft.module()?;
        let content_hash = module.content_hash()?;
        let project = self.config.project()?;
        let id = self.transport.submit(project, &module.to_bytes()?)?;

        let mut record = SignRequest::new(id, draft.kind(), content_hash, permission, cancel_id);
        record.mark_requested()?;
        info!(
            "Submitted {:?} sign request {} to {} authority (module {})",
            record.kind,
            id,
            self.transport.authority_name(),
            &record.content_hash_hex()[..16]
        );
        self.requests.insert(id, record);
        Ok((id, draft))
    }

    /// Forward an approval under `role`
    pub fn approve(&mut self, id: RequestId, role: &str) -> Result<RequestState> {
        self.open_record(id, "approved")?;
        if !self.config.is_valid_role(role) {
            return Err(WorkflowError::InvalidRole {
                role: role.to_string(),
                allowed: self.config.active_roles().join(", "),
            }
            .into());
        }

        self.transport.approve(id, role)?;
        let status = self.transport.status(id)?;
        debug!("Request {} approved by {}; authority reports {:?}", id, role, status);

        let record = self.record_mut(id)?;
        if status == RemoteStatus::Cancelled {
            record.mark_cancelled()?;
            return Err(WorkflowError::RemoteCancelled(id).into());
        }
        record.record_approval(role, status == RemoteStatus::Approved)?;
        if record.state == RequestState::Approved {
            info!("Sign request {} reached its approval quorum", id);
        }
        Ok(record.state)
    }

    /// Collect the signature for `draft` and return the finished container
    pub fn finalize(&mut self, id: RequestId, draft: &Draft) -> Result<Vec<u8>> {
        let expected = self.open_record(id, "finalized")?.content_hash;
        let module = draft.module()?;
        if module.content_hash()? != expected {
            return Err(WorkflowError::DraftMismatch(id).into());
        }

        match self.transport.status(id)? {
            RemoteStatus::Approved => {}
            RemoteStatus::Pending {
                approvals,
                required,
            } => {
                return Err(WorkflowError::AwaitingApproval {
                    id,
                    approvals,
                    required,
                }
                .into())
            }
            RemoteStatus::Cancelled => {
                self.record_mut(id)?.mark_cancelled()?;
                return Err(WorkflowError::RemoteCancelled(id).into());
            }
        }

        let signed = CodeSignModule::from_bytes(&self.transport.fetch_signature(id)?)?;
        if signed.payload_bytes()? != module.payload_bytes()? {
            warn!("Authority returned a module for different content on request {}", id);
            return Err(WorkflowError::SignedModuleMismatch(id).into());
        }

        let finished = draft.clone().complete(&signed.signature()?, &self.config)?;
        let bytes = finished.to_bytes()?;
        self.record_mut(id)?.mark_finalized()?;
        info!("Finalized sign request {} ({} bytes)", id, bytes.len());
        Ok(bytes)
    }

    /// Withdraw a request at the authority and locally
    pub fn cancel(&mut self, id: RequestId) -> Result<()> {
        self.open_record(id, "cancelled")?;
        self.transport.cancel(id)?;
        self.record_mut(id)?.mark_cancelled()?;
        info!("Cancelled sign request {}", id);
        Ok(())
    }

    /// Request, approve with every active role, finalize
    pub fn sign(
        &mut self,
        keychain: &SignatureChain,
        target: SignTarget,
        permission: Option<u64>,
        cancel_id: Option<u64>,
    ) -> Result<Vec<u8>> {
        let (id, draft) = self.request(keychain, target, permission, cancel_id)?;
        for role in self.config.active_roles().to_vec() {
            self.approve(id, &role)?;
        }
        self.finalize(id, &draft)
    }

    fn draft_path(&self, id: RequestId) -> PathBuf {
        self.config.work_dir.join(format!("request-{id}.draft"))
    }

    fn block0_path(&self, id: RequestId) -> PathBuf {
        self.config.work_dir.join(format!("request-{id}.block0"))
    }

    /// Persist the request record and its draft in the work directory
    pub fn save_request(&self, id: RequestId, draft: &Draft) -> Result<PathBuf> {
        let record = self
            .requests
            .get(&id)
            .ok_or(WorkflowError::UnknownRequest(id))?;
        if draft.kind() != record.kind {
            return Err(WorkflowError::DraftMismatch(id).into());
        }
        self.config.ensure_directories()?;
        std::fs::write(self.draft_path(id), draft.to_bytes()?)?;
        if let Draft::Image { block0, .. } = draft {
            std::fs::write(self.block0_path(id), block0)?;
        }
        let path = record.save(&self.config.work_dir)?;
        debug!("Saved sign request {} to {}", id, path.display());
        Ok(path)
    }

    /// Restore a request saved by `save_request`
    pub fn load_request(&mut self, id: RequestId) -> Result<Draft> {
        let record = SignRequest::load(&self.config.work_dir, id)?;
        let block0 = match record.kind {
            RequestKind::Image => Some(std::fs::read(self.block0_path(id))?),
            _ => None,
        };
        let draft = Draft::from_bytes(record.kind, &std::fs::read(self.draft_path(id))?, block0)?;
        if draft.module()?.content_hash()? != record.content_hash {
            return Err(WorkflowError::DraftMismatch(id).into());
        }
        debug!("Loaded sign request {} ({})", id, record.state);
        self.requests.insert(id, record);
        Ok(draft)
    }
}
