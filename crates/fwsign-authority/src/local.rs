//! In-process signing authority
//!
//! Holds a P-384 private key and applies the same approval quorum a
//! code-signing service would. Used for offline signing and tests.

use std::collections::{BTreeMap, BTreeSet};

use fwsign_core::{CodeSignModule, Layout, PrivateKey, Signature};
use tracing::{debug, info};

use crate::error::TransportError;
use crate::transport::{RemoteStatus, RequestId, SigningTransport, TransportResult};

/// Approvals needed before a signature is released
pub const DEFAULT_QUORUM: usize = 3;

#[derive(Debug)]
struct LocalRequest {
    module: Vec<u8>,
    approvals: BTreeSet<String>,
    cancelled: bool,
}

/// Signing authority backed by a key held in memory
pub struct LocalAuthority {
    key: PrivateKey,
    quorum: usize,
    next_id: u64,
    requests: BTreeMap<RequestId, LocalRequest>,
    online: bool,
}

impl LocalAuthority {
    pub fn new(key: PrivateKey) -> Self {
        Self {
            key,
            quorum: DEFAULT_QUORUM,
            next_id: 1,
            requests: BTreeMap::new(),
            online: true,
        }
    }

    pub fn with_quorum(mut self, quorum: usize) -> Self {
        self.quorum = quorum;
        self
    }

    pub fn key(&self) -> &PrivateKey {
        &self.key
    }

    /// Number of modules ever submitted
    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Simulate losing the connection; every call fails with `Unreachable`
    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    fn check_online(&self) -> TransportResult<()> {
        if self.online {
            Ok(())
        } else {
            Err(TransportError::Unreachable("local authority offline".into()))
        }
    }

    fn open_request(&mut self, id: RequestId) -> TransportResult<&mut LocalRequest> {
        let request = self
            .requests
            .get_mut(&id)
            .ok_or(TransportError::UnknownRequest(id))?;
        if request.cancelled {
            return Err(TransportError::Rejected(format!("request {id} was cancelled")));
        }
        Ok(request)
    }
}

impl SigningTransport for LocalAuthority {
    fn submit(&mut self, project: &str, module: &[u8]) -> TransportResult<RequestId> {
        self.check_online()?;
        CodeSignModule::from_bytes(module)
            .map_err(|e| TransportError::Rejected(format!("malformed module: {e}")))?;

        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.requests.insert(
            id,
            LocalRequest {
                module: module.to_vec(),
                approvals: BTreeSet::new(),
                cancelled: false,
            },
        );
        info!("Accepted sign request {} for project {}", id, project);
        Ok(id)
    }

    fn approve(&mut self, id: RequestId, role: &str) -> TransportResult<()> {
        self.check_online()?;
        let request = self.open_request(id)?;
        request.approvals.insert(role.to_string());
        debug!("Request {} approved by {}", id, role);
        Ok(())
    }

    fn status(&self, id: RequestId) -> TransportResult<RemoteStatus> {
        self.check_online()?;
        let request = self
            .requests
            .get(&id)
            .ok_or(TransportError::UnknownRequest(id))?;
        Ok(if request.cancelled {
            RemoteStatus::Cancelled
        } else if request.approvals.len() >= self.quorum {
            RemoteStatus::Approved
        } else {
            RemoteStatus::Pending {
                approvals: request.approvals.len(),
                required: self.quorum,
            }
        })
    }

    fn fetch_signature(&mut self, id: RequestId) -> TransportResult<Vec<u8>> {
        self.check_online()?;
        let quorum = self.quorum;
        let request = self.open_request(id)?;
        if request.approvals.len() < quorum {
            return Err(TransportError::Rejected(format!(
                "request {id} has {} of {quorum} approvals",
                request.approvals.len()
            )));
        }

        let sign = |bytes: &[u8], key: &PrivateKey| -> fwsign_core::Result<Vec<u8>> {
            let mut module = CodeSignModule::from_bytes(bytes)?;
            let raw = key.sign(&module.signing_digest()?)?;
            module.set_signature(&Signature::from_raw(&raw)?)?;
            module.to_bytes()
        };
        let module = request.module.clone();
        let signed = sign(&module, &self.key)
            .map_err(|e| TransportError::Rejected(format!("signing failed: {e}")))?;
        info!("Signed request {}", id);
        Ok(signed)
    }

    fn cancel(&mut self, id: RequestId) -> TransportResult<()> {
        self.check_online()?;
        let request = self.open_request(id)?;
        request.cancelled = true;
        info!("Cancelled sign request {}", id);
        Ok(())
    }

    fn authority_name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwsign_core::{KeyKind, PublicKey};

    fn authority() -> LocalAuthority {
        LocalAuthority::new(PrivateKey::from_bytes([0x0A; 48]).unwrap()).with_quorum(2)
    }

    fn module() -> Vec<u8> {
        CodeSignModule::for_block0(b"block0").unwrap().to_bytes().unwrap()
    }

    #[test]
    fn test_quorum_gates_signature() {
        let mut auth = authority();
        let id = auth.submit("test", &module()).unwrap();
        assert_eq!(
            auth.status(id).unwrap(),
            RemoteStatus::Pending {
                approvals: 0,
                required: 2
            }
        );
        auth.approve(id, "reviewer").unwrap();
        // same role twice counts once
        auth.approve(id, "reviewer").unwrap();
        assert!(matches!(
            auth.fetch_signature(id),
            Err(TransportError::Rejected(_))
        ));
        auth.approve(id, "manager").unwrap();
        assert_eq!(auth.status(id).unwrap(), RemoteStatus::Approved);

        let signed = CodeSignModule::from_bytes(&auth.fetch_signature(id).unwrap()).unwrap();
        let signer = PublicKey::from_private_key(auth.key(), KeyKind::SingleRoot).unwrap();
        assert!(signed
            .signature()
            .unwrap()
            .verify(&signer, &signed.signing_digest().unwrap()));
    }

    #[test]
    fn test_cancel_and_offline() {
        let mut auth = authority();
        let id = auth.submit("test", &module()).unwrap();
        auth.cancel(id).unwrap();
        assert_eq!(auth.status(id).unwrap(), RemoteStatus::Cancelled);
        assert!(auth.approve(id, "manager").is_err());

        auth.set_online(false);
        let err = auth.submit("test", &module()).unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            auth.status(RequestId(99)),
            Err(TransportError::Unreachable(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_module() {
        let mut auth = authority();
        assert!(matches!(
            auth.submit("test", &[0u8; 16]),
            Err(TransportError::Rejected(_))
        ));
    }
}
