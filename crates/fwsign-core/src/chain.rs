//! Signature chains and trust validation
//!
//! A chain starts with a root (or multi-root) entry, continues with zero or
//! more code-signing key entries, and optionally ends with a block0 entry.
//! Each non-root entry must be signed by a key held in the entry before it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::entry::{EntryKind, SignatureChainEntry};
use crate::error::{CryptoError, Result, StructuralError};
use crate::fragment::{Layout, Reader};
use crate::key::PublicKey;

/// Revocation and capability rules applied on top of signature checks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustPolicy {
    /// Code-signing keys with a lower cancellation id are revoked
    #[serde(default)]
    pub minimum_cancel_id: u32,

    /// Individually revoked cancellation ids
    #[serde(default)]
    pub cancelled_ids: BTreeSet<u32>,

    /// Bits the final signing key must carry
    #[serde(default)]
    pub required_permission: u32,
}

impl TrustPolicy {
    pub fn is_cancelled(&self, cancel_id: u32) -> bool {
        cancel_id < self.minimum_cancel_id || self.cancelled_ids.contains(&cancel_id)
    }
}

/// Ordered list of entries from root to leaf
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureChain {
    entries: Vec<SignatureChainEntry>,
}

impl SignatureChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain holding only `root`
    pub fn with_root(root: SignatureChainEntry) -> Result<Self> {
        let mut chain = Self::new();
        chain.append(root)?;
        Ok(chain)
    }

    /// Add an entry, enforcing root-first ordering and block0 termination
    pub fn append(&mut self, entry: SignatureChainEntry) -> Result<()> {
        let index = self.entries.len();
        let kind = entry.kind();
        if index == 0 {
            if !kind.is_root() {
                return Err(StructuralError::UnexpectedEntry {
                    index,
                    kind: kind.name(),
                }
                .into());
            }
        } else {
            if self.is_terminated() {
                return Err(StructuralError::ChainTerminated.into());
            }
            if kind.is_root() {
                return Err(StructuralError::UnexpectedEntry {
                    index,
                    kind: kind.name(),
                }
                .into());
            }
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[SignatureChainEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&SignatureChainEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_entry(&self) -> Option<&SignatureChainEntry> {
        self.entries.last()
    }

    pub fn last_entry_mut(&mut self) -> Option<&mut SignatureChainEntry> {
        self.entries.last_mut()
    }

    /// True once a block0 entry has been appended
    pub fn is_terminated(&self) -> bool {
        self.entries
            .last()
            .is_some_and(|e| e.kind() == EntryKind::Block0)
    }

    /// Key of the deepest entry that carries one
    pub fn last_key(&self) -> Result<Option<PublicKey>> {
        for entry in self.entries.iter().rev() {
            if let Some(key) = entry.key()? {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    /// Consume entries until input ends, a non-entry magic appears, or a
    /// block0 entry terminates the chain
    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let mut chain = Self::new();
        while reader.remaining() >= 8 {
            let magic = reader.peek_u32(0)?;
            if EntryKind::from_magic(magic).is_none() {
                break;
            }
            chain.append(SignatureChainEntry::read(reader)?)?;
            if chain.is_terminated() {
                break;
            }
        }
        chain.validate()?;
        Ok(chain)
    }

    /// Parse a complete key-chain file
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let chain = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(chain)
    }

    fn spans(&self) -> Result<Vec<usize>> {
        self.entries.iter().map(|e| e.size()).collect()
    }

    /// Verify every link against its parent under `policy`
    ///
    /// `block0_digest` is SHA-384 of the block0 bytes and is required when
    /// the chain ends in a block0 entry.
    pub fn verify(&self, policy: &TrustPolicy, block0_digest: Option<&[u8]>) -> Result<()> {
        self.validate()?;

        let mut parent_keys = self.entries[0].keys()?;
        let mut last_cancel: Option<u32> = None;

        for (index, entry) in self.entries.iter().enumerate().skip(1) {
            let signature = entry
                .signature()?
                .ok_or(CryptoError::Unsigned { entry: index })?;
            if signature.is_blank() {
                return Err(CryptoError::Unsigned { entry: index }.into());
            }

            let digest = match entry.kind() {
                EntryKind::Block0 => block0_digest
                    .ok_or(CryptoError::MissingBlock0Digest)?
                    .to_vec(),
                _ => entry.signed_digest()?.to_vec(),
            };
            let signer = parent_keys
                .iter()
                .find(|k| signature.verify(k, &digest))
                .ok_or(CryptoError::VerificationFailed { entry: index })?;

            if entry.kind() == EntryKind::PublicKey {
                let keys = entry.keys()?;
                let key = keys
                    .first()
                    .ok_or(CryptoError::VerificationFailed { entry: index })?;

                let cancel_id = key.cancel_id();
                if policy.is_cancelled(cancel_id) {
                    return Err(CryptoError::CancelledKey {
                        entry: index,
                        cancel_id,
                    }
                    .into());
                }
                if let Some(parent) = last_cancel.filter(|&p| cancel_id < p) {
                    return Err(CryptoError::CancelIdDecreased {
                        entry: index,
                        cancel_id,
                        parent,
                    }
                    .into());
                }
                last_cancel = Some(cancel_id);

                if key.permission() & !signer.permission() != 0 {
                    return Err(CryptoError::PermissionEscalation {
                        entry: index,
                        permission: key.permission(),
                        parent: signer.permission(),
                    }
                    .into());
                }
                parent_keys = keys;
            }
        }

        if let Some(leaf) = self.last_key()? {
            let required = policy.required_permission;
            if leaf.permission() & required != required {
                return Err(CryptoError::MissingPermission {
                    permission: leaf.permission(),
                    required,
                }
                .into());
            }
        }
        Ok(())
    }
}

impl Layout for SignatureChain {
    fn name(&self) -> &str {
        "signature_chain"
    }

    fn size(&self) -> Result<usize> {
        Ok(self.spans()?.iter().sum())
    }

    fn validate(&self) -> Result<()> {
        let first = self.entries.first().ok_or(StructuralError::EmptyChain)?;
        if !first.kind().is_root() {
            return Err(StructuralError::UnexpectedEntry {
                index: 0,
                kind: first.kind().name(),
            }
            .into());
        }
        for (index, entry) in self.entries.iter().enumerate() {
            if index > 0 && entry.kind().is_root() {
                return Err(StructuralError::UnexpectedEntry {
                    index,
                    kind: entry.kind().name(),
                }
                .into());
            }
            if entry.kind() == EntryKind::Block0 && index + 1 != self.entries.len() {
                return Err(StructuralError::ChainTerminated.into());
            }
            entry.validate()?;
        }
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        for entry in &mut self.entries {
            entry.update()?;
        }
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for entry in &self.entries {
            out.extend_from_slice(&entry.to_bytes()?);
        }
        Ok(out)
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let sizes = self.spans()?;
        let total: usize = sizes.iter().sum();
        if offset.checked_add(data.len()).map_or(true, |end| end > total) {
            return Err(StructuralError::OutOfBounds {
                offset,
                width: data.len(),
                size: total,
            }
            .into());
        }
        let end = offset + data.len();
        let mut start = 0;
        for (entry, size) in self.entries.iter_mut().zip(sizes) {
            let lo = offset.max(start);
            let hi = end.min(start + size);
            if lo < hi {
                entry.write_bytes(lo - start, &data[lo - offset..hi - offset])?;
            }
            start += size;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecdsa::PrivateKey;
    use crate::error::Error;
    use crate::hash::sha384;
    use crate::key::{KeyKind, ALL_PERMISSIONS, ROOT_CANCEL_ID};
    use crate::signature::Signature;
    use crate::testutil::keypair;

    fn signed_csk(
        signer: &PrivateKey,
        mut key: PublicKey,
        permission: u32,
        cancel_id: u32,
    ) -> SignatureChainEntry {
        key.set_permission(permission).unwrap();
        key.set_cancel_id(cancel_id).unwrap();
        let mut entry = SignatureChainEntry::public_key(key).unwrap();
        let digest = entry.signed_digest().unwrap();
        let sig = Signature::from_raw(&signer.sign(&digest).unwrap()).unwrap();
        entry.set_signature(&sig).unwrap();
        entry
    }

    fn root_chain(root_public: PublicKey) -> SignatureChain {
        let mut key = root_public;
        key.set_permission(ALL_PERMISSIONS).unwrap();
        key.set_cancel_id(ROOT_CANCEL_ID).unwrap();
        SignatureChain::with_root(SignatureChainEntry::root(key, 0).unwrap()).unwrap()
    }

    #[test]
    fn test_ordering_rules() {
        let (_, csk) = keypair(2);
        let mut chain = SignatureChain::new();
        let err = chain
            .append(SignatureChainEntry::public_key(csk).unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Structural(StructuralError::UnexpectedEntry { index: 0, .. })
        ));

        let (_, root) = keypair(1);
        let mut chain = root_chain(root);
        chain.append(SignatureChainEntry::block0().unwrap()).unwrap();
        assert!(chain.is_terminated());
        assert!(matches!(
            chain.append(SignatureChainEntry::block0().unwrap()),
            Err(Error::Structural(StructuralError::ChainTerminated))
        ));
        assert!(SignatureChain::new().validate().is_err());
    }

    #[test]
    fn test_verify_accepts_untampered_chain() {
        let (root_priv, root) = keypair(1);
        let (_, csk) = keypair(2);
        let mut chain = root_chain(root);
        chain.append(signed_csk(&root_priv, csk, 0x0F, 3)).unwrap();
        chain.verify(&TrustPolicy::default(), None).unwrap();

        let parsed = SignatureChain::from_bytes(&chain.to_bytes().unwrap()).unwrap();
        parsed.verify(&TrustPolicy::default(), None).unwrap();
        assert_eq!(parsed.last_key().unwrap().unwrap().permission(), 0x0F);
    }

    #[test]
    fn test_verify_rejects_tampered_csk() {
        let (root_priv, root) = keypair(1);
        let (_, csk) = keypair(2);
        let mut chain = root_chain(root);
        chain.append(signed_csk(&root_priv, csk, 0x0F, 3)).unwrap();

        // permission word of the CSK key, inside the payload
        let entry_offset = chain.entries()[0].size().unwrap();
        let permission_offset = entry_offset + 0x18 + 0x10;
        chain.set_u32(permission_offset, 0x07).unwrap();
        assert!(matches!(
            chain.verify(&TrustPolicy::default(), None),
            Err(Error::Crypto(CryptoError::VerificationFailed { entry: 1 }))
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_signer_and_blank() {
        let (_, root) = keypair(1);
        let (other_priv, _) = keypair(9);
        let (_, csk) = keypair(2);

        let mut chain = root_chain(root.clone());
        chain.append(signed_csk(&other_priv, csk.clone(), 1, 1)).unwrap();
        assert!(chain.verify(&TrustPolicy::default(), None).is_err());

        let mut chain = root_chain(root);
        chain.append(SignatureChainEntry::public_key(csk).unwrap()).unwrap();
        assert!(matches!(
            chain.verify(&TrustPolicy::default(), None),
            Err(Error::Crypto(CryptoError::Unsigned { entry: 1 }))
        ));
    }

    #[test]
    fn test_block0_requires_digest() {
        let (root_priv, root) = keypair(1);
        let (csk_priv, csk) = keypair(2);
        let mut chain = root_chain(root);
        chain.append(signed_csk(&root_priv, csk, 0xFF, 0)).unwrap();

        let block0 = b"block0 contents";
        let digest = sha384(block0);
        let mut entry = SignatureChainEntry::block0().unwrap();
        entry
            .set_signature(&Signature::from_raw(&csk_priv.sign(&digest).unwrap()).unwrap())
            .unwrap();
        chain.append(entry).unwrap();

        chain.verify(&TrustPolicy::default(), Some(&digest)).unwrap();
        assert!(matches!(
            chain.verify(&TrustPolicy::default(), None),
            Err(Error::Crypto(CryptoError::MissingBlock0Digest))
        ));
        assert!(chain
            .verify(&TrustPolicy::default(), Some(&sha384(b"other")))
            .is_err());
    }

    #[test]
    fn test_cancellation_policy() {
        let (root_priv, root) = keypair(1);
        let (csk1_priv, csk1) = keypair(2);
        let (_, csk2) = keypair(3);

        let mut chain = root_chain(root);
        chain.append(signed_csk(&root_priv, csk1, 0xFF, 5)).unwrap();
        chain.append(signed_csk(&csk1_priv, csk2, 0x0F, 4)).unwrap();
        assert!(matches!(
            chain.verify(&TrustPolicy::default(), None),
            Err(Error::Crypto(CryptoError::CancelIdDecreased { entry: 2, .. }))
        ));

        let policy = TrustPolicy {
            minimum_cancel_id: 6,
            ..TrustPolicy::default()
        };
        assert!(matches!(
            chain.verify(&policy, None),
            Err(Error::Crypto(CryptoError::CancelledKey { entry: 1, cancel_id: 5 }))
        ));
    }

    #[test]
    fn test_permission_rules() {
        let (root_priv, root) = keypair(1);
        let (csk1_priv, csk1) = keypair(2);
        let (_, csk2) = keypair(3);

        let mut chain = root_chain(root);
        chain.append(signed_csk(&root_priv, csk1, 0x0F, 1)).unwrap();
        chain.append(signed_csk(&csk1_priv, csk2, 0x1F, 1)).unwrap();
        assert!(matches!(
            chain.verify(&TrustPolicy::default(), None),
            Err(Error::Crypto(CryptoError::PermissionEscalation { entry: 2, .. }))
        ));

        let (root_priv, root) = keypair(1);
        let (_, csk1) = keypair(2);
        let mut chain = root_chain(root);
        chain.append(signed_csk(&root_priv, csk1, 0x01, 1)).unwrap();
        let policy = TrustPolicy {
            required_permission: 0x02,
            ..TrustPolicy::default()
        };
        assert!(matches!(
            chain.verify(&policy, None),
            Err(Error::Crypto(CryptoError::MissingPermission { .. }))
        ));
    }

    #[test]
    fn test_multi_root_parent_accepts_any_key() {
        let privs: Vec<_> = (20..23)
            .map(|s| PrivateKey::from_bytes([s; 48]).unwrap())
            .collect();
        let mut keys = Vec::new();
        for p in &privs {
            let mut k = PublicKey::from_private_key(p, KeyKind::MultiRoot).unwrap();
            k.set_permission(ALL_PERMISSIONS).unwrap();
            k.set_cancel_id(ROOT_CANCEL_ID).unwrap();
            keys.push(k);
        }
        let root = SignatureChainEntry::multi_root(keys, 0).unwrap();
        let mut chain = SignatureChain::with_root(root).unwrap();

        let (_, csk) = keypair(2);
        chain.append(signed_csk(&privs[2], csk, 0x3, 0)).unwrap();
        chain.verify(&TrustPolicy::default(), None).unwrap();
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let (_, root) = keypair(1);
        let chain = root_chain(root);
        let mut bytes = chain.to_bytes().unwrap();
        bytes.extend_from_slice(&[0u8; 12]);
        assert!(matches!(
            SignatureChain::from_bytes(&bytes),
            Err(Error::Structural(StructuralError::TrailingBytes(12)))
        ));
    }

    #[test]
    fn test_policy_serde() {
        let mut policy = TrustPolicy::default();
        policy.cancelled_ids.insert(4);
        let json = serde_json::to_string(&policy).unwrap();
        let back: TrustPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
        assert!(back.is_cancelled(4));
        assert!(!back.is_cancelled(5));
    }
}
