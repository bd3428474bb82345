//! Deterministic keys and chains for unit tests

use crate::chain::SignatureChain;
use crate::ecdsa::PrivateKey;
use crate::entry::SignatureChainEntry;
use crate::key::{KeyKind, PublicKey};

pub(crate) fn public_key(seed: u8, kind: KeyKind) -> PublicKey {
    let private = PrivateKey::from_bytes([seed; 48]).unwrap();
    PublicKey::from_private_key(&private, kind).unwrap()
}

pub(crate) fn keypair(seed: u8) -> (PrivateKey, PublicKey) {
    let private = PrivateKey::from_bytes([seed; 48]).unwrap();
    let public = PublicKey::from_private_key(&private, KeyKind::SingleRoot).unwrap();
    (private, public)
}

/// Single-root chain over `keypair(seed)`
pub(crate) fn root_chain(seed: u8) -> SignatureChain {
    let (_, key) = keypair(seed);
    SignatureChain::with_root(SignatureChainEntry::root(key, 0).unwrap()).unwrap()
}
