//! Integration tests for fwsign-core container formats

use fwsign_core::{
    cert::{CERT_HEADER_SIZE, CERT_SIZE},
    descriptor::{CRC_OFFSET, MAGIC_OFFSET},
    entry::{BLOCK0_ENTRY_SIZE, PUBLIC_KEY_ENTRY_SIZE, ROOT_ENTRY_SIZE},
    factory, CodeSignModule, CryptoError, EngineeringCert, Error, KeyKind, Layout, MagicNumber,
    PrivateKey, PublicKey, Signature, SignatureChain, SignatureChainEntry, SignatureDescriptor,
    StructuralError, TrustPolicy, ALL_PERMISSIONS, DESCRIPTOR_SIZE, ROOT_CANCEL_ID,
};

// ============================================
// Helpers
// ============================================

fn keypair(seed: u8) -> (PrivateKey, PublicKey) {
    let private = PrivateKey::from_bytes([seed; 48]).unwrap();
    let public = PublicKey::from_private_key(&private, KeyKind::SingleRoot).unwrap();
    (private, public)
}

fn root_entry(mut key: PublicKey) -> SignatureChainEntry {
    key.set_permission(ALL_PERMISSIONS).unwrap();
    key.set_cancel_id(ROOT_CANCEL_ID).unwrap();
    SignatureChainEntry::root(key, 2).unwrap()
}

/// Sign a CSK the way a signing authority does: through a module file
fn sign_csk_via_module(signer: &PrivateKey, mut key: PublicKey, permission: u32) -> SignatureChainEntry {
    key.set_permission(permission).unwrap();
    key.set_cancel_id(1).unwrap();
    let module = CodeSignModule::for_key(&key).unwrap();
    let raw = signer.sign(&module.signing_digest().unwrap()).unwrap();

    let mut entry = SignatureChainEntry::public_key(key).unwrap();
    entry
        .set_signature(&Signature::from_raw(&raw).unwrap())
        .unwrap();
    entry
}

fn full_chain(block0: &[u8]) -> (SignatureChain, PrivateKey) {
    let (root_priv, root_pub) = keypair(0x41);
    let (csk_priv, csk_pub) = keypair(0x42);

    let mut chain = SignatureChain::with_root(root_entry(root_pub)).unwrap();
    chain
        .append(sign_csk_via_module(&root_priv, csk_pub, 0x0000_00FF))
        .unwrap();

    let mut entry = SignatureChainEntry::block0().unwrap();
    let raw = csk_priv.sign(&fwsign_core::sha384(block0)).unwrap();
    entry
        .set_signature(&Signature::from_raw(&raw).unwrap())
        .unwrap();
    chain.append(entry).unwrap();
    (chain, csk_priv)
}

// ============================================
// Sizes
// ============================================

#[test]
fn test_entry_sizes() {
    let (_, key) = keypair(1);
    assert_eq!(root_entry(key.clone()).size().unwrap(), ROOT_ENTRY_SIZE);
    assert_eq!(ROOT_ENTRY_SIZE, 152);
    assert_eq!(
        SignatureChainEntry::public_key(key).unwrap().size().unwrap(),
        PUBLIC_KEY_ENTRY_SIZE
    );
    assert_eq!(PUBLIC_KEY_ENTRY_SIZE, 256);
    assert_eq!(
        SignatureChainEntry::block0().unwrap().size().unwrap(),
        BLOCK0_ENTRY_SIZE
    );
    assert_eq!(BLOCK0_ENTRY_SIZE, 136);
}

#[test]
fn test_descriptor_fixed_layout() {
    let d = SignatureDescriptor::new().unwrap();
    let bytes = d.to_bytes().unwrap();
    assert_eq!(bytes.len(), DESCRIPTOR_SIZE);
    assert_eq!(
        u32::from_le_bytes(bytes[MAGIC_OFFSET..MAGIC_OFFSET + 4].try_into().unwrap()),
        MagicNumber::SignatureDescriptor.value()
    );
    assert_eq!(
        u32::from_le_bytes(bytes[CRC_OFFSET..].try_into().unwrap()),
        fwsign_core::crc::generate(&bytes[..CRC_OFFSET])
    );
    assert_eq!(
        u32::from_le_bytes(bytes[0x40..0x44].try_into().unwrap()),
        MagicNumber::SignatureChainSection.value()
    );
}

// ============================================
// Chains
// ============================================

#[test]
fn test_full_chain_verifies() {
    let block0 = b"\x7fELF firmware block0 contents";
    let (chain, _) = full_chain(block0);
    let digest = fwsign_core::sha384(block0);
    chain.verify(&TrustPolicy::default(), Some(&digest)).unwrap();

    let bytes = chain.to_bytes().unwrap();
    assert_eq!(bytes.len(), ROOT_ENTRY_SIZE + PUBLIC_KEY_ENTRY_SIZE + BLOCK0_ENTRY_SIZE);
    let parsed = SignatureChain::from_bytes(&bytes).unwrap();
    assert_eq!(parsed.to_bytes().unwrap(), bytes);
    parsed.verify(&TrustPolicy::default(), Some(&digest)).unwrap();
}

#[test]
fn test_block0_digest_required_and_checked() {
    let (chain, _) = full_chain(b"block0");
    assert!(matches!(
        chain.verify(&TrustPolicy::default(), None),
        Err(Error::Crypto(CryptoError::MissingBlock0Digest))
    ));
    let other = fwsign_core::sha384(b"other block0");
    assert!(matches!(
        chain.verify(&TrustPolicy::default(), Some(&other)),
        Err(Error::Crypto(CryptoError::VerificationFailed { entry: 2 }))
    ));
}

#[test]
fn test_tampered_csk_payload_rejected() {
    let (chain, _) = full_chain(b"block0");
    let digest = fwsign_core::sha384(b"block0");
    let mut bytes = chain.to_bytes().unwrap();

    // flip a bit in the CSK's X coordinate
    bytes[ROOT_ENTRY_SIZE + 0x18 + 0x18] ^= 0x01;
    let result = SignatureChain::from_bytes(&bytes)
        .and_then(|c| c.verify(&TrustPolicy::default(), Some(&digest)));
    assert!(result.is_err());
}

#[test]
fn test_multi_root_chain() {
    let privates: Vec<PrivateKey> = (0x51..0x54)
        .map(|s| PrivateKey::from_bytes([s; 48]).unwrap())
        .collect();
    let keys: Vec<PublicKey> = privates
        .iter()
        .map(|p| {
            let mut k = PublicKey::from_private_key(p, KeyKind::MultiRoot).unwrap();
            k.set_permission(ALL_PERMISSIONS).unwrap();
            k
        })
        .collect();
    let root = SignatureChainEntry::multi_root(keys, 0).unwrap();
    assert_eq!(root.size().unwrap(), 32 + 3 * 120);

    let mut chain = SignatureChain::with_root(root).unwrap();
    let (_, csk) = keypair(0x60);
    // signed by the third root key
    chain
        .append(sign_csk_via_module(&privates[2], csk, 0x1))
        .unwrap();
    chain.verify(&TrustPolicy::default(), None).unwrap();

    let parsed = SignatureChain::from_bytes(&chain.to_bytes().unwrap()).unwrap();
    assert_eq!(parsed.entry(0).unwrap().keys().unwrap().len(), 3);
    parsed.verify(&TrustPolicy::default(), None).unwrap();
}

// ============================================
// Descriptor, cert, factory
// ============================================

#[test]
fn test_descriptor_holds_chain() {
    let block0 = b"image block0";
    let (chain, _) = full_chain(block0);
    let mut d = SignatureDescriptor::new().unwrap();
    d.set_block0_hash(&fwsign_core::sha384(block0)).unwrap();
    d.add_chain(&chain).unwrap();
    d.update().unwrap();

    let bytes = d.to_bytes().unwrap();
    match factory::validate(&bytes).unwrap() {
        fwsign_core::Artifact::Descriptor(parsed) => {
            let digest = parsed.block0_hash().unwrap();
            parsed
                .chain(0)
                .unwrap()
                .verify(&TrustPolicy::default(), Some(&digest))
                .unwrap();
        }
        other => panic!("expected descriptor, got {}", other.kind_name()),
    }
}

#[test]
fn test_descriptor_crc_tamper() {
    let mut d = SignatureDescriptor::new().unwrap();
    d.set_image_pointer(0x2000).unwrap();
    d.update().unwrap();
    let mut bytes = d.to_bytes().unwrap();
    bytes[0xF00] ^= 0xFF;
    assert!(matches!(
        SignatureDescriptor::from_bytes(&bytes),
        Err(Error::Structural(StructuralError::CrcMismatch { offset: 0xFFC, .. }))
    ));
}

#[test]
fn test_cert_round_trip_through_factory() {
    let (root_priv, root_pub) = keypair(0x70);
    let mut chain = SignatureChain::with_root(root_entry(root_pub)).unwrap();
    let mut cert = EngineeringCert::new(0xDEAD_BEEF, 0x10).unwrap();

    let mut block0 = SignatureChainEntry::block0().unwrap();
    let raw = root_priv.sign(&cert.block0_digest()).unwrap();
    block0
        .set_signature(&Signature::from_raw(&raw).unwrap())
        .unwrap();
    chain.append(block0).unwrap();
    cert.set_chain(&chain).unwrap();

    let bytes = cert.to_bytes().unwrap();
    assert_eq!(bytes.len(), CERT_SIZE);
    assert_eq!(
        cert.descriptor().block0_hash().unwrap(),
        fwsign_core::sha384(&bytes[..CERT_HEADER_SIZE])
    );
    match factory::validate(&bytes).unwrap() {
        fwsign_core::Artifact::Cert(parsed) => parsed.verify(&TrustPolicy::default()).unwrap(),
        other => panic!("expected cert, got {}", other.kind_name()),
    }
}

#[test]
fn test_objdump_of_every_container() {
    let (chain, _) = full_chain(b"b0");
    let (_, key) = keypair(3);
    let blobs = [
        chain.to_bytes().unwrap(),
        CodeSignModule::for_block0(b"b0").unwrap().to_bytes().unwrap(),
        EngineeringCert::new(1, 1).unwrap().to_bytes().unwrap(),
        SignatureDescriptor::new().unwrap().to_bytes().unwrap(),
        key.to_bytes().unwrap(),
        Signature::blank().unwrap().to_bytes().unwrap(),
    ];
    for blob in blobs {
        let text = factory::objdump(&blob).unwrap();
        assert!(text.lines().count() > 1);
    }
    assert!(factory::objdump(&[0xFF; 16]).is_err());
}
