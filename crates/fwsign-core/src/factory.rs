//! Magic-number dispatch
//!
//! Turns an unknown byte blob into the container it holds, by its leading
//! magic. A 4096-byte blob carrying the descriptor magic at 0xF04 is a bare
//! signature descriptor, since descriptors begin with a hash rather than a
//! tag.

use crate::cert::EngineeringCert;
use crate::chain::SignatureChain;
use crate::descriptor::{self, SignatureDescriptor};
use crate::dump::{Outline, DEFAULT_WORD_LIMIT};
use crate::entry::SignatureChainEntry;
use crate::error::{Result, StructuralError};
use crate::fragment::{Fragment, Layout, Leaf, Reader};
use crate::key::PublicKey;
use crate::magic::MagicNumber;
use crate::module::{CodeSignModule, ModulePayload};
use crate::signature::Signature;

/// Any container the factory recognizes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    KeyChain(SignatureChain),
    Module(CodeSignModule),
    Cert(EngineeringCert),
    Descriptor(SignatureDescriptor),
    Signature(Signature),
    PublicKey(PublicKey),
    Entry(SignatureChainEntry),
    /// Uninterpreted bytes
    Raw(Leaf),
}

impl Artifact {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Artifact::KeyChain(_) => "key_chain",
            Artifact::Module(_) => "code_sign_module",
            Artifact::Cert(_) => "engineering_cert",
            Artifact::Descriptor(_) => "signature_descriptor",
            Artifact::Signature(_) => "signature",
            Artifact::PublicKey(_) => "public_key",
            Artifact::Entry(_) => "signature_chain_entry",
            Artifact::Raw(_) => "raw",
        }
    }

    fn layout(&self) -> &dyn Layout {
        match self {
            Artifact::KeyChain(a) => a,
            Artifact::Module(a) => a,
            Artifact::Cert(a) => a,
            Artifact::Descriptor(a) => a,
            Artifact::Signature(a) => a,
            Artifact::PublicKey(a) => a,
            Artifact::Entry(a) => a,
            Artifact::Raw(a) => a,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.layout().validate()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.layout().to_bytes()
    }
}

/// Parse a blob by its magic, rejecting trailing bytes
pub fn parse(bytes: &[u8]) -> Result<Artifact> {
    if SignatureDescriptor::matches(bytes) {
        return SignatureDescriptor::from_bytes(bytes).map(Artifact::Descriptor);
    }

    let reader = Reader::new(bytes);
    let magic = reader.peek_u32(0)?;
    let kind = MagicNumber::from_value(magic).ok_or(StructuralError::UnknownMagic(magic))?;
    let artifact = match kind {
        MagicNumber::SignatureSingleRootEntry | MagicNumber::SignatureMultiRootEntry => {
            Artifact::KeyChain(SignatureChain::from_bytes(bytes)?)
        }
        MagicNumber::SignaturePublicKeyEntry | MagicNumber::SignatureBlock0Entry => {
            Artifact::Entry(SignatureChainEntry::from_bytes(bytes)?)
        }
        MagicNumber::CodeSignModule => Artifact::Module(CodeSignModule::from_bytes(bytes)?),
        MagicNumber::EngineeringCert => Artifact::Cert(EngineeringCert::from_bytes(bytes)?),
        MagicNumber::Signature => Artifact::Signature(Signature::from_bytes(bytes)?),
        MagicNumber::PublicKeySingleRoot | MagicNumber::PublicKeyMultiRoot => {
            Artifact::PublicKey(PublicKey::from_bytes(bytes)?)
        }
        _ => return Err(StructuralError::UnknownMagic(magic).into()),
    };
    Ok(artifact)
}

/// Wrap bytes without interpreting them
pub fn parse_raw(bytes: &[u8]) -> Result<Artifact> {
    let mut leaf = Leaf::new("raw", 0);
    leaf.load(bytes)?;
    Ok(Artifact::Raw(leaf))
}

/// Parse and fully validate a blob
pub fn validate(bytes: &[u8]) -> Result<Artifact> {
    let artifact = parse(bytes)?;
    artifact.validate()?;
    Ok(artifact)
}

/// Human-readable dump of a blob
pub fn objdump(bytes: &[u8]) -> Result<String> {
    render(&parse(bytes)?, DEFAULT_WORD_LIMIT)
}

/// Hex dump of a blob, without parsing
pub fn objdump_raw(bytes: &[u8]) -> Result<String> {
    render(&parse_raw(bytes)?, usize::MAX / 4)
}

/// Render an artifact as an outline with decoded fields
pub fn render(artifact: &Artifact, word_limit: usize) -> Result<String> {
    let mut out = Outline::new(word_limit);
    out.heading(
        0,
        &format!("{}: {} bytes", artifact.kind_name(), artifact.to_bytes()?.len()),
    );
    match artifact {
        Artifact::KeyChain(chain) => chain_outline(&mut out, chain, 0, 1)?,
        Artifact::Entry(entry) => entry_outline(&mut out, entry, 0, 1)?,
        Artifact::Module(module) => {
            match module.payload()? {
                ModulePayload::Key(key) => key_fields(&mut out, &key, 1),
                ModulePayload::Block0(bytes) => out.field(1, "block0_length", bytes.len()),
            }
            out.field(1, "signing_digest", hex::encode(module.signing_digest()?));
            out.field(1, "signed", !module.signature()?.is_blank());
            out.fragment(&Fragment::from(module.collection().clone()), 0, 1)?;
        }
        Artifact::Cert(cert) => {
            out.field(1, "version", cert.version()?);
            out.field(1, "device_uid", format!("{:#018x}", cert.device_uid()?));
            out.field(1, "permission", format!("{:#010x}", cert.permission()?));
            out.leaf(cert.header(), 0, 1);
            descriptor_outline(&mut out, cert.descriptor(), crate::cert::CERT_HEADER_SIZE, 1)?;
        }
        Artifact::Descriptor(d) => descriptor_outline(&mut out, d, 0, 1)?,
        Artifact::Signature(sig) => {
            out.field(1, "hash", crate::magic::describe(sig.hash_type()));
            out.field(1, "blank", sig.is_blank());
            out.leaf(sig.leaf(), 0, 1);
        }
        Artifact::PublicKey(key) => {
            key_fields(&mut out, key, 1);
            out.leaf(key.leaf(), 0, 1);
        }
        Artifact::Raw(leaf) => out.leaf(leaf, 0, 1),
    }
    Ok(out.finish())
}

fn key_fields(out: &mut Outline, key: &PublicKey, depth: usize) {
    out.field(depth, "key", crate::magic::describe(key.magic()));
    out.field(depth, "permission", format!("{:#010x}", key.permission()));
    out.field(depth, "cancel_id", format!("{:#010x}", key.cancel_id()));
    out.field(depth, "key_hash", hex::encode(key.key_hash()));
}

fn entry_outline(
    out: &mut Outline,
    entry: &SignatureChainEntry,
    base: usize,
    depth: usize,
) -> Result<()> {
    for key in entry.keys()? {
        key_fields(out, &key, depth);
    }
    if let Some(sig) = entry.signature()? {
        out.field(depth, "signed", !sig.is_blank());
    }
    out.fragment(&Fragment::from(entry.collection().clone()), base, depth)
}

fn chain_outline(
    out: &mut Outline,
    chain: &SignatureChain,
    base: usize,
    depth: usize,
) -> Result<()> {
    let mut offset = base;
    for (index, entry) in chain.entries().iter().enumerate() {
        out.heading(depth, &format!("entry {index}: {}", entry.kind().name()));
        entry_outline(out, entry, offset, depth + 1)?;
        offset += entry.size()?;
    }
    Ok(())
}

fn descriptor_outline(
    out: &mut Outline,
    d: &SignatureDescriptor,
    base: usize,
    depth: usize,
) -> Result<()> {
    out.field(depth, "block0_hash", hex::encode(d.block0_hash()?));
    out.field(depth, "image_pointer", format!("{:#010x}", d.image_pointer()?));
    out.field(depth, "crc", format!("{:#010x}", d.stored_crc()?));

    let mut offset = base + descriptor::BLOCK0_HASH_SIZE + descriptor::CHAIN_SECTION_HEADER_SIZE;
    for (index, chain) in d.chains()?.iter().enumerate() {
        out.heading(depth, &format!("chain {index}"));
        chain_outline(out, chain, offset, depth + 1)?;
        offset += chain.size()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn root_chain() -> SignatureChain {
        crate::testutil::root_chain(0x31)
    }

    #[test]
    fn test_dispatch_by_magic() {
        let chain = root_chain();
        let bytes = chain.to_bytes().unwrap();
        assert!(matches!(parse(&bytes).unwrap(), Artifact::KeyChain(_)));

        let key = chain.last_key().unwrap().unwrap();
        let key_bytes = key.to_bytes().unwrap();
        assert!(matches!(parse(&key_bytes).unwrap(), Artifact::PublicKey(_)));

        let module = CodeSignModule::for_key(&key).unwrap();
        assert!(matches!(
            parse(&module.to_bytes().unwrap()).unwrap(),
            Artifact::Module(_)
        ));

        let sig = Signature::blank().unwrap();
        assert!(matches!(
            parse(&sig.to_bytes().unwrap()).unwrap(),
            Artifact::Signature(_)
        ));

        let block0 = SignatureChainEntry::block0().unwrap();
        assert!(matches!(
            parse(&block0.to_bytes().unwrap()).unwrap(),
            Artifact::Entry(_)
        ));

        let d = SignatureDescriptor::new().unwrap();
        assert!(matches!(
            parse(&d.to_bytes().unwrap()).unwrap(),
            Artifact::Descriptor(_)
        ));

        let cert = EngineeringCert::new(5, 1).unwrap();
        assert!(matches!(
            parse(&cert.to_bytes().unwrap()).unwrap(),
            Artifact::Cert(_)
        ));
    }

    #[test]
    fn test_unknown_and_short_input() {
        assert!(matches!(
            parse(&[1, 0, 0, 0, 0, 0, 0, 0]),
            Err(Error::Structural(StructuralError::UnknownMagic(1)))
        ));
        let tag_only = MagicNumber::HashSha384.value().to_le_bytes();
        assert!(matches!(
            parse(&tag_only),
            Err(Error::Structural(StructuralError::UnknownMagic(_)))
        ));
        assert!(matches!(
            parse(&[0x20]),
            Err(Error::Structural(StructuralError::Truncated { .. }))
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = Signature::blank().unwrap().to_bytes().unwrap();
        bytes.extend_from_slice(&[0; 4]);
        assert!(validate(&bytes).is_err());
    }

    #[test]
    fn test_objdump_outline() {
        let text = objdump(&root_chain().to_bytes().unwrap()).unwrap();
        assert!(text.starts_with("key_chain: 152 bytes"));
        assert!(text.contains("entry 0: root_entry"));
        assert!(text.contains("PUBLIC_KEY_SINGLE_ROOT"));
        assert!(text.contains("cancel_id: 0x"));

        let raw = objdump_raw(&[0xAA; 6]).unwrap();
        assert!(raw.contains("raw: 6 bytes"));
        assert!(raw.contains("aaaaaaaa aaaa"));
    }
}
