//! Code-sign module file
//!
//! The unit exchanged with a signing authority: a payload plus the
//! signature that will eventually cover it.
//!
//! ```text
//! OFFSET  SIZE  FIELD
//! ──────────────────────────────────────────────────────
//! 0x00    4     magic: CODE_SIGN_MODULE
//! 0x04    4     total length
//! 0x08    4     payload length
//! 0x0C    4     signature length (112)
//! 0x10    8     reserved
//! 0x18    N     payload: public key (120) or block0 bytes
//! 0x18+N  112   signature
//! ```
//!
//! A key payload is signed in its chain-entry form so the resulting
//! signature drops straight into a public key entry.

use crate::entry::SignatureChainEntry;
use crate::error::{Result, StructuralError};
use crate::fragment::{word_at, Collection, Fragment, Layout, Leaf, Reader};
use crate::hash::{sha384, DIGEST_SIZE};
use crate::key::{KeyKind, PublicKey, PUBLIC_KEY_SIZE};
use crate::magic::MagicNumber;
use crate::signature::{Signature, SIGNATURE_SIZE};

pub const MODULE_HEADER_SIZE: usize = 0x18;

const OFF_LENGTH: usize = 0x04;
const OFF_PAYLOAD_LENGTH: usize = 0x08;
const OFF_SIGNATURE_LENGTH: usize = 0x0C;

const HEADER: usize = 0;
const PAYLOAD: usize = 1;
const SIGNATURE: usize = 2;

fn looks_like_key(payload: &[u8]) -> bool {
    payload.len() == PUBLIC_KEY_SIZE && KeyKind::from_magic(word_at(payload, 0)).is_some()
}

/// What a module asks to have signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModulePayload {
    Key(PublicKey),
    Block0(Vec<u8>),
}

/// Code-sign module: header, payload, signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSignModule {
    inner: Collection,
}

impl CodeSignModule {
    fn header_leaf() -> Leaf {
        Leaf::new("module_header", MODULE_HEADER_SIZE)
            .with_max_size(MODULE_HEADER_SIZE)
            .with_magic(MagicNumber::CodeSignModule, 0)
    }

    fn assemble(header: Leaf, payload: Leaf, signature: Leaf) -> Result<Self> {
        let inner = Collection::new("code_sign_module")
            .with_child(header)?
            .with_child(payload)?
            .with_child(signature)?;
        Ok(Self { inner })
    }

    fn with_payload(payload: Leaf) -> Result<Self> {
        let mut header = Self::header_leaf();
        header.initialize()?;
        let mut module = Self::assemble(header, payload, Signature::blank()?.into_leaf())?;
        module.update()?;
        Ok(module)
    }

    /// Module asking for a code-signing key to be signed
    pub fn for_key(key: &PublicKey) -> Result<Self> {
        key.validate()?;
        Self::with_payload(key.clone().into_leaf())
    }

    /// Module asking for block0 bytes to be signed
    ///
    /// The payload kind is not stored in the module, so a block0 payload
    /// that looks like a public key (key size, key magic) is refused.
    pub fn for_block0(block0: &[u8]) -> Result<Self> {
        if looks_like_key(block0) {
            return Err(StructuralError::AmbiguousPayload("code_sign_module".to_string()).into());
        }
        let mut payload = Leaf::new("block0", 0);
        payload.load(block0)?;
        Self::with_payload(payload)
    }

    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let length = reader.peek_u32(OFF_LENGTH)? as usize;
        if length < MODULE_HEADER_SIZE + SIGNATURE_SIZE {
            return Err(StructuralError::LengthField {
                fragment: "code_sign_module".to_string(),
                field: "length",
                stored: length as u64,
                actual: (MODULE_HEADER_SIZE + SIGNATURE_SIZE) as u64,
            }
            .into());
        }
        let bytes = reader.take(length)?;
        let payload_length = word_at(bytes, OFF_PAYLOAD_LENGTH) as usize;
        let signature_length = word_at(bytes, OFF_SIGNATURE_LENGTH) as usize;
        if MODULE_HEADER_SIZE + payload_length + signature_length != length {
            return Err(StructuralError::LengthField {
                fragment: "code_sign_module".to_string(),
                field: "payload_length",
                stored: payload_length as u64,
                actual: length.saturating_sub(MODULE_HEADER_SIZE + signature_length) as u64,
            }
            .into());
        }

        let mut part = Reader::new(bytes);
        let mut header = Self::header_leaf();
        header.read(&mut part, MODULE_HEADER_SIZE)?;
        let mut payload = Leaf::new("payload", 0);
        payload.read(&mut part, payload_length)?;
        let signature = Signature::from_bytes(part.take(signature_length)?)?;
        part.finish()?;

        let module = Self::assemble(header, payload, signature.into_leaf())?;
        module.validate()?;
        Ok(module)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let module = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(module)
    }

    pub fn collection(&self) -> &Collection {
        &self.inner
    }

    fn part(&self, index: usize) -> Result<&Fragment> {
        self.inner.child(index).ok_or_else(|| {
            StructuralError::FragmentCount {
                fragment: "code_sign_module".to_string(),
                expected: 3,
                actual: self.inner.len(),
            }
            .into()
        })
    }

    pub fn payload_bytes(&self) -> Result<Vec<u8>> {
        self.part(PAYLOAD)?.to_bytes()
    }

    /// Interpret the payload: a well-formed public key, or opaque block0 bytes
    pub fn payload(&self) -> Result<ModulePayload> {
        let bytes = self.payload_bytes()?;
        if looks_like_key(&bytes) {
            Ok(ModulePayload::Key(PublicKey::from_bytes(&bytes)?))
        } else {
            Ok(ModulePayload::Block0(bytes))
        }
    }

    /// Digest the signer must sign for this module
    pub fn signing_digest(&self) -> Result<[u8; DIGEST_SIZE]> {
        match self.payload()? {
            ModulePayload::Key(key) => SignatureChainEntry::public_key(key)?.signed_digest(),
            ModulePayload::Block0(bytes) => Ok(sha384(&bytes)),
        }
    }

    /// SHA-384 of the whole module file
    pub fn content_hash(&self) -> Result<[u8; DIGEST_SIZE]> {
        self.sha384()
    }

    pub fn signature(&self) -> Result<Signature> {
        Signature::from_bytes(&self.part(SIGNATURE)?.to_bytes()?)
    }

    pub fn set_signature(&mut self, signature: &Signature) -> Result<()> {
        signature.validate()?;
        self.inner
            .replace(SIGNATURE, signature.clone().into_leaf())?;
        self.update()
    }
}

impl Layout for CodeSignModule {
    fn name(&self) -> &str {
        "code_sign_module"
    }

    fn size(&self) -> Result<usize> {
        self.inner.size()
    }

    fn validate(&self) -> Result<()> {
        if self.inner.len() != 3 {
            return Err(StructuralError::FragmentCount {
                fragment: "code_sign_module".to_string(),
                expected: 3,
                actual: self.inner.len(),
            }
            .into());
        }
        self.inner.validate()?;
        let header = self.part(HEADER)?;
        let checks = [
            ("length", OFF_LENGTH, self.inner.size()?),
            ("payload_length", OFF_PAYLOAD_LENGTH, self.part(PAYLOAD)?.size()?),
            ("signature_length", OFF_SIGNATURE_LENGTH, self.part(SIGNATURE)?.size()?),
        ];
        for (field, offset, actual) in checks {
            let stored = header.get_u32(offset)?;
            if stored as usize != actual {
                return Err(StructuralError::LengthField {
                    fragment: "code_sign_module".to_string(),
                    field,
                    stored: u64::from(stored),
                    actual: actual as u64,
                }
                .into());
            }
        }
        if let ModulePayload::Key(key) = self.payload()? {
            key.validate()?;
        }
        self.signature()?;
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        self.inner.update()?;
        let total = self.inner.size()? as u32;
        let payload = self.part(PAYLOAD)?.size()? as u32;
        let signature = self.part(SIGNATURE)?.size()? as u32;
        self.inner.set_u32(OFF_LENGTH, total)?;
        self.inner.set_u32(OFF_PAYLOAD_LENGTH, payload)?;
        self.inner.set_u32(OFF_SIGNATURE_LENGTH, signature)
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        self.inner.to_bytes()
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.inner.write_bytes(offset, data)
    }
}
