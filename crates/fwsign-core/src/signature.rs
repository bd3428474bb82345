//! Signature fragment
//!
//! Layout (112 bytes):
//! ```text
//! OFFSET  SIZE  FIELD
//! ──────────────────────────────────────────────────────
//! 0x00    4     magic: SIGNATURE
//! 0x04    4     r_size: 48
//! 0x08    4     s_size: 48
//! 0x0C    4     hash type: HASH_SHA384
//! 0x10    48    r (big-endian)
//! 0x40    48    s (big-endian)
//! ```

use crate::ecdsa::{Curve, RawSignature, SCALAR_SIZE};
use crate::error::{CryptoError, Result, StructuralError};
use crate::fragment::{field48_at, word_at, Layout, Leaf, Reader};
use crate::key::PublicKey;
use crate::magic::MagicNumber;

/// Size of a signature fragment
pub const SIGNATURE_SIZE: usize = 0x70;

const OFF_R_SIZE: usize = 0x04;
const OFF_S_SIZE: usize = 0x08;
const OFF_HASH: usize = 0x0C;
const OFF_R: usize = 0x10;
const OFF_S: usize = 0x40;

/// An ECDSA P-384 / SHA-384 signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    leaf: Leaf,
}

impl Signature {
    fn blank_leaf() -> Leaf {
        Leaf::new("signature", SIGNATURE_SIZE)
            .with_max_size(SIGNATURE_SIZE)
            .with_magic(MagicNumber::Signature, 0)
    }

    /// A blank (all-zero r and s) SHA-384 signature
    pub fn blank() -> Result<Self> {
        let mut sig = Self {
            leaf: Self::blank_leaf(),
        };
        sig.leaf.initialize()?;
        sig.leaf.set_u32(OFF_HASH, MagicNumber::HashSha384.value())?;
        sig.update()?;
        Ok(sig)
    }

    pub fn from_raw(raw: &RawSignature) -> Result<Self> {
        let mut sig = Self::blank()?;
        sig.set_raw(raw)?;
        Ok(sig)
    }

    /// Consume one signature from the reader
    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let mut leaf = Self::blank_leaf();
        leaf.read(reader, SIGNATURE_SIZE)?;
        let sig = Self { leaf };
        sig.validate()?;
        Ok(sig)
    }

    /// Parse exactly one signature
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let sig = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(sig)
    }

    pub fn leaf(&self) -> &Leaf {
        &self.leaf
    }

    pub fn into_leaf(self) -> Leaf {
        self.leaf
    }

    pub fn hash_type(&self) -> u32 {
        word_at(self.leaf.raw(), OFF_HASH)
    }

    pub fn set_hash_type(&mut self, hash: MagicNumber) -> Result<()> {
        self.leaf.set_u32(OFF_HASH, hash.value())
    }

    pub fn r_size(&self) -> u32 {
        word_at(self.leaf.raw(), OFF_R_SIZE)
    }

    pub fn s_size(&self) -> u32 {
        word_at(self.leaf.raw(), OFF_S_SIZE)
    }

    pub fn r(&self) -> [u8; SCALAR_SIZE] {
        field48_at(self.leaf.raw(), OFF_R)
    }

    pub fn s(&self) -> [u8; SCALAR_SIZE] {
        field48_at(self.leaf.raw(), OFF_S)
    }

    pub fn raw(&self) -> RawSignature {
        RawSignature {
            r: self.r(),
            s: self.s(),
        }
    }

    pub fn set_raw(&mut self, raw: &RawSignature) -> Result<()> {
        self.leaf.write_bytes(OFF_R, &raw.r)?;
        self.leaf.write_bytes(OFF_S, &raw.s)
    }

    /// True until r and s are filled in
    pub fn is_blank(&self) -> bool {
        self.r().iter().chain(self.s().iter()).all(|&b| b == 0)
    }

    /// Check the signature over `digest` under `key`
    pub fn verify(&self, key: &PublicKey, digest: &[u8]) -> bool {
        Curve::p384().verify(&key.point(), digest, &self.raw())
    }
}

impl Layout for Signature {
    fn name(&self) -> &str {
        self.leaf.name()
    }

    fn size(&self) -> Result<usize> {
        self.leaf.size()
    }

    fn validate(&self) -> Result<()> {
        let size = self.leaf.size()?;
        if size != SIGNATURE_SIZE {
            return Err(StructuralError::SizeMismatch {
                fragment: "signature".to_string(),
                expected: SIGNATURE_SIZE,
                actual: size,
            }
            .into());
        }
        self.leaf.validate()?;

        let expected = MagicNumber::HashSha384.value();
        if self.hash_type() != expected {
            return Err(CryptoError::UnsupportedHash {
                expected,
                actual: self.hash_type(),
            }
            .into());
        }
        for (field, actual) in [("r_size", self.r_size()), ("s_size", self.s_size())] {
            if actual as usize != SCALAR_SIZE {
                return Err(CryptoError::InvalidLength { field, actual }.into());
            }
        }
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        self.leaf.set_u32(OFF_R_SIZE, SCALAR_SIZE as u32)?;
        self.leaf.set_u32(OFF_S_SIZE, SCALAR_SIZE as u32)?;
        self.leaf.update()
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        self.leaf.to_bytes()
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.leaf.write_bytes(offset, data)
    }
}
