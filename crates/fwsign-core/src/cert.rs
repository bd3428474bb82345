//! Engineering certificate file
//!
//! ```text
//! OFFSET  SIZE   FIELD
//! ──────────────────────────────────────────────────────
//! 0x00    4      magic: ENGINEERING_CERT
//! 0x04    4      total length (0x1040)
//! 0x08    4      format version
//! 0x0C    4      permission mask
//! 0x10    8      device UID
//! 0x18    40     reserved
//! 0x40    4096   signature descriptor
//! ```
//!
//! The descriptor's block0 hash is SHA-384 of the 64-byte header, and
//! chain 0 ends in a block0 entry signing that hash.

use crate::chain::{SignatureChain, TrustPolicy};
use crate::descriptor::{SignatureDescriptor, DESCRIPTOR_SIZE};
use crate::error::{CryptoError, Result, StructuralError};
use crate::fragment::{Endianness, Layout, Leaf, Reader};
use crate::hash::{sha384, DIGEST_SIZE};
use crate::magic::MagicNumber;

pub const CERT_HEADER_SIZE: usize = 0x40;
pub const CERT_SIZE: usize = CERT_HEADER_SIZE + DESCRIPTOR_SIZE;
pub const CERT_VERSION: u32 = 1;

const OFF_LENGTH: usize = 0x04;
const OFF_VERSION: usize = 0x08;
const OFF_PERMISSION: usize = 0x0C;
const OFF_DEVICE_UID: usize = 0x10;

/// Device-bound engineering certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineeringCert {
    header: Leaf,
    descriptor: SignatureDescriptor,
}

impl EngineeringCert {
    fn header_leaf() -> Leaf {
        Leaf::new("cert_header", CERT_HEADER_SIZE)
            .with_max_size(CERT_HEADER_SIZE)
            .with_magic(MagicNumber::EngineeringCert, 0)
    }

    /// Unsigned certificate for one device
    pub fn new(device_uid: u64, permission: u32) -> Result<Self> {
        let mut header = Self::header_leaf();
        header.initialize()?;
        header.set_u32(OFF_VERSION, CERT_VERSION)?;
        header.set_u32(OFF_PERMISSION, permission)?;
        header.set_value(OFF_DEVICE_UID, 8, device_uid, Endianness::Little)?;
        let mut cert = Self {
            header,
            descriptor: SignatureDescriptor::new()?,
        };
        cert.update()?;
        Ok(cert)
    }

    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let mut header = Self::header_leaf();
        header.read(reader, CERT_HEADER_SIZE)?;
        header.validate()?;
        let descriptor = SignatureDescriptor::read(reader)?;
        let cert = Self { header, descriptor };
        cert.validate()?;
        Ok(cert)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let cert = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(cert)
    }

    pub fn header(&self) -> &Leaf {
        &self.header
    }

    pub fn descriptor(&self) -> &SignatureDescriptor {
        &self.descriptor
    }

    pub fn version(&self) -> Result<u32> {
        self.header.get_u32(OFF_VERSION)
    }

    pub fn permission(&self) -> Result<u32> {
        self.header.get_u32(OFF_PERMISSION)
    }

    pub fn set_permission(&mut self, permission: u32) -> Result<()> {
        self.header.set_u32(OFF_PERMISSION, permission)?;
        self.update()
    }

    pub fn device_uid(&self) -> Result<u64> {
        self.header
            .get_value(OFF_DEVICE_UID, 8, Endianness::Little)
    }

    pub fn set_device_uid(&mut self, device_uid: u64) -> Result<()> {
        self.header
            .set_value(OFF_DEVICE_UID, 8, device_uid, Endianness::Little)?;
        self.update()
    }

    /// SHA-384 of the header: the digest a block0 entry signs
    pub fn block0_digest(&self) -> [u8; DIGEST_SIZE] {
        sha384(self.header.raw())
    }

    /// Chain 0, the one that authorizes this certificate
    pub fn chain(&self) -> Result<SignatureChain> {
        self.descriptor.chain(0)
    }

    /// Install or replace chain 0
    pub fn set_chain(&mut self, chain: &SignatureChain) -> Result<()> {
        if self.descriptor.chain_count()? == 0 {
            self.descriptor.add_chain(chain)?;
        } else {
            self.descriptor.set_chain(0, chain)?;
        }
        self.update()
    }

    /// Full trust check of chain 0 against the header digest
    pub fn verify(&self, policy: &TrustPolicy) -> Result<()> {
        self.validate()?;
        self.chain()?
            .verify(policy, Some(&self.block0_digest()))
    }
}

impl Layout for EngineeringCert {
    fn name(&self) -> &str {
        "engineering_cert"
    }

    fn size(&self) -> Result<usize> {
        Ok(self.header.size()? + self.descriptor.size()?)
    }

    fn validate(&self) -> Result<()> {
        self.header.validate()?;
        let stored = self.header.get_u32(OFF_LENGTH)?;
        let size = self.size()?;
        if stored as usize != size || size != CERT_SIZE {
            return Err(StructuralError::LengthField {
                fragment: "engineering_cert".to_string(),
                field: "length",
                stored: u64::from(stored),
                actual: size as u64,
            }
            .into());
        }
        self.descriptor.validate()?;
        if self.descriptor.block0_hash()? != self.block0_digest() {
            return Err(CryptoError::CertHashMismatch.into());
        }
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        self.header.update()?;
        self.header.set_u32(OFF_LENGTH, CERT_SIZE as u32)?;
        let digest = self.block0_digest();
        self.descriptor.set_block0_hash(&digest)?;
        self.descriptor.update()
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = self.header.to_bytes()?;
        out.extend_from_slice(&self.descriptor.to_bytes()?);
        Ok(out)
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let split = CERT_HEADER_SIZE.clamp(offset, offset + data.len());
        let (head, tail) = data.split_at(split - offset);
        if !head.is_empty() {
            self.header.write_bytes(offset, head)?;
        }
        if !tail.is_empty() {
            self.descriptor
                .write_bytes(split - CERT_HEADER_SIZE, tail)?;
        }
        Ok(())
    }
}
