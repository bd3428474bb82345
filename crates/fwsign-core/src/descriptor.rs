//! Signature descriptor
//!
//! Fixed 4096-byte block that travels in front of a signed image.
//!
//! ```text
//! OFFSET  SIZE   FIELD
//! ──────────────────────────────────────────────────────
//! 0x000   64     block0 hash: SHA-384 + 16 zero bytes
//! 0x040   3776   signature chain section
//!   +0x00   4      magic: SIGNATURE_CHAIN_SECTION
//!   +0x04   4      chain count (0..=3)
//!   +0x08   12     chain lengths [3]
//!   +0x14   12     reserved
//!   +0x20   ...    chains, then zero padding
//! 0xF00   4      image pointer
//! 0xF04   4      magic: SIGNATURE_DESCRIPTOR
//! 0xF08   244    reserved
//! 0xFFC   4      CRC-32 over [0x000, 0xFFC)
//! ```

use crate::chain::SignatureChain;
use crate::error::{Result, StructuralError};
use crate::fragment::{word_at, Collection, Fragment, Layout, Leaf, Padding, Reader};
use crate::hash::DIGEST_SIZE;
use crate::magic::MagicNumber;

pub const DESCRIPTOR_SIZE: usize = 0x1000;
pub const BLOCK0_HASH_SIZE: usize = 0x40;
pub const CHAIN_SECTION_SIZE: usize = 0xEC0;
pub const CHAIN_SECTION_HEADER_SIZE: usize = 0x20;
pub const TRAILER_OFFSET: usize = 0xF00;
pub const TRAILER_SIZE: usize = 0x100;

/// Offset of the descriptor magic
pub const MAGIC_OFFSET: usize = 0xF04;

/// Offset of the descriptor CRC
pub const CRC_OFFSET: usize = 0xFFC;

/// Chains one descriptor can carry
pub const MAX_CHAINS: usize = 3;

const OFF_IMAGE_POINTER: usize = 0xF00;
const OFF_CHAIN_COUNT: usize = 0x04;
const OFF_CHAIN_LENGTHS: usize = 0x08;

const BLOCK0_HASH: usize = 0;
const SECTION: usize = 1;

/// 4096-byte descriptor holding the block0 hash and up to three chains
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureDescriptor {
    inner: Collection,
}

impl SignatureDescriptor {
    fn section_header() -> Leaf {
        Leaf::new("chain_section_header", CHAIN_SECTION_HEADER_SIZE)
            .with_max_size(CHAIN_SECTION_HEADER_SIZE)
            .with_magic(MagicNumber::SignatureChainSection, 0)
    }

    fn chain_leaf(bytes: &[u8]) -> Result<Leaf> {
        let mut leaf = Leaf::new("signature_chain", 0);
        leaf.load(bytes)?;
        Ok(leaf)
    }

    fn assemble(block0_hash: Leaf, section: Collection, trailer: Leaf) -> Result<Self> {
        let inner = Collection::new("signature_descriptor")
            .with_max_size(DESCRIPTOR_SIZE)
            .with_magic(MagicNumber::SignatureDescriptor, MAGIC_OFFSET)
            .with_crc(CRC_OFFSET)
            .with_child(block0_hash)?
            .with_child(section)?
            .with_child(trailer)?;
        Ok(Self { inner })
    }

    fn empty_section(header: Leaf) -> Result<Collection> {
        Collection::new("chain_section")
            .with_max_size(CHAIN_SECTION_SIZE)
            .with_child(header)?
            .with_child(Padding::new())
    }

    /// Initialized descriptor with no chains
    pub fn new() -> Result<Self> {
        let mut descriptor = Self::assemble(
            Leaf::new("block0_hash", BLOCK0_HASH_SIZE).with_max_size(BLOCK0_HASH_SIZE),
            Self::empty_section(Self::section_header())?,
            Leaf::new("trailer", TRAILER_SIZE).with_max_size(TRAILER_SIZE),
        )?;
        descriptor.inner.initialize()?;
        descriptor.update()?;
        Ok(descriptor)
    }

    /// Consume one descriptor from the reader
    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let bytes = reader.take(DESCRIPTOR_SIZE)?;
        let mut part = Reader::new(bytes);

        let mut block0_hash =
            Leaf::new("block0_hash", BLOCK0_HASH_SIZE).with_max_size(BLOCK0_HASH_SIZE);
        block0_hash.read(&mut part, BLOCK0_HASH_SIZE)?;

        let section_bytes = part.take(CHAIN_SECTION_SIZE)?;
        let mut section_reader = Reader::new(section_bytes);
        let mut header = Self::section_header();
        header.read(&mut section_reader, CHAIN_SECTION_HEADER_SIZE)?;
        header.validate()?;

        let count = word_at(header.raw(), OFF_CHAIN_COUNT) as usize;
        if count > MAX_CHAINS {
            return Err(StructuralError::ChainIndex {
                index: count,
                max: MAX_CHAINS,
            }
            .into());
        }
        let mut chains = Vec::with_capacity(count);
        for i in 0..count {
            let length = word_at(header.raw(), OFF_CHAIN_LENGTHS + 4 * i) as usize;
            let chain_bytes = section_reader.take(length)?;
            SignatureChain::from_bytes(chain_bytes)?;
            chains.push(Self::chain_leaf(chain_bytes)?);
        }

        let padding = Padding::new();
        let rest = section_reader.take(section_reader.remaining())?;
        let used = CHAIN_SECTION_SIZE - rest.len();
        if let Some(i) = rest.iter().position(|&b| b != padding.fill()) {
            return Err(StructuralError::PaddingWrite {
                offset: BLOCK0_HASH_SIZE + used + i,
                fill: padding.fill(),
                value: rest[i],
            }
            .into());
        }

        let mut section = Self::empty_section(header)?;
        for chain in chains {
            section.push_before_padding(chain)?;
        }

        let mut trailer = Leaf::new("trailer", TRAILER_SIZE).with_max_size(TRAILER_SIZE);
        trailer.read(&mut part, TRAILER_SIZE)?;
        part.finish()?;

        let descriptor = Self::assemble(block0_hash, section, trailer)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let descriptor = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(descriptor)
    }

    /// True if `bytes` looks like a descriptor by size and magic
    pub fn matches(bytes: &[u8]) -> bool {
        bytes.len() == DESCRIPTOR_SIZE
            && word_at(bytes, MAGIC_OFFSET) == MagicNumber::SignatureDescriptor.value()
    }

    pub fn collection(&self) -> &Collection {
        &self.inner
    }

    fn section(&self) -> Result<&Collection> {
        self.inner
            .child(SECTION)
            .and_then(Fragment::as_collection)
            .ok_or_else(|| self.shape_error())
    }

    fn section_mut(&mut self) -> Result<&mut Collection> {
        let err = self.shape_error();
        self.inner
            .child_mut(SECTION)
            .and_then(Fragment::as_collection_mut)
            .ok_or(err)
    }

    fn shape_error(&self) -> crate::error::Error {
        StructuralError::FragmentCount {
            fragment: "signature_descriptor".to_string(),
            expected: 3,
            actual: self.inner.len(),
        }
        .into()
    }

    /// SHA-384 stored in the first 48 bytes
    pub fn block0_hash(&self) -> Result<[u8; DIGEST_SIZE]> {
        let leaf = self
            .inner
            .child(BLOCK0_HASH)
            .and_then(Fragment::as_leaf)
            .ok_or_else(|| self.shape_error())?;
        leaf.array::<DIGEST_SIZE>(0)
    }

    /// Store a SHA-384, zero-padding to 64 bytes
    pub fn set_block0_hash(&mut self, hash: &[u8; DIGEST_SIZE]) -> Result<()> {
        let mut region = [0u8; BLOCK0_HASH_SIZE];
        region[..DIGEST_SIZE].copy_from_slice(hash);
        self.inner.write_bytes(0, &region)
    }

    pub fn image_pointer(&self) -> Result<u32> {
        self.inner.get_u32(OFF_IMAGE_POINTER)
    }

    pub fn set_image_pointer(&mut self, pointer: u32) -> Result<()> {
        self.inner.set_u32(OFF_IMAGE_POINTER, pointer)
    }

    pub fn stored_crc(&self) -> Result<u32> {
        self.inner.get_u32(CRC_OFFSET)
    }

    pub fn calculate_crc(&self) -> Result<u32> {
        self.inner.calculate_crc(CRC_OFFSET)
    }

    fn chain_leaves(&self) -> Result<Vec<&Leaf>> {
        Ok(self
            .section()?
            .children()
            .iter()
            .skip(1)
            .filter_map(Fragment::as_leaf)
            .collect())
    }

    pub fn chain_count(&self) -> Result<usize> {
        Ok(self.chain_leaves()?.len())
    }

    /// Parse chain `index`
    pub fn chain(&self, index: usize) -> Result<SignatureChain> {
        let leaves = self.chain_leaves()?;
        let leaf = leaves.get(index).ok_or(StructuralError::ChainIndex {
            index,
            max: leaves.len(),
        })?;
        SignatureChain::from_bytes(leaf.raw())
    }

    pub fn chains(&self) -> Result<Vec<SignatureChain>> {
        (0..self.chain_count()?).map(|i| self.chain(i)).collect()
    }

    /// Append a chain, returning its index
    ///
    /// A chain that does not fit leaves the descriptor unchanged.
    pub fn add_chain(&mut self, chain: &SignatureChain) -> Result<usize> {
        let index = self.chain_count()?;
        if index >= MAX_CHAINS {
            return Err(StructuralError::ChainIndex {
                index,
                max: MAX_CHAINS,
            }
            .into());
        }
        let leaf = Self::chain_leaf(&chain.to_bytes()?)?;
        let mut next = self.clone();
        next.section_mut()?.push_before_padding(leaf)?;
        next.update()?;
        *self = next;
        Ok(index)
    }

    /// Replace chain `index`
    pub fn set_chain(&mut self, index: usize, chain: &SignatureChain) -> Result<()> {
        let count = self.chain_count()?;
        if index >= count {
            return Err(StructuralError::ChainIndex { index, max: count }.into());
        }
        let leaf = Self::chain_leaf(&chain.to_bytes()?)?;
        let mut next = self.clone();
        next.section_mut()?.replace(index + 1, leaf)?;
        next.update()?;
        *self = next;
        Ok(())
    }

    fn sync_section_header(&mut self) -> Result<()> {
        let lengths: Vec<usize> = self.chain_leaves()?.iter().map(|l| l.raw().len()).collect();
        let section = self.section_mut()?;
        section.set_u32(OFF_CHAIN_COUNT, lengths.len() as u32)?;
        for slot in 0..MAX_CHAINS {
            let length = lengths.get(slot).copied().unwrap_or(0) as u32;
            section.set_u32(OFF_CHAIN_LENGTHS + 4 * slot, length)?;
        }
        Ok(())
    }
}

impl Layout for SignatureDescriptor {
    fn name(&self) -> &str {
        "signature_descriptor"
    }

    fn size(&self) -> Result<usize> {
        self.inner.size()
    }

    fn validate(&self) -> Result<()> {
        let size = self.inner.size()?;
        if size != DESCRIPTOR_SIZE {
            return Err(StructuralError::SizeMismatch {
                fragment: "signature_descriptor".to_string(),
                expected: DESCRIPTOR_SIZE,
                actual: size,
            }
            .into());
        }
        self.inner.validate()?;

        let section = self.section()?;
        let leaves = self.chain_leaves()?;
        let stored = section.get_u32(OFF_CHAIN_COUNT)?;
        if stored as usize != leaves.len() {
            return Err(StructuralError::LengthField {
                fragment: "chain_section".to_string(),
                field: "chain_count",
                stored: u64::from(stored),
                actual: leaves.len() as u64,
            }
            .into());
        }
        for (i, leaf) in leaves.iter().enumerate() {
            let stored = section.get_u32(OFF_CHAIN_LENGTHS + 4 * i)?;
            if stored as usize != leaf.raw().len() {
                return Err(StructuralError::LengthField {
                    fragment: "chain_section".to_string(),
                    field: "chain_length",
                    stored: u64::from(stored),
                    actual: leaf.raw().len() as u64,
                }
                .into());
            }
            SignatureChain::from_bytes(leaf.raw())?;
        }
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        self.sync_section_header()?;
        self.inner.update()
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        self.inner.to_bytes()
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.inner.write_bytes(offset, data)
    }
}
