//! Signature chain entries
//!
//! Every entry is a three-part composite: header, payload, signature.
//!
//! Header (24 bytes, 32 for root entries):
//! ```text
//! OFFSET  SIZE  FIELD
//! ──────────────────────────────────────────────────────
//! 0x00    4     magic: entry type
//! 0x04    4     entry length (header + payload + signature)
//! 0x08    4     payload length
//! 0x0C    4     signature length
//! 0x10    4     reserved
//! 0x14    4     reserved (root: hash select)
//! 0x18    4     root only: key hash MSW (big-endian)
//! 0x1C    4     root only: reserved
//! ```
//!
//! | Entry       | Header | Payload           | Signature | Total    |
//! |-------------|--------|-------------------|-----------|----------|
//! | Root        | 32     | key (120)         | none      | 152      |
//! | Multi-root  | 32     | 1..=3 keys        | none      | 152..392 |
//! | Public key  | 24     | key (120)         | 112       | 256      |
//! | Block0      | 24     | none              | 112       | 136      |

use crate::error::{CryptoError, Result, StructuralError};
use crate::fragment::{word_at, Collection, Endianness, Fragment, Layout, Leaf, Reader};
use crate::hash::{sha384_multi, DIGEST_SIZE};
use crate::key::{KeyKind, PublicKey, PUBLIC_KEY_SIZE};
use crate::magic::MagicNumber;
use crate::signature::{Signature, SIGNATURE_SIZE};

/// Header size of public key and block0 entries
pub const ENTRY_HEADER_SIZE: usize = 0x18;

/// Header size of root and multi-root entries
pub const ROOT_HEADER_SIZE: usize = 0x20;

pub const ROOT_ENTRY_SIZE: usize = ROOT_HEADER_SIZE + PUBLIC_KEY_SIZE;
pub const PUBLIC_KEY_ENTRY_SIZE: usize = ENTRY_HEADER_SIZE + PUBLIC_KEY_SIZE + SIGNATURE_SIZE;
pub const BLOCK0_ENTRY_SIZE: usize = ENTRY_HEADER_SIZE + SIGNATURE_SIZE;

/// Keys a multi-root entry may carry
pub const MAX_MULTI_ROOT_KEYS: usize = 3;

const OFF_LENGTH: usize = 0x04;
const OFF_DATA_LENGTH: usize = 0x08;
const OFF_SIGNATURE_LENGTH: usize = 0x0C;
const OFF_HASH_SEL: usize = 0x14;
const OFF_MSW: usize = 0x18;

const HEADER: usize = 0;
const PAYLOAD: usize = 1;
const SIGNATURE: usize = 2;

/// Entry variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Root,
    MultiRoot,
    PublicKey,
    Block0,
}

impl EntryKind {
    pub fn magic(self) -> MagicNumber {
        match self {
            EntryKind::Root => MagicNumber::SignatureSingleRootEntry,
            EntryKind::MultiRoot => MagicNumber::SignatureMultiRootEntry,
            EntryKind::PublicKey => MagicNumber::SignaturePublicKeyEntry,
            EntryKind::Block0 => MagicNumber::SignatureBlock0Entry,
        }
    }

    pub fn from_magic(value: u32) -> Option<Self> {
        match MagicNumber::from_value(value)? {
            MagicNumber::SignatureSingleRootEntry => Some(EntryKind::Root),
            MagicNumber::SignatureMultiRootEntry => Some(EntryKind::MultiRoot),
            MagicNumber::SignaturePublicKeyEntry => Some(EntryKind::PublicKey),
            MagicNumber::SignatureBlock0Entry => Some(EntryKind::Block0),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EntryKind::Root => "root_entry",
            EntryKind::MultiRoot => "multi_root_entry",
            EntryKind::PublicKey => "public_key_entry",
            EntryKind::Block0 => "block0_entry",
        }
    }

    pub fn header_size(self) -> usize {
        if self.is_root() {
            ROOT_HEADER_SIZE
        } else {
            ENTRY_HEADER_SIZE
        }
    }

    /// Root entries are unsigned trust anchors
    pub fn is_root(self) -> bool {
        matches!(self, EntryKind::Root | EntryKind::MultiRoot)
    }
}

/// One link of a signature chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureChainEntry {
    kind: EntryKind,
    inner: Collection,
}

impl SignatureChainEntry {
    fn header_leaf(kind: EntryKind) -> Leaf {
        let size = kind.header_size();
        Leaf::new("entry_header", size)
            .with_max_size(size)
            .with_magic(kind.magic(), 0)
    }

    fn empty_leaf(name: &'static str) -> Leaf {
        Leaf::new(name, 0).with_max_size(0)
    }

    fn assemble(kind: EntryKind, header: Leaf, payload: Fragment, signature: Leaf) -> Result<Self> {
        let inner = Collection::new(kind.name())
            .with_child(header)?
            .with_child(payload)?
            .with_child(signature)?;
        Ok(Self { kind, inner })
    }

    fn build(kind: EntryKind, payload: Fragment, signature: Leaf) -> Result<Self> {
        let mut header = Self::header_leaf(kind);
        header.initialize()?;
        let mut entry = Self::assemble(kind, header, payload, signature)?;
        entry.update()?;
        Ok(entry)
    }

    /// Single-root trust anchor
    pub fn root(key: PublicKey, hash_sel: u32) -> Result<Self> {
        if key.kind() != KeyKind::SingleRoot {
            return Err(StructuralError::MagicMismatch {
                fragment: "root_entry".to_string(),
                offset: ROOT_HEADER_SIZE,
                expected: MagicNumber::PublicKeySingleRoot.value(),
                actual: key.magic(),
            }
            .into());
        }
        let mut entry = Self::build(
            EntryKind::Root,
            key.into_leaf().into(),
            Self::empty_leaf("signature"),
        )?;
        entry.set_hash_sel(hash_sel)?;
        Ok(entry)
    }

    /// Trust anchor holding up to three keys
    pub fn multi_root(keys: Vec<PublicKey>, hash_sel: u32) -> Result<Self> {
        let mut payload = Collection::new("multi_root_keys");
        for key in keys {
            if key.kind() != KeyKind::MultiRoot {
                return Err(StructuralError::MagicMismatch {
                    fragment: "multi_root_keys".to_string(),
                    offset: payload.size()?,
                    expected: MagicNumber::PublicKeyMultiRoot.value(),
                    actual: key.magic(),
                }
                .into());
            }
            payload.push(key.into_leaf())?;
        }
        check_multi_root_count(payload.len())?;
        let mut entry = Self::build(
            EntryKind::MultiRoot,
            payload.into(),
            Self::empty_leaf("signature"),
        )?;
        entry.set_hash_sel(hash_sel)?;
        Ok(entry)
    }

    /// Code signing key entry with a blank signature
    pub fn public_key(key: PublicKey) -> Result<Self> {
        Self::build(
            EntryKind::PublicKey,
            key.into_leaf().into(),
            Signature::blank()?.into_leaf(),
        )
    }

    /// Block0 entry with a blank signature
    pub fn block0() -> Result<Self> {
        Self::build(
            EntryKind::Block0,
            Self::empty_leaf("payload").into(),
            Signature::blank()?.into_leaf(),
        )
    }

    /// Consume one entry from the reader
    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let magic = reader.peek_u32(0)?;
        let kind = EntryKind::from_magic(magic).ok_or(StructuralError::UnknownMagic(magic))?;
        let length = reader.peek_u32(OFF_LENGTH)? as usize;
        let header_size = kind.header_size();
        if length < header_size {
            return Err(StructuralError::LengthField {
                fragment: kind.name().to_string(),
                field: "length",
                stored: length as u64,
                actual: header_size as u64,
            }
            .into());
        }

        let bytes = reader.take(length)?;
        let data_length = word_at(bytes, OFF_DATA_LENGTH) as usize;
        let signature_length = word_at(bytes, OFF_SIGNATURE_LENGTH) as usize;
        let parts = header_size
            .checked_add(data_length)
            .and_then(|n| n.checked_add(signature_length));
        if parts != Some(length) {
            return Err(StructuralError::LengthField {
                fragment: kind.name().to_string(),
                field: "length",
                stored: length as u64,
                actual: parts.map_or(u64::MAX, |n| n as u64),
            }
            .into());
        }

        let mut part = Reader::new(bytes);
        let mut header = Self::header_leaf(kind);
        header.read(&mut part, header_size)?;
        let payload_bytes = part.take(data_length)?;
        let signature_bytes = part.take(signature_length)?;

        let payload: Fragment = match kind {
            EntryKind::Root | EntryKind::PublicKey => {
                PublicKey::from_bytes(payload_bytes)?.into_leaf().into()
            }
            EntryKind::MultiRoot => {
                let mut keys = Collection::new("multi_root_keys");
                let mut key_reader = Reader::new(payload_bytes);
                while !key_reader.is_empty() {
                    keys.push(PublicKey::read(&mut key_reader)?.into_leaf())?;
                }
                keys.into()
            }
            EntryKind::Block0 => {
                let mut leaf = Self::empty_leaf("payload");
                leaf.load(payload_bytes)?;
                leaf.into()
            }
        };

        let signature = if kind.is_root() {
            let mut leaf = Self::empty_leaf("signature");
            leaf.load(signature_bytes)?;
            leaf
        } else {
            Signature::from_bytes(signature_bytes)?.into_leaf()
        };

        let entry = Self::assemble(kind, header, payload, signature)?;
        entry.validate()?;
        Ok(entry)
    }

    /// Parse exactly one entry
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let entry = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(entry)
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn collection(&self) -> &Collection {
        &self.inner
    }

    fn part(&self, index: usize) -> Result<&Fragment> {
        self.inner.child(index).ok_or_else(|| {
            StructuralError::FragmentCount {
                fragment: self.kind.name().to_string(),
                expected: 3,
                actual: self.inner.len(),
            }
            .into()
        })
    }

    fn header(&self) -> Result<&Fragment> {
        self.part(HEADER)
    }

    pub fn length(&self) -> Result<u32> {
        self.header()?.get_u32(OFF_LENGTH)
    }

    pub fn data_length(&self) -> Result<u32> {
        self.header()?.get_u32(OFF_DATA_LENGTH)
    }

    pub fn signature_length(&self) -> Result<u32> {
        self.header()?.get_u32(OFF_SIGNATURE_LENGTH)
    }

    /// Hash select word of root entries
    pub fn hash_sel(&self) -> Result<u32> {
        self.header()?.get_u32(OFF_HASH_SEL)
    }

    pub fn set_hash_sel(&mut self, hash_sel: u32) -> Result<()> {
        if !self.kind.is_root() {
            return Err(StructuralError::UnexpectedEntry {
                index: 0,
                kind: self.kind.name(),
            }
            .into());
        }
        self.inner.set_u32(OFF_HASH_SEL, hash_sel)
    }

    /// Stored key hash MSW of root entries
    pub fn msw(&self) -> Result<u32> {
        Ok(self
            .header()?
            .get_value(OFF_MSW, 4, Endianness::Big)? as u32)
    }

    /// Keys carried in the payload, in order
    pub fn keys(&self) -> Result<Vec<PublicKey>> {
        match self.part(PAYLOAD)? {
            Fragment::Leaf(leaf) if leaf.raw().is_empty() => Ok(Vec::new()),
            Fragment::Leaf(leaf) => Ok(vec![PublicKey::from_bytes(leaf.raw())?]),
            Fragment::Collection(keys) => keys
                .children()
                .iter()
                .map(|k| PublicKey::from_bytes(&k.to_bytes()?))
                .collect(),
            Fragment::Padding(_) => Ok(Vec::new()),
        }
    }

    /// First key of the payload
    pub fn key(&self) -> Result<Option<PublicKey>> {
        Ok(self.keys()?.into_iter().next())
    }

    /// Signature of non-root entries
    pub fn signature(&self) -> Result<Option<Signature>> {
        if self.kind.is_root() {
            return Ok(None);
        }
        Signature::from_bytes(&self.part(SIGNATURE)?.to_bytes()?).map(Some)
    }

    /// Embed a signature into a public key or block0 entry
    pub fn set_signature(&mut self, signature: &Signature) -> Result<()> {
        if self.kind.is_root() {
            return Err(StructuralError::UnexpectedEntry {
                index: 0,
                kind: self.kind.name(),
            }
            .into());
        }
        signature.validate()?;
        self.inner.replace(SIGNATURE, signature.clone().into_leaf())?;
        self.update()
    }

    /// SHA-384 over header and payload
    pub fn signed_digest(&self) -> Result<[u8; DIGEST_SIZE]> {
        Ok(sha384_multi(&[
            &self.part(HEADER)?.to_bytes()?,
            &self.part(PAYLOAD)?.to_bytes()?,
        ]))
    }

    fn check_length(&self, field: &'static str, stored: u32, actual: usize) -> Result<()> {
        if stored as usize != actual {
            return Err(StructuralError::LengthField {
                fragment: self.kind.name().to_string(),
                field,
                stored: u64::from(stored),
                actual: actual as u64,
            }
            .into());
        }
        Ok(())
    }
}

fn check_multi_root_count(count: usize) -> Result<()> {
    if count == 0 || count > MAX_MULTI_ROOT_KEYS {
        return Err(StructuralError::FragmentCount {
            fragment: "multi_root_keys".to_string(),
            expected: MAX_MULTI_ROOT_KEYS,
            actual: count,
        }
        .into());
    }
    Ok(())
}

impl Layout for SignatureChainEntry {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn size(&self) -> Result<usize> {
        self.inner.size()
    }

    fn validate(&self) -> Result<()> {
        if self.inner.len() != 3 {
            return Err(StructuralError::FragmentCount {
                fragment: self.kind.name().to_string(),
                expected: 3,
                actual: self.inner.len(),
            }
            .into());
        }
        self.inner.validate()?;

        let header_size = self.part(HEADER)?.size()?;
        if header_size != self.kind.header_size() {
            return Err(StructuralError::SizeMismatch {
                fragment: "entry_header".to_string(),
                expected: self.kind.header_size(),
                actual: header_size,
            }
            .into());
        }
        let payload_size = self.part(PAYLOAD)?.size()?;
        let signature_size = self.part(SIGNATURE)?.size()?;
        self.check_length("length", self.length()?, self.size()?)?;
        self.check_length("data_length", self.data_length()?, payload_size)?;
        self.check_length("signature_length", self.signature_length()?, signature_size)?;

        let keys = self.keys()?;
        match self.kind {
            EntryKind::Root => {
                let key = keys.first().ok_or_else(|| StructuralError::FragmentCount {
                    fragment: "root_entry".to_string(),
                    expected: 1,
                    actual: 0,
                })?;
                if key.kind() != KeyKind::SingleRoot {
                    return Err(StructuralError::MagicMismatch {
                        fragment: "root_entry".to_string(),
                        offset: ROOT_HEADER_SIZE,
                        expected: MagicNumber::PublicKeySingleRoot.value(),
                        actual: key.magic(),
                    }
                    .into());
                }
                self.check_msw(key)?;
            }
            EntryKind::MultiRoot => {
                check_multi_root_count(keys.len())?;
                if let Some(key) = keys.iter().find(|k| k.kind() != KeyKind::MultiRoot) {
                    return Err(StructuralError::MagicMismatch {
                        fragment: "multi_root_keys".to_string(),
                        offset: 0,
                        expected: MagicNumber::PublicKeyMultiRoot.value(),
                        actual: key.magic(),
                    }
                    .into());
                }
                self.check_msw(&keys[0])?;
            }
            EntryKind::PublicKey => {
                if keys.len() != 1 {
                    return Err(StructuralError::FragmentCount {
                        fragment: "public_key_entry".to_string(),
                        expected: 1,
                        actual: keys.len(),
                    }
                    .into());
                }
            }
            EntryKind::Block0 => self.check_length("data_length", 0, payload_size)?,
        }

        if self.kind.is_root() {
            self.check_length("signature_length", 0, signature_size)
        } else {
            self.signature()?;
            Ok(())
        }
    }

    fn update(&mut self) -> Result<()> {
        self.inner.update()?;
        let total = self.inner.size()? as u32;
        let payload = self.part(PAYLOAD)?.size()? as u32;
        let signature = self.part(SIGNATURE)?.size()? as u32;
        self.inner.set_u32(OFF_LENGTH, total)?;
        self.inner.set_u32(OFF_DATA_LENGTH, payload)?;
        self.inner.set_u32(OFF_SIGNATURE_LENGTH, signature)?;
        if self.kind.is_root() {
            if let Some(key) = self.key()? {
                self.inner
                    .set_value(OFF_MSW, 4, u64::from(key.msw()), Endianness::Big)?;
            }
        }
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        self.inner.to_bytes()
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.inner.write_bytes(offset, data)
    }
}

impl SignatureChainEntry {
    fn check_msw(&self, key: &PublicKey) -> Result<()> {
        let stored = self.msw()?;
        let computed = key.msw();
        if stored != computed {
            return Err(CryptoError::RootHashMismatch { stored, computed }.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecdsa::PrivateKey;
    use crate::error::Error;
    use crate::testutil::public_key as key;

    #[test]
    fn test_entry_sizes() {
        let root = SignatureChainEntry::root(key(1, KeyKind::SingleRoot), 0).unwrap();
        assert_eq!(root.size().unwrap(), ROOT_ENTRY_SIZE);
        assert_eq!(ROOT_ENTRY_SIZE, 152);

        let csk = SignatureChainEntry::public_key(key(2, KeyKind::SingleRoot)).unwrap();
        assert_eq!(csk.size().unwrap(), 256);
        assert_eq!(csk.length().unwrap(), 256);
        assert_eq!(csk.data_length().unwrap(), 120);
        assert_eq!(csk.signature_length().unwrap(), 112);

        let block0 = SignatureChainEntry::block0().unwrap();
        assert_eq!(block0.size().unwrap(), BLOCK0_ENTRY_SIZE);
        assert_eq!(BLOCK0_ENTRY_SIZE, 136);
    }

    #[test]
    fn test_root_header() {
        let k = key(3, KeyKind::SingleRoot);
        let root = SignatureChainEntry::root(k.clone(), 2).unwrap();
        let bytes = root.to_bytes().unwrap();
        assert_eq!(
            &bytes[0..4],
            &MagicNumber::SignatureSingleRootEntry.value().to_le_bytes()
        );
        assert_eq!(root.hash_sel().unwrap(), 2);
        assert_eq!(&bytes[0x18..0x1C], &k.key_hash()[..4]);
        assert_eq!(root.msw().unwrap(), k.msw());
        root.validate().unwrap();
        assert!(root.signature().unwrap().is_none());
    }

    #[test]
    fn test_round_trip_each_kind() {
        let entries = vec![
            SignatureChainEntry::root(key(4, KeyKind::SingleRoot), 0).unwrap(),
            SignatureChainEntry::multi_root(
                vec![key(5, KeyKind::MultiRoot), key(6, KeyKind::MultiRoot)],
                0,
            )
            .unwrap(),
            SignatureChainEntry::public_key(key(7, KeyKind::SingleRoot)).unwrap(),
            SignatureChainEntry::block0().unwrap(),
        ];
        for entry in entries {
            let bytes = entry.to_bytes().unwrap();
            let parsed = SignatureChainEntry::from_bytes(&bytes).unwrap();
            assert_eq!(parsed.kind(), entry.kind());
            assert_eq!(parsed.to_bytes().unwrap(), bytes);
        }
    }

    #[test]
    fn test_multi_root_limits() {
        let four = (10..14).map(|s| key(s, KeyKind::MultiRoot)).collect();
        assert!(SignatureChainEntry::multi_root(four, 0).is_err());
        assert!(SignatureChainEntry::multi_root(Vec::new(), 0).is_err());
        assert!(
            SignatureChainEntry::multi_root(vec![key(9, KeyKind::SingleRoot)], 0).is_err()
        );

        let entry =
            SignatureChainEntry::multi_root(vec![key(14, KeyKind::MultiRoot)], 0).unwrap();
        assert_eq!(entry.size().unwrap(), ROOT_ENTRY_SIZE);
        assert_eq!(entry.keys().unwrap().len(), 1);
    }

    #[test]
    fn test_length_field_tamper_detected() {
        let csk = SignatureChainEntry::public_key(key(8, KeyKind::SingleRoot)).unwrap();
        let mut bytes = csk.to_bytes().unwrap();
        bytes[OFF_DATA_LENGTH] = 0x70;
        assert!(SignatureChainEntry::from_bytes(&bytes).unwrap_err().is_structural());
    }

    #[test]
    fn test_sha256_signature_rejected_on_read() {
        let csk = SignatureChainEntry::public_key(key(8, KeyKind::SingleRoot)).unwrap();
        let mut bytes = csk.to_bytes().unwrap();
        let hash_offset = ENTRY_HEADER_SIZE + PUBLIC_KEY_SIZE + 0x0C;
        bytes[hash_offset..hash_offset + 4]
            .copy_from_slice(&MagicNumber::HashSha256.value().to_le_bytes());
        assert!(matches!(
            SignatureChainEntry::from_bytes(&bytes),
            Err(Error::Crypto(CryptoError::UnsupportedHash { .. }))
        ));
    }

    #[test]
    fn test_set_signature() {
        let signer = PrivateKey::from_bytes([0x21; 48]).unwrap();
        let mut csk = SignatureChainEntry::public_key(key(9, KeyKind::SingleRoot)).unwrap();
        let before = csk.signed_digest().unwrap();
        let sig = Signature::from_raw(&signer.sign(&before).unwrap()).unwrap();
        csk.set_signature(&sig).unwrap();

        assert_eq!(csk.signed_digest().unwrap(), before);
        assert_eq!(csk.signature().unwrap().unwrap(), sig);
        assert_eq!(csk.size().unwrap(), PUBLIC_KEY_ENTRY_SIZE);

        let mut root = SignatureChainEntry::root(key(1, KeyKind::SingleRoot), 0).unwrap();
        assert!(root.set_signature(&sig).is_err());
    }
}
