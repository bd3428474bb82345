//! Public key fragment
//!
//! Layout (120 bytes):
//! ```text
//! OFFSET  SIZE  FIELD
//! ──────────────────────────────────────────────────────
//! 0x00    4     magic: PUBLIC_KEY_SINGLE_ROOT | PUBLIC_KEY_MULTI_ROOT
//! 0x04    4     x_size: 48 (multi-root: fuse enable)
//! 0x08    4     y_size: 48 (multi-root: contribution)
//! 0x0C    4     curve: CURVE_SECP384R1
//! 0x10    4     permission bitmask
//! 0x14    4     cancellation id
//! 0x18    48    X coordinate (big-endian)
//! 0x48    48    Y coordinate (big-endian)
//! ```

use crate::ecdsa::{Curve, Point, PrivateKey, SCALAR_SIZE};
use crate::error::{CryptoError, Result, StructuralError};
use crate::fragment::{field48_at, word_at, Layout, Leaf, Reader};
use crate::hash::{sha384_multi, DIGEST_SIZE};
use crate::magic::MagicNumber;

/// Size of a public key fragment
pub const PUBLIC_KEY_SIZE: usize = 0x78;

/// Cancellation id carried by root keys
pub const ROOT_CANCEL_ID: u32 = 0xFFFF_FFFF;

/// Permission mask with every capability
pub const ALL_PERMISSIONS: u32 = 0xFFFF_FFFF;

/// Contribution word a multi-root key starts with
pub const DEFAULT_CONTRIBUTION: u32 = 0xFFFF_FFFF;

const OFF_X_SIZE: usize = 0x04;
const OFF_Y_SIZE: usize = 0x08;
const OFF_CURVE: usize = 0x0C;
const OFF_PERMISSION: usize = 0x10;
const OFF_CANCEL_ID: usize = 0x14;
const OFF_X: usize = 0x18;
const OFF_Y: usize = 0x48;

/// Which key magic a fragment carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Root or code-signing key
    SingleRoot,
    /// Member of a multi-root key set
    MultiRoot,
}

impl KeyKind {
    pub fn magic(self) -> MagicNumber {
        match self {
            KeyKind::SingleRoot => MagicNumber::PublicKeySingleRoot,
            KeyKind::MultiRoot => MagicNumber::PublicKeyMultiRoot,
        }
    }

    pub fn from_magic(value: u32) -> Option<Self> {
        match MagicNumber::from_value(value)? {
            MagicNumber::PublicKeySingleRoot => Some(KeyKind::SingleRoot),
            MagicNumber::PublicKeyMultiRoot => Some(KeyKind::MultiRoot),
            _ => None,
        }
    }
}

/// A P-384 public key with its permission and cancellation id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    kind: KeyKind,
    leaf: Leaf,
}

impl PublicKey {
    fn blank_leaf(kind: KeyKind) -> Leaf {
        Leaf::new("public_key", PUBLIC_KEY_SIZE)
            .with_max_size(PUBLIC_KEY_SIZE)
            .with_magic(kind.magic(), 0)
    }

    /// Header words filled in, coordinates still zero; only valid once a
    /// point is set
    fn unset(kind: KeyKind) -> Result<Self> {
        let mut key = Self {
            kind,
            leaf: Self::blank_leaf(kind),
        };
        key.leaf.initialize()?;
        key.leaf
            .set_u32(OFF_CURVE, MagicNumber::CurveSecp384r1.value())?;
        if kind == KeyKind::MultiRoot {
            key.set_contribution(DEFAULT_CONTRIBUTION)?;
        }
        key.update()?;
        Ok(key)
    }

    /// Key for a curve point
    pub fn from_point(point: &Point, kind: KeyKind) -> Result<Self> {
        let mut key = Self::unset(kind)?;
        key.set_point(point)?;
        key.validate()?;
        Ok(key)
    }

    /// Public half of a private key
    pub fn from_private_key(private: &PrivateKey, kind: KeyKind) -> Result<Self> {
        Self::from_point(&private.public_point()?, kind)
    }

    /// Consume one key from the reader
    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let magic = reader.peek_u32(0)?;
        let kind = KeyKind::from_magic(magic).ok_or_else(|| StructuralError::MagicMismatch {
            fragment: "public_key".to_string(),
            offset: 0,
            expected: MagicNumber::PublicKeySingleRoot.value(),
            actual: magic,
        })?;
        let mut leaf = Self::blank_leaf(kind);
        leaf.read(reader, PUBLIC_KEY_SIZE)?;
        let key = Self { kind, leaf };
        key.validate()?;
        Ok(key)
    }

    /// Parse exactly one key
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let key = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(key)
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn leaf(&self) -> &Leaf {
        &self.leaf
    }

    pub fn into_leaf(self) -> Leaf {
        self.leaf
    }

    pub fn magic(&self) -> u32 {
        word_at(self.leaf.raw(), 0)
    }

    pub fn curve(&self) -> u32 {
        word_at(self.leaf.raw(), OFF_CURVE)
    }

    pub fn x_size(&self) -> u32 {
        word_at(self.leaf.raw(), OFF_X_SIZE)
    }

    pub fn y_size(&self) -> u32 {
        word_at(self.leaf.raw(), OFF_Y_SIZE)
    }

    /// Multi-root contribution word (shares the y_size slot)
    pub fn contribution(&self) -> u32 {
        self.y_size()
    }

    pub fn set_contribution(&mut self, value: u32) -> Result<()> {
        self.leaf.set_u32(OFF_Y_SIZE, value)
    }

    pub fn permission(&self) -> u32 {
        word_at(self.leaf.raw(), OFF_PERMISSION)
    }

    pub fn set_permission(&mut self, permission: u32) -> Result<()> {
        self.leaf.set_u32(OFF_PERMISSION, permission)
    }

    pub fn cancel_id(&self) -> u32 {
        word_at(self.leaf.raw(), OFF_CANCEL_ID)
    }

    pub fn set_cancel_id(&mut self, cancel_id: u32) -> Result<()> {
        self.leaf.set_u32(OFF_CANCEL_ID, cancel_id)
    }

    pub fn x(&self) -> [u8; SCALAR_SIZE] {
        field48_at(self.leaf.raw(), OFF_X)
    }

    pub fn y(&self) -> [u8; SCALAR_SIZE] {
        field48_at(self.leaf.raw(), OFF_Y)
    }

    pub fn point(&self) -> Point {
        Point::from_coordinates(&self.x(), &self.y())
    }

    pub fn set_point(&mut self, point: &Point) -> Result<()> {
        let (x, y) = point.coordinates().ok_or(CryptoError::PointNotOnCurve)?;
        self.leaf.write_bytes(OFF_X, &x)?;
        self.leaf.write_bytes(OFF_Y, &y)
    }

    /// SHA-384 over X ‖ Y
    pub fn key_hash(&self) -> [u8; DIGEST_SIZE] {
        sha384_multi(&[&self.x(), &self.y()])
    }

    /// Most significant word of the key hash, read big-endian
    pub fn msw(&self) -> u32 {
        let hash = self.key_hash();
        u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]])
    }

    /// Same curve point, regardless of metadata
    pub fn same_key(&self, other: &PublicKey) -> bool {
        self.x() == other.x() && self.y() == other.y()
    }
}

impl Layout for PublicKey {
    fn name(&self) -> &str {
        self.leaf.name()
    }

    fn size(&self) -> Result<usize> {
        self.leaf.size()
    }

    fn validate(&self) -> Result<()> {
        let size = self.leaf.size()?;
        if size != PUBLIC_KEY_SIZE {
            return Err(StructuralError::SizeMismatch {
                fragment: "public_key".to_string(),
                expected: PUBLIC_KEY_SIZE,
                actual: size,
            }
            .into());
        }
        self.leaf.validate()?;

        let expected = MagicNumber::CurveSecp384r1.value();
        if self.curve() != expected {
            return Err(CryptoError::UnsupportedCurve {
                expected,
                actual: self.curve(),
            }
            .into());
        }
        if self.kind == KeyKind::SingleRoot {
            for (field, actual) in [("x_size", self.x_size()), ("y_size", self.y_size())] {
                if actual as usize != SCALAR_SIZE {
                    return Err(CryptoError::InvalidLength { field, actual }.into());
                }
            }
        }
        if !Curve::p384().is_on_curve(&self.point()) {
            return Err(CryptoError::PointNotOnCurve.into());
        }
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        if self.kind == KeyKind::SingleRoot {
            self.leaf.set_u32(OFF_X_SIZE, SCALAR_SIZE as u32)?;
            self.leaf.set_u32(OFF_Y_SIZE, SCALAR_SIZE as u32)?;
        }
        self.leaf.update()
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        self.leaf.to_bytes()
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.leaf.write_bytes(offset, data)
    }
}
