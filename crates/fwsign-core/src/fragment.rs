//! Binary fragment model
//!
//! Every container in this crate is a tree of three fragment kinds:
//!
//! - [`Leaf`]: a contiguous byte region with optional maximum size, magic
//!   slots, and CRC slots.
//! - [`Collection`]: an ordered list of child fragments that it owns.
//! - [`Padding`]: filler whose size is whatever remains of its owning
//!   collection's maximum size, optionally capped.
//!
//! Offsets are always relative to the start of the fragment they are passed
//! to. Integers default to little-endian.

use crate::crc;
use crate::error::{Result, StructuralError};
use crate::hash::{sha384, DIGEST_SIZE};
use crate::magic::MagicNumber;

/// Maximum nesting of collections during size computation
pub const MAX_DEPTH: usize = 32;

/// Byte order for integer access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

/// An expected magic number at a fixed offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MagicSlot {
    pub magic: MagicNumber,
    pub offset: usize,
}

/// Decode an unsigned integer of `bytes.len()` bytes
pub fn decode_uint(bytes: &[u8], endianness: Endianness) -> u64 {
    let fold = |acc: u64, b: &u8| (acc << 8) | u64::from(*b);
    match endianness {
        Endianness::Big => bytes.iter().fold(0, fold),
        Endianness::Little => bytes.iter().rev().fold(0, fold),
    }
}

/// Encode `value` into exactly `width` bytes
pub fn encode_uint(value: u64, width: usize, endianness: Endianness) -> Result<Vec<u8>> {
    if !(1..=8).contains(&width) {
        return Err(StructuralError::InvalidWidth(width).into());
    }
    if width < 8 && value >> (width * 8) != 0 {
        return Err(StructuralError::ValueOverflow { value, width }.into());
    }
    let le = value.to_le_bytes();
    let mut out = le[..width].to_vec();
    if endianness == Endianness::Big {
        out.reverse();
    }
    Ok(out)
}

/// Little-endian word of a fixed-layout region; callers guarantee the range
pub(crate) fn word_at(raw: &[u8], offset: usize) -> u32 {
    decode_uint(&raw[offset..offset + 4], Endianness::Little) as u32
}

/// 48-byte field of a fixed-layout region; callers guarantee the range
pub(crate) fn field48_at(raw: &[u8], offset: usize) -> [u8; 48] {
    let mut out = [0u8; 48];
    out.copy_from_slice(&raw[offset..offset + 48]);
    out
}

fn check_range(offset: usize, width: usize, size: usize) -> Result<()> {
    match offset.checked_add(width) {
        Some(end) if end <= size => Ok(()),
        _ => Err(StructuralError::OutOfBounds {
            offset,
            width,
            size,
        }
        .into()),
    }
}

/// Behaviour shared by every fragment
pub trait Layout {
    /// Name used in error messages and dumps
    fn name(&self) -> &str;

    /// Flattened size in bytes
    fn size(&self) -> Result<usize>;

    /// Check magics, CRCs, sizes, and type-specific rules
    fn validate(&self) -> Result<()>;

    /// Recompute derived fields (magics, lengths, CRCs)
    fn update(&mut self) -> Result<()>;

    /// Flatten to bytes
    fn to_bytes(&self) -> Result<Vec<u8>>;

    /// Overwrite bytes starting at `offset`
    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()>;

    /// Read an unsigned integer of 1..=8 bytes
    fn get_value(&self, offset: usize, width: usize, endianness: Endianness) -> Result<u64> {
        if !(1..=8).contains(&width) {
            return Err(StructuralError::InvalidWidth(width).into());
        }
        let bytes = self.to_bytes()?;
        check_range(offset, width, bytes.len())?;
        Ok(decode_uint(&bytes[offset..offset + width], endianness))
    }

    /// Write an unsigned integer of 1..=8 bytes
    fn set_value(
        &mut self,
        offset: usize,
        width: usize,
        value: u64,
        endianness: Endianness,
    ) -> Result<()> {
        let encoded = encode_uint(value, width, endianness)?;
        self.write_bytes(offset, &encoded)
    }

    fn get_u32(&self, offset: usize) -> Result<u32> {
        Ok(self.get_value(offset, 4, Endianness::Little)? as u32)
    }

    fn set_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.set_value(offset, 4, u64::from(value), Endianness::Little)
    }

    /// SHA-384 of the flattened fragment
    fn sha384(&self) -> Result<[u8; DIGEST_SIZE]> {
        Ok(sha384(&self.to_bytes()?))
    }
}

// ============================================
// Leaf
// ============================================

/// A contiguous byte region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
    name: &'static str,
    raw: Vec<u8>,
    max_size: Option<usize>,
    magics: Vec<MagicSlot>,
    crcs: Vec<usize>,
}

impl Leaf {
    /// Zero-filled leaf of `size` bytes
    pub fn new(name: &'static str, size: usize) -> Self {
        Self {
            name,
            raw: vec![0u8; size],
            max_size: None,
            magics: Vec::new(),
            crcs: Vec::new(),
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_magic(mut self, magic: MagicNumber, offset: usize) -> Self {
        self.magics.push(MagicSlot { magic, offset });
        self
    }

    /// Add a CRC slot at `offset` covering bytes `[0, offset)`
    pub fn with_crc(mut self, offset: usize) -> Self {
        self.crcs.push(offset);
        self
    }

    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    pub fn magics(&self) -> &[MagicSlot] {
        &self.magics
    }

    /// Reset to zeros of the current size and stamp magics and CRCs
    pub fn initialize(&mut self) -> Result<()> {
        self.raw.iter_mut().for_each(|b| *b = 0);
        self.update()
    }

    /// Replace the content
    pub fn load(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_max(bytes.len())?;
        self.raw = bytes.to_vec();
        Ok(())
    }

    /// Consume `size` bytes from the reader
    pub fn read(&mut self, reader: &mut Reader<'_>, size: usize) -> Result<()> {
        let bytes = reader.take(size)?;
        self.load(bytes)
    }

    /// Grow by appending bytes
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_max(self.raw.len() + bytes.len())?;
        self.raw.extend_from_slice(bytes);
        Ok(())
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn set_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.load(bytes)
    }

    /// CRC over `[0, offset)`
    pub fn calculate_crc(&self, offset: usize) -> Result<u32> {
        check_range(0, offset, self.raw.len())?;
        Ok(crc::generate(&self.raw[..offset]))
    }

    /// Copy a fixed-size array out of the leaf
    pub fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        check_range(offset, N, self.raw.len())?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.raw[offset..offset + N]);
        Ok(out)
    }

    fn check_max(&self, size: usize) -> Result<()> {
        match self.max_size {
            Some(max) if size > max => Err(StructuralError::SizeExceeded {
                fragment: self.name.to_string(),
                max,
                actual: size,
            }
            .into()),
            _ => Ok(()),
        }
    }
}

impl Layout for Leaf {
    fn name(&self) -> &str {
        self.name
    }

    fn size(&self) -> Result<usize> {
        Ok(self.raw.len())
    }

    fn validate(&self) -> Result<()> {
        self.check_max(self.raw.len())?;
        validate_magics(self, self.name, &self.magics)?;
        for &offset in &self.crcs {
            let stored = self.get_u32(offset)?;
            let computed = self.calculate_crc(offset)?;
            if stored != computed {
                return Err(StructuralError::CrcMismatch {
                    fragment: self.name.to_string(),
                    offset,
                    stored,
                    computed,
                }
                .into());
            }
        }
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        for slot in self.magics.clone() {
            self.set_u32(slot.offset, slot.magic.value())?;
        }
        // CRCs last so they cover the stamped magics
        for offset in self.crcs.clone() {
            let crc = self.calculate_crc(offset)?;
            self.set_u32(offset, crc)?;
        }
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.raw.clone())
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        check_range(offset, data.len(), self.raw.len())?;
        self.raw[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn get_value(&self, offset: usize, width: usize, endianness: Endianness) -> Result<u64> {
        if !(1..=8).contains(&width) {
            return Err(StructuralError::InvalidWidth(width).into());
        }
        check_range(offset, width, self.raw.len())?;
        Ok(decode_uint(&self.raw[offset..offset + width], endianness))
    }
}

fn validate_magics<L: Layout + ?Sized>(
    fragment: &L,
    name: &str,
    magics: &[MagicSlot],
) -> Result<()> {
    for slot in magics {
        let actual = fragment.get_u32(slot.offset)?;
        if actual != slot.magic.value() {
            return Err(StructuralError::MagicMismatch {
                fragment: name.to_string(),
                offset: slot.offset,
                expected: slot.magic.value(),
                actual,
            }
            .into());
        }
    }
    Ok(())
}

// ============================================
// Padding
// ============================================

/// Filler that absorbs the unused space of its owning collection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Padding {
    cap: Option<usize>,
    fill: u8,
}

impl Padding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never grow beyond `cap` bytes
    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = Some(cap);
        self
    }

    pub fn with_fill(mut self, fill: u8) -> Self {
        self.fill = fill;
        self
    }

    pub fn cap(&self) -> Option<usize> {
        self.cap
    }

    pub fn fill(&self) -> u8 {
        self.fill
    }

    /// Size inside `owner`, whose other children occupy `fixed` bytes
    fn size_in(&self, owner: &Collection, fixed: usize, guard: &mut SizeGuard) -> Result<usize> {
        let id = self as *const Padding as usize;
        if guard.active.contains(&id) {
            return Err(StructuralError::PaddingCycle(owner.name.to_string()).into());
        }
        guard.active.push(id);
        let budget = match owner.max_size {
            Some(max) => max,
            None => owner.size_guarded(guard)?,
        };
        guard.active.retain(|&a| a != id);

        let available = budget.checked_sub(fixed).ok_or_else(|| StructuralError::SizeExceeded {
            fragment: owner.name.to_string(),
            max: budget,
            actual: fixed,
        })?;
        Ok(self.cap.map_or(available, |cap| available.min(cap)))
    }

    fn check_fill(&self, offset: usize, data: &[u8]) -> Result<()> {
        match data.iter().position(|&b| b != self.fill) {
            Some(i) => Err(StructuralError::PaddingWrite {
                offset: offset + i,
                fill: self.fill,
                value: data[i],
            }
            .into()),
            None => Ok(()),
        }
    }
}

impl Layout for Padding {
    fn name(&self) -> &str {
        "padding"
    }

    fn size(&self) -> Result<usize> {
        self.cap
            .ok_or_else(|| StructuralError::UnboundedPadding("padding".to_string()).into())
    }

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(vec![self.fill; self.size()?])
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        check_range(offset, data.len(), self.size()?)?;
        self.check_fill(offset, data)
    }
}

/// Recursion state for size computation
#[derive(Debug, Default)]
struct SizeGuard {
    active: Vec<usize>,
    depth: usize,
}

// ============================================
// Collection
// ============================================

/// An ordered composite of owned fragments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    name: &'static str,
    children: Vec<Fragment>,
    max_size: Option<usize>,
    magics: Vec<MagicSlot>,
    crcs: Vec<usize>,
}

impl Collection {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            children: Vec::new(),
            max_size: None,
            magics: Vec::new(),
            crcs: Vec::new(),
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_magic(mut self, magic: MagicNumber, offset: usize) -> Self {
        self.magics.push(MagicSlot { magic, offset });
        self
    }

    /// Add a CRC slot at `offset` covering the flattened bytes `[0, offset)`
    pub fn with_crc(mut self, offset: usize) -> Self {
        self.crcs.push(offset);
        self
    }

    pub fn with_child(mut self, child: impl Into<Fragment>) -> Result<Self> {
        self.push(child)?;
        Ok(self)
    }

    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    /// Append a child; a second padding child is rejected
    pub fn push(&mut self, child: impl Into<Fragment>) -> Result<()> {
        let child = child.into();
        if child.is_padding() && self.has_padding() {
            return Err(StructuralError::DuplicatePadding(self.name.to_string()).into());
        }
        self.children.push(child);
        Ok(())
    }

    /// Insert a child before the padding, or at the end if there is none
    pub fn push_before_padding(&mut self, child: impl Into<Fragment>) -> Result<()> {
        let child = child.into();
        if child.is_padding() {
            return self.push(child);
        }
        match self.children.iter().position(Fragment::is_padding) {
            Some(i) => self.children.insert(i, child),
            None => self.children.push(child),
        }
        Ok(())
    }

    /// Replace child `index`, returning the old one
    pub fn replace(&mut self, index: usize, child: impl Into<Fragment>) -> Result<Fragment> {
        let child = child.into();
        let len = self.children.len();
        let padding_elsewhere = self
            .children
            .iter()
            .enumerate()
            .any(|(i, c)| i != index && c.is_padding());
        if child.is_padding() && padding_elsewhere {
            return Err(StructuralError::DuplicatePadding(self.name.to_string()).into());
        }
        let slot = self
            .children
            .get_mut(index)
            .ok_or_else(|| StructuralError::FragmentCount {
                fragment: self.name.to_string(),
                expected: index + 1,
                actual: len,
            })?;
        Ok(std::mem::replace(slot, child))
    }

    pub fn children(&self) -> &[Fragment] {
        &self.children
    }

    pub fn child(&self, index: usize) -> Option<&Fragment> {
        self.children.get(index)
    }

    pub fn child_mut(&mut self, index: usize) -> Option<&mut Fragment> {
        self.children.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn has_padding(&self) -> bool {
        self.children.iter().any(Fragment::is_padding)
    }

    /// Initialize every child, then stamp derived fields
    pub fn initialize(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.initialize()?;
        }
        self.update()
    }

    /// CRC over the flattened bytes `[0, offset)`
    pub fn calculate_crc(&self, offset: usize) -> Result<u32> {
        let bytes = self.to_bytes()?;
        check_range(0, offset, bytes.len())?;
        Ok(crc::generate(&bytes[..offset]))
    }

    /// `(offset, size)` of every child
    pub fn child_spans(&self) -> Result<Vec<(usize, usize)>> {
        let sizes = self.child_sizes(&mut SizeGuard::default())?;
        let mut offset = 0;
        Ok(sizes
            .into_iter()
            .map(|size| {
                let span = (offset, size);
                offset += size;
                span
            })
            .collect())
    }

    fn child_sizes(&self, guard: &mut SizeGuard) -> Result<Vec<usize>> {
        let mut sizes = Vec::with_capacity(self.children.len());
        let mut fixed = 0usize;
        let mut padding = None;
        for (i, child) in self.children.iter().enumerate() {
            match child {
                Fragment::Padding(p) => {
                    padding = Some((i, p));
                    sizes.push(0);
                }
                other => {
                    let size = other.size_guarded(guard)?;
                    fixed += size;
                    sizes.push(size);
                }
            }
        }
        if let Some((i, p)) = padding {
            sizes[i] = p.size_in(self, fixed, guard)?;
        }
        Ok(sizes)
    }

    fn size_guarded(&self, guard: &mut SizeGuard) -> Result<usize> {
        guard.depth += 1;
        if guard.depth > MAX_DEPTH {
            return Err(StructuralError::NestingTooDeep(self.name.to_string()).into());
        }
        let total: usize = self.child_sizes(guard)?.iter().sum();
        guard.depth -= 1;

        match self.max_size {
            Some(max) if total > max => Err(StructuralError::SizeExceeded {
                fragment: self.name.to_string(),
                max,
                actual: total,
            }
            .into()),
            _ => Ok(total),
        }
    }
}

impl Layout for Collection {
    fn name(&self) -> &str {
        self.name
    }

    fn size(&self) -> Result<usize> {
        self.size_guarded(&mut SizeGuard::default())
    }

    fn validate(&self) -> Result<()> {
        self.size()?;
        validate_magics(self, self.name, &self.magics)?;
        for child in &self.children {
            child.validate()?;
        }
        for &offset in &self.crcs {
            let stored = self.get_u32(offset)?;
            let computed = self.calculate_crc(offset)?;
            if stored != computed {
                return Err(StructuralError::CrcMismatch {
                    fragment: self.name.to_string(),
                    offset,
                    stored,
                    computed,
                }
                .into());
            }
        }
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.update()?;
        }
        for slot in self.magics.clone() {
            self.set_u32(slot.offset, slot.magic.value())?;
        }
        for offset in self.crcs.clone() {
            let crc = self.calculate_crc(offset)?;
            self.set_u32(offset, crc)?;
        }
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let sizes = self.child_sizes(&mut SizeGuard::default())?;
        let mut out = Vec::with_capacity(sizes.iter().sum());
        for (child, size) in self.children.iter().zip(sizes) {
            match child {
                Fragment::Padding(p) => out.resize(out.len() + size, p.fill),
                other => out.extend_from_slice(&other.to_bytes()?),
            }
        }
        Ok(out)
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let spans = self.child_spans()?;
        let total = spans.last().map_or(0, |(o, s)| o + s);
        check_range(offset, data.len(), total)?;

        let end = offset + data.len();
        for (child, (start, size)) in self.children.iter_mut().zip(spans) {
            let lo = offset.max(start);
            let hi = end.min(start + size);
            if lo >= hi {
                continue;
            }
            let part = &data[lo - offset..hi - offset];
            match child {
                Fragment::Padding(p) => p.check_fill(lo, part)?,
                other => other.write_bytes(lo - start, part)?,
            }
        }
        Ok(())
    }
}

// ============================================
// Fragment
// ============================================

/// Closed set of fragment kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Leaf(Leaf),
    Collection(Collection),
    Padding(Padding),
}

impl Fragment {
    pub fn is_padding(&self) -> bool {
        matches!(self, Fragment::Padding(_))
    }

    pub fn as_leaf(&self) -> Option<&Leaf> {
        match self {
            Fragment::Leaf(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            Fragment::Collection(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_collection_mut(&mut self) -> Option<&mut Collection> {
        match self {
            Fragment::Collection(c) => Some(c),
            _ => None,
        }
    }

    pub fn initialize(&mut self) -> Result<()> {
        match self {
            Fragment::Leaf(l) => l.initialize(),
            Fragment::Collection(c) => c.initialize(),
            Fragment::Padding(_) => Ok(()),
        }
    }

    fn size_guarded(&self, guard: &mut SizeGuard) -> Result<usize> {
        match self {
            Fragment::Leaf(l) => l.size(),
            Fragment::Collection(c) => c.size_guarded(guard),
            Fragment::Padding(p) => p.size(),
        }
    }

    fn inner(&self) -> &dyn Layout {
        match self {
            Fragment::Leaf(l) => l,
            Fragment::Collection(c) => c,
            Fragment::Padding(p) => p,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Layout {
        match self {
            Fragment::Leaf(l) => l,
            Fragment::Collection(c) => c,
            Fragment::Padding(p) => p,
        }
    }
}

impl Layout for Fragment {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn size(&self) -> Result<usize> {
        self.size_guarded(&mut SizeGuard::default())
    }

    fn validate(&self) -> Result<()> {
        self.inner().validate()
    }

    fn update(&mut self) -> Result<()> {
        self.inner_mut().update()
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        self.inner().to_bytes()
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.inner_mut().write_bytes(offset, data)
    }

    fn get_value(&self, offset: usize, width: usize, endianness: Endianness) -> Result<u64> {
        self.inner().get_value(offset, width, endianness)
    }
}

impl From<Leaf> for Fragment {
    fn from(l: Leaf) -> Self {
        Fragment::Leaf(l)
    }
}

impl From<Collection> for Fragment {
    fn from(c: Collection) -> Self {
        Fragment::Collection(c)
    }
}

impl From<Padding> for Fragment {
    fn from(p: Padding) -> Self {
        Fragment::Padding(p)
    }
}

// ============================================
// Reader
// ============================================

/// Forward-only cursor over an input buffer
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Little-endian u32 at `offset` past the cursor, without consuming
    pub fn peek_u32(&self, offset: usize) -> Result<u32> {
        let start = self.pos + offset;
        if start + 4 > self.bytes.len() {
            return Err(StructuralError::Truncated {
                needed: offset + 4,
                available: self.remaining(),
            }
            .into());
        }
        Ok(decode_uint(&self.bytes[start..start + 4], Endianness::Little) as u32)
    }

    /// Consume `n` bytes
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(StructuralError::Truncated {
                needed: n,
                available: self.remaining(),
            }
            .into());
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Fail if any input is left
    pub fn finish(self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(StructuralError::TrailingBytes(n).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn structural(e: Error) -> StructuralError {
        match e {
            Error::Structural(s) => s,
            other => panic!("expected structural error, got {other}"),
        }
    }

    #[test]
    fn test_padding_fills_to_max_size() {
        let c = Collection::new("outer")
            .with_max_size(1000)
            .with_child(Leaf::new("a", 99))
            .unwrap()
            .with_child(Leaf::new("b", 101))
            .unwrap()
            .with_child(Padding::new())
            .unwrap();
        assert_eq!(c.size().unwrap(), 1000);
        assert_eq!(c.to_bytes().unwrap().len(), 1000);
        assert_eq!(c.child_spans().unwrap()[2], (200, 800));
    }

    #[test]
    fn test_padding_respects_cap() {
        let c = Collection::new("outer")
            .with_max_size(1000)
            .with_child(Leaf::new("a", 456))
            .unwrap()
            .with_child(Padding::new().with_cap(128))
            .unwrap();
        assert_eq!(c.size().unwrap(), 584);
    }

    #[test]
    fn test_second_padding_rejected() {
        let mut c = Collection::new("outer").with_max_size(64);
        c.push(Padding::new()).unwrap();
        let err = structural(c.push(Padding::new()).unwrap_err());
        assert!(matches!(err, StructuralError::DuplicatePadding(_)));
    }

    #[test]
    fn test_padding_without_budget_is_cycle() {
        let c = Collection::new("unbounded")
            .with_child(Leaf::new("a", 8))
            .unwrap()
            .with_child(Padding::new())
            .unwrap();
        let err = structural(c.size().unwrap_err());
        assert_eq!(err, StructuralError::PaddingCycle("unbounded".into()));
    }

    #[test]
    fn test_root_padding_needs_cap() {
        assert!(Padding::new().size().is_err());
        assert_eq!(Padding::new().with_cap(16).size().unwrap(), 16);
    }

    #[test]
    fn test_overfull_collection() {
        let c = Collection::new("small")
            .with_max_size(10)
            .with_child(Leaf::new("a", 12))
            .unwrap();
        assert!(matches!(
            structural(c.size().unwrap_err()),
            StructuralError::SizeExceeded { max: 10, actual: 12, .. }
        ));
    }

    #[test]
    fn test_get_set_value_endianness() {
        let mut leaf = Leaf::new("leaf", 8);
        leaf.set_value(0, 4, 0x1122_3344, Endianness::Little).unwrap();
        assert_eq!(&leaf.raw()[..4], &[0x44, 0x33, 0x22, 0x11]);
        leaf.set_value(4, 2, 0xAABB, Endianness::Big).unwrap();
        assert_eq!(&leaf.raw()[4..6], &[0xAA, 0xBB]);
        assert_eq!(leaf.get_value(4, 2, Endianness::Big).unwrap(), 0xAABB);
        assert_eq!(leaf.get_u32(0).unwrap(), 0x1122_3344);
    }

    #[test]
    fn test_value_bounds() {
        let mut leaf = Leaf::new("leaf", 4);
        assert!(matches!(
            structural(leaf.get_value(2, 4, Endianness::Little).unwrap_err()),
            StructuralError::OutOfBounds { .. }
        ));
        assert!(matches!(
            structural(leaf.get_value(0, 9, Endianness::Little).unwrap_err()),
            StructuralError::InvalidWidth(9)
        ));
        assert!(matches!(
            structural(leaf.set_value(0, 1, 0x100, Endianness::Little).unwrap_err()),
            StructuralError::ValueOverflow { .. }
        ));
    }

    #[test]
    fn test_writes_span_children_and_guard_padding() {
        let mut c = Collection::new("outer")
            .with_max_size(16)
            .with_child(Leaf::new("a", 2))
            .unwrap()
            .with_child(Leaf::new("b", 2))
            .unwrap()
            .with_child(Padding::new().with_fill(0xFF))
            .unwrap();

        c.set_u32(0, 0x0403_0201).unwrap();
        let bytes = c.to_bytes().unwrap();
        assert_eq!(&bytes[..4], &[1, 2, 3, 4]);
        assert!(bytes[4..].iter().all(|&b| b == 0xFF));

        c.write_bytes(4, &[0xFF, 0xFF]).unwrap();
        let err = structural(c.write_bytes(5, &[0x00]).unwrap_err());
        assert_eq!(
            err,
            StructuralError::PaddingWrite {
                offset: 5,
                fill: 0xFF,
                value: 0
            }
        );
    }

    #[test]
    fn test_magic_and_crc_slots() {
        let mut leaf = Leaf::new("tagged", 16)
            .with_magic(MagicNumber::Signature, 0)
            .with_crc(12);
        leaf.initialize().unwrap();
        leaf.validate().unwrap();
        assert_eq!(leaf.get_u32(0).unwrap(), MagicNumber::Signature.value());

        leaf.write_bytes(4, &[1]).unwrap();
        assert!(matches!(
            structural(leaf.validate().unwrap_err()),
            StructuralError::CrcMismatch { offset: 12, .. }
        ));
        leaf.update().unwrap();
        leaf.validate().unwrap();

        leaf.set_u32(0, 0).unwrap();
        assert!(matches!(
            structural(leaf.validate().unwrap_err()),
            StructuralError::MagicMismatch { offset: 0, actual: 0, .. }
        ));
    }

    #[test]
    fn test_update_is_idempotent() {
        let mut c = Collection::new("outer")
            .with_max_size(64)
            .with_magic(MagicNumber::SignatureDescriptor, 4)
            .with_crc(60)
            .with_child(Leaf::new("a", 8))
            .unwrap()
            .with_child(Padding::new())
            .unwrap()
            .with_child(Leaf::new("trailer", 8))
            .unwrap();
        assert_eq!(c.child_spans().unwrap()[2], (56, 8));
        c.update().unwrap();
        let once = c.to_bytes().unwrap();
        c.update().unwrap();
        assert_eq!(c.to_bytes().unwrap(), once);
        c.validate().unwrap();
    }

    #[test]
    fn test_leaf_growth_limits() {
        let mut leaf = Leaf::new("grow", 0).with_max_size(4);
        leaf.append(&[1, 2, 3]).unwrap();
        assert!(leaf.append(&[4, 5]).is_err());
        assert_eq!(leaf.size().unwrap(), 3);
        assert!(leaf.load(&[0; 5]).is_err());
    }

    #[test]
    fn test_reader() {
        let data = [1u8, 0, 0, 0, 2, 0, 0, 0, 9];
        let mut r = Reader::new(&data);
        assert_eq!(r.peek_u32(4).unwrap(), 2);
        assert_eq!(r.take(4).unwrap(), &[1, 0, 0, 0]);
        assert!(r.take(6).is_err());
        r.take(4).unwrap();
        assert!(matches!(
            structural(r.finish().unwrap_err()),
            StructuralError::TrailingBytes(1)
        ));
    }
}
