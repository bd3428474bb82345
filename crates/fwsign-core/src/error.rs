//! Error types for fwsign-core
//!
//! Errors are split by the kind of invariant they report: a broken layout
//! (`StructuralError`) or a failed trust decision (`CryptoError`).

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for container parsing and chain validation
#[derive(Debug, Error)]
pub enum Error {
    /// Layout, size, magic, or CRC violation
    #[error("Structural error: {0}")]
    Structural(#[from] StructuralError),

    /// Signature, key, or trust policy violation
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True if this error came from the layout layer
    pub fn is_structural(&self) -> bool {
        matches!(self, Error::Structural(_))
    }

    /// True if this error came from signature or trust checks
    pub fn is_crypto(&self) -> bool {
        matches!(self, Error::Crypto(_))
    }
}

/// Violations of the binary layout
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    /// Magic number at a fixed offset does not match
    #[error("{fragment}: magic mismatch at offset {offset:#06x}: expected {expected:#010x}, found {actual:#010x}")]
    MagicMismatch {
        fragment: String,
        offset: usize,
        expected: u32,
        actual: u32,
    },

    /// A fixed-size fragment has the wrong size
    #[error("{fragment}: size mismatch: expected {expected} bytes, found {actual}")]
    SizeMismatch {
        fragment: String,
        expected: usize,
        actual: usize,
    },

    /// A fragment grew past its maximum size
    #[error("{fragment}: size {actual} exceeds maximum {max}")]
    SizeExceeded {
        fragment: String,
        max: usize,
        actual: usize,
    },

    /// A stored length field disagrees with the actual content
    #[error("{fragment}: length field {field} holds {stored}, content is {actual} bytes")]
    LengthField {
        fragment: String,
        field: &'static str,
        stored: u64,
        actual: u64,
    },

    /// Composite has the wrong number of children
    #[error("{fragment}: expected {expected} children, found {actual}")]
    FragmentCount {
        fragment: String,
        expected: usize,
        actual: usize,
    },

    /// A collection may hold at most one padding child
    #[error("{0}: collection already holds a padding fragment")]
    DuplicatePadding(String),

    /// Padding size depends on itself
    #[error("{0}: padding size computation is cyclic")]
    PaddingCycle(String),

    /// Padding outside any collection needs an explicit cap
    #[error("{0}: padding has neither an owner nor a cap")]
    UnboundedPadding(String),

    /// Fragment nesting exceeded the recursion limit
    #[error("{0}: fragment nesting too deep")]
    NestingTooDeep(String),

    /// Non-fill byte written into a padding region
    #[error("padding at offset {offset:#06x} only accepts fill byte {fill:#04x}, got {value:#04x}")]
    PaddingWrite { offset: usize, fill: u8, value: u8 },

    /// Access outside the fragment
    #[error("access of {width} bytes at offset {offset:#06x} is outside a {size}-byte fragment")]
    OutOfBounds {
        offset: usize,
        width: usize,
        size: usize,
    },

    /// Integer width must be 1..=8 bytes
    #[error("invalid integer width {0}, expected 1..=8 bytes")]
    InvalidWidth(usize),

    /// Value does not fit in the requested width
    #[error("value {value:#x} does not fit in {width} bytes")]
    ValueOverflow { value: u64, width: usize },

    /// Leading magic is not a known container type
    #[error("unknown magic {0:#010x}")]
    UnknownMagic(u32),

    /// Input ended before the fragment was complete
    #[error("truncated input: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// Stored CRC does not match the computed CRC
    #[error("{fragment}: CRC mismatch at offset {offset:#06x}: stored {stored:#010x}, computed {computed:#010x}")]
    CrcMismatch {
        fragment: String,
        offset: usize,
        stored: u32,
        computed: u32,
    },

    /// Block0 payload indistinguishable from a public key payload
    #[error("{0}: block0 payload would be read back as a public key")]
    AmbiguousPayload(String),

    /// Entry type not allowed at this position of a chain
    #[error("entry {index}: {kind} is not allowed here")]
    UnexpectedEntry { index: usize, kind: &'static str },

    /// Nothing may follow a block0 entry
    #[error("chain is terminated by a block0 entry")]
    ChainTerminated,

    /// Chain has no root entry
    #[error("signature chain is empty")]
    EmptyChain,

    /// Descriptor holds at most three chains
    #[error("chain index {index} out of range, descriptor holds {max} chains")]
    ChainIndex { index: usize, max: usize },

    /// Bytes left after a complete artifact
    #[error("{0} trailing bytes after artifact")]
    TrailingBytes(usize),
}

/// Violations of signature and trust rules
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Only SHA-384 signatures are accepted
    #[error("unsupported hash type {actual:#010x}, expected SHA-384 ({expected:#010x})")]
    UnsupportedHash { expected: u32, actual: u32 },

    /// Only secp384r1 keys are accepted
    #[error("unsupported curve {actual:#010x}, expected secp384r1 ({expected:#010x})")]
    UnsupportedCurve { expected: u32, actual: u32 },

    /// Scalar or coordinate length is not 48 bytes
    #[error("{field} length is {actual}, expected 48")]
    InvalidLength { field: &'static str, actual: u32 },

    /// Public key point is not on P-384
    #[error("public key is not on the curve")]
    PointNotOnCurve,

    /// Value has no inverse modulo the given modulus
    #[error("value is not invertible")]
    NotInvertible,

    /// Private key scalar outside [1, n-1]
    #[error("private key scalar out of range")]
    InvalidPrivateKey,

    /// Nonce outside [1, n-1] or yielding r = 0 or s = 0
    #[error("nonce produced a degenerate signature")]
    DegenerateNonce,

    /// Signature never filled in
    #[error("entry {entry}: signature is blank")]
    Unsigned { entry: usize },

    /// ECDSA verification failed
    #[error("entry {entry}: signature verification failed")]
    VerificationFailed { entry: usize },

    /// Key was cancelled by the trust policy
    #[error("entry {entry}: cancellation id {cancel_id} is revoked")]
    CancelledKey { entry: usize, cancel_id: u32 },

    /// Cancellation ids must not decrease down the chain
    #[error("entry {entry}: cancellation id {cancel_id} is lower than parent's {parent}")]
    CancelIdDecreased {
        entry: usize,
        cancel_id: u32,
        parent: u32,
    },

    /// A key may not hold permissions its parent lacks
    #[error("entry {entry}: permission {permission:#010x} escalates parent's {parent:#010x}")]
    PermissionEscalation {
        entry: usize,
        permission: u32,
        parent: u32,
    },

    /// Leaf key lacks permissions the policy requires
    #[error("leaf permission {permission:#010x} lacks required bits {required:#010x}")]
    MissingPermission { permission: u32, required: u32 },

    /// A block0 entry was verified without the block0 digest
    #[error("chain ends in a block0 entry but no block0 digest was supplied")]
    MissingBlock0Digest,

    /// Root header hash word does not match its key
    #[error("root entry key hash word {stored:#010x} does not match key ({computed:#010x})")]
    RootHashMismatch { stored: u32, computed: u32 },

    /// Engineering cert header hash does not match its descriptor
    #[error("certificate header hash does not match descriptor block0 hash")]
    CertHashMismatch,
}
