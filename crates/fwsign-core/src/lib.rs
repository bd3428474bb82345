//! fwsign Core - Container format, signature chains, and P-384 primitives
//!
//! This crate provides the binary layout engine and trust model for the
//! fwsign firmware code-signing toolchain. It performs no I/O beyond the
//! byte buffers handed to it and does not log.

pub mod cert;
pub mod chain;
pub mod crc;
pub mod descriptor;
pub mod dump;
pub mod ecdsa;
pub mod entry;
pub mod error;
pub mod factory;
pub mod fragment;
pub mod hash;
pub mod key;
pub mod magic;
pub mod module;
pub mod signature;

#[cfg(test)]
mod testutil;

pub use cert::EngineeringCert;
pub use chain::{SignatureChain, TrustPolicy};
pub use descriptor::{SignatureDescriptor, DESCRIPTOR_SIZE};
pub use ecdsa::{PrivateKey, RawSignature};
pub use entry::{EntryKind, SignatureChainEntry};
pub use error::{CryptoError, Error, Result, StructuralError};
pub use factory::Artifact;
pub use fragment::{Collection, Endianness, Fragment, Layout, Leaf, Padding, Reader};
pub use hash::{sha384, DIGEST_SIZE};
pub use key::{KeyKind, PublicKey, ALL_PERMISSIONS, ROOT_CANCEL_ID};
pub use magic::MagicNumber;
pub use module::{CodeSignModule, ModulePayload};
pub use signature::Signature;
