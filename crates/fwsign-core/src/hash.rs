//! SHA-384 helpers

use sha2::{Digest, Sha384};

/// SHA-384 digest length
pub const DIGEST_SIZE: usize = 48;

/// Hash data using SHA-384
pub fn sha384(data: &[u8]) -> [u8; DIGEST_SIZE] {
    sha384_multi(&[data])
}

/// Hash multiple pieces of data using SHA-384
pub fn sha384_multi(data: &[&[u8]]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Sha384::new();
    for d in data {
        hasher.update(d);
    }
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&hasher.finalize());
    out
}
