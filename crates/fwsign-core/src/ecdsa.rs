//! ECDSA over NIST P-384
//!
//! Affine-coordinate arithmetic on arbitrary-precision integers. Only the
//! operations a code-signing authority and verifier need are provided:
//! point addition, scalar multiplication, signing, and verification.

use std::sync::OnceLock;

use num_bigint::{BigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Size of a P-384 scalar or field element in bytes
pub const SCALAR_SIZE: usize = 48;

const P: [u8; 48] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe, 0xff, 0xff, 0xff, 0xff,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff,
];
const B: [u8; 48] = [
    0xb3, 0x31, 0x2f, 0xa7, 0xe2, 0x3e, 0xe7, 0xe4, 0x98, 0x8e, 0x05, 0x6b,
    0xe3, 0xf8, 0x2d, 0x19, 0x18, 0x1d, 0x9c, 0x6e, 0xfe, 0x81, 0x41, 0x12,
    0x03, 0x14, 0x08, 0x8f, 0x50, 0x13, 0x87, 0x5a, 0xc6, 0x56, 0x39, 0x8d,
    0x8a, 0x2e, 0xd1, 0x9d, 0x2a, 0x85, 0xc8, 0xed, 0xd3, 0xec, 0x2a, 0xef,
];
const GX: [u8; 48] = [
    0xaa, 0x87, 0xca, 0x22, 0xbe, 0x8b, 0x05, 0x37, 0x8e, 0xb1, 0xc7, 0x1e,
    0xf3, 0x20, 0xad, 0x74, 0x6e, 0x1d, 0x3b, 0x62, 0x8b, 0xa7, 0x9b, 0x98,
    0x59, 0xf7, 0x41, 0xe0, 0x82, 0x54, 0x2a, 0x38, 0x55, 0x02, 0xf2, 0x5d,
    0xbf, 0x55, 0x29, 0x6c, 0x3a, 0x54, 0x5e, 0x38, 0x72, 0x76, 0x0a, 0xb7,
];
const GY: [u8; 48] = [
    0x36, 0x17, 0xde, 0x4a, 0x96, 0x26, 0x2c, 0x6f, 0x5d, 0x9e, 0x98, 0xbf,
    0x92, 0x92, 0xdc, 0x29, 0xf8, 0xf4, 0x1d, 0xbd, 0x28, 0x9a, 0x14, 0x7c,
    0xe9, 0xda, 0x31, 0x13, 0xb5, 0xf0, 0xb8, 0xc0, 0x0a, 0x60, 0xb1, 0xce,
    0x1d, 0x7e, 0x81, 0x9d, 0x7a, 0x43, 0x1d, 0x7c, 0x90, 0xea, 0x0e, 0x5f,
];
const N: [u8; 48] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xc7, 0x63, 0x4d, 0x81, 0xf4, 0x37, 0x2d, 0xdf, 0x58, 0x1a, 0x0d, 0xb2,
    0x48, 0xb0, 0xa7, 0x7a, 0xec, 0xec, 0x19, 0x6a, 0xcc, 0xc5, 0x29, 0x73,
];

static P384: OnceLock<Curve> = OnceLock::new();

/// A point on a short Weierstrass curve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Point {
    /// The identity element
    Infinity,
    /// A finite point
    Affine { x: BigInt, y: BigInt },
}

impl Point {
    /// Build a point from 48-byte big-endian coordinates
    pub fn from_coordinates(x: &[u8; SCALAR_SIZE], y: &[u8; SCALAR_SIZE]) -> Self {
        Point::Affine {
            x: int_from_bytes(x),
            y: int_from_bytes(y),
        }
    }

    /// Big-endian coordinates, or `None` for the identity
    pub fn coordinates(&self) -> Option<([u8; SCALAR_SIZE], [u8; SCALAR_SIZE])> {
        match self {
            Point::Infinity => None,
            Point::Affine { x, y } => Some((int_to_bytes(x), int_to_bytes(y))),
        }
    }

    pub fn is_infinity(&self) -> bool {
        matches!(self, Point::Infinity)
    }
}

/// An ECDSA signature as two 48-byte big-endian scalars
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSignature {
    pub r: [u8; SCALAR_SIZE],
    pub s: [u8; SCALAR_SIZE],
}

/// Curve parameters `y^2 = x^3 + ax + b (mod p)` with base point `g` of order `n`
#[derive(Debug, Clone)]
pub struct Curve {
    pub p: BigInt,
    pub a: BigInt,
    pub b: BigInt,
    pub n: BigInt,
    pub g: Point,
}

impl Curve {
    /// NIST P-384 (secp384r1)
    pub fn p384() -> &'static Curve {
        P384.get_or_init(|| {
            let p = int_from_bytes(&P);
            Curve {
                a: &p - 3u32,
                b: int_from_bytes(&B),
                n: int_from_bytes(&N),
                g: Point::from_coordinates(&GX, &GY),
                p,
            }
        })
    }

    /// Check that a point satisfies the curve equation
    pub fn is_on_curve(&self, point: &Point) -> bool {
        match point {
            Point::Infinity => true,
            Point::Affine { x, y } => {
                if x.sign() == Sign::Minus || y.sign() == Sign::Minus || x >= &self.p || y >= &self.p
                {
                    return false;
                }
                let lhs = (y * y).mod_floor(&self.p);
                let rhs = (x * x * x + &self.a * x + &self.b).mod_floor(&self.p);
                lhs == rhs
            }
        }
    }

    /// `-P`
    pub fn negate(&self, point: &Point) -> Point {
        match point {
            Point::Infinity => Point::Infinity,
            Point::Affine { x, y } => Point::Affine {
                x: x.clone(),
                y: (-y).mod_floor(&self.p),
            },
        }
    }

    /// `P + Q`, covering the identity and doubling cases
    pub fn add(&self, lhs: &Point, rhs: &Point) -> Result<Point, CryptoError> {
        let (x1, y1, x2, y2) = match (lhs, rhs) {
            (Point::Infinity, q) => return Ok(q.clone()),
            (q, Point::Infinity) => return Ok(q.clone()),
            (Point::Affine { x: x1, y: y1 }, Point::Affine { x: x2, y: y2 }) => (x1, y1, x2, y2),
        };
        let p = &self.p;

        let lambda = if (x1 - x2).mod_floor(p).is_zero() {
            if (y1 + y2).mod_floor(p).is_zero() {
                return Ok(Point::Infinity);
            }
            let num = BigInt::from(3u32) * x1 * x1 + &self.a;
            let den = inverse_mod(&(BigInt::from(2u32) * y1), p)?;
            (num * den).mod_floor(p)
        } else {
            let den = inverse_mod(&(x2 - x1), p)?;
            ((y2 - y1) * den).mod_floor(p)
        };

        let x3 = (&lambda * &lambda - x1 - x2).mod_floor(p);
        let y3 = (&lambda * (x1 - &x3) - y1).mod_floor(p);
        Ok(Point::Affine { x: x3, y: y3 })
    }

    /// `k * P` by double-and-add, most significant bit first
    pub fn scalar_mult(&self, k: &BigInt, point: &Point) -> Result<Point, CryptoError> {
        if k.sign() == Sign::Minus {
            return self.scalar_mult(&-k, &self.negate(point));
        }
        let k = k.magnitude();
        let mut result = Point::Infinity;
        for i in (0..k.bits()).rev() {
            result = self.add(&result, &result)?;
            if k.bit(i) {
                result = self.add(&result, point)?;
            }
        }
        Ok(result)
    }

    /// Leftmost `bitlen(n)` bits of the digest as an integer
    fn digest_to_int(&self, digest: &[u8]) -> BigInt {
        let order_bytes = ((self.n.bits() + 7) / 8) as usize;
        let take = digest.len().min(order_bytes);
        let mut e = BigInt::from_bytes_be(Sign::Plus, &digest[..take]);
        let excess = (take as u64 * 8).saturating_sub(self.n.bits());
        if excess > 0 {
            e >>= excess as usize;
        }
        e
    }

    fn in_scalar_range(&self, v: &BigInt) -> bool {
        v.sign() == Sign::Plus && v < &self.n
    }

    /// Verify `(r, s)` over `digest` under the public key
    pub fn verify(&self, public_key: &Point, digest: &[u8], signature: &RawSignature) -> bool {
        if public_key.is_infinity() || !self.is_on_curve(public_key) {
            return false;
        }
        let r = int_from_bytes(&signature.r);
        let s = int_from_bytes(&signature.s);
        if !self.in_scalar_range(&r) || !self.in_scalar_range(&s) {
            return false;
        }

        let e = self.digest_to_int(digest);
        let w = match inverse_mod(&s, &self.n) {
            Ok(w) => w,
            Err(_) => return false,
        };
        let u1 = (&e * &w).mod_floor(&self.n);
        let u2 = (&r * &w).mod_floor(&self.n);

        let sum = self.scalar_mult(&u1, &self.g).and_then(|a| {
            let b = self.scalar_mult(&u2, public_key)?;
            self.add(&a, &b)
        });
        match sum {
            Ok(Point::Affine { x, .. }) => x.mod_floor(&self.n) == r,
            _ => false,
        }
    }

    /// Sign `digest` with private scalar `d` and nonce `k`
    pub fn sign_with_nonce(
        &self,
        d: &BigInt,
        digest: &[u8],
        k: &BigInt,
    ) -> Result<RawSignature, CryptoError> {
        if !self.in_scalar_range(d) {
            return Err(CryptoError::InvalidPrivateKey);
        }
        if !self.in_scalar_range(k) {
            return Err(CryptoError::DegenerateNonce);
        }

        let r = match self.scalar_mult(k, &self.g)? {
            Point::Affine { x, .. } => x.mod_floor(&self.n),
            Point::Infinity => return Err(CryptoError::DegenerateNonce),
        };
        if r.is_zero() {
            return Err(CryptoError::DegenerateNonce);
        }

        let e = self.digest_to_int(digest);
        let s = (inverse_mod(k, &self.n)? * (e + &r * d)).mod_floor(&self.n);
        if s.is_zero() {
            return Err(CryptoError::DegenerateNonce);
        }

        Ok(RawSignature {
            r: int_to_bytes(&r),
            s: int_to_bytes(&s),
        })
    }

    /// Random scalar in `[1, n-1]`
    pub fn random_scalar(&self) -> BigInt {
        let mut rng = rand::thread_rng();
        loop {
            let mut bytes = [0u8; SCALAR_SIZE];
            rng.fill_bytes(&mut bytes);
            let k = BigInt::from_bytes_be(Sign::Plus, &bytes);
            bytes.zeroize();
            if !k.is_zero() && k < self.n {
                return k;
            }
        }
    }
}

/// Modular inverse by the extended Euclidean algorithm
pub fn inverse_mod(a: &BigInt, m: &BigInt) -> Result<BigInt, CryptoError> {
    let a = a.mod_floor(m);
    if a.is_zero() {
        return Err(CryptoError::NotInvertible);
    }

    let (mut old_r, mut r) = (a, m.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());
    while !r.is_zero() {
        let q = old_r.div_floor(&r);
        let next_r = &old_r - &q * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_s = &old_s - &q * &s;
        old_s = std::mem::replace(&mut s, next_s);
    }

    if !old_r.is_one() {
        return Err(CryptoError::NotInvertible);
    }
    Ok(old_s.mod_floor(m))
}

/// Interpret big-endian bytes as a non-negative integer
pub fn int_from_bytes(bytes: &[u8]) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, bytes)
}

/// Encode a non-negative integer below 2^384 as 48 big-endian bytes
pub fn int_to_bytes(v: &BigInt) -> [u8; SCALAR_SIZE] {
    let (_, raw) = v.to_bytes_be();
    let mut out = [0u8; SCALAR_SIZE];
    let skip = raw.len().saturating_sub(SCALAR_SIZE);
    let raw = &raw[skip..];
    out[SCALAR_SIZE - raw.len()..].copy_from_slice(raw);
    out
}

/// P-384 private key
///
/// The scalar is wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    scalar: [u8; SCALAR_SIZE],
}

impl PrivateKey {
    /// Wrap a 48-byte big-endian scalar, which must lie in `[1, n-1]`
    pub fn from_bytes(scalar: [u8; SCALAR_SIZE]) -> Result<Self, CryptoError> {
        let curve = Curve::p384();
        if !curve.in_scalar_range(&int_from_bytes(&scalar)) {
            return Err(CryptoError::InvalidPrivateKey);
        }
        Ok(Self { scalar })
    }

    /// Generate a fresh random key
    pub fn generate() -> Self {
        let curve = Curve::p384();
        Self {
            scalar: int_to_bytes(&curve.random_scalar()),
        }
    }

    /// `Q = d * G`
    pub fn public_point(&self) -> Result<Point, CryptoError> {
        let curve = Curve::p384();
        curve.scalar_mult(&int_from_bytes(&self.scalar), &curve.g)
    }

    /// Sign with a random nonce
    pub fn sign(&self, digest: &[u8]) -> Result<RawSignature, CryptoError> {
        let curve = Curve::p384();
        let d = int_from_bytes(&self.scalar);
        loop {
            let k = curve.random_scalar();
            match curve.sign_with_nonce(&d, digest, &k) {
                Err(CryptoError::DegenerateNonce) => continue,
                other => return other,
            }
        }
    }

    /// Sign with a caller-chosen nonce
    pub fn sign_with_nonce(
        &self,
        digest: &[u8],
        nonce: &[u8; SCALAR_SIZE],
    ) -> Result<RawSignature, CryptoError> {
        let curve = Curve::p384();
        curve.sign_with_nonce(&int_from_bytes(&self.scalar), digest, &int_from_bytes(nonce))
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha384};

    fn hex48(s: &str) -> [u8; 48] {
        let mut out = [0u8; 48];
        out.copy_from_slice(&hex::decode(s).unwrap());
        out
    }

    fn test_key() -> PrivateKey {
        let mut d = [0u8; 48];
        for chunk in d.chunks_mut(8) {
            chunk.copy_from_slice(&[0x12, 0x34, 0x56, 0x78, 0x90, 0xab, 0xcd, 0xef]);
        }
        PrivateKey::from_bytes(d).unwrap()
    }

    #[test]
    fn test_generator_on_curve() {
        let curve = Curve::p384();
        assert!(curve.is_on_curve(&curve.g));
        assert!(curve.is_on_curve(&Point::Infinity));
    }

    #[test]
    fn test_doubling_matches_known_point() {
        let curve = Curve::p384();
        let two_g = curve.add(&curve.g, &curve.g).unwrap();
        let expected = Point::from_coordinates(
            &hex48("08d999057ba3d2d969260045c55b97f089025959a6f434d651d207d19fb96e9e4fe0e86ebe0e64f85b96a9c75295df61"),
            &hex48("8e80f1fa5b1b3cedb7bfe8dffd6dba74b275d875bc6cc43e904e505f256ab4255ffd43e94d39e22d61501e700a940e80"),
        );
        assert_eq!(two_g, expected);
        assert_eq!(curve.scalar_mult(&BigInt::from(2u32), &curve.g).unwrap(), expected);
    }

    #[test]
    fn test_order_times_generator_is_identity() {
        let curve = Curve::p384();
        assert_eq!(curve.scalar_mult(&curve.n, &curve.g).unwrap(), Point::Infinity);
    }

    #[test]
    fn test_point_plus_negation_is_identity() {
        let curve = Curve::p384();
        let neg = curve.negate(&curve.g);
        assert!(curve.is_on_curve(&neg));
        assert_eq!(curve.add(&curve.g, &neg).unwrap(), Point::Infinity);
        assert_eq!(
            curve.scalar_mult(&BigInt::from(-1), &curve.g).unwrap(),
            neg
        );
    }

    #[test]
    fn test_inverse_mod() {
        let m = BigInt::from(97u32);
        let inv = inverse_mod(&BigInt::from(13u32), &m).unwrap();
        assert_eq!((inv * 13u32).mod_floor(&m), BigInt::one());
        assert_eq!(
            inverse_mod(&BigInt::from(0u32), &m),
            Err(CryptoError::NotInvertible)
        );
        assert_eq!(
            inverse_mod(&BigInt::from(6u32), &BigInt::from(9u32)),
            Err(CryptoError::NotInvertible)
        );
    }

    #[test]
    fn test_public_key_vector() {
        let q = test_key().public_point().unwrap();
        let (x, y) = q.coordinates().unwrap();
        assert_eq!(
            hex::encode(x),
            "a14aad95673d51513a385309151ee57b66f8ef6d80a03ae54b268767b28cb37f72f272aa5fb5d11d7395157d985b5f33"
        );
        assert_eq!(
            hex::encode(y),
            "229d4134d1a63d2a1afa184a2d09e52b2d71527e66fb1427c13e6b1cb1978d474a7b7b735d792cdaa0996332db968ab4"
        );
    }

    #[test]
    fn test_fixed_nonce_signature_vector() {
        let key = test_key();
        let digest = Sha384::digest(b"firmware block0");
        let sig = key.sign_with_nonce(&digest, &[0xA5; 48]).unwrap();
        assert_eq!(
            hex::encode(sig.r),
            "a040f478574972a38d2a9784e3523c1de2e564ed37c344f9571dbe7267f353a686af60f2745ca95729fb9018562f8219"
        );
        assert_eq!(
            hex::encode(sig.s),
            "58b647172f774eb1e3deeb197af526ff2b6051c7352f9edc62322a9fb19c32fea8ce2c95e717146d918dcb3048555a9f"
        );

        let q = key.public_point().unwrap();
        assert!(Curve::p384().verify(&q, &digest, &sig));
    }

    #[test]
    fn test_random_sign_verify_and_tamper() {
        let curve = Curve::p384();
        let key = PrivateKey::generate();
        let q = key.public_point().unwrap();
        let digest = Sha384::digest(b"payload");

        let sig = key.sign(&digest).unwrap();
        assert!(curve.verify(&q, &digest, &sig));

        let other = Sha384::digest(b"payload!");
        assert!(!curve.verify(&q, &other, &sig));

        let mut bad = sig;
        bad.s[47] ^= 1;
        assert!(!curve.verify(&q, &digest, &bad));
    }

    #[test]
    fn test_rejects_out_of_range_scalars() {
        let curve = Curve::p384();
        let q = test_key().public_point().unwrap();
        let zero = RawSignature {
            r: [0; 48],
            s: [1; 48],
        };
        assert!(!curve.verify(&q, &[0u8; 48], &zero));
        assert!(PrivateKey::from_bytes([0u8; 48]).is_err());
        assert!(PrivateKey::from_bytes([0xff; 48]).is_err());
    }

    #[test]
    fn test_off_curve_key_rejected() {
        let curve = Curve::p384();
        let key = test_key();
        let digest = Sha384::digest(b"x");
        let sig = key.sign(&digest).unwrap();
        let (x, mut y) = key.public_point().unwrap().coordinates().unwrap();
        y[47] ^= 1;
        let bogus = Point::from_coordinates(&x, &y);
        assert!(!curve.is_on_curve(&bogus));
        assert!(!curve.verify(&bogus, &digest, &sig));
    }
}
