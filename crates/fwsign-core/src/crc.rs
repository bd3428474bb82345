//! CRC-32 engine
//!
//! Non-reflected CRC-32 (polynomial 0x04C11DB7, seed and final XOR
//! 0xFFFFFFFF), the variant known as CRC-32/BZIP2. The lookup table is
//! computed once on first use and never mutated afterwards.

use std::sync::OnceLock;

/// Generator polynomial
pub const POLYNOMIAL: u32 = 0x04C1_1DB7;

const SEED: u32 = 0xFFFF_FFFF;
const FINAL_XOR: u32 = 0xFFFF_FFFF;

static TABLE: OnceLock<[u32; 256]> = OnceLock::new();

fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let mut reg = (i as u32) << 24;
        for _ in 0..8 {
            reg = if reg & 0x8000_0000 != 0 {
                (reg << 1) ^ POLYNOMIAL
            } else {
                reg << 1
            };
        }
        *slot = reg;
    }
    table
}

fn table() -> &'static [u32; 256] {
    TABLE.get_or_init(build_table)
}

/// Compute the CRC of `bytes`
pub fn generate(bytes: &[u8]) -> u32 {
    let table = table();
    let crc = bytes.iter().fold(SEED, |crc, &b| {
        (crc << 8) ^ table[(((crc >> 24) ^ u32::from(b)) & 0xFF) as usize]
    });
    crc ^ FINAL_XOR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(generate(&[]), 0);
        assert_eq!(generate(&[0]), 2_985_771_083);
        assert_eq!(generate(&[0, 0]), 4_282_948_482);
        assert_eq!(generate(&[0, 1, 2, 3, 4]), 115_125_973);
    }

    #[test]
    fn test_check_value() {
        // Standard CRC-32/BZIP2 check value
        assert_eq!(generate(b"123456789"), 0xFC89_1918);
    }

    #[test]
    fn test_table_is_stable() {
        let first = table() as *const _;
        let second = table() as *const _;
        assert_eq!(first, second);
        assert_eq!(table()[1], POLYNOMIAL);
    }
}
