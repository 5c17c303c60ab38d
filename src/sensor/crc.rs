//! Region checksums of the sensor memory block.
//!
//! Each of the three regions (header, body, footer) starts with a two byte
//! checksum over the remaining bytes of that region. The checksum is a
//! reflected CRC-16/CCITT seeded with `0xFFFF` whose result is bit-reversed
//! before being stored little-endian.

use super::{BODY, FOOTER, HEADER, SENSOR_DATA_LEN};
use crc::{CRC_16_MCRF4XX, Crc};
use std::ops::Range;

const LIBRE_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MCRF4XX);

/// The three checksummed regions, in memory order.
pub const REGIONS: [Range<usize>; 3] = [HEADER, BODY, FOOTER];

/// Checksum of `data` in the order it is stored in memory (little-endian).
pub fn crc16(data: &[u8]) -> u16 {
    LIBRE_CRC.checksum(data).reverse_bits()
}

/// Checksum stored in the first two bytes of `region`.
pub fn stored_crc(region: &[u8]) -> u16 {
    u16::from_le_bytes([region[0], region[1]])
}

/// Whether the first two bytes of `region` match the checksum of the rest.
pub fn region_is_valid(region: &[u8]) -> bool {
    region.len() > 2 && stored_crc(region) == crc16(&region[2..])
}

/// Validity of header, body and footer, in that order.
pub fn validate(bytes: &[u8; SENSOR_DATA_LEN]) -> [bool; 3] {
    REGIONS.map(|range| region_is_valid(&bytes[range]))
}

/// Rewrite the checksum of every region so that `bytes` validates.
///
/// Used to synthesise blocks for replay, benchmarks and tests.
pub fn seal(bytes: &mut [u8; SENSOR_DATA_LEN]) {
    for range in REGIONS {
        let region = &mut bytes[range];
        let crc = crc16(&region[2..]);
        region[..2].copy_from_slice(&crc.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_matches_reference_table() {
        // Reference value for "123456789" with the reflected 0x8408 table and
        // 0xFFFF seed is 0x6F91 before bit reversal.
        assert_eq!(LIBRE_CRC.checksum(b"123456789"), 0x6F91);
        assert_eq!(crc16(b"123456789"), 0x6F91u16.reverse_bits());
    }

    #[test]
    fn test_seal_makes_all_regions_valid() {
        let mut bytes = [0x5Au8; SENSOR_DATA_LEN];
        assert_eq!(validate(&bytes), [false, false, false]);
        seal(&mut bytes);
        assert_eq!(validate(&bytes), [true, true, true]);
    }

    #[test]
    fn test_tampering_inside_each_region_fails_only_that_region() {
        let mut sealed = [0u8; SENSOR_DATA_LEN];
        for (i, b) in sealed.iter_mut().enumerate() {
            *b = (i * 7 % 251) as u8;
        }
        seal(&mut sealed);

        for (index, range) in REGIONS.iter().enumerate() {
            for offset in range.clone() {
                let mut tampered = sealed;
                tampered[offset] ^= 0x01;
                let result = validate(&tampered);
                assert!(!result[index], "byte {offset} should break region {index}");
                for (other, valid) in result.iter().enumerate() {
                    if other != index {
                        assert!(valid, "byte {offset} must not affect region {other}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_short_region_is_invalid() {
        assert!(!region_is_valid(&[0x00, 0x00]));
        assert!(!region_is_valid(&[]));
    }
}
