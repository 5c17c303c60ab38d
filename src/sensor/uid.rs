//! Sensor identity types reported by the transmitter.
//!
//! Both the sensor UID and the patch info are fixed-size byte strings that
//! the transmitter relays in NFC order. They are rendered and parsed as
//! plain hex so they can be passed on the command line.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Symbols used to encode the printed sensor serial number, five bits each.
const SERIAL_ALPHABET: &[u8; 32] = b"0123456789ACDEFGHJKLMNPQRTUVWXYZ";

/// Errors returned when parsing a hex identifier.
#[derive(Error, Debug, PartialEq)]
pub enum ParseIdError {
    #[error("invalid identifier: expected {expected} hex digits, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid identifier: '{0}' is not valid hex")]
    InvalidHex(String),
}

/// Decode a hex string (optionally separated by `:` or spaces) into bytes.
pub fn parse_hex(s: &str) -> Result<Vec<u8>, ParseIdError> {
    let digits: String = s
        .chars()
        .filter(|c| !matches!(c, ':' | ' ' | '-'))
        .collect();
    if !digits.is_ascii() || digits.len() % 2 != 0 {
        return Err(ParseIdError::InvalidHex(digits));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            let pair = &digits[i..i + 2];
            u8::from_str_radix(pair, 16).map_err(|_| ParseIdError::InvalidHex(pair.to_string()))
        })
        .collect()
}

fn parse_fixed<const N: usize>(s: &str) -> Result<[u8; N], ParseIdError> {
    let bytes = parse_hex(s)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| ParseIdError::InvalidLength {
            expected: N * 2,
            actual: bytes.len() * 2,
        })
}

fn fmt_hex(bytes: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for b in bytes {
        write!(f, "{b:02X}")?;
    }
    Ok(())
}

/// The 8-byte sensor UID, least significant byte first (`E0` last).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SensorUid(pub [u8; 8]);

impl SensorUid {
    /// Printed serial number of the sensor, as found on the applicator.
    ///
    /// The six bytes following the `E0 07` manufacturer prefix are read
    /// most significant first and split into ten 5-bit symbols.
    pub fn serial_number(&self) -> String {
        let mut bytes = [0u8; 6];
        for (i, b) in self.0[..6].iter().rev().enumerate() {
            bytes[i] = *b;
        }

        let mut bits: u64 = 0;
        for b in bytes {
            bits = (bits << 8) | u64::from(b);
        }
        // 48 payload bits padded to 50 so they split evenly into symbols
        bits <<= 2;

        let mut serial = String::with_capacity(11);
        serial.push('0');
        for i in (0..10).rev() {
            let symbol = (bits >> (i * 5)) & 0x1F;
            serial.push(SERIAL_ALPHABET[symbol as usize] as char);
        }
        serial
    }
}

impl fmt::Display for SensorUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl FromStr for SensorUid {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed(s).map(SensorUid)
    }
}

impl From<[u8; 8]> for SensorUid {
    fn from(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }
}

/// The 6-byte patch info block identifying the sensor generation and region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PatchInfo(pub [u8; 6]);

impl fmt::Display for PatchInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl FromStr for PatchInfo {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed(s).map(PatchInfo)
    }
}

impl From<[u8; 6]> for PatchInfo {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}
