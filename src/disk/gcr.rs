//! Group Code Recording (GCR) as written by the 1541: every nibble is stored
//! as a five-bit code so that the bitstream never holds more than two
//! consecutive zeros, and runs of ten or more ones can serve as SYNC marks.

use std::error;
use std::fmt;

/// Five-bit codes for the nibbles 0x0 through 0xF.
const GCR_ENCODE: [u8; 16] = [
    0x0a, 0x0b, 0x12, 0x13, 0x0e, 0x0f, 0x16, 0x17, 0x09, 0x19, 0x1a, 0x1b, 0x0d, 0x1d, 0x1e, 0x15,
];

const INVALID: u8 = 0xFF;

const fn build_decode_table() -> [u8; 32] {
    let mut table = [INVALID; 32];
    let mut nibble = 0;
    while nibble < 16 {
        table[GCR_ENCODE[nibble] as usize] = nibble as u8;
        nibble += 1;
    }
    table
}

/// Inverse of `GCR_ENCODE`.  Unused codes map to `INVALID`.
static GCR_DECODE: [u8; 32] = build_decode_table();

/// Number of bits a GCR-encoded byte occupies.
pub const GCR_BYTE_BITS: usize = 10;

/// Minimum number of consecutive one bits that form a SYNC mark.
pub const SYNC_MIN_ONES: usize = 10;

/// A five-bit code that does not correspond to any nibble.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GcrDecodeError {
    pub code: u8,
}

impl fmt::Display for GcrDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid GCR code {:05b}", self.code)
    }
}

impl error::Error for GcrDecodeError {}

/// Return the five-bit code for the low nibble of `nibble`.
#[inline]
pub fn encode_nibble(nibble: u8) -> u8 {
    GCR_ENCODE[(nibble & 0x0F) as usize]
}

/// Return the nibble encoded by the low five bits of `code`.
#[inline]
pub fn decode_nibble(code: u8) -> Result<u8, GcrDecodeError> {
    let code = code & 0x1F;
    match GCR_DECODE[code as usize] {
        INVALID => Err(GcrDecodeError { code }),
        nibble => Ok(nibble),
    }
}

/// Encode a byte into ten bits: the code of the high nibble followed by the
/// code of the low nibble.
#[inline]
pub fn encode_byte(byte: u8) -> u16 {
    (encode_nibble(byte >> 4) as u16) << 5 | encode_nibble(byte) as u16
}

/// Decode the low ten bits of `word` into a byte.
#[inline]
pub fn decode_byte(word: u16) -> Result<u8, GcrDecodeError> {
    let high = decode_nibble((word >> 5) as u8)?;
    let low = decode_nibble(word as u8)?;
    Ok(high << 4 | low)
}

/// An iterator over the end positions of SYNC marks in a stream of bits.
/// A SYNC ends at the first zero bit that follows at least
/// `SYNC_MIN_ONES` ones; the reported position is the index of that zero
/// bit, which is where the next byte starts.
pub struct SyncPositions<I> {
    bits: I,
    index: usize,
    ones: usize,
}

impl<I: Iterator<Item = bool>> Iterator for SyncPositions<I> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        for bit in &mut self.bits {
            let index = self.index;
            self.index += 1;
            if bit {
                self.ones += 1;
            } else {
                let ones = self.ones;
                self.ones = 0;
                if ones >= SYNC_MIN_ONES {
                    return Some(index);
                }
            }
        }
        None
    }
}

/// Scan a stream of bits for SYNC marks.
pub fn sync_positions<I: IntoIterator<Item = bool>>(bits: I) -> SyncPositions<I::IntoIter> {
    SyncPositions {
        bits: bits.into_iter(),
        index: 0,
        ones: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables() {
        let mut seen = [false; 32];
        for nibble in 0..16u8 {
            let code = encode_nibble(nibble);
            assert!(!seen[code as usize]);
            seen[code as usize] = true;
            assert_eq!(decode_nibble(code), Ok(nibble));
            // No code may start with two zeros or end with two zeros.
            assert!(code & 0x18 != 0 && code & 0x03 != 0);
        }
        assert_eq!(GCR_DECODE.iter().filter(|&&n| n == INVALID).count(), 16);
        assert_eq!(decode_nibble(0x00), Err(GcrDecodeError { code: 0x00 }));
        assert_eq!(decode_nibble(0x1F), Err(GcrDecodeError { code: 0x1F }));
    }

    #[test]
    fn test_byte_codes() {
        assert_eq!(encode_byte(0x08), 0b01010_01001);
        assert_eq!(encode_byte(0x07), 0b01010_10111);
        assert_eq!(encode_byte(0x55), 0b01111_01111);
        assert_eq!(decode_byte(encode_byte(0xA9)), Ok(0xA9));
        assert!(decode_byte(0x3FF).is_err());
    }

    fn bits(s: &str) -> Vec<bool> {
        s.chars().map(|c| c == '1').collect()
    }

    #[test]
    fn test_sync() {
        let ten = bits("11111111110");
        assert_eq!(sync_positions(ten).collect::<Vec<_>>(), vec![10]);
        let nine = bits("1111111110");
        assert_eq!(sync_positions(nine).count(), 0);
        let two = bits("0111111111111010111111111101");
        assert_eq!(sync_positions(two).collect::<Vec<_>>(), vec![13, 26]);
        let unterminated = bits("111111111111");
        assert_eq!(sync_positions(unterminated).count(), 0);
    }
}
