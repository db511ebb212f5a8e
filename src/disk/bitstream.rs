//! Storage for the raw bits of a single halftrack.  A halftrack is a ring:
//! every position is taken modulo the track length, so reads and writes may
//! run across the end of the track and continue at its start.

use std::fmt;

use bit_vec::BitVec;

use crate::disk::gcr::{self, GcrDecodeError, GCR_BYTE_BITS};
use crate::disk::geometry::MAX_BITS_ON_TRACK;

/// The byte an unformatted track is filled with.
pub const FILLER_BYTE: u8 = 0x55;

/// Bit `index` of a track filled with `FILLER_BYTE`.
#[inline]
fn filler_bit(index: usize) -> bool {
    FILLER_BYTE & (0x80 >> (index % 8)) != 0
}

#[derive(Clone, PartialEq, Eq)]
pub struct Bitstream {
    bits: BitVec,
}

impl Bitstream {
    /// Return a cleared halftrack of maximal length.
    pub fn cleared() -> Bitstream {
        Bitstream::filled(MAX_BITS_ON_TRACK)
    }

    /// Return a halftrack of `length` bits holding the filler pattern.
    pub fn filled(length: usize) -> Bitstream {
        let mut bits = BitVec::with_capacity(length);
        for i in 0..length {
            bits.push(filler_bit(i));
        }
        Bitstream { bits }
    }

    /// Build a halftrack from packed bytes (most significant bit first),
    /// keeping the first `length` bits.
    pub fn from_bytes(bytes: &[u8], length: usize) -> Bitstream {
        assert!(length <= bytes.len() * 8, "bit length exceeds data");
        let mut bits = BitVec::from_bytes(bytes);
        bits.truncate(length);
        Bitstream { bits }
    }

    /// Return the bits packed into bytes, most significant bit first.  A
    /// partial final byte is padded with zeros.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits.to_bytes()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Change the track length.  New bits continue the filler pattern.
    pub fn set_len(&mut self, length: usize) {
        if length < self.bits.len() {
            self.bits.truncate(length);
        } else {
            for i in self.bits.len()..length {
                self.bits.push(filler_bit(i));
            }
        }
    }

    /// Return true if the track holds nothing but the filler pattern.
    pub fn is_blank(&self) -> bool {
        self.bits
            .iter()
            .enumerate()
            .all(|(i, bit)| bit == filler_bit(i))
    }

    /// Reduce a position onto the track.
    #[inline]
    pub fn wrap(&self, position: usize) -> usize {
        match self.bits.len() {
            0 => 0,
            length => position % length,
        }
    }

    #[inline]
    pub fn bit(&self, position: usize) -> bool {
        let position = self.wrap(position);
        self.bits.get(position).unwrap_or(false)
    }

    #[inline]
    pub fn set_bit(&mut self, position: usize, bit: bool) {
        if !self.bits.is_empty() {
            let position = self.wrap(position);
            self.bits.set(position, bit);
        }
    }

    /// Read up to 16 bits starting at `position`, most significant bit first.
    pub fn read_bits(&self, position: usize, count: usize) -> u16 {
        assert!(count <= 16);
        (0..count).fold(0u16, |word, i| word << 1 | self.bit(position + i) as u16)
    }

    /// Decode the GCR byte starting at `position`.
    #[inline]
    pub fn read_gcr_byte(&self, position: usize) -> Result<u8, GcrDecodeError> {
        gcr::decode_byte(self.read_bits(position, GCR_BYTE_BITS))
    }

    /// Iterate over the bits of the track, starting at position 0.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.bits.iter()
    }

    /// Iterate over two revolutions of the track, so that structures
    /// straddling the end of the track are seen in one piece.
    pub fn iter_twice(&self) -> impl Iterator<Item = bool> + '_ {
        self.bits.iter().chain(self.bits.iter())
    }

    /// Render the track as a string of '0' and '1' characters.
    pub fn as_string(&self) -> String {
        self.bits.iter().map(|b| if b { '1' } else { '0' }).collect()
    }

    /// Return a writer positioned at `position`.
    pub fn writer(&mut self, position: usize) -> BitWriter<'_> {
        BitWriter {
            stream: self,
            position,
        }
    }
}

impl fmt::Debug for Bitstream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Bitstream({} bits)", self.bits.len())
    }
}

/// Sequential writer that wraps around the end of the track.
pub struct BitWriter<'a> {
    stream: &'a mut Bitstream,
    position: usize,
}

impl<'a> BitWriter<'a> {
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn write_bit(&mut self, bit: bool) {
        self.stream.set_bit(self.position, bit);
        self.position += 1;
    }

    /// Write the low `count` bits of `value`, most significant bit first.
    pub fn write_bits(&mut self, value: u16, count: usize) {
        for i in (0..count).rev() {
            self.write_bit(value >> i & 1 == 1);
        }
    }

    /// Write a run of identical bits, e.g. a SYNC mark.
    pub fn write_run(&mut self, bit: bool, count: usize) {
        for _ in 0..count {
            self.write_bit(bit);
        }
    }

    pub fn write_gcr(&mut self, byte: u8) {
        self.write_bits(gcr::encode_byte(byte), GCR_BYTE_BITS);
    }

    pub fn write_gcr_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.write_gcr(byte);
        }
    }

    /// Write a byte as eight plain bits without GCR encoding.
    pub fn write_raw(&mut self, byte: u8) {
        self.write_bits(byte as u16, 8);
    }
}
