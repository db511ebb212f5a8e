//! G64 containers: the raw GCR bitstream of every halftrack.
//!
//! ```text
//! 0x00  8 bytes   "GCR-1541"
//! 0x08  1 byte    version (0)
//! 0x09  1 byte    number of halftracks
//! 0x0A  2 bytes   maximum track size in bytes
//! 0x0C            u32 offset of every halftrack (0 if absent)
//!                 u32 speed zone of every halftrack
//!                 per halftrack: u16 length in bytes, followed by the data
//! ```
//!
//! All integers are little-endian.

use std::io;

use log::{debug, warn};

use crate::disk::bitstream::Bitstream;
use crate::disk::disk_image::DiskImage;
use crate::disk::error::DiskError;
use crate::disk::geometry::{self, HALFTRACKS, MAX_BYTES_ON_TRACK};

const MAGIC: &[u8] = b"GCR-1541";
const VERSION: u8 = 0;
const HEADER_SIZE: usize = 0x0C;

#[inline]
fn read_u16(bytes: &[u8], offset: usize) -> io::Result<usize> {
    match bytes.get(offset..offset + 2) {
        Some(b) => Ok(b[0] as usize | (b[1] as usize) << 8),
        None => Err(DiskError::InvalidLayout.into()),
    }
}

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> io::Result<usize> {
    match bytes.get(offset..offset + 4) {
        Some(b) => Ok((0..4).fold(0usize, |acc, i| acc | (b[i] as usize) << (8 * i))),
        None => Err(DiskError::InvalidLayout.into()),
    }
}

#[inline]
fn push_u32(bytes: &mut Vec<u8>, value: usize) {
    bytes.extend_from_slice(&(value as u32).to_le_bytes());
}

pub fn is_g64(bytes: &[u8]) -> bool {
    bytes.len() >= HEADER_SIZE && bytes.starts_with(MAGIC)
}

/// Load a G64 image.  Halftracks that are absent stay cleared.
pub fn from_bytes(bytes: &[u8]) -> io::Result<DiskImage> {
    if !is_g64(bytes) {
        return Err(DiskError::InvalidHeader.into());
    }
    if bytes[8] != VERSION {
        debug!("G64 version {} (expected {})", bytes[8], VERSION);
    }
    let count = bytes[9] as usize;
    let mut disk = DiskImage::new();
    let mut previous_length = MAX_BYTES_ON_TRACK;

    for halftrack in 1..=count.min(HALFTRACKS) {
        let offset = read_u32(bytes, HEADER_SIZE + 4 * (halftrack - 1))?;
        if offset == 0 {
            continue;
        }
        let mut length = read_u16(bytes, offset)?;
        if length > MAX_BYTES_ON_TRACK {
            warn!(
                "G64: halftrack {} has {} bytes, more than the {} allowed. Skipping.",
                halftrack, length, MAX_BYTES_ON_TRACK
            );
            continue;
        }
        let bits = if length == 0 {
            // An empty track keeps the size of its neighbor.
            length = previous_length;
            Bitstream::filled(length * 8)
        } else {
            match bytes.get(offset + 2..offset + 2 + length) {
                Some(data) => Bitstream::from_bytes(data, length * 8),
                None => return Err(DiskError::InvalidLayout.into()),
            }
        };
        previous_length = length;
        disk.set_halftrack(halftrack, bits)?;
    }
    debug!("G64 with {} halftracks", count);
    Ok(disk)
}

/// Serialize a disk as a G64 image.  Halftracks holding nothing but filler
/// are omitted.
pub fn to_bytes(disk: &DiskImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(MAGIC);
    bytes.push(VERSION);
    bytes.push(HALFTRACKS as u8);
    bytes.extend_from_slice(&(MAX_BYTES_ON_TRACK as u16).to_le_bytes());

    let tables_end = HEADER_SIZE + 2 * 4 * HALFTRACKS;
    let mut offsets = Vec::with_capacity(HALFTRACKS);
    let mut position = tables_end;
    for halftrack in 1..=HALFTRACKS {
        if disk.is_halftrack_empty(halftrack) {
            offsets.push(0);
        } else {
            offsets.push(position);
            position += 2 + MAX_BYTES_ON_TRACK;
        }
    }
    for offset in offsets.iter() {
        push_u32(&mut bytes, *offset);
    }
    for halftrack in 1..=HALFTRACKS {
        push_u32(&mut bytes, geometry::halftrack_speed_zone(halftrack));
    }
    debug_assert_eq!(bytes.len(), tables_end);

    for halftrack in 1..=HALFTRACKS {
        if disk.is_halftrack_empty(halftrack) {
            continue;
        }
        let mut data = disk.halftrack(halftrack).to_bytes();
        data.truncate(MAX_BYTES_ON_TRACK);
        bytes.extend_from_slice(&(data.len() as u16).to_le_bytes());
        let padding = MAX_BYTES_ON_TRACK - data.len();
        bytes.extend_from_slice(&data);
        bytes.extend(std::iter::repeat(0u8).take(padding));
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::block::{BlockDevice, BlockImage};
    use crate::disk::geometry::Geometry;

    fn sample_blocks() -> BlockImage {
        let mut blocks = BlockImage::open_memory(Geometry::standard(35, false).unwrap());
        blocks.write_format(&"gcr".into(), &"g1".into()).unwrap();
        for block in 0..blocks.num_blocks() {
            if block != 357 && block != 358 {
                blocks.write_byte(block, 2, block as u8).unwrap();
            }
        }
        blocks
    }

    #[test]
    fn test_round_trip() {
        let blocks = sample_blocks();
        let disk = DiskImage::from_blocks(&blocks).unwrap();
        let bytes = to_bytes(&disk);
        assert!(is_g64(&bytes));
        assert_eq!(bytes[9], 84);
        // Only the 35 full tracks are stored.
        assert_eq!(bytes.len(), 0x0C + 8 * 84 + 35 * (2 + 7928));

        let mut reloaded = from_bytes(&bytes).unwrap();
        assert_eq!(reloaded.halftrack_len(1), 7693 * 8);
        assert_eq!(reloaded.halftrack_len(69), 6250 * 8);
        assert!(reloaded.is_halftrack_empty(2));
        let decoded = reloaded.decode_blocks().unwrap();
        assert!(!decoded.geometry().has_error_table());
        assert_eq!(decoded.as_bytes(), blocks.as_bytes());
    }

    #[test]
    fn test_bad_headers() {
        assert_eq!(
            from_bytes(b"GCR-1571\0\x54\x00\x00").unwrap_err(),
            DiskError::InvalidHeader
        );
        let mut bytes = to_bytes(&DiskImage::new());
        // Point halftrack 1 past the end of the file.
        bytes[0x0C] = 0xFF;
        bytes[0x0D] = 0xFF;
        assert_eq!(from_bytes(&bytes).unwrap_err(), DiskError::InvalidLayout);
    }

    #[test]
    fn test_oversize_halftrack_is_skipped() {
        let mut bytes = to_bytes(&DiskImage::from_blocks(&sample_blocks()).unwrap());
        let offset = 0x0C + 8 * 84;
        let too_long = (MAX_BYTES_ON_TRACK + 1) as u16;
        bytes[offset..offset + 2].copy_from_slice(&too_long.to_le_bytes());
        let disk = from_bytes(&bytes).unwrap();
        assert!(disk.is_halftrack_empty(1));
        assert!(!disk.is_halftrack_empty(3));
    }

    #[test]
    fn test_empty_halftrack_inherits_length() {
        let mut bytes = to_bytes(&DiskImage::from_blocks(&sample_blocks()).unwrap());
        // Track 18 (halftrack 35) is the eighteenth stored track.
        let offset = 0x0C + 8 * 84 + 17 * (2 + MAX_BYTES_ON_TRACK);
        assert_eq!(read_u16(&bytes, offset).unwrap(), 7143);
        bytes[offset..offset + 2].copy_from_slice(&[0, 0]);
        let disk = from_bytes(&bytes).unwrap();
        assert_eq!(disk.halftrack_len(35), disk.halftrack_len(33));
        assert_eq!(disk.halftrack_len(35), 7693 * 8);
        assert!(disk.is_halftrack_empty(35));
        assert_eq!(disk.halftrack_len(37), 7143 * 8);
    }
}
