//! T64 tape archives.
//!
//! ```text
//! 0x00  32 bytes  signature, starting with "C64"
//! 0x20  2 bytes   version
//! 0x22  2 bytes   directory slots
//! 0x24  2 bytes   used slots
//! 0x28  24 bytes  tape name, padded with spaces
//! 0x40            32-byte directory slots:
//!                 used flag, file type, start and end address, data offset
//!                 (at +8, four bytes) and the name (at +0x10, 16 bytes)
//! ```

use std::io;

use log::{debug, warn};

use crate::disk::archive::{Archive, ArchiveItem};
use crate::disk::directory::FileType;
use crate::disk::error::DiskError;
use crate::petscii::Petscii;

const MAGIC: &[u8] = b"C64";
/// TAP and P00 files share the first three bytes of the signature.
const TAP_MAGIC: &[u8] = b"C64-TAPE";
const P00_MAGIC: &[u8] = b"C64File";
const SIGNATURE: &[u8] = b"C64 tape image file";
const HEADER_SIZE: usize = 0x40;
const SLOT_SIZE: usize = 0x20;
const MIN_SLOTS: usize = 30;
const VERSION: [u8; 2] = [0x01, 0x01];
const NAME_OFFSET: usize = 0x28;
const NAME_SIZE: usize = 24;
const SLOT_NAME_SIZE: usize = 16;
const SPACE: u8 = 0x20;
/// C64S tape file type for a program stored in memory.
const ENTRY_TYPE_PRG: u8 = 0x82;
/// End address written by CONVC64 regardless of the file length.
const BROKEN_END_ADDRESS: u16 = 0xC3C6;

#[inline]
fn lo_hi(bytes: &[u8]) -> u16 {
    u16::from(bytes[0]) | u16::from(bytes[1]) << 8
}

#[inline]
fn lo_lo_hi_hi(bytes: &[u8]) -> usize {
    (0..4).fold(0usize, |acc, i| acc | (bytes[i] as usize) << (8 * i))
}

/// Return true if the bytes carry a T64 signature.
pub fn is_t64(bytes: &[u8]) -> bool {
    bytes.len() >= HEADER_SIZE
        && bytes.starts_with(MAGIC)
        && !bytes.starts_with(TAP_MAGIC)
        && !bytes.starts_with(P00_MAGIC)
}

fn slot(index: usize) -> usize {
    HEADER_SIZE + index * SLOT_SIZE
}

fn slot_is_present(bytes: &[u8], index: usize) -> bool {
    let end = slot(index) + SLOT_SIZE;
    end <= bytes.len() && bytes[slot(index)..end].iter().any(|b| *b != 0)
}

fn strip_spaces(bytes: &[u8]) -> Petscii {
    let end = bytes
        .iter()
        .rposition(|b| *b != SPACE && *b != 0)
        .map_or(0, |i| i + 1);
    Petscii::from_bytes(&bytes[..end])
}

/// Fix the inconsistencies common in T64 files found in the wild: a zero
/// item count in the header, and the bogus end address written by CONVC64.
fn repair(bytes: &mut [u8]) {
    let mut count = lo_hi(&bytes[0x24..]) as usize;
    if count == 0 {
        while slot_is_present(bytes, count) {
            count += 1;
        }
        if count != 0 {
            warn!("T64: Changing number of items from 0 to {}.", count);
            bytes[0x24] = count as u8;
            bytes[0x25] = (count >> 8) as u8;
        }
    }

    for i in 0..count {
        let base = slot(i);
        if base + SLOT_SIZE > bytes.len() {
            return;
        }
        let offset = lo_lo_hi_hi(&bytes[base + 8..]);
        if offset >= bytes.len() {
            warn!("T64: Offset mismatch in item {}. Cannot repair.", i);
            return;
        }
        let start = lo_hi(&bytes[base + 2..]);
        let end = lo_hi(&bytes[base + 4..]);
        if end == BROKEN_END_ADDRESS {
            let fixed = start.wrapping_add((bytes.len() - offset) as u16);
            warn!(
                "T64: Changing end address of item {} from {:04X} to {:04X}.",
                i, end, fixed
            );
            bytes[base + 4] = fixed as u8;
            bytes[base + 5] = (fixed >> 8) as u8;
        }
    }
}

/// Parse a T64 archive.  Program data is returned with its load address
/// prepended, the way it would be stored on disk.
pub fn from_bytes(bytes: &[u8]) -> io::Result<Archive> {
    if !is_t64(bytes) {
        return Err(DiskError::InvalidHeader.into());
    }
    let mut bytes = bytes.to_vec();
    repair(&mut bytes);

    let mut archive = Archive::new(strip_spaces(&bytes[NAME_OFFSET..NAME_OFFSET + NAME_SIZE]));
    let count = lo_hi(&bytes[0x24..]) as usize;
    for i in 0..count {
        let base = slot(i);
        if base + SLOT_SIZE > bytes.len() {
            return Err(DiskError::InvalidLayout.into());
        }
        let entry = &bytes[base..base + SLOT_SIZE];
        if entry[0] == 0 {
            continue;
        }
        let start = lo_hi(&entry[2..]);
        let end = lo_hi(&entry[4..]);
        let offset = lo_lo_hi_hi(&entry[8..]);
        let length = end.wrapping_sub(start) as usize;
        if offset > bytes.len() {
            return Err(DiskError::InvalidLayout.into());
        }
        let available = (bytes.len() - offset).min(length);
        let mut data = Vec::with_capacity(available + 2);
        data.push(start as u8);
        data.push((start >> 8) as u8);
        data.extend_from_slice(&bytes[offset..offset + available]);
        let name = strip_spaces(&entry[0x10..0x10 + SLOT_NAME_SIZE]);
        debug!("T64 item {} {:?} at {:04X}, {} bytes", i, name, start, available);
        archive.items.push(ArchiveItem::new(name, FileType::PRG, data));
    }
    Ok(archive)
}

/// Serialize an archive as a T64 file.  Every item must start with its load
/// address.
pub fn to_bytes(archive: &Archive) -> io::Result<Vec<u8>> {
    let count = archive.items.len();
    let slots = count.max(MIN_SLOTS);
    let mut bytes = vec![0u8; HEADER_SIZE + slots * SLOT_SIZE];

    bytes[..SIGNATURE.len()].copy_from_slice(SIGNATURE);
    bytes[0x20..0x22].copy_from_slice(&VERSION);
    bytes[0x22] = slots as u8;
    bytes[0x23] = (slots >> 8) as u8;
    bytes[0x24] = count as u8;
    bytes[0x25] = (count >> 8) as u8;
    archive
        .name
        .write_bytes_with_padding(&mut bytes[NAME_OFFSET..NAME_OFFSET + NAME_SIZE], SPACE)
        .map_err(|_| io::Error::from(DiskError::FilenameTooLong))?;

    let mut position = bytes.len();
    for (i, item) in archive.items.iter().enumerate() {
        let start = match item.load_address() {
            Some(address) => address,
            None => return Err(DiskError::UnsupportedContent.into()),
        };
        let length = item.data.len() - 2;
        let end = start.wrapping_add(length as u16);
        let base = slot(i);
        bytes[base] = 0x01;
        bytes[base + 1] = ENTRY_TYPE_PRG;
        bytes[base + 2] = start as u8;
        bytes[base + 3] = (start >> 8) as u8;
        bytes[base + 4] = end as u8;
        bytes[base + 5] = (end >> 8) as u8;
        for (j, b) in bytes[base + 8..base + 12].iter_mut().enumerate() {
            *b = (position >> (8 * j)) as u8;
        }
        item.name
            .write_bytes_with_padding(&mut bytes[base + 0x10..base + 0x20], SPACE)
            .map_err(|_| io::Error::from(DiskError::FilenameTooLong))?;
        position += length;
    }
    for item in archive.items.iter() {
        bytes.extend_from_slice(&item.data[2..]);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Archive {
        let mut archive = Archive::new("tape".into());
        archive.items.push(ArchiveItem::new(
            "first".into(),
            FileType::PRG,
            vec![0x01, 0x08, 10, 20, 30],
        ));
        archive.items.push(ArchiveItem::new(
            "second".into(),
            FileType::PRG,
            vec![0x00, 0x10, 0xEA],
        ));
        archive
    }

    #[test]
    fn test_round_trip() {
        let archive = sample();
        let bytes = to_bytes(&archive).unwrap();
        assert!(is_t64(&bytes));
        assert_eq!(bytes.len(), 0x40 + 30 * 0x20 + 4);
        assert_eq!(from_bytes(&bytes).unwrap(), archive);
    }

    #[test]
    fn test_rejects_tap_files() {
        let mut bytes = vec![0u8; 0x80];
        bytes[..12].copy_from_slice(b"C64-TAPE-RAW");
        assert!(!is_t64(&bytes));
        assert_eq!(from_bytes(&bytes).unwrap_err(), DiskError::InvalidHeader);
        assert!(!is_t64(b"C64"));
        bytes[..8].copy_from_slice(b"C64File\0");
        assert!(!is_t64(&bytes));
    }

    #[test]
    fn test_repairs() {
        let mut bytes = to_bytes(&sample()).unwrap();
        // Zero item count.
        bytes[0x24] = 0;
        // CONVC64 end address on the last item.
        let base = slot(1);
        bytes[base + 4] = 0xC6;
        bytes[base + 5] = 0xC3;
        let archive = from_bytes(&bytes).unwrap();
        assert_eq!(archive.items.len(), 2);
        assert_eq!(archive.items[1].data, vec![0x00, 0x10, 0xEA]);
    }

    #[test]
    fn test_count_repair_includes_last_slot() {
        // One slot that ends exactly at the end of the file, holding an
        // empty program at 0x0801.
        let mut bytes = vec![0u8; HEADER_SIZE + SLOT_SIZE];
        bytes[..SIGNATURE.len()].copy_from_slice(SIGNATURE);
        bytes[0x22] = 1;
        let base = slot(0);
        bytes[base] = 0x01;
        bytes[base + 1] = ENTRY_TYPE_PRG;
        bytes[base + 2] = 0x01;
        bytes[base + 3] = 0x08;
        bytes[base + 4] = 0x01;
        bytes[base + 5] = 0x08;
        bytes[base + 8] = (HEADER_SIZE + SLOT_SIZE) as u8;
        bytes[base + 0x10..base + 0x20].copy_from_slice(b"EMPTY           ");
        let archive = from_bytes(&bytes).unwrap();
        assert_eq!(archive.items.len(), 1);
        assert_eq!(archive.items[0].name, Petscii::from("empty"));
        assert_eq!(archive.items[0].data, vec![0x01, 0x08]);
    }

    #[test]
    fn test_repeated_names() {
        let mut archive = sample();
        archive.items[1].name = "first".into();
        let bytes = to_bytes(&archive).unwrap();
        assert_eq!(from_bytes(&bytes).unwrap(), archive);
    }
}
