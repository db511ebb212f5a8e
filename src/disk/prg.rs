//! Single-program containers: bare PRG files and PC64 "P00" files.
//!
//! A PRG file is nothing but the load address followed by the program.  A
//! P00 file prefixes the same bytes with a small header carrying the CBM
//! filename.

use std::io;

use crate::disk::archive::{Archive, ArchiveItem};
use crate::disk::directory::{FileType, ENTRY_FILENAME_LENGTH};
use crate::disk::error::DiskError;
use crate::petscii::Petscii;

const P00_MAGIC: &[u8] = b"C64File\0";
const P00_NAME_OFFSET: usize = 0x08;
const P00_RECORD_SIZE_OFFSET: usize = 0x18;
const P00_DATA_OFFSET: usize = 0x1A;
/// Bytes of the load address in front of the program.
const LOAD_ADDRESS_SIZE: usize = 2;

/// Wrap a PRG file.  The caller supplies the name, which PRG files do not
/// carry themselves.
pub fn prg_from_bytes(bytes: &[u8], name: &Petscii) -> io::Result<Archive> {
    if bytes.len() < LOAD_ADDRESS_SIZE {
        return Err(DiskError::InvalidLayout.into());
    }
    let name = Petscii::from_bytes(&name.as_bytes()[..name.len().min(ENTRY_FILENAME_LENGTH)]);
    let mut archive = Archive::new(name.clone());
    archive
        .items
        .push(ArchiveItem::new(name, FileType::PRG, bytes.to_vec()));
    Ok(archive)
}

/// Return the first program of an archive as PRG bytes.
pub fn prg_to_bytes(archive: &Archive) -> io::Result<Vec<u8>> {
    match archive.items.first() {
        Some(item) if item.data.len() >= LOAD_ADDRESS_SIZE => Ok(item.data.clone()),
        Some(_) => Err(DiskError::UnsupportedContent.into()),
        None => Err(DiskError::NotFound.into()),
    }
}

pub fn is_p00(bytes: &[u8]) -> bool {
    bytes.len() >= P00_DATA_OFFSET && bytes.starts_with(P00_MAGIC)
}

pub fn p00_from_bytes(bytes: &[u8]) -> io::Result<Archive> {
    if !is_p00(bytes) {
        return Err(DiskError::InvalidHeader.into());
    }
    let name = Petscii::from_padded_bytes(
        &bytes[P00_NAME_OFFSET..P00_NAME_OFFSET + ENTRY_FILENAME_LENGTH],
        0x00,
    );
    let mut archive = Archive::new(name.clone());
    archive.items.push(ArchiveItem::new(
        name,
        FileType::PRG,
        bytes[P00_DATA_OFFSET..].to_vec(),
    ));
    Ok(archive)
}

pub fn p00_to_bytes(archive: &Archive) -> io::Result<Vec<u8>> {
    let item = match archive.items.first() {
        Some(item) => item,
        None => return Err(DiskError::NotFound.into()),
    };
    let mut bytes = vec![0u8; P00_DATA_OFFSET];
    bytes[..P00_MAGIC.len()].copy_from_slice(P00_MAGIC);
    item.name
        .write_bytes_with_padding(
            &mut bytes[P00_NAME_OFFSET..P00_NAME_OFFSET + ENTRY_FILENAME_LENGTH],
            0x00,
        )
        .map_err(|_| io::Error::from(DiskError::FilenameTooLong))?;
    // Only REL files use the record size.
    bytes[P00_RECORD_SIZE_OFFSET] = 0;
    bytes.extend_from_slice(&item.data);
    Ok(bytes)
}
