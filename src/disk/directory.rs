//! CBM DOS directories

use std::fmt;
use std::fmt::Write;
use std::io;

use crate::disk::bam::Bam;
use crate::disk::block::{BlockDevice, BlockImage, Location, Position, BLOCK_SIZE};
use crate::disk::chain::{ChainIterator, ChainLink};
use crate::disk::error::DiskError;
use crate::disk::{FIRST_DIRECTORY_LOCATION, PADDING_BYTE};
use crate::petscii::Petscii;

const FILE_TYPE_DEL: u8 = 0x00;
const FILE_TYPE_SEQ: u8 = 0x01;
const FILE_TYPE_PRG: u8 = 0x02;
const FILE_TYPE_USR: u8 = 0x03;
const FILE_TYPE_REL: u8 = 0x04;
const FILE_ATTRIB_FILE_TYPE_MASK: u8 = 0x0F;
const FILE_ATTRIB_UNUSED_MASK: u8 = 0x10;
const FILE_ATTRIB_SAVE_WITH_REPLACE_MASK: u8 = 0x20;
const FILE_ATTRIB_LOCKED_MASK: u8 = 0x40;
const FILE_ATTRIB_CLOSED_MASK: u8 = 0x80;

/// A directory entry categorizes files as SEQ, PRG, USR, or REL, along with a
/// pseudo-file-type of DEL to indicate deleted files.
#[derive(PartialEq, Debug, Clone, Copy)]
pub enum FileType {
    DEL,
    SEQ,
    PRG,
    USR,
    REL,
    Unknown(u8),
}

impl FileType {
    /// Parse a three letter file type name.
    pub fn from_string(string: &str) -> Option<FileType> {
        match string.to_uppercase().as_str() {
            "DEL" => Some(FileType::DEL),
            "SEQ" => Some(FileType::SEQ),
            "PRG" => Some(FileType::PRG),
            "USR" => Some(FileType::USR),
            "REL" => Some(FileType::REL),
            _ => None,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            FileType::DEL => "del",
            FileType::SEQ => "seq",
            FileType::PRG => "prg",
            FileType::USR => "usr",
            FileType::REL => "rel",
            FileType::Unknown(_) => "unk",
        })
    }
}

/// We introduce the term "file attributes" to refer to the full 8-bit
/// directory entry field which contains the file type along with several flags.
#[derive(Clone, PartialEq)]
pub struct FileAttributes {
    /// Bits 0-3 indicate the file type.
    pub file_type: FileType,
    /// Bit 4 is unused, but we store it anyway so we can reproduce this field
    /// verbatim.
    pub unused_bit: bool,
    /// Bit 5 is the "save with replace" flag.
    pub save_with_replace_flag: bool,
    /// Bit 6 is the "locked" flag, indicated by a "<" in directory listings.
    pub locked_flag: bool,
    /// Bit 7 is the "closed" flag.  Unclosed files are indicated in directory
    /// listings with a "*", leading to such files being known as "splat files".
    pub closed_flag: bool,
}

impl FileAttributes {
    /// Attributes of a regular closed file of the given type.
    pub fn closed(file_type: FileType) -> FileAttributes {
        FileAttributes {
            file_type,
            unused_bit: false,
            save_with_replace_flag: false,
            locked_flag: false,
            closed_flag: true,
        }
    }

    /// Parse a byte into a `FileAttributes` struct.
    pub fn from_byte(byte: u8) -> FileAttributes {
        let file_type = match byte & FILE_ATTRIB_FILE_TYPE_MASK {
            FILE_TYPE_DEL => FileType::DEL,
            FILE_TYPE_SEQ => FileType::SEQ,
            FILE_TYPE_PRG => FileType::PRG,
            FILE_TYPE_USR => FileType::USR,
            FILE_TYPE_REL => FileType::REL,
            b => FileType::Unknown(b),
        };
        FileAttributes {
            file_type,
            unused_bit: byte & FILE_ATTRIB_UNUSED_MASK != 0,
            save_with_replace_flag: byte & FILE_ATTRIB_SAVE_WITH_REPLACE_MASK != 0,
            locked_flag: byte & FILE_ATTRIB_LOCKED_MASK != 0,
            closed_flag: byte & FILE_ATTRIB_CLOSED_MASK != 0,
        }
    }

    /// Generate the byte which encodes this `FileAttributes` struct.
    pub fn to_byte(&self) -> u8 {
        let mut byte = match self.file_type {
            FileType::DEL => FILE_TYPE_DEL,
            FileType::SEQ => FILE_TYPE_SEQ,
            FileType::PRG => FILE_TYPE_PRG,
            FileType::USR => FILE_TYPE_USR,
            FileType::REL => FILE_TYPE_REL,
            FileType::Unknown(b) => b,
        };
        if self.unused_bit {
            byte |= FILE_ATTRIB_UNUSED_MASK
        };
        if self.save_with_replace_flag {
            byte |= FILE_ATTRIB_SAVE_WITH_REPLACE_MASK
        };
        if self.locked_flag {
            byte |= FILE_ATTRIB_LOCKED_MASK
        };
        if self.closed_flag {
            byte |= FILE_ATTRIB_CLOSED_MASK
        };
        byte
    }

    /// Return true if this entry represents a properly deleted ("scratched")
    /// file.  That is, if its file type is DEL and the closed flag is not
    /// set.
    pub fn is_scratched(&self) -> bool {
        self.file_type == FileType::DEL && !self.closed_flag
    }
}

impl fmt::Display for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.closed_flag { ' ' } else { '*' },
            self.file_type,
            match (self.locked_flag, self.save_with_replace_flag) {
                (true, false) => "<",
                (false, true) => "@",
                (true, true) => "<@",
                (false, false) => " ",
            },
        )
    }
}

impl fmt::Debug for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // This is different from the Display impl in that there is no padding.
        if !self.closed_flag {
            f.write_char('*')?;
        }
        <FileType as fmt::Debug>::fmt(&self.file_type, f)?;
        f.write_str(match (self.locked_flag, self.save_with_replace_flag) {
            (true, false) => "<",
            (false, true) => "@",
            (true, true) => "<@",
            (false, false) => "",
        })
    }
}

pub const ENTRY_SIZE: usize = 32;
pub const ENTRY_FILE_ATTRIBUTE_OFFSET: usize = 0x02;
pub const ENTRY_FIRST_SECTOR_OFFSET: usize = 0x03;
pub const ENTRY_FILENAME_OFFSET: usize = 0x05;
pub const ENTRY_FILENAME_LENGTH: usize = 16;
pub const ENTRY_SIDE_SECTOR_OFFSET: usize = 0x15;
pub const ENTRY_RECORD_LENGTH_OFFSET: usize = 0x17;
pub const ENTRY_GEOS_OFFSET: usize = 0x18;
const ENTRY_GEOS_SIZE: usize = 6;
pub const ENTRY_FILE_SIZE_OFFSET: usize = 0x1E;

/// Relative files store records of at most this many bytes.
pub const MAX_RECORD_LENGTH: u8 = 254;

/// A CBM DOS directory entry.
#[derive(Clone)]
pub struct DirectoryEntry {
    pub file_attributes: FileAttributes,
    pub first_sector: Location,
    pub filename: Petscii,
    /// First side sector of a relative file.
    pub side_sector: Location,
    /// Record length of a relative file.
    pub record_length: u8,
    /// Bytes 0x18..0x1E, used by GEOS and by "save with replace".  Ordinary
    /// files leave them zeroed; we preserve whatever is present.
    pub geos: [u8; ENTRY_GEOS_SIZE],
    /// The file size in blocks, as recorded by DOS.
    pub file_size: u16,
    // The disk image position where this entry is stored, if available.
    pub position: Option<Position>,
}

impl DirectoryEntry {
    /// A fresh entry for a closed file of the given type.
    pub fn new(filename: &Petscii, file_type: FileType) -> DirectoryEntry {
        DirectoryEntry {
            file_attributes: FileAttributes::closed(file_type),
            first_sector: Location(0, 0),
            filename: filename.clone(),
            side_sector: Location(0, 0),
            record_length: 0,
            geos: [0u8; ENTRY_GEOS_SIZE],
            file_size: 0,
            position: None,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> DirectoryEntry {
        Self::parse(bytes, None)
    }

    fn from_positioned_bytes(bytes: &[u8], position: Position) -> DirectoryEntry {
        Self::parse(bytes, Some(position))
    }

    fn parse(bytes: &[u8], position: Option<Position>) -> DirectoryEntry {
        assert_eq!(bytes.len(), ENTRY_SIZE);
        let mut geos = [0u8; ENTRY_GEOS_SIZE];
        geos.copy_from_slice(&bytes[ENTRY_GEOS_OFFSET..ENTRY_GEOS_OFFSET + ENTRY_GEOS_SIZE]);
        DirectoryEntry {
            file_attributes: FileAttributes::from_byte(bytes[ENTRY_FILE_ATTRIBUTE_OFFSET]),
            first_sector: Location::from_bytes(&bytes[ENTRY_FIRST_SECTOR_OFFSET..]),
            filename: Petscii::from_padded_bytes(
                &bytes[ENTRY_FILENAME_OFFSET..ENTRY_FILENAME_OFFSET + ENTRY_FILENAME_LENGTH],
                PADDING_BYTE,
            ),
            side_sector: Location::from_bytes(&bytes[ENTRY_SIDE_SECTOR_OFFSET..]),
            record_length: bytes[ENTRY_RECORD_LENGTH_OFFSET],
            geos,
            file_size: ((bytes[ENTRY_FILE_SIZE_OFFSET + 1] as u16) << 8)
                | (bytes[ENTRY_FILE_SIZE_OFFSET] as u16),
            position,
        }
    }

    /// Write the serialized directory entry to the provided mutable byte
    /// slice.  This operation preserves any existing "next directory sector"
    /// field.
    pub fn to_bytes(&self, bytes: &mut [u8]) -> io::Result<()> {
        assert_eq!(bytes.len(), ENTRY_SIZE);
        check_filename_validity(&self.filename)?;
        bytes[ENTRY_FILE_ATTRIBUTE_OFFSET] = self.file_attributes.to_byte();
        self.first_sector
            .write_bytes(&mut bytes[ENTRY_FIRST_SECTOR_OFFSET..]);
        self.filename.write_bytes_with_padding(
            &mut bytes[ENTRY_FILENAME_OFFSET..ENTRY_FILENAME_OFFSET + ENTRY_FILENAME_LENGTH],
            PADDING_BYTE,
        )?;
        self.side_sector
            .write_bytes(&mut bytes[ENTRY_SIDE_SECTOR_OFFSET..]);
        bytes[ENTRY_RECORD_LENGTH_OFFSET] = self.record_length;
        bytes[ENTRY_GEOS_OFFSET..ENTRY_GEOS_OFFSET + ENTRY_GEOS_SIZE].copy_from_slice(&self.geos);
        bytes[ENTRY_FILE_SIZE_OFFSET] = (self.file_size & 0xFF) as u8;
        bytes[ENTRY_FILE_SIZE_OFFSET + 1] = (self.file_size >> 8) as u8;
        Ok(())
    }

    #[inline]
    pub fn file_type(&self) -> FileType {
        self.file_attributes.file_type
    }
}

impl fmt::Display for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:<4} {:18}{}",
            self.file_size,
            format!("\"{}\"", self.filename),
            self.file_attributes
        )?;
        if f.alternate() {
            // verbose
            write!(f, " first={}", self.first_sector)?;
            if self.file_attributes.file_type == FileType::REL {
                write!(
                    f,
                    " REL(side={} rec_len={})",
                    self.side_sector, self.record_length
                )?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "\"{}\",{},{:?} @ {:?}",
            self.filename, self.file_size, self.file_attributes, self.position
        )
    }
}

/// This iterator will process the entire directory of a disk image and return
/// a sequence of entries.
pub struct DirectoryIterator<'a> {
    chain: ChainIterator<'a>,
    chunks: ::std::vec::IntoIter<Vec<u8>>,
    position: Position,
}

impl<'a> DirectoryIterator<'a> {
    /// Create a new directory iterator over the directory chain starting at
    /// (18,1).
    pub fn new(blocks: &'a dyn BlockDevice) -> DirectoryIterator<'a> {
        DirectoryIterator {
            chain: ChainIterator::new(blocks, FIRST_DIRECTORY_LOCATION),
            chunks: vec![].into_iter(), // Arrange to return None the first time.
            position: Position {
                location: FIRST_DIRECTORY_LOCATION,
                offset: 0,
            },
        }
    }
}

impl<'a> Iterator for DirectoryIterator<'a> {
    type Item = io::Result<DirectoryEntry>;

    fn next(&mut self) -> Option<io::Result<DirectoryEntry>> {
        loop {
            match self.chunks.next() {
                Some(chunk) => {
                    if chunk.len() != ENTRY_SIZE {
                        continue;
                    }

                    // The offset will normally wrap back to 0x00 when processing the last entry in
                    // a sector.
                    let entry_position = self.position;
                    self.position.offset = self.position.offset.wrapping_add(ENTRY_SIZE as u8);

                    let entry = DirectoryEntry::from_positioned_bytes(&chunk, entry_position);
                    // Don't include scratched files
                    if entry.file_attributes.is_scratched() {
                        continue;
                    }
                    return Some(Ok(entry));
                }
                None => match self.chain.next()? {
                    Ok(block) => {
                        self.chunks = block
                            .data
                            .chunks(ENTRY_SIZE)
                            .map(|chunk| chunk.to_vec())
                            .collect::<Vec<_>>()
                            .into_iter();
                        self.position.location = block.location;
                        self.position.offset = 0;
                    }
                    Err(e) => return Some(Err(e)),
                },
            }
        }
    }
}

/// Return the position of the next free directory slot, extending the
/// directory chain on track 18 if every existing slot is in use.
pub fn next_free_directory_entry(blocks: &mut BlockImage, bam: &mut Bam) -> io::Result<Position> {
    let mut last_sector = FIRST_DIRECTORY_LOCATION;

    // Search the existing directory chain for a free slot.
    for chain_block in ChainIterator::new(&*blocks, FIRST_DIRECTORY_LOCATION) {
        let chain_block = chain_block?;
        last_sector = chain_block.location;
        for (i, chunk) in chain_block.data.chunks(ENTRY_SIZE).enumerate() {
            if chunk.len() != ENTRY_SIZE {
                continue;
            }
            let attributes = FileAttributes::from_byte(chunk[ENTRY_FILE_ATTRIBUTE_OFFSET]);
            if attributes.is_scratched() {
                return Ok(Position {
                    location: chain_block.location,
                    offset: (i * ENTRY_SIZE) as u8,
                });
            }
        }
    }

    // No free slots are available in the currently allocated directory sectors, so
    // we need to create a new one and link to it from the last found sector.
    let new_sector = bam.next_free_block(Some(last_sector))?;
    let mut block = [0u8; BLOCK_SIZE];
    // The (0x00,0xFF) link marks the last block of the chain, used in its
    // entirety.
    ChainLink::Tail(BLOCK_SIZE).to_bytes(&mut block);
    blocks.write_sector(new_sector, &block)?;
    bam.allocate(new_sector)?;

    new_sector.write_bytes(blocks.sector_mut(last_sector)?);
    Ok(Position {
        location: new_sector,
        offset: 0,
    })
}

/// Store an entry at its recorded position.
pub fn write_directory_entry(blocks: &mut BlockImage, entry: &DirectoryEntry) -> io::Result<()> {
    let position = match entry.position {
        Some(position) => position,
        None => return Err(DiskError::InvalidLocation.into()),
    };
    let offset = position.offset as usize;
    let sector = blocks.sector_mut(position.location)?;
    entry.to_bytes(&mut sector[offset..offset + ENTRY_SIZE])
}

/// Confirm that the specified filename is valid.  A filename is considered
/// valid if it is 16 characters or fewer.
pub fn check_filename_validity(filename: &Petscii) -> io::Result<()> {
    if filename.len() > ENTRY_FILENAME_LENGTH {
        return Err(DiskError::FilenameTooLong.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::format::DISK_FORMAT;
    use crate::disk::geometry::Geometry;

    fn get_fresh_directory() -> (BlockImage, Bam) {
        let mut blocks = BlockImage::open_memory(Geometry::standard(35, false).unwrap());
        let mut bam = Bam::new();
        for location in DISK_FORMAT.system_locations() {
            bam.allocate(location).unwrap();
        }
        let mut block = [0u8; BLOCK_SIZE];
        ChainLink::Tail(BLOCK_SIZE).to_bytes(&mut block);
        blocks.write_sector(FIRST_DIRECTORY_LOCATION, &block).unwrap();
        (blocks, bam)
    }

    #[test]
    fn test_next_free_directory_entry() {
        const MAX_NEW_ENTRIES: usize = 1000;
        let (mut blocks, mut bam) = get_fresh_directory();
        let mut disk_full: bool = false;
        let mut entries_written: usize = 0;
        for _ in 0..MAX_NEW_ENTRIES {
            let position = match next_free_directory_entry(&mut blocks, &mut bam) {
                Ok(position) => position,
                Err(ref e) => match DiskError::from_io_error(e) {
                    Some(ref e) if *e == DiskError::DiskFull => {
                        disk_full = true;
                        break;
                    }
                    Some(ref e) => panic!("error: {}", e),
                    None => break,
                },
            };

            let mut entry = DirectoryEntry::new(&"filename".into(), FileType::PRG);
            entry.position = Some(position);
            write_directory_entry(&mut blocks, &entry).unwrap();
            entries_written += 1;
        }
        assert!(disk_full);
        // Eighteen directory sectors of eight entries each.
        assert_eq!(entries_written, 18 * BLOCK_SIZE / ENTRY_SIZE);
        assert_eq!(DirectoryIterator::new(&blocks).count(), 144);
    }

    #[test]
    fn test_directory_iteration_skips_scratched() {
        let (mut blocks, mut bam) = get_fresh_directory();
        for (i, name) in ["one", "two", "three"].iter().enumerate() {
            let mut entry = DirectoryEntry::new(&(*name).into(), FileType::SEQ);
            entry.file_size = i as u16;
            entry.position = Some(next_free_directory_entry(&mut blocks, &mut bam).unwrap());
            write_directory_entry(&mut blocks, &entry).unwrap();
        }
        // Scratch "two".
        blocks.sector_mut(FIRST_DIRECTORY_LOCATION).unwrap()[0x20 + 2] = 0x00;

        let names: Vec<Petscii> = DirectoryIterator::new(&blocks)
            .map(|e| e.unwrap().filename)
            .collect();
        assert_eq!(names, vec![Petscii::from("one"), Petscii::from("three")]);

        let entry = DirectoryIterator::new(&blocks).nth(1).unwrap().unwrap();
        assert_eq!(
            entry.position,
            Some(Position {
                location: FIRST_DIRECTORY_LOCATION,
                offset: 0x40
            })
        );
        assert_eq!(entry.file_size, 2);
    }

    #[test]
    fn test_directory_entry() {
        // All bits cleared
        static BUFFER1: [u8; ENTRY_SIZE] = [0u8; ENTRY_SIZE];
        let entry = DirectoryEntry::from_bytes(&BUFFER1);
        let mut output = [0u8; ENTRY_SIZE];
        entry.to_bytes(&mut output).unwrap();
        assert_eq!(output[2..], BUFFER1[2..]);
        assert_eq!(entry.file_attributes.file_type, FileType::DEL);
        assert!(entry.file_attributes.is_scratched());
        assert_eq!(entry.first_sector, Location(0, 0));
        assert_eq!(entry.file_size, 0);

        // All bits set
        static BUFFER3: [u8; ENTRY_SIZE] = [0xFFu8; ENTRY_SIZE];
        let entry = DirectoryEntry::from_bytes(&BUFFER3);
        let mut output = [0u8; ENTRY_SIZE];
        output[0] = 0xff; // to_bytes() doesn't touch the first two bytes
        output[1] = 0xff;
        entry.to_bytes(&mut output).unwrap();
        assert_eq!(output, BUFFER3);
        assert_eq!(entry.file_attributes.file_type, FileType::Unknown(0x0F));
        assert!(entry.file_attributes.unused_bit);
        assert!(entry.file_attributes.save_with_replace_flag);
        assert!(entry.file_attributes.locked_flag);
        assert!(entry.file_attributes.closed_flag);
        assert_eq!(entry.first_sector, Location(0xFF, 0xFF));
        assert_eq!(entry.record_length, 0xFF);
        assert_eq!(entry.file_size, 0xFFFF);

        // A real world example.
        // 00016620: 5347 8211 0541 5343 4949 2043 4f44 4553  SG...ASCII CODES
        // 00016630: a0a0 a0a0 a000 0000 0000 0000 0000 0600  ................
        // This is the second directory entry on the first directory sector.
        static BUFFER4: [u8; ENTRY_SIZE] = [
            0x53, 0x47, 0x82, 0x11, 0x05, 0x41, 0x53, 0x43, 0x49, 0x49, 0x20, 0x43, 0x4f, 0x44,
            0x45, 0x53, 0xa0, 0xa0, 0xa0, 0xa0, 0xa0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x06, 0x00,
        ];
        let entry = DirectoryEntry::from_bytes(&BUFFER4);
        let mut output = [0u8; ENTRY_SIZE];
        output[0] = BUFFER4[0]; // to_bytes() doesn't touch the first two bytes
        output[1] = BUFFER4[1];
        entry.to_bytes(&mut output).unwrap();
        assert_eq!(output, BUFFER4);
        assert_eq!(entry.file_type(), FileType::PRG);
        assert!(entry.file_attributes.closed_flag);
        assert_eq!(entry.first_sector, Location(0x11, 0x05));
        assert_eq!(entry.filename, Petscii::from("ascii codes"));
        assert_eq!(entry.file_size, 0x0006);
        assert_eq!(format!("{}", entry), "6    \"ASCII CODES\"      prg ");
    }

    #[test]
    fn test_filename_too_long() {
        let entry = DirectoryEntry::new(&"a very long file name".into(), FileType::PRG);
        let mut output = [0u8; ENTRY_SIZE];
        assert_eq!(
            entry.to_bytes(&mut output).unwrap_err(),
            DiskError::FilenameTooLong
        );
    }
}
