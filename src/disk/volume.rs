//! A CBM DOS file system view over a block device.
//!
//! A `Volume` borrows the blocks it interprets and never mutates them.  Every
//! structural query (block types, item types, the consistency check) walks the
//! BAM and directory afresh, so the results always reflect the current block
//! contents.  A volume over a device without a recognizable DOS header still
//! answers raw block queries; the directory-aware operations fail with
//! `DiskError::NoFileSystem`.

use std::collections::HashSet;
use std::fmt;
use std::io::{self, Read};

use log::debug;

use crate::disk::analyzer::SectorError;
use crate::disk::bam::Bam;
use crate::disk::block::{BlockDevice, BlockImage, Location, BLOCK_SIZE};
use crate::disk::chain::{self, ChainIterator, ChainLink, ChainReader};
use crate::disk::checker::{self, ByteError, ErrorReport};
use crate::disk::directory::{self, DirectoryEntry, DirectoryIterator, FileType};
use crate::disk::error::DiskError;
use crate::disk::format::DISK_FORMAT;
use crate::disk::header::Header;
use crate::disk::validation::{self, ValidationError};
use crate::disk::{Id, BAM_BLOCK, FIRST_DIRECTORY_LOCATION};
use crate::petscii::Petscii;

/// The role a block plays in the file system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockType {
    Unknown,
    Empty,
    Bam,
    Directory,
    Data,
}

impl BlockType {
    /// Higher priorities win when several blocks share one cell of a usage
    /// map.
    fn priority(self) -> u8 {
        match self {
            BlockType::Unknown => 0,
            BlockType::Empty => 1,
            BlockType::Data => 2,
            BlockType::Directory => 3,
            BlockType::Bam => 4,
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(match self {
            BlockType::Unknown => "unknown",
            BlockType::Empty => "empty",
            BlockType::Bam => "bam",
            BlockType::Directory => "directory",
            BlockType::Data => "data",
        })
    }
}

/// The role of a single byte within a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemType {
    Unknown,
    Unused,
    // BAM block
    FirstDirTrack,
    FirstDirSector,
    DosVersion,
    AllocationBits,
    DiskName,
    DiskId,
    DosType,
    // Directory and data blocks
    TrackLink,
    SectorLink,
    FileType,
    FirstFileTrack,
    FirstFileSector,
    FileName,
    FirstRelTrack,
    FirstRelSector,
    RelRecordLength,
    Geos,
    FileLengthLo,
    FileLengthHi,
    Data,
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::ItemType::*;
        f.pad(match self {
            Unknown => "Unknown",
            Unused => "Unused",
            FirstDirTrack => "First directory track",
            FirstDirSector => "First directory sector",
            DosVersion => "DOS version",
            AllocationBits => "Allocation bits",
            DiskName => "Disk name",
            DiskId => "Disk ID",
            DosType => "DOS type",
            TrackLink => "Track link",
            SectorLink => "Sector link",
            FileType => "File type",
            FirstFileTrack => "First file track",
            FirstFileSector => "First file sector",
            FileName => "File name",
            FirstRelTrack => "First REL track",
            FirstRelSector => "First REL sector",
            RelRecordLength => "REL record length",
            Geos => "GEOS",
            FileLengthLo => "File length (low byte)",
            FileLengthHi => "File length (high byte)",
            Data => "Data",
        })
    }
}

/// Classify a byte given the type of the block containing it.
pub(crate) fn item_type_in(block_type: BlockType, pos: usize) -> ItemType {
    assert!(pos < BLOCK_SIZE, "offset {} outside block", pos);
    match block_type {
        BlockType::Unknown => ItemType::Unknown,
        BlockType::Empty => ItemType::Unused,
        BlockType::Bam => match pos {
            0x00 => ItemType::FirstDirTrack,
            0x01 => ItemType::FirstDirSector,
            0x02 => ItemType::DosVersion,
            0x04..=0x8F => ItemType::AllocationBits,
            0x90..=0x9F => ItemType::DiskName,
            0xA2..=0xA3 => ItemType::DiskId,
            0xA5..=0xA6 => ItemType::DosType,
            _ => ItemType::Unused,
        },
        BlockType::Directory => {
            if pos == 0 {
                return ItemType::TrackLink;
            }
            if pos == 1 {
                return ItemType::SectorLink;
            }
            match pos & 0x1F {
                0x00 | 0x01 => ItemType::Unused,
                0x02 => ItemType::FileType,
                0x03 => ItemType::FirstFileTrack,
                0x04 => ItemType::FirstFileSector,
                0x05..=0x14 => ItemType::FileName,
                0x15 => ItemType::FirstRelTrack,
                0x16 => ItemType::FirstRelSector,
                0x17 => ItemType::RelRecordLength,
                0x18..=0x1D => ItemType::Geos,
                0x1E => ItemType::FileLengthLo,
                _ => ItemType::FileLengthHi,
            }
        }
        BlockType::Data => match pos {
            0 => ItemType::TrackLink,
            1 => ItemType::SectorLink,
            _ => ItemType::Data,
        },
    }
}

pub struct Volume<'a> {
    blocks: &'a dyn BlockDevice,
    header: Option<Header>,
}

impl<'a> Volume<'a> {
    pub fn new(blocks: &'a dyn BlockDevice) -> Volume<'a> {
        let header = match Header::read(blocks) {
            Ok(header) if header.is_cbm_dos() => Some(header),
            Ok(header) => {
                debug!("no CBM DOS header (dos type {:?})", header.dos_type());
                None
            }
            Err(e) => {
                debug!("header block unreadable: {}", e);
                None
            }
        };
        Volume { blocks, header }
    }

    #[inline]
    pub fn blocks(&self) -> &'a dyn BlockDevice {
        self.blocks
    }

    #[inline]
    pub fn has_file_system(&self) -> bool {
        self.header.is_some()
    }

    pub fn header(&self) -> io::Result<&Header> {
        match self.header {
            Some(ref header) => Ok(header),
            None => Err(DiskError::NoFileSystem.into()),
        }
    }

    //
    // Raw block access
    //

    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.blocks.num_blocks()
    }

    #[inline]
    pub fn read_byte(&self, block: usize, offset: usize) -> u8 {
        self.blocks.read_byte(block, offset)
    }

    pub fn error_code(&self, block: usize) -> SectorError {
        match self.blocks.geometry().checked_location_of(block) {
            Some(location) => self.blocks.error_code(location),
            None => SectorError::Ok,
        }
    }

    fn is_block_blank(&self, block: usize) -> bool {
        match self.blocks.block(block) {
            Ok(data) => data.iter().all(|b| *b == 0),
            Err(_) => false,
        }
    }

    //
    // Header and BAM
    //

    pub fn disk_name(&self) -> io::Result<Petscii> {
        Ok(self.header()?.disk_name.clone())
    }

    pub fn disk_id(&self) -> io::Result<Id> {
        Ok(self.header()?.disk_id)
    }

    pub fn dos_type(&self) -> io::Result<Petscii> {
        Ok(self.header()?.dos_type())
    }

    pub fn bam(&self) -> io::Result<Bam> {
        self.header()?;
        Bam::read(self.blocks)
    }

    pub fn blocks_free(&self) -> io::Result<usize> {
        Ok(self.bam()?.blocks_free())
    }

    /// Return whether a block is marked free in the BAM, or None for blocks
    /// beyond the tracks covered by the BAM.
    pub fn is_free(&self, block: usize) -> io::Result<Option<bool>> {
        let bam = self.bam()?;
        Ok(self
            .blocks
            .geometry()
            .checked_location_of(block)
            .and_then(|location| bam.is_free(location)))
    }

    //
    // Directory and files
    //

    pub fn iter(&self) -> io::Result<DirectoryIterator<'a>> {
        self.header()?;
        Ok(DirectoryIterator::new(self.blocks))
    }

    pub fn directory(&self) -> io::Result<Vec<DirectoryEntry>> {
        self.iter()?.collect()
    }

    pub fn num_files(&self) -> io::Result<usize> {
        Ok(self.directory()?.len())
    }

    /// Return the directory entry of the `nr`th file (0-based).
    pub fn entry(&self, nr: usize) -> io::Result<DirectoryEntry> {
        match self.directory()?.into_iter().nth(nr) {
            Some(entry) => Ok(entry),
            None => Err(DiskError::NotFound.into()),
        }
    }

    pub fn file_name(&self, nr: usize) -> io::Result<Petscii> {
        Ok(self.entry(nr)?.filename)
    }

    pub fn file_type(&self, nr: usize) -> io::Result<FileType> {
        Ok(self.entry(nr)?.file_type())
    }

    /// The size in blocks, as recorded in the directory.
    pub fn file_blocks(&self, nr: usize) -> io::Result<usize> {
        Ok(self.entry(nr)?.file_size as usize)
    }

    /// The size in bytes, found by walking the file's chain.
    pub fn file_size(&self, nr: usize) -> io::Result<usize> {
        self.entry_size(&self.entry(nr)?)
    }

    pub fn first_block(&self, nr: usize) -> io::Result<usize> {
        let location = self.entry(nr)?.first_sector;
        match self.blocks.geometry().checked_block_of(location) {
            Some(block) => Ok(block),
            None => Err(DiskError::InvalidLocation.into()),
        }
    }

    pub fn read_file(&self, nr: usize) -> io::Result<Vec<u8>> {
        self.read_entry(&self.entry(nr)?)
    }

    /// Locate a directory entry based on its filename.
    pub fn find_file(&self, filename: &Petscii) -> io::Result<DirectoryEntry> {
        for entry in self.iter()? {
            let entry = entry?;
            if entry.filename == *filename {
                return Ok(entry);
            }
        }
        Err(DiskError::NotFound.into())
    }

    pub fn entry_size(&self, entry: &DirectoryEntry) -> io::Result<usize> {
        let mut size = 0;
        for chain_sector in ChainIterator::new(self.blocks, entry.first_sector) {
            size += chain_sector?.data.len() - 2;
        }
        Ok(size)
    }

    pub fn read_entry(&self, entry: &DirectoryEntry) -> io::Result<Vec<u8>> {
        let mut data = vec![];
        ChainReader::new(self.blocks, entry.first_sector).read_to_end(&mut data)?;
        Ok(data)
    }

    //
    // Structure
    //

    /// The readable part of the directory chain.
    pub fn directory_chain(&self) -> Vec<Location> {
        if !self.has_file_system() {
            return vec![];
        }
        ChainIterator::new(self.blocks, FIRST_DIRECTORY_LOCATION).readable_locations()
    }

    /// The readable parts of every file chain, including REL side sectors.
    pub fn file_chains(&self) -> Vec<Location> {
        if !self.has_file_system() {
            return vec![];
        }
        let mut locations = vec![];
        for entry in DirectoryIterator::new(self.blocks).filter_map(|e| e.ok()) {
            locations.extend(ChainIterator::new(self.blocks, entry.first_sector).readable_locations());
            if entry.file_type() == FileType::REL {
                locations
                    .extend(ChainIterator::new(self.blocks, entry.side_sector).readable_locations());
            }
        }
        locations
    }

    /// Every location the file system is using: the BAM block, the
    /// directory chain and all file chains.
    pub fn used_locations(&self) -> HashSet<Location> {
        let mut used = HashSet::new();
        if !self.has_file_system() {
            return used;
        }
        used.extend(DISK_FORMAT.system_locations());
        used.extend(self.directory_chain());
        used.extend(self.file_chains());
        used
    }

    /// Classify every block in one pass.
    pub fn block_types(&self) -> Vec<BlockType> {
        let geometry = self.blocks.geometry();
        let mut types = vec![BlockType::Unknown; self.num_blocks()];
        if self.has_file_system() {
            let mut mark = |location: Location, block_type: BlockType| {
                if let Some(block) = geometry.checked_block_of(location) {
                    types[block] = block_type;
                }
            };
            for location in self.file_chains() {
                mark(location, BlockType::Data);
            }
            for location in self.directory_chain() {
                mark(location, BlockType::Directory);
            }
            types[BAM_BLOCK] = BlockType::Bam;
        }
        for (block, block_type) in types.iter_mut().enumerate() {
            if *block_type == BlockType::Unknown && self.is_block_blank(block) {
                *block_type = BlockType::Empty;
            }
        }
        types
    }

    pub fn block_type(&self, block: usize) -> BlockType {
        assert!(block < self.num_blocks(), "block {} out of range", block);
        self.block_types()[block]
    }

    pub fn item_type(&self, block: usize, pos: usize) -> ItemType {
        item_type_in(self.block_type(block), pos)
    }

    /// The first block of the given type after `after` (or from the start if
    /// None).  The search stops at the last block.
    pub fn next_block_of_type(&self, block_type: BlockType, after: Option<usize>) -> Option<usize> {
        let start = after.map_or(0, |b| b + 1);
        let types = self.block_types();
        (start..types.len()).find(|b| types[*b] == block_type)
    }

    /// The last block of the given type before `before` (or from the end if
    /// None).  The search stops at block 0.
    pub fn prev_block_of_type(&self, block_type: BlockType, before: Option<usize>) -> Option<usize> {
        let types = self.block_types();
        let end = before.unwrap_or(types.len()).min(types.len());
        (0..end).rev().find(|b| types[*b] == block_type)
    }

    /// Down-sample the block types into `length` cells.
    pub fn usage_map(&self, length: usize) -> Vec<BlockType> {
        let types = self.block_types();
        let n = types.len();
        (0..length)
            .map(|i| {
                let first = i * n / length;
                let last = ((i + 1) * n / length).max(first + 1).min(n);
                types[first..last]
                    .iter()
                    .copied()
                    .max_by_key(|t| t.priority())
                    .unwrap_or(BlockType::Unknown)
            })
            .collect()
    }

    //
    // Checking
    //

    pub fn check(&self, strict: bool) -> ErrorReport {
        checker::check(self, strict)
    }

    pub fn check_byte(&self, block: usize, pos: usize, strict: bool) -> ByteError {
        checker::check_byte(self, block, pos, strict)
    }

    pub fn validate(&self) -> io::Result<Vec<ValidationError>> {
        validation::validate(self)
    }
}

impl BlockImage {
    /// Format the image as an empty CBM DOS disk.  Any error table is reset
    /// to all sectors OK.
    pub fn write_format(&mut self, name: &Petscii, id: &Id) -> io::Result<()> {
        self.check_writability()?;
        for block in 0..self.num_blocks() {
            for b in self.block_mut(block)?.iter_mut() {
                *b = 0;
            }
        }
        if let Some(table) = self.error_table_mut()? {
            for code in table.iter_mut() {
                *code = SectorError::Ok.code();
            }
        }

        // The (0x00,0xFF) link marks the last block of the chain, used in
        // its entirety.
        let mut block = [0u8; BLOCK_SIZE];
        ChainLink::Tail(BLOCK_SIZE).to_bytes(&mut block);
        self.write_sector(FIRST_DIRECTORY_LOCATION, &block)?;

        Header::new(name, id).write(self)?;

        let mut bam = Bam::new();
        for location in DISK_FORMAT.system_locations() {
            bam.allocate(location)?;
        }
        bam.write(self)?;
        self.flush()
    }

    /// Store a new file, allocating blocks the way CBM DOS does.
    pub fn write_file(
        &mut self,
        filename: &Petscii,
        file_type: FileType,
        data: &[u8],
    ) -> io::Result<DirectoryEntry> {
        {
            let volume = Volume::new(&*self);
            match volume.find_file(filename) {
                Ok(_) => return Err(DiskError::FileExists.into()),
                Err(ref e) if DiskError::from_io_error(e) == Some(DiskError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        self.store_file(filename, file_type, data)
    }

    /// Store a file without looking for an existing one of the same name.
    /// Archives may hold several items with one name, and a 1541 lists them
    /// all.
    pub(crate) fn store_file(
        &mut self,
        filename: &Petscii,
        file_type: FileType,
        data: &[u8],
    ) -> io::Result<DirectoryEntry> {
        self.check_writability()?;
        directory::check_filename_validity(filename)?;
        if file_type == FileType::REL {
            return Err(DiskError::UnsupportedContent.into());
        }

        let mut bam = Bam::read(&*self)?;
        let (first_sector, blocks_used) = chain::write_chain(self, &mut bam, data)?;
        let position = directory::next_free_directory_entry(self, &mut bam)?;

        let mut entry = DirectoryEntry::new(filename, file_type);
        entry.first_sector = first_sector;
        entry.file_size = blocks_used as u16;
        entry.position = Some(position);
        directory::write_directory_entry(self, &entry)?;
        bam.write(self)?;
        debug!(
            "wrote {:?} ({} bytes, {} blocks) at {}",
            filename,
            data.len(),
            blocks_used,
            first_sector
        );
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::geometry::Geometry;

    fn fresh_volume() -> BlockImage {
        let mut blocks = BlockImage::open_memory(Geometry::standard(35, false).unwrap());
        blocks.write_format(&"test disk".into(), &"t1".into()).unwrap();
        blocks
    }

    #[test]
    fn test_format() {
        let blocks = fresh_volume();
        let volume = Volume::new(&blocks);
        assert!(volume.has_file_system());
        assert_eq!(volume.disk_name().unwrap(), Petscii::from("test disk"));
        assert_eq!(volume.disk_id().unwrap(), Id::from("t1"));
        assert_eq!(volume.dos_type().unwrap(), Petscii::from("2A"));
        assert_eq!(volume.blocks_free().unwrap(), 664);
        assert_eq!(volume.num_files().unwrap(), 0);
        assert_eq!(volume.is_free(BAM_BLOCK).unwrap(), Some(false));
        assert_eq!(volume.is_free(0).unwrap(), Some(true));
    }

    #[test]
    fn test_write_and_read_files() {
        let mut blocks = fresh_volume();
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
        blocks.write_file(&"first".into(), FileType::PRG, &data).unwrap();
        blocks.write_file(&"second".into(), FileType::SEQ, b"hello").unwrap();
        let e = blocks
            .write_file(&"first".into(), FileType::PRG, b"again")
            .unwrap_err();
        assert_eq!(e, DiskError::FileExists);

        let volume = Volume::new(&blocks);
        assert_eq!(volume.num_files().unwrap(), 2);
        assert_eq!(volume.file_name(0).unwrap(), Petscii::from("first"));
        assert_eq!(volume.file_type(1).unwrap(), FileType::SEQ);
        assert_eq!(volume.file_blocks(0).unwrap(), 4);
        assert_eq!(volume.file_size(0).unwrap(), 1000);
        assert_eq!(volume.file_size(1).unwrap(), 5);
        assert_eq!(volume.read_file(0).unwrap(), data);
        assert_eq!(volume.read_file(1).unwrap(), b"hello".to_vec());
        assert_eq!(volume.first_block(0).unwrap(), 336); // (17,0)
        assert_eq!(volume.blocks_free().unwrap(), 664 - 5);
        assert_eq!(
            volume.find_file(&"second".into()).unwrap().file_size,
            1
        );
        assert_eq!(
            volume.find_file(&"third".into()).unwrap_err(),
            DiskError::NotFound
        );
        assert_eq!(volume.entry(2).unwrap_err(), DiskError::NotFound);
    }

    #[test]
    fn test_block_types() {
        let mut blocks = fresh_volume();
        blocks.write_file(&"file".into(), FileType::PRG, &[1u8; 300]).unwrap();
        let volume = Volume::new(&blocks);
        let types = volume.block_types();
        assert_eq!(types[BAM_BLOCK], BlockType::Bam);
        assert_eq!(types[BAM_BLOCK + 1], BlockType::Directory);
        assert_eq!(types[336], BlockType::Data); // (17,0)
        assert_eq!(types[346], BlockType::Data); // (17,10)
        assert_eq!(types[0], BlockType::Empty);
        assert_eq!(volume.block_type(336), BlockType::Data);

        assert_eq!(volume.next_block_of_type(BlockType::Data, None), Some(336));
        assert_eq!(volume.next_block_of_type(BlockType::Data, Some(336)), Some(346));
        assert_eq!(volume.next_block_of_type(BlockType::Data, Some(346)), None);
        assert_eq!(volume.prev_block_of_type(BlockType::Data, Some(346)), Some(336));
        assert_eq!(volume.prev_block_of_type(BlockType::Data, Some(336)), None);
        assert_eq!(volume.prev_block_of_type(BlockType::Bam, None), Some(BAM_BLOCK));

        // Junk in a free block is unknown.
        blocks.write_byte(0, 10, 0x42).unwrap();
        let volume = Volume::new(&blocks);
        assert_eq!(volume.block_type(0), BlockType::Unknown);
    }

    #[test]
    fn test_item_types() {
        let mut blocks = fresh_volume();
        blocks.write_file(&"file".into(), FileType::PRG, &[1u8; 10]).unwrap();
        let volume = Volume::new(&blocks);
        assert_eq!(volume.item_type(BAM_BLOCK, 0x00), ItemType::FirstDirTrack);
        assert_eq!(volume.item_type(BAM_BLOCK, 0x05), ItemType::AllocationBits);
        assert_eq!(volume.item_type(BAM_BLOCK, 0x95), ItemType::DiskName);
        assert_eq!(volume.item_type(BAM_BLOCK, 0xA3), ItemType::DiskId);
        assert_eq!(volume.item_type(BAM_BLOCK, 0xA6), ItemType::DosType);
        assert_eq!(volume.item_type(BAM_BLOCK, 0xA4), ItemType::Unused);
        let dir = BAM_BLOCK + 1;
        assert_eq!(volume.item_type(dir, 0), ItemType::TrackLink);
        assert_eq!(volume.item_type(dir, 1), ItemType::SectorLink);
        assert_eq!(volume.item_type(dir, 0x21), ItemType::Unused);
        assert_eq!(volume.item_type(dir, 0x22), ItemType::FileType);
        assert_eq!(volume.item_type(dir, 0x07), ItemType::FileName);
        assert_eq!(volume.item_type(dir, 0x3E), ItemType::FileLengthLo);
        assert_eq!(volume.item_type(336, 1), ItemType::SectorLink);
        assert_eq!(volume.item_type(336, 2), ItemType::Data);
        assert_eq!(volume.item_type(0, 2), ItemType::Unused);
        assert_eq!(format!("{}", ItemType::RelRecordLength), "REL record length");
    }

    #[test]
    fn test_usage_map() {
        let blocks = fresh_volume();
        let volume = Volume::new(&blocks);
        let map = volume.usage_map(683);
        assert_eq!(map.len(), 683);
        assert_eq!(map[BAM_BLOCK], BlockType::Bam);
        let small = volume.usage_map(10);
        assert_eq!(small.len(), 10);
        assert_eq!(small[5], BlockType::Bam); // blocks 341..409
        assert_eq!(small[0], BlockType::Empty);
        let large = volume.usage_map(2000);
        assert_eq!(large.len(), 2000);
    }

    #[test]
    fn test_no_file_system() {
        let blocks = BlockImage::open_memory(Geometry::standard(35, false).unwrap());
        let volume = Volume::new(&blocks);
        assert!(!volume.has_file_system());
        assert_eq!(volume.num_files().unwrap_err(), DiskError::NoFileSystem);
        assert_eq!(volume.file_name(0).unwrap_err(), DiskError::NoFileSystem);
        assert_eq!(volume.disk_name().unwrap_err(), DiskError::NoFileSystem);
        assert_eq!(volume.read_byte(BAM_BLOCK, 0), 0);
        assert_eq!(volume.block_type(BAM_BLOCK), BlockType::Empty);
        assert_eq!(volume.check(true).corrupted_blocks(), 0);
    }
}
