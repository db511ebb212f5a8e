//! Byte-level consistency checking of a CBM DOS volume.
//!
//! Every byte of a block the checker understands (BAM, directory and data
//! blocks) is compared against the values CBM DOS would have written.  A
//! lenient check only flags values that break the structure, such as links to
//! nonexistent sectors.  A strict check additionally insists on the exact
//! contents of reserved and padding fields.  Checking never modifies the
//! volume; `rectify()` is the separate, explicit repair step.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io;

use log::debug;

use crate::disk::bam::{Bam, BamEntry, BAM_ENTRY_OFFSET, BAM_ENTRY_SIZE, BAM_TRACKS};
use crate::disk::block::{BlockDevice, BlockImage, Location, BLOCK_SIZE};
use crate::disk::directory::{
    ENTRY_FIRST_SECTOR_OFFSET, ENTRY_RECORD_LENGTH_OFFSET, ENTRY_SIDE_SECTOR_OFFSET, ENTRY_SIZE,
    MAX_RECORD_LENGTH,
};
use crate::disk::format::DISK_FORMAT;
use crate::disk::header::HEADER_FORMAT;
use crate::disk::volume::{BlockType, Volume};
use crate::disk::PADDING_BYTE;

/// CBM DOS version byte (0x02) of the BAM block.
const DOS_VERSION: u8 = 0x41;
/// First byte of the BAM block past the header fields.
const RESERVED_START: usize = 0xAB;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Ok,
    ExpectedValue,
    ExpectedSmallerValue,
    ExpectedLargerValue,
    ReservedNonZero,
}

impl ErrorKind {
    /// Render the kind together with the value the checker expected.
    pub fn description(&self, expected: u8) -> String {
        match self {
            ErrorKind::Ok => String::new(),
            ErrorKind::ExpectedValue => format!("Expected: {:02x}", expected),
            ErrorKind::ExpectedSmallerValue => format!("Expected: {:02x} or lower", expected),
            ErrorKind::ExpectedLargerValue => format!("Expected: {:02x} or higher", expected),
            ErrorKind::ReservedNonZero => "Expected: 00 (reserved)".to_string(),
        }
    }
}

/// The verdict on a single byte, with the value the checker wanted to see.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteError {
    pub kind: ErrorKind,
    pub expected: u8,
}

impl ByteError {
    pub const OK: ByteError = ByteError {
        kind: ErrorKind::Ok,
        expected: 0,
    };

    #[inline]
    fn new(kind: ErrorKind, expected: u8) -> ByteError {
        ByteError { kind, expected }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.kind == ErrorKind::Ok
    }
}

impl fmt::Display for ByteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.kind.description(self.expected))
    }
}

/// The result of checking a whole volume.  A report is a snapshot; checking
/// again after modifying the blocks produces a new one.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorReport {
    pub strict: bool,
    block_errors: BTreeMap<usize, Vec<(usize, ByteError)>>,
    /// Blocks in use by the file system that the BAM marks free.
    pub used_but_unallocated: Vec<usize>,
    /// Blocks the BAM marks allocated that nothing uses (strict only).
    pub unused_but_allocated: Vec<usize>,
}

impl ErrorReport {
    #[inline]
    pub fn corrupted_blocks(&self) -> usize {
        self.block_errors.len()
    }

    #[inline]
    pub fn is_corrupted(&self, block: usize) -> bool {
        self.block_errors.contains_key(&block)
    }

    /// The 1-based rank of a corrupted block among all corrupted blocks.
    pub fn corruption_index(&self, block: usize) -> Option<usize> {
        self.block_errors
            .keys()
            .position(|b| *b == block)
            .map(|i| i + 1)
    }

    /// The `n`th corrupted block (1-based).
    pub fn corrupted(&self, n: usize) -> Option<usize> {
        if n == 0 {
            return None;
        }
        self.block_errors.keys().nth(n - 1).copied()
    }

    /// Number of faulty bytes in a block.
    pub fn errors_in_block(&self, block: usize) -> usize {
        self.block_errors.get(&block).map_or(0, |e| e.len())
    }

    pub fn byte_errors(&self, block: usize) -> &[(usize, ByteError)] {
        match self.block_errors.get(&block) {
            Some(errors) => errors,
            None => &[],
        }
    }

    pub fn total_errors(&self) -> usize {
        self.block_errors.values().map(|e| e.len()).sum()
    }

    pub fn first_error_block(&self) -> Option<usize> {
        self.block_errors.keys().next().copied()
    }

    pub fn last_error_block(&self) -> Option<usize> {
        self.block_errors.keys().next_back().copied()
    }

    /// The next corrupted block after `after`, without wrapping around.
    pub fn next_corrupted(&self, after: Option<usize>) -> Option<usize> {
        match after {
            Some(block) => self.block_errors.range(block + 1..).next().map(|(b, _)| *b),
            None => self.first_error_block(),
        }
    }

    /// The previous corrupted block before `before`, without wrapping around.
    pub fn prev_corrupted(&self, before: Option<usize>) -> Option<usize> {
        match before {
            Some(block) => self.block_errors.range(..block).next_back().map(|(b, _)| *b),
            None => self.last_error_block(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.block_errors.is_empty()
            && self.used_but_unallocated.is_empty()
            && self.unused_but_allocated.is_empty()
    }
}

/// Check every block of the volume.
pub fn check(volume: &Volume, strict: bool) -> ErrorReport {
    let types = volume.block_types();
    let mut block_errors = BTreeMap::new();
    for (block, block_type) in types.iter().enumerate() {
        let data = match volume.blocks().block(block) {
            Ok(data) => data,
            Err(_) => continue,
        };
        let errors: Vec<(usize, ByteError)> = (0..BLOCK_SIZE)
            .map(|pos| (pos, check_data(volume, *block_type, data, pos, strict)))
            .filter(|(_, e)| !e.is_ok())
            .collect();
        if !errors.is_empty() {
            debug!("block {}: {} faulty bytes", block, errors.len());
            block_errors.insert(block, errors);
        }
    }
    let (used_but_unallocated, unused_but_allocated) = check_bitmap(volume, strict);
    ErrorReport {
        strict,
        block_errors,
        used_but_unallocated,
        unused_but_allocated,
    }
}

/// Check a single byte.  Panics if the block or position is out of range.
pub fn check_byte(volume: &Volume, block: usize, pos: usize, strict: bool) -> ByteError {
    assert!(pos < BLOCK_SIZE, "offset {} outside block", pos);
    let block_type = volume.block_type(block);
    match volume.blocks().block(block) {
        Ok(data) => check_data(volume, block_type, data, pos, strict),
        Err(_) => panic!("block {} outside of geometry", block),
    }
}

fn check_data(volume: &Volume, block_type: BlockType, data: &[u8], pos: usize, strict: bool) -> ByteError {
    let refs = References {
        blocks: volume.blocks(),
        strict,
    };
    match block_type {
        BlockType::Unknown | BlockType::Empty => ByteError::OK,
        BlockType::Bam => check_bam_byte(data, pos, strict),
        BlockType::Directory => check_directory_byte(&refs, data, pos),
        BlockType::Data => {
            if !strict {
                return ByteError::OK;
            }
            match pos {
                0 => refs.track(data[0]),
                1 if data[0] == 0 => expect_min(data[1], 1),
                1 => refs.sector(data[0], data[1]),
                _ => ByteError::OK,
            }
        }
    }
}

/// Range checks for links into the geometry of the volume.
struct References<'a> {
    blocks: &'a dyn BlockDevice,
    strict: bool,
}

impl<'a> References<'a> {
    fn track(&self, value: u8) -> ByteError {
        expect_max(value, self.blocks.geometry().num_tracks())
    }

    fn sector(&self, track: u8, value: u8) -> ByteError {
        match self.blocks.geometry().num_sectors(track) {
            0 if self.strict => expect_max(value, 254),
            0 => ByteError::OK,
            sectors => expect_max(value, sectors - 1),
        }
    }
}

#[inline]
fn expect_value(value: u8, expected: u8) -> ByteError {
    if value == expected {
        ByteError::OK
    } else {
        ByteError::new(ErrorKind::ExpectedValue, expected)
    }
}

#[inline]
fn expect_max(value: u8, max: u8) -> ByteError {
    if value <= max {
        ByteError::OK
    } else {
        ByteError::new(ErrorKind::ExpectedSmallerValue, max)
    }
}

#[inline]
fn expect_min(value: u8, min: u8) -> ByteError {
    if value >= min {
        ByteError::OK
    } else {
        ByteError::new(ErrorKind::ExpectedLargerValue, min)
    }
}

fn check_bam_byte(data: &[u8], pos: usize, strict: bool) -> ByteError {
    let value = data[pos];
    let format = &HEADER_FORMAT;
    if pos == format.first_directory_offset {
        return expect_value(value, DISK_FORMAT.directory_track);
    }
    if pos == format.first_directory_offset + 1 {
        return expect_value(value, DISK_FORMAT.first_directory_sector);
    }
    if pos == format.disk_format_type_offset {
        return expect_value(value, DOS_VERSION);
    }
    if pos == format.directory_dos_version_offset {
        return expect_value(value, format.default_directory_dos_version);
    }
    if pos == format.directory_format_type_offset {
        return expect_value(value, format.default_directory_format_type);
    }
    if !strict {
        return ByteError::OK;
    }
    if format.padding_offsets.iter().any(|p| *p as usize == pos) {
        return expect_value(value, PADDING_BYTE);
    }
    if pos >= RESERVED_START {
        return if value == 0 {
            ByteError::OK
        } else {
            ByteError::new(ErrorKind::ReservedNonZero, 0)
        };
    }
    let bam_end = BAM_ENTRY_OFFSET + BAM_TRACKS as usize * BAM_ENTRY_SIZE;
    if pos >= BAM_ENTRY_OFFSET && pos < bam_end && (pos - BAM_ENTRY_OFFSET) % BAM_ENTRY_SIZE == 0 {
        let track = ((pos - BAM_ENTRY_OFFSET) / BAM_ENTRY_SIZE + 1) as u8;
        let entry = BamEntry::from_bytes(data[pos], &data[pos + 1..pos + BAM_ENTRY_SIZE]);
        return expect_value(
            value,
            entry.bitmap_free_sectors(DISK_FORMAT.sectors_in_track(track)),
        );
    }
    ByteError::OK
}

fn check_directory_byte(refs: &References, data: &[u8], pos: usize) -> ByteError {
    match pos {
        0 => return refs.track(data[0]),
        1 if data[0] != 0 => return refs.sector(data[0], data[1]),
        _ => {}
    }

    // Only occupied slots carry references.
    let slot = pos - pos % ENTRY_SIZE;
    if data[slot + 2..slot + ENTRY_SIZE].iter().all(|b| *b == 0) {
        return ByteError::OK;
    }
    let field = pos - slot;
    let linked_sector = |track_field: usize| {
        let track = data[slot + track_field];
        if track == 0 {
            ByteError::OK
        } else {
            refs.sector(track, data[pos])
        }
    };
    match field {
        ENTRY_FIRST_SECTOR_OFFSET | ENTRY_SIDE_SECTOR_OFFSET => refs.track(data[pos]),
        f if f == ENTRY_FIRST_SECTOR_OFFSET + 1 => linked_sector(ENTRY_FIRST_SECTOR_OFFSET),
        f if f == ENTRY_SIDE_SECTOR_OFFSET + 1 => linked_sector(ENTRY_SIDE_SECTOR_OFFSET),
        ENTRY_RECORD_LENGTH_OFFSET => expect_max(data[pos], MAX_RECORD_LENGTH),
        _ => ByteError::OK,
    }
}

/// Compare the BAM against the blocks actually in use.
fn check_bitmap(volume: &Volume, strict: bool) -> (Vec<usize>, Vec<usize>) {
    let mut used_but_unallocated = vec![];
    let mut unused_but_allocated = vec![];
    let bam = match volume.bam() {
        Ok(bam) => bam,
        Err(_) => return (used_but_unallocated, unused_but_allocated),
    };
    let used: HashSet<Location> = volume.used_locations();
    let geometry = volume.blocks().geometry();
    for block in 0..volume.num_blocks() {
        let location = geometry.location_of(block);
        let allocated = match bam.is_free(location) {
            Some(free) => !free,
            None => continue,
        };
        let contained = used.contains(&location);
        if strict && allocated && !contained {
            unused_but_allocated.push(block);
        } else if !allocated && contained {
            used_but_unallocated.push(block);
        }
    }
    (used_but_unallocated, unused_but_allocated)
}

/// Repair a block image by writing every expected value back and bringing
/// the BAM in line with the blocks in use.  Returns the number of bytes and
/// BAM bits changed.
pub fn rectify(blocks: &mut BlockImage, strict: bool) -> io::Result<usize> {
    blocks.check_writability()?;
    let (fixes, report) = {
        let volume = Volume::new(&*blocks);
        let report = check(&volume, strict);
        let mut fixes = vec![];
        for (block, errors) in report.block_errors.iter() {
            for (pos, error) in errors {
                if error.kind != ErrorKind::Ok {
                    fixes.push((*block, *pos, error.expected));
                }
            }
        }
        (fixes, report)
    };
    for (block, pos, value) in fixes.iter() {
        blocks.write_byte(*block, *pos, *value)?;
    }

    let mut count = fixes.len();
    if !report.used_but_unallocated.is_empty() || !report.unused_but_allocated.is_empty() {
        let mut bam = Bam::read(&*blocks)?;
        let geometry = blocks.geometry();
        for block in report.used_but_unallocated.iter() {
            bam.allocate(geometry.location_of(*block))?;
        }
        for block in report.unused_but_allocated.iter() {
            bam.free(geometry.location_of(*block))?;
        }
        bam.write(blocks)?;
        count += report.used_but_unallocated.len() + report.unused_but_allocated.len();
    }
    if count > 0 {
        debug!("rectified {} values", count);
    }
    blocks.flush()?;
    Ok(count)
}
