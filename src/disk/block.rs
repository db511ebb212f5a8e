use std::fmt;
use std::io::{self, Write};

use crate::disk::analyzer::SectorError;
use crate::disk::error::DiskError;
use crate::disk::geometry::{Geometry, Track};
use crate::disk::image::Image;
use crate::util;

pub const BLOCK_SIZE: usize = 256;

/// Read access to a linear sector image: 256-byte blocks addressed by
/// track and sector or by block number, plus the optional table of 1541
/// error codes.
pub trait BlockDevice {
    fn geometry(&self) -> &'static Geometry;
    fn sector(&self, location: Location) -> io::Result<&[u8]>;
    fn error_table(&self) -> Option<&[u8]>;

    #[inline]
    fn num_blocks(&self) -> usize {
        self.geometry().num_blocks()
    }

    fn block(&self, block: usize) -> io::Result<&[u8]> {
        match self.geometry().checked_location_of(block) {
            Some(location) => self.sector(location),
            None => Err(DiskError::InvalidLocation.into()),
        }
    }

    /// Return one byte of a block.  Panics if the block or offset lies
    /// outside the device.
    fn read_byte(&self, block: usize, offset: usize) -> u8 {
        assert!(offset < BLOCK_SIZE, "offset {} outside block", offset);
        match self.block(block) {
            Ok(data) => data[offset],
            Err(_) => panic!("block {} outside of geometry", block),
        }
    }

    /// Return the error code recorded for a location, or `Ok` if the device
    /// carries no error table.
    fn error_code(&self, location: Location) -> SectorError {
        let block = match self.geometry().checked_block_of(location) {
            Some(block) => block,
            None => return SectorError::Ok,
        };
        match self.error_table() {
            Some(table) => SectorError::from_code(table[block]),
            None => SectorError::Ok,
        }
    }

    fn dump(&self, writer: &mut dyn Write) -> io::Result<()> {
        let locations = LocationIterator::from_geometry(self.geometry());
        for location in locations {
            writeln!(writer)?;
            writeln!(writer, "track {:02} sector {:02}", location.0, location.1)?;
            let block = self.sector(location)?;
            writeln!(writer, "{}", util::hex(block))?;
        }
        if let Some(error_table) = self.error_table() {
            writeln!(writer)?;
            writeln!(writer, "Error table:")?;
            let mut index = 0;
            for track in 1..=self.geometry().num_tracks() {
                write!(writer, "track {:02}: ", track)?;
                for _sector in 0..self.geometry().num_sectors(track) {
                    write!(writer, "{:02x} ", error_table[index])?;
                    index += 1;
                }
                writeln!(writer)?;
            }
        }
        Ok(())
    }
}

/// A linear sector image held in an `Image`, such as the contents of a D64
/// file.
pub struct BlockImage {
    image: Image,
    geometry: &'static Geometry,
}

impl BlockImage {
    /// Wrap an image whose size matches `geometry` exactly.
    pub fn new(image: Image, geometry: &'static Geometry) -> io::Result<BlockImage> {
        if image.len() != geometry.size() {
            return Err(DiskError::InvalidLayout.into());
        }
        Ok(BlockImage { image, geometry })
    }

    /// Create a zero-filled in-memory image.  Error tables start out with
    /// every sector marked OK.
    pub fn open_memory(geometry: &'static Geometry) -> BlockImage {
        let mut blocks = BlockImage {
            image: Image::open_memory(geometry.size()),
            geometry,
        };
        if let Ok(Some(table)) = blocks.error_table_mut() {
            for b in table.iter_mut() {
                *b = SectorError::Ok.code();
            }
        }
        blocks
    }

    fn get_offset(&self, location: Location) -> io::Result<usize> {
        match self.geometry.byte_offset(location) {
            Some(offset) => Ok(offset),
            None => Err(DiskError::InvalidLocation.into()),
        }
    }

    #[inline]
    pub fn check_writability(&self) -> io::Result<()> {
        self.image.check_writability()
    }

    pub fn sector_mut(&mut self, location: Location) -> io::Result<&mut [u8]> {
        self.image.check_writability()?;
        let offset = self.get_offset(location)?;
        self.image.slice_mut(offset, BLOCK_SIZE)
    }

    pub fn block_mut(&mut self, block: usize) -> io::Result<&mut [u8]> {
        match self.geometry.checked_location_of(block) {
            Some(location) => self.sector_mut(location),
            None => Err(DiskError::InvalidLocation.into()),
        }
    }

    /// Write a block of data to a specific location.
    pub fn write_sector(&mut self, location: Location, data: &[u8]) -> io::Result<()> {
        if data.len() != BLOCK_SIZE {
            return Err(DiskError::WriteUnderrun.into());
        }
        self.sector_mut(location)?.copy_from_slice(data);
        Ok(())
    }

    pub fn write_byte(&mut self, block: usize, offset: usize, value: u8) -> io::Result<()> {
        if offset >= BLOCK_SIZE {
            return Err(DiskError::InvalidOffset.into());
        }
        self.block_mut(block)?[offset] = value;
        Ok(())
    }

    pub fn error_table_mut(&mut self) -> io::Result<Option<&mut [u8]>> {
        self.image.check_writability()?;
        match self.geometry.error_table_offset() {
            Some(offset) => {
                let length = self.image.len();
                Ok(Some(self.image.slice_mut(offset, length - offset)?))
            }
            None => Ok(None),
        }
    }

    /// Record an error code for a location.  Images without an error table
    /// can only record `Ok`.
    pub fn set_error_code(&mut self, location: Location, error: SectorError) -> io::Result<()> {
        let block = match self.geometry.checked_block_of(location) {
            Some(block) => block,
            None => return Err(DiskError::InvalidLocation.into()),
        };
        match self.error_table_mut()? {
            Some(table) => {
                table[block] = error.code();
                Ok(())
            }
            None if error.is_ok() => Ok(()),
            None => Err(DiskError::UnsupportedContent.into()),
        }
    }

    /// Return the complete image, including any error table.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.image.bytes()
    }

    /// Return an in-memory copy of this image with or without an error
    /// table.  Dropping the table discards its contents; adding one marks
    /// every sector OK.
    pub fn to_geometry(&self, with_error_table: bool) -> BlockImage {
        let geometry = self.geometry.with_error_table(with_error_table);
        let mut copy = BlockImage::open_memory(geometry);
        let data_size = self.geometry.num_blocks() * BLOCK_SIZE;
        if let Ok(bytes) = copy.image.slice_mut(0, data_size) {
            bytes.copy_from_slice(&self.as_bytes()[..data_size]);
        }
        if let (Some(from), Ok(Some(to))) = (self.error_table(), copy.error_table_mut()) {
            to.copy_from_slice(from);
        }
        copy
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.image.check_writability()?;
        self.image.flush()
    }
}

impl BlockDevice for BlockImage {
    #[inline]
    fn geometry(&self) -> &'static Geometry {
        self.geometry
    }

    fn sector(&self, location: Location) -> io::Result<&[u8]> {
        let offset = self.get_offset(location)?;
        self.image.slice(offset, BLOCK_SIZE)
    }

    fn error_table(&self) -> Option<&[u8]> {
        self.geometry
            .error_table_offset()
            .map(|offset| &self.image.bytes()[offset..])
    }
}

impl fmt::Debug for BlockImage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "BlockImage({} tracks, {} blocks{})",
            self.geometry.num_tracks(),
            self.geometry.num_blocks(),
            if self.geometry.has_error_table() {
                ", error table"
            } else {
                ""
            }
        )
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, PartialOrd, Ord)]
pub struct Location(pub u8, pub u8); // Track and sector

impl Location {
    #[inline]
    pub fn new(track: u8, sector: u8) -> Location {
        Location(track, sector)
    }

    pub fn from_bytes(bytes: &[u8]) -> Location {
        assert!(bytes.len() >= 2);
        Location(bytes[0], bytes[1])
    }

    pub fn write_bytes(&self, bytes: &mut [u8]) {
        assert!(bytes.len() >= 2);
        bytes[0] = self.0;
        bytes[1] = self.1;
    }

    pub fn format_locations(locations: &[Location]) -> String {
        locations
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({},{})", self.0, self.1)
    }
}

/// A byte position within a block, such as the slot of a directory entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Position {
    pub location: Location,
    pub offset: u8,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "({},{}@0x{:02x})",
            self.location.0, self.location.1, self.offset
        )
    }
}

/// Iterate over every location of a geometry in block order.
pub struct LocationIterator {
    last_track: u8,
    tracks: &'static [Track],
    next: Option<Location>,
}

impl LocationIterator {
    pub fn from_geometry(geometry: &Geometry) -> LocationIterator {
        const FIRST_TRACK: u8 = 1;
        LocationIterator {
            last_track: geometry.tracks,
            tracks: geometry.track_layouts,
            next: Some(Location::new(FIRST_TRACK, 0)),
        }
    }
}

impl Iterator for LocationIterator {
    type Item = Location;

    fn next(&mut self) -> Option<Location> {
        let location = self.next?;

        let mut next_location = location;
        next_location.1 += 1;
        if next_location.1 >= self.tracks[next_location.0 as usize].sectors {
            next_location.0 += 1;
            next_location.1 = 0;
            if next_location.0 > self.last_track {
                self.next = None;
                return Some(location);
            }
        }
        self.next = Some(next_location);
        Some(location)
    }
}
