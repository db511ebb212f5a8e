use std::fmt;
use std::fmt::Write;
use std::io;

use crate::disk::block::{BlockDevice, BlockImage, Location};
use crate::disk::error::DiskError;
use crate::disk::format::DISK_FORMAT;
use crate::disk::BAM_LOCATION;

/// Offset of the first BAM entry within the BAM block.
pub const BAM_ENTRY_OFFSET: usize = 0x04;
/// Each entry holds a free sector count followed by a three byte bitmap.
pub const BAM_ENTRY_SIZE: usize = 4;
/// The 1541 BAM only covers the standard 35 tracks.
pub const BAM_TRACKS: u8 = 35;

#[derive(Clone, Copy, Default, PartialEq)]
pub struct BamEntry {
    pub free_sectors: u8,
    pub sector_map: u32,
}

impl BamEntry {
    pub fn new(sectors: u8) -> BamEntry {
        let mut map = 0;
        for _ in 0..sectors {
            map = (map << 1) | 1;
        }
        BamEntry {
            free_sectors: sectors,
            sector_map: map,
        }
    }

    pub fn from_bytes(free_sectors: u8, bitmap: &[u8]) -> BamEntry {
        let mut sector_map: u32 = 0;
        for i in 0..bitmap.len() {
            let byte = bitmap.len() - i - 1;
            sector_map = (sector_map << 8) | bitmap[byte] as u32;
        }

        BamEntry {
            free_sectors,
            sector_map,
        }
    }

    pub fn write_bitmap(&self, bitmap: &mut [u8]) {
        let mut sector_map = self.sector_map;
        for output_byte_ref in bitmap.iter_mut() {
            *output_byte_ref = (sector_map & 0xFF) as u8;
            sector_map >>= 8;
        }
    }

    #[inline]
    pub fn has_availability(&self) -> bool {
        self.free_sectors > 0
    }

    #[inline]
    pub fn sector_map(&self) -> u32 {
        self.sector_map
    }

    #[inline]
    pub fn is_free(&self, sector: u8) -> bool {
        (self.sector_map >> sector) & 1 == 1
    }

    /// The number of free sectors according to the bitmap, which may
    /// disagree with the stored `free_sectors` count on a damaged disk.
    #[inline]
    pub fn bitmap_free_sectors(&self, sectors: u8) -> u8 {
        let mask = if sectors >= 32 {
            !0
        } else {
            (1u32 << sectors) - 1
        };
        (self.sector_map & mask).count_ones() as u8
    }

    #[inline]
    pub fn allocate(&mut self, sector: u8) {
        self.sector_map &= !(1u32 << sector);
        self.update_free_sectors();
    }

    #[inline]
    pub fn free(&mut self, sector: u8) {
        self.sector_map |= 1u32 << sector;
        self.update_free_sectors();
    }

    fn update_free_sectors(&mut self) {
        self.free_sectors = self.sector_map.count_ones() as u8;
    }
}

/// The Block Availability Map of a 1541 disk, as stored in block (18,0).
#[derive(Clone)]
pub struct Bam {
    entries: Vec<BamEntry>,
}

impl Bam {
    /// A BAM with every sector free.
    pub fn new() -> Bam {
        let entries = (1..=BAM_TRACKS)
            .map(|track| BamEntry::new(DISK_FORMAT.sectors_in_track(track)))
            .collect();
        Bam { entries }
    }

    pub fn read(blocks: &dyn BlockDevice) -> io::Result<Bam> {
        let block = blocks.sector(BAM_LOCATION)?;
        let entries = (0..BAM_TRACKS as usize)
            .map(|i| {
                let offset = BAM_ENTRY_OFFSET + i * BAM_ENTRY_SIZE;
                BamEntry::from_bytes(block[offset], &block[offset + 1..offset + BAM_ENTRY_SIZE])
            })
            .collect();
        Ok(Bam { entries })
    }

    /// Render the BAM entries into the BAM block, leaving the header fields
    /// that share the block untouched.
    pub fn write(&self, blocks: &mut BlockImage) -> io::Result<()> {
        let mut block = blocks.sector(BAM_LOCATION)?.to_vec();
        for (i, entry) in self.entries.iter().enumerate() {
            let offset = BAM_ENTRY_OFFSET + i * BAM_ENTRY_SIZE;
            block[offset] = entry.free_sectors;
            entry.write_bitmap(&mut block[offset + 1..offset + BAM_ENTRY_SIZE]);
        }
        blocks.write_sector(BAM_LOCATION, &block)
    }

    /// Return the number of blocks free on the disk image, sans any
    /// unallocated directory blocks. This is equivalent to the "blocks
    /// free" output at the bottom of a directory listing. The number of
    /// free blocks is calculated based on the BAM entry free_sectors field.
    /// It is not based on the allocation bitmaps, nor is it based on the file
    /// usage as embedded in directory entries.
    pub fn blocks_free(&self) -> usize {
        self.entries
            .iter()
            .enumerate()
            .filter(|(i, _)| *i + 1 != DISK_FORMAT.directory_track as usize)
            .map(|(_, entry)| entry.free_sectors as usize)
            .sum()
    }

    pub fn num_tracks(&self) -> u8 {
        self.entries.len() as u8
    }

    pub fn entry(&self, track: u8) -> io::Result<&BamEntry> {
        self.check_track(track)?;
        Ok(&self.entries[(track - 1) as usize])
    }

    pub fn entry_mut(&mut self, track: u8) -> io::Result<&mut BamEntry> {
        self.check_track(track)?;
        Ok(&mut self.entries[(track - 1) as usize])
    }

    /// Return whether the location is marked free, or None if the location
    /// lies outside the tracks covered by the BAM.
    pub fn is_free(&self, location: Location) -> Option<bool> {
        let Location(track, sector) = location;
        if track == 0 || track > self.num_tracks() {
            return None;
        }
        if sector >= DISK_FORMAT.sectors_in_track(track) {
            return None;
        }
        Some(self.entries[(track - 1) as usize].is_free(sector))
    }

    pub fn allocate(&mut self, location: Location) -> io::Result<()> {
        self.check_location(location)?;
        self.entry_mut(location.0)?.allocate(location.1);
        Ok(())
    }

    pub fn free(&mut self, location: Location) -> io::Result<()> {
        self.check_location(location)?;
        self.entry_mut(location.0)?.free(location.1);
        Ok(())
    }

    pub fn next_free_block(&self, previous: Option<Location>) -> io::Result<Location> {
        DISK_FORMAT.next_free_block(self, previous)
    }

    fn check_track(&self, track: u8) -> io::Result<()> {
        if track == 0 || track > self.num_tracks() {
            Err(DiskError::InvalidLocation.into())
        } else {
            Ok(())
        }
    }

    fn check_location(&self, location: Location) -> io::Result<()> {
        self.check_track(location.0)?;
        if location.1 >= DISK_FORMAT.sectors_in_track(location.0) {
            return Err(DiskError::InvalidLocation.into());
        }
        Ok(())
    }

    fn locations_where(&self, free: bool) -> Vec<Location> {
        let mut locations = vec![];
        for (i, entry) in self.entries.iter().enumerate() {
            let track = i as u8 + 1;
            for sector in 0..DISK_FORMAT.sectors_in_track(track) {
                if entry.is_free(sector) == free {
                    locations.push(Location::new(track, sector));
                }
            }
        }
        locations
    }

    pub fn allocated_sectors(&self) -> Vec<Location> {
        self.locations_where(false)
    }

    pub fn free_sectors(&self) -> Vec<Location> {
        self.locations_where(true)
    }
}

impl Default for Bam {
    fn default() -> Bam {
        Bam::new()
    }
}

impl fmt::Debug for Bam {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            let track = i as u8 + 1;
            let sectors = DISK_FORMAT.sectors_in_track(track);
            write!(
                f,
                "t{:02}: [{:02}/{:02}] ",
                track, entry.free_sectors, sectors
            )?;
            for sector in 0..sectors {
                let c: char = if entry.is_free(sector) { '.' } else { 'x' };
                f.write_char(c)?;
            }
            f.write_char('\n')?;
        }
        writeln!(f, "{} blocks free.", self.blocks_free())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #[allow(unused_imports)]
    use super::*;
    use crate::disk::geometry::Geometry;

    #[test]
    fn test_bam_entry() {
        let bytes: [u8; 4] = [0x12, 0xFF, 0xF9, 0x17];
        let bam_entry = super::BamEntry::from_bytes(bytes[0], &bytes[1..4]);
        assert_eq!(bam_entry.free_sectors, 0x12);
        assert_eq!(bam_entry.sector_map, 0x17F9FF);
        assert_eq!(bam_entry.bitmap_free_sectors(21), 18);
        assert!(bam_entry.is_free(0));
        assert!(!bam_entry.is_free(9));

        let mut out = [0u8; 3];
        bam_entry.write_bitmap(&mut out);
        assert_eq!(out, [0xFF, 0xF9, 0x17]);
    }

    #[test]
    fn test_fresh_bam() {
        let bam = Bam::new();
        assert_eq!(bam.blocks_free(), 664);
        assert_eq!(bam.free_sectors().len(), 683);
        assert!(bam.allocated_sectors().is_empty());
        assert_eq!(bam.is_free(Location(18, 0)), Some(true));
        assert_eq!(bam.is_free(Location(36, 0)), None);
        assert_eq!(bam.is_free(Location(18, 19)), None);
    }

    #[test]
    fn test_allocate_and_write() {
        let mut blocks = BlockImage::open_memory(Geometry::standard(35, false).unwrap());
        let mut bam = Bam::new();
        bam.allocate(Location(1, 0)).unwrap();
        bam.allocate(Location(1, 20)).unwrap();
        assert!(bam.allocate(Location(1, 21)).is_err());
        assert_eq!(bam.entry(1).unwrap().free_sectors, 19);
        bam.write(&mut blocks).unwrap();

        let block = blocks.sector(Location(18, 0)).unwrap();
        assert_eq!(&block[4..8], &[19, 0xFE, 0xFF, 0x0F]);

        let bam = Bam::read(&blocks).unwrap();
        assert_eq!(bam.is_free(Location(1, 0)), Some(false));
        assert_eq!(bam.is_free(Location(1, 1)), Some(true));
        assert_eq!(
            bam.allocated_sectors(),
            vec![Location(1, 0), Location(1, 20)]
        );
        assert_eq!(bam.blocks_free(), 662);
    }
}
