use std::fmt;
use std::io;

use log::{debug, trace};

use crate::disk::analyzer::{self, SectorError, SectorInfo, TrackAnalysis};
use crate::disk::analyzer::{DATA_BLOCK_ID, HEADER_BLOCK_ID};
use crate::disk::bitstream::{Bitstream, FILLER_BYTE};
use crate::disk::block::{BlockDevice, BlockImage, Location, BLOCK_SIZE};
use crate::disk::error::DiskError;
use crate::disk::geometry::{self, Geometry, HALFTRACKS, MAX_TRACKS};
use crate::disk::{BAM_BLOCK, DISK_ID_OFFSET, DISK_NAME_OFFSET, DISK_NAME_SIZE, PADDING_BYTE};
use crate::petscii::Petscii;
use crate::util;

/// Length of the SYNC marks written in front of every block.
const SYNC_BITS: usize = 40;
/// Number of filler bytes between a header block and its data block.
const HEADER_GAP: usize = 9;

/// A 1541 disk at the bitstream level: one GCR bitstream per halftrack, each
/// with a lazily computed sector analysis.  Any write to a halftrack drops
/// its analysis.
pub struct DiskImage {
    halftracks: Vec<Bitstream>,
    decoded: Vec<Option<DecodedTrack>>,
    blank: Vec<bool>,
    write_protected: bool,
}

/// The analysis of a halftrack and the sector data it yields.
struct DecodedTrack {
    analysis: TrackAnalysis,
    data: Vec<Option<Vec<u8>>>,
}

impl DecodedTrack {
    fn new(bits: &Bitstream, halftrack: usize) -> DecodedTrack {
        let analysis = analyzer::analyze(bits, halftrack);
        let data = (0..analysis.num_sectors())
            .map(|sector| analyzer::sector_data(bits, &analysis, sector))
            .collect();
        DecodedTrack { analysis, data }
    }

    fn sector(&self, sector: usize) -> Option<&[u8]> {
        self.data.get(sector).and_then(|data| data.as_deref())
    }
}

impl Default for DiskImage {
    fn default() -> DiskImage {
        DiskImage::new()
    }
}

impl DiskImage {
    /// Return an unformatted disk: every halftrack is cleared.
    pub fn new() -> DiskImage {
        DiskImage {
            halftracks: vec![Bitstream::cleared(); HALFTRACKS],
            decoded: (0..HALFTRACKS).map(|_| None).collect(),
            blank: vec![true; HALFTRACKS],
            write_protected: false,
        }
    }

    /// Return true if the disk's write-protect notch is covered.
    #[inline]
    pub fn has_protected_disk(&self) -> bool {
        self.write_protected
    }

    #[inline]
    pub fn set_write_protected(&mut self, write_protected: bool) {
        self.write_protected = write_protected;
    }

    fn check_writability(&self) -> io::Result<()> {
        if self.write_protected {
            Err(DiskError::ReadOnly.into())
        } else {
            Ok(())
        }
    }

    pub fn halftrack(&self, halftrack: usize) -> &Bitstream {
        geometry::assert_halftrack(halftrack);
        &self.halftracks[halftrack - 1]
    }

    #[inline]
    pub fn halftrack_len(&self, halftrack: usize) -> usize {
        self.halftrack(halftrack).len()
    }

    #[inline]
    pub fn is_halftrack_empty(&self, halftrack: usize) -> bool {
        geometry::assert_halftrack(halftrack);
        self.blank[halftrack - 1]
    }

    pub fn is_track_empty(&self, track: u8) -> bool {
        self.is_halftrack_empty(geometry::halftrack_of(track))
    }

    /// Return the highest track holding anything but filler, if any.
    pub fn highest_nonempty_track(&self) -> Option<u8> {
        (1..=MAX_TRACKS).rev().find(|&t| !self.is_track_empty(t))
    }

    /// Return the layout of the sector image this disk decodes to: 35, 40,
    /// or 42 tracks, depending on the highest track in use.
    pub fn geometry(&self) -> &'static Geometry {
        let tracks = match self.highest_nonempty_track() {
            Some(t) if t > 40 => 42,
            Some(t) if t > 35 => 40,
            _ => 35,
        };
        match Geometry::standard(tracks, false) {
            Some(geometry) => geometry,
            None => unreachable!("standard geometries exist for 35, 40, and 42 tracks"),
        }
    }

    #[inline]
    pub fn num_cyls(&self) -> u8 {
        self.geometry().num_cyls()
    }

    #[inline]
    pub fn num_heads(&self) -> u8 {
        self.geometry().num_heads()
    }

    #[inline]
    pub fn num_tracks(&self) -> u8 {
        self.geometry().num_tracks()
    }

    #[inline]
    pub fn num_sectors(&self, track: u8) -> u8 {
        self.geometry().num_sectors(track)
    }

    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.geometry().num_blocks()
    }

    /// Replace the contents of a halftrack.
    pub fn set_halftrack(&mut self, halftrack: usize, bits: Bitstream) -> io::Result<()> {
        geometry::assert_halftrack(halftrack);
        self.check_writability()?;
        self.blank[halftrack - 1] = bits.is_blank();
        self.halftracks[halftrack - 1] = bits;
        self.decoded[halftrack - 1] = None;
        Ok(())
    }

    /// Fill a halftrack with filler bytes at the maximum track length.
    pub fn clear_halftrack(&mut self, halftrack: usize) -> io::Result<()> {
        self.set_halftrack(halftrack, Bitstream::cleared())
    }

    /// Change a single bit of a halftrack.
    pub fn set_bit(&mut self, halftrack: usize, position: usize, bit: bool) -> io::Result<()> {
        geometry::assert_halftrack(halftrack);
        self.check_writability()?;
        let bits = &mut self.halftracks[halftrack - 1];
        bits.set_bit(position, bit);
        self.blank[halftrack - 1] = bits.is_blank();
        self.decoded[halftrack - 1] = None;
        Ok(())
    }

    /// Return true if the halftrack's analysis is cached.
    pub fn is_analyzed(&self, halftrack: usize) -> bool {
        geometry::assert_halftrack(halftrack);
        self.decoded[halftrack - 1].is_some()
    }

    fn decoded_track(&mut self, halftrack: usize) -> &DecodedTrack {
        geometry::assert_halftrack(halftrack);
        let index = halftrack - 1;
        let bits = &self.halftracks[index];
        self.decoded[index].get_or_insert_with(|| DecodedTrack::new(bits, halftrack))
    }

    /// Analyze a halftrack, or return the cached analysis if it has not been
    /// written to since.
    pub fn analyze_halftrack(&mut self, halftrack: usize) -> &TrackAnalysis {
        &self.decoded_track(halftrack).analysis
    }

    pub fn sector_info(&mut self, halftrack: usize, sector: usize) -> SectorInfo {
        self.analyze_halftrack(halftrack).sector_info(sector)
    }

    /// Return the data of a sector as decoded from its track, or `None` if
    /// no data block was found.
    pub fn sector_data(&mut self, location: Location) -> Option<Vec<u8>> {
        let halftrack = geometry::halftrack_of(location.0);
        self.decoded_track(halftrack)
            .sector(location.1 as usize)
            .map(|data| data.to_vec())
    }

    /// Return one byte of a block, decoded from the bitstream.  Sectors that
    /// cannot be found read as zero.  Panics if the block or offset lies
    /// outside the disk.
    pub fn read_byte(&mut self, block: usize, offset: usize) -> u8 {
        assert!(offset < BLOCK_SIZE, "offset {} outside block", offset);
        let location = self.geometry().location_of(block);
        self.decoded_track(geometry::halftrack_of(location.0))
            .sector(location.1 as usize)
            .map_or(0, |data| data[offset])
    }

    /// Render the bits of a halftrack as '0' and '1' characters.
    pub fn track_bits_as_string(&self, halftrack: usize) -> String {
        self.halftrack(halftrack).as_string()
    }

    /// Render the header block of a sector in hex or decimal.
    pub fn sector_header_bytes_as_string(&mut self, halftrack: usize, sector: usize, hex: bool) -> String {
        let info = self.sector_info(halftrack, sector);
        let bytes = analyzer::header_block_bytes(self.halftrack(halftrack), &info);
        util::bytes_as_string(&bytes, hex)
    }

    /// Render the data block of a sector in hex or decimal.
    pub fn sector_data_bytes_as_string(&mut self, halftrack: usize, sector: usize, hex: bool) -> String {
        let info = self.sector_info(halftrack, sector);
        let bytes = analyzer::data_block_bytes(self.halftrack(halftrack), &info);
        util::bytes_as_string(&bytes, hex)
    }

    /// Return the disk name recorded in the BAM, if its sector can be read.
    pub fn disk_name(&mut self) -> Option<Petscii> {
        let bam = self.sector_data(Location(18, 0))?;
        Some(Petscii::from_padded_bytes(
            &bam[DISK_NAME_OFFSET..DISK_NAME_OFFSET + DISK_NAME_SIZE],
            PADDING_BYTE,
        ))
    }

    /// Write the sectors of a linear image onto a fresh disk, the way a
    /// 1541 formats and writes them.  Error codes found in the image's error
    /// table are reproduced as the corresponding damage.
    pub fn from_blocks(blocks: &dyn BlockDevice) -> io::Result<DiskImage> {
        let mut disk = DiskImage::new();
        for halftrack in 1..=HALFTRACKS {
            let zone = geometry::halftrack_speed_zone(halftrack);
            disk.halftracks[halftrack - 1] = Bitstream::filled(geometry::track_bit_length(zone));
        }

        let bam = blocks.block(BAM_BLOCK)?;
        let (id1, id2) = (bam[DISK_ID_OFFSET], bam[DISK_ID_OFFSET + 1]);

        let geometry = blocks.geometry();
        for track in 1..=geometry.num_tracks() {
            let zone = geometry::speed_zone(track);
            let gap = geometry::tail_gap(zone);
            let bits = &mut disk.halftracks[geometry::halftrack_of(track) - 1];
            let mut position = 0;
            for sector in 0..geometry.num_sectors(track) {
                let location = Location(track, sector);
                let error = blocks.error_code(location);
                if !error.is_ok() {
                    trace!("encoding {} with error {}", location, error);
                }
                let header = EncodedHeader {
                    track,
                    sector,
                    id1,
                    id2,
                };
                position = encode_sector(bits, position, &header, blocks.sector(location)?, error, gap);
            }
        }
        disk.blank = disk.halftracks.iter().map(Bitstream::is_blank).collect();
        debug!("encoded {} tracks", geometry.num_tracks());
        Ok(disk)
    }

    /// Decode every sector of the disk into a linear image.  Sectors that
    /// cannot be read are zero-filled; the image carries an error table if
    /// any sector is damaged.
    pub fn decode_blocks(&mut self) -> io::Result<BlockImage> {
        let geometry = self.geometry().with_error_table(true);
        let mut blocks = BlockImage::open_memory(geometry);
        let mut headers = Vec::with_capacity(geometry.num_blocks());

        for track in 1..=geometry.num_tracks() {
            let decoded = self.decoded_track(geometry::halftrack_of(track));
            for sector in 0..geometry.num_sectors(track) {
                let location = Location(track, sector);
                if let Some(data) = decoded.sector(sector as usize) {
                    blocks.write_sector(location, data)?;
                }
                let analysis = &decoded.analysis;
                blocks.set_error_code(location, analysis.status(sector as usize))?;
                headers.push(analysis.header(sector as usize));
            }
        }

        // Compare every readable header against the ID stored in the BAM.
        if blocks.error_code(Location(18, 0)).is_ok() {
            let bam = blocks.block(BAM_BLOCK)?;
            let (id1, id2) = (bam[DISK_ID_OFFSET], bam[DISK_ID_OFFSET + 1]);
            for (block, header) in headers.iter().enumerate() {
                let location = geometry.location_of(block);
                if let Some(header) = header {
                    if blocks.error_code(location).is_ok() && (header.id1, header.id2) != (id1, id2) {
                        blocks.set_error_code(location, SectorError::IdMismatch)?;
                    }
                }
            }
        }

        let damaged = blocks
            .error_table()
            .map(|table| table.iter().filter(|&&code| !SectorError::from_code(code).is_ok()).count())
            .unwrap_or(0);
        debug!(
            "decoded {} tracks, {} damaged sectors",
            geometry.num_tracks(),
            damaged
        );
        if damaged == 0 {
            Ok(blocks.to_geometry(false))
        } else {
            Ok(blocks)
        }
    }
}

impl fmt::Debug for DiskImage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let used = self.halftracks.iter().filter(|t| !t.is_blank()).count();
        write!(
            f,
            "DiskImage({} halftracks in use{})",
            used,
            if self.write_protected {
                ", write protected"
            } else {
                ""
            }
        )
    }
}

struct EncodedHeader {
    track: u8,
    sector: u8,
    id1: u8,
    id2: u8,
}

/// Write one sector at `position` and return the position following it.
fn encode_sector(
    bits: &mut Bitstream,
    position: usize,
    header: &EncodedHeader,
    data: &[u8],
    error: SectorError,
    tail_gap: usize,
) -> usize {
    let sync = error != SectorError::NoSync;
    let (id1, id2) = if error == SectorError::IdMismatch {
        (header.id1 ^ 0xFF, header.id2 ^ 0xFF)
    } else {
        (header.id1, header.id2)
    };
    let mut header_checksum = id1 ^ id2 ^ header.track ^ header.sector;
    if error == SectorError::HeaderChecksum {
        header_checksum ^= 0xFF;
    }
    let header_id = if error == SectorError::HeaderNotFound {
        0x00
    } else {
        HEADER_BLOCK_ID
    };
    let data_id = if error == SectorError::DataNotFound {
        0x00
    } else {
        DATA_BLOCK_ID
    };
    let mut data_checksum = data.iter().fold(0, |acc, b| acc ^ b);
    if error == SectorError::DataChecksum {
        data_checksum ^= 0xFF;
    }

    let mut writer = bits.writer(position);
    writer.write_run(sync, SYNC_BITS);
    writer.write_gcr_bytes(&[
        header_id,
        header_checksum,
        header.sector,
        header.track,
        id2,
        id1,
        0x0F,
        0x0F,
    ]);
    for _ in 0..HEADER_GAP {
        writer.write_raw(FILLER_BYTE);
    }
    writer.write_run(sync, SYNC_BITS);
    writer.write_gcr(data_id);
    writer.write_gcr_bytes(data);
    writer.write_gcr_bytes(&[data_checksum, 0x00, 0x00]);
    for _ in 0..tail_gap {
        writer.write_raw(FILLER_BYTE);
    }
    writer.position()
}
