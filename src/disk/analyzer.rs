//! Locate and verify the sectors recorded on a GCR halftrack.
//!
//! The analyzer scans one revolution of a track for SYNC marks, decodes the
//! block ID that follows each of them, and pairs every header block with the
//! data block that follows it.  Damage is never fatal: bad checksums, invalid
//! GCR codes, and missing blocks are recorded as `TrackError`s with the bit
//! range they cover, and the affected sectors are flagged with the matching
//! 1541 error code.
//!
//! Bit ranges follow a sentinel convention: a `SectorInfo` whose begin and
//! end positions are equal does not exist on the track.  All positions are
//! reduced modulo the track length, so a range whose begin lies after its
//! end wraps around the end of the track (see `highlight_ranges`).

use std::collections::HashSet;
use std::fmt;
use std::ops::RangeInclusive;

use log::{debug, trace};

use crate::disk::bitstream::Bitstream;
use crate::disk::gcr::{self, GcrDecodeError, GCR_BYTE_BITS};
use crate::disk::geometry::{self, track_of_halftrack};

/// Block ID introducing a sector header.
pub const HEADER_BLOCK_ID: u8 = 0x08;
/// Block ID introducing a sector's data.
pub const DATA_BLOCK_ID: u8 = 0x07;
/// Bits covered by a header block: ID, checksum, sector, track, two ID
/// bytes, and two 0x0F filler bytes.
pub const HEADER_BLOCK_BITS: usize = 8 * GCR_BYTE_BITS;
/// Bits covered by a data block: ID, 256 data bytes, checksum, and two
/// 0x00 filler bytes.
pub const DATA_BLOCK_BITS: usize = 260 * GCR_BYTE_BITS;

/// The bit ranges a sector occupies on a halftrack.  Equal begin and end
/// positions mean the block is absent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SectorInfo {
    pub header_begin: usize,
    pub header_end: usize,
    pub data_begin: usize,
    pub data_end: usize,
}

impl SectorInfo {
    #[inline]
    pub fn has_header(&self) -> bool {
        self.header_begin != self.header_end
    }

    #[inline]
    pub fn has_data(&self) -> bool {
        self.data_begin != self.data_end
    }

    pub fn header_ranges(&self, track_length: usize) -> Vec<RangeInclusive<usize>> {
        highlight_ranges(self.header_begin, self.header_end, track_length)
    }

    pub fn data_ranges(&self, track_length: usize) -> Vec<RangeInclusive<usize>> {
        highlight_ranges(self.data_begin, self.data_end, track_length)
    }
}

/// Split a bit range on a track of `track_length` bits into the inclusive
/// ranges a display must highlight.  Equal positions yield nothing; a range
/// that wraps (`begin > end`) yields `[0, end]` followed by
/// `[begin, track_length - 1]`.
pub fn highlight_ranges(begin: usize, end: usize, track_length: usize) -> Vec<RangeInclusive<usize>> {
    if begin == end || track_length == 0 {
        vec![]
    } else if begin > end {
        vec![0..=end, begin..=track_length - 1]
    } else {
        vec![begin..=end]
    }
}

/// The 1541 job codes a sector read can produce, as stored in D64 error
/// tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SectorError {
    Ok,
    HeaderNotFound,
    NoSync,
    DataNotFound,
    DataChecksum,
    HeaderChecksum,
    IdMismatch,
    /// Any other code found in an error table.  Encoded like `Ok`.
    Other(u8),
}

impl SectorError {
    pub fn from_code(code: u8) -> SectorError {
        use self::SectorError::*;
        match code {
            0x00 | 0x01 => Ok,
            0x02 => HeaderNotFound,
            0x03 => NoSync,
            0x04 => DataNotFound,
            0x05 => DataChecksum,
            0x09 => HeaderChecksum,
            0x0B => IdMismatch,
            code => Other(code),
        }
    }

    pub fn code(&self) -> u8 {
        use self::SectorError::*;
        match *self {
            Ok => 0x01,
            HeaderNotFound => 0x02,
            NoSync => 0x03,
            DataNotFound => 0x04,
            DataChecksum => 0x05,
            HeaderChecksum => 0x09,
            IdMismatch => 0x0B,
            Other(code) => code,
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        *self == SectorError::Ok
    }
}

impl fmt::Display for SectorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::SectorError::*;
        let text = match *self {
            Ok => "ok",
            HeaderNotFound => "header block not found",
            NoSync => "no sync mark",
            DataNotFound => "data block not found",
            DataChecksum => "data block checksum error",
            HeaderChecksum => "header block checksum error",
            IdMismatch => "disk ID mismatch",
            Other(_) => "unknown error",
        };
        write!(f, "{:02} {}", self.code(), text)
    }
}

/// The fields of a decoded header block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SectorHeader {
    pub checksum: u8,
    pub sector: u8,
    pub track: u8,
    pub id2: u8,
    pub id1: u8,
}

impl SectorHeader {
    #[inline]
    pub fn computed_checksum(&self) -> u8 {
        self.id1 ^ self.id2 ^ self.track ^ self.sector
    }

    #[inline]
    pub fn checksum_ok(&self) -> bool {
        self.checksum == self.computed_checksum()
    }
}

/// A diagnostic produced while analyzing a halftrack, with the bit range it
/// refers to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackError {
    pub message: String,
    pub first_bit: usize,
    pub last_bit: usize,
}

impl fmt::Display for TrackError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}..{}] {}", self.first_bit, self.last_bit, self.message)
    }
}

/// The result of analyzing one halftrack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackAnalysis {
    halftrack: usize,
    length: usize,
    sectors: Vec<SectorInfo>,
    headers: Vec<Option<SectorHeader>>,
    status: Vec<SectorError>,
    errors: Vec<TrackError>,
}

impl TrackAnalysis {
    #[inline]
    pub fn halftrack(&self) -> usize {
        self.halftrack
    }

    /// The bit length of the analyzed track.
    #[inline]
    pub fn track_length(&self) -> usize {
        self.length
    }

    /// The number of sectors a track at this position should carry.
    #[inline]
    pub fn num_sectors(&self) -> usize {
        self.sectors.len()
    }

    /// Return the location of a sector.  Sectors beyond the zone table
    /// report the "not present" sentinel.
    pub fn sector_info(&self, sector: usize) -> SectorInfo {
        self.sectors.get(sector).cloned().unwrap_or_default()
    }

    #[inline]
    pub fn sectors(&self) -> &[SectorInfo] {
        &self.sectors
    }

    pub fn header(&self, sector: usize) -> Option<SectorHeader> {
        self.headers.get(sector).cloned().unwrap_or(None)
    }

    pub fn status(&self, sector: usize) -> SectorError {
        self.status
            .get(sector)
            .cloned()
            .unwrap_or(SectorError::HeaderNotFound)
    }

    #[inline]
    pub fn errors(&self) -> &[TrackError] {
        &self.errors
    }

    #[inline]
    pub fn num_errors(&self) -> usize {
        self.errors.len()
    }

    /// Return true if every sector was found intact.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn log(&mut self, message: String, begin: usize, length: usize) {
        debug!("halftrack {}: {}", self.halftrack, message);
        let first_bit = begin % self.length.max(1);
        let last_bit = (begin + length) % self.length.max(1);
        self.errors.push(TrackError {
            message,
            first_bit,
            last_bit,
        });
    }
}

/// Decode `count` consecutive GCR bytes starting at `position`.
fn decode_bytes(track: &Bitstream, position: usize, count: usize) -> Result<Vec<u8>, GcrDecodeError> {
    (0..count)
        .map(|i| track.read_gcr_byte(position + i * GCR_BYTE_BITS))
        .collect()
}

/// Decode `count` GCR bytes, substituting zero for undecodable ones.
fn decode_bytes_lossy(track: &Bitstream, position: usize, count: usize) -> Vec<u8> {
    (0..count)
        .map(|i| track.read_gcr_byte(position + i * GCR_BYTE_BITS).unwrap_or(0))
        .collect()
}

fn decode_header(track: &Bitstream, begin: usize) -> Result<SectorHeader, GcrDecodeError> {
    let bytes = decode_bytes(track, begin + GCR_BYTE_BITS, 5)?;
    Ok(SectorHeader {
        checksum: bytes[0],
        sector: bytes[1],
        track: bytes[2],
        id2: bytes[3],
        id1: bytes[4],
    })
}

/// Analyze the sectors recorded on `track`, which is stored at `halftrack`.
pub fn analyze(track: &Bitstream, halftrack: usize) -> TrackAnalysis {
    let max_sectors = geometry::sectors_on_track(track_of_halftrack(halftrack)) as usize;
    let length = track.len();
    let mut analysis = TrackAnalysis {
        halftrack,
        length,
        sectors: vec![SectorInfo::default(); max_sectors],
        headers: vec![None; max_sectors],
        status: vec![SectorError::Ok; max_sectors],
        errors: vec![],
    };

    // Scan two revolutions so that blocks straddling the end of the track
    // are seen in one piece.
    let limit = (2 * length).saturating_sub(GCR_BYTE_BITS);
    let syncs: Vec<usize> = gcr::sync_positions(track.iter_twice())
        .take_while(|&p| p < limit)
        .collect();
    trace!("halftrack {}: {} sync marks", halftrack, syncs.len());

    let is_header = |p: usize| track.read_gcr_byte(p) == Ok(HEADER_BLOCK_ID);
    let start = match syncs.iter().cloned().find(|&p| p < length && is_header(p)) {
        Some(start) => start,
        None => {
            analysis.log(
                "This track contains no sector header block.".to_string(),
                0,
                length,
            );
            let status = if syncs.is_empty() {
                SectorError::NoSync
            } else {
                SectorError::HeaderNotFound
            };
            analysis.status = vec![status; max_sectors];
            return analysis;
        }
    };

    // Walk one revolution, assigning each data block to the header that
    // precedes it.
    let mut seen = HashSet::new();
    let mut current: Option<usize> = None;
    for &p in syncs.iter().filter(|&&p| p >= start && p < start + length) {
        let index = track.wrap(p);
        match track.read_gcr_byte(p) {
            Ok(HEADER_BLOCK_ID) => {
                let sector = track.read_gcr_byte(p + 2 * GCR_BYTE_BITS);
                let sector = match sector {
                    Ok(sector) => sector,
                    Err(_) => {
                        analysis.log(
                            format!("Header block at index {} contains an invalid GCR code.", index),
                            p,
                            HEADER_BLOCK_BITS,
                        );
                        current = None;
                        continue;
                    }
                };
                if !seen.insert(sector) {
                    trace!("halftrack {}: sector {} seen again at {}", halftrack, sector, p);
                    break;
                }
                if sector as usize >= max_sectors {
                    analysis.log(
                        format!(
                            "Header block at index {} contains an invalid sector number ({}).",
                            index, sector
                        ),
                        p,
                        HEADER_BLOCK_BITS,
                    );
                    current = None;
                    continue;
                }
                trace!("halftrack {}: header of sector {} at {}", halftrack, sector, p);
                let info = &mut analysis.sectors[sector as usize];
                info.header_begin = track.wrap(p);
                info.header_end = track.wrap(p + HEADER_BLOCK_BITS);
                current = Some(sector as usize);
            }
            Ok(DATA_BLOCK_ID) => match current.take() {
                Some(sector) => {
                    trace!("halftrack {}: data of sector {} at {}", halftrack, sector, p);
                    let info = &mut analysis.sectors[sector];
                    info.data_begin = track.wrap(p);
                    info.data_end = track.wrap(p + DATA_BLOCK_BITS);
                }
                None => analysis.log(
                    format!("Data block at index {} has no preceding header block.", index),
                    p,
                    DATA_BLOCK_BITS,
                ),
            },
            Ok(id) => analysis.log(
                format!(
                    "Invalid sector ID {:02X} at index {}. Should be 0x07 or 0x08.",
                    id, index
                ),
                p,
                GCR_BYTE_BITS,
            ),
            Err(_) => analysis.log(
                format!("Invalid GCR code at index {}.", index),
                p,
                GCR_BYTE_BITS,
            ),
        }
    }

    for sector in 0..max_sectors {
        let status = check_sector(&mut analysis, track, sector, &syncs);
        analysis.status[sector] = status;
    }
    analysis
}

/// Verify one sector's blocks, logging any damage, and return the resulting
/// error code.
fn check_sector(
    analysis: &mut TrackAnalysis,
    track: &Bitstream,
    sector: usize,
    syncs: &[usize],
) -> SectorError {
    let info = analysis.sectors[sector];
    if !info.has_header() && !info.has_data() {
        analysis.log(format!("Sector {} is missing.", sector), 0, 0);
        return if slot_has_sync(analysis, syncs, sector) {
            SectorError::HeaderNotFound
        } else {
            SectorError::NoSync
        };
    }
    if !info.has_header() {
        analysis.log(format!("Sector {} has no header block.", sector), 0, 0);
        return SectorError::HeaderNotFound;
    }

    let mut status = SectorError::Ok;
    match decode_header(track, info.header_begin) {
        Ok(header) => {
            analysis.headers[sector] = Some(header);
            if !header.checksum_ok() {
                analysis.log(
                    format!(
                        "Header block at index {} contains an invalid checksum.",
                        info.header_begin
                    ),
                    info.header_begin,
                    HEADER_BLOCK_BITS,
                );
                status = SectorError::HeaderChecksum;
            }
        }
        Err(_) => {
            analysis.log(
                format!(
                    "Header block at index {} contains an invalid GCR code.",
                    info.header_begin
                ),
                info.header_begin,
                HEADER_BLOCK_BITS,
            );
            status = SectorError::HeaderChecksum;
        }
    }

    if !info.has_data() {
        analysis.log(format!("Sector {} has no data block.", sector), 0, 0);
        return if status.is_ok() {
            SectorError::DataNotFound
        } else {
            status
        };
    }

    match decode_bytes(track, info.data_begin + GCR_BYTE_BITS, 257) {
        Ok(bytes) => {
            let checksum = bytes[..256].iter().fold(0, |acc, b| acc ^ b);
            if checksum != bytes[256] {
                analysis.log(
                    format!(
                        "Data block at index {} contains an invalid checksum.",
                        info.data_begin
                    ),
                    info.data_begin,
                    DATA_BLOCK_BITS,
                );
                if status.is_ok() {
                    status = SectorError::DataChecksum;
                }
            }
        }
        Err(_) => {
            analysis.log(
                format!(
                    "Data block at index {} contains an invalid GCR code.",
                    info.data_begin
                ),
                info.data_begin,
                DATA_BLOCK_BITS,
            );
            if status.is_ok() {
                status = SectorError::DataChecksum;
            }
        }
    }
    status
}

/// Return true if a SYNC mark lies in the slot of a missing sector, between
/// the last block of the nearest found sector before it and the header of
/// the nearest found sector after it.  Sectors are laid out in order around
/// the track.
fn slot_has_sync(analysis: &TrackAnalysis, syncs: &[usize], sector: usize) -> bool {
    let count = analysis.sectors.len();
    let length = analysis.length.max(1);
    let previous = (1..count)
        .map(|i| (sector + count - i) % count)
        .find(|&s| analysis.sectors[s].has_header());
    let next = (1..count)
        .map(|i| (sector + i) % count)
        .find(|&s| analysis.sectors[s].has_header());
    let (previous, next) = match (previous, next) {
        (Some(previous), Some(next)) => (previous, next),
        _ => return !syncs.is_empty(),
    };
    let before = &analysis.sectors[previous];
    let begin = if before.has_data() {
        before.data_end
    } else {
        before.header_end
    };
    let end = analysis.sectors[next].header_begin;
    let span = (end + length - begin) % length;
    syncs.iter().any(|&p| {
        let distance = (p % length + length - begin) % length;
        distance > 0 && distance < span
    })
}

/// Return the 256 data bytes of a sector, if its data block was found.
/// Undecodable bytes read as zero.
pub fn sector_data(track: &Bitstream, analysis: &TrackAnalysis, sector: usize) -> Option<Vec<u8>> {
    let info = analysis.sector_info(sector);
    if info.has_data() {
        Some(decode_bytes_lossy(track, info.data_begin + GCR_BYTE_BITS, 256))
    } else {
        None
    }
}

/// Return the raw bytes of a sector's header block, starting with its ID.
pub fn header_block_bytes(track: &Bitstream, info: &SectorInfo) -> Vec<u8> {
    if info.has_header() {
        decode_bytes_lossy(track, info.header_begin, HEADER_BLOCK_BITS / GCR_BYTE_BITS)
    } else {
        vec![]
    }
}

/// Return the raw bytes of a sector's data block, starting with its ID.
pub fn data_block_bytes(track: &Bitstream, info: &SectorInfo) -> Vec<u8> {
    if info.has_data() {
        decode_bytes_lossy(track, info.data_begin, DATA_BLOCK_BITS / GCR_BYTE_BITS)
    } else {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::bitstream::Bitstream;
    use crate::disk::geometry::{speed_zone, tail_gap, track_bit_length};

    const SYNC_BITS: usize = 40;

    /// Lay down one sector the way the 1541 formats it.
    fn write_sector(track: &mut Bitstream, position: usize, t: u8, s: u8, fill: u8) -> usize {
        let (id1, id2) = (0x41, 0x42);
        let mut writer = track.writer(position);
        writer.write_run(true, SYNC_BITS);
        writer.write_gcr_bytes(&[HEADER_BLOCK_ID, id1 ^ id2 ^ t ^ s, s, t, id2, id1, 0x0F, 0x0F]);
        for _ in 0..9 {
            writer.write_raw(0x55);
        }
        writer.write_run(true, SYNC_BITS);
        writer.write_gcr(DATA_BLOCK_ID);
        let data = [fill; 256];
        writer.write_gcr_bytes(&data);
        writer.write_gcr_bytes(&[0, 0, 0]);
        for _ in 0..tail_gap(speed_zone(t)) {
            writer.write_raw(0x55);
        }
        writer.position()
    }

    fn formatted_track(t: u8, start: usize) -> Bitstream {
        let mut track = Bitstream::filled(track_bit_length(speed_zone(t)));
        let mut position = start;
        for s in 0..geometry::sectors_on_track(t) {
            position = write_sector(&mut track, position, t, s, s);
        }
        track
    }

    #[test]
    fn test_highlight_ranges() {
        assert_eq!(highlight_ranges(95, 5, 100), vec![0..=5, 95..=99]);
        assert_eq!(highlight_ranges(10, 20, 100), vec![10..=20]);
        assert!(highlight_ranges(42, 42, 100).is_empty());
    }

    #[test]
    fn test_clean_track() {
        let track = formatted_track(18, 0);
        let analysis = analyze(&track, 35);
        assert!(analysis.is_clean(), "{:?}", analysis.errors());
        assert_eq!(analysis.num_sectors(), 19);
        for s in 0..19 {
            let info = analysis.sector_info(s);
            assert!(info.has_header() && info.has_data());
            assert_eq!(analysis.status(s), SectorError::Ok);
            let header = analysis.header(s).unwrap();
            assert_eq!((header.track, header.sector), (18, s as u8));
            assert_eq!(sector_data(&track, &analysis, s), Some(vec![s as u8; 256]));
        }
        assert!(!analysis.sector_info(19).has_header());
    }

    #[test]
    fn test_idempotent() {
        let track = formatted_track(1, 300);
        assert_eq!(analyze(&track, 1), analyze(&track, 1));
    }

    #[test]
    fn test_sector_across_track_end() {
        // Start late enough that the final sector wraps to the beginning.
        let length = track_bit_length(speed_zone(31));
        let track = formatted_track(31, length - 1500);
        let analysis = analyze(&track, 61);
        assert!(analysis.is_clean(), "{:?}", analysis.errors());
        let wrapped = analysis
            .sectors()
            .iter()
            .filter(|info| info.data_begin > info.data_end || info.header_begin > info.header_end)
            .count();
        assert_eq!(wrapped, 1);
        assert_eq!(sector_data(&track, &analysis, 0), Some(vec![0; 256]));
    }

    #[test]
    fn test_blank_track() {
        let track = Bitstream::cleared();
        let analysis = analyze(&track, 3);
        assert_eq!(analysis.num_errors(), 1);
        assert_eq!(
            analysis.errors()[0].message,
            "This track contains no sector header block."
        );
        assert_eq!(analysis.status(0), SectorError::NoSync);
        assert!(!analysis.sector_info(0).has_header());
    }

    #[test]
    fn test_damaged_sectors() {
        let mut track = formatted_track(20, 0);
        let clean = analyze(&track, 39);

        // Flip a data bit of sector 3 and the header checksum of sector 5.
        let data_begin = clean.sector_info(3).data_begin;
        let bit = track.bit(data_begin + 10 * 100);
        track.set_bit(data_begin + 10 * 100, !bit);
        let header_begin = clean.sector_info(5).header_begin;
        track
            .writer(header_begin + GCR_BYTE_BITS)
            .write_gcr(0xEE);

        let analysis = analyze(&track, 39);
        assert_eq!(analysis.status(3), SectorError::DataChecksum);
        assert_eq!(analysis.status(5), SectorError::HeaderChecksum);
        assert_eq!(analysis.status(4), SectorError::Ok);
        let messages: Vec<&str> = analysis.errors().iter().map(|e| &e.message[..]).collect();
        assert!(messages
            .iter()
            .any(|m| m.starts_with("Header block at index") && m.ends_with("invalid checksum.")));
        assert!(messages.iter().any(|m| m.starts_with("Data block at index")));
        let error = &analysis.errors()[0];
        assert!(error.first_bit < analysis.track_length());
    }

    #[test]
    fn test_missing_data_block() {
        let mut track = formatted_track(30, 0);
        let clean = analyze(&track, 59);
        // Overwrite the data block's ID byte.
        let info = clean.sector_info(7);
        track.writer(info.data_begin).write_gcr(0x01);
        let analysis = analyze(&track, 59);
        assert_eq!(analysis.status(7), SectorError::DataNotFound);
        assert!(!analysis.sector_info(7).has_data());
        assert!(analysis
            .errors()
            .iter()
            .any(|e| e.message == "Invalid sector ID 01 at index ".to_string()
                + &info.data_begin.to_string()
                + ". Should be 0x07 or 0x08."));
        assert!(analysis
            .errors()
            .iter()
            .any(|e| e.message == "Sector 7 has no data block."));
    }

    #[test]
    fn test_missing_sectors() {
        let mut track = formatted_track(10, 0);
        let clean = analyze(&track, 19);
        // Sector 4 loses both of its SYNC marks, sector 9 its header ID.
        let info = clean.sector_info(4);
        track
            .writer(info.header_begin - SYNC_BITS)
            .write_run(false, SYNC_BITS);
        track
            .writer(info.data_begin - SYNC_BITS)
            .write_run(false, SYNC_BITS);
        track.writer(clean.sector_info(9).header_begin).write_gcr(0x00);

        let analysis = analyze(&track, 19);
        assert_eq!(analysis.status(4), SectorError::NoSync);
        assert_eq!(analysis.status(9), SectorError::HeaderNotFound);
        assert_eq!(analysis.status(3), SectorError::Ok);
        assert_eq!(analysis.status(5), SectorError::Ok);
        assert!(analysis
            .errors()
            .iter()
            .any(|e| e.message == "Sector 4 is missing."));
    }
}
