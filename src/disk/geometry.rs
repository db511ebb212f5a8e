//! Physical layout of a 1541 disk: tracks, halftracks, sectors, speed zones,
//! and the translation between linear block numbers and track/sector pairs.

use crate::disk::block::{Location, BLOCK_SIZE};

/// The highest track number a 1541 drive head can reach.
pub const MAX_TRACKS: u8 = 42;
/// Number of halftracks, numbered 1 through 84.
pub const HALFTRACKS: usize = 84;
/// The largest number of bytes a halftrack may hold.
pub const MAX_BYTES_ON_TRACK: usize = 7928;
/// The bit length of a freshly cleared halftrack.
pub const MAX_BITS_ON_TRACK: usize = MAX_BYTES_ON_TRACK * 8;

/// Track bit lengths for speed zones 0 through 3.
static TRACK_BITS: [usize; 4] = [6250 * 8, 6667 * 8, 7143 * 8, 7693 * 8];
/// Number of filler bytes following each sector, by speed zone.
static TAIL_GAP: [usize; 4] = [9, 12, 17, 8];

/// The sector layout of one track.
#[derive(Clone, Copy, Debug)]
pub struct Track {
    /// Number of sectors on this track.
    pub sectors: u8,
    /// Linear block number of sector 0 of this track.
    pub sector_offset: u16,
    /// Byte offset of this track within a linear sector image.
    pub byte_offset: u32,
}

#[rustfmt::skip]
pub(crate) static TRACKS: [Track; 43] = [
    Track { sectors: 0,  sector_offset: 0,   byte_offset: 0, }, // There is no track 0.
    Track { sectors: 21, sector_offset: 0  , byte_offset: 0x00000, }, // 1
    Track { sectors: 21, sector_offset: 21 , byte_offset: 0x01500, }, // 2
    Track { sectors: 21, sector_offset: 42 , byte_offset: 0x02A00, }, // 3
    Track { sectors: 21, sector_offset: 63 , byte_offset: 0x03F00, }, // 4
    Track { sectors: 21, sector_offset: 84 , byte_offset: 0x05400, }, // 5
    Track { sectors: 21, sector_offset: 105, byte_offset: 0x06900, }, // 6
    Track { sectors: 21, sector_offset: 126, byte_offset: 0x07E00, }, // 7
    Track { sectors: 21, sector_offset: 147, byte_offset: 0x09300, }, // 8
    Track { sectors: 21, sector_offset: 168, byte_offset: 0x0A800, }, // 9
    Track { sectors: 21, sector_offset: 189, byte_offset: 0x0BD00, }, // 10
    Track { sectors: 21, sector_offset: 210, byte_offset: 0x0D200, }, // 11
    Track { sectors: 21, sector_offset: 231, byte_offset: 0x0E700, }, // 12
    Track { sectors: 21, sector_offset: 252, byte_offset: 0x0FC00, }, // 13
    Track { sectors: 21, sector_offset: 273, byte_offset: 0x11100, }, // 14
    Track { sectors: 21, sector_offset: 294, byte_offset: 0x12600, }, // 15
    Track { sectors: 21, sector_offset: 315, byte_offset: 0x13B00, }, // 16
    Track { sectors: 21, sector_offset: 336, byte_offset: 0x15000, }, // 17
    Track { sectors: 19, sector_offset: 357, byte_offset: 0x16500, }, // 18
    Track { sectors: 19, sector_offset: 376, byte_offset: 0x17800, }, // 19
    Track { sectors: 19, sector_offset: 395, byte_offset: 0x18B00, }, // 20
    Track { sectors: 19, sector_offset: 414, byte_offset: 0x19E00, }, // 21
    Track { sectors: 19, sector_offset: 433, byte_offset: 0x1B100, }, // 22
    Track { sectors: 19, sector_offset: 452, byte_offset: 0x1C400, }, // 23
    Track { sectors: 19, sector_offset: 471, byte_offset: 0x1D700, }, // 24
    Track { sectors: 18, sector_offset: 490, byte_offset: 0x1EA00, }, // 25
    Track { sectors: 18, sector_offset: 508, byte_offset: 0x1FC00, }, // 26
    Track { sectors: 18, sector_offset: 526, byte_offset: 0x20E00, }, // 27
    Track { sectors: 18, sector_offset: 544, byte_offset: 0x22000, }, // 28
    Track { sectors: 18, sector_offset: 562, byte_offset: 0x23200, }, // 29
    Track { sectors: 18, sector_offset: 580, byte_offset: 0x24400, }, // 30
    Track { sectors: 17, sector_offset: 598, byte_offset: 0x25600, }, // 31
    Track { sectors: 17, sector_offset: 615, byte_offset: 0x26700, }, // 32
    Track { sectors: 17, sector_offset: 632, byte_offset: 0x27800, }, // 33
    Track { sectors: 17, sector_offset: 649, byte_offset: 0x28900, }, // 34
    Track { sectors: 17, sector_offset: 666, byte_offset: 0x29A00, }, // 35
    Track { sectors: 17, sector_offset: 683, byte_offset: 0x2AB00, }, // 36
    Track { sectors: 17, sector_offset: 700, byte_offset: 0x2BC00, }, // 37
    Track { sectors: 17, sector_offset: 717, byte_offset: 0x2CD00, }, // 38
    Track { sectors: 17, sector_offset: 734, byte_offset: 0x2DE00, }, // 39
    Track { sectors: 17, sector_offset: 751, byte_offset: 0x2EF00, }, // 40
    Track { sectors: 17, sector_offset: 768, byte_offset: 0x30000, }, // 41
    Track { sectors: 17, sector_offset: 785, byte_offset: 0x31100, }, // 42
];

/// Return the speed zone (0 = slowest, 3 = fastest) used on a track.
pub fn speed_zone(track: u8) -> usize {
    assert!((1..=MAX_TRACKS).contains(&track), "invalid track {}", track);
    match track {
        1..=17 => 3,
        18..=24 => 2,
        25..=30 => 1,
        _ => 0,
    }
}

/// Return the speed zone used on a halftrack.
pub fn halftrack_speed_zone(halftrack: usize) -> usize {
    assert_halftrack(halftrack);
    match halftrack {
        1..=34 => 3,
        35..=48 => 2,
        49..=60 => 1,
        _ => 0,
    }
}

/// Return the number of bits on a track written in the given speed zone.
#[inline]
pub fn track_bit_length(zone: usize) -> usize {
    TRACK_BITS[zone]
}

/// Return the number of gap bytes written after each sector in the given
/// speed zone.
#[inline]
pub fn tail_gap(zone: usize) -> usize {
    TAIL_GAP[zone]
}

/// Return the number of sectors a track carries, or zero for tracks that
/// do not exist.
pub fn sectors_on_track(track: u8) -> u8 {
    TRACKS.get(track as usize).map(|t| t.sectors).unwrap_or(0)
}

/// Return the halftrack holding the data of a full track.
#[inline]
pub fn halftrack_of(track: u8) -> usize {
    assert!((1..=MAX_TRACKS).contains(&track), "invalid track {}", track);
    2 * track as usize - 1
}

/// Return the track a halftrack belongs to.
#[inline]
pub fn track_of_halftrack(halftrack: usize) -> u8 {
    assert_halftrack(halftrack);
    ((halftrack + 1) / 2) as u8
}

#[inline]
pub(crate) fn assert_halftrack(halftrack: usize) {
    assert!(
        (1..=HALFTRACKS).contains(&halftrack),
        "invalid halftrack {}",
        halftrack
    );
}

/// A `Geometry` specifies the track and sector layout of a linear sector
/// image, and also whether it has an error table appended or not.
#[derive(Copy, Clone, Debug)]
pub struct Geometry {
    pub(crate) track_layouts: &'static [Track],
    pub(crate) tracks: u8,
    pub(crate) with_error_table: bool,
}

static GEOMETRY_35: Geometry = Geometry {
    track_layouts: &TRACKS,
    tracks: 35,
    with_error_table: false,
};

static GEOMETRY_35_ERRORS: Geometry = Geometry {
    track_layouts: &TRACKS,
    tracks: 35,
    with_error_table: true,
};

static GEOMETRY_40: Geometry = Geometry {
    track_layouts: &TRACKS,
    tracks: 40,
    with_error_table: false,
};

static GEOMETRY_40_ERRORS: Geometry = Geometry {
    track_layouts: &TRACKS,
    tracks: 40,
    with_error_table: true,
};

static GEOMETRY_42: Geometry = Geometry {
    track_layouts: &TRACKS,
    tracks: 42,
    with_error_table: false,
};

static GEOMETRY_42_ERRORS: Geometry = Geometry {
    track_layouts: &TRACKS,
    tracks: 42,
    with_error_table: true,
};

/// Every layout a D64 container may have, in order of preference.
pub(crate) static ALLOWED_GEOMETRIES: [&Geometry; 6] = [
    &GEOMETRY_35,
    &GEOMETRY_35_ERRORS,
    &GEOMETRY_40,
    &GEOMETRY_40_ERRORS,
    &GEOMETRY_42,
    &GEOMETRY_42_ERRORS,
];

impl Geometry {
    /// Return the standard geometry with the given number of tracks (35, 40,
    /// or 42).
    pub fn standard(tracks: u8, with_error_table: bool) -> Option<&'static Geometry> {
        ALLOWED_GEOMETRIES
            .iter()
            .find(|g| g.tracks == tracks && g.with_error_table == with_error_table)
            .cloned()
    }

    /// Given a disk image file size, return the first matching geometry.
    pub fn find_by_size(
        size: usize,
        geometries: &[&'static Geometry],
    ) -> Option<&'static Geometry> {
        geometries.iter().find(|g| g.size() == size).cloned()
    }

    /// Return the same layout with or without an error table.
    pub fn with_error_table(&self, with_error_table: bool) -> &'static Geometry {
        match Geometry::standard(self.tracks, with_error_table) {
            Some(geometry) => geometry,
            None => panic!("non-standard geometry with {} tracks", self.tracks),
        }
    }

    #[inline]
    pub fn has_error_table(&self) -> bool {
        self.with_error_table
    }

    /// Return the size of this geometry, if it didn't have an error table
    /// attached.
    #[inline]
    fn size_without_error_table(&self) -> usize {
        self.num_blocks() * BLOCK_SIZE
    }

    /// Return the size of the error table for this geometry, if one existed.
    /// The error table is one byte for every sector in the image.
    #[inline]
    pub fn error_table_size(&self) -> usize {
        self.num_blocks()
    }

    /// Return the total number of bytes used to represent a disk image in this
    /// geometry.
    pub fn size(&self) -> usize {
        if self.with_error_table {
            self.size_without_error_table() + self.error_table_size()
        } else {
            self.size_without_error_table()
        }
    }

    /// Return the offset of the error table, if one is present in this
    /// geometry.
    pub fn error_table_offset(&self) -> Option<usize> {
        if self.with_error_table {
            Some(self.size_without_error_table())
        } else {
            None
        }
    }

    #[inline]
    pub fn num_tracks(&self) -> u8 {
        self.tracks
    }

    /// A 1541 disk has one cylinder per track.
    #[inline]
    pub fn num_cyls(&self) -> u8 {
        self.tracks
    }

    /// A 1541 disk is single sided.
    #[inline]
    pub fn num_heads(&self) -> u8 {
        1
    }

    /// Return the number of sectors on a track of this geometry, or zero if
    /// the track lies outside of it.
    pub fn num_sectors(&self, track: u8) -> u8 {
        if track >= 1 && track <= self.tracks {
            self.track_layouts[track as usize].sectors
        } else {
            0
        }
    }

    pub fn num_blocks(&self) -> usize {
        let last = &self.track_layouts[self.tracks as usize];
        last.sector_offset as usize + last.sectors as usize
    }

    #[inline]
    pub fn is_valid_location(&self, location: Location) -> bool {
        location.1 < self.num_sectors(location.0)
    }

    /// Translate a track/sector pair into a linear block number, if the
    /// location exists in this geometry.
    pub fn checked_block_of(&self, location: Location) -> Option<usize> {
        if self.is_valid_location(location) {
            Some(self.track_layouts[location.0 as usize].sector_offset as usize + location.1 as usize)
        } else {
            None
        }
    }

    /// Translate a linear block number into a track/sector pair, if the
    /// block exists in this geometry.
    pub fn checked_location_of(&self, block: usize) -> Option<Location> {
        if block >= self.num_blocks() {
            return None;
        }
        let track = (1..=self.tracks)
            .rev()
            .find(|&t| self.track_layouts[t as usize].sector_offset as usize <= block)?;
        let sector = block - self.track_layouts[track as usize].sector_offset as usize;
        Some(Location::new(track, sector as u8))
    }

    /// Translate a track/sector pair into a linear block number.  Panics if
    /// the location does not exist.
    pub fn block_of(&self, location: Location) -> usize {
        match self.checked_block_of(location) {
            Some(block) => block,
            None => panic!("location {} outside of geometry", location),
        }
    }

    /// Translate a linear block number into a track/sector pair.  Panics if
    /// the block does not exist.
    pub fn location_of(&self, block: usize) -> Location {
        match self.checked_location_of(block) {
            Some(location) => location,
            None => panic!("block {} outside of geometry", block),
        }
    }

    #[inline]
    pub fn track_of(&self, block: usize) -> u8 {
        self.location_of(block).0
    }

    #[inline]
    pub fn sector_of(&self, block: usize) -> u8 {
        self.location_of(block).1
    }

    /// Return the byte offset of a location within a linear sector image.
    pub(crate) fn byte_offset(&self, location: Location) -> Option<usize> {
        if self.is_valid_location(location) {
            Some(
                self.track_layouts[location.0 as usize].byte_offset as usize
                    + location.1 as usize * BLOCK_SIZE,
            )
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_consistency() {
        let mut sector_offset = 0;
        let mut byte_offset = 0;
        for track in super::TRACKS.iter() {
            assert_eq!(track.sector_offset, sector_offset);
            assert_eq!(track.byte_offset, byte_offset);
            sector_offset += track.sectors as u16;
            byte_offset += track.sectors as u32 * BLOCK_SIZE as u32;
        }
    }

    #[test]
    fn test_container_sizes() {
        let sizes: Vec<usize> = ALLOWED_GEOMETRIES.iter().map(|g| g.size()).collect();
        assert_eq!(sizes, [174848, 175531, 196608, 197376, 205312, 206114]);
        let g = Geometry::find_by_size(175531, &ALLOWED_GEOMETRIES).unwrap();
        assert_eq!(g.num_tracks(), 35);
        assert_eq!(g.error_table_offset(), Some(174848));
        assert!(Geometry::find_by_size(1000, &ALLOWED_GEOMETRIES).is_none());
    }

    #[test]
    fn test_block_translation() {
        let g = Geometry::standard(35, false).unwrap();
        assert_eq!(g.num_blocks(), 683);
        assert_eq!(g.block_of(Location(18, 0)), 357);
        assert_eq!(g.location_of(357), Location(18, 0));
        assert_eq!(g.location_of(682), Location(35, 16));
        assert_eq!(g.checked_location_of(683), None);
        assert_eq!(g.checked_block_of(Location(18, 19)), None);
        assert_eq!(g.checked_block_of(Location(0, 0)), None);
        assert_eq!(Geometry::standard(40, false).unwrap().num_blocks(), 768);
        assert_eq!(Geometry::standard(42, false).unwrap().block_of(Location(41, 0)), 768);
        for block in 0..g.num_blocks() {
            assert_eq!(g.block_of(g.location_of(block)), block);
        }
    }

    #[test]
    #[should_panic]
    fn test_invalid_block_panics() {
        Geometry::standard(35, false).unwrap().location_of(683);
    }

    #[test]
    fn test_speed_zones() {
        assert_eq!(speed_zone(1), 3);
        assert_eq!(speed_zone(17), 3);
        assert_eq!(speed_zone(18), 2);
        assert_eq!(speed_zone(25), 1);
        assert_eq!(speed_zone(31), 0);
        assert_eq!(speed_zone(42), 0);
        for track in 1..=MAX_TRACKS {
            assert_eq!(halftrack_speed_zone(halftrack_of(track)), speed_zone(track));
            assert_eq!(track_of_halftrack(halftrack_of(track)), track);
        }
        assert_eq!(track_of_halftrack(2), 1);
        assert_eq!(track_of_halftrack(84), 42);
    }

    #[test]
    fn test_sectors_fit_on_track() {
        // Sync, header, gap, sync, and data block, plus the tail gap.
        for track in 1..=MAX_TRACKS {
            let zone = speed_zone(track);
            let sector_bits = 40 + 80 + 72 + 40 + 2600 + 8 * tail_gap(zone);
            assert!(sector_bits * sectors_on_track(track) as usize <= track_bit_length(zone));
        }
    }
}
