use std::io;

use crate::disk::bam::{Bam, BamEntry, BAM_TRACKS};
use crate::disk::block::Location;
use crate::disk::error::DiskError;
use crate::disk::geometry::{Track, TRACKS};
use crate::disk::{BAM_LOCATION, FIRST_DIRECTORY_LOCATION};

// The "next track" routines reflect the information in Peter Schepers'
// DISK.TXT document found at:
// http://ist.uwaterloo.ca/~schepers/formats/DISK.TXT

/// How CBM DOS 2.6 lays out its structures on a 1541 disk, and how it picks
/// sectors when files grow.
pub struct DiskFormat {
    pub directory_track: u8,
    /// This should be pointed to from the header sector, but the various image
    /// format documents say not to trust it.
    pub first_directory_sector: u8,
    pub first_track: u8,
    /// The last track in normal use.  (I.e., inclusive -- not the last track
    /// plus one.)
    pub last_track: u8,
    pub interleave: u8,
    /// Scanning the directory involves no I/O with the host, so a tighter
    /// interleave is used on the directory track.
    pub directory_interleave: u8,
    pub tracks: &'static [Track],
}

pub static DISK_FORMAT: DiskFormat = DiskFormat {
    directory_track: 18,
    first_directory_sector: 1,
    first_track: 1,
    last_track: BAM_TRACKS,
    interleave: 10,
    directory_interleave: 3,
    tracks: &TRACKS,
};

impl DiskFormat {
    #[inline]
    pub fn sectors_in_track(&self, track: u8) -> u8 {
        self.tracks[track as usize].sectors
    }

    /// Return the list of locations which are reserved by CBM DOS and marked
    /// as allocated when a disk image is newly formatted.
    pub fn system_locations(&self) -> Vec<Location> {
        vec![BAM_LOCATION, FIRST_DIRECTORY_LOCATION]
    }

    fn first_free_track<'a>(&self, bam: &'a Bam) -> io::Result<(u8, &'a BamEntry)> {
        let max_distance = ::std::cmp::max(
            self.directory_track - self.first_track,
            self.last_track + 1 - self.directory_track,
        );
        for distance in 1..=max_distance {
            // Check bottom half
            if distance <= self.directory_track {
                let track = self.directory_track - distance;
                if track >= self.first_track {
                    let entry = bam.entry(track)?;
                    if entry.has_availability() {
                        return Ok((track, entry));
                    }
                }
            }
            // Check top half
            let track = self.directory_track + distance;
            if track <= self.last_track {
                let entry = bam.entry(track)?;
                if entry.has_availability() {
                    return Ok((track, entry));
                }
            }
        }
        Err(DiskError::DiskFull.into())
    }

    fn first_free_block(&self, bam: &Bam) -> io::Result<Location> {
        let (track, entry) = self.first_free_track(bam)?;
        for sector in 0..self.sectors_in_track(track) {
            if entry.is_free(sector) {
                return Ok(Location(track, sector));
            }
        }

        // Only reachable when free_sectors disagrees with the bitmap.
        Err(DiskError::InvalidBAM.into())
    }

    // If a free track is successfully found, return the following tuple:
    // (track: u8, entry: &BamEntry, reset_sector: bool)
    fn next_free_track<'a>(
        &self,
        bam: &'a Bam,
        previous_track: u8,
    ) -> io::Result<(u8, &'a BamEntry, bool)> {
        // Files grow away from the central directory track.  The first pass
        // scans the current half outward from the current track, the second
        // pass scans the other half in its entirety, and the third pass scans
        // the original half again to catch inward availability missed on the
        // first pass.
        const NUM_PASSES: usize = 3;
        let mut passes = NUM_PASSES;
        let mut reset_sector = false;

        let mut track = previous_track;
        if track < self.first_track || track > self.last_track {
            return Err(DiskError::InvalidLocation.into());
        }

        while passes > 0 {
            let entry = bam.entry(track)?;
            if entry.has_availability() {
                return Ok((track, entry, reset_sector));
            }

            if track == self.directory_track {
                // Directory sectors never leave the directory track.
                return Err(DiskError::DiskFull.into());
            } else if track < self.directory_track {
                // Bottom half: Scan downwards.
                track -= 1;
                if track < self.first_track {
                    track = self.directory_track + 1;
                    passes -= 1;
                    reset_sector = true;
                }
            } else {
                // Top half: Scan upwards.
                track += 1;
                if track > self.last_track {
                    track = self.directory_track - 1;
                    passes -= 1;
                    reset_sector = true;
                }
            }
        }
        Err(DiskError::DiskFull.into())
    }

    fn next_free_block_from_previous(&self, bam: &Bam, previous: Location) -> io::Result<Location> {
        let mut sector = previous.1;

        let (track, entry, reset_sector) = self.next_free_track(bam, previous.0)?;
        let num_sectors = self.sectors_in_track(track);

        let interleave = if track == self.directory_track {
            self.directory_interleave
        } else {
            self.interleave
        };

        if reset_sector {
            sector = 0;
        } else {
            sector += interleave;
        }

        // From DISK.TXT:
        // "Empirical optimization, get one sector backwards if beyond sector zero"
        while sector >= num_sectors {
            sector -= num_sectors;
            if sector > 0 {
                sector -= 1;
            }
        }

        let start_sector: u8 = sector;
        loop {
            if entry.is_free(sector) {
                return Ok(Location(track, sector));
            }

            sector += 1;
            if sector >= num_sectors {
                sector = 0;
            }
            if sector == start_sector {
                // The BAM entry's free sector count indicated free sectors,
                // but there were no free sectors in the bitmap.
                return Err(DiskError::InvalidBAM.into());
            }
        }
    }

    /// Pick the block CBM DOS would use after `previous`, or the first block
    /// of a new file if there is no previous block.
    pub fn next_free_block(&self, bam: &Bam, previous: Option<Location>) -> io::Result<Location> {
        match previous {
            Some(previous) => self.next_free_block_from_previous(bam, previous),
            None => self.first_free_block(bam),
        }
    }
}
