use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::error;
use std::fmt;
use std::io;

use crate::disk::chain::ChainIterator;
use crate::disk::directory::{DirectoryEntry, FileType};
use crate::disk::error::DiskError;
use crate::disk::format::DISK_FORMAT;
use crate::disk::volume::Volume;
use crate::disk::{Location, FIRST_DIRECTORY_LOCATION};
use crate::petscii::Petscii;

/// A validation error represents an inconsistency in the disk image found by
/// the validate() function.
#[derive(Clone, Debug, PartialEq)]
pub enum ValidationError {
    SystemSectorNotAllocated(Location),
    SectorMisallocated(Location),
    SectorMisoccupied(Location, Petscii),
    SectorOveroccupied(Location, Petscii, Petscii),
    FileScanError(DiskError, Petscii),
}

impl ValidationError {
    /// Provide terse descriptions of the errors.
    pub fn description(&self) -> &str {
        use self::ValidationError::*;
        match *self {
            SystemSectorNotAllocated(_) => "System sector not allocated",
            SectorMisallocated(_) => "Sector misallocated",
            SectorMisoccupied(_, _) => "Sector misoccupied",
            SectorOveroccupied(_, _, _) => "Sector occupied by multiple files",
            FileScanError(_, _) => "File scan error",
        }
    }
}

impl error::Error for ValidationError {}

impl fmt::Display for ValidationError {
    /// Provide human-readable descriptions of the errors.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::ValidationError::*;
        match *self {
            SystemSectorNotAllocated(l) => write!(f, "System sector not allocated: {}", l),
            SectorMisallocated(l) => write!(f, "Sector misallocated: {}", l),
            SectorMisoccupied(l, ref filename) => {
                write!(f, "Sector {} misoccupied by file: {:?}", l, filename)
            }
            SectorOveroccupied(location, ref filename1, ref filename2) => write!(
                f,
                "Sector {} occupied by multiple files, including at least: {:?} {:?}",
                location, filename1, filename2
            ),
            FileScanError(ref e, ref filename) => write!(f, "Error scanning {:?}: {}", filename, e),
        }
    }
}

/// Given a set of locations, return the inverse -- that is, a set of all of
/// the BAM-covered locations that were not represented in the given set.
fn invert_locations(locations: &HashSet<Location>) -> HashSet<Location> {
    let mut inverse = HashSet::new();
    for track in DISK_FORMAT.first_track..=DISK_FORMAT.last_track {
        for sector in 0..DISK_FORMAT.sectors_in_track(track) {
            let location = Location::new(track, sector);
            if !locations.contains(&location) {
                inverse.insert(location);
            }
        }
    }
    inverse
}

/// Return every sector occupied by a file, including REL side sectors.
fn scan_file(volume: &Volume, entry: &DirectoryEntry) -> io::Result<Vec<Location>> {
    let mut locations = ChainIterator::new(volume.blocks(), entry.first_sector).locations()?;
    if entry.file_type() == FileType::REL {
        locations.extend(ChainIterator::new(volume.blocks(), entry.side_sector).locations()?);
    }
    Ok(locations)
}

/// Check the consistency of the provided volume.  Unlike the "validate"
/// ("v0:") command in CBM DOS, this is a read-only operation and does not
/// attempt any repairs.  A list of validation errors is returned.
pub fn validate(volume: &Volume) -> io::Result<Vec<ValidationError>> {
    static SYSTEM_OWNER: &str = "CBM DOS";
    let mut errors: Vec<ValidationError> = vec![];
    let bam = volume.bam()?;
    let system_sectors: HashSet<Location> = DISK_FORMAT.system_locations().into_iter().collect();
    let allocated_sectors: HashSet<Location> = bam.allocated_sectors().into_iter().collect();
    let free_sectors: HashSet<Location> = bam.free_sectors().into_iter().collect();

    // Build a list of all occupied sectors and their owners
    // 1. System sectors
    let mut occupied_sector_map: HashMap<Location, Petscii> = HashMap::new();
    for system_sector in system_sectors.iter() {
        occupied_sector_map.insert(*system_sector, SYSTEM_OWNER.into());
    }
    // 2. Add the directory chain as occupied sectors.
    let directory_locations =
        ChainIterator::new(volume.blocks(), FIRST_DIRECTORY_LOCATION).locations()?;
    for location in directory_locations {
        occupied_sector_map.insert(location, SYSTEM_OWNER.into());
    }
    // 3. All files
    for entry in volume.iter()? {
        let entry = entry?;
        let file_occupied_sectors = match scan_file(volume, &entry) {
            Ok(file_occupied_sectors) => file_occupied_sectors,
            Err(e) => match DiskError::from_io_error(&e) {
                Some(e) => {
                    errors.push(ValidationError::FileScanError(e, entry.filename.clone()));
                    continue;
                }
                None => return Err(e),
            },
        };
        for location in file_occupied_sectors.iter() {
            match occupied_sector_map.entry(*location) {
                Entry::Occupied(owner) => {
                    errors.push(ValidationError::SectorOveroccupied(
                        *location,
                        owner.get().clone(),
                        entry.filename.clone(),
                    ));
                }
                Entry::Vacant(v) => {
                    v.insert(entry.filename.clone());
                }
            };
        }
    }
    let occupied_sectors: HashSet<Location> = occupied_sector_map.keys().copied().collect();
    let unoccupied_sectors = invert_locations(&occupied_sectors);

    // Confirm all system sectors are still allocated
    let mut system_errors: Vec<Location> = system_sectors
        .iter()
        .filter(|l| !allocated_sectors.contains(l))
        .copied()
        .collect();
    system_errors.sort();
    errors.extend(
        system_errors
            .into_iter()
            .map(ValidationError::SystemSectorNotAllocated),
    );

    // Look for sectors that are allocated but not occupied.
    let mut misallocated: Vec<Location> = allocated_sectors
        .intersection(&unoccupied_sectors)
        .copied()
        .collect();
    misallocated.sort();
    errors.extend(misallocated.into_iter().map(ValidationError::SectorMisallocated));

    // Look for sectors that are occupied but not allocated.
    let mut misoccupied: Vec<Location> = free_sectors
        .intersection(&occupied_sectors)
        .filter(|l| !system_sectors.contains(l))
        .copied()
        .collect();
    misoccupied.sort();
    for location in misoccupied {
        let filename = occupied_sector_map
            .get(&location)
            .cloned()
            .unwrap_or_else(|| "None".into());
        errors.push(ValidationError::SectorMisoccupied(location, filename));
    }

    Ok(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::bam::Bam;
    use crate::disk::block::BlockImage;
    use crate::disk::geometry::Geometry;

    fn formatted() -> BlockImage {
        let mut blocks = BlockImage::open_memory(Geometry::standard(35, false).unwrap());
        blocks.write_format(&"valid".into(), &"vd".into()).unwrap();
        blocks
            .write_file(&"one".into(), FileType::PRG, &[1u8; 300])
            .unwrap();
        blocks
    }

    #[test]
    fn test_clean_volume() {
        let blocks = formatted();
        let volume = Volume::new(&blocks);
        assert_eq!(volume.validate().unwrap(), vec![]);
    }

    #[test]
    fn test_allocation_errors() {
        let mut blocks = formatted();
        let mut bam = Bam::read(&blocks).unwrap();
        bam.free(Location(18, 0)).unwrap();
        bam.free(Location(17, 10)).unwrap();
        bam.allocate(Location(2, 2)).unwrap();
        bam.write(&mut blocks).unwrap();
        let volume = Volume::new(&blocks);
        assert_eq!(
            volume.validate().unwrap(),
            vec![
                ValidationError::SystemSectorNotAllocated(Location(18, 0)),
                ValidationError::SectorMisallocated(Location(2, 2)),
                ValidationError::SectorMisoccupied(Location(17, 10), "one".into()),
            ]
        );
    }

    #[test]
    fn test_file_scan_error() {
        let mut blocks = formatted();
        // Make the last block of the file point back to its first block.
        blocks.sector_mut(Location(17, 10)).unwrap()[0..2].copy_from_slice(&[17, 0]);
        let volume = Volume::new(&blocks);
        let errors = volume.validate().unwrap();
        assert_eq!(
            errors[0],
            ValidationError::FileScanError(DiskError::ChainLoop, "one".into())
        );
        assert!(errors[0].to_string().ends_with("chain loop detected"));
        // The unreadable file no longer accounts for its blocks.
        assert_eq!(
            &errors[1..],
            &[
                ValidationError::SectorMisallocated(Location(17, 0)),
                ValidationError::SectorMisallocated(Location(17, 10)),
            ]
        );
    }
}
