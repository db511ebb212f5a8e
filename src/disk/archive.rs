//! File collections that are not disks (tape archives and single program
//! files).  An archive is materialized as a freshly formatted 35-track
//! volume holding one file per item, so every container can be inspected
//! through the same `Volume` interface.

use std::fmt;
use std::io;

use log::debug;

use crate::disk::block::BlockImage;
use crate::disk::directory::FileType;
use crate::disk::geometry::Geometry;
use crate::disk::volume::Volume;
use crate::disk::{Id, DISK_NAME_SIZE};
use crate::petscii::Petscii;

/// Disk ID given to volumes synthesized from archives.
const ARCHIVE_DISK_ID: &str = "64";

#[derive(Clone, PartialEq)]
pub struct ArchiveItem {
    pub name: Petscii,
    pub file_type: FileType,
    /// File contents, starting with the two-byte load address for programs.
    pub data: Vec<u8>,
}

impl ArchiveItem {
    pub fn new(name: Petscii, file_type: FileType, data: Vec<u8>) -> ArchiveItem {
        ArchiveItem {
            name,
            file_type,
            data,
        }
    }

    /// The load address found in the first two bytes, if present.
    pub fn load_address(&self) -> Option<u16> {
        if self.data.len() >= 2 {
            Some(u16::from(self.data[0]) | u16::from(self.data[1]) << 8)
        } else {
            None
        }
    }
}

impl fmt::Debug for ArchiveItem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?} {} ({} bytes)",
            self.name,
            self.file_type,
            self.data.len()
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Archive {
    pub name: Petscii,
    pub items: Vec<ArchiveItem>,
}

impl Archive {
    pub fn new(name: Petscii) -> Archive {
        Archive {
            name,
            items: vec![],
        }
    }

    /// Collect every file of a volume.
    pub fn from_volume(volume: &Volume) -> io::Result<Archive> {
        let mut archive = Archive::new(volume.disk_name()?);
        for entry in volume.iter()? {
            let entry = entry?;
            let data = volume.read_entry(&entry)?;
            archive
                .items
                .push(ArchiveItem::new(entry.filename.clone(), entry.file_type(), data));
        }
        Ok(archive)
    }

    /// Store the archive on a freshly formatted 35-track volume.
    pub fn to_blocks(&self) -> io::Result<BlockImage> {
        let geometry = match Geometry::standard(35, false) {
            Some(geometry) => geometry,
            None => unreachable!("the 35-track geometry is always available"),
        };
        let mut blocks = BlockImage::open_memory(geometry);
        let name = Petscii::from_bytes(
            &self.name.as_bytes()[..self.name.len().min(DISK_NAME_SIZE)],
        );
        blocks.write_format(&name, &Id::from(ARCHIVE_DISK_ID))?;
        for item in self.items.iter() {
            blocks.store_file(&item.name, item.file_type, &item.data)?;
        }
        debug!(
            "materialized archive {:?} with {} items",
            self.name,
            self.items.len()
        );
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_volume_round_trip() {
        let mut archive = Archive::new("collection".into());
        archive.items.push(ArchiveItem::new(
            "intro".into(),
            FileType::PRG,
            vec![0x01, 0x08, 1, 2, 3],
        ));
        archive.items.push(ArchiveItem::new(
            "game".into(),
            FileType::PRG,
            vec![0x00, 0xC0, 9],
        ));
        assert_eq!(archive.items[0].load_address(), Some(0x0801));

        let blocks = archive.to_blocks().unwrap();
        let volume = Volume::new(&blocks);
        assert_eq!(volume.num_files().unwrap(), 2);
        assert_eq!(volume.disk_name().unwrap(), Petscii::from("collection"));
        assert_eq!(Archive::from_volume(&volume).unwrap(), archive);
    }

    #[test]
    fn test_repeated_item_names() {
        let mut archive = Archive::new("tape".into());
        for part in 0..2u8 {
            archive.items.push(ArchiveItem::new(
                "game".into(),
                FileType::PRG,
                vec![0x01, 0x08, part, part],
            ));
        }
        let blocks = archive.to_blocks().unwrap();
        let volume = Volume::new(&blocks);
        assert_eq!(volume.num_files().unwrap(), 2);
        assert_eq!(volume.file_name(1).unwrap(), Petscii::from("game"));
        assert_eq!(volume.read_file(1).unwrap(), vec![0x01, 0x08, 1, 1]);
        assert_eq!(Archive::from_volume(&volume).unwrap(), archive);
    }

    #[test]
    fn test_long_archive_name() {
        let archive = Archive::new("a name that is longer than a disk name".into());
        let blocks = archive.to_blocks().unwrap();
        let volume = Volume::new(&blocks);
        assert_eq!(volume.disk_name().unwrap().len(), DISK_NAME_SIZE);
    }
}
