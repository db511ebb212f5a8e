//! Everything between the raw GCR bits of a 1541 disk and its files: the
//! bitstream analyzer, sector images, the CBM DOS file system, the
//! consistency checker, and the container formats they are stored in.

mod archive;
mod bam;
mod block;
mod chain;
mod checker;
mod disk_image;
mod error;
mod format;
mod header;
mod image;
mod validation;
mod volume;

pub mod analyzer;
pub mod bitstream;
pub mod container;
pub mod d64;
pub mod directory;
pub mod g64;
pub mod gcr;
pub mod geometry;
pub mod prg;
pub mod t64;

use std::fmt;
use std::io;
use std::ops::{Index, IndexMut};
use std::path::Path;

use crate::petscii::Petscii;

pub use self::analyzer::{SectorError, SectorInfo, TrackAnalysis};
pub use self::archive::{Archive, ArchiveItem};
pub use self::bam::{Bam, BamEntry};
pub use self::bitstream::Bitstream;
pub use self::block::{BlockDevice, BlockImage, Location, Position, BLOCK_SIZE};
pub use self::chain::{ChainIterator, ChainReader};
pub use self::checker::{rectify, ByteError, ErrorKind, ErrorReport};
pub use self::container::{ContainerKind, Media};
pub use self::directory::{DirectoryEntry, FileType};
pub use self::disk_image::DiskImage;
pub use self::error::DiskError;
pub use self::geometry::Geometry;
pub use self::header::Header;
pub use self::image::Image;
pub use self::validation::ValidationError;
pub use self::volume::{BlockType, ItemType, Volume};

/// Byte used for padding filenames, the disk name, and the header.
const PADDING_BYTE: u8 = 0xa0;
const DISK_NAME_SIZE: usize = 16;
const DISK_NAME_OFFSET: usize = 0x90;
const DISK_ID_OFFSET: usize = 0xa2;

/// The BAM and header share track 18, sector 0.
pub const BAM_LOCATION: Location = Location(18, 0);
/// Block number of `BAM_LOCATION`.
pub const BAM_BLOCK: usize = 357;
pub const FIRST_DIRECTORY_LOCATION: Location = Location(18, 1);

/// Open a container file of any supported kind.  See `container::open`.
pub fn open<P: AsRef<Path>>(path: P, writable: bool) -> io::Result<(ContainerKind, Media)> {
    container::open(path, writable)
}

/// Two-byte identifiers, such as the disk ID, which are usually shown as
/// Petscii strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Id([u8; 2]);

impl Id {
    pub fn from_bytes(bytes: &[u8]) -> Id {
        bytes.into()
    }
}

impl AsRef<[u8]> for Id {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<'a> From<&'a [u8]> for Id {
    fn from(bytes: &[u8]) -> Id {
        // Missing bytes are zero.
        Id([
            bytes.first().copied().unwrap_or(0),
            bytes.get(1).copied().unwrap_or(0),
        ])
    }
}

impl From<Petscii> for Id {
    fn from(petscii: Petscii) -> Id {
        petscii.as_bytes().into()
    }
}

impl<'a> From<&'a str> for Id {
    fn from(string: &str) -> Id {
        Petscii::from(string).into()
    }
}

impl From<Id> for Petscii {
    fn from(id: Id) -> Petscii {
        Petscii::from_bytes(&id.0)
    }
}

impl Index<usize> for Id {
    type Output = u8;
    fn index(&self, i: usize) -> &u8 {
        &self.0[i]
    }
}

impl IndexMut<usize> for Id {
    fn index_mut(&mut self, i: usize) -> &mut u8 {
        &mut self.0[i]
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", Petscii::from_bytes(&self.0))
    }
}
