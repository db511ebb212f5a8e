//! This is a Rust library for working with Commodore 1541 floppy disks below
//! the file level: the GCR-encoded bitstream that the drive head actually
//! sees, the sectors that can be recovered from it, and the CBM DOS file
//! system stored in those sectors.
//!
//! Features:
//!
//! * Decode GCR bitstreams into sector headers and data blocks, locating
//!   every SYNC mark and reporting the exact bit ranges and damage of each
//!   sector.
//! * Encode sector images back into bitstreams the way a 1541 writes them,
//!   reproducing the damage recorded in a D64 error table.
//! * Translate between track/sector locations and block numbers for the
//!   35, 40, and 42 track layouts.
//! * Read the CBM DOS file system: header, BAM, directory, and file chains.
//! * Classify every block (BAM, directory, data, empty) and every byte
//!   within a block.
//! * Check the file system byte by byte in strict or lenient mode, and
//!   repair what the check finds.
//! * Format volumes and write files using the CBM DOS "next available track
//!   and sector" algorithm.
//! * Read and write G64, D64, T64, P00, and PRG containers, detecting the
//!   container kind when it is not known.
//! * A sample `cdisk` program for inspecting containers from the command
//!   line.
//!
//! # Example
//!
//! The following example opens a container of any supported kind, runs a
//! lenient consistency check, and lists the files it holds:
//!
//! ```
//! use std::io;
//! use cbm_gcr::disk::{self, Volume};
//! # fn list_files(filename: &str) -> io::Result<()> {
//!
//! // Open the container read-only and view it as a sector image
//! let (kind, media) = disk::open(filename, false)?;
//! let blocks = media.into_blocks()?;
//! let volume = Volume::new(&blocks);
//!
//! let report = volume.check(false);
//! println!("{}: {} corrupted blocks", kind, report.corrupted_blocks());
//!
//! for entry in volume.iter()? {
//!     println!("{}", entry?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Design of disk access
//!
//! Disk access is layered:
//!
//! 1. `Image` provides access to the underlying storage: a memory-mapped file
//!    or an in-memory array.
//! 2. `DiskImage` holds the bitstream of all 84 halftracks and caches the
//!    analysis of each halftrack until its bits change.
//! 3. `BlockDevice` divides a linear image into tracks and sectors according
//!    to a `Geometry`.  A `DiskImage` decodes into a `BlockImage`, and a
//!    `BlockImage` encodes back into a `DiskImage`.
//! 4. `Volume` interprets a block device as a CBM DOS file system.  It only
//!    borrows the device, so it can never outlive it.
//! 5. The consistency checker walks a `Volume` and produces an immutable
//!    `ErrorReport`.
//!
//! Tracks start at 1 and sectors at 0, as they do in CBM DOS.  Halftracks
//! start at 1 as well; track `t` lives on halftrack `2t - 1`.
//!
//! Damage found on a disk is data, not an error: the analyzer and the
//! checker always run to completion and report what they found.  Passing an
//! invalid track, halftrack, or block number is a programming error and
//! panics.

pub mod disk;

mod petscii;
mod util;

pub use crate::petscii::Petscii;
