//! D64 containers: a plain dump of every sector in block order, optionally
//! followed by one error code byte per sector.  The layout is recognized by
//! the file size alone.

use std::io;
use std::path::Path;

use log::debug;

use crate::disk::analyzer::SectorError;
use crate::disk::block::{BlockDevice, BlockImage};
use crate::disk::error::DiskError;
use crate::disk::geometry::{Geometry, ALLOWED_GEOMETRIES};
use crate::disk::image::Image;

/// Return the D64 layout of an image of `size` bytes.
pub fn geometry_of(size: usize) -> io::Result<&'static Geometry> {
    match Geometry::find_by_size(size, &ALLOWED_GEOMETRIES) {
        Some(geometry) => Ok(geometry),
        None => Err(DiskError::InvalidLayout.into()),
    }
}

/// Open a D64 file, mapping it into memory.
pub fn open<P: AsRef<Path>>(path: P, writable: bool) -> io::Result<BlockImage> {
    let image = if writable {
        Image::open_read_write(path)?
    } else {
        Image::open_read_only(path)?
    };
    let geometry = geometry_of(image.len())?;
    BlockImage::new(image, geometry)
}

/// Interpret bytes already in memory as a D64 image.
pub fn from_bytes(bytes: &[u8]) -> io::Result<BlockImage> {
    let geometry = geometry_of(bytes.len())?;
    debug!(
        "D64 with {} tracks{}",
        geometry.num_tracks(),
        if geometry.has_error_table() {
            " and error table"
        } else {
            ""
        }
    );
    BlockImage::new(Image::from_vec(bytes.to_vec()), geometry)
}

/// Create a new, zeroed D64 file.  If `create_new` is true, no file is
/// allowed to exist at the target location.
pub fn create<P: AsRef<Path>>(
    path: P,
    geometry: &'static Geometry,
    create_new: bool,
) -> io::Result<BlockImage> {
    let image = Image::create(path, geometry.size(), create_new)?;
    let mut blocks = BlockImage::new(image, geometry)?;
    if let Some(table) = blocks.error_table_mut()? {
        for code in table.iter_mut() {
            *code = SectorError::Ok.code();
        }
    }
    Ok(blocks)
}

/// Serialize any block device as D64 bytes.
pub fn to_bytes(blocks: &dyn BlockDevice) -> io::Result<Vec<u8>> {
    let geometry = blocks.geometry();
    let mut bytes = Vec::with_capacity(geometry.size());
    for block in 0..geometry.num_blocks() {
        bytes.extend_from_slice(blocks.block(block)?);
    }
    if let Some(table) = blocks.error_table() {
        bytes.extend_from_slice(&table[..geometry.num_blocks()]);
    }
    debug_assert_eq!(bytes.len(), geometry.size());
    Ok(bytes)
}

pub fn write<P: AsRef<Path>>(blocks: &dyn BlockDevice, path: P, create_new: bool) -> io::Result<()> {
    Image::write_file(path, &to_bytes(blocks)?, create_new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::block::{Location, BLOCK_SIZE};

    #[test]
    fn test_sizes() {
        let expected = [
            (174848, 35, false),
            (175531, 35, true),
            (196608, 40, false),
            (197376, 40, true),
            (205312, 42, false),
            (206114, 42, true),
        ];
        for (size, tracks, errors) in expected.iter() {
            let geometry = geometry_of(*size).unwrap();
            assert_eq!(geometry.num_tracks(), *tracks);
            assert_eq!(geometry.has_error_table(), *errors);
        }
        assert_eq!(geometry_of(174849).unwrap_err(), DiskError::InvalidLayout);
    }

    #[test]
    fn test_bytes_round_trip() {
        let geometry = Geometry::standard(35, true).unwrap();
        let mut blocks = BlockImage::open_memory(geometry);
        blocks.write_byte(100, 7, 0xAB).unwrap();
        blocks
            .set_error_code(Location(3, 4), SectorError::DataChecksum)
            .unwrap();

        let bytes = to_bytes(&blocks).unwrap();
        assert_eq!(bytes.len(), 175531);
        assert_eq!(bytes[100 * BLOCK_SIZE + 7], 0xAB);

        let copy = from_bytes(&bytes).unwrap();
        assert_eq!(copy.read_byte(100, 7), 0xAB);
        assert_eq!(copy.error_code(Location(3, 4)), SectorError::DataChecksum);
        assert_eq!(copy.error_code(Location(3, 5)), SectorError::Ok);
        assert_eq!(copy.as_bytes(), blocks.as_bytes());
    }
}
