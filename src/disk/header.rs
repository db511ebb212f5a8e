use std::fmt;
use std::io;

use crate::disk::block::{BlockDevice, BlockImage, Location};
use crate::disk::error::DiskError;
use crate::disk::{Id, BAM_LOCATION, DISK_NAME_SIZE, FIRST_DIRECTORY_LOCATION, PADDING_BYTE};
use crate::petscii::Petscii;

/// A HeaderFormat describes where the header fields live within the 1541
/// header block.
pub struct HeaderFormat {
    pub location: Location,
    // offsets
    pub first_directory_offset: usize,
    pub disk_format_type_offset: usize,
    pub disk_name_offset: usize,
    pub disk_id_offset: usize,
    pub directory_dos_version_offset: usize,
    pub directory_format_type_offset: usize,
    pub padding_offsets: &'static [u8],
    // defaults written by a fresh format
    pub default_disk_format_type: u8,
    pub default_directory_dos_version: u8,
    pub default_directory_format_type: u8,
}

pub static HEADER_FORMAT: HeaderFormat = HeaderFormat {
    location: BAM_LOCATION,
    first_directory_offset: 0x00,
    disk_format_type_offset: 0x02,
    disk_name_offset: 0x90,
    disk_id_offset: 0xA2,
    directory_dos_version_offset: 0xA5,
    directory_format_type_offset: 0xA6,
    padding_offsets: &[0xA0, 0xA1, 0xA4, 0xA7, 0xA8, 0xA9, 0xAA],
    default_disk_format_type: b'A',
    default_directory_dos_version: b'2',
    default_directory_format_type: b'A',
};

#[derive(Clone)]
pub struct Header {
    // http://unusedino.de/ec64/technical/formats/d64.html
    // says to not trust this field.
    pub first_directory_sector: Location,
    pub disk_format_type: u8,
    pub disk_name: Petscii,
    pub disk_id: Id,
    pub directory_dos_version: u8,
    pub directory_format_type: u8,
}

impl Header {
    pub fn new(name: &Petscii, id: &Id) -> Header {
        Header {
            first_directory_sector: FIRST_DIRECTORY_LOCATION,
            disk_format_type: HEADER_FORMAT.default_disk_format_type,
            disk_name: name.clone(),
            disk_id: *id,
            directory_dos_version: HEADER_FORMAT.default_directory_dos_version,
            directory_format_type: HEADER_FORMAT.default_directory_format_type,
        }
    }

    /// Read the header from the header block.  No particular field values
    /// are enforced; see `is_cbm_dos()` for recognizing a DOS disk.
    pub fn read(blocks: &dyn BlockDevice) -> io::Result<Header> {
        let format = &HEADER_FORMAT;
        let block = blocks.sector(format.location)?;
        Ok(Header {
            first_directory_sector: Location::from_bytes(&block[format.first_directory_offset..]),
            disk_format_type: block[format.disk_format_type_offset],
            disk_name: Petscii::from_padded_bytes(
                &block[format.disk_name_offset..format.disk_name_offset + DISK_NAME_SIZE],
                PADDING_BYTE,
            ),
            disk_id: Id::from_bytes(&block[format.disk_id_offset..format.disk_id_offset + 2]),
            directory_dos_version: block[format.directory_dos_version_offset],
            directory_format_type: block[format.directory_format_type_offset],
        })
    }

    /// Write the header into the header block.  Only the fields we know
    /// about are touched, so BAM entries sharing the block are preserved.
    pub fn write(&self, blocks: &mut BlockImage) -> io::Result<()> {
        let format = &HEADER_FORMAT;
        let mut block = blocks.sector(format.location)?.to_vec();

        self.first_directory_sector
            .write_bytes(&mut block[format.first_directory_offset..]);
        block[format.disk_format_type_offset] = self.disk_format_type;
        self.disk_name
            .write_bytes_with_padding(
                &mut block[format.disk_name_offset..format.disk_name_offset + DISK_NAME_SIZE],
                PADDING_BYTE,
            )
            .map_err(|_| {
                let e: io::Error = DiskError::FilenameTooLong.into();
                e
            })?;
        block[format.disk_id_offset] = self.disk_id[0];
        block[format.disk_id_offset + 1] = self.disk_id[1];
        block[format.directory_dos_version_offset] = self.directory_dos_version;
        block[format.directory_format_type_offset] = self.directory_format_type;

        // Without the padding bytes, CBM DOS garbles the "blocks free" line of
        // directory listings.
        for padding_offset in format.padding_offsets {
            block[*padding_offset as usize] = PADDING_BYTE;
        }

        blocks.write_sector(format.location, &block)
    }

    /// Return true if the header carries the markings of a CBM DOS 2.x
    /// formatted disk.
    pub fn is_cbm_dos(&self) -> bool {
        (self.directory_dos_version == HEADER_FORMAT.default_directory_dos_version
            && self.directory_format_type == HEADER_FORMAT.default_directory_format_type)
            || self.disk_format_type == HEADER_FORMAT.default_disk_format_type
    }

    /// The two-character DOS type stored at 0xA5.
    pub fn dos_type(&self) -> Petscii {
        Petscii::from_bytes(&[self.directory_dos_version, self.directory_format_type])
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "disk name: {:?}", self.disk_name)?;
        writeln!(f, "disk id: {:?}", self.disk_id)?;
        writeln!(
            f,
            "directory dos version and format type: {}",
            self.dos_type()
        )?;
        writeln!(f, "first directory sector: {}", self.first_directory_sector)
    }
}
