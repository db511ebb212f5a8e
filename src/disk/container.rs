//! Container detection and conversion.
//!
//! Every container kind has a decoder that either accepts a byte sequence or
//! rejects it.  When the kind cannot be determined from the file extension,
//! the decoders are tried in `DETECTION_ORDER` and the first one to succeed
//! wins.  Formats with a reliable signature come first; PRG, which accepts
//! almost anything, comes last.

use std::fmt;
use std::io;
use std::path::Path;

use log::debug;

use crate::disk::archive::Archive;
use crate::disk::block::BlockImage;
use crate::disk::disk_image::DiskImage;
use crate::disk::error::DiskError;
use crate::disk::image::Image;
use crate::disk::volume::Volume;
use crate::disk::{d64, g64, prg, t64};
use crate::petscii::Petscii;

/// Container file kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerKind {
    /// GCR bitstream of every halftrack.
    G64,
    /// Linear sector dump, optionally with an error table.
    D64,
    /// Tape archive.
    T64,
    /// PC64 single program file.
    P00,
    /// Bare program file.
    Prg,
}

/// The order in which decoders are tried when the kind is unknown.
pub static DETECTION_ORDER: [ContainerKind; 5] = [
    ContainerKind::G64,
    ContainerKind::T64,
    ContainerKind::P00,
    ContainerKind::D64,
    ContainerKind::Prg,
];

impl ContainerKind {
    pub fn from_name(name: &str) -> Option<ContainerKind> {
        match &name.to_lowercase()[..] {
            "g64" => Some(ContainerKind::G64),
            "d64" => Some(ContainerKind::D64),
            "t64" => Some(ContainerKind::T64),
            "p00" => Some(ContainerKind::P00),
            "prg" => Some(ContainerKind::Prg),
            _ => None,
        }
    }

    pub fn from_extension<P: AsRef<Path>>(path: P) -> Option<ContainerKind> {
        path.as_ref()
            .extension()
            .and_then(|s| s.to_str())
            .and_then(ContainerKind::from_name)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContainerKind::G64 => "g64",
            ContainerKind::D64 => "d64",
            ContainerKind::T64 => "t64",
            ContainerKind::P00 => "p00",
            ContainerKind::Prg => "prg",
        }
    }

    /// Return true if the container holds files rather than a disk.
    pub fn is_archive(&self) -> bool {
        match self {
            ContainerKind::T64 | ContainerKind::P00 | ContainerKind::Prg => true,
            ContainerKind::G64 | ContainerKind::D64 => false,
        }
    }

    /// Decode `bytes` as a container of this kind.  `name` is used for
    /// containers that do not carry a name of their own.
    pub fn try_decode(&self, bytes: &[u8], name: &Petscii) -> io::Result<Media> {
        match self {
            ContainerKind::G64 => Ok(Media::Gcr(g64::from_bytes(bytes)?)),
            ContainerKind::D64 => Ok(Media::Blocks(d64::from_bytes(bytes)?)),
            ContainerKind::T64 => Ok(Media::Blocks(t64::from_bytes(bytes)?.to_blocks()?)),
            ContainerKind::P00 => Ok(Media::Blocks(prg::p00_from_bytes(bytes)?.to_blocks()?)),
            ContainerKind::Prg => Ok(Media::Blocks(
                prg::prg_from_bytes(bytes, name)?.to_blocks()?,
            )),
        }
    }

    /// Serialize a medium as a container of this kind.  Archive kinds
    /// receive the files found on the medium.
    pub fn encode(&self, media: Media) -> io::Result<Vec<u8>> {
        match self {
            ContainerKind::G64 => Ok(g64::to_bytes(&media.into_gcr()?)),
            ContainerKind::D64 => d64::to_bytes(&media.into_blocks()?),
            kind => {
                let blocks = media.into_blocks()?;
                let archive = Archive::from_volume(&Volume::new(&blocks))?;
                match kind {
                    ContainerKind::T64 => t64::to_bytes(&archive),
                    ContainerKind::P00 => prg::p00_to_bytes(&archive),
                    _ => prg::prg_to_bytes(&archive),
                }
            }
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.extension().to_uppercase())
    }
}

/// A decoded container: either a bitstream-level disk or a sector-level
/// image.  Archives always decode to a sector-level image.
pub enum Media {
    Gcr(DiskImage),
    Blocks(BlockImage),
}

impl Media {
    /// Return the sector-level view, decoding the bitstream if necessary.
    pub fn into_blocks(self) -> io::Result<BlockImage> {
        match self {
            Media::Gcr(mut disk) => disk.decode_blocks(),
            Media::Blocks(blocks) => Ok(blocks),
        }
    }

    /// Return the bitstream-level view, encoding the sectors if necessary.
    pub fn into_gcr(self) -> io::Result<DiskImage> {
        match self {
            Media::Gcr(disk) => Ok(disk),
            Media::Blocks(blocks) => DiskImage::from_blocks(&blocks),
        }
    }

    pub fn is_gcr(&self) -> bool {
        match self {
            Media::Gcr(_) => true,
            Media::Blocks(_) => false,
        }
    }
}

impl fmt::Debug for Media {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Media::Gcr(disk) => write!(f, "Gcr({:?})", disk),
            Media::Blocks(blocks) => write!(f, "Blocks({:?})", blocks),
        }
    }
}

/// Try every decoder in `DETECTION_ORDER`, returning the first success.
pub fn decode(bytes: &[u8], name: &Petscii) -> io::Result<(ContainerKind, Media)> {
    for kind in DETECTION_ORDER.iter() {
        match kind.try_decode(bytes, name) {
            Ok(media) => {
                debug!("detected {} container", kind);
                return Ok((*kind, media));
            }
            Err(e) => debug!("not a {} container: {}", kind, e),
        }
    }
    Err(DiskError::UnknownFormat.into())
}

fn file_stem<P: AsRef<Path>>(path: P) -> Petscii {
    path.as_ref()
        .file_stem()
        .and_then(|s| s.to_str())
        .map(Petscii::from)
        .unwrap_or_default()
}

/// Open a container file.  The kind is taken from the file extension if it
/// has a known one; otherwise the decoders are tried in turn.  Only D64
/// files can be opened writable, in which case changes go straight to the
/// file.
pub fn open<P: AsRef<Path>>(path: P, writable: bool) -> io::Result<(ContainerKind, Media)> {
    let path = path.as_ref();
    let kind = ContainerKind::from_extension(path);
    if writable {
        return match kind {
            Some(ContainerKind::D64) => Ok((ContainerKind::D64, Media::Blocks(d64::open(path, true)?))),
            _ => Err(DiskError::ReadOnly.into()),
        };
    }

    let image = Image::open_read_only(path)?;
    let name = file_stem(path);
    match kind {
        Some(kind) => Ok((kind, kind.try_decode(image.bytes(), &name)?)),
        None => decode(image.bytes(), &name),
    }
}

/// Write a medium to a file as a container of the given kind.
pub fn write<P: AsRef<Path>>(
    media: Media,
    kind: ContainerKind,
    path: P,
    create_new: bool,
) -> io::Result<()> {
    let bytes = kind.encode(media)?;
    Image::write_file(path, &bytes, create_new)
}
