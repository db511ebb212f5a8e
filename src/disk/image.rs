use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use memmap::{Mmap, MmapMut, MmapOptions};

use crate::disk::error::DiskError;

/// Backing storage for container files and linear sector images: a memory
/// map of a file, or an in-memory buffer.
pub enum Image {
    ReadOnlyMap(Mmap),
    ReadWriteMap(MmapMut),
    Memory(Box<[u8]>),
}

impl Image {
    /// Allocate a zero-filled in-memory image.
    pub fn open_memory(length: usize) -> Image {
        Image::Memory(vec![0; length].into_boxed_slice())
    }

    /// Wrap bytes that are already in memory.
    pub fn from_vec(bytes: Vec<u8>) -> Image {
        Image::Memory(bytes.into_boxed_slice())
    }

    pub fn open_read_only<P: AsRef<Path>>(path: P) -> io::Result<Image> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            // Zero-length files cannot be mapped.
            return Ok(Image::open_memory(0));
        }
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(Image::ReadOnlyMap(mmap))
    }

    pub fn open_read_write<P: AsRef<Path>>(path: P) -> io::Result<Image> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        Ok(Image::ReadWriteMap(mmap))
    }

    /// Create a file of `length` bytes and map it for writing.  If
    /// `create_new` is true, no file is allowed to exist at the target
    /// location.
    pub fn create<P: AsRef<Path>>(path: P, length: usize, create_new: bool) -> io::Result<Image> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(!create_new)
            .create_new(create_new)
            .open(path)?;
        file.set_len(length as u64)?;
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        Ok(Image::ReadWriteMap(mmap))
    }

    /// Write `bytes` to a new file at `path`.
    pub fn write_file<P: AsRef<Path>>(path: P, bytes: &[u8], create_new: bool) -> io::Result<()> {
        let mut image = Image::create(path, bytes.len(), create_new)?;
        image.slice_mut(0, bytes.len())?.copy_from_slice(bytes);
        image.flush()
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the entire contents of the image.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Image::ReadOnlyMap(mmap) => &mmap[..],
            Image::ReadWriteMap(mmap) => &mmap[..],
            Image::Memory(array) => &array[..],
        }
    }

    fn check_bounds(&self, offset: usize, length: usize) -> io::Result<()> {
        match offset.checked_add(length) {
            Some(end) if end <= self.len() => Ok(()),
            _ => Err(DiskError::InvalidOffset.into()),
        }
    }

    pub fn check_writability(&self) -> io::Result<()> {
        match self {
            Image::ReadOnlyMap(_) => Err(DiskError::ReadOnly.into()),
            Image::ReadWriteMap(_) => Ok(()),
            Image::Memory(_) => Ok(()),
        }
    }

    pub fn slice(&self, offset: usize, length: usize) -> io::Result<&[u8]> {
        self.check_bounds(offset, length)?;
        Ok(&self.bytes()[offset..offset + length])
    }

    pub fn slice_mut(&mut self, offset: usize, length: usize) -> io::Result<&mut [u8]> {
        self.check_bounds(offset, length)?;
        match self {
            Image::ReadOnlyMap(_) => Err(DiskError::ReadOnly.into()),
            Image::ReadWriteMap(mmap) => Ok(&mut mmap[offset..offset + length]),
            Image::Memory(array) => Ok(&mut array[offset..offset + length]),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self {
            Image::ReadOnlyMap(_) => Err(DiskError::ReadOnly.into()),
            Image::ReadWriteMap(mmap) => mmap.flush(),
            Image::Memory(_) => Ok(()),
        }
    }
}
