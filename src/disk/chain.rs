use std::collections::HashSet;
use std::io;

use log::trace;

use crate::disk::bam::Bam;
use crate::disk::block::{BlockDevice, BlockImage, Location, BLOCK_SIZE};
use crate::disk::error::DiskError;

/// Data bytes carried by each block of a chain, after the two-byte link.
pub const CHAIN_DATA_SIZE: usize = BLOCK_SIZE - 2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ChainLink {
    Next(Location),
    Tail(usize), // used bytes
}

impl ChainLink {
    #[inline]
    pub fn new(block: &[u8]) -> io::Result<ChainLink> {
        if block[0] == 0x00 {
            // This is the last sector of the chain, so the next byte indicates how much of
            // this sector is actually used.
            if block[1] < 1 {
                // It's not valid for a chain sector to not include the first two bytes
                // as allocated.
                return Err(DiskError::InvalidChainLink.into());
            }
            Ok(ChainLink::Tail(block[1] as usize + 1)) // 2..=256
        } else {
            Ok(ChainLink::Next(Location::new(block[0], block[1])))
        }
    }

    #[inline]
    pub fn to_bytes(&self, bytes: &mut [u8]) {
        assert!(bytes.len() >= 2);
        match &self {
            ChainLink::Next(location) => location.write_bytes(bytes),
            ChainLink::Tail(size) => {
                assert!(*size >= 2 && *size <= 256);
                bytes[0] = 0x00;
                bytes[1] = (*size - 1) as u8;
            }
        }
    }
}

/// A ChainSector is the result of a chain iteration, and provides the block contents and the
/// location from which it was read.
pub struct ChainSector {
    /// The block contents trimmed to the used bytes, including the two-byte
    /// NTS (next track and sector) link.
    pub data: Vec<u8>,
    pub location: Location,
}

/// Returns a ChainSector which includes the NTS (next track and sector) link.
pub struct ChainIterator<'a> {
    blocks: &'a dyn BlockDevice,
    next_sector: Option<Location>,
    visited_sectors: HashSet<Location>,
}

impl<'a> ChainIterator<'a> {
    /// Create a new chain iterator starting at the specified location.
    pub fn new(blocks: &'a dyn BlockDevice, starting_sector: Location) -> ChainIterator<'a> {
        ChainIterator {
            blocks,
            next_sector: Some(starting_sector),
            visited_sectors: HashSet::new(),
        }
    }

    /// Read the entire chain and return a list of locations.
    pub fn locations(self) -> io::Result<Vec<Location>> {
        self.map(|r| r.map(|cs| cs.location)).collect()
    }

    /// Follow the chain as far as it can be read, returning the locations
    /// visited before the first error.
    pub fn readable_locations(self) -> Vec<Location> {
        self.map_while(|r| r.ok().map(|cs| cs.location)).collect()
    }
}

impl<'a> Iterator for ChainIterator<'a> {
    type Item = io::Result<ChainSector>;

    fn next(&mut self) -> Option<io::Result<ChainSector>> {
        let location = self.next_sector.take()?;

        // Loop detection.
        if !self.visited_sectors.insert(location) {
            return Some(Err(DiskError::ChainLoop.into()));
        }

        let block = match self.blocks.sector(location) {
            Ok(b) => b,
            Err(e) => return Some(Err(e)),
        };

        // Trim the block if needed.
        let size = match ChainLink::new(block) {
            Ok(ChainLink::Next(next)) => {
                self.next_sector = Some(next);
                BLOCK_SIZE // The entire sector is used.
            }
            Ok(ChainLink::Tail(size)) => size,
            Err(e) => return Some(Err(e)),
        };
        trace!("chain block {} uses {} bytes", location, size);

        Some(Ok(ChainSector {
            data: block[..size].to_vec(),
            location,
        }))
    }
}

/// ChainReader objects implement the Read trait and are used to read a byte
/// stream represented as a series of chained sectors on the disk image.
/// PRG, SEQ and USR files store their data in a single chain where the
/// beginning track and sector is provided in the directory entry.
pub struct ChainReader<'a> {
    chain: ChainIterator<'a>,
    block: Option<Vec<u8>>,
    eof: bool,
}

impl<'a> ChainReader<'a> {
    pub fn new(blocks: &'a dyn BlockDevice, start: Location) -> ChainReader<'a> {
        ChainReader {
            chain: ChainIterator::new(blocks, start),
            block: None,
            eof: false,
        }
    }
}

impl<'a> io::Read for ChainReader<'a> {
    fn read(&mut self, mut buf: &mut [u8]) -> io::Result<usize> {
        let mut total_nbytes = 0;
        while !buf.is_empty() && !self.eof {
            match self.block.take() {
                Some(mut block) => {
                    // Copy as much of this block as possible into the caller-provided buffer.
                    let nbytes = block.len().min(buf.len());
                    buf[0..nbytes].copy_from_slice(&block[0..nbytes]);
                    total_nbytes += nbytes;

                    // Keep the unread portion (which may be zero bytes).
                    if block.len() != nbytes {
                        self.block = Some(block.split_off(nbytes));
                    }

                    // Reduce the provided buffer slice to the unwritten portion.
                    let value: &mut [u8] = std::mem::take(&mut buf);
                    buf = &mut value[nbytes..];
                }
                None => match self.chain.next() {
                    Some(Ok(mut block)) => {
                        // discard the next-track/sector bytes
                        self.block = Some(block.data.split_off(2));
                    }
                    Some(Err(e)) => {
                        self.eof = true;
                        return Err(e);
                    }
                    None => self.eof = true,
                },
            }
        }
        Ok(total_nbytes)
    }
}

/// Write `data` into a new chain, allocating blocks from `bam` with the CBM
/// DOS interleave.  Returns the first location and the number of blocks
/// used.  The caller is responsible for writing the BAM back.
pub fn write_chain(
    blocks: &mut BlockImage,
    bam: &mut Bam,
    data: &[u8],
) -> io::Result<(Location, usize)> {
    blocks.check_writability()?;
    let mut chunks: Vec<&[u8]> = data.chunks(CHAIN_DATA_SIZE).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }

    let first = bam.next_free_block(None)?;
    bam.allocate(first)?;
    let mut location = first;
    for (i, chunk) in chunks.iter().enumerate() {
        let mut block = [0u8; BLOCK_SIZE];
        block[2..2 + chunk.len()].copy_from_slice(chunk);
        let link = if i + 1 < chunks.len() {
            let next = bam.next_free_block(Some(location))?;
            bam.allocate(next)?;
            ChainLink::Next(next)
        } else {
            ChainLink::Tail(chunk.len() + 2)
        };
        link.to_bytes(&mut block);
        blocks.write_sector(location, &block)?;
        if let ChainLink::Next(next) = link {
            location = next;
        }
    }
    Ok((first, chunks.len()))
}
