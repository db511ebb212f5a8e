//! Property tests for addressing, the GCR codec, SYNC detection, highlight
//! splitting, and the consistency checker.

use cbm_gcr::disk::analyzer::highlight_ranges;
use cbm_gcr::disk::geometry::{Geometry, MAX_TRACKS};
use cbm_gcr::disk::{gcr, BlockImage, Bitstream, FileType, Location, Volume, BAM_BLOCK, BLOCK_SIZE};
use proptest::prelude::*;

/// A track/sector pair valid on a 42-track disk.
fn location() -> impl Strategy<Value = Location> {
    (1..=MAX_TRACKS).prop_flat_map(|track| {
        let sectors = Geometry::standard(42, false).unwrap().num_sectors(track);
        (Just(track), 0..sectors).prop_map(|(t, s)| Location(t, s))
    })
}

fn sample_volume() -> BlockImage {
    let mut blocks = BlockImage::open_memory(Geometry::standard(35, false).unwrap());
    blocks.write_format(&"properties".into(), &"pp".into()).unwrap();
    for (i, name) in ["one", "two", "three"].iter().enumerate() {
        let data = vec![i as u8; 300 * (i + 1)];
        blocks.write_file(&(*name).into(), FileType::PRG, &data).unwrap();
    }
    blocks
}

proptest! {
    /// Property: block numbers and locations translate into each other
    #[test]
    fn prop_addressing_round_trip(location in location()) {
        let geometry = Geometry::standard(42, false).unwrap();
        let block = geometry.block_of(location);
        prop_assert!(block < geometry.num_blocks());
        prop_assert_eq!(geometry.track_of(block), location.0);
        prop_assert_eq!(geometry.sector_of(block), location.1);
        prop_assert_eq!(geometry.location_of(block), location);
    }

    /// Property: every block number maps onto a location and back
    #[test]
    fn prop_block_round_trip(block in 0usize..802) {
        let geometry = Geometry::standard(42, false).unwrap();
        let location = geometry.location_of(block);
        prop_assert_eq!(geometry.checked_block_of(location), Some(block));
    }

    /// Property: GCR decoding inverts encoding for every byte
    #[test]
    fn prop_gcr_byte_round_trip(byte in any::<u8>()) {
        let word = gcr::encode_byte(byte);
        prop_assert!(word < 1 << 10);
        prop_assert_eq!(gcr::decode_byte(word), Ok(byte));
    }

    /// Property: a run of ones followed by a zero is a SYNC exactly when it
    /// has at least ten ones, and the SYNC ends at the zero
    #[test]
    fn prop_sync_detection(ones in 0usize..40, zeros in 1usize..8) {
        let bits: Vec<bool> = std::iter::repeat(true)
            .take(ones)
            .chain(std::iter::repeat(false).take(zeros))
            .collect();
        let syncs: Vec<usize> = gcr::sync_positions(bits).collect();
        if ones >= gcr::SYNC_MIN_ONES {
            prop_assert_eq!(syncs, vec![ones]);
        } else {
            prop_assert!(syncs.is_empty());
        }
    }

    /// Property: highlighted ranges cover exactly the bits between begin and
    /// end, going round the end of the track if necessary
    #[test]
    fn prop_highlight_ranges(length in 1usize..500, a in 0usize..500, b in 0usize..500) {
        let (begin, end) = (a % length, b % length);
        let ranges = highlight_ranges(begin, end, length);
        let covered: usize = ranges.iter().map(|r| r.end() - r.start() + 1).sum();
        if begin == end {
            prop_assert!(ranges.is_empty());
        } else if begin < end {
            prop_assert_eq!(ranges.len(), 1);
            prop_assert_eq!(covered, end - begin + 1);
        } else {
            prop_assert_eq!(ranges.len(), 2);
            prop_assert_eq!(*ranges[0].start(), 0);
            prop_assert_eq!(*ranges[1].end(), length - 1);
            prop_assert_eq!(covered, end + 1 + length - begin);
        }
    }

    /// Property: positions on a halftrack wrap around its length
    #[test]
    fn prop_bitstream_wraps(bytes in prop::collection::vec(any::<u8>(), 1..64), position in 0usize..10_000) {
        let bits = Bitstream::from_bytes(&bytes, bytes.len() * 8);
        prop_assert_eq!(bits.bit(position), bits.bit(position % bits.len()));
    }

    /// Property: a byte that passes the strict check also passes the lenient
    /// check, whatever garbage the file system structures contain
    #[test]
    fn prop_strict_includes_lenient(
        directory in any::<bool>(),
        pos in 0usize..BLOCK_SIZE,
        value in any::<u8>(),
    ) {
        let mut blocks = sample_volume();
        let block = if directory { BAM_BLOCK + 1 } else { BAM_BLOCK };
        blocks.write_byte(block, pos, value).unwrap();
        let volume = Volume::new(&blocks);
        let strict = volume.check(true);
        let lenient = volume.check(false);
        for block in 0..volume.num_blocks() {
            for (p, _) in lenient.byte_errors(block) {
                prop_assert!(strict.byte_errors(block).iter().any(|(q, _)| q == p));
            }
        }
        if volume.check_byte(block, pos, true).is_ok() {
            prop_assert!(volume.check_byte(block, pos, false).is_ok());
        }
        prop_assert_eq!(volume.check(false), volume.check(false));
    }
}
