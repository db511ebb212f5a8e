use std::collections::HashMap;
use std::io;

use cbm_gcr::disk::container::{self, ContainerKind, DETECTION_ORDER};
use cbm_gcr::disk::geometry::Geometry;
use cbm_gcr::disk::{
    BlockDevice, BlockImage, DiskError, DiskImage, FileType, Id, Location, Media, SectorError,
    Volume,
};
use cbm_gcr::Petscii;
use rand::{Rng, XorShiftRng};

const ITERATIONS: usize = 10;
// Tape archives need at least the load address.
const MIN_FILE_SIZE: usize = 2;
const MAX_FILE_SIZE: usize = 16 * 1024;
const MAX_FILES: usize = 12;
const RNG_SEED: [u8; 16] = [
    0x04, 0xC1, 0x1D, 0xB7, 0x1E, 0xDC, 0x6F, 0x41, 0x74, 0x1B, 0x8C, 0xD7, 0x32, 0x58, 0x34, 0x99,
];

const CONTENT_BYTES_PER_BLOCK: usize = 254;

static DAMAGE: &[SectorError] = &[
    SectorError::HeaderNotFound,
    SectorError::NoSync,
    SectorError::DataNotFound,
    SectorError::DataChecksum,
    SectorError::HeaderChecksum,
    SectorError::IdMismatch,
];

fn deterministic_rng() -> XorShiftRng {
    rand::SeedableRng::from_seed(RNG_SEED)
}

fn random_name(rng: &mut impl Rng) -> Petscii {
    const MIN_NAME_SIZE: usize = 1;
    const MAX_NAME_SIZE: usize = 16;
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let name_size = rng.gen_range(MIN_NAME_SIZE, MAX_NAME_SIZE + 1);
    let bytes: Vec<u8> = (0..name_size)
        .map(|_| ALPHABET[rng.gen_range(0, ALPHABET.len())])
        .collect();
    Petscii::from_bytes(&bytes)
}

fn random_id(rng: &mut impl Rng) -> Id {
    const ID_SIZE: usize = 2;
    let mut bytes = [0u8; ID_SIZE];
    rng.fill(&mut bytes);
    Id::from_bytes(&bytes)
}

fn random_file_type(rng: &mut impl Rng) -> FileType {
    static LINEAR_FILE_TYPES: &[FileType] = &[FileType::PRG, FileType::SEQ, FileType::USR];
    LINEAR_FILE_TYPES[rng.gen_range(0, LINEAR_FILE_TYPES.len())]
}

fn new_volume(mut rng: &mut impl Rng) -> BlockImage {
    let name = random_name(&mut rng);
    let id = random_id(&mut rng);
    let mut blocks = BlockImage::open_memory(Geometry::standard(35, false).unwrap());
    blocks.write_format(&name, &id).unwrap();
    blocks
}

struct RandomFile {
    name: Petscii,
    file_type: FileType,
    contents: Vec<u8>,
}

impl RandomFile {
    fn new(rng: &mut XorShiftRng) -> RandomFile {
        let name = random_name(rng);
        let size: usize = rng.gen_range(MIN_FILE_SIZE, MAX_FILE_SIZE);
        let file_type = random_file_type(rng);
        let mut contents = vec![0u8; size];
        rng.fill(&mut contents[..]);
        RandomFile {
            name,
            file_type,
            contents,
        }
    }

    fn blocks(&self) -> usize {
        ((self.contents.len() + CONTENT_BYTES_PER_BLOCK - 1) / CONTENT_BYTES_PER_BLOCK).max(1)
    }

    fn write(&self, blocks: &mut BlockImage) -> io::Result<()> {
        let entry = blocks.write_file(&self.name, self.file_type, &self.contents)?;
        assert_eq!(entry.file_size as usize, self.blocks());
        Ok(())
    }
}

/// Fill a volume with random files, skipping names that are already taken.
fn populate(rng: &mut XorShiftRng, blocks: &mut BlockImage) -> HashMap<Petscii, RandomFile> {
    let mut files = HashMap::new();
    for _ in 0..MAX_FILES {
        let file = RandomFile::new(rng);
        match file.write(blocks) {
            Ok(()) => {
                files.insert(file.name.clone(), file);
            }
            Err(ref e) => match DiskError::from_io_error(e) {
                Some(DiskError::FileExists) => {}
                Some(DiskError::DiskFull) => break,
                _ => panic!("cannot write file: {}", e),
            },
        }
    }
    files
}

fn verify_volume_state(blocks: &dyn BlockDevice, files: &HashMap<Petscii, RandomFile>) {
    let volume = Volume::new(blocks);
    assert_eq!(volume.num_files().unwrap(), files.len());
    let mut used = 0;
    for entry in volume.iter().unwrap() {
        let entry = entry.unwrap();
        let file = &files[&entry.filename];
        assert_eq!(entry.file_type(), file.file_type);
        assert_eq!(volume.read_entry(&entry).unwrap(), file.contents);
        assert_eq!(volume.entry_size(&entry).unwrap(), file.contents.len());
        used += file.blocks();
    }
    assert_eq!(volume.blocks_free().unwrap(), 664 - used);
    assert!(volume.validate().unwrap().is_empty());
    assert!(volume.check(true).is_clean());
    assert!(volume.check(false).is_clean());
}

#[test]
fn integration_test() {
    let mut rng = deterministic_rng();
    for _ in 0..ITERATIONS {
        let mut blocks = new_volume(&mut rng);
        let files = populate(&mut rng, &mut blocks);
        verify_volume_state(&blocks, &files);

        // Every disk container preserves the sectors exactly.
        for kind in [ContainerKind::D64, ContainerKind::G64].iter() {
            let bytes = kind.encode(Media::Blocks(blocks.to_geometry(false))).unwrap();
            let (detected, media) = container::decode(&bytes, &"x".into()).unwrap();
            assert_eq!(detected, *kind);
            let copy = media.into_blocks().unwrap();
            assert_eq!(copy.as_bytes(), blocks.as_bytes());
            verify_volume_state(&copy, &files);
        }

        // Tape archives preserve the files, but not their placement.
        let bytes = ContainerKind::T64
            .encode(Media::Blocks(blocks.to_geometry(false)))
            .unwrap();
        let copy = ContainerKind::T64
            .try_decode(&bytes, &"x".into())
            .unwrap()
            .into_blocks()
            .unwrap();
        let volume = Volume::new(&copy);
        assert_eq!(volume.num_files().unwrap(), files.len());
        assert!(volume.check(true).is_clean());
    }
}

#[test]
fn damaged_sectors_survive_gcr_round_trip() {
    let mut rng = deterministic_rng();
    let geometry = Geometry::standard(35, true).unwrap();
    for _ in 0..ITERATIONS {
        let mut blocks = new_volume(&mut rng).to_geometry(true);
        let files = populate(&mut rng, &mut blocks);

        // At most one damaged sector per track, and never on the directory
        // track, whose BAM carries the disk ID every header is compared to.
        let mut damaged = HashMap::new();
        for track in 1..=geometry.num_tracks() {
            if track == 18 || rng.gen_range(0, 3) != 0 {
                continue;
            }
            let sector = rng.gen_range(0, geometry.num_sectors(track));
            let error = DAMAGE[rng.gen_range(0, DAMAGE.len())];
            blocks.set_error_code(Location(track, sector), error).unwrap();
            damaged.insert(Location(track, sector), error);
        }

        let mut disk = DiskImage::from_blocks(&blocks).unwrap();
        let decoded = disk.decode_blocks().unwrap();
        assert_eq!(decoded.error_table().is_some(), !damaged.is_empty());
        for block in 0..geometry.num_blocks() {
            let location = geometry.location_of(block);
            let expected = damaged.get(&location).copied().unwrap_or(SectorError::Ok);
            assert_eq!(decoded.error_code(location), expected, "{}", location);
            let recovered = match expected {
                SectorError::Ok | SectorError::DataChecksum | SectorError::IdMismatch => true,
                _ => false,
            };
            if recovered {
                assert_eq!(decoded.sector(location).unwrap(), blocks.sector(location).unwrap());
            }
        }

        // The checker never fails on damaged volumes; it only reports.
        let volume = Volume::new(&decoded);
        let lenient = volume.check(false);
        assert_eq!(lenient, volume.check(false));
        assert!(volume.check(true).corrupted_blocks() >= lenient.corrupted_blocks());
        assert!(files.len() <= MAX_FILES);
    }
}

#[test]
fn bit_flips_never_abort_analysis() {
    let mut rng = deterministic_rng();
    let blocks = new_volume(&mut rng);
    let mut disk = DiskImage::from_blocks(&blocks).unwrap();
    for _ in 0..200 {
        let halftrack = 2 * rng.gen_range(1, 36) - 1;
        let length = disk.halftrack_len(halftrack);
        let position = rng.gen_range(0, length);
        let bit = disk.halftrack(halftrack).bit(position);
        disk.set_bit(halftrack, position, !bit).unwrap();
        assert!(!disk.is_analyzed(halftrack));
        let analysis = disk.analyze_halftrack(halftrack);
        assert_eq!(analysis.track_length(), length);
    }
    let decoded = disk.decode_blocks().unwrap();
    assert_eq!(decoded.num_blocks(), 683);
}

#[test]
fn fallback_chain() {
    let name: Petscii = "fallback".into();
    // Too short for every container.
    assert_eq!(
        container::decode(&[0x42], &name).unwrap_err(),
        DiskError::UnknownFormat
    );
    // A D64-sized file of zeros is a sector image, even though PRG would
    // also accept it.
    let (kind, media) = container::decode(&vec![0u8; 174848], &name).unwrap();
    assert_eq!(kind, ContainerKind::D64);
    let blocks = media.into_blocks().unwrap();
    let volume = Volume::new(&blocks);
    assert!(!volume.has_file_system());
    assert_eq!(volume.num_files().unwrap_err(), DiskError::NoFileSystem);
    assert_eq!(volume.read_byte(0, 0), 0);
    // Any other size, and only PRG is left.
    assert_eq!(
        container::decode(&vec![0u8; 1000], &name).unwrap().0,
        ContainerKind::Prg
    );
    assert_eq!(DETECTION_ORDER.last(), Some(&ContainerKind::Prg));
}
