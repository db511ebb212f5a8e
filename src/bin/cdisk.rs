use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use std::fs;
use std::io::{self, Write};
use std::process;

use cbm_gcr::disk::geometry::HALFTRACKS;
use cbm_gcr::disk::{
    self, BlockDevice, BlockImage, ContainerKind, DiskError, DiskImage, Media, Volume,
    BLOCK_SIZE,
};

// Possible exit codes
static _EXIT_SUCCESS: i32 = 0;
static EXIT_FAILURE: i32 = 1;

/// If a dash is specified for a filename, this indicates that the user wants
/// to write to standard output.
static STDOUT_PSEUDOFILENAME: &str = "-";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    // Parse command-line arguments
    let app = App::new("Commodore 1541 Disk Inspector")
        .version("0.1.0")
        .about("Inspect G64/D64/T64/P00/PRG containers down to the GCR bitstream.")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(Arg::with_name("image").required(true))
        .subcommand(SubCommand::with_name("info").about("Show what the container holds"))
        .subcommand(SubCommand::with_name("dir").about("Show a directory listing"))
        .subcommand(SubCommand::with_name("bam").about("Show the Block Availability Map (BAM)"))
        .subcommand(
            SubCommand::with_name("block")
                .about("Show the contents of a block")
                .arg(
                    Arg::with_name("block")
                        .validator(number_validator)
                        .required(true),
                )
                .arg(
                    Arg::with_name("verbose")
                        .short("v")
                        .long("verbose")
                        .help("Explain every byte"),
                ),
        )
        .subcommand(
            SubCommand::with_name("analyze")
                .about("Locate the sectors on a halftrack")
                .arg(
                    Arg::with_name("halftrack")
                        .validator(halftrack_validator)
                        .required(true),
                )
                .arg(
                    Arg::with_name("verbose")
                        .short("v")
                        .long("verbose")
                        .help("Show the decoded header bytes"),
                ),
        )
        .subcommand(
            SubCommand::with_name("bits")
                .about("Show the raw bits of a halftrack")
                .arg(
                    Arg::with_name("halftrack")
                        .validator(halftrack_validator)
                        .required(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("check")
                .about("Check the file system byte by byte")
                .arg(
                    Arg::with_name("strict")
                        .short("s")
                        .long("strict")
                        .help("Also check reserved fields and data blocks"),
                )
                .arg(
                    Arg::with_name("verbose")
                        .short("v")
                        .long("verbose")
                        .multiple(true)
                        .help("Show more detail"),
                ),
        )
        .subcommand(SubCommand::with_name("validate").about("Validate the file system."))
        .subcommand(
            SubCommand::with_name("read")
                .about("Read a file from the container.")
                .arg(Arg::with_name("source_filename").required(true))
                .arg(Arg::with_name("destination_filename").required(false)),
        )
        .subcommand(
            SubCommand::with_name("convert")
                .about("Write the contents to another container.")
                .arg(
                    Arg::with_name("kind")
                        .possible_values(&["d64", "g64", "t64", "p00", "prg"])
                        .required(true),
                )
                .arg(Arg::with_name("output").required(true)),
        );

    let mut app_clone = app.clone();
    let matches = app.get_matches();

    let image = arg(&matches, "image");
    let result = match matches.subcommand() {
        ("info", Some(_)) => cmd_info(image),
        ("dir", Some(_)) => cmd_dir(image),
        ("bam", Some(_)) => cmd_bam(image),
        ("block", Some(m)) => cmd_block(image, number(arg(m, "block")), m.is_present("verbose")),
        ("analyze", Some(m)) => {
            cmd_analyze(image, number(arg(m, "halftrack")), m.is_present("verbose"))
        }
        ("bits", Some(m)) => cmd_bits(image, number(arg(m, "halftrack"))),
        ("check", Some(m)) => cmd_check(image, m.is_present("strict"), m.occurrences_of("verbose")),
        ("validate", Some(_)) => cmd_validate(image),
        ("read", Some(m)) => cmd_read(
            image,
            arg(m, "source_filename"),
            m.value_of("destination_filename"),
        ),
        ("convert", Some(m)) => cmd_convert(image, arg(m, "kind"), arg(m, "output")),
        _ => {
            let _ = app_clone.print_help();
            println!();
            process::exit(EXIT_FAILURE);
        }
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(EXIT_FAILURE);
    }
}

/// Return the value of an argument that clap has already required.
fn arg<'a>(matches: &'a ArgMatches, name: &str) -> &'a str {
    matches.value_of(name).unwrap_or_default()
}

fn number(v: &str) -> usize {
    v.parse::<usize>().unwrap_or(0)
}

fn number_validator(v: String) -> Result<(), String> {
    match v.parse::<usize>() {
        Ok(_) => Ok(()),
        Err(_) => Err("Expected a number.".to_string()),
    }
}

/// Require a halftrack argument to be a number in the range 1-84.
fn halftrack_validator(v: String) -> Result<(), String> {
    match v.parse::<usize>() {
        Ok(n) if n >= 1 && n <= HALFTRACKS => Ok(()),
        _ => Err(format!("Expected a halftrack from 1-{}.", HALFTRACKS)),
    }
}

fn open_blocks(image: &str) -> io::Result<BlockImage> {
    let (_, media) = disk::open(image, false)?;
    media.into_blocks()
}

fn open_gcr(image: &str) -> io::Result<DiskImage> {
    let (_, media) = disk::open(image, false)?;
    media.into_gcr()
}

/// Open a file for writing
fn open_fs_writer(filename: &str) -> io::Result<Box<dyn Write>> {
    if filename == STDOUT_PSEUDOFILENAME {
        Ok(Box::new(io::stdout()))
    } else {
        Ok(Box::new(fs::File::create(filename)?))
    }
}

fn print_header(volume: &Volume) -> io::Result<()> {
    println!(
        "0 {:18} {} {}",
        format!("\"{}\"", volume.disk_name()?),
        volume.disk_id()?,
        volume.dos_type()?
    );
    Ok(())
}

fn cmd_info(image: &str) -> io::Result<()> {
    let (kind, media) = disk::open(image, false)?;
    println!("Container: {}", kind);
    if let Media::Gcr(ref gcr) = media {
        let used = (1..=HALFTRACKS).filter(|&ht| !gcr.is_halftrack_empty(ht)).count();
        println!("Halftracks in use: {}", used);
    }
    let blocks = media.into_blocks()?;
    let geometry = blocks.geometry();
    println!(
        "Tracks: {}  Blocks: {}  Error table: {}",
        geometry.num_tracks(),
        geometry.num_blocks(),
        if geometry.has_error_table() { "yes" } else { "no" }
    );
    let volume = Volume::new(&blocks);
    if !volume.has_file_system() {
        println!("{}", DiskError::NoFileSystem);
        return Ok(());
    }
    print_header(&volume)?;
    println!("Files: {}", volume.num_files()?);
    println!("{} blocks free.", volume.blocks_free()?);
    Ok(())
}

fn cmd_dir(image: &str) -> io::Result<()> {
    let blocks = open_blocks(image)?;
    let volume = Volume::new(&blocks);
    print_header(&volume)?;
    for entry in volume.iter()? {
        println!("{}", entry?);
    }
    println!("{} blocks free.", volume.blocks_free()?);
    Ok(())
}

fn cmd_bam(image: &str) -> io::Result<()> {
    let blocks = open_blocks(image)?;
    let volume = Volume::new(&blocks);
    print!("{:?}", volume.bam()?);
    Ok(())
}

fn cmd_block(image: &str, block: usize, verbose: bool) -> io::Result<()> {
    let blocks = open_blocks(image)?;
    let data = blocks.block(block)?;
    let volume = Volume::new(&blocks);
    println!(
        "Block {} {}: {} (status {})",
        block,
        blocks.geometry().location_of(block),
        volume.block_type(block),
        volume.error_code(block)
    );
    for (row, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        println!("{:02x}: {}", row * 16, hex.join(" "));
    }
    if verbose {
        for pos in 0..BLOCK_SIZE {
            let error = volume.check_byte(block, pos, true);
            let marker = if error.is_ok() { "" } else { " <" };
            println!(
                "{:02x} {:02x} {}{}{}",
                pos,
                data[pos],
                volume.item_type(block, pos),
                marker,
                if error.is_ok() { String::new() } else { format!(" {}", error) }
            );
        }
    }
    Ok(())
}

fn cmd_analyze(image: &str, halftrack: usize, verbose: bool) -> io::Result<()> {
    let mut gcr = open_gcr(image)?;
    let analysis = gcr.analyze_halftrack(halftrack).clone();
    println!(
        "Halftrack {}: {} bits, {} sectors found",
        halftrack,
        analysis.track_length(),
        analysis.num_sectors()
    );
    for sector in 0..analysis.num_sectors() {
        let info = analysis.sector_info(sector);
        if !info.has_header() && !info.has_data() {
            continue;
        }
        println!(
            "Sector {:2}: header {:5}..{:5}  data {:5}..{:5}  {}",
            sector,
            info.header_begin,
            info.header_end,
            info.data_begin,
            info.data_end,
            analysis.status(sector)
        );
        if verbose && info.has_header() {
            println!("    {}", gcr.sector_header_bytes_as_string(halftrack, sector, true));
        }
    }
    for error in analysis.errors() {
        println!("{}", error);
    }
    Ok(())
}

fn cmd_bits(image: &str, halftrack: usize) -> io::Result<()> {
    let gcr = open_gcr(image)?;
    let bits = gcr.track_bits_as_string(halftrack);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in bits.as_bytes().chunks(80) {
        out.write_all(line)?;
        writeln!(out)?;
    }
    Ok(())
}

fn cmd_check(image: &str, strict: bool, verbosity: u64) -> io::Result<()> {
    let blocks = open_blocks(image)?;
    let volume = Volume::new(&blocks);
    let report = volume.check(strict);
    let mut block = report.next_corrupted(None);
    while let Some(nr) = block {
        println!(
            "Block {} {}: {} errors",
            nr,
            blocks.geometry().location_of(nr),
            report.errors_in_block(nr)
        );
        if verbosity > 0 {
            for (pos, error) in report.byte_errors(nr) {
                println!("    {:02x} {}: {}", pos, volume.item_type(nr, *pos), error);
            }
        }
        block = report.next_corrupted(Some(nr));
    }
    for nr in report.used_but_unallocated.iter() {
        println!("Block {} is in use but not allocated.", nr);
    }
    for nr in report.unused_but_allocated.iter() {
        println!("Block {} is allocated but not in use.", nr);
    }
    if report.is_clean() {
        println!("No errors found.");
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("{} corrupted blocks found.", report.corrupted_blocks()),
        ))
    }
}

fn cmd_validate(image: &str) -> io::Result<()> {
    let blocks = open_blocks(image)?;
    let volume = Volume::new(&blocks);
    let errors = volume.validate()?;
    for e in errors.iter() {
        println!("{}", e);
    }
    if errors.is_empty() {
        println!("Disk validates successfully.");
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("{} errors found during validation.", errors.len()),
        ))
    }
}

fn cmd_read(
    image: &str,
    source_filename: &str,
    destination_filename: Option<&str>,
) -> io::Result<()> {
    let destination_filename = destination_filename.unwrap_or(source_filename);
    let blocks = open_blocks(image)?;
    let volume = Volume::new(&blocks);
    let entry = volume.find_file(&source_filename.into())?;
    let data = volume.read_entry(&entry)?;
    let mut writer = open_fs_writer(destination_filename)?;
    writer.write_all(&data)?;
    writer.flush()?;
    Ok(())
}

fn cmd_convert(image: &str, kind: &str, output: &str) -> io::Result<()> {
    let kind = match ContainerKind::from_name(kind) {
        Some(kind) => kind,
        None => return Err(DiskError::UnknownFormat.into()),
    };
    let (_, media) = disk::open(image, false)?;
    disk::container::write(media, kind, output, true)
}
