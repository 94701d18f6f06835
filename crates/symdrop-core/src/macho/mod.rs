//! Mach-O build identifier extraction.
//!
//! This module walks the headers of thin and fat (universal) Mach-O images
//! and recovers the `LC_UUID` build identifier of every architecture slice.
//!
//! ## Algorithm Overview
//!
//! 1. Read the first 4 bytes as a big-endian magic number and classify it
//!    (32-bit thin, 64-bit thin, fat, 64-bit fat; each possibly byte-swapped)
//! 2. For a fat image, read the slice table and re-read the magic at each
//!    slice offset
//! 3. For each architecture header, decode CPU type, subtype and the load
//!    command count
//! 4. Walk the load commands until `LC_UUID` is found
//!
//! Unknown magic numbers fail fast; nothing is guessed.
//!
//! ```no_run
//! use symdrop_core::macho;
//!
//! for entry in macho::parse_file("App.dSYM/Contents/Resources/DWARF/App")? {
//!     println!("{} {}", entry.arch, entry.build_id);
//! }
//! # Ok::<(), symdrop_core::Error>(())
//! ```

mod arch;
mod view;

use crate::error::{classify_io, ErrorKind, Result, WrappedError};
use std::fs::File;
use std::path::Path;
use tracing::{debug, trace};
use view::ParseResult;

pub use arch::{
    Arch, CPU_TYPE_ARM, CPU_TYPE_ARM64, CPU_TYPE_ARM64_32, CPU_TYPE_X86, CPU_TYPE_X86_64,
};
pub use view::{read_u32, read_u64, ByteSource};

/// Format tag attached to every entry produced by this parser
pub const FILE_FORMAT: &str = "macho";

/// Load command carrying the 128-bit build identifier
pub const LC_UUID: u32 = 0x1b;

const MH_MAGIC: u32 = 0xfeed_face;
const MH_CIGAM: u32 = 0xcefa_edfe;
const MH_MAGIC_64: u32 = 0xfeed_facf;
const MH_CIGAM_64: u32 = 0xcffa_edfe;
const FAT_MAGIC: u32 = 0xcafe_babe;
const FAT_CIGAM: u32 = 0xbeba_feca;
const FAT_MAGIC_64: u32 = 0xcafe_babf;
const FAT_CIGAM_64: u32 = 0xbfba_feca;

const MAGIC_BYTES: usize = 4;
const MACH_HEADER_BYTES: usize = 28;
const MACH_HEADER_64_BYTES: usize = 32;
const FAT_HEADER_BYTES: usize = 8;
const FAT_ARCH_BYTES: usize = 20;
const FAT_ARCH_64_BYTES: usize = 32;
const LOAD_COMMAND_BYTES: usize = 8;
const UUID_BYTES: usize = 16;

/// Classified magic number of an image or slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    /// 32-bit architecture header
    Thin32 {
        /// Fields are stored little-endian
        swapped: bool,
    },
    /// 64-bit architecture header
    Thin64 {
        /// Fields are stored little-endian
        swapped: bool,
    },
    /// Fat header with 32-bit slice offsets
    Fat {
        /// Fields are stored little-endian
        swapped: bool,
    },
    /// Fat header with 64-bit slice offsets
    Fat64 {
        /// Fields are stored little-endian
        swapped: bool,
    },
}

impl Magic {
    /// Classifies a magic number read big-endian from the first 4 bytes
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            MH_MAGIC => Some(Magic::Thin32 { swapped: false }),
            MH_CIGAM => Some(Magic::Thin32 { swapped: true }),
            MH_MAGIC_64 => Some(Magic::Thin64 { swapped: false }),
            MH_CIGAM_64 => Some(Magic::Thin64 { swapped: true }),
            FAT_MAGIC => Some(Magic::Fat { swapped: false }),
            FAT_CIGAM => Some(Magic::Fat { swapped: true }),
            FAT_MAGIC_64 => Some(Magic::Fat64 { swapped: false }),
            FAT_CIGAM_64 => Some(Magic::Fat64 { swapped: true }),
            _ => None,
        }
    }

    /// Returns true for fat (multi-slice) containers
    pub fn is_fat(self) -> bool {
        matches!(self, Magic::Fat { .. } | Magic::Fat64 { .. })
    }
}

/// Build identifier of one architecture slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchEntry {
    /// 16 identifier bytes as 32 lowercase hex characters
    pub build_id: String,
    /// Architecture of the slice
    pub arch: Arch,
    /// Container format tag, always [`FILE_FORMAT`]
    pub file_format: &'static str,
}

/// Outcome of parsing one slice of an image
#[derive(Debug, Clone)]
pub struct SliceOutcome {
    /// Position of the slice in the fat table (0 for thin images)
    pub index: usize,
    /// Absolute offset of the slice's architecture header
    pub offset: u64,
    /// The slice's entry, or why it could not be produced
    pub result: std::result::Result<ArchEntry, WrappedError>,
}

/// Parses every slice of an image, failing on the first slice error
pub fn parse_source<S: ByteSource + ?Sized>(source: &S) -> Result<Vec<ArchEntry>> {
    parse_slices(source)?
        .into_iter()
        .map(|outcome| outcome.result.map_err(Into::into))
        .collect()
}

/// Parses every slice of an image independently.
///
/// Container-level failures (unreadable or unrecognised magic, unreadable
/// slice table) fail the whole call. Failures inside a slice are reported in
/// that slice's [`SliceOutcome`] and do not affect its siblings.
pub fn parse_slices<S: ByteSource + ?Sized>(source: &S) -> Result<Vec<SliceOutcome>> {
    let magic = read_magic(source, 0)?;
    debug!("Image magic: {:?}", magic);

    let outcomes = match magic {
        Magic::Fat { swapped } => parse_fat(source, swapped, FAT_ARCH_BYTES)?,
        Magic::Fat64 { swapped } => parse_fat(source, swapped, FAT_ARCH_64_BYTES)?,
        thin => vec![SliceOutcome {
            index: 0,
            offset: 0,
            result: parse_thin(source, 0, thin, None),
        }],
    };

    debug!("Parsed {} slice(s)", outcomes.len());
    Ok(outcomes)
}

/// Opens a file and parses every slice in it
pub fn parse_file(path: impl AsRef<Path>) -> Result<Vec<ArchEntry>> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| classify_io(format!("failed to open '{}'", path.display()), e))?;
    parse_source(&file)
}

fn read_magic<S: ByteSource + ?Sized>(source: &S, offset: u64) -> ParseResult<Magic> {
    let bytes = source.read_at(offset, MAGIC_BYTES)?;
    let value = read_u32(&bytes, 0, false)?;
    Magic::from_u32(value).ok_or_else(|| {
        WrappedError::bare(
            ErrorKind::MagicNumber,
            format!("unrecognized magic number {value:#010x} at offset {offset}"),
        )
    })
}

fn parse_fat<S: ByteSource + ?Sized>(
    source: &S,
    swapped: bool,
    record_size: usize,
) -> ParseResult<Vec<SliceOutcome>> {
    let header = source.read_at(0, FAT_HEADER_BYTES)?;
    let slice_count = read_u32(&header, 4, swapped)?;
    trace!("Fat header declares {} slice(s)", slice_count);

    let mut outcomes = Vec::new();
    let mut record_offset = FAT_HEADER_BYTES as u64;

    for index in 0..slice_count as usize {
        let record = source.read_at(record_offset, record_size)?;
        record_offset += record_size as u64;

        let cpu_type = read_u32(&record, 0, swapped)?;
        let cpu_subtype = read_u32(&record, 4, swapped)?;
        let offset = if record_size == FAT_ARCH_64_BYTES {
            read_u64(&record, 8, swapped)?
        } else {
            u64::from(read_u32(&record, 8, swapped)?)
        };
        let arch = Arch::from_cpu(cpu_type, cpu_subtype);
        trace!("Slice {} ({}) at offset {}", index, arch, offset);

        let result = read_magic(source, offset)
            .and_then(|magic| parse_thin(source, offset, magic, Some(arch)))
            .map_err(|e| e.in_slice(index, arch));

        if let Err(err) = &result {
            debug!("Slice {} failed: {}", index, err);
        }
        outcomes.push(SliceOutcome {
            index,
            offset,
            result,
        });
    }

    Ok(outcomes)
}

/// Parses one architecture header at `offset`.
///
/// `arch` overrides the name derived from the header, which is how fat slices
/// report the architecture declared in the slice table.
fn parse_thin<S: ByteSource + ?Sized>(
    source: &S,
    offset: u64,
    magic: Magic,
    arch: Option<Arch>,
) -> ParseResult<ArchEntry> {
    let (header_size, swapped) = match magic {
        Magic::Thin32 { swapped } => (MACH_HEADER_BYTES, swapped),
        Magic::Thin64 { swapped } => (MACH_HEADER_64_BYTES, swapped),
        Magic::Fat { .. } | Magic::Fat64 { .. } => {
            return Err(WrappedError::bare(
                ErrorKind::MagicNumber,
                format!("nested fat header at offset {offset}"),
            ));
        }
    };

    let header = source.read_at(offset, header_size)?;
    let cpu_type = read_u32(&header, 4, swapped)?;
    let cpu_subtype = read_u32(&header, 8, swapped)?;
    let command_count = read_u32(&header, 16, swapped)?;
    let arch = arch.unwrap_or_else(|| Arch::from_cpu(cpu_type, cpu_subtype));

    trace!(
        "Architecture header at {}: cpu {:#x}/{:#x} ({}), {} load commands, swapped={}",
        offset,
        cpu_type,
        cpu_subtype,
        arch,
        command_count,
        swapped
    );

    let commands_start = offset + header_size as u64;
    let build_id = find_build_id(source, commands_start, command_count, swapped)?;

    Ok(ArchEntry {
        build_id,
        arch,
        file_format: FILE_FORMAT,
    })
}

/// Walks `count` load commands from `start` and returns the `LC_UUID` payload as hex
fn find_build_id<S: ByteSource + ?Sized>(
    source: &S,
    start: u64,
    count: u32,
    swapped: bool,
) -> ParseResult<String> {
    let mut cursor = start;

    for index in 0..count {
        let record = source.read_at(cursor, LOAD_COMMAND_BYTES)?;
        let command = read_u32(&record, 0, swapped)?;
        let size = read_u32(&record, 4, swapped)?;

        if (size as usize) < LOAD_COMMAND_BYTES {
            return Err(WrappedError::bare(
                ErrorKind::LoadCommand,
                format!(
                    "load command {index} at offset {cursor} declares size {size}, \
                     below the {LOAD_COMMAND_BYTES} byte minimum"
                ),
            ));
        }

        if command == LC_UUID {
            let uuid = source.read_at(cursor + LOAD_COMMAND_BYTES as u64, UUID_BYTES)?;
            trace!("Found LC_UUID at offset {}", cursor);
            return Ok(hex::encode(uuid));
        }

        cursor = cursor.checked_add(u64::from(size)).ok_or_else(|| {
            WrappedError::bare(
                ErrorKind::DataView,
                format!("load command {index} size {size} overflows offset {cursor}"),
            )
        })?;
    }

    Err(WrappedError::bare(
        ErrorKind::MissingUuid,
        format!("no LC_UUID among {count} load commands"),
    ))
}
