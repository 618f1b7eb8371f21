//! Decoding of the GUID Partition Table.
//!
//! Only the fields needed to locate partitions by name are read: the entry
//! count and entry size from the header, and the type GUID, LBA range and
//! UTF-16 name of every entry. CRCs and the backup table are not consulted.
use crate::error::{Error, Result};
use crate::source::read_full;
use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use tracing::debug;

/// Sector size assumed for image files when none is reported.
pub const DEFAULT_SECTOR_SIZE: u32 = 512;

const SIGNATURE: &[u8; 8] = b"EFI PART";
const ENTRY_COUNT_OFFSET: usize = 0x50;
const ENTRY_SIZE_OFFSET: usize = 0x54;

/// Smallest sector that still holds the header fields read by [`decode`].
pub const MIN_SECTOR_SIZE: u32 = (ENTRY_SIZE_OFFSET + 4) as u32;

// Fixed part of every entry; the declared entry size may be larger.
const ENTRY_LAYOUT_SIZE: usize = 128;
const FIRST_LBA_OFFSET: usize = 32;
const LAST_LBA_OFFSET: usize = 40;
const NAME_OFFSET: usize = 56;
const NAME_LEN: usize = 72;

// Real tables are 16 KiB; anything this large is a corrupt header.
const MAX_ARRAY_BYTES: u64 = 4 * 1024 * 1024;

/// A named partition and the inclusive byte range it covers.
///
/// `last_byte` is `LastLBA * sector_size`, i.e. the first byte of the last
/// sector, not the last byte of that sector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionDescriptor {
    name: String,
    first_byte: u64,
    last_byte: u64,
}

impl PartitionDescriptor {
    pub fn new(name: impl Into<String>, first_byte: u64, last_byte: u64) -> Self {
        Self {
            name: name.into(),
            first_byte,
            last_byte,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn first_byte(&self) -> u64 {
        self.first_byte
    }

    pub fn last_byte(&self) -> u64 {
        self.last_byte
    }

    /// Number of bytes in `[first_byte, last_byte]`, or zero for an inverted range.
    pub fn byte_len(&self) -> u64 {
        if self.last_byte < self.first_byte {
            0
        } else {
            self.last_byte - self.first_byte + 1
        }
    }
}

impl fmt::Display for PartitionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} - {}", self.name, self.first_byte, self.last_byte)
    }
}

/// Decodes the partition table at the start of `source`.
///
/// The header is expected in the first sector, or in the second one when the
/// first holds a protective MBR. The entry array is read from the sector that
/// directly follows the header. Entries are returned in table order up to the
/// first one whose type GUID is all zero.
///
/// The source is rewound to byte 0 before and after decoding.
///
/// # Errors
///
/// - [`Error::SignatureNotFound`] if neither sector carries `EFI PART`.
/// - [`Error::DecodeFailure`] if the entry array is empty, implausibly large,
///   uses entries smaller than 128 bytes, or is cut short by the end of the
///   source.
/// - [`Error::Io`] if reading or seeking fails.
pub fn decode<R>(source: &mut R, sector_size: u32) -> Result<Vec<PartitionDescriptor>>
where
    R: Read + Seek + ?Sized,
{
    if sector_size < MIN_SECTOR_SIZE {
        return Err(Error::decode(format!(
            "sector size {sector_size} cannot hold a GPT header"
        )));
    }

    source.seek(SeekFrom::Start(0))?;
    let partitions = read_table(source, sector_size);
    source.seek(SeekFrom::Start(0))?;
    partitions
}

fn read_table<R>(source: &mut R, sector_size: u32) -> Result<Vec<PartitionDescriptor>>
where
    R: Read + Seek + ?Sized,
{
    let mut header = vec![0u8; sector_size as usize];
    let mut found = None;
    for lba in 0..2u64 {
        let read = read_full(source, &mut header)?;
        if read == header.len() && header.starts_with(SIGNATURE) {
            found = Some(lba);
            break;
        }
    }
    let header_lba = found.ok_or(Error::SignatureNotFound)?;

    let entry_count = le_u32(&header, ENTRY_COUNT_OFFSET);
    let entry_size = le_u32(&header, ENTRY_SIZE_OFFSET);
    debug!(header_lba, entry_count, entry_size, "GPT header found");

    let array_len = array_byte_len(entry_count, entry_size, sector_size)?;
    if (entry_size as usize) < ENTRY_LAYOUT_SIZE {
        return Err(Error::decode(format!(
            "entry size {entry_size} is smaller than the {ENTRY_LAYOUT_SIZE}-byte entry layout"
        )));
    }

    let mut array = vec![0u8; array_len];
    let read = read_full(source, &mut array)?;
    if read < array_len {
        return Err(Error::decode(format!(
            "partition array truncated: expected {array_len} bytes, read {read}"
        )));
    }

    Ok(parse_entries(&array, entry_count, entry_size, sector_size))
}

/// Length of the entry array rounded up to whole sectors.
fn array_byte_len(entry_count: u32, entry_size: u32, sector_size: u32) -> Result<usize> {
    let sector_size = u64::from(sector_size);
    let raw = u64::from(entry_count) * u64::from(entry_size);
    let len = raw.div_ceil(sector_size) * sector_size;

    if len == 0 {
        return Err(Error::decode("header declares an empty partition array"));
    }
    if len > MAX_ARRAY_BYTES {
        return Err(Error::decode(format!(
            "header declares a {len}-byte partition array"
        )));
    }
    Ok(len as usize)
}

fn parse_entries(
    array: &[u8],
    entry_count: u32,
    entry_size: u32,
    sector_size: u32,
) -> Vec<PartitionDescriptor> {
    // Walking stops at the first unused slot, so entries behind a hole are
    // never reported.
    array
        .chunks_exact(entry_size as usize)
        .take(entry_count as usize)
        .take_while(|entry| entry[..16].iter().any(|&b| b != 0))
        .map(|entry| parse_entry(entry, sector_size))
        .collect()
}

fn parse_entry(entry: &[u8], sector_size: u32) -> PartitionDescriptor {
    let sector_size = u64::from(sector_size);
    let first_lba = le_u64(entry, FIRST_LBA_OFFSET);
    let last_lba = le_u64(entry, LAST_LBA_OFFSET);

    let units: Vec<u16> = entry[NAME_OFFSET..NAME_OFFSET + NAME_LEN]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let name = String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .to_string();

    PartitionDescriptor {
        name,
        first_byte: first_lba.saturating_mul(sector_size),
        last_byte: last_lba.saturating_mul(sector_size),
    }
}

fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn le_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}
