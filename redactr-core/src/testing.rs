//! In-memory GPT disk images for tests.
//!
//! Compiled for this crate's own tests and, behind the `testing` feature, for
//! integration tests and downstream crates.

/// Partition type GUID written for every populated entry (Microsoft basic data).
pub const BASIC_DATA: [u8; 16] = [
    0xa2, 0xa0, 0xd0, 0xeb, 0xe5, 0xb9, 0x33, 0x44, 0x87, 0xc0, 0x68, 0xb6, 0xb7, 0x26, 0x99, 0xc7,
];

struct Entry {
    type_guid: [u8; 16],
    first_lba: u64,
    last_lba: u64,
    name: String,
}

/// Builds a raw disk image with a GPT header, an entry array and
/// partition content filled with a non-zero pattern.
pub struct GptImage {
    sector_size: u32,
    protective_mbr: bool,
    entry_count: u32,
    entry_size: u32,
    total_sectors: u64,
    entries: Vec<Entry>,
}

/// Byte expected at `offset` of a built image outside the GPT structures.
pub fn pattern(offset: u64) -> u8 {
    (offset % 251) as u8 + 1
}

impl GptImage {
    pub fn new(sector_size: u32) -> Self {
        Self {
            sector_size,
            protective_mbr: true,
            entry_count: 4,
            entry_size: 128,
            total_sectors: 64,
            entries: Vec::new(),
        }
    }

    pub fn without_protective_mbr(mut self) -> Self {
        self.protective_mbr = false;
        self
    }

    pub fn entry_layout(mut self, count: u32, size: u32) -> Self {
        self.entry_count = count;
        self.entry_size = size;
        self
    }

    pub fn total_sectors(mut self, sectors: u64) -> Self {
        self.total_sectors = sectors;
        self
    }

    pub fn partition(mut self, name: &str, first_lba: u64, last_lba: u64) -> Self {
        self.entries.push(Entry {
            type_guid: BASIC_DATA,
            first_lba,
            last_lba,
            name: name.to_string(),
        });
        self
    }

    /// Adds an entry whose type GUID is all zero, as left behind by a deleted partition.
    pub fn hole(mut self) -> Self {
        self.entries.push(Entry {
            type_guid: [0; 16],
            first_lba: 0,
            last_lba: 0,
            name: String::new(),
        });
        self
    }

    pub fn header_offset(&self) -> usize {
        if self.protective_mbr {
            self.sector_size as usize
        } else {
            0
        }
    }

    pub fn array_offset(&self) -> usize {
        self.header_offset() + self.sector_size as usize
    }

    pub fn build(&self) -> Vec<u8> {
        let ss = self.sector_size as usize;
        let len = self.total_sectors as usize * ss;
        let mut disk: Vec<u8> = (0..len as u64).map(pattern).collect();

        let header = self.header_offset();
        disk[header..header + ss].fill(0);
        disk[header..header + 8].copy_from_slice(b"EFI PART");
        disk[header + 0x50..header + 0x54].copy_from_slice(&self.entry_count.to_le_bytes());
        disk[header + 0x54..header + 0x58].copy_from_slice(&self.entry_size.to_le_bytes());

        let array = self.array_offset();
        let raw = self.entry_count as usize * self.entry_size as usize;
        let array_len = raw.div_ceil(ss) * ss;
        disk[array..array + array_len].fill(0);

        for (i, entry) in self.entries.iter().enumerate() {
            let at = array + i * self.entry_size as usize;
            disk[at..at + 16].copy_from_slice(&entry.type_guid);
            disk[at + 16..at + 32].copy_from_slice(&[0x5a; 16]);
            disk[at + 32..at + 40].copy_from_slice(&entry.first_lba.to_le_bytes());
            disk[at + 40..at + 48].copy_from_slice(&entry.last_lba.to_le_bytes());
            for (j, unit) in entry.name.encode_utf16().take(36).enumerate() {
                disk[at + 56 + j * 2..at + 58 + j * 2].copy_from_slice(&unit.to_le_bytes());
            }
        }

        disk
    }
}
