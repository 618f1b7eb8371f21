//! A block source view in which excluded partitions read back as zeros.
//!
//! [`RedactingStream`] owns an inner [`BlockSource`], decodes its partition
//! table once when constructed and then masks every read against the cached
//! [`RedactionPolicy`]. Seeks and writes pass straight through, so any mix of
//! seeks and reads sees the same masked view. The GPT header and entry array
//! lie outside every partition range and are never masked.
use crate::error::Result;
use crate::exclusion::ExclusionSet;
use crate::gpt::{self, PartitionDescriptor};
use crate::source::BlockSource;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::{debug, info};

/// A partition with this name marks the device as unlocked.
pub const UNLOCK_SENTINEL: &str = "IS_UNLOCKED";

/// Partition that is never zeroed on an unlocked device.
pub const UNLOCK_EXEMPT: &str = "UEFI_BS_NV";

/// The byte ranges to zero, derived from a decoded table and an exclusion set.
#[derive(Clone, Debug, Default)]
pub struct RedactionPolicy {
    redacted: Vec<PartitionDescriptor>,
    unlocked: bool,
}

impl RedactionPolicy {
    pub fn new(partitions: &[PartitionDescriptor], exclusions: &ExclusionSet) -> Self {
        let unlocked = partitions.iter().any(|p| p.name() == UNLOCK_SENTINEL);
        let redacted = partitions
            .iter()
            .filter(|p| !(unlocked && p.name() == UNLOCK_EXEMPT))
            .filter(|p| exclusions.contains(p.name()))
            .cloned()
            .collect();

        Self { redacted, unlocked }
    }

    /// Whether the table carries the [`UNLOCK_SENTINEL`] partition.
    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    /// Partitions whose content is zeroed, in table order.
    pub fn redacted(&self) -> &[PartitionDescriptor] {
        &self.redacted
    }

    pub fn redacts(&self, partition: &PartitionDescriptor) -> bool {
        self.redacted.iter().any(|p| p == partition)
    }

    /// Zeroes the bytes of `buf` that fall inside a redacted partition, where
    /// `buf[0]` holds the byte at absolute offset `read_start`.
    pub fn apply(&self, read_start: u64, buf: &mut [u8]) {
        let read_end = read_start.saturating_add(buf.len() as u64);

        for part in &self.redacted {
            let first = part.first_byte();
            let last = part.last_byte();

            if read_end <= first || read_start > last {
                continue;
            }

            if read_start >= first && read_end <= last {
                // Read lies inside the partition: nothing else can apply.
                buf.fill(0);
                return;
            }

            if read_start < first && read_end > last {
                // Partition lies inside the read.
                zero(buf, first - read_start, last - read_start + 1);
            } else if read_start >= first {
                // Read starts inside and runs past the end.
                zero(buf, 0, last - read_start + 1);
            } else {
                // Read starts before and ends inside.
                let tail = read_end - first;
                zero(buf, buf.len() as u64 - tail, buf.len() as u64);
            }
        }
    }
}

fn zero(buf: &mut [u8], start: u64, end: u64) {
    let end = end.min(buf.len() as u64) as usize;
    let start = start.min(end as u64) as usize;
    buf[start..end].fill(0);
}

/// Wraps a block source so that reads of excluded partitions return zeros.
pub struct RedactingStream<S> {
    inner: S,
    sector_size: u32,
    partitions: Vec<PartitionDescriptor>,
    policy: RedactionPolicy,
    // Tracked locally to avoid a seek per read; `None` after an inner error.
    position: Option<u64>,
}

impl<S: BlockSource> RedactingStream<S> {
    /// Decodes the partition table of `inner` and builds the redaction policy.
    ///
    /// The inner source is left positioned at byte 0.
    ///
    /// # Errors
    ///
    /// Any error from [`gpt::decode`].
    pub fn new(mut inner: S, sector_size: u32, exclusions: &ExclusionSet) -> Result<Self> {
        let partitions = gpt::decode(&mut inner, sector_size)?;
        let policy = RedactionPolicy::new(&partitions, exclusions);

        if policy.is_unlocked() {
            info!("{UNLOCK_SENTINEL} present, {UNLOCK_EXEMPT} will not be redacted");
        }
        for part in policy.redacted() {
            debug!(partition = %part, "Redacting");
        }

        Ok(Self {
            inner,
            sector_size,
            partitions,
            policy,
            position: Some(0),
        })
    }

    /// The decoded table, in on-disk order.
    pub fn partitions(&self) -> &[PartitionDescriptor] {
        &self.partitions
    }

    pub fn policy(&self) -> &RedactionPolicy {
        &self.policy
    }

    pub fn is_unlocked(&self) -> bool {
        self.policy.is_unlocked()
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn current_position(&mut self) -> io::Result<u64> {
        match self.position {
            Some(pos) => Ok(pos),
            None => {
                let pos = self.inner.stream_position()?;
                self.position = Some(pos);
                Ok(pos)
            }
        }
    }
}

impl<S: BlockSource> Read for RedactingStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read_start = self.current_position()?;
        let read = match self.inner.read(buf) {
            Ok(n) => n,
            Err(e) => {
                self.position = None;
                return Err(e);
            }
        };
        self.position = Some(read_start + read as u64);

        self.policy.apply(read_start, &mut buf[..read]);
        Ok(read)
    }
}

impl<S: BlockSource> Seek for RedactingStream<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self.inner.seek(pos) {
            Ok(new_pos) => {
                self.position = Some(new_pos);
                Ok(new_pos)
            }
            Err(e) => {
                self.position = None;
                Err(e)
            }
        }
    }
}

impl<S: BlockSource + Write> Write for RedactingStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let start = self.current_position()?;
        match self.inner.write(buf) {
            Ok(n) => {
                self.position = Some(start + n as u64);
                Ok(n)
            }
            Err(e) => {
                self.position = None;
                Err(e)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<S: BlockSource> BlockSource for RedactingStream<S> {
    fn length(&mut self) -> io::Result<u64> {
        self.inner.length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testing::{GptImage, pattern};
    use proptest::prelude::*;
    use std::io::Cursor;

    fn read_at<R: Read + Seek>(stream: &mut R, offset: u64, len: usize) -> Vec<u8> {
        stream.seek(SeekFrom::Start(offset)).unwrap();
        let mut buf = vec![0xEE; len];
        stream.read_exact(&mut buf).unwrap();
        buf
    }

    fn two_partition_policy(excluded: &[&str]) -> RedactionPolicy {
        let parts = [
            PartitionDescriptor::new("A", 0, 1023),
            PartitionDescriptor::new("B", 1024, 2047),
        ];
        RedactionPolicy::new(&parts, &ExclusionSet::from_names(excluded))
    }

    fn sample_disk() -> Vec<u8> {
        GptImage::new(512)
            .partition("MainOS", 3, 10)
            .partition("DPP", 11, 20)
            .partition("Data", 21, 30)
            .partition("MODEM_FSG", 31, 40)
            .build()
    }

    #[test]
    fn read_spanning_end_of_kept_and_start_of_excluded() {
        let policy = two_partition_policy(&["B"]);
        let mut buf: Vec<u8> = (512..1536u64).map(pattern).collect();

        policy.apply(512, &mut buf);

        let expected: Vec<u8> = (512..1024u64).map(pattern).collect();
        assert_eq!(&buf[..512], &expected[..]);
        assert!(buf[512..].iter().all(|&b| b == 0));
    }

    #[test]
    fn read_inside_excluded_partition_is_all_zero() {
        let policy = two_partition_policy(&["b"]);
        let mut buf = vec![0xAA; 100];

        policy.apply(1100, &mut buf);

        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn excluded_partition_inside_read_is_bounded() {
        let parts = [PartitionDescriptor::new("X", 100, 199)];
        let policy = RedactionPolicy::new(&parts, &ExclusionSet::from_names(["X"]));
        let mut buf = vec![0xAA; 400];

        policy.apply(0, &mut buf);

        assert!(buf[..100].iter().all(|&b| b == 0xAA));
        assert!(buf[100..200].iter().all(|&b| b == 0));
        assert!(buf[200..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn read_starting_inside_and_running_past_end() {
        let parts = [PartitionDescriptor::new("X", 100, 199)];
        let policy = RedactionPolicy::new(&parts, &ExclusionSet::from_names(["X"]));
        let mut buf = vec![0xAA; 100];

        policy.apply(150, &mut buf);

        assert!(buf[..50].iter().all(|&b| b == 0));
        assert!(buf[50..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn gap_between_excluded_partitions_is_kept() {
        let parts = [
            PartitionDescriptor::new("X", 100, 199),
            PartitionDescriptor::new("keep", 200, 299),
            PartitionDescriptor::new("Y", 300, 399),
        ];
        let policy = RedactionPolicy::new(&parts, &ExclusionSet::from_names(["x", "y"]));
        let mut buf = vec![0xAA; 500];

        policy.apply(0, &mut buf);

        assert!(buf[..100].iter().all(|&b| b == 0xAA));
        assert!(buf[100..200].iter().all(|&b| b == 0));
        assert!(buf[200..300].iter().all(|&b| b == 0xAA));
        assert!(buf[300..400].iter().all(|&b| b == 0));
        assert!(buf[400..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn empty_read_is_untouched() {
        let policy = two_partition_policy(&["A", "B"]);
        let mut buf: [u8; 0] = [];

        policy.apply(1024, &mut buf);
    }

    #[test]
    fn stream_zeroes_only_excluded_partitions() {
        let disk = sample_disk();
        let mut stream =
            RedactingStream::new(Cursor::new(disk.clone()), 512, &ExclusionSet::builtin()).unwrap();

        let dpp = read_at(&mut stream, 11 * 512, 9 * 512);
        let main = read_at(&mut stream, 3 * 512, 8 * 512);
        let modem = read_at(&mut stream, 31 * 512, 512);

        assert!(dpp.iter().all(|&b| b == 0));
        assert_eq!(main, disk[3 * 512..11 * 512]);
        assert!(modem.iter().all(|&b| b == 0));
    }

    #[test]
    fn gpt_structures_pass_through() {
        let disk = sample_disk();
        let mut stream =
            RedactingStream::new(Cursor::new(disk.clone()), 512, &ExclusionSet::builtin()).unwrap();

        let head = read_at(&mut stream, 0, 3 * 512);

        assert_eq!(head, disk[..3 * 512]);
    }

    #[test]
    fn redecoding_redacted_stream_yields_same_table() {
        let disk = sample_disk();
        let original = gpt::decode(&mut Cursor::new(disk.clone()), 512).unwrap();
        let mut stream =
            RedactingStream::new(Cursor::new(disk), 512, &ExclusionSet::builtin()).unwrap();

        let redecoded = gpt::decode(&mut stream, 512).unwrap();

        assert_eq!(redecoded, original);
        assert_eq!(stream.partitions(), &original[..]);
    }

    #[test]
    fn redaction_is_idempotent() {
        let disk = sample_disk();
        let exclusions = ExclusionSet::builtin();
        let once = RedactingStream::new(Cursor::new(disk.clone()), 512, &exclusions).unwrap();
        let mut single = RedactingStream::new(Cursor::new(disk), 512, &exclusions).unwrap();
        let mut twice = RedactingStream::new(once, 512, &exclusions).unwrap();

        let mut a = Vec::new();
        let mut b = Vec::new();
        single.read_to_end(&mut a).unwrap();
        twice.read_to_end(&mut b).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn unlock_sentinel_exempts_uefi_bs_nv() {
        let locked = GptImage::new(512).partition("UEFI_BS_NV", 3, 6).build();
        let unlocked = GptImage::new(512)
            .partition("UEFI_BS_NV", 3, 6)
            .partition("IS_UNLOCKED", 7, 8)
            .build();
        let exclusions = ExclusionSet::builtin();

        let mut locked_stream =
            RedactingStream::new(Cursor::new(locked), 512, &exclusions).unwrap();
        let mut unlocked_stream =
            RedactingStream::new(Cursor::new(unlocked.clone()), 512, &exclusions).unwrap();

        assert!(!locked_stream.is_unlocked());
        assert!(unlocked_stream.is_unlocked());
        assert!(read_at(&mut locked_stream, 3 * 512, 1024).iter().all(|&b| b == 0));
        assert_eq!(
            read_at(&mut unlocked_stream, 3 * 512, 1024),
            unlocked[3 * 512..5 * 512]
        );
    }

    #[test]
    fn unknown_exclusion_leaves_everything() {
        let disk = sample_disk();
        let mut stream = RedactingStream::new(
            Cursor::new(disk.clone()),
            512,
            &ExclusionSet::from_names(["bogus_name"]),
        )
        .unwrap();

        let mut all = Vec::new();
        stream.read_to_end(&mut all).unwrap();

        assert!(stream.policy().redacted().is_empty());
        assert_eq!(all, disk);
    }

    #[test]
    fn construction_fails_without_table() {
        let result = RedactingStream::new(
            Cursor::new(vec![0u8; 4096]),
            512,
            &ExclusionSet::builtin(),
        );

        assert!(matches!(result, Err(Error::SignatureNotFound)));
    }

    #[test]
    fn position_and_length_pass_through() {
        let disk = sample_disk();
        let len = disk.len() as u64;
        let mut stream =
            RedactingStream::new(Cursor::new(disk), 512, &ExclusionSet::builtin()).unwrap();

        assert_eq!(stream.stream_position().unwrap(), 0);
        stream.seek(SeekFrom::Start(5000)).unwrap();
        let mut buf = [0u8; 100];
        stream.read_exact(&mut buf).unwrap();

        assert_eq!(stream.stream_position().unwrap(), 5100);
        assert_eq!(stream.length().unwrap(), len);
        assert_eq!(stream.into_inner().position(), 5100);
    }

    #[test]
    fn writes_are_not_redacted() {
        let disk = sample_disk();
        let mut stream =
            RedactingStream::new(Cursor::new(disk), 512, &ExclusionSet::builtin()).unwrap();

        stream.seek(SeekFrom::Start(11 * 512)).unwrap();
        stream.write_all(&[0x42; 16]).unwrap();

        let inner = stream.into_inner().into_inner();
        assert_eq!(&inner[11 * 512..11 * 512 + 16], &[0x42; 16]);
    }

    proptest! {
        #[test]
        fn masked_bytes_match_excluded_ranges(
            offset in 0u64..(64 * 512),
            len in 0usize..(8 * 512),
        ) {
            let disk = sample_disk();
            let total = disk.len() as u64;
            let mut stream =
                RedactingStream::new(Cursor::new(disk.clone()), 512, &ExclusionSet::builtin())
                    .unwrap();
            let ranges: Vec<(u64, u64)> = stream
                .policy()
                .redacted()
                .iter()
                .map(|p| (p.first_byte(), p.last_byte()))
                .collect();

            stream.seek(SeekFrom::Start(offset)).unwrap();
            let mut buf = vec![0xEE; len];
            let read = stream.read(&mut buf).unwrap();
            prop_assert_eq!(read as u64, (len as u64).min(total - offset));

            for (i, &byte) in buf[..read].iter().enumerate() {
                let at = offset + i as u64;
                let excluded = ranges.iter().any(|&(first, last)| at >= first && at <= last);
                let expected = if excluded { 0 } else { disk[at as usize] };
                prop_assert_eq!(byte, expected, "offset {}", at);
            }
        }
    }
}
