//! Contains the logic for dumping every partition of a source to image files.
//!
//! The source is wrapped in a [`RedactingStream`] unless recovery mode is
//! requested, the partition table is decoded again through the resulting
//! stream, and each partition's inclusive byte range is copied to
//! `<output_dir>/<name>.img`.
use crate::error::Error;
use crate::exclusion::ExclusionSet;
use crate::geometry::GeometryProvider;
use crate::gpt::{self, PartitionDescriptor};
use crate::redact::{RedactingStream, RedactionPolicy};
use crate::source::{self, BlockSource, read_full};
use anyhow::{Context, Result, anyhow};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

// Use a 1 MiB buffer for I/O operations.
const BUFFER_SIZE: usize = 1024 * 1024;

/// What to dump and how.
#[derive(Clone, Debug)]
pub struct DumpOptions {
    /// Device, raw image, compressed image or fixed VHD to read.
    pub input: PathBuf,
    /// Directory that receives one `.img` file per partition.
    pub output_dir: PathBuf,
    /// Partitions whose content is zeroed.
    pub exclusions: ExclusionSet,
    /// Copy every partition verbatim, ignoring `exclusions`.
    pub recovery: bool,
    /// Overrides the queried or default sector size.
    pub sector_size: Option<u32>,
}

/// One partition written by [`run`].
#[derive(Clone, Debug)]
pub struct DumpedPartition {
    pub partition: PartitionDescriptor,
    pub path: PathBuf,
    pub bytes: u64,
    /// Hex SHA-256 of the bytes written.
    pub sha256: String,
    pub redacted: bool,
}

/// Summary of a completed dump.
#[derive(Clone, Debug)]
pub struct DumpReport {
    pub sector_size: u32,
    pub source_len: u64,
    pub recovery: bool,
    pub unlocked: bool,
    pub partitions: Vec<DumpedPartition>,
}

impl DumpReport {
    pub fn total_bytes(&self) -> u64 {
        self.partitions.iter().map(|p| p.bytes).sum()
    }
}

/// Dumps every partition of `options.input` into `options.output_dir`.
///
/// # Arguments
///
/// * `options` - Input, output and redaction settings.
/// * `geometry` - Answers sector size and length queries for devices.
/// * `running` - An `Arc<AtomicBool>` used to gracefully cancel the operation.
///   If the flag is set to `false`, the current partition file is removed and
///   the dump fails.
/// * `on_decompress_progress` - Called with the decompressed byte count while
///   a compressed image is being unpacked.
/// * `on_partition_start` - Called before each partition is copied with its
///   index and descriptor.
/// * `on_progress` - Called repeatedly with the bytes copied so far for the
///   current partition.
/// * `on_partition_done` - Called after each partition file is complete.
///
/// # Errors
///
/// This function will return an error if:
/// - The source cannot be opened or its partition table cannot be decoded.
/// - An output file cannot be created or written.
/// - The source ends before a partition's last byte.
/// - The operation is cancelled by the user.
pub fn run<F1, F2, F3, F4>(
    options: &DumpOptions,
    geometry: &dyn GeometryProvider,
    running: Arc<AtomicBool>,
    on_decompress_progress: F1,
    mut on_partition_start: F2,
    mut on_progress: F3,
    mut on_partition_done: F4,
) -> Result<DumpReport>
where
    F1: FnMut(u64),
    F2: FnMut(usize, &PartitionDescriptor),
    F3: FnMut(u64),
    F4: FnMut(&DumpedPartition),
{
    let source = source::open(
        &options.input,
        geometry,
        options.sector_size,
        &running,
        on_decompress_progress,
    )
    .with_context(|| format!("Failed to open {}", options.input.display()))?;

    let sector_size = source.sector_size();
    let source_len = source.byte_len();
    info!(
        "Reported source size is {} bytes - {} MB - {} GB",
        source_len,
        source_len / 1024 / 1024,
        source_len / 1024 / 1024 / 1024
    );
    info!("Selected {sector_size} B for the sector size");

    fs::create_dir_all(&options.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            options.output_dir.display()
        )
    })?;

    let mut copier = Copier {
        output_dir: &options.output_dir,
        sector_size,
        running: &*running,
        buffer: vec![0u8; BUFFER_SIZE.next_multiple_of(sector_size as usize)],
    };

    let (partitions, unlocked) = if options.recovery {
        info!("Recovery mode, no partition will be redacted");
        let partitions = copier.copy_all(
            source,
            &RedactionPolicy::default(),
            &mut on_partition_start,
            &mut on_progress,
            &mut on_partition_done,
        )?;
        (partitions, false)
    } else {
        let stream = RedactingStream::new(source, sector_size, &options.exclusions)
            .context("Failed to decode the partition table")?;
        let policy = stream.policy().clone();
        info!(
            redacted = policy.redacted().len(),
            unlocked = policy.is_unlocked(),
            "Redaction enabled"
        );
        let partitions = copier.copy_all(
            stream,
            &policy,
            &mut on_partition_start,
            &mut on_progress,
            &mut on_partition_done,
        )?;
        (partitions, policy.is_unlocked())
    };

    Ok(DumpReport {
        sector_size,
        source_len,
        recovery: options.recovery,
        unlocked,
        partitions,
    })
}

struct Copier<'a> {
    output_dir: &'a Path,
    sector_size: u32,
    running: &'a AtomicBool,
    buffer: Vec<u8>,
}

impl Copier<'_> {
    fn copy_all<S, F2, F3, F4>(
        &mut self,
        mut stream: S,
        policy: &RedactionPolicy,
        on_partition_start: &mut F2,
        on_progress: &mut F3,
        on_partition_done: &mut F4,
    ) -> Result<Vec<DumpedPartition>>
    where
        S: BlockSource,
        F2: FnMut(usize, &PartitionDescriptor),
        F3: FnMut(u64),
        F4: FnMut(&DumpedPartition),
    {
        // The table is read again through the logical stream; it is what the
        // copy phase treats as authoritative.
        let partitions = gpt::decode(&mut stream, self.sector_size)
            .context("Failed to decode the partition table")?;

        let mut used_names = HashSet::new();
        let mut dumped = Vec::with_capacity(partitions.len());

        for (index, partition) in partitions.iter().enumerate() {
            let redacted = policy.redacts(partition);
            info!("{partition}{}", if redacted { " (redacted)" } else { "" });

            let path = self
                .output_dir
                .join(output_file_name(partition, index, &mut used_names));
            on_partition_start(index, partition);

            let (bytes, sha256) = self
                .copy_partition(&mut stream, partition, &path, on_progress)
                .with_context(|| format!("Failed to dump partition '{}'", partition.name()))?;
            debug!(path = %path.display(), bytes, sha256 = %sha256, "Partition written");

            let entry = DumpedPartition {
                partition: partition.clone(),
                path,
                bytes,
                sha256,
                redacted,
            };
            on_partition_done(&entry);
            dumped.push(entry);
        }

        Ok(dumped)
    }

    fn copy_partition<S, F>(
        &mut self,
        stream: &mut S,
        partition: &PartitionDescriptor,
        path: &Path,
        on_progress: &mut F,
    ) -> Result<(u64, String)>
    where
        S: BlockSource,
        F: FnMut(u64),
    {
        let total = partition.byte_len();
        stream.seek(SeekFrom::Start(partition.first_byte()))?;

        let mut output = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut hasher = Sha256::new();
        let sector = self.sector_size as usize;

        let mut copied: u64 = 0;
        while copied < total {
            if !self.running.load(Ordering::SeqCst) {
                drop(output);
                fs::remove_file(path)?;
                return Err(Error::Cancelled.into());
            }

            let wanted = (total - copied).min(self.buffer.len() as u64) as usize;
            // Devices may reject reads that are not whole sectors, so the read
            // is rounded up and only the wanted bytes are kept.
            let aligned = wanted.next_multiple_of(sector).min(self.buffer.len());
            let got = read_full(stream, &mut self.buffer[..aligned])?;
            if got < wanted {
                return Err(anyhow!(
                    "source ended at byte {} inside the partition",
                    partition.first_byte() + copied + got as u64
                ));
            }

            let chunk = &self.buffer[..wanted];
            output.write_all(chunk)?;
            hasher.update(chunk);

            copied += wanted as u64;
            on_progress(copied);
        }

        output.flush()?;
        Ok((copied, format!("{:x}", hasher.finalize())))
    }
}

/// File name for a partition: unsafe characters become `_`, empty names
/// become `partition_<index>`, and a repeated name gets an `_<index>` suffix.
fn output_file_name(
    partition: &PartitionDescriptor,
    index: usize,
    used: &mut HashSet<String>,
) -> String {
    let mut stem: String = partition
        .name()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        stem = format!("partition_{index}");
    }
    if !used.insert(stem.to_lowercase()) {
        stem = format!("{stem}_{index}");
        used.insert(stem.to_lowercase());
    }
    format!("{stem}.img")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_sanitized_and_unique() {
        let mut used = HashSet::new();
        let names: Vec<String> = [
            PartitionDescriptor::new("MainOS", 0, 0),
            PartitionDescriptor::new("a/b c", 0, 0),
            PartitionDescriptor::new("", 0, 0),
            PartitionDescriptor::new("mainos", 0, 0),
        ]
        .iter()
        .enumerate()
        .map(|(i, p)| output_file_name(p, i, &mut used))
        .collect();

        assert_eq!(
            names,
            ["MainOS.img", "a_b_c.img", "partition_2.img", "mainos_3.img"]
        );
    }

    #[test]
    fn total_bytes_sums_partitions() {
        let part = |bytes| DumpedPartition {
            partition: PartitionDescriptor::new("x", 0, 0),
            path: PathBuf::from("x.img"),
            bytes,
            sha256: String::new(),
            redacted: false,
        };
        let report = DumpReport {
            sector_size: 512,
            source_len: 0,
            recovery: false,
            unlocked: false,
            partitions: vec![part(10), part(32)],
        };

        assert_eq!(report.total_bytes(), 42);
    }
}
