//! Lists the partitions of a source and whether each would be redacted.
use crate::exclusion::ExclusionSet;
use crate::geometry::GeometryProvider;
use crate::gpt::PartitionDescriptor;
use crate::redact::RedactingStream;
use crate::source::{self, SourceKind};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::atomic::AtomicBool;

/// A decoded partition and its redaction status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionEntry {
    pub descriptor: PartitionDescriptor,
    pub redacted: bool,
}

/// The decoded layout of a source.
#[derive(Clone, Debug)]
pub struct Inspection {
    pub kind: SourceKind,
    pub source_len: u64,
    pub sector_size: u32,
    pub unlocked: bool,
    pub partitions: Vec<PartitionEntry>,
}

impl Inspection {
    pub fn redacted_count(&self) -> usize {
        self.partitions.iter().filter(|p| p.redacted).count()
    }
}

/// Decodes the partition table of `input` without writing anything.
///
/// # Errors
///
/// Fails when the source cannot be opened or carries no decodable table.
pub fn inspect<F>(
    input: &Path,
    geometry: &dyn GeometryProvider,
    sector_size: Option<u32>,
    exclusions: &ExclusionSet,
    running: &AtomicBool,
    on_decompress_progress: F,
) -> Result<Inspection>
where
    F: FnMut(u64),
{
    let source = source::open(input, geometry, sector_size, running, on_decompress_progress)
        .with_context(|| format!("Failed to open {}", input.display()))?;
    let kind = source.kind();
    let source_len = source.byte_len();
    let sector_size = source.sector_size();

    let stream = RedactingStream::new(source, sector_size, exclusions)
        .context("Failed to decode the partition table")?;
    let policy = stream.policy();

    let partitions = stream
        .partitions()
        .iter()
        .map(|p| PartitionEntry {
            descriptor: p.clone(),
            redacted: policy.redacts(p),
        })
        .collect();

    Ok(Inspection {
        kind,
        source_len,
        sector_size,
        unlocked: policy.is_unlocked(),
        partitions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::geometry::StaticGeometry;
    use crate::testing::GptImage;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn image_file(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    #[test]
    fn marks_excluded_partitions() {
        let disk = GptImage::new(512)
            .partition("DPP", 34, 40)
            .partition("MainOS", 41, 60)
            .build();
        let file = image_file(&disk);

        let inspection = inspect(
            file.path(),
            &StaticGeometry::default(),
            None,
            &ExclusionSet::builtin(),
            &AtomicBool::new(true),
            |_| {},
        )
        .unwrap();

        assert_eq!(inspection.kind, SourceKind::Image);
        assert_eq!(inspection.sector_size, 512);
        assert_eq!(inspection.source_len, disk.len() as u64);
        assert!(!inspection.unlocked);
        assert_eq!(inspection.redacted_count(), 1);
        assert_eq!(inspection.partitions[0].descriptor.name(), "DPP");
        assert!(inspection.partitions[0].redacted);
        assert!(!inspection.partitions[1].redacted);
    }

    #[test]
    fn unlocked_device_keeps_uefi_bs_nv_readable() {
        let disk = GptImage::new(512)
            .partition("IS_UNLOCKED", 34, 35)
            .partition("UEFI_BS_NV", 36, 40)
            .partition("DPP", 41, 45)
            .build();
        let file = image_file(&disk);

        let inspection = inspect(
            file.path(),
            &StaticGeometry::default(),
            None,
            &ExclusionSet::builtin(),
            &AtomicBool::new(true),
            |_| {},
        )
        .unwrap();

        assert!(inspection.unlocked);
        let redacted: Vec<_> = inspection
            .partitions
            .iter()
            .filter(|p| p.redacted)
            .map(|p| p.descriptor.name())
            .collect();
        assert_eq!(redacted, ["DPP"]);
    }

    #[test]
    fn missing_table_is_an_error() {
        let file = image_file(&[0u8; 4096]);

        let err = inspect(
            file.path(),
            &StaticGeometry::default(),
            None,
            &ExclusionSet::builtin(),
            &AtomicBool::new(true),
            |_| {},
        )
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::SignatureNotFound)
        ));
    }
}
