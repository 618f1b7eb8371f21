#![allow(dead_code)]

use redactr_core::dump::{self, DumpOptions, DumpReport};
use redactr_core::exclusion::ExclusionSet;
use redactr_core::geometry::StaticGeometry;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tempfile::NamedTempFile;

/// Writes `bytes` to a temporary file whose name ends in `suffix`.
pub fn disk_file(bytes: &[u8], suffix: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

pub fn options(input: &Path, output_dir: &Path, exclusions: ExclusionSet) -> DumpOptions {
    DumpOptions {
        input: input.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
        exclusions,
        recovery: false,
        sector_size: None,
    }
}

/// Runs a dump with no-op callbacks.
pub fn run_dump(options: &DumpOptions) -> anyhow::Result<DumpReport> {
    dump::run(
        options,
        &StaticGeometry::default(),
        Arc::new(AtomicBool::new(true)),
        |_| {},
        |_, _| {},
        |_| {},
        |_| {},
    )
}

pub fn image_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.img"))
}
