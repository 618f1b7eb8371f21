//! The core, UI-agnostic library for the `redactr` partition dumping utility.
//!
//! `redactr-core` reads a GPT-partitioned disk (a physical device, a raw
//! image, a compressed image or a fixed VHD), decodes its partition table and
//! copies every partition to its own image file. Partitions named in an
//! exclusion list read back as zeros, so device-unique or secret content never
//! reaches the output.
//!
//! The library is structured into several key modules:
//! - [`gpt`]: Decodes the partition table into named byte ranges.
//! - [`exclusion`]: The case-insensitive set of partition names to zero.
//! - [`redact`]: [`redact::RedactingStream`], a block source view that masks
//!   excluded partitions on every read.
//! - [`source`]: The [`source::BlockSource`] capability and the logic for
//!   opening an input path as one.
//! - [`geometry`] and [`platform`]: Device length and sector size queries.
//! - [`dump`]: Copies every partition to `<output_dir>/<name>.img`.
//! - [`mod@inspect`]: Lists partitions and their redaction status.
//! - `testing` (feature `testing`): Builds in-memory GPT disks for tests.
//!
//! The primary entry points are [`dump::run`] and [`inspect::inspect`]. They
//! report progress via callbacks, allowing the calling application to display
//! it in any way it chooses.
//!
//! ## Example: Dumping a Device with Progress Reporting
//!
//! ```rust,no_run
//! use redactr_core::dump::{self, DumpOptions};
//! use redactr_core::exclusion::ExclusionSet;
//! use redactr_core::geometry::SystemGeometry;
//! use std::path::PathBuf;
//! use std::sync::{Arc, atomic::AtomicBool};
//! use anyhow::Result;
//!
//! fn main() -> Result<()> {
//!     let options = DumpOptions {
//!         input: PathBuf::from("/dev/sdb"),
//!         output_dir: PathBuf::from("partitions"),
//!         exclusions: ExclusionSet::builtin(),
//!         recovery: false,
//!         sector_size: None,
//!     };
//!
//!     // A shared flag to allow for graceful cancellation.
//!     let running = Arc::new(AtomicBool::new(true));
//!
//!     let report = dump::run(
//!         &options,
//!         &SystemGeometry,
//!         running.clone(),
//!         |_| {}, // on_decompress_progress
//!         |index, partition| println!("[{index}] {partition}"),
//!         |_| {}, // on_progress
//!         |done| println!("  -> {}", done.path.display()),
//!     )?;
//!
//!     println!("{} bytes written", report.total_bytes());
//!
//!     Ok(())
//! }
//! ```

pub mod dump;
pub mod error;
pub mod exclusion;
pub mod geometry;
pub mod gpt;
pub mod inspect;
pub mod platform;
pub mod redact;
pub mod source;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, Result};
