//! Error types for decoding and reading block sources.
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while opening, decoding or reading a block source.
///
/// Every variant is fatal at the point it is raised. Masking excluded bytes
/// never produces an error; only decoding the table and the physical I/O do.
#[derive(Error, Debug)]
pub enum Error {
    /// Neither the first nor the second sector starts with `EFI PART`.
    #[error("GPT header signature \"EFI PART\" not found in the first two sectors")]
    SignatureNotFound,

    /// The partition entry array is empty, implausible or truncated.
    #[error("Failed to decode partition array: {0}")]
    DecodeFailure(String),

    /// A platform geometry query against a physical device failed.
    #[error("Device geometry query failed for {}", path.display())]
    DeviceQuery {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The source exists but is in a format that cannot be read.
    #[error("Unsupported source: {0}")]
    Unsupported(String),

    /// The operation was stopped through the cancellation flag.
    #[error("Operation cancelled by user")]
    Cancelled,

    /// Underlying read, write or seek failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        Error::DecodeFailure(msg.into())
    }

    pub(crate) fn device_query(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::DeviceQuery {
            path: path.into(),
            source,
        }
    }
}
