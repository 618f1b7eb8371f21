//! Sector size and length queries for physical devices.
//!
//! File and container sources derive these values from their own metadata;
//! only devices go through a [`GeometryProvider`].
use crate::error::{Error, Result};
use crate::platform;
use std::path::Path;

pub trait GeometryProvider {
    /// Total size of the device in bytes.
    fn device_byte_length(&self, path: &Path) -> Result<u64>;

    /// Logical sector size of the device in bytes.
    fn sector_size(&self, path: &Path) -> Result<u32>;
}

/// Queries the operating system, see [`crate::platform`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemGeometry;

impl GeometryProvider for SystemGeometry {
    fn device_byte_length(&self, path: &Path) -> Result<u64> {
        platform::device_byte_length(path).map_err(|e| Error::device_query(path, e))
    }

    fn sector_size(&self, path: &Path) -> Result<u32> {
        let size = platform::logical_sector_size(path).map_err(|e| Error::device_query(path, e))?;
        if size == 0 {
            return Err(Error::device_query(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, "device reports 0-byte sectors"),
            ));
        }
        Ok(size)
    }
}

/// Fixed answers, for callers that already know the geometry.
#[derive(Clone, Copy, Debug)]
pub struct StaticGeometry {
    pub byte_length: u64,
    pub sector_size: u32,
}

impl Default for StaticGeometry {
    fn default() -> Self {
        Self {
            byte_length: 0,
            sector_size: crate::gpt::DEFAULT_SECTOR_SIZE,
        }
    }
}

impl GeometryProvider for StaticGeometry {
    fn device_byte_length(&self, _path: &Path) -> Result<u64> {
        Ok(self.byte_length)
    }

    fn sector_size(&self, _path: &Path) -> Result<u32> {
        Ok(self.sector_size)
    }
}
