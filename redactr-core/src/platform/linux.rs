use nix::{ioctl_read, ioctl_read_bad};
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

ioctl_read!(blkgetsize64, 0x12, 114, u64);
// BLKSSZGET is declared as _IO(0x12, 104) but writes an int.
ioctl_read_bad!(blksszget, 0x1268, libc::c_int);

/// True when `path` names a block device such as `/dev/sda` or `/dev/mmcblk0`.
pub fn is_device_path(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.file_type().is_block_device())
        .unwrap_or(false)
}

/// Size of the block device in bytes, via `BLKGETSIZE64`.
pub fn device_byte_length(path: &Path) -> io::Result<u64> {
    let device = File::open(path)?;
    let mut size_bytes: u64 = 0;
    // SAFETY: the fd is open for the duration of the call and the kernel
    // writes a single u64 through the pointer.
    unsafe { blkgetsize64(device.as_raw_fd(), &mut size_bytes) }?;
    Ok(size_bytes)
}

/// Logical sector size of the block device, via `BLKSSZGET`.
pub fn logical_sector_size(path: &Path) -> io::Result<u32> {
    let device = File::open(path)?;
    let mut sector_size: libc::c_int = 0;
    // SAFETY: as above, the kernel writes a single int.
    unsafe { blksszget(device.as_raw_fd(), &mut sector_size) }?;
    u32::try_from(sector_size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "negative sector size"))
}
