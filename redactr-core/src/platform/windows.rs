use std::fs::OpenOptions;
use std::io;
use std::mem;
use std::os::windows::fs::OpenOptionsExt;
use std::os::windows::io::AsRawHandle;
use std::path::Path;
use std::ptr;
use windows_sys::Win32::Storage::FileSystem::{FILE_SHARE_READ, FILE_SHARE_WRITE};
use windows_sys::Win32::System::IO::DeviceIoControl;
use windows_sys::Win32::System::Ioctl::{DISK_GEOMETRY_EX, IOCTL_DISK_GET_DRIVE_GEOMETRY_EX};

const PHYSICAL_DRIVE_PREFIX: &str = r"\\.\physicaldrive";

/// True for paths of the form `\\.\PhysicalDriveN`.
pub fn is_device_path(path: &Path) -> bool {
    path.to_string_lossy()
        .to_lowercase()
        .starts_with(PHYSICAL_DRIVE_PREFIX)
}

fn drive_geometry(path: &Path) -> io::Result<DISK_GEOMETRY_EX> {
    let device = OpenOptions::new()
        .read(true)
        .share_mode(FILE_SHARE_READ | FILE_SHARE_WRITE)
        .open(path)?;

    // SAFETY: DISK_GEOMETRY_EX is plain data for which all-zero is valid.
    let mut geometry: DISK_GEOMETRY_EX = unsafe { mem::zeroed() };
    let mut returned: u32 = 0;

    // SAFETY: the handle stays open for the call and the output buffer is a
    // properly sized DISK_GEOMETRY_EX.
    let ok = unsafe {
        DeviceIoControl(
            device.as_raw_handle() as _,
            IOCTL_DISK_GET_DRIVE_GEOMETRY_EX,
            ptr::null(),
            0,
            &mut geometry as *mut DISK_GEOMETRY_EX as *mut _,
            mem::size_of::<DISK_GEOMETRY_EX>() as u32,
            &mut returned,
            ptr::null_mut(),
        )
    };

    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(geometry)
}

/// Size of the physical drive in bytes, via `IOCTL_DISK_GET_DRIVE_GEOMETRY_EX`.
pub fn device_byte_length(path: &Path) -> io::Result<u64> {
    let geometry = drive_geometry(path)?;
    u64::try_from(geometry.DiskSize)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "negative disk size"))
}

/// Bytes per sector reported by `IOCTL_DISK_GET_DRIVE_GEOMETRY_EX`.
pub fn logical_sector_size(path: &Path) -> io::Result<u32> {
    Ok(drive_geometry(path)?.Geometry.BytesPerSector)
}
