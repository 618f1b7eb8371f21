use std::io;
use std::path::Path;

fn unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "device geometry queries are not implemented on this platform",
    )
}

pub fn is_device_path(_path: &Path) -> bool {
    false
}

pub fn device_byte_length(_path: &Path) -> io::Result<u64> {
    Err(unsupported())
}

pub fn logical_sector_size(_path: &Path) -> io::Result<u32> {
    Err(unsupported())
}
