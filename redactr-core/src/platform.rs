//! Provides platform-specific functionality.
//!
//! Each submodule exposes the same three functions, selected at compile time:
//!
//! - `is_device_path(path) -> bool`
//! - `device_byte_length(path) -> io::Result<u64>`
//! - `logical_sector_size(path) -> io::Result<u32>`
//!
//! Targets without an implementation report every geometry query as
//! unsupported, so images still work there but devices do not.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use self::linux::*;

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "windows")]
pub use self::windows::*;

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
mod unsupported;
#[cfg(not(any(target_os = "linux", target_os = "windows")))]
pub use self::unsupported::*;
