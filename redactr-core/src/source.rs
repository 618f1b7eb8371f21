//! Block sources and the logic for opening an input path as one.
//!
//! An input can be a physical device, a raw image file, a compressed raw
//! image (`.gz`, `.xz`, `.zst`), or a fixed-size VHD container. Every kind is
//! exposed through the same [`BlockSource`] capability, together with the
//! length and sector size the rest of the pipeline needs.
use crate::error::{Error, Result};
use crate::geometry::GeometryProvider;
use crate::gpt::{DEFAULT_SECTOR_SIZE, MIN_SECTOR_SIZE};
use crate::platform;
use flate2::read::GzDecoder;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, info};
use xz2::read::XzDecoder;
use zstd::stream::read::Decoder as ZstdDecoder;

/// A readable, seekable byte source of known length.
pub trait BlockSource: Read + Seek {
    /// Total number of addressable bytes.
    ///
    /// The default seeks to the end and back, leaving the position unchanged.
    fn length(&mut self) -> io::Result<u64> {
        let pos = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        if end != pos {
            self.seek(SeekFrom::Start(pos))?;
        }
        Ok(end)
    }
}

impl BlockSource for File {}

impl<T: AsRef<[u8]>> BlockSource for Cursor<T> {
    fn length(&mut self) -> io::Result<u64> {
        Ok(self.get_ref().as_ref().len() as u64)
    }
}

impl<S: BlockSource + ?Sized> BlockSource for Box<S> {
    fn length(&mut self) -> io::Result<u64> {
        (**self).length()
    }
}

impl<S: BlockSource + ?Sized> BlockSource for &mut S {
    fn length(&mut self) -> io::Result<u64> {
        (**self).length()
    }
}

/// Fills `buf` as far as the source allows, returning the bytes read.
pub(crate) fn read_full<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Limits an inner source to its first `len` bytes.
///
/// Used for devices, whose length comes from the geometry query, and for
/// fixed VHDs, whose trailing footer is not part of the disk.
pub struct Bounded<S> {
    inner: S,
    len: u64,
    pos: u64,
}

impl<S: Seek> Bounded<S> {
    pub fn new(mut inner: S, len: u64) -> io::Result<Self> {
        let pos = inner.stream_position()?;
        Ok(Self { inner, len, pos })
    }
}

impl<S: Read> Read for Bounded<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len {
            return Ok(0);
        }
        let limit = (self.len - self.pos).min(buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..limit])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<S: Seek> Seek for Bounded<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        // End-relative seeks are resolved against the bound, not the inner end.
        let target = match pos {
            SeekFrom::End(delta) => SeekFrom::Start(offset_from(self.len, delta)?),
            other => other,
        };
        self.pos = self.inner.seek(target)?;
        Ok(self.pos)
    }
}

impl<S: Read + Seek> BlockSource for Bounded<S> {
    fn length(&mut self) -> io::Result<u64> {
        Ok(self.len)
    }
}

fn offset_from(base: u64, delta: i64) -> io::Result<u64> {
    base.checked_add_signed(delta).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid seek to a negative or overflowing position",
        )
    })
}

/// Compression formats accepted for raw images.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Xz,
    Zstd,
}

/// How an input path is read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// A physical block device; geometry comes from the platform.
    Device,
    /// A raw, sector-for-sector image file.
    Image,
    /// A raw image that is decompressed to a temporary file first.
    CompressedImage(Compression),
    /// A fixed-size VHD: raw data followed by a 512-byte footer.
    FixedVhd,
}

impl SourceKind {
    /// Classifies `path` by device type and file extension.
    pub fn detect(path: &Path) -> Self {
        if platform::is_device_path(path) {
            return SourceKind::Device;
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "gz" | "gzip" => SourceKind::CompressedImage(Compression::Gzip),
            "xz" => SourceKind::CompressedImage(Compression::Xz),
            "zst" | "zstd" => SourceKind::CompressedImage(Compression::Zstd),
            "vhd" => SourceKind::FixedVhd,
            _ => SourceKind::Image,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Device => write!(f, "device"),
            SourceKind::Image => write!(f, "image"),
            SourceKind::CompressedImage(c) => write!(f, "{c:?}-compressed image"),
            SourceKind::FixedVhd => write!(f, "fixed VHD"),
        }
    }
}

/// An input opened for reading, with its length and sector size.
///
/// Dereferences to the underlying stream through [`BlockSource`]. A temporary
/// file created for a compressed image lives as long as this value.
pub struct OpenedSource {
    kind: SourceKind,
    path: PathBuf,
    length: u64,
    sector_size: u32,
    stream: Box<dyn BlockSource>,
    _temp: Option<TempPath>,
}

impl OpenedSource {
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn byte_len(&self) -> u64 {
        self.length
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }
}

impl fmt::Display for OpenedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {} bytes, {} MB, {} B sectors)",
            self.path.display(),
            self.kind,
            self.length,
            self.length / 1024 / 1024,
            self.sector_size
        )
    }
}

impl Read for OpenedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Seek for OpenedSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.stream.seek(pos)
    }
}

impl BlockSource for OpenedSource {
    fn length(&mut self) -> io::Result<u64> {
        Ok(self.length)
    }
}

/// Opens `path` as a block source.
///
/// `sector_size` overrides the sector size that would otherwise be queried
/// from the device or assumed for files ([`DEFAULT_SECTOR_SIZE`]).
/// Decompression of compressed images reports the number of decompressed
/// bytes through `on_decompress_progress` and stops when `running` is cleared.
///
/// # Errors
///
/// - [`Error::DecodeFailure`] if the sector size is too small to hold a GPT
///   header, whether overridden or reported by the device.
/// - [`Error::DeviceQuery`] if a device's geometry cannot be read.
/// - [`Error::Unsupported`] for VHDs that are not fixed-size.
/// - [`Error::Cancelled`] if decompression was interrupted.
/// - [`Error::Io`] for any other I/O failure.
pub fn open<F>(
    path: &Path,
    geometry: &dyn GeometryProvider,
    sector_size: Option<u32>,
    running: &AtomicBool,
    on_decompress_progress: F,
) -> Result<OpenedSource>
where
    F: FnMut(u64),
{
    if let Some(size) = sector_size {
        check_sector_size(size)?;
    }

    let kind = SourceKind::detect(path);
    debug!(path = %path.display(), %kind, "Opening source");

    let opened = match kind {
        SourceKind::Device => {
            let length = geometry.device_byte_length(path)?;
            let sector_size = match sector_size {
                Some(size) => size,
                None => check_sector_size(geometry.sector_size(path)?)?,
            };
            let file = File::open(path)?;
            OpenedSource {
                kind,
                path: path.to_path_buf(),
                length,
                sector_size,
                stream: Box::new(Bounded::new(file, length)?),
                _temp: None,
            }
        }
        SourceKind::Image => {
            let file = File::open(path)?;
            let length = file.metadata()?.len();
            OpenedSource {
                kind,
                path: path.to_path_buf(),
                length,
                sector_size: sector_size.unwrap_or(DEFAULT_SECTOR_SIZE),
                stream: Box::new(file),
                _temp: None,
            }
        }
        SourceKind::CompressedImage(compression) => {
            let temp = decompress(path, compression, running, on_decompress_progress)?;
            let file = File::open(&temp)?;
            let length = file.metadata()?.len();
            OpenedSource {
                kind,
                path: path.to_path_buf(),
                length,
                sector_size: sector_size.unwrap_or(DEFAULT_SECTOR_SIZE),
                stream: Box::new(file),
                _temp: Some(temp),
            }
        }
        SourceKind::FixedVhd => {
            let mut file = File::open(path)?;
            let length = fixed_vhd_data_len(&mut file)?;
            file.seek(SeekFrom::Start(0))?;
            OpenedSource {
                kind,
                path: path.to_path_buf(),
                length,
                sector_size: sector_size.unwrap_or(DEFAULT_SECTOR_SIZE),
                stream: Box::new(Bounded::new(file, length)?),
                _temp: None,
            }
        }
    };

    info!(source = %opened, "Source opened");
    Ok(opened)
}

fn check_sector_size(size: u32) -> Result<u32> {
    if size < MIN_SECTOR_SIZE {
        return Err(Error::decode(format!(
            "sector size {size} cannot hold a GPT header (minimum {MIN_SECTOR_SIZE})"
        )));
    }
    Ok(size)
}

/// Decompresses an image into a temporary file that is deleted on drop.
fn decompress<F>(
    path: &Path,
    compression: Compression,
    running: &AtomicBool,
    mut on_progress: F,
) -> Result<TempPath>
where
    F: FnMut(u64),
{
    let input = BufReader::new(File::open(path)?);
    let mut reader: Box<dyn Read> = match compression {
        Compression::Gzip => Box::new(GzDecoder::new(input)),
        Compression::Xz => Box::new(XzDecoder::new(input)),
        Compression::Zstd => Box::new(ZstdDecoder::new(input)?),
    };

    let mut temp = NamedTempFile::new()?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        let mut buffer = vec![0u8; 64 * 1024];
        let mut total: u64 = 0;

        loop {
            if !running.load(Ordering::SeqCst) {
                return Err(Error::Cancelled);
            }

            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buffer[..n])?;
            total += n as u64;
            on_progress(total);
        }
        writer.flush()?;
    }

    debug!(path = %path.display(), ?compression, "Decompressed to temporary file");
    Ok(temp.into_temp_path())
}

const VHD_FOOTER_LEN: u64 = 512;
const VHD_COOKIE: &[u8; 8] = b"conectix";
const VHD_CURRENT_SIZE_OFFSET: usize = 48;
const VHD_DISK_TYPE_OFFSET: usize = 60;
const VHD_DISK_TYPE_FIXED: u32 = 2;

/// Reads the footer of a VHD and returns the size of its raw data area.
fn fixed_vhd_data_len<R: Read + Seek>(file: &mut R) -> Result<u64> {
    let file_len = file.seek(SeekFrom::End(0))?;
    if file_len < VHD_FOOTER_LEN {
        return Err(Error::Unsupported(format!(
            "{file_len}-byte file is too small to be a VHD"
        )));
    }

    let mut footer = [0u8; VHD_FOOTER_LEN as usize];
    file.seek(SeekFrom::Start(file_len - VHD_FOOTER_LEN))?;
    file.read_exact(&mut footer)?;

    if &footer[..8] != VHD_COOKIE {
        return Err(Error::Unsupported("VHD footer cookie not found".to_string()));
    }

    let mut raw = [0u8; 4];
    raw.copy_from_slice(&footer[VHD_DISK_TYPE_OFFSET..VHD_DISK_TYPE_OFFSET + 4]);
    let disk_type = u32::from_be_bytes(raw);
    if disk_type != VHD_DISK_TYPE_FIXED {
        return Err(Error::Unsupported(format!(
            "VHD disk type {disk_type} (only fixed VHDs can be read)"
        )));
    }

    let mut raw = [0u8; 8];
    raw.copy_from_slice(&footer[VHD_CURRENT_SIZE_OFFSET..VHD_CURRENT_SIZE_OFFSET + 8]);
    let current_size = u64::from_be_bytes(raw);

    Ok(current_size.min(file_len - VHD_FOOTER_LEN))
}
