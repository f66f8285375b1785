//! Raw positioned I/O on a block device file, plus device-size discovery.
//!
//! The teacher's `disk_driver` crate wraps a C++ `cxx` shim behind a
//! `DiskDriver` trait (`ddriver_open/read/write/seek/ioctl`); there is no
//! FUSE layer or C++ driver here, so this module keeps the *shape* of that
//! trait — an abstract device one can position, read and write — but
//! implements it in pure Rust over `nix::sys::uio::{pread, pwrite}`, the
//! idiomatic positioned-I/O primitives for a POSIX file descriptor.

use crate::error::PlotError;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Abstract positioned-I/O device. Implemented by a real `/dev/*` block
/// device and by a plain host file, so the scoop reorderer and POC1→POC2
/// shuffle can run identically against either (spec.md §2: "Scoop
/// Reorderer and POC1→POC2 Shuffle operate on either BFS-backed or
/// host-file-backed byte ranges through the same positioned-I/O
/// abstraction").
pub trait BlockDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), PlotError>;
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), PlotError>;
    /// Total addressable size in bytes.
    fn size(&self) -> Result<u64, PlotError>;
    /// Flush any OS-level write buffering. Required before a TOC write
    /// that must observe previously written data blocks (spec.md §5).
    fn sync(&self) -> Result<(), PlotError>;
}

/// A real block device, opened read-write without any host filesystem on
/// top. BFS owns the whole device; the first 1024 bytes are the TOC.
pub struct RawDevice {
    file: File,
}

impl RawDevice {
    pub fn open(path: &Path) -> Result<RawDevice, PlotError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|e| PlotError::Io(format!("opening device {}: {e}", path.display())))?;
        Ok(RawDevice { file })
    }

    /// Creates (or truncates) the backing file; used by tests that stand a
    /// sparse regular file in for a block device.
    pub fn create(path: &Path, size: u64) -> Result<RawDevice, PlotError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| PlotError::Io(format!("creating device {}: {e}", path.display())))?;
        file.set_len(size)
            .map_err(|e| PlotError::Io(format!("sizing device {}: {e}", path.display())))?;
        Ok(RawDevice { file })
    }
}

impl BlockDevice for RawDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), PlotError> {
        pread_exact(self.file.as_raw_fd(), offset, buf)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), PlotError> {
        pwrite_exact(self.file.as_raw_fd(), offset, buf)
    }

    fn size(&self) -> Result<u64, PlotError> {
        device_size(&self.file)
    }

    fn sync(&self) -> Result<(), PlotError> {
        self.file
            .sync_all()
            .map_err(|e| PlotError::Io(format!("fsync device: {e}")))
    }
}

/// A plain host file standing in for a plot (reorderer/shuffle inputs and
/// outputs, and tests).
pub struct FileBackedDevice {
    file: File,
}

impl FileBackedDevice {
    pub fn open_rw(path: &Path) -> Result<FileBackedDevice, PlotError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| PlotError::Io(format!("opening {}: {e}", path.display())))?;
        Ok(FileBackedDevice { file })
    }

    pub fn open_ro(path: &Path) -> Result<FileBackedDevice, PlotError> {
        let file = File::open(path)
            .map_err(|e| PlotError::Io(format!("opening {}: {e}", path.display())))?;
        Ok(FileBackedDevice { file })
    }

    pub fn create(path: &Path) -> Result<FileBackedDevice, PlotError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| PlotError::Io(format!("creating {}: {e}", path.display())))?;
        Ok(FileBackedDevice { file })
    }
}

impl BlockDevice for FileBackedDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), PlotError> {
        pread_exact(self.file.as_raw_fd(), offset, buf)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), PlotError> {
        pwrite_exact(self.file.as_raw_fd(), offset, buf)
    }

    fn size(&self) -> Result<u64, PlotError> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| PlotError::Io(format!("stat: {e}")))
    }

    fn sync(&self) -> Result<(), PlotError> {
        self.file
            .sync_all()
            .map_err(|e| PlotError::Io(format!("fsync: {e}")))
    }
}

fn pread_exact(fd: i32, mut offset: u64, mut buf: &mut [u8]) -> Result<(), PlotError> {
    while !buf.is_empty() {
        let n = nix::sys::uio::pread(fd, buf, offset as i64)
            .map_err(|e| PlotError::Io(format!("pread at {offset}: {e}")))?;
        if n == 0 {
            return Err(PlotError::Io(format!(
                "short read at offset {offset}: hit EOF with {} bytes still wanted",
                buf.len()
            )));
        }
        buf = &mut buf[n..];
        offset += n as u64;
    }
    Ok(())
}

fn pwrite_exact(fd: i32, mut offset: u64, mut buf: &[u8]) -> Result<(), PlotError> {
    while !buf.is_empty() {
        let n = nix::sys::uio::pwrite(fd, buf, offset as i64)
            .map_err(|e| PlotError::Io(format!("pwrite at {offset}: {e}")))?;
        if n == 0 {
            return Err(PlotError::Io(format!("short write at offset {offset}")));
        }
        buf = &buf[n..];
        offset += n as u64;
    }
    Ok(())
}

/// Reports total bytes of the underlying block device. A block device
/// reports no useful size via a normal `stat`, so on Linux we read the
/// sysfs pseudo-file exposing a 512-byte sector count, per spec.md §4.3
/// and §6. Falls back to `fstat`'s length for the common non-device case
/// (a regular file standing in for a device in tests).
pub fn device_size(file: &File) -> Result<u64, PlotError> {
    if let Some(sectors) = sysfs_sector_count(file) {
        return Ok(sectors * crate::geometry::SECTOR_SIZE);
    }
    file.metadata()
        .map(|m| m.len())
        .map_err(|e| PlotError::Io(format!("stat: {e}")))
}

fn sysfs_sector_count(file: &File) -> Option<u64> {
    let meta = nix::sys::stat::fstat(file.as_raw_fd()).ok()?;
    if meta.st_mode & libc::S_IFMT as u32 != libc::S_IFBLK as u32 {
        return None;
    }
    let major = unsafe { libc::major(meta.st_rdev) };
    let minor = unsafe { libc::minor(meta.st_rdev) };
    let sysfs_path = format!("/sys/dev/block/{major}:{minor}/size");
    std::fs::read_to_string(sysfs_path)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// Resolves a short BFS device argument (bare name) against
/// `/dev/disk/by-id/` and `/dev/disk/by-uuid/`, or returns the path
/// unchanged if it's already an absolute `/dev/...` path, per spec.md §6.
pub fn resolve_device_path(arg: &str) -> std::path::PathBuf {
    if arg.starts_with("/dev/") {
        return std::path::PathBuf::from(arg);
    }
    for dir in ["/dev/disk/by-id", "/dev/disk/by-uuid"] {
        let candidate = Path::new(dir).join(arg);
        if candidate.exists() {
            return candidate;
        }
    }
    std::path::PathBuf::from(arg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn round_trips_through_file_backed_device() {
        let tmp = NamedTempFile::new().unwrap();
        let dev = RawDevice::create(tmp.path(), 4096).unwrap();
        let data = vec![0xABu8; 512];
        dev.write_at(1024, &data).unwrap();
        let mut out = vec![0u8; 512];
        dev.read_at(1024, &mut out).unwrap();
        assert_eq!(data, out);
    }

    #[test]
    fn size_falls_back_to_stat_for_regular_file() {
        let tmp = NamedTempFile::new().unwrap();
        let dev = RawDevice::create(tmp.path(), 8192).unwrap();
        assert_eq!(dev.size().unwrap(), 8192);
    }
}
