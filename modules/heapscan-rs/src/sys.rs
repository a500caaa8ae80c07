//! Low-level bindings for the procfs interfaces
//!
//! This module holds the raw file descriptor wrapper used to read
//! `/proc/[pid]/pagemap`, the well-known procfs/sysfs paths, and the
//! `sysconf` page size query.
//!
//! # Safety
//!
//! `ProcfsHandle` wraps raw system calls. Callers only see safe methods;
//! the file descriptor is owned and closed on drop.

use libc::{c_void, off_t};
use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::error::{Result, SamplerError};

/// Default cgroup v1 freezer control file
pub const DEFAULT_FREEZER_STATE: &str = "/sys/fs/cgroup/freezer/system.slice/freezer.state";

/// Procfs path for the memory map listing
pub fn maps_path(pid: u32) -> PathBuf {
    PathBuf::from(format!("/proc/{}/maps", pid))
}

/// Procfs path for the page table
pub fn pagemap_path(pid: u32) -> PathBuf {
    PathBuf::from(format!("/proc/{}/pagemap", pid))
}

/// Check whether `/proc/[pid]` exists
pub fn process_exists(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}

/// Retrieve the host page size in bytes
pub fn page_size() -> Result<u64> {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        -1 => Err(SamplerError::PageSize(io::Error::last_os_error())),
        sz => Ok(sz as u64),
    }
}

/// Raw read-only file handle for procfs files
///
/// Reads are positional (`pread`), so the handle is never seeked and
/// can be shared by reference.
#[derive(Debug)]
pub struct ProcfsHandle {
    fd: RawFd,
}

impl ProcfsHandle {
    /// Open `path` for reading
    pub fn open(path: &Path) -> io::Result<Self> {
        let c_path = CString::new(path.as_os_str().as_bytes())?;
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    /// Open `/proc/[pid]/pagemap`
    pub fn open_pagemap(pid: u32) -> io::Result<Self> {
        Self::open(&pagemap_path(pid))
    }

    /// Read into `buf` at byte `offset`, returning how many bytes arrived
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let offset = off_t::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
        let result = unsafe {
            libc::pread(
                self.fd,
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                offset,
            )
        };
        if result < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(result as usize)
        }
    }
}

impl AsRawFd for ProcfsHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for ProcfsHandle {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
