//! Type definitions for heap residency sampling
//!
//! This module contains data structures, constants, and type definitions
//! shared by the map locator, the pagemap scanner and the output sinks.

use std::fmt;
use std::iter::StepBy;
use std::ops::Range;
use std::path::PathBuf;
use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Size in bytes of one `/proc/[pid]/pagemap` entry
pub const PAGEMAP_ENTRY_SIZE: u64 = 8;

/// Stride used to walk the heap range
///
/// Independent from the host page size, which only picks the pagemap index.
pub const HEAP_STRIDE: u64 = 4096;

/// Label marking the heap line in `/proc/[pid]/maps`
pub const HEAP_MARKER: &str = "[heap]";

/// Default delay between two sampling passes
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(600);

bitflags! {
    /// Pagemap entry bits this crate decodes
    ///
    /// Every other bit (PFN, swap type/offset, soft-dirty, ...) is dropped
    /// by `from_bits_truncate`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct PagemapFlags: u64 {
        /// Page has a physical frame (bit 63)
        const PRESENT = 1 << 63;
        /// Page lives in swap (bit 62)
        const SWAPPED = 1 << 62;
    }
}

/// One raw 64-bit pagemap word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PagemapEntry(u64);

impl PagemapEntry {
    /// Wrap a raw pagemap word
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Decode an entry as stored by the kernel (little-endian)
    pub const fn from_le_bytes(bytes: [u8; PAGEMAP_ENTRY_SIZE as usize]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    /// Raw 64-bit value
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// The decoded flag bits
    pub const fn flags(&self) -> PagemapFlags {
        PagemapFlags::from_bits_truncate(self.0)
    }

    /// Bit 63
    pub const fn present(&self) -> bool {
        (self.0 >> 63) & 1 == 1
    }

    /// Bit 62
    pub const fn swapped(&self) -> bool {
        (self.0 >> 62) & 1 == 1
    }
}

impl From<PagemapFlags> for PagemapEntry {
    fn from(flags: PagemapFlags) -> Self {
        Self(flags.bits())
    }
}

/// Virtual address range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AddressRange {
    /// Start address (inclusive)
    pub start: u64,
    /// End address (exclusive)
    pub end: u64,
}

impl AddressRange {
    /// Create a new address range
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Size of this range in bytes
    pub const fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Size in kibibytes, truncated
    pub const fn size_kib(&self) -> u64 {
        self.size() / 1024
    }

    /// Check whether the range covers no bytes
    pub const fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Check if an address is within this range
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Number of heap strides covered by the range, rounded up
    pub const fn page_count(&self) -> u64 {
        self.size().div_ceil(HEAP_STRIDE)
    }

    /// Iterate every stride-aligned address of the range in ascending order
    pub fn pages(&self) -> StepBy<Range<u64>> {
        (self.start..self.end).step_by(HEAP_STRIDE as usize)
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}-{:#x}", self.start, self.end)
    }
}

/// Residency of one scanned page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidencyRecord {
    /// Sampling pass this record belongs to
    pub iteration: u64,
    /// Virtual address of the page
    pub address: u64,
    /// Page is backed by a physical frame
    pub present: bool,
    /// Page lives in swap
    pub swapped: bool,
}

impl ResidencyRecord {
    /// Classify `entry` for the page at `address`
    pub const fn from_entry(iteration: u64, address: u64, entry: PagemapEntry) -> Self {
        Self {
            iteration,
            address,
            present: entry.present(),
            swapped: entry.swapped(),
        }
    }
}

impl fmt::Display for ResidencyRecord {
    /// `<iter>\t0x<hex>\t\t<dec>\t<present><swapped>`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{:#x}\t\t{}\t{}{}",
            self.iteration, self.address, self.address, self.present as u8, self.swapped as u8
        )
    }
}

/// Per-pass totals, logged after each scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Sampling pass
    pub iteration: u64,
    /// Scanned range
    pub range: AddressRange,
    /// Records emitted
    pub pages: u64,
    /// Records with the present bit set
    pub present: u64,
    /// Records with the swapped bit set
    pub swapped: u64,
}

impl ScanSummary {
    /// Start an empty summary for `range`
    pub const fn new(iteration: u64, range: AddressRange) -> Self {
        Self {
            iteration,
            range,
            pages: 0,
            present: 0,
            swapped: 0,
        }
    }

    /// Account one record
    pub fn record(&mut self, record: &ResidencyRecord) {
        self.pages += 1;
        self.present += record.present as u64;
        self.swapped += record.swapped as u64;
    }

    /// Bytes resident in memory
    pub const fn present_bytes(&self) -> u64 {
        self.present * HEAP_STRIDE
    }

    /// Bytes in swap
    pub const fn swapped_bytes(&self) -> u64 {
        self.swapped * HEAP_STRIDE
    }
}

/// Sampler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Target process
    pub pid: u32,
    /// Delay between the end of one pass and the start of the next
    pub interval: Duration,
    /// Directory receiving the `iter-NNNN` files
    pub output_dir: PathBuf,
}

impl SamplerConfig {
    /// Create a configuration with the default interval and current directory
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            interval: DEFAULT_INTERVAL,
            output_dir: PathBuf::from("."),
        }
    }

    /// Set the sampling interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the output directory
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }
}
