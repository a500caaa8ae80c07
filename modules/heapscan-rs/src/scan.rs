//! Page residency scanning through `/proc/[pid]/pagemap`
//!
//! The pagemap is an array of 8-byte little-endian words indexed by
//! virtual page number. For every page of a range the scanner reads one
//! word and keeps two bits of it: present (63) and swapped (62).

use std::io;

use log::debug;

use crate::error::{Result, SamplerError};
use crate::sink::RecordSink;
use crate::sys::{self, ProcfsHandle};
use crate::types::{AddressRange, PAGEMAP_ENTRY_SIZE, PagemapEntry, ResidencyRecord, ScanSummary};

/// Randomly addressable page table
pub trait PageTableSource {
    /// Read into `buf` at byte `offset`, returning how many bytes arrived
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Read the whole entry starting at byte `offset`
    ///
    /// # Errors
    /// Returns `PagemapRead` on I/O failure or if fewer than 8 bytes exist.
    fn read_entry(&self, offset: u64) -> Result<PagemapEntry> {
        let mut buf = [0u8; PAGEMAP_ENTRY_SIZE as usize];
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => {
                    return Err(SamplerError::PagemapRead {
                        offset,
                        source: io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("short read: {} of {} bytes", filled, buf.len()),
                        ),
                    });
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => return Err(SamplerError::PagemapRead { offset, source }),
            }
        }
        Ok(PagemapEntry::from_le_bytes(buf))
    }
}

impl PageTableSource for ProcfsHandle {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        ProcfsHandle::read_at(self, buf, offset)
    }
}

impl PageTableSource for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        let Some(available) = self.get(start..) else {
            return Ok(0);
        };
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }
}

impl PageTableSource for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.as_slice().read_at(buf, offset)
    }
}

/// Walks a range of the page table and classifies each page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageResidencyScanner {
    page_size: u64,
}

impl PageResidencyScanner {
    /// Create a scanner indexing the page table with `page_size`
    ///
    /// # Errors
    /// Returns `InvalidPageSize` unless `page_size` is a power of two no
    /// smaller than a pagemap entry.
    pub fn new(page_size: u64) -> Result<Self> {
        if !page_size.is_power_of_two() || page_size < PAGEMAP_ENTRY_SIZE {
            return Err(SamplerError::InvalidPageSize(page_size));
        }
        Ok(Self { page_size })
    }

    /// Create a scanner for the host page size
    pub fn host() -> Result<Self> {
        Self::new(sys::page_size()?)
    }

    /// Page size used to index the page table
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Byte offset of the entry describing `addr`
    pub const fn entry_offset(&self, addr: u64) -> u64 {
        addr / self.page_size * PAGEMAP_ENTRY_SIZE
    }

    /// Classify the single page at `addr`
    pub fn classify<P>(&self, page_table: &P, iteration: u64, addr: u64) -> Result<ResidencyRecord>
    where
        P: PageTableSource + ?Sized,
    {
        let entry = page_table.read_entry(self.entry_offset(addr))?;
        Ok(ResidencyRecord::from_entry(iteration, addr, entry))
    }

    /// Emit one record per 4 KiB page of `range` into `sink`, then close it
    ///
    /// Records are written in ascending address order. The first read or
    /// write failure aborts the scan; the sink is then dropped unclosed.
    ///
    /// # Errors
    /// - `PagemapRead` if any entry cannot be read in full
    /// - `SinkWrite` / `SinkClose` if the sink fails
    pub fn scan<P, S>(
        &self,
        range: AddressRange,
        page_table: &P,
        iteration: u64,
        mut sink: S,
    ) -> Result<ScanSummary>
    where
        P: PageTableSource + ?Sized,
        S: RecordSink,
    {
        let mut summary = ScanSummary::new(iteration, range);
        for addr in range.pages() {
            let record = self.classify(page_table, iteration, addr)?;
            sink.write_record(&record).map_err(SamplerError::SinkWrite)?;
            summary.record(&record);
        }
        sink.close().map_err(SamplerError::SinkClose)?;
        debug!(
            "scanned {} pages of {} ({} present, {} swapped)",
            summary.pages, range, summary.present, summary.swapped
        );
        Ok(summary)
    }
}
