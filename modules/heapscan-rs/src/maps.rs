//! Heap range extraction from `/proc/[pid]/maps`
//!
//! Each maps line starts with `<hex-start>-<hex-end>` followed by
//! space-separated fields; the heap is the line labelled `[heap]`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Result, SamplerError};
use crate::types::{AddressRange, HEAP_MARKER};

/// One line of a memory map listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMapLine<'a> {
    range_token: &'a str,
    label: &'a str,
}

impl<'a> MemoryMapLine<'a> {
    /// Split a raw line into its range token and the rest
    pub fn new(line: &'a str) -> Self {
        let line = line.trim_start();
        match line.split_once(' ') {
            Some((range_token, label)) => Self {
                range_token,
                label: label.trim(),
            },
            None => Self {
                range_token: line.trim_end(),
                label: "",
            },
        }
    }

    /// Leading `<hex>-<hex>` token, unparsed
    pub fn range_token(&self) -> &'a str {
        self.range_token
    }

    /// Everything after the range token
    pub fn label(&self) -> &'a str {
        self.label
    }

    /// Check whether the line describes the heap
    pub fn is_heap(&self) -> bool {
        self.label.contains(HEAP_MARKER)
    }

    /// Parse the range token
    ///
    /// # Errors
    /// Returns `RangeParse` if the token is not two hexadecimal numbers
    /// joined by a hyphen, if either overflows 64 bits, or if the start
    /// lies above the end.
    pub fn range(&self) -> Result<AddressRange> {
        parse_range(self.range_token)
    }
}

fn parse_range(token: &str) -> Result<AddressRange> {
    let (start, end) = token
        .split_once('-')
        .ok_or_else(|| SamplerError::range_parse(token, "missing '-' separator"))?;
    let start = parse_hex(token, start, "start")?;
    let end = parse_hex(token, end, "end")?;
    if start > end {
        return Err(SamplerError::range_parse(token, "start above end"));
    }
    Ok(AddressRange::new(start, end))
}

fn parse_hex(token: &str, digits: &str, which: &str) -> Result<u64> {
    // from_str_radix accepts a leading '+', maps never carry one
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(SamplerError::range_parse(
            token,
            format!("invalid {which} address {digits:?}"),
        ));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| SamplerError::range_parse(token, format!("{which} address: {e}")))
}

fn contains_marker(line: &[u8]) -> bool {
    line.windows(HEAP_MARKER.len())
        .any(|w| w == HEAP_MARKER.as_bytes())
}

/// Finds the heap region of a process
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapRangeLocator;

impl HeapRangeLocator {
    /// Return the range of the first line labelled `[heap]`
    ///
    /// Lines before the heap are not parsed, so a malformed non-heap line
    /// is harmless.
    ///
    /// # Errors
    /// - `RangeParse` if the heap line's range token is malformed
    /// - `HeapNotFound` if no line carries the marker
    pub fn locate_lines<I, S>(lines: I) -> Result<AddressRange>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            let entry = MemoryMapLine::new(line.as_ref());
            if entry.is_heap() {
                return entry.range();
            }
        }
        Err(SamplerError::HeapNotFound)
    }

    /// Same as [`locate_lines`](Self::locate_lines), reading from `reader`
    ///
    /// Lines are matched as raw bytes: mapped file names need not be
    /// UTF-8. Reading stops at the heap line.
    pub fn locate<R: BufRead>(reader: R) -> Result<AddressRange> {
        for line in reader.split(b'\n') {
            let line = line.map_err(SamplerError::MapsRead)?;
            if !contains_marker(&line) {
                continue;
            }
            // A non-ASCII range token turns into U+FFFD and fails the hex check
            let line = String::from_utf8_lossy(&line);
            return MemoryMapLine::new(&line).range();
        }
        Err(SamplerError::HeapNotFound)
    }

    /// Open the maps file at `path` and locate the heap
    pub fn locate_file(path: &Path) -> Result<AddressRange> {
        let file = File::open(path).map_err(|source| SamplerError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::locate(BufReader::new(file))
    }
}
