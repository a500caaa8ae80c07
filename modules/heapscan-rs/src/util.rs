//! Utility functions for heap sampling
//!
//! Address alignment checks, byte formatting for log lines and a
//! privilege check.

use crate::types::AddressRange;

/// Check if `addr` is aligned to `page_size`
#[inline]
pub const fn is_page_aligned(addr: u64, page_size: u64) -> bool {
    addr % page_size == 0
}

/// Check if both bounds of `range` are aligned to `page_size`
pub const fn is_range_aligned(range: &AddressRange, page_size: u64) -> bool {
    is_page_aligned(range.start, page_size) && is_page_aligned(range.end, page_size)
}

/// Convert bytes to human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Check if running as root (needed for pagemap PFN/swap bits and freezer writes)
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_alignment() {
        assert!(is_page_aligned(4096, 4096));
        assert!(!is_page_aligned(4097, 4096));
        assert!(is_page_aligned(0, 4096));
        assert!(is_range_aligned(&AddressRange::new(0x1000, 0x3000), 4096));
        assert!(!is_range_aligned(&AddressRange::new(0x1000, 0x3001), 4096));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }
}
