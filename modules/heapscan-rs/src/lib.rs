//! Heap residency sampling
//!
//! This crate inspects which pages of a process heap are resident in
//! memory and which are swapped out. A sampling pass freezes the process,
//! finds the `[heap]` line of `/proc/[pid]/maps`, reads one
//! `/proc/[pid]/pagemap` entry per 4 KiB page of that range, and writes one
//! line per page to a fresh `iter-NNNN` file before thawing the process.
//!
//! # Architecture
//!
//! - **`sys`**: procfs paths, raw `pread` handle, page size query
//! - **`types`**: pagemap entries, address ranges, records and config
//! - **`error`**: error type shared by every operation
//! - **`freezer`**: freeze/thaw controls and the scoped freeze guard
//! - **`maps`**: heap range extraction from the memory map listing
//! - **`scan`**: pagemap walk and residency classification
//! - **`sink`**: per-iteration output files
//! - **`sampler`**: one pass, and the forever loop around it
//! - **`util`**: alignment and formatting helpers
//!
//! # Requirements
//!
//! - Linux with `/proc/[pid]/pagemap`
//! - Root (or CAP_SYS_ADMIN) to see swap bits and to write the freezer
//! - A freezer cgroup containing the target, or use `SignalFreezer`
//!
//! # Example
//!
//! ```no_run
//! use heapscan_rs::{CgroupFreezer, Sampler, SamplerConfig};
//!
//! let config = SamplerConfig::new(1234).with_output_dir("/tmp");
//! let mut sampler = Sampler::new(&config, CgroupFreezer::default())
//!     .expect("Failed to create sampler");
//!
//! let summary = sampler.run_pass(0).expect("Sampling pass failed");
//! println!("{} of {} pages present", summary.present, summary.pages);
//! ```

#![warn(missing_docs)]
#![warn(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod freezer;
pub mod maps;
pub mod sampler;
pub mod scan;
pub mod sink;
pub mod sys;
pub mod types;
pub mod util;

// Public API exports
pub use error::{Result, SamplerError};
pub use freezer::{
    CgroupFreezer, CgroupV2Freezer, FreezeControl, FreezeGuard, FreezerState, ProcessFreezer,
    SignalFreezer,
};
pub use maps::{HeapRangeLocator, MemoryMapLine};
pub use sampler::Sampler;
pub use scan::{PageResidencyScanner, PageTableSource};
pub use sink::{IterationFile, RecordSink, iteration_file_name};
pub use sys::{DEFAULT_FREEZER_STATE, ProcfsHandle};
pub use types::{
    AddressRange, DEFAULT_INTERVAL, HEAP_MARKER, HEAP_STRIDE, PAGEMAP_ENTRY_SIZE, PagemapEntry,
    PagemapFlags, ResidencyRecord, SamplerConfig, ScanSummary,
};
pub use util::format_bytes;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check if the pagemap interface is available on this system
///
/// # Example
/// ```
/// if !heapscan_rs::is_available() {
///     eprintln!("/proc/self/pagemap missing");
/// }
/// ```
pub fn is_available() -> bool {
    std::path::Path::new("/proc/self/pagemap").exists()
}

/// Check if the current process has the privileges sampling needs
pub fn has_permission() -> bool {
    util::is_root()
}
