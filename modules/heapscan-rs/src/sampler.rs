//! The sampling loop
//!
//! One pass opens `/proc/[pid]/maps`, freezes the target, locates the
//! heap, scans its pagemap entries into `iter-NNNN`, and thaws the target.
//! [`Sampler::run`] repeats passes forever, sleeping the configured
//! interval in between, and stops at the first error.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Result, SamplerError};
use crate::freezer::{FreezeControl, ProcessFreezer};
use crate::maps::HeapRangeLocator;
use crate::scan::PageResidencyScanner;
use crate::sink::IterationFile;
use crate::sys::{self, ProcfsHandle};
use crate::types::{SamplerConfig, ScanSummary};
use crate::util;

/// Periodic heap residency sampler for one process
#[derive(Debug)]
pub struct Sampler<C: FreezeControl> {
    maps_path: PathBuf,
    pagemap_path: PathBuf,
    output_dir: PathBuf,
    interval: Duration,
    scanner: PageResidencyScanner,
    freezer: ProcessFreezer<C>,
}

impl<C: FreezeControl> Sampler<C> {
    /// Create a sampler for `config.pid` using the host page size
    ///
    /// # Errors
    /// - `InvalidPid` for pid 0
    /// - `ProcessNotFound` if `/proc/[pid]` does not exist
    /// - `PageSize` if the page size cannot be queried
    pub fn new(config: &SamplerConfig, control: C) -> Result<Self> {
        if config.pid == 0 {
            return Err(SamplerError::InvalidPid(config.pid));
        }
        if !sys::process_exists(config.pid) {
            return Err(SamplerError::ProcessNotFound(config.pid));
        }
        debug!("sampler config: {:?}", config);

        Ok(Self::with_paths(
            sys::maps_path(config.pid),
            sys::pagemap_path(config.pid),
            &config.output_dir,
            config.interval,
            PageResidencyScanner::host()?,
            control,
        ))
    }

    /// Create a sampler over explicit maps/pagemap files
    pub fn with_paths(
        maps_path: impl Into<PathBuf>,
        pagemap_path: impl Into<PathBuf>,
        output_dir: &Path,
        interval: Duration,
        scanner: PageResidencyScanner,
        control: C,
    ) -> Self {
        Self {
            maps_path: maps_path.into(),
            pagemap_path: pagemap_path.into(),
            output_dir: output_dir.to_path_buf(),
            interval,
            scanner,
            freezer: ProcessFreezer::new(control),
        }
    }

    /// Freezer used around each pass
    pub fn freezer(&self) -> &ProcessFreezer<C> {
        &self.freezer
    }

    /// Run a single sampling pass tagged `iteration`
    ///
    /// The target is thawed before this returns, whether the pass failed
    /// or not, unless the thaw itself failed.
    pub fn run_pass(&mut self, iteration: u64) -> Result<ScanSummary> {
        let maps_path = self.maps_path.as_path();
        let pagemap_path = self.pagemap_path.as_path();
        let output_dir = self.output_dir.as_path();
        let scanner = self.scanner;
        let freezer = &mut self.freezer;

        let maps = File::open(maps_path).map_err(|source| SamplerError::Open {
            path: maps_path.to_path_buf(),
            source,
        })?;

        info!("freezing process [{}]...", maps_path.display());
        let summary = freezer.while_frozen(|| {
            let range = HeapRangeLocator::locate(BufReader::new(maps))?;
            info!(">>> {:#x}-{:#x} => {} kB", range.start, range.end, range.size_kib());
            if !util::is_range_aligned(&range, scanner.page_size()) {
                warn!("heap range {} is not page aligned", range);
            }

            let pagemap = ProcfsHandle::open(pagemap_path).map_err(|source| SamplerError::Open {
                path: pagemap_path.to_path_buf(),
                source,
            })?;
            let sink = IterationFile::create(output_dir, iteration)?;
            scanner.scan(range, &pagemap, iteration, sink)
        })?;
        info!("freezing process [{}]... [done]", maps_path.display());

        info!(
            "iteration {}: {} pages, {} present, {} swapped",
            iteration,
            summary.pages,
            util::format_bytes(summary.present_bytes()),
            util::format_bytes(summary.swapped_bytes())
        );
        match serde_json::to_string(&summary) {
            Ok(json) => debug!("summary: {json}"),
            Err(e) => warn!("could not serialize summary: {e}"),
        }
        Ok(summary)
    }

    /// Sample forever: pass, sleep, next iteration
    ///
    /// Only returns on the first failing pass. There is no bound on how
    /// long a stalled pass keeps the target frozen.
    pub fn run(&mut self) -> Result<()> {
        let mut iteration: u64 = 0;
        loop {
            self.run_pass(iteration)?;
            debug!("sleeping {:?}", self.interval);
            thread::sleep(self.interval);
            iteration += 1;
        }
    }
}
