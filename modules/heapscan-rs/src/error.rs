//! Error handling for heap sampling operations
//!
//! Every variant is fatal for the sampling pass that produced it. Callers
//! are expected to stop, not retry.

use std::io;
use std::path::PathBuf;
use std::result;

use thiserror::Error;

use crate::freezer::FreezerState;

/// Result type alias for heap sampling operations
pub type Result<T> = result::Result<T, SamplerError>;

/// Errors that can occur while sampling a process heap
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SamplerError {
    /// A procfs file could not be opened
    #[error("could not open [{}]: {source}", .path.display())]
    Open {
        /// Path that failed to open
        path: PathBuf,
        /// Underlying cause
        source: io::Error,
    },

    /// Reading the memory map listing failed part way through
    #[error("error reading memory map: {0}")]
    MapsRead(#[source] io::Error),

    /// The heap line's range token is not `<hex>-<hex>`
    #[error("error scanning heap range {token:?}: {reason}")]
    RangeParse {
        /// Offending token
        token: String,
        /// What was wrong with it
        reason: String,
    },

    /// No line of the memory map carries the heap marker
    #[error("no [heap] region found in memory map")]
    HeapNotFound,

    /// Writing a directive to the freezer control failed
    #[error("error writing {state} directive to [{target}]: {source}")]
    ControlWrite {
        /// Directive that was being written
        state: FreezerState,
        /// Control target (file path or pid)
        target: String,
        /// Underlying cause
        source: io::Error,
    },

    /// A pagemap entry could not be read in full
    #[error("error reading pagemap entry at offset {offset:#x}: {source}")]
    PagemapRead {
        /// Byte offset into the pagemap
        offset: u64,
        /// Underlying cause
        source: io::Error,
    },

    /// The per-iteration output file could not be created
    #[error("could not create [{}]: {source}", .path.display())]
    SinkCreate {
        /// Output path
        path: PathBuf,
        /// Underlying cause
        source: io::Error,
    },

    /// Writing a record to the output sink failed
    #[error("error writing residency record: {0}")]
    SinkWrite(#[source] io::Error),

    /// Flushing or closing the output sink failed
    #[error("error closing output: {0}")]
    SinkClose(#[source] io::Error),

    /// The host page size could not be queried
    #[error("could not query system page size: {0}")]
    PageSize(#[source] io::Error),

    /// A page size that is not a power of two, or is smaller than a pagemap entry
    #[error("invalid page size: {0}")]
    InvalidPageSize(u64),

    /// Invalid process ID
    #[error("invalid process ID: {0}")]
    InvalidPid(u32),

    /// Process not found under /proc
    #[error("process {0} not found")]
    ProcessNotFound(u32),
}

impl SamplerError {
    /// Build a `RangeParse` error for `token`
    pub(crate) fn range_parse(token: &str, reason: impl Into<String>) -> Self {
        SamplerError::RangeParse {
            token: token.to_string(),
            reason: reason.into(),
        }
    }

    /// Check whether this error came from the freezer control
    pub fn is_control_error(&self) -> bool {
        matches!(self, SamplerError::ControlWrite { .. })
    }
}
