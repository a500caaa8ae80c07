//! Freeze/thaw control for the sampled process
//!
//! A sampling pass must see a heap that does not move between reading
//! `/proc/[pid]/maps` and walking `/proc/[pid]/pagemap`. `ProcessFreezer`
//! pauses the target through a `FreezeControl` and hands out a
//! `FreezeGuard` that always thaws it again.
//!
//! Three controls are provided:
//!
//! - **`CgroupFreezer`**: cgroup v1 `freezer.state` (`FROZEN` / `THAWED`)
//! - **`CgroupV2Freezer`**: cgroup v2 `cgroup.freeze` (`1` / `0`)
//! - **`SignalFreezer`**: `SIGSTOP` / `SIGCONT` sent to the pid
//!
//! # Example
//!
//! ```no_run
//! use heapscan_rs::{CgroupFreezer, ProcessFreezer};
//!
//! let mut freezer = ProcessFreezer::new(CgroupFreezer::default());
//! let pages = freezer.while_frozen(|| Ok(42)).expect("freeze failed");
//! assert_eq!(pages, 42);
//! ```

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, error};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SamplerError};
use crate::sys::DEFAULT_FREEZER_STATE;

/// Requested state of the target process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FreezerState {
    /// All tasks paused
    Frozen,
    /// All tasks running
    Thawed,
}

impl FreezerState {
    /// Directive written to a cgroup v1 `freezer.state` file
    pub const fn directive(&self) -> &'static str {
        match self {
            Self::Frozen => "FROZEN\n",
            Self::Thawed => "THAWED\n",
        }
    }
}

impl fmt::Display for FreezerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directive().trim_end())
    }
}

/// Mechanism able to pause and resume the target process
pub trait FreezeControl {
    /// Request `state`
    fn set_state(&mut self, state: FreezerState) -> io::Result<()>;

    /// Human-readable target for diagnostics
    fn target(&self) -> String;
}

impl<C: FreezeControl + ?Sized> FreezeControl for Box<C> {
    fn set_state(&mut self, state: FreezerState) -> io::Result<()> {
        (**self).set_state(state)
    }

    fn target(&self) -> String {
        (**self).target()
    }
}

/// cgroup v1 freezer (`freezer.state`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupFreezer {
    path: PathBuf,
}

impl CgroupFreezer {
    /// Control the cgroup whose `freezer.state` lives at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Control file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for CgroupFreezer {
    fn default() -> Self {
        Self::new(DEFAULT_FREEZER_STATE)
    }
}

impl FreezeControl for CgroupFreezer {
    fn set_state(&mut self, state: FreezerState) -> io::Result<()> {
        fs::write(&self.path, state.directive())
    }

    fn target(&self) -> String {
        self.path.display().to_string()
    }
}

/// cgroup v2 freezer (`cgroup.freeze`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupV2Freezer {
    path: PathBuf,
}

impl CgroupV2Freezer {
    /// Control the cgroup whose `cgroup.freeze` lives at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FreezeControl for CgroupV2Freezer {
    fn set_state(&mut self, state: FreezerState) -> io::Result<()> {
        let value = match state {
            FreezerState::Frozen => "1\n",
            FreezerState::Thawed => "0\n",
        };
        fs::write(&self.path, value)
    }

    fn target(&self) -> String {
        self.path.display().to_string()
    }
}

/// Job-control freezer: `SIGSTOP` to freeze, `SIGCONT` to thaw
///
/// Only the process itself is stopped, not the rest of its cgroup.
/// Signal delivery is asynchronous: `freeze()` returns once `SIGSTOP` is
/// queued, and the target may still run briefly before it stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalFreezer {
    pid: Pid,
}

impl SignalFreezer {
    /// Control process `pid`
    ///
    /// # Errors
    /// Returns `InvalidPid` for 0 or a pid above `i32::MAX`, which `kill`
    /// would read as a process group.
    pub fn new(pid: u32) -> Result<Self> {
        match i32::try_from(pid) {
            Ok(raw) if raw > 0 => Ok(Self {
                pid: Pid::from_raw(raw),
            }),
            _ => Err(SamplerError::InvalidPid(pid)),
        }
    }
}

impl FreezeControl for SignalFreezer {
    fn set_state(&mut self, state: FreezerState) -> io::Result<()> {
        let sig = match state {
            FreezerState::Frozen => Signal::SIGSTOP,
            FreezerState::Thawed => Signal::SIGCONT,
        };
        signal::kill(self.pid, sig).map_err(io::Error::from)
    }

    fn target(&self) -> String {
        format!("pid {}", self.pid)
    }
}

/// Pauses the target process around a sampling pass
#[derive(Debug)]
pub struct ProcessFreezer<C: FreezeControl> {
    control: C,
}

impl<C: FreezeControl> ProcessFreezer<C> {
    /// Wrap a control mechanism
    pub fn new(control: C) -> Self {
        Self { control }
    }

    /// Underlying control
    pub fn control(&self) -> &C {
        &self.control
    }

    /// Freeze the target, returning a guard that thaws it
    ///
    /// # Errors
    /// Returns `ControlWrite` if the freeze directive cannot be written.
    /// No guard exists in that case, so nothing is thawed.
    pub fn freeze(&mut self) -> Result<FreezeGuard<'_, C>> {
        self.write(FreezerState::Frozen)?;
        debug!("froze [{}]", self.control.target());
        Ok(FreezeGuard {
            freezer: self,
            released: false,
        })
    }

    /// Run `f` while the target is frozen
    ///
    /// The target is thawed exactly once whatever `f` returns. A thaw
    /// failure wins over the error of `f`, which is logged.
    pub fn while_frozen<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let guard = self.freeze()?;
        let outcome = f();
        match (outcome, guard.thaw()) {
            (outcome, Ok(())) => outcome,
            (Ok(_), Err(thaw)) => Err(thaw),
            (Err(inner), Err(thaw)) => {
                error!("{inner}");
                Err(thaw)
            }
        }
    }

    fn write(&mut self, state: FreezerState) -> Result<()> {
        self.control
            .set_state(state)
            .map_err(|source| SamplerError::ControlWrite {
                state,
                target: self.control.target(),
                source,
            })
    }
}

/// Scope of a frozen target
///
/// Call [`FreezeGuard::thaw`] to resume the target and observe failures.
/// A guard dropped without `thaw` (early return, panic) thaws on drop; if
/// that thaw fails the program exits, since a target left frozen forever
/// is worse than a dead sampler.
#[derive(Debug)]
#[must_use = "dropping the guard thaws the process immediately"]
pub struct FreezeGuard<'a, C: FreezeControl> {
    freezer: &'a mut ProcessFreezer<C>,
    released: bool,
}

impl<C: FreezeControl> FreezeGuard<'_, C> {
    /// Thaw the target
    pub fn thaw(mut self) -> Result<()> {
        self.released = true;
        self.freezer.write(FreezerState::Thawed)?;
        debug!("thawed [{}]", self.freezer.control.target());
        Ok(())
    }
}

impl<C: FreezeControl> Drop for FreezeGuard<'_, C> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.freezer.write(FreezerState::Thawed) {
            error!("{e}");
            std::process::exit(1);
        }
    }
}
