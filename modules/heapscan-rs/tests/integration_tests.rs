//! Integration tests for heapscan-rs

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use heapscan_rs::{
    AddressRange, CgroupFreezer, FreezeControl, FreezerState, HeapRangeLocator,
    PageResidencyScanner, ResidencyRecord, Sampler, SamplerError, iteration_file_name,
};
use tempfile::TempDir;

/// Freezer control that keeps every directive it receives
#[derive(Debug, Default)]
struct RecordingControl {
    log: Vec<FreezerState>,
}

impl FreezeControl for RecordingControl {
    fn set_state(&mut self, state: FreezerState) -> io::Result<()> {
        self.log.push(state);
        Ok(())
    }

    fn target(&self) -> String {
        "recording".to_string()
    }
}

/// Write a pagemap file holding `entries` at indexes `first..`
fn write_pagemap(path: &Path, first: u64, entries: &[u64]) {
    let mut bytes = vec![0u8; (first * 8) as usize];
    for entry in entries {
        bytes.extend_from_slice(&entry.to_le_bytes());
    }
    fs::write(path, bytes).unwrap();
}

/// Lay out maps/pagemap files in a scratch directory
fn fixture(maps: &str, first: u64, entries: &[u64]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("maps"), maps).unwrap();
    write_pagemap(&dir.path().join("pagemap"), first, entries);
    dir
}

fn sampler<C: FreezeControl>(dir: &Path, control: C) -> Sampler<C> {
    Sampler::with_paths(
        dir.join("maps"),
        dir.join("pagemap"),
        dir,
        Duration::from_secs(600),
        PageResidencyScanner::new(4096).unwrap(),
        control,
    )
}

#[test]
fn test_single_page_heap() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = fixture(
        "00400000-00401000 r-xp ... [heap]\n",
        0x400,
        &[0x8000_0000_0000_0000],
    );

    let mut sampler = sampler(dir.path(), RecordingControl::default());
    let summary = sampler.run_pass(0).unwrap();

    assert_eq!(summary.range, AddressRange::new(0x400000, 0x401000));
    assert_eq!(summary.pages, 1);
    assert_eq!(summary.present, 1);
    assert_eq!(summary.swapped, 0);

    let out = fs::read_to_string(dir.path().join("iter-0000")).unwrap();
    assert_eq!(out, "0\t0x400000\t\t4194304\t10\n");
}

#[test]
fn test_two_page_heap_in_order() {
    let dir = fixture(
        "00400000-00402000 rw-p 00000000 00:00 0  [heap]\n",
        0x400,
        &[0xC000_0000_0000_0000, 0x0],
    );

    let mut sampler = sampler(dir.path(), RecordingControl::default());
    sampler.run_pass(0).unwrap();

    let out = fs::read_to_string(dir.path().join("iter-0000")).unwrap();
    let lines: Vec<_> = out.lines().collect();
    assert_eq!(
        lines,
        vec!["0\t0x400000\t\t4194304\t11", "0\t0x401000\t\t4198400\t00"]
    );
}

#[test]
fn test_freezer_brackets_each_pass() {
    let dir = fixture("1000-2000 rw-p 0 0 0 [heap]\n", 1, &[0]);

    let mut sampler = sampler(dir.path(), RecordingControl::default());
    sampler.run_pass(0).unwrap();
    sampler.run_pass(1).unwrap();

    assert_eq!(
        sampler.freezer().control().log,
        vec![
            FreezerState::Frozen,
            FreezerState::Thawed,
            FreezerState::Frozen,
            FreezerState::Thawed,
        ]
    );
    assert!(dir.path().join(iteration_file_name(0)).exists());
    let second = fs::read_to_string(dir.path().join("iter-0001")).unwrap();
    assert_eq!(second, "1\t0x1000\t\t4096\t00\n");
}

#[test]
fn test_thaw_after_scan_failure() {
    // Heap spans three pages but the pagemap only holds one entry
    let dir = fixture("1000-4000 rw-p 0 0 0 [heap]\n", 1, &[0x8000_0000_0000_0000]);
    let state = dir.path().join("freezer.state");

    let mut sampler = sampler(dir.path(), CgroupFreezer::new(&state));
    let err = sampler.run_pass(0).unwrap_err();

    assert!(matches!(err, SamplerError::PagemapRead { offset: 16, .. }));
    assert_eq!(fs::read_to_string(&state).unwrap(), "THAWED\n");
}

#[test]
fn test_thaw_after_missing_heap() {
    let dir = fixture("1000-2000 r-xp 0 0 0 /usr/bin/true\n", 0, &[]);

    let mut sampler = sampler(dir.path(), RecordingControl::default());
    let err = sampler.run_pass(0).unwrap_err();

    assert!(matches!(err, SamplerError::HeapNotFound));
    assert_eq!(
        sampler.freezer().control().log,
        vec![FreezerState::Frozen, FreezerState::Thawed]
    );
    assert!(!dir.path().join("iter-0000").exists());
}

#[test]
fn test_non_utf8_mapping_before_heap() {
    let dir = fixture("", 0x600, &[0x8000_0000_0000_0000]);
    let mut maps = b"00400000-00401000 r-xp 00000000 fd:01 42 /opt/caf\xe9/app\n".to_vec();
    maps.extend_from_slice(b"00600000-00601000 rw-p 00000000 00:00 0 [heap]\n");
    fs::write(dir.path().join("maps"), maps).unwrap();

    let mut sampler = sampler(dir.path(), RecordingControl::default());
    let summary = sampler.run_pass(0).unwrap();

    assert_eq!(summary.range, AddressRange::new(0x600000, 0x601000));
    assert_eq!(
        fs::read_to_string(dir.path().join("iter-0000")).unwrap(),
        "0\t0x600000\t\t6291456\t10\n"
    );
}

#[test]
fn test_thaw_after_malformed_range() {
    let dir = fixture("zz-yy rw-p 0 0 0 [heap]\n", 0, &[]);

    let mut sampler = sampler(dir.path(), RecordingControl::default());
    let err = sampler.run_pass(0).unwrap_err();

    assert!(matches!(err, SamplerError::RangeParse { .. }));
    assert_eq!(sampler.freezer().control().log.len(), 2);
}

#[test]
fn test_freeze_failure_stops_pass() {
    let dir = fixture("1000-2000 rw-p 0 0 0 [heap]\n", 1, &[0]);
    let state = dir.path().join("no-such-cgroup").join("freezer.state");

    let mut sampler = sampler(dir.path(), CgroupFreezer::new(&state));
    let err = sampler.run_pass(0).unwrap_err();

    assert!(matches!(
        err,
        SamplerError::ControlWrite {
            state: FreezerState::Frozen,
            ..
        }
    ));
    assert!(!dir.path().join("iter-0000").exists());
}

#[test]
fn test_scan_own_heap() {
    // Only meaningful when this test binary has a brk heap
    let maps = heapscan_rs::sys::maps_path(std::process::id());
    let Ok(range) = HeapRangeLocator::locate_file(&maps) else {
        return;
    };
    let Ok(pagemap) = heapscan_rs::ProcfsHandle::open_pagemap(std::process::id()) else {
        return;
    };

    let scanner = PageResidencyScanner::host().unwrap();
    let mut records: Vec<ResidencyRecord> = Vec::new();
    let summary = scanner.scan(range, &pagemap, 0, &mut records).unwrap();

    assert_eq!(summary.pages, range.size() / 4096);
    assert!(records.windows(2).all(|w| w[0].address < w[1].address));
}
