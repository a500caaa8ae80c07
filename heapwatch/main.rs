//! Heapwatch: periodic heap residency sampler
//!
//! Freezes a process, records which of its heap pages are present in
//! memory or swapped out into `iter-NNNN` files, thaws it, and repeats
//! after an interval.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use heapscan_rs::{
    CgroupFreezer, CgroupV2Freezer, DEFAULT_FREEZER_STATE, FreezeControl, Sampler, SamplerConfig,
    SignalFreezer,
};
use log::{info, warn};

/// Heapwatch CLI arguments
#[derive(Parser, Debug)]
#[command(name = "heapwatch")]
#[command(about = "Sample heap page residency of a frozen process")]
#[command(version)]
struct Cli {
    /// Process ID to sample
    pid: u32,
    /// Frequency for sampling (seconds, or with an s/m/h suffix)
    #[arg(short, long, default_value = "600s", value_parser = parse_interval)]
    freq: Duration,
    /// Directory receiving the iter-NNNN files
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,
    /// How the process is frozen
    #[arg(long, value_enum, default_value_t = FreezerKind::CgroupV1)]
    freezer: FreezerKind,
    /// Freezer control file (freezer.state for cgroup-v1, cgroup.freeze for cgroup-v2)
    #[arg(long)]
    freezer_path: Option<PathBuf>,
}

/// Available freeze mechanisms
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FreezerKind {
    /// cgroup v1 freezer.state
    CgroupV1,
    /// cgroup v2 cgroup.freeze
    CgroupV2,
    /// SIGSTOP / SIGCONT
    Signal,
}

fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let cli = Cli::parse();

    if !heapscan_rs::is_available() {
        anyhow::bail!("/proc/[pid]/pagemap is not available on this system");
    }
    if !heapscan_rs::has_permission() {
        warn!("not running as root: swap bits will read as zero and freezing may fail");
    }

    let control = build_control(&cli)?;
    let config = SamplerConfig::new(cli.pid)
        .with_interval(cli.freq)
        .with_output_dir(&cli.output_dir);
    info!(
        "sampling heap of process {} every {:?} into [{}]",
        cli.pid,
        cli.freq,
        cli.output_dir.display()
    );

    let mut sampler = Sampler::new(&config, control)
        .with_context(|| format!("Failed to set up sampling of process {}", cli.pid))?;
    sampler
        .run()
        .with_context(|| format!("Sampling of process {} stopped", cli.pid))?;

    Ok(())
}

/// Pick the freeze mechanism requested on the command line
fn build_control(cli: &Cli) -> anyhow::Result<Box<dyn FreezeControl>> {
    let control: Box<dyn FreezeControl> = match cli.freezer {
        FreezerKind::CgroupV1 => Box::new(CgroupFreezer::new(
            cli.freezer_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FREEZER_STATE)),
        )),
        FreezerKind::CgroupV2 => {
            let path = cli
                .freezer_path
                .clone()
                .context("--freezer-path is required with --freezer cgroup-v2")?;
            Box::new(CgroupV2Freezer::new(path))
        }
        FreezerKind::Signal => {
            if cli.freezer_path.is_some() {
                warn!("--freezer-path is ignored with --freezer signal");
            }
            Box::new(SignalFreezer::new(cli.pid)?)
        }
    };
    info!("freezer: {}", control.target());
    Ok(control)
}

/// Parse `600`, `600s`, `10m` or `1h` into a duration
fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, scale) = match s.char_indices().last() {
        Some((i, 's')) => (&s[..i], 1),
        Some((i, 'm')) => (&s[..i], 60),
        Some((i, 'h')) => (&s[..i], 3600),
        _ => (s, 1),
    };
    let value: u64 = digits
        .parse()
        .map_err(|e| format!("invalid interval {s:?}: {e}"))?;
    value
        .checked_mul(scale)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("interval {s:?} is too large"))
}
