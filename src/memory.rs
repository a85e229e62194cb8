// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The low memory killer policy: pick the oom_score_adj cutoff from the memory state and kill the
//! processes above it which hold the most memory.

mod killer;
mod selector;
mod switch;
mod threshold;
mod vmstat;

use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;

use once_cell::sync::OnceCell;

pub use killer::KillerStats;
pub use killer::LowMemoryKiller;
pub use killer::ShrinkControl;
pub use killer::DEFAULT_COST;
pub use selector::select_victims;
pub use selector::Candidate;
pub use selector::CandidateSet;
pub use selector::DeathPendingPolicy;
pub use selector::SelectParams;
pub use selector::Selection;
pub use selector::ENHANCED_DEPTH;
pub use selector::SIMPLE_DEPTH;
pub use switch::ScreenState;
pub use switch::ThresholdSwitch;
pub use threshold::Threshold;
pub use threshold::ThresholdEntry;
pub use threshold::ThresholdTable;
pub use threshold::TriggerMode;
pub use threshold::DEFAULT_ADJ;
pub use threshold::DEFAULT_MINFREE;
pub use threshold::MAX_THRESHOLDS;
use vmstat::Vmstat;

/// Page counters of the whole system. All values are in pages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageCounters {
    pub free: i64,
    /// Pages the kernel keeps for itself (watermarks and lowmem reserves).
    pub total_reserve: i64,
    pub file: i64,
    pub shmem: i64,
    pub active_anon: i64,
    pub inactive_anon: i64,
    pub active_file: i64,
    pub inactive_file: i64,
}

impl PageCounters {
    /// Free pages usable by user space. Can be negative.
    pub fn other_free(&self) -> i64 {
        self.free - self.total_reserve
    }

    /// File pages excluding shmem, which cannot be dropped.
    pub fn other_file(&self) -> i64 {
        self.file - self.shmem
    }

    /// The pages on the LRU lists. This is what the killer reports as reclaimable.
    pub fn reclaimable(&self) -> i64 {
        self.active_anon + self.active_file + self.inactive_anon + self.inactive_file
    }
}

/// Samples the system page counters.
pub trait MemoryCounters {
    fn sample(&self) -> io::Result<PageCounters>;
}

/// Returns the total reserved pages calculated from /proc/zoneinfo. It's the sum of the high
/// watermark and the max protection of every zone, the same as calculate_totalreserve_pages() in
/// the kernel.
///
/// /proc/zoneinfo example:
/// ...
/// Node 0, zone   Normal
///   pages free     10240
///         min      4096
///         low      5120
///         high     6144
///         ...
///         protection: (0, 0, 0, 0)
fn calculate_reserved_pages<R: BufRead>(reader: R) -> io::Result<i64> {
    let invalid = |line: &str| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Couldn't parse zoneinfo line: {}", line),
        )
    };
    let mut reserved: i64 = 0;
    for line in reader.lines() {
        let line = line?;
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("high") => {
                if let Some(value) = tokens.next() {
                    reserved += value.parse::<i64>().map_err(|_| invalid(&line))?;
                }
            }
            Some("protection:") => {
                let mut max_protection = 0;
                for token in tokens {
                    let value = token
                        .trim_matches(&['(', ')', ','][..])
                        .parse::<i64>()
                        .map_err(|_| invalid(&line))?;
                    max_protection = max_protection.max(value);
                }
                reserved += max_protection;
            }
            _ => {}
        }
    }
    Ok(reserved)
}

/// [MemoryCounters] backed by /proc/vmstat and /proc/zoneinfo.
#[derive(Default)]
pub struct HostMemoryCounters {
    // Watermarks only change with sysctls the killer doesn't follow.
    total_reserve: OnceCell<i64>,
}

impl HostMemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn total_reserve(&self) -> io::Result<i64> {
        self.total_reserve
            .get_or_try_init(|| {
                let reader = BufReader::new(File::open("/proc/zoneinfo")?);
                calculate_reserved_pages(reader)
            })
            .copied()
    }
}

impl MemoryCounters for HostMemoryCounters {
    fn sample(&self) -> io::Result<PageCounters> {
        let vmstat = Vmstat::load()?;
        Ok(PageCounters {
            free: vmstat.nr_free_pages,
            total_reserve: self.total_reserve()?,
            file: vmstat.nr_file_pages,
            shmem: vmstat.nr_shmem,
            active_anon: vmstat.nr_active_anon,
            inactive_anon: vmstat.nr_inactive_anon,
            active_file: vmstat.nr_active_file,
            inactive_file: vmstat.nr_inactive_file,
        })
    }
}
