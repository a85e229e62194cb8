// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::str::FromStr;

use anyhow::bail;

/// The maximum number of (adj, minfree) pairs in a threshold table.
pub const MAX_THRESHOLDS: usize = 6;

pub const DEFAULT_ADJ: [i16; MAX_THRESHOLDS] = [0, 1, 6, 12, 16, 17];

// In 4 KiB pages: 6, 8, 16, 20, 32 and 64 MiB.
pub const DEFAULT_MINFREE: [i64; MAX_THRESHOLDS] = [
    3 * 512,
    2 * 1024,
    4 * 1024,
    5 * 1024,
    8 * 1024,
    16 * 1024,
];

/// Which page counters must fall below a minfree entry to trigger it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TriggerMode {
    /// Both the free pages and the file pages are below minfree.
    #[default]
    FreeAndFile,
    /// Only the file pages are below minfree. Free pages are ignored.
    FileOnly,
}

impl TriggerMode {
    fn is_triggered(self, free_pages: i64, file_pages: i64, min_free: i64) -> bool {
        match self {
            TriggerMode::FreeAndFile => free_pages < min_free && file_pages < min_free,
            TriggerMode::FileOnly => file_pages < min_free,
        }
    }
}

impl FromStr for TriggerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "free_and_file" => TriggerMode::FreeAndFile,
            "file_only" => TriggerMode::FileOnly,
            _ => bail!("Unsupported trigger mode: {}", s),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThresholdEntry {
    pub score_cutoff: i16,
    pub min_free: i64,
}

/// The threshold entry which is triggered by the current memory state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Threshold {
    /// Processes with oom_score_adj lower than this are not eligible.
    pub score_cutoff: i16,
    pub min_free: i64,
    /// How far the free + file pages are below `min_free`. Only used for diagnostics.
    pub target_free: i64,
}

/// An immutable minfree table.
///
/// Tables are never updated in place. A new table is built and swapped in as a whole so that
/// concurrent reclaim never observes half of an update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ThresholdTable {
    entries: Vec<ThresholdEntry>,
}

impl ThresholdTable {
    /// Pairs `adj` with `minfree`. The table is as long as the shorter of both, capped at
    /// [MAX_THRESHOLDS].
    pub fn new(adj: &[i16], minfree: &[i64]) -> Self {
        let entries = adj
            .iter()
            .zip(minfree.iter())
            .take(MAX_THRESHOLDS)
            .map(|(&score_cutoff, &min_free)| ThresholdEntry {
                score_cutoff,
                min_free,
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[ThresholdEntry] {
        &self.entries
    }

    /// Returns the first entry triggered by the given page counts, or `None` if memory is not
    /// tight enough for any entry.
    ///
    /// Entries are expected in ascending minfree order but are not re-sorted here; the first
    /// match wins.
    pub fn select(&self, free_pages: i64, file_pages: i64, mode: TriggerMode) -> Option<Threshold> {
        self.entries
            .iter()
            .find(|entry| mode.is_triggered(free_pages, file_pages, entry.min_free))
            .map(|entry| Threshold {
                score_cutoff: entry.score_cutoff,
                min_free: entry.min_free,
                target_free: entry.min_free - (free_pages + file_pages),
            })
    }
}
