// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::str::FromStr;

use anyhow::bail;

use crate::proc::ProcessSnapshot;

/// The number of victims tracked per scan in enhanced mode.
pub const ENHANCED_DEPTH: usize = 3;

/// The number of victims tracked per scan in simple mode.
pub const SIMPLE_DEPTH: usize = 1;

/// What to do when a walk meets a death-pending process while the cooldown is active.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeathPendingPolicy {
    /// Abort the whole scan. Nothing is killed until the pending death completes or the cooldown
    /// expires.
    #[default]
    AbortInvocation,
    /// Skip only the death-pending process and keep selecting among the others.
    SkipProcess,
}

impl FromStr for DeathPendingPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "abort" => DeathPendingPolicy::AbortInvocation,
            "skip" => DeathPendingPolicy::SkipProcess,
            _ => bail!("Unsupported death pending policy: {}", s),
        })
    }
}

/// A selected process with the score and size cached at selection time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub pid: i32,
    pub name: String,
    pub score: i16,
    pub size: i64,
}

impl Candidate {
    /// Ranking is by score, then by size. Equal score favors the larger process.
    fn ranks_below(&self, other: &Candidate) -> bool {
        self.score < other.score || (self.score == other.score && self.size < other.size)
    }
}

/// Holds the best `depth` candidates seen so far.
///
/// Once the set is full, a newcomer replaces the lowest ranked member only if it ranks strictly
/// higher.
#[derive(Debug)]
pub struct CandidateSet {
    slots: Vec<Candidate>,
    depth: usize,
    /// Index of the lowest ranked slot. Only meaningful when the set is full.
    min_idx: usize,
}

impl CandidateSet {
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            slots: Vec::with_capacity(depth),
            depth,
            min_idx: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.depth
    }

    /// Offers a candidate. Returns the stored candidate if it was taken.
    pub fn offer(&mut self, candidate: Candidate) -> Option<&Candidate> {
        let idx = if !self.is_full() {
            self.slots.push(candidate);
            self.slots.len() - 1
        } else if self.slots[self.min_idx].ranks_below(&candidate) {
            self.slots[self.min_idx] = candidate;
            self.min_idx
        } else {
            return None;
        };
        self.min_idx = idx;
        if self.is_full() {
            // K is small, a full rescan is cheaper than keeping a heap.
            self.min_idx = self.find_min();
        }
        Some(&self.slots[idx])
    }

    fn find_min(&self) -> usize {
        let mut min_idx = self.min_idx;
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.ranks_below(&self.slots[min_idx]) {
                min_idx = i;
            }
        }
        min_idx
    }

    pub fn into_victims(self) -> Vec<Candidate> {
        self.slots
    }
}

/// The result of a walk over the process table.
#[derive(Debug, PartialEq, Eq)]
pub enum Selection {
    Victims(Vec<Candidate>),
    /// The walk met a death-pending process while the cooldown was active.
    Backoff { pid: i32, name: String },
}

#[derive(Clone, Copy, Debug)]
pub struct SelectParams {
    pub score_cutoff: i16,
    pub depth: usize,
    pub cooldown_active: bool,
    pub death_pending_policy: DeathPendingPolicy,
    pub debug_level: u32,
}

/// Walks `processes` and picks up to `depth` victims with the highest (score, size).
pub fn select_victims<I>(processes: I, params: &SelectParams) -> Selection
where
    I: IntoIterator<Item = ProcessSnapshot>,
{
    let mut candidates = CandidateSet::new(params.depth);
    for process in processes {
        if process.kernel_thread {
            continue;
        }
        let Some(size) = process.resident else {
            continue;
        };
        if process.death_pending && params.cooldown_active {
            match params.death_pending_policy {
                DeathPendingPolicy::AbortInvocation => {
                    return Selection::Backoff {
                        pid: process.pid,
                        name: process.name,
                    }
                }
                DeathPendingPolicy::SkipProcess => continue,
            }
        }
        if process.score < params.score_cutoff || size <= 0 {
            continue;
        }
        let candidate = Candidate {
            pid: process.pid,
            name: process.name,
            score: process.score,
            size,
        };
        if let Some(selected) = candidates.offer(candidate) {
            lowmem_print!(
                params.debug_level,
                2,
                "select {} ({}), adj {}, size {}, to kill",
                selected.pid,
                selected.name,
                selected.score,
                selected.size
            );
        }
    }
    Selection::Victims(candidates.into_victims())
}
