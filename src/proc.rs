// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Access to the process table: snapshots for victim selection and termination of victims.

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

use anyhow::Context;
use log::debug;
use log::error;
use nix::sys::signal::kill;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use procfs::process::Process;
use thiserror::Error as ThisError;

use crate::sync::NoPoison;

// PF_KTHREAD in include/linux/sched.h.
const PF_KTHREAD: u32 = 0x0020_0000;

/// A point-in-time view of a process, taken while walking the process table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pub pid: i32,
    pub name: String,
    /// oom_score_adj. Higher is more killable.
    pub score: i16,
    /// Resident pages, or `None` if the memory map could not be resolved (e.g. the process is
    /// exiting or is a zombie).
    pub resident: Option<i64>,
    pub kernel_thread: bool,
    /// The process has already been sent a termination signal and has not exited yet.
    pub death_pending: bool,
}

/// Produces the live processes.
///
/// Each call starts a new walk. The walk tolerates processes exiting concurrently: a process that
/// disappears is either yielded with the state read before it went away or not yielded at all.
pub trait ProcessSource {
    fn processes(&self) -> Box<dyn Iterator<Item = ProcessSnapshot> + '_>;
}

/// Terminates processes.
pub trait ProcessKiller {
    /// Delivers SIGKILL to the process.
    fn send_kill(&self, pid: i32) -> anyhow::Result<()>;

    /// Marks the process as death-pending so that later walks report it until it exits.
    fn mark_death_pending(&self, pid: i32);
}

/// Error of reading per-process files under /proc/pid.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("/proc/{0}/oom_score_adj is not found")]
    NotFound(i32),
    #[error("invalid oom_score_adj: {0:?}")]
    Invalid(String),
    #[error("procfs: {0}")]
    Io(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Loads oom_score_adj of the process from /proc/pid/oom_score_adj.
pub fn load_oom_score_adj(pid: i32) -> Result<i16> {
    let content = std::fs::read_to_string(format!("/proc/{}/oom_score_adj", pid)).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            Error::NotFound(pid)
        } else {
            Error::Io(e)
        }
    })?;
    let content = content.trim();
    content
        .parse()
        .map_err(|_| Error::Invalid(content.to_owned()))
}

/// [ProcessSource] and [ProcessKiller] backed by procfs and kill(2).
///
/// There is no TIF_MEMDIE equivalent visible from /proc, so death-pending processes are tracked
/// here. They are keyed by (pid, starttime) so that a recycled pid is not reported as
/// death-pending.
#[derive(Default)]
pub struct ProcfsProcessTable {
    death_pending: Mutex<HashMap<i32, u64>>,
}

impl ProcfsProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the marks of processes which have exited.
    fn prune_death_pending(&self) -> HashMap<i32, u64> {
        let mut death_pending = self.death_pending.do_lock();
        death_pending.retain(|pid, starttime| {
            Process::new(*pid)
                .and_then(|process| process.stat())
                .map(|stat| stat.starttime == *starttime)
                .unwrap_or(false)
        });
        death_pending.clone()
    }
}

fn snapshot(process: &Process, death_pending: &HashMap<i32, u64>) -> Option<ProcessSnapshot> {
    let stat = process.stat().ok()?;
    let kernel_thread = stat.flags & PF_KTHREAD != 0;
    let score = match load_oom_score_adj(stat.pid) {
        Ok(score) => score,
        Err(Error::NotFound(_)) => return None,
        Err(e) => {
            debug!("Skip {} ({}): {}", stat.pid, stat.comm, e);
            return None;
        }
    };
    // Zombies and exiting processes have released their mm.
    let resident = if kernel_thread || matches!(stat.state, 'Z' | 'X') {
        None
    } else {
        process
            .statm()
            .ok()
            .map(|statm| i64::try_from(statm.resident).unwrap_or(i64::MAX))
    };
    Some(ProcessSnapshot {
        pid: stat.pid,
        death_pending: death_pending.get(&stat.pid) == Some(&stat.starttime),
        name: stat.comm,
        score,
        resident,
        kernel_thread,
    })
}

impl ProcessSource for ProcfsProcessTable {
    fn processes(&self) -> Box<dyn Iterator<Item = ProcessSnapshot> + '_> {
        let death_pending = self.prune_death_pending();
        match procfs::process::all_processes() {
            Ok(processes) => Box::new(
                processes
                    .filter_map(|process| process.ok())
                    .filter_map(move |process| snapshot(&process, &death_pending)),
            ),
            Err(e) => {
                error!("Failed to list processes: {}", e);
                Box::new(std::iter::empty())
            }
        }
    }
}

impl ProcessKiller for ProcfsProcessTable {
    fn send_kill(&self, pid: i32) -> anyhow::Result<()> {
        kill(Pid::from_raw(pid), Signal::SIGKILL)
            .with_context(|| format!("Failed to send SIGKILL to {}", pid))
    }

    fn mark_death_pending(&self, pid: i32) {
        match Process::new(pid).and_then(|process| process.stat()) {
            Ok(stat) => {
                self.death_pending.do_lock().insert(pid, stat.starttime);
            }
            // The process is already gone; there is nothing to wait for.
            Err(e) => debug!("Couldn't mark {} as death-pending: {}", pid, e),
        }
    }
}
