// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use anyhow::bail;

use crate::memory::MemoryCounters;
use crate::memory::PageCounters;
use crate::proc::ProcessKiller;
use crate::proc::ProcessSnapshot;
use crate::proc::ProcessSource;
use crate::sync::NoPoison;

/// A user process named "process-{pid}".
pub fn process(pid: i32, score: i16, size: i64) -> ProcessSnapshot {
    ProcessSnapshot {
        pid,
        name: format!("process-{}", pid),
        score,
        resident: Some(size),
        kernel_thread: false,
        death_pending: false,
    }
}

/// An in-memory process table which records the kills.
#[derive(Default)]
pub struct FakeProcessTable {
    processes: Mutex<Vec<ProcessSnapshot>>,
    killed: Mutex<Vec<i32>>,
    failing_pid: Mutex<Option<i32>>,
    walks: AtomicUsize,
}

impl FakeProcessTable {
    pub fn new(processes: Vec<ProcessSnapshot>) -> Self {
        Self {
            processes: Mutex::new(processes),
            ..Default::default()
        }
    }

    /// The number of times the table was walked.
    pub fn walks(&self) -> usize {
        self.walks.load(Ordering::Relaxed)
    }

    pub fn killed(&self) -> Vec<i32> {
        self.killed.do_lock().clone()
    }

    pub fn is_death_pending(&self, pid: i32) -> bool {
        self.processes
            .do_lock()
            .iter()
            .any(|p| p.pid == pid && p.death_pending)
    }

    /// Makes send_kill() fail for `pid`.
    pub fn fail_kill(&self, pid: i32) {
        *self.failing_pid.do_lock() = Some(pid);
    }

    /// Simulates the exit of `pid`.
    pub fn remove(&self, pid: i32) {
        self.processes.do_lock().retain(|p| p.pid != pid);
    }
}

impl ProcessSource for FakeProcessTable {
    fn processes(&self) -> Box<dyn Iterator<Item = ProcessSnapshot> + '_> {
        self.walks.fetch_add(1, Ordering::Relaxed);
        Box::new(self.processes.do_lock().clone().into_iter())
    }
}

impl ProcessKiller for FakeProcessTable {
    fn send_kill(&self, pid: i32) -> anyhow::Result<()> {
        if *self.failing_pid.do_lock() == Some(pid) {
            bail!("Failed to send SIGKILL to {}", pid);
        }
        self.killed.do_lock().push(pid);
        Ok(())
    }

    fn mark_death_pending(&self, pid: i32) {
        for process in self.processes.do_lock().iter_mut() {
            if process.pid == pid {
                process.death_pending = true;
            }
        }
    }
}

pub struct FakeCounters {
    counters: PageCounters,
}

impl FakeCounters {
    pub fn new(counters: PageCounters) -> Self {
        Self { counters }
    }
}

impl MemoryCounters for FakeCounters {
    fn sample(&self) -> io::Result<PageCounters> {
        Ok(self.counters)
    }
}
