// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Wakes the daemon on memory pressure stall information (PSI) events.
//!
//! PSI documentation: https://docs.kernel.org/accounting/psi.html

use std::fmt;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

const MEMORY_PRESSURE_PATH: &str = "/proc/pressure/memory";

/// Fires when some task is stalled on memory for `stall` within any `window`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StallTrigger {
    pub stall: Duration,
    pub window: Duration,
}

impl fmt::Display for StallTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "some {} {}", self.stall.as_micros(), self.window.as_micros())
    }
}

pub struct MemoryPressureWatcher {
    fd: AsyncFd<File>,
}

impl MemoryPressureWatcher {
    pub fn new(trigger: StallTrigger) -> io::Result<Self> {
        Self::open(Path::new(MEMORY_PRESSURE_PATH), trigger)
    }

    fn open(path: &Path, trigger: StallTrigger) -> io::Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        // The kernel expects the trigger NUL-terminated.
        file.write_all(format!("{}\0", trigger).as_bytes())?;

        // Events arrive as POLLPRI.
        let fd = AsyncFd::with_interest(file, Interest::PRIORITY)?;
        Ok(Self { fd })
    }

    pub async fn wait(&mut self) -> io::Result<()> {
        let mut guard = self.fd.ready(Interest::PRIORITY).await?;
        guard.clear_ready();
        Ok(())
    }
}
