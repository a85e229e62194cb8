// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use anyhow::Context;
use anyhow::Result;
use log::error;
use log::info;
use log::warn;
use lowmemorykiller::config::Config;
use lowmemorykiller::config::ConfigProvider;
use lowmemorykiller::config::DirectoryConfigProvider;
use lowmemorykiller::display::BacklightDisplayState;
use lowmemorykiller::display::DisplayStateProvider;
use lowmemorykiller::display::ScreenState;
use lowmemorykiller::max_level_filter;
use lowmemorykiller::memory::HostMemoryCounters;
use lowmemorykiller::memory::LowMemoryKiller;
use lowmemorykiller::memory::ShrinkControl;
use lowmemorykiller::proc::ProcfsProcessTable;
use lowmemorykiller::psi::MemoryPressureWatcher;
use lowmemorykiller::psi::StallTrigger;
use tokio::runtime::Builder;

const IDENT: &str = "lowmemorykiller";

const PSI_TRIGGER: StallTrigger = StallTrigger {
    stall: Duration::from_millis(150),
    window: Duration::from_secs(1),
};
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pages requested per reclaim round. Any non-zero value makes the killer act.
const NR_TO_SCAN: u64 = 128;

fn load_config() -> Config {
    let provider = DirectoryConfigProvider {
        root: PathBuf::from("/"),
    };
    match provider.read_config() {
        Ok(Some(config)) => config,
        Ok(None) => Config::default(),
        Err(e) => {
            error!("Failed to load config, use the defaults: {:#}", e);
            Config::default()
        }
    }
}

fn sync_screen_state(killer: &LowMemoryKiller, display: &dyn DisplayStateProvider) {
    match display.get_screen_state() {
        Ok(state) if state != killer.screen_state() => {
            info!("Screen state changed to {:?}", state);
            match state {
                ScreenState::On => killer.resume(),
                ScreenState::Off => killer.suspend(),
            }
        }
        Ok(_) => {}
        Err(e) => warn!("Failed to get the screen state: {:#}", e),
    }
}

fn reclaim(killer: &LowMemoryKiller) {
    let now = Instant::now();
    let query = ShrinkControl {
        nr_to_scan: 0,
        gfp_mask: 0,
    };
    if killer.shrink(&query, now) == 0 {
        return;
    }
    let scan = ShrinkControl {
        nr_to_scan: NR_TO_SCAN,
        gfp_mask: 0,
    };
    killer.shrink(&scan, now);
}

async fn wait_memory_pressure(watcher: &mut Option<MemoryPressureWatcher>) -> io::Result<()> {
    match watcher {
        Some(watcher) => watcher.wait().await,
        None => std::future::pending().await,
    }
}

async fn service_main(killer: Arc<LowMemoryKiller>) -> Result<()> {
    let mut watcher = match MemoryPressureWatcher::new(PSI_TRIGGER) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("PSI is unavailable, poll every {:?}: {}", POLL_INTERVAL, e);
            None
        }
    };
    let display = BacklightDisplayState {
        root: Path::new("/"),
    };
    let mut interval = tokio::time::interval(POLL_INTERVAL);

    loop {
        let psi_error = tokio::select! {
            result = wait_memory_pressure(&mut watcher) => result.err(),
            _ = interval.tick() => None,
        };
        if let Some(e) = psi_error {
            error!("Failed to wait for memory pressure, fall back to polling: {}", e);
            watcher = None;
        }
        sync_screen_state(&killer, &display);
        reclaim(&killer);
    }
}

fn main() -> Result<()> {
    stderrlog::new()
        .module(module_path!())
        .verbosity(log::Level::Trace)
        .init()
        .context("Failed to initialize log")?;

    let config = load_config();
    // debug_level decides which diagnostics are emitted.
    log::set_max_level(max_level_filter(config.debug_level));

    info!("Starting {}", IDENT);

    let process_table = Arc::new(ProcfsProcessTable::new());
    let killer = Arc::new(LowMemoryKiller::new(
        &config,
        process_table.clone(),
        process_table,
        Arc::new(HostMemoryCounters::new()),
    ));

    let rt = Builder::new_current_thread().enable_all().build()?;
    rt.block_on(service_main(killer))
}
