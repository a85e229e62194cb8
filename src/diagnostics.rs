// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Leveled diagnostics for the reclaim path.
//!
//! The killer has its own verbosity knob (`debug_level`, 0 to 5) which is
//! independent from the log filter. A record at tier N is emitted only when
//! `debug_level >= N`. Tiers map onto [log::Level] so that the daemon can
//! filter them further:
//!
//! * 1: kills (info)
//! * 2: victim selection (info)
//! * 3: pressure samples on real scans (debug)
//! * 4: scan results (debug)
//! * 5: queries, no-op scans and cooldown bail-outs (trace)

use log::Level;
use log::LevelFilter;

pub const DEFAULT_DEBUG_LEVEL: u32 = 1;
pub const MAX_DEBUG_LEVEL: u32 = 5;

/// Emits a diagnostic record at tier `$level` if `$debug_level` allows it.
macro_rules! lowmem_print {
    ($debug_level:expr, $level:expr, $($arg:tt)+) => {
        if $debug_level >= $level {
            log::log!($crate::diagnostics::record_level($level), $($arg)+);
        }
    };
}

pub fn record_level(tier: u32) -> Level {
    match tier {
        0..=2 => Level::Info,
        3 | 4 => Level::Debug,
        _ => Level::Trace,
    }
}

/// Returns the log filter which lets every enabled tier of `debug_level` through.
pub fn max_level_filter(debug_level: u32) -> LevelFilter {
    match debug_level.min(MAX_DEBUG_LEVEL) {
        0..=2 => LevelFilter::Info,
        3 | 4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}
