// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use log::error;
use log::warn;

use crate::config::Config;
use crate::memory::selector::select_victims;
use crate::memory::selector::DeathPendingPolicy;
use crate::memory::selector::SelectParams;
use crate::memory::selector::Selection;
use crate::memory::switch::ScreenState;
use crate::memory::switch::ThresholdSwitch;
use crate::memory::threshold::ThresholdTable;
use crate::memory::threshold::TriggerMode;
use crate::memory::threshold::MAX_THRESHOLDS;
use crate::memory::MemoryCounters;
use crate::params;
use crate::params::autodetect_oom_adj;
use crate::params::format_array;
use crate::params::parse_array;
use crate::params::parse_value;
use crate::params::Param;
use crate::params::OOM_SCORE_ADJ_MAX;
use crate::proc::ProcessKiller;
use crate::proc::ProcessSource;

/// DEFAULT_SEEKS of the kernel shrinker interface.
pub const DEFAULT_SEEKS: u32 = 2;
/// Killing is far more expensive than dropping caches.
pub const DEFAULT_COST: u32 = DEFAULT_SEEKS * 16;

/// Arguments of a reclaim request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShrinkControl {
    /// 0 asks for the reclaimable count only.
    pub nr_to_scan: u64,
    /// Allocation flags of the request. Only logged.
    pub gfp_mask: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KillerStats {
    pub kills: u64,
    pub kill_failures: u64,
    /// Scans aborted because a previous victim was still dying.
    pub backoffs: u64,
}

fn to_reclaim_count(pages: i64) -> u64 {
    u64::try_from(pages).unwrap_or(0)
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// The reclaim policy. Shared by every thread under memory pressure.
pub struct LowMemoryKiller {
    switch: ThresholdSwitch,
    processes: Arc<dyn ProcessSource + Send + Sync>,
    killer: Arc<dyn ProcessKiller + Send + Sync>,
    counters: Arc<dyn MemoryCounters + Send + Sync>,
    depth: usize,
    death_pending_policy: DeathPendingPolicy,
    trigger_mode: TriggerMode,
    cooldown: Duration,
    epoch: Instant,
    // Nanoseconds since `epoch`. Until then a death-pending process holds back new kills. 0 means
    // nothing was killed yet.
    cooldown_deadline: AtomicU64,
    debug_level: AtomicU32,
    cost: AtomicU32,
    kills: AtomicU64,
    kill_failures: AtomicU64,
    backoffs: AtomicU64,
}

impl LowMemoryKiller {
    pub fn new(
        config: &Config,
        processes: Arc<dyn ProcessSource + Send + Sync>,
        killer: Arc<dyn ProcessKiller + Send + Sync>,
        counters: Arc<dyn MemoryCounters + Send + Sync>,
    ) -> Self {
        Self {
            switch: ThresholdSwitch::new(
                config.adj.clone(),
                config.minfree.clone(),
                config.minfree_screen_off.clone(),
            ),
            processes,
            killer,
            counters,
            depth: config.depth,
            death_pending_policy: config.death_pending_policy,
            trigger_mode: config.trigger_mode,
            cooldown: config.cooldown,
            epoch: Instant::now(),
            cooldown_deadline: AtomicU64::new(0),
            debug_level: AtomicU32::new(config.debug_level),
            cost: AtomicU32::new(config.cost),
            kills: AtomicU64::new(0),
            kill_failures: AtomicU64::new(0),
            backoffs: AtomicU64::new(0),
        }
    }

    fn nanos_since_epoch(&self, now: Instant) -> u64 {
        duration_to_nanos(now.saturating_duration_since(self.epoch))
    }

    fn is_cooling_down(&self, now: Instant) -> bool {
        let deadline = self.cooldown_deadline.load(Ordering::Acquire);
        deadline != 0 && self.nanos_since_epoch(now) <= deadline
    }

    fn extend_cooldown(&self, now: Instant) {
        let deadline = self
            .nanos_since_epoch(now)
            .saturating_add(duration_to_nanos(self.cooldown))
            .max(1);
        // Concurrent kills never shorten each other's deadline.
        self.cooldown_deadline.fetch_max(deadline, Ordering::AcqRel);
    }

    /// Handles a reclaim request and returns the estimate of reclaimable pages left.
    ///
    /// With `nr_to_scan == 0` it only reports the estimate. Otherwise, if the free memory is below
    /// a minfree threshold, it kills up to `depth` of the most killable processes above the
    /// threshold's cutoff.
    pub fn shrink(&self, sc: &ShrinkControl, now: Instant) -> u64 {
        let debug_level = self.debug_level();
        let counters = match self.counters.sample() {
            Ok(counters) => counters,
            Err(e) => {
                error!("Failed to sample memory counters: {}", e);
                return 0;
            }
        };
        let other_free = counters.other_free();
        let other_file = counters.other_file();
        let mut rem = counters.reclaimable();

        let threshold = self
            .switch
            .active()
            .select(other_free, other_file, self.trigger_mode);
        if sc.nr_to_scan > 0 {
            // Nothing is eligible above OOM_SCORE_ADJ_MAX.
            let min_score_adj = threshold.map_or(i32::from(OOM_SCORE_ADJ_MAX) + 1, |t| {
                i32::from(t.score_cutoff)
            });
            lowmem_print!(
                debug_level,
                3,
                "lowmem_shrink {}, {:x}, ofree {} {}, ma {}",
                sc.nr_to_scan,
                sc.gfp_mask,
                other_free,
                other_file,
                min_score_adj
            );
        }
        let threshold = match threshold {
            Some(threshold) if sc.nr_to_scan > 0 => threshold,
            _ => {
                lowmem_print!(
                    debug_level,
                    5,
                    "lowmem_shrink {}, {:x}, return {}",
                    sc.nr_to_scan,
                    sc.gfp_mask,
                    rem
                );
                return to_reclaim_count(rem);
            }
        };

        let params = SelectParams {
            score_cutoff: threshold.score_cutoff,
            depth: self.depth,
            cooldown_active: self.is_cooling_down(now),
            death_pending_policy: self.death_pending_policy,
            debug_level,
        };
        let victims = match select_victims(self.processes.processes(), &params) {
            Selection::Victims(victims) => victims,
            Selection::Backoff { pid, name } => {
                self.backoffs.fetch_add(1, Ordering::Relaxed);
                lowmem_print!(
                    debug_level,
                    5,
                    "{} ({}) is still dying, return {}",
                    pid,
                    name,
                    rem
                );
                return to_reclaim_count(rem);
            }
        };

        for victim in victims {
            lowmem_print!(
                debug_level,
                1,
                "send sigkill to {} ({}), adj {}, size {}, target_free {}",
                victim.pid,
                victim.name,
                victim.score,
                victim.size,
                threshold.target_free
            );
            self.extend_cooldown(now);
            if let Err(e) = self.killer.send_kill(victim.pid) {
                warn!("{:#}", e);
                self.kill_failures.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            self.killer.mark_death_pending(victim.pid);
            self.kills.fetch_add(1, Ordering::Relaxed);
            rem -= victim.size;
        }
        lowmem_print!(
            debug_level,
            4,
            "lowmem_shrink {}, {:x}, return {}",
            sc.nr_to_scan,
            sc.gfp_mask,
            rem
        );
        to_reclaim_count(rem)
    }

    /// The relative cost of a reclaim request, as registered with the shrinker interface.
    pub fn seeks(&self) -> u32 {
        self.cost.load(Ordering::Relaxed)
    }

    pub fn debug_level(&self) -> u32 {
        self.debug_level.load(Ordering::Relaxed)
    }

    pub fn suspend(&self) {
        self.switch.suspend();
    }

    pub fn resume(&self) {
        self.switch.resume();
    }

    pub fn screen_state(&self) -> ScreenState {
        self.switch.screen_state()
    }

    pub fn active_table(&self) -> Arc<ThresholdTable> {
        self.switch.active()
    }

    pub fn stats(&self) -> KillerStats {
        KillerStats {
            kills: self.kills.load(Ordering::Relaxed),
            kill_failures: self.kill_failures.load(Ordering::Relaxed),
            backoffs: self.backoffs.load(Ordering::Relaxed),
        }
    }

    pub fn get_param(&self, param: Param) -> String {
        match param {
            Param::Adj => format_array(&self.switch.adj()),
            Param::Minfree => format_array(&self.switch.minfree()),
            Param::MinfreeScreenOff => format_array(&self.switch.minfree_screen_off()),
            Param::DebugLevel => self.debug_level().to_string(),
            Param::Cost => self.seeks().to_string(),
        }
    }

    /// Parses and applies a parameter. On error the previous value is kept.
    pub fn set_param(&self, param: Param, value: &str) -> params::Result<()> {
        match param {
            Param::Adj => {
                let mut adj = parse_array::<i16>(value, MAX_THRESHOLDS)?;
                let legacy = adj.clone();
                if autodetect_oom_adj(&mut adj) {
                    lowmem_print!(
                        self.debug_level(),
                        1,
                        "convert oom_adj {:?} to oom_score_adj {:?}",
                        legacy,
                        adj
                    );
                }
                self.switch.set_adj(adj);
            }
            Param::Minfree => {
                let minfree = parse_array(value, MAX_THRESHOLDS)?;
                self.switch.set_minfree(minfree);
            }
            Param::MinfreeScreenOff => {
                let minfree = parse_array(value, MAX_THRESHOLDS)?;
                self.switch.set_minfree_screen_off(minfree);
            }
            Param::DebugLevel => {
                self.debug_level
                    .store(parse_value(value)?, Ordering::Relaxed);
            }
            Param::Cost => {
                self.cost.store(parse_value(value)?, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}
