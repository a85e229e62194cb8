// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;

use crate::memory::threshold::ThresholdTable;
use crate::memory::threshold::DEFAULT_ADJ;
use crate::memory::threshold::DEFAULT_MINFREE;
use crate::sync::NoPoison;
use crate::sync::NoPoisonRw;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScreenState {
    #[default]
    On,
    Off,
}

struct SwitchState {
    adj: Vec<i16>,
    /// The minfree of the screen-on state. While the screen is off it holds the table saved at
    /// suspend, which is restored on resume.
    screen_on_minfree: Vec<i64>,
    screen_off_minfree: Vec<i64>,
    screen: ScreenState,
}

impl SwitchState {
    fn build_active(&self) -> ThresholdTable {
        let minfree = match self.screen {
            ScreenState::On => &self.screen_on_minfree,
            ScreenState::Off => &self.screen_off_minfree,
        };
        ThresholdTable::new(&self.adj, minfree)
    }
}

/// Owns the screen-on and screen-off minfree tables and publishes the active one.
///
/// Writers serialize on `state`. Readers on the reclaim path only clone the published
/// `Arc<ThresholdTable>`, so they never wait for a writer longer than the swap itself.
pub struct ThresholdSwitch {
    state: Mutex<SwitchState>,
    active: RwLock<Arc<ThresholdTable>>,
}

impl Default for ThresholdSwitch {
    fn default() -> Self {
        Self::new(
            DEFAULT_ADJ.to_vec(),
            DEFAULT_MINFREE.to_vec(),
            DEFAULT_MINFREE.to_vec(),
        )
    }
}

impl ThresholdSwitch {
    /// Creates a switch in the screen-on state.
    pub fn new(adj: Vec<i16>, minfree: Vec<i64>, minfree_screen_off: Vec<i64>) -> Self {
        let state = SwitchState {
            adj,
            screen_on_minfree: minfree,
            screen_off_minfree: minfree_screen_off,
            screen: ScreenState::On,
        };
        let active = RwLock::new(Arc::new(state.build_active()));
        Self {
            state: Mutex::new(state),
            active,
        }
    }

    /// Returns the table currently in effect.
    pub fn active(&self) -> Arc<ThresholdTable> {
        self.active.do_read().clone()
    }

    pub fn screen_state(&self) -> ScreenState {
        self.state.do_lock().screen
    }

    /// Switches to the screen-off minfree. The screen-on minfree is kept for [Self::resume].
    /// Suspending again while already suspended re-publishes the same table.
    pub fn suspend(&self) {
        let mut state = self.state.do_lock();
        state.screen = ScreenState::Off;
        self.publish(&state);
    }

    /// Restores the minfree saved at suspend.
    pub fn resume(&self) {
        let mut state = self.state.do_lock();
        state.screen = ScreenState::On;
        self.publish(&state);
    }

    pub fn adj(&self) -> Vec<i16> {
        self.state.do_lock().adj.clone()
    }

    /// Replaces the adj of both the screen-on and screen-off tables.
    pub fn set_adj(&self, adj: Vec<i16>) {
        let mut state = self.state.do_lock();
        state.adj = adj;
        self.publish(&state);
    }

    pub fn minfree(&self) -> Vec<i64> {
        self.state.do_lock().screen_on_minfree.clone()
    }

    /// Replaces the screen-on minfree. While the screen is off it takes effect on resume.
    pub fn set_minfree(&self, minfree: Vec<i64>) {
        let mut state = self.state.do_lock();
        state.screen_on_minfree = minfree;
        if state.screen == ScreenState::On {
            self.publish(&state);
        }
    }

    pub fn minfree_screen_off(&self) -> Vec<i64> {
        self.state.do_lock().screen_off_minfree.clone()
    }

    /// Replaces the screen-off minfree. While the screen is on it takes effect on suspend.
    pub fn set_minfree_screen_off(&self, minfree: Vec<i64>) {
        let mut state = self.state.do_lock();
        state.screen_off_minfree = minfree;
        if state.screen == ScreenState::Off {
            self.publish(&state);
        }
    }

    fn publish(&self, state: &SwitchState) {
        let table = Arc::new(state.build_active());
        *self.active.do_write() = table;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minfree_of(table: &ThresholdTable) -> Vec<i64> {
        table.entries().iter().map(|e| e.min_free).collect()
    }

    fn test_switch() -> ThresholdSwitch {
        ThresholdSwitch::new(vec![0, 6], vec![1024, 4096], vec![2048, 8192])
    }

    #[test]
    fn test_default_tables() {
        let switch = ThresholdSwitch::default();
        assert_eq!(switch.screen_state(), ScreenState::On);
        assert_eq!(switch.adj(), DEFAULT_ADJ.to_vec());
        assert_eq!(minfree_of(&switch.active()), DEFAULT_MINFREE.to_vec());
        assert_eq!(switch.minfree_screen_off(), DEFAULT_MINFREE.to_vec());
    }

    #[test]
    fn test_suspend_resume() {
        let switch = test_switch();
        let screen_on = switch.active();

        switch.suspend();
        assert_eq!(switch.screen_state(), ScreenState::Off);
        assert_eq!(minfree_of(&switch.active()), vec![2048, 8192]);

        switch.resume();
        assert_eq!(switch.screen_state(), ScreenState::On);
        assert_eq!(*switch.active(), *screen_on);
    }

    #[test]
    fn test_repeated_suspend_keeps_screen_on_table() {
        let switch = test_switch();
        switch.suspend();
        switch.suspend();
        switch.resume();
        assert_eq!(minfree_of(&switch.active()), vec![1024, 4096]);
        switch.resume();
        assert_eq!(minfree_of(&switch.active()), vec![1024, 4096]);
    }

    #[test]
    fn test_set_minfree_while_suspended() {
        let switch = test_switch();
        switch.suspend();
        switch.set_minfree(vec![512, 1024]);
        // The screen-off table stays in effect until resume.
        assert_eq!(minfree_of(&switch.active()), vec![2048, 8192]);
        switch.resume();
        assert_eq!(minfree_of(&switch.active()), vec![512, 1024]);
    }

    #[test]
    fn test_set_minfree_screen_off() {
        let switch = test_switch();
        switch.set_minfree_screen_off(vec![4096]);
        assert_eq!(minfree_of(&switch.active()), vec![1024, 4096]);
        switch.suspend();
        assert_eq!(minfree_of(&switch.active()), vec![4096]);
        switch.set_minfree_screen_off(vec![100, 200]);
        assert_eq!(minfree_of(&switch.active()), vec![100, 200]);
    }

    #[test]
    fn test_set_adj_applies_to_both_states() {
        let switch = test_switch();
        switch.set_adj(vec![100, 200]);
        let cutoffs = |table: &ThresholdTable| -> Vec<i16> {
            table.entries().iter().map(|e| e.score_cutoff).collect()
        };
        assert_eq!(cutoffs(&switch.active()), vec![100, 200]);
        switch.suspend();
        assert_eq!(cutoffs(&switch.active()), vec![100, 200]);
    }

    #[test]
    fn test_readers_keep_old_snapshot() {
        let switch = test_switch();
        let before = switch.active();
        switch.set_minfree(vec![1]);
        assert_eq!(minfree_of(&before), vec![1024, 4096]);
        assert_eq!(minfree_of(&switch.active()), vec![1]);
    }
}
