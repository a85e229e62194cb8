// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use glob::glob;

use crate::common::read_file_to_u64;
pub use crate::memory::ScreenState;

/// Glob of the backlight power files relative to the root.
const BACKLIGHT_POWER_GLOB: &str = "sys/class/backlight/*/bl_power";

// FB_BLANK_UNBLANK in include/uapi/linux/fb.h.
const FB_BLANK_UNBLANK: u64 = 0;

pub trait DisplayStateProvider {
    fn get_screen_state(&self) -> Result<ScreenState>;
}

#[derive(Debug)]
pub struct BacklightDisplayState<'a> {
    pub root: &'a Path,
}

impl<'a> DisplayStateProvider for BacklightDisplayState<'a> {
    /// The screen is on if any backlight is unblanked. Devices without a backlight are treated as
    /// always on.
    fn get_screen_state(&self) -> Result<ScreenState> {
        let pattern = self
            .root
            .join(BACKLIGHT_POWER_GLOB)
            .to_str()
            .context("Failed to construct backlight pattern")?
            .to_owned();

        let mut found = false;
        for bl_power in glob(&pattern)? {
            let bl_power = bl_power?;
            let value = read_file_to_u64(&bl_power)
                .with_context(|| format!("Error reading {}", bl_power.display()))?;
            if value == FB_BLANK_UNBLANK {
                return Ok(ScreenState::On);
            }
            found = true;
        }

        Ok(if found {
            ScreenState::Off
        } else {
            ScreenState::On
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write_bl_power(root: &Path, device: &str, value: &str) {
        let dir = root.join("sys/class/backlight").join(device);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("bl_power"), value).unwrap();
    }

    #[test]
    fn test_no_backlight() {
        let root = TempDir::new().unwrap();
        let provider = BacklightDisplayState { root: root.path() };
        assert_eq!(provider.get_screen_state().unwrap(), ScreenState::On);
    }

    #[test]
    fn test_backlight_on_and_off() {
        let root = TempDir::new().unwrap();
        let provider = BacklightDisplayState { root: root.path() };

        write_bl_power(root.path(), "intel_backlight", "4\n");
        assert_eq!(provider.get_screen_state().unwrap(), ScreenState::Off);

        write_bl_power(root.path(), "intel_backlight", "0\n");
        assert_eq!(provider.get_screen_state().unwrap(), ScreenState::On);
    }

    #[test]
    fn test_any_unblanked_backlight() {
        let root = TempDir::new().unwrap();
        let provider = BacklightDisplayState { root: root.path() };
        write_bl_power(root.path(), "backlight_a", "4\n");
        write_bl_power(root.path(), "backlight_b", "0\n");
        assert_eq!(provider.get_screen_state().unwrap(), ScreenState::On);
    }

    #[test]
    fn test_invalid_bl_power() {
        let root = TempDir::new().unwrap();
        let provider = BacklightDisplayState { root: root.path() };
        write_bl_power(root.path(), "intel_backlight", "blank\n");
        assert!(provider.get_screen_state().is_err());
    }
}
