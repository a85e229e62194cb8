// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;

use crate::common::read_file_to_trimmed_string;
use crate::common::read_file_to_u64;
use crate::diagnostics::DEFAULT_DEBUG_LEVEL;
use crate::memory::DeathPendingPolicy;
use crate::memory::TriggerMode;
use crate::memory::DEFAULT_ADJ;
use crate::memory::DEFAULT_COST;
use crate::memory::DEFAULT_MINFREE;
use crate::memory::ENHANCED_DEPTH;
use crate::memory::MAX_THRESHOLDS;
use crate::params;
use crate::params::Param;

pub const LOWMEMORYKILLER_CONFIG_PATH: &str = "run/lowmemorykiller/parameters/";

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(1);

pub trait ConfigProvider {
    fn read_config(&self) -> Result<Option<Config>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub adj: Vec<i16>,
    pub minfree: Vec<i64>,
    pub minfree_screen_off: Vec<i64>,
    pub debug_level: u32,
    pub cost: u32,
    /// The number of victims killed per scan.
    pub depth: usize,
    pub death_pending_policy: DeathPendingPolicy,
    pub trigger_mode: TriggerMode,
    /// How long after a kill a death-pending process suppresses new kills.
    pub cooldown: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adj: DEFAULT_ADJ.to_vec(),
            minfree: DEFAULT_MINFREE.to_vec(),
            minfree_screen_off: DEFAULT_MINFREE.to_vec(),
            debug_level: DEFAULT_DEBUG_LEVEL,
            cost: DEFAULT_COST,
            depth: ENHANCED_DEPTH,
            death_pending_policy: DeathPendingPolicy::default(),
            trigger_mode: TriggerMode::default(),
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

fn read_param<T>(
    dir: &Path,
    param: Param,
    parse: fn(&str) -> params::Result<T>,
) -> Result<Option<T>> {
    let path = dir.join(param.to_name());
    if !path.exists() {
        return Ok(None);
    }
    let value = read_file_to_trimmed_string(&path)?;
    let value = parse(&value).with_context(|| format!("Invalid {}", path.display()))?;
    Ok(Some(value))
}

fn read_policy<T>(dir: &Path, name: &str) -> Result<Option<T>>
where
    T: FromStr<Err = anyhow::Error>,
{
    let path = dir.join(name);
    if !path.exists() {
        return Ok(None);
    }
    let value = read_file_to_trimmed_string(&path)?;
    let value = value
        .parse::<T>()
        .with_context(|| format!("Invalid {}", path.display()))?;
    Ok(Some(value))
}

fn read_u64(dir: &Path, name: &str) -> Result<Option<u64>> {
    let path = dir.join(name);
    if !path.exists() {
        return Ok(None);
    }
    read_file_to_u64(&path)
        .with_context(|| format!("Error reading {}", path.display()))
        .map(Some)
}

/* Expects to find a directory tree as follows:
 * * {root}/run/lowmemorykiller/parameters/
 *   * adj                  "0,58,117,176,529,1000"
 *   * minfree              "1536,2048,4096,5120,8192,16384"
 *   * minfree_screen_off   "1536,2048,4096,5120,8192,16384"
 *   * debug_level          "1"
 *   * cost                 "32"
 *   * depth                "3"
 *   * death_pending_policy "abort" or "skip"
 *   * trigger_mode         "free_and_file" or "file_only"
 *   * cooldown_ms          "1000"
 * Every file is optional.
 */
#[derive(Debug)]
pub struct DirectoryConfigProvider {
    pub root: PathBuf,
}

impl ConfigProvider for DirectoryConfigProvider {
    fn read_config(&self) -> Result<Option<Config>> {
        let dir = self.root.join(LOWMEMORYKILLER_CONFIG_PATH);
        if !dir.exists() {
            return Ok(None);
        }

        let mut config = Config::default();
        if let Some(adj) =
            read_param(&dir, Param::Adj, |v| params::parse_array(v, MAX_THRESHOLDS))?
        {
            config.adj = adj;
        }
        if let Some(minfree) =
            read_param(&dir, Param::Minfree, |v| params::parse_array(v, MAX_THRESHOLDS))?
        {
            config.minfree = minfree;
        }
        if let Some(minfree) = read_param(&dir, Param::MinfreeScreenOff, |v| {
            params::parse_array(v, MAX_THRESHOLDS)
        })? {
            config.minfree_screen_off = minfree;
        }
        if let Some(debug_level) = read_param(&dir, Param::DebugLevel, params::parse_value)? {
            config.debug_level = debug_level;
        }
        if let Some(cost) = read_param(&dir, Param::Cost, params::parse_value)? {
            config.cost = cost;
        }
        if let Some(depth) = read_u64(&dir, "depth")? {
            config.depth = usize::try_from(depth).context("depth is too large")?;
        }
        if let Some(policy) = read_policy(&dir, "death_pending_policy")? {
            config.death_pending_policy = policy;
        }
        if let Some(mode) = read_policy(&dir, "trigger_mode")? {
            config.trigger_mode = mode;
        }
        if let Some(cooldown_ms) = read_u64(&dir, "cooldown_ms")? {
            config.cooldown = Duration::from_millis(cooldown_ms);
        }
        Ok(Some(config))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write_parameter(root: &Path, name: &str, value: &str) {
        let dir = root.join(LOWMEMORYKILLER_CONFIG_PATH);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), value).unwrap();
    }

    #[test]
    fn test_missing_config_directory() {
        let root = TempDir::new().unwrap();
        let provider = DirectoryConfigProvider {
            root: root.path().to_path_buf(),
        };
        assert_eq!(provider.read_config().unwrap(), None);
    }

    #[test]
    fn test_empty_config_directory() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join(LOWMEMORYKILLER_CONFIG_PATH)).unwrap();
        let provider = DirectoryConfigProvider {
            root: root.path().to_path_buf(),
        };
        assert_eq!(provider.read_config().unwrap(), Some(Config::default()));
    }

    #[test]
    fn test_read_config() {
        let root = TempDir::new().unwrap();
        write_parameter(root.path(), "adj", "0,100,200,300,900,1000\n");
        write_parameter(root.path(), "minfree", "1024,2048\n");
        write_parameter(root.path(), "minfree_screen_off", "4096,8192\n");
        write_parameter(root.path(), "debug_level", "5\n");
        write_parameter(root.path(), "cost", "64\n");
        write_parameter(root.path(), "depth", "1\n");
        write_parameter(root.path(), "death_pending_policy", "skip\n");
        write_parameter(root.path(), "trigger_mode", "file_only\n");
        write_parameter(root.path(), "cooldown_ms", "250\n");
        let provider = DirectoryConfigProvider {
            root: root.path().to_path_buf(),
        };

        assert_eq!(
            provider.read_config().unwrap(),
            Some(Config {
                adj: vec![0, 100, 200, 300, 900, 1000],
                minfree: vec![1024, 2048],
                minfree_screen_off: vec![4096, 8192],
                debug_level: 5,
                cost: 64,
                depth: 1,
                death_pending_policy: DeathPendingPolicy::SkipProcess,
                trigger_mode: TriggerMode::FileOnly,
                cooldown: Duration::from_millis(250),
            })
        );
    }

    #[test]
    fn test_read_config_partial() {
        let root = TempDir::new().unwrap();
        write_parameter(root.path(), "minfree", "1024");
        let provider = DirectoryConfigProvider {
            root: root.path().to_path_buf(),
        };
        let config = provider.read_config().unwrap().unwrap();
        assert_eq!(config.minfree, vec![1024]);
        assert_eq!(config.adj, DEFAULT_ADJ.to_vec());
        assert_eq!(config.cooldown, DEFAULT_COOLDOWN);
    }

    #[test]
    fn test_read_config_malformed() {
        for (name, value) in [
            ("adj", "0,abc"),
            ("minfree", "1,2,3,4,5,6,7"),
            ("minfree_screen_off", ""),
            ("debug_level", "-1"),
            ("depth", "three"),
            ("death_pending_policy", "ignore"),
            ("trigger_mode", "free_only"),
            ("cooldown_ms", "1s"),
        ] {
            let root = TempDir::new().unwrap();
            write_parameter(root.path(), name, value);
            let provider = DirectoryConfigProvider {
                root: root.path().to_path_buf(),
            };
            assert!(provider.read_config().is_err(), "{} = {:?}", name, value);
        }
    }
}
