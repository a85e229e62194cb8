// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Text format of the tunable parameters.
//!
//! Arrays are comma separated integers with an optional trailing newline, e.g. "0,58,352\n".

use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error as ThisError;

/// The maximum legacy oom_adj value.
pub const OOM_ADJUST_MAX: i16 = 15;
/// The legacy oom_adj value which disables the OOM killer for a process.
pub const OOM_DISABLE: i16 = -17;
pub const OOM_SCORE_ADJ_MAX: i16 = 1000;

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum Error {
    #[error("unknown parameter: {0}")]
    UnknownParam(String),
    #[error("empty value")]
    Empty,
    #[error("too many values, at most {max} are accepted")]
    TooMany { max: usize },
    #[error("invalid value: {0:?}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Param {
    Adj,
    Minfree,
    MinfreeScreenOff,
    DebugLevel,
    Cost,
}

impl Param {
    pub const ALL: [Param; 5] = [
        Param::Adj,
        Param::Minfree,
        Param::MinfreeScreenOff,
        Param::DebugLevel,
        Param::Cost,
    ];

    pub fn to_name(self) -> &'static str {
        match self {
            Param::Adj => "adj",
            Param::Minfree => "minfree",
            Param::MinfreeScreenOff => "minfree_screen_off",
            Param::DebugLevel => "debug_level",
            Param::Cost => "cost",
        }
    }
}

impl FromStr for Param {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Param::ALL
            .into_iter()
            .find(|param| param.to_name() == s)
            .ok_or_else(|| Error::UnknownParam(s.to_string()))
    }
}

fn strip_newline(value: &str) -> &str {
    value.strip_suffix('\n').unwrap_or(value)
}

/// Parses a comma separated array of at most `max` elements.
pub fn parse_array<T: FromStr>(value: &str, max: usize) -> Result<Vec<T>> {
    let value = strip_newline(value);
    if value.is_empty() {
        return Err(Error::Empty);
    }
    let values = value
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|_| Error::Invalid(v.to_string()))
        })
        .collect::<Result<Vec<T>>>()?;
    if values.len() > max {
        return Err(Error::TooMany { max });
    }
    Ok(values)
}

pub fn parse_value<T: FromStr>(value: &str) -> Result<T> {
    let value = strip_newline(value).trim();
    if value.is_empty() {
        return Err(Error::Empty);
    }
    value
        .parse::<T>()
        .map_err(|_| Error::Invalid(value.to_string()))
}

pub fn format_array<T: Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Converts a legacy oom_adj (-17 to 15) to oom_score_adj (-1000 to 1000).
pub fn oom_adj_to_oom_score_adj(adj: i16) -> i16 {
    if adj == OOM_ADJUST_MAX {
        return OOM_SCORE_ADJ_MAX;
    }
    let score = i32::from(adj) * i32::from(OOM_SCORE_ADJ_MAX) / -i32::from(OOM_DISABLE);
    score.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

/// Converts `adj` in place if it looks like a legacy oom_adj array. Returns true if converted.
///
/// The array is considered legacy when its last (largest) entry is within the oom_adj range and
/// scaling it actually changes the range, so an all-zero array is left untouched.
pub fn autodetect_oom_adj(adj: &mut [i16]) -> bool {
    let Some(&last) = adj.last() else {
        return false;
    };
    if last > OOM_ADJUST_MAX || oom_adj_to_oom_score_adj(last) <= OOM_ADJUST_MAX {
        return false;
    }
    for value in adj.iter_mut() {
        *value = oom_adj_to_oom_score_adj(*value);
    }
    true
}
