// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

#[macro_use]
mod diagnostics;

mod common;
pub mod config;
pub mod display;
pub mod memory;
pub mod params;
pub mod proc;
pub mod psi;
mod sync;

#[cfg(test)]
mod test_utils;

pub use diagnostics::max_level_filter;
