// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

/// The daemon is compiled to abort on panic, so locks can never be poisoned.
/// These helpers discard the LockResult without unwrap()/expect() at every
/// call site.
pub trait NoPoison<T: ?Sized> {
    fn do_lock(&self) -> MutexGuard<T>;
}

impl<T: ?Sized> NoPoison<T> for Mutex<T> {
    fn do_lock(&self) -> MutexGuard<T> {
        match self.lock() {
            Ok(guard) => guard,
            Err(_) => unreachable!("lowmemorykiller aborts on panic"),
        }
    }
}

pub trait NoPoisonRw<T: ?Sized> {
    fn do_read(&self) -> RwLockReadGuard<T>;
    fn do_write(&self) -> RwLockWriteGuard<T>;
}

impl<T: ?Sized> NoPoisonRw<T> for RwLock<T> {
    fn do_read(&self) -> RwLockReadGuard<T> {
        match self.read() {
            Ok(guard) => guard,
            Err(_) => unreachable!("lowmemorykiller aborts on panic"),
        }
    }

    fn do_write(&self) -> RwLockWriteGuard<T> {
        match self.write() {
            Ok(guard) => guard,
            Err(_) => unreachable!("lowmemorykiller aborts on panic"),
        }
    }
}
