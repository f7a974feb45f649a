// Part of cia402-rs. Copyright 2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

use std::thread;
use std::time::Duration;

/// Poll a condition until it holds, for at most a second.
pub fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!("timed out waiting for {}", what);
}
