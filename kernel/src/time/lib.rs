// Copyright 2024 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Handles the kernel's millisecond uptime counter and timed sleep.
//!
//! A hardware timer ticks once per millisecond, incrementing the
//! [uptime](millis) and counting down the delay of every sleeping
//! thread. Sleeping threads are not woken by the tick itself: the tick
//! only marks them runnable, and they run the next time the current
//! thread enters the scheduler. Sleep durations are therefore lower
//! bounds, accurate to within one tick plus however long the other
//! threads hold the CPU.
//!
//! The user must enable interrupts before any of the timing features
//! will make progress on the device.

#![no_std]

#[cfg(test)]
extern crate std;

mod ticker;

pub use crate::ticker::{millis, TICKS_PER_SECOND};

#[cfg(not(target_arch = "avr"))]
pub use crate::ticker::tick;

/// Initialises the tick source.
///
pub fn init() {
    ticker::init();
}

/// Sleeps the calling thread for `ms` milliseconds.
///
/// For durations beyond 65 seconds, use [`sleep_long`].
///
pub fn sleep(ms: u16) {
    if ms == 0 {
        // Nothing to count down; just give up the CPU once.
        thread::scheduler::switch();
        return;
    }

    thread::delay_current(ms);
}

/// Sleeps the calling thread for `ms` milliseconds, which may be up to
/// about 49 days.
///
/// The sleep is taken in chunks of at most 65535 ms; each chunk is a
/// full sleep, so other threads run throughout.
///
pub fn sleep_long(mut ms: u32) {
    while ms > 0 {
        let chunk = if ms > u16::MAX as u32 {
            u16::MAX
        } else {
            ms as u16
        };

        sleep(chunk);
        ms -= chunk as u32;
    }
}

/// Represents a single point in the kernel's millisecond clock.
///
/// An `Instant` is made useful by comparing it with another `Instant`,
/// bearing in mind that the clock wraps after about 49 days.
///
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Instant(u32);

impl Instant {
    /// Returns the instant's position in the clock, in milliseconds
    /// since the kernel started.
    ///
    pub const fn as_millis(self) -> u32 {
        self.0
    }
}

/// Returns an Instant representing the current time.
///
pub fn now() -> Instant {
    Instant(millis())
}

/// Returns the number of milliseconds that have passed since the given
/// `Instant`, assuming the clock has not wrapped more than once.
///
pub fn since(earlier: Instant) -> u32 {
    millis().wrapping_sub(earlier.0)
}
