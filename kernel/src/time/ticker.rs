// Copyright 2024 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Handles the kernel's internal millisecond ticker.
//!
//! On the device the tick comes from Timer0 in CTC mode: with a 16 MHz
//! clock, a /64 prescaler and an output compare of 249, the compare
//! interrupt fires exactly [`TICKS_PER_SECOND`] times per second. On a
//! host the handler is registered with the simulated machine instead
//! and fired explicitly, either by a test or by the scheduler's idle
//! wait.
//!
//! The handler does no rescheduling: it only advances the uptime and
//! the sleep bookkeeping. A thread woken by the tick runs the next time
//! the current thread enters the scheduler.

use core::cell::Cell;
use critical_section::Mutex;

/// The number of ticks per second.
///
pub const TICKS_PER_SECOND: u32 = 1000;

/// The system uptime, in milliseconds. Shared with the tick interrupt.
///
static UPTIME: Mutex<Cell<u32>> = Mutex::new(Cell::new(0));

/// Returns a snapshot of the system uptime, in milliseconds. Wraps
/// after about 49 days.
///
pub fn millis() -> u32 {
    critical_section::with(|cs| UPTIME.borrow(cs).get())
}

/// The tick interrupt: advances the uptime and counts down sleeping
/// threads.
///
fn handle_tick() {
    critical_section::with(|cs| {
        let uptime = UPTIME.borrow(cs);
        uptime.set(uptime.get().wrapping_add(1));
        thread::clock_tick(cs);
    });
}

/// Starts the tick source and resets the uptime.
///
pub(crate) fn init() {
    #[cfg(target_arch = "avr")]
    hw::init_timer0();

    #[cfg(not(target_arch = "avr"))]
    cpu::interrupts::register_timer(handle_tick);

    critical_section::with(|cs| UPTIME.borrow(cs).set(0));
}

/// Fires the simulated timer interrupt: one call is one millisecond.
///
#[cfg(not(target_arch = "avr"))]
pub fn tick() {
    handle_tick();
}

#[cfg(target_arch = "avr")]
mod hw {
    use cpu::avr::{Reg, Tccr0a, Tccr0b, Timsk0, OCR0A, TCCR0A, TCCR0B, TIMSK0};

    const PRESCALE: u32 = 64;

    /// Output compare value for one tick per millisecond: counts
    /// 0..=COMPARE at F_CPU/PRESCALE.
    ///
    const COMPARE: u8 = (cpu::F_CPU_HZ / PRESCALE / super::TICKS_PER_SECOND - 1) as u8;

    const _: () = assert!(cpu::F_CPU_HZ / PRESCALE / super::TICKS_PER_SECOND - 1 <= 0xff);
    const _: () = assert!(COMPARE == 249);

    /// Puts Timer0 in CTC mode at one compare-match interrupt per
    /// millisecond.
    ///
    pub(super) fn init_timer0() {
        unsafe {
            Reg::new(TCCR0A).write(Tccr0a::WGM01.bits());
            Reg::new(OCR0A).write(COMPARE);
            Reg::new(TCCR0B).write((Tccr0b::CS01 | Tccr0b::CS00).bits());
            Reg::new(TIMSK0).write(Timsk0::OCIE0A.bits());
        }
    }

    /// The Timer0 compare-match A interrupt.
    ///
    #[no_mangle]
    pub unsafe extern "avr-interrupt" fn __vector_14() {
        super::handle_tick();
    }
}
