// Copyright 2024 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides the architecture layer beneath the kernel.
//!
//! Everything the kernel needs from the machine goes through this crate:
//! interrupt control and critical sections, the idle instruction, and
//! memory-mapped register access. Two configurations exist:
//!
//! - On AVR (`target_arch = "avr"`) the crate talks to the real hardware:
//!   critical sections save `SREG` and clear the interrupt flag, idling
//!   executes the `sleep` instruction, and registers are reached through
//!   volatile MMIO accesses.
//! - Everywhere else the crate provides a simulated machine for tests:
//!   critical sections come from the `critical-section` crate's std
//!   implementation, the "timer interrupt" is a registered handler that
//!   tests (and the idle loop) invoke explicitly, and the [`sim`] module
//!   carries each simulated thread on a parked host thread.

#![cfg_attr(target_arch = "avr", no_std)]

pub mod interrupts;

#[cfg(target_arch = "avr")]
pub mod avr;
#[cfg(not(target_arch = "avr"))]
pub mod sim;

/// The CPU clock frequency, in Hz.
///
/// The board runs from a 16 MHz crystal; the timer divisor for the
/// millisecond tick is derived from this value.
///
pub const F_CPU_HZ: u32 = 16_000_000;

/// Waits for an interrupt to arrive, with interrupts enabled.
///
/// The scheduler calls this when no slot is runnable: the next timer
/// tick is the only event that can make one runnable again. On the
/// device this executes the `sleep` instruction in idle mode; on a host
/// it delivers one simulated timer interrupt so that time always
/// advances while the kernel idles.
///
#[cfg(target_arch = "avr")]
pub fn idle_wait() {
    avr::sleep_enable();
    unsafe { core::arch::asm!("sei", "sleep") };
    avr::sleep_disable();
}

#[cfg(not(target_arch = "avr"))]
pub fn idle_wait() {
    interrupts::fire_timer();
}
