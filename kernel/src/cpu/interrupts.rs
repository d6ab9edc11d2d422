// Copyright 2024 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Controls the global interrupt flag and the delivery of the timer
//! interrupt.
//!
//! The kernel never enables interrupts behind the user's back: the user
//! program decides when the machine is ready by calling [`enable`], just
//! as it would execute `sei` itself. The single exception is the
//! scheduler's idle wait, which must sleep with interrupts enabled to be
//! woken by the tick.
//!
//! On a host there is no interrupt controller. The timer handler is
//! registered here by the time subsystem and invoked either by a test
//! (one call per simulated millisecond) or by the idle wait.

/// Enables interrupts globally.
///
#[cfg(target_arch = "avr")]
pub fn enable() {
    unsafe { core::arch::asm!("sei", options(nomem, nostack)) };
}

/// Disables interrupts globally.
///
#[cfg(target_arch = "avr")]
pub fn disable() {
    unsafe { core::arch::asm!("cli", options(nomem, nostack)) };
}

/// Enables interrupts globally.
///
/// The simulated machine has no interrupt flag, so this does
/// nothing; ticks are delivered explicitly.
///
#[cfg(not(target_arch = "avr"))]
pub fn enable() {}

/// Disables interrupts globally.
///
#[cfg(not(target_arch = "avr"))]
pub fn disable() {}

/// The registered timer interrupt handler.
///
#[cfg(not(target_arch = "avr"))]
static TIMER_HANDLER: spin::Mutex<Option<fn()>> = spin::Mutex::new(None);

/// Registers `handler` as the simulated timer interrupt.
///
#[cfg(not(target_arch = "avr"))]
pub fn register_timer(handler: fn()) {
    *TIMER_HANDLER.lock() = Some(handler);
}

/// Delivers one simulated timer interrupt.
///
/// Does nothing if no handler has been registered.
///
#[cfg(not(target_arch = "avr"))]
pub fn fire_timer() {
    let handler = *TIMER_HANDLER.lock();
    if let Some(handler) = handler {
        handler();
    }
}
