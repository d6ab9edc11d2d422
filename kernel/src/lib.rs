// Copyright 2024 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Ember is a lightweight cooperative multitasking kernel for
//! ATmega328P-class AVR microcontrollers, supporting up to 8 threads.
//!
//! The kernel uses a round robin cooperative scheduler. Each thread
//! owns the processor until it yields back to the kernel, sleeps, or
//! suspends, at which point the other ready threads each get their
//! turn before the original thread is selected again. There are no
//! guarantees about how quickly a thread that yields will run again.
//!
//! Threads exist in one of four states — disabled, suspended, sleeping,
//! or active — described in the [`thread`] module documentation. Each
//! thread runs on its own statically placed stack (see [`memlayout`]),
//! but kernel functions and interrupt handlers both execute on the
//! stack of whichever thread is active when they run, so stacks must be
//! sized with interrupt depth in mind.
//!
//! On the device, kernel initialisation happens automatically before
//! `main` is called: the user program starts executing as thread 0.
//! The only user action necessary is to enable interrupts (see
//! [`cpu::interrupts::enable`]), as the kernel uses Timer0 to maintain
//! a millisecond counter and implement the sleep functions.
//!
//! To assist with debugging, the `stack-canary` feature (on by
//! default) places a canary value at the top of each thread's stack,
//! which the scheduler checks to detect overflow, and the
//! `kernel-assert` feature enables internal parameter checking. Both
//! report through hooks the user registers via [`debug`].
//!
//! On any non-AVR target the same kernel runs against a simulated
//! machine: call [`init`] to adopt the calling OS thread as thread 0
//! and [`tick`] to deliver timer interrupts. That is how the test
//! suite exercises the kernel.

#![no_std]

pub use thread::debug::{AssertionHook, OverflowHook};
pub use thread::{
    create_thread, current_thread, disable, disable_self, replace_self, resume, suspend,
    suspend_self, thread_enabled, thread_sleeping, thread_suspended, ThreadEntry, ThreadId,
};
pub use time::{millis, now, since, sleep, sleep_long, Instant};

#[cfg(not(target_arch = "avr"))]
pub use time::tick;

/// Yields execution to the scheduler. Returns when the scheduler
/// selects the calling thread for execution again.
///
pub fn yield_to_scheduler() {
    thread::scheduler::switch();
}

/// Debugging aids: fault hook registration and stack introspection.
///
pub mod debug {
    pub use thread::debug::{set_assertion_hook, set_stack_overflow_hook};

    #[cfg(feature = "stack-canary")]
    pub use thread::canary_location;

    #[cfg(not(target_arch = "avr"))]
    pub use thread::saved_stack_pointer;
}

/// Initialises the kernel on a hosted target, adopting the calling OS
/// thread as thread 0.
///
/// May be called repeatedly; each call resets the kernel to its boot
/// state. On the device there is no equivalent: initialisation runs
/// from the `.init8` section before `main`.
///
#[cfg(not(target_arch = "avr"))]
pub fn init() {
    thread::init();
    time::init();
}

#[cfg(target_arch = "avr")]
mod boot {
    use core::arch::global_asm;

    // Initialisation runs in the .init8 section, just before main is
    // called. The startup code has already set up a provisional stack
    // at RAMEND, so calling into Rust here is fine; thread 0's real
    // stack pointer is loaded last, after which nothing returns
    // through the provisional frames.
    global_asm!(
        r#"
        .section .init8,"ax",@progbits
        call __kernel_init
        lds r28, {stack0}
        lds r29, {stack0}+1
        out 0x3d, r28
        out 0x3e, r29
        "#,
        stack0 = sym STACK0_BASE
    );

    #[no_mangle]
    static STACK0_BASE: u16 = memlayout::STACK_BASES[0];

    #[no_mangle]
    extern "C" fn __kernel_init() {
        thread::init();
        time::init();
        // Idle sleep mode selected, sleep disabled, until the
        // scheduler needs to wait for a tick.
        cpu::avr::set_sleep_mode_idle();
    }
}
