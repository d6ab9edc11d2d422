// Copyright 2024 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements cooperative multitasking over a fixed set of thread slots.
//!
//! The kernel supports up to [`MAX_THREADS`](memlayout::MAX_THREADS)
//! threads, each bound to a statically numbered slot with a statically
//! placed stack. Threads share the CPU by yielding explicitly; there is
//! no preemption. A slot is in exactly one of four states:
//!
//! - **Disabled**: the slot holds no valid context. It will not run
//!   until a new thread is created in its place. At start-up only slot 0
//!   (the thread that enters `main`) is enabled.
//! - **Suspended**: the slot holds a valid context but is skipped by the
//!   scheduler until another thread (or an interrupt handler) resumes it.
//! - **Sleeping**: the slot is waiting for its delay counter to be
//!   counted down by the timer tick, after which it becomes runnable
//!   again automatically.
//! - **Active**: none of the above; the scheduler will run it in its
//!   round-robin turn.
//!
//! ## Manipulating threads
//!
//! A thread is placed in a slot with [`create_thread`], which builds a
//! fresh stack image so that the scheduler can enter the thread by
//! "returning" into its bootstrap. A running thread may hand its own
//! slot to a new thread with [`replace_self`], stop itself for good with
//! [`disable_self`], or pause itself with [`suspend_self`]. All of the
//! state-changing operations have by-id forms targeting other slots.
//!
//! Thread entry points receive their own slot id and the opaque argument
//! passed at creation, and must never return: the bootstrap return
//! address is not meaningful.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod debug;
pub mod scheduler;
mod stacks;
mod switch;

use bitmask::ThreadMask;
use core::cell::{Cell, UnsafeCell};
use core::ffi::c_void;
use critical_section::{CriticalSection, Mutex};
use memlayout::MAX_THREADS;

#[cfg(feature = "stack-canary")]
pub use crate::stacks::canary_location;

/// The function type for thread entry points.
///
/// The thread receives its own id and the argument passed to
/// [`create_thread`]. Entry points must loop (or replace/disable
/// themselves) forever; returning is undefined behaviour.
///
pub type ThreadEntry = extern "C" fn(ThreadId, *mut c_void) -> !;

/// Identifies one of the kernel's thread slots.
///
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct ThreadId(u8);

impl ThreadId {
    pub const THREAD0: ThreadId = ThreadId(0);
    pub const THREAD1: ThreadId = ThreadId(1);
    pub const THREAD2: ThreadId = ThreadId(2);
    pub const THREAD3: ThreadId = ThreadId(3);
    pub const THREAD4: ThreadId = ThreadId(4);
    pub const THREAD5: ThreadId = ThreadId(5);
    pub const THREAD6: ThreadId = ThreadId(6);
    pub const THREAD7: ThreadId = ThreadId(7);

    /// Returns the id for the given slot number.
    ///
    /// Ids at or above the configured thread count are constructible
    /// but name no slot: mutators ignore them and queries report false.
    ///
    pub const fn new(id: u8) -> ThreadId {
        ThreadId(id)
    }

    /// Returns a numerical representation for the thread id.
    ///
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }

    fn in_range(self) -> bool {
        (self.0 as usize) < MAX_THREADS
    }

    /// Resumes the referenced thread.
    ///
    pub fn resume(self) {
        resume(self);
    }

    /// Suspends the referenced thread.
    ///
    pub fn suspend(self) {
        suspend(self);
    }

    /// Disables the referenced thread.
    ///
    pub fn disable(self) {
        disable(self);
    }

    /// Returns whether the referenced thread is enabled.
    ///
    pub fn enabled(self) -> bool {
        thread_enabled(self)
    }
}

/// The scheduler-owned portion of the thread state.
///
/// Only the running thread mutates this (the tick handler touches the
/// delayed state, which lives separately), but every access still goes
/// through a critical section so the cells are sound to share.
///
#[derive(Clone, Copy)]
struct Masks {
    /// The currently executing slot.
    current: ThreadId,

    /// Cached single-bit mask of `current`.
    current_mask: ThreadMask,

    /// Slots holding no valid context.
    disabled: ThreadMask,

    /// Slots withheld from scheduling until resumed.
    suspended: ThreadMask,
}

impl Masks {
    const fn initial() -> Masks {
        Masks {
            current: ThreadId::THREAD0,
            current_mask: ThreadMask::bit(0),
            disabled: ThreadMask::from_bits(
                ThreadMask::below(MAX_THREADS as u8).bits() & !ThreadMask::bit(0).bits(),
            ),
            suspended: ThreadMask::EMPTY,
        }
    }
}

static MASKS: Mutex<Cell<Masks>> = Mutex::new(Cell::new(Masks::initial()));

/// Slots waiting for their delay counter to expire. Shared with the
/// timer tick, which clears bits as counters reach zero.
///
static DELAYED: Mutex<Cell<ThreadMask>> = Mutex::new(Cell::new(ThreadMask::EMPTY));

/// Remaining sleep time for each slot, in milliseconds. Shared with
/// the timer tick.
///
static DELAYS: Mutex<Cell<[u16; MAX_THREADS]>> = Mutex::new(Cell::new([0; MAX_THREADS]));

/// The saved stack pointer of each slot.
///
/// The context-switch assembly stores the outgoing stack pointer here
/// and loads the incoming one, so this must be a plain array the
/// assembly can address. All Rust-side access happens inside critical
/// sections while the slot in question is not running.
///
struct StackCells(UnsafeCell<[*mut u8; MAX_THREADS]>);

unsafe impl Sync for StackCells {}

static STACKS: StackCells = StackCells(UnsafeCell::new([core::ptr::null_mut(); MAX_THREADS]));

/// Initialises the thread table.
///
/// After `init` returns, the calling context is slot 0 and every other
/// slot is disabled. On the device this runs before `main`; on a host
/// it is invoked through `kernel::init`, which may be called again to
/// reinitialise the kernel between tests.
///
pub fn init() {
    critical_section::with(|cs| {
        let stacks = unsafe { &mut *STACKS.0.get() };
        for i in 0..MAX_THREADS {
            stacks[i] = memlayout::stack_base_ptr(i);

            #[cfg(feature = "stack-canary")]
            unsafe {
                memlayout::canary_ptr(i).write_volatile(memlayout::STACK_CANARY)
            };
        }

        MASKS.borrow(cs).set(Masks::initial());
        DELAYED.borrow(cs).set(ThreadMask::EMPTY);
        DELAYS.borrow(cs).set([0; MAX_THREADS]);
    });

    #[cfg(not(target_arch = "avr"))]
    cpu::sim::reset();
}

/// Returns the id of the currently running thread.
///
pub fn current_thread() -> ThreadId {
    critical_section::with(|cs| MASKS.borrow(cs).get().current)
}

/// Creates a new thread in slot `id`, replacing whatever the slot
/// held before.
///
/// The new thread starts at `entry`, receives `id` and `arg` as its
/// arguments, and is created sleeping-free with its suspended state
/// set per `suspended`. Returns false if `id` names no slot.
///
/// If `id` is the calling thread's own slot, this call does not
/// return: the caller's stack has been reinitialised, so the scheduler
/// is entered without saving the calling context.
///
pub fn create_thread(id: ThreadId, entry: ThreadEntry, suspended: bool, arg: *mut c_void) -> bool {
    if !id.in_range() {
        return false;
    }

    create_impl(id, entry, suspended, arg);
    true
}

/// Replaces the calling thread with a new thread in the same slot.
/// Never returns.
///
/// Writing the new stack image only touches the top
/// [`INITIAL_STACK_USAGE`](memlayout::INITIAL_STACK_USAGE) bytes of the
/// region — the outermost frames of the old incarnation — and the
/// hand-off to the new thread goes through the scheduler entry that
/// saves nothing, so the calling frames are never used again.
///
pub fn replace_self(entry: ThreadEntry, suspended: bool, arg: *mut c_void) -> ! {
    create_impl(current_thread(), entry, suspended, arg);
    unreachable!("replaced thread kept running");
}

fn create_impl(id: ThreadId, entry: ThreadEntry, suspended: bool, arg: *mut c_void) {
    let sp = unsafe { stacks::prepare_frame(id, entry, arg) };

    let is_current = critical_section::with(|cs| {
        unsafe { (&mut *STACKS.0.get())[id.index()] = sp };

        let cell = MASKS.borrow(cs);
        let mut m = cell.get();
        m.disabled.clear(id.as_u8());
        if suspended {
            m.suspended.set(id.as_u8());
        } else {
            m.suspended.clear(id.as_u8());
        }
        cell.set(m);

        let delayed = DELAYED.borrow(cs);
        let mut mask = delayed.get();
        mask.clear(id.as_u8());
        delayed.set(mask);

        let delays = DELAYS.borrow(cs);
        let mut counters = delays.get();
        counters[id.index()] = 0;
        delays.set(counters);

        m.current == id
    });

    #[cfg(not(target_arch = "avr"))]
    {
        // ThreadId is repr(transparent) over u8, so the two entry
        // types have identical ABIs.
        let raw: cpu::sim::Entry = unsafe { core::mem::transmute(entry) };
        cpu::sim::on_create(id.index(), raw, arg);
    }

    if is_current {
        scheduler::switch_no_save();
    }
}

/// Disables the given thread. Its slot holds no valid context until a
/// new thread is created there.
///
/// If `id` is the calling thread's own slot, this call does not return.
/// Ids naming no slot are ignored.
///
pub fn disable(id: ThreadId) {
    if !id.in_range() {
        return;
    }

    let is_current = critical_section::with(|cs| {
        let cell = MASKS.borrow(cs);
        let mut m = cell.get();
        m.disabled.set(id.as_u8());
        cell.set(m);
        m.current == id
    });

    if is_current {
        scheduler::switch_no_save();
    }
}

/// Disables the calling thread. Never returns.
///
pub fn disable_self() -> ! {
    disable(current_thread());
    unreachable!("disabled thread kept running");
}

/// Suspends the given thread.
///
/// If `id` is the calling thread's own slot, this yields and returns
/// once the thread has been resumed and selected again. Ids naming no
/// slot are ignored.
///
pub fn suspend(id: ThreadId) {
    if !id.in_range() {
        return;
    }

    let is_current = critical_section::with(|cs| {
        let cell = MASKS.borrow(cs);
        let mut m = cell.get();
        m.suspended.set(id.as_u8());
        cell.set(m);
        m.current == id
    });

    if is_current {
        scheduler::switch();
    }
}

/// Suspends the calling thread. Returns once another thread (or an
/// interrupt handler) has resumed it and the scheduler selects it.
///
pub fn suspend_self() {
    suspend(current_thread());
}

/// Resumes the given thread, clearing its suspended state.
///
/// The resumed thread runs when the scheduler next reaches it; the
/// caller keeps the CPU. Ids naming no slot are ignored.
///
pub fn resume(id: ThreadId) {
    if !id.in_range() {
        return;
    }

    critical_section::with(|cs| {
        let cell = MASKS.borrow(cs);
        let mut m = cell.get();
        m.suspended.clear(id.as_u8());
        cell.set(m);
    });
}

/// Returns whether the given thread is enabled. An enabled thread is
/// not necessarily running: it may be suspended or sleeping.
///
pub fn thread_enabled(id: ThreadId) -> bool {
    id.in_range()
        && critical_section::with(|cs| !MASKS.borrow(cs).get().disabled.contains(id.as_u8()))
}

/// Returns whether the given thread is enabled, but suspended.
///
pub fn thread_suspended(id: ThreadId) -> bool {
    id.in_range()
        && critical_section::with(|cs| {
            let m = MASKS.borrow(cs).get();
            !m.disabled.contains(id.as_u8()) && m.suspended.contains(id.as_u8())
        })
}

/// Returns whether the given thread is enabled, but sleeping.
///
pub fn thread_sleeping(id: ThreadId) -> bool {
    id.in_range()
        && critical_section::with(|cs| {
            let m = MASKS.borrow(cs).get();
            !m.disabled.contains(id.as_u8()) && DELAYED.borrow(cs).get().contains(id.as_u8())
        })
}

/// Marks the calling thread as sleeping for `ms` milliseconds and
/// yields. Returns once the delay has elapsed and the scheduler
/// selects the thread again.
///
/// This is the primitive beneath the sleep API; `ms` must be
/// non-zero, as a delayed slot with a zero counter would never be
/// woken by the tick.
///
pub fn delay_current(ms: u16) {
    crate::kernel_assert!(ms > 0);

    critical_section::with(|cs| {
        let current = MASKS.borrow(cs).get().current;

        let delays = DELAYS.borrow(cs);
        let mut counters = delays.get();
        counters[current.index()] = ms;
        delays.set(counters);

        let delayed = DELAYED.borrow(cs);
        let mut mask = delayed.get();
        mask.set(current.as_u8());
        delayed.set(mask);
    });

    scheduler::switch();
}

/// Advances the sleep bookkeeping by one millisecond tick.
///
/// Called from the timer interrupt, inside the interrupt's critical
/// section: every delayed slot's counter is decremented, and slots
/// whose counter reaches zero stop being delayed in the same atomic
/// region.
///
pub fn clock_tick(cs: CriticalSection) {
    let delayed = DELAYED.borrow(cs);
    let mut mask = delayed.get();
    if mask.is_empty() {
        return;
    }

    let delays = DELAYS.borrow(cs);
    let mut counters = delays.get();
    for i in 0..MAX_THREADS {
        if mask.contains(i as u8) {
            crate::kernel_assert!(counters[i] > 0);
            counters[i] -= 1;
            if counters[i] == 0 {
                mask.clear(i as u8);
            }
        }
    }

    delays.set(counters);
    delayed.set(mask);
}

/// Returns the saved stack pointer of the given slot.
///
/// Debug aid for the hosted simulator; the value is stale for the
/// running slot.
///
#[cfg(not(target_arch = "avr"))]
pub fn saved_stack_pointer(id: ThreadId) -> *mut u8 {
    critical_section::with(|_| unsafe { (*STACKS.0.get())[id.index()] })
}
