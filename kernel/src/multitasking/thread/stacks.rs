// Copyright 2024 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Builds the initial stack image for fresh threads and manages the
//! stack canaries.
//!
//! A slot is entered by returning from the scheduler, so a fresh slot's
//! stack must look exactly like one that yielded: an 18-byte area for
//! the callee-saved registers, then a return address. For a fresh slot
//! the return address is the bootstrap, and above it sit the values the
//! bootstrap pops: the thread id, the argument, and the entry point.
//!
//! Relative to the saved stack pointer (which points at the first free
//! byte, one below the image):
//!
//! | Offset  | Contents                          |
//! | ------- | --------------------------------- |
//! | 1..=18  | callee-saved registers, arbitrary |
//! | 19..=20 | bootstrap address, high byte first |
//! | 21      | thread id                         |
//! | 22..=23 | argument, high byte first         |
//! | 24..=25 | entry point, high byte first      |

use crate::{ThreadEntry, ThreadId};
use core::ffi::c_void;
use memlayout::INITIAL_STACK_USAGE;

/// Writes the initial stack image for a fresh thread into the given
/// slot's stack region and returns the new saved stack pointer,
/// `base - INITIAL_STACK_USAGE`.
///
/// When the canary is configured it is rewritten as well, so a slot
/// whose previous occupant overflowed comes back clean.
///
/// # Safety
///
/// The slot's previous context becomes invalid; the caller must make
/// sure it is never resumed. `id` must name a real slot.
///
pub(crate) unsafe fn prepare_frame(id: ThreadId, entry: ThreadEntry, arg: *mut c_void) -> *mut u8 {
    let slot = id.as_u8() as usize;
    let base = memlayout::stack_base_ptr(slot);
    let sp = base.sub(INITIAL_STACK_USAGE as usize);

    // Code and data addresses are 16 bits wide on the target. The
    // simulator keeps the real entry pointer in its slot table, so
    // truncation there loses nothing.
    let entry_word = entry as usize as u16;
    let arg_word = arg as usize as u16;
    let boot_word = bootstrap_address();

    sp.add(19).write((boot_word >> 8) as u8);
    sp.add(20).write((boot_word & 0x00ff) as u8);
    sp.add(21).write(id.as_u8());
    sp.add(22).write((arg_word >> 8) as u8);
    sp.add(23).write((arg_word & 0x00ff) as u8);
    sp.add(24).write((entry_word >> 8) as u8);
    sp.add(25).write((entry_word & 0x00ff) as u8);
    // Bytes 1..=18 restore the callee-saved registers; their values
    // don't matter, they just need to be on the stack.

    #[cfg(feature = "stack-canary")]
    memlayout::canary_ptr(slot).write_volatile(memlayout::STACK_CANARY);

    sp
}

#[cfg(target_arch = "avr")]
fn bootstrap_address() -> u16 {
    crate::switch::thread_bootstrap as usize as u16
}

#[cfg(not(target_arch = "avr"))]
fn bootstrap_address() -> u16 {
    // The simulator never executes from the RAM image.
    0
}

/// Returns the location of the given slot's stack canary byte.
///
/// # Panics
///
/// Panics if `id` names no slot.
///
#[cfg(feature = "stack-canary")]
pub fn canary_location(id: ThreadId) -> *mut u8 {
    memlayout::canary_ptr(id.as_u8() as usize)
}

#[cfg(test)]
mod tests {
    use crate::testutil;
    use crate::{create_thread, ThreadId};
    use core::ffi::c_void;
    use memlayout::INITIAL_STACK_USAGE;

    extern "C" fn never_run(_id: ThreadId, _arg: *mut c_void) -> ! {
        unreachable!("test thread was scheduled");
    }

    #[test]
    fn frame_layout() {
        let _guard = testutil::hold();

        let arg = 0xabcd_usize as *mut c_void;
        assert!(create_thread(ThreadId::THREAD2, never_run, false, arg));

        let base = memlayout::stack_base_ptr(2);
        let sp = crate::saved_stack_pointer(ThreadId::THREAD2);
        assert_eq!(base as usize - sp as usize, INITIAL_STACK_USAGE as usize);

        unsafe {
            assert_eq!(sp.add(21).read(), 2);
            assert_eq!(sp.add(22).read(), 0xab);
            assert_eq!(sp.add(23).read(), 0xcd);

            let entry_word = never_run as usize as u16;
            assert_eq!(sp.add(24).read(), (entry_word >> 8) as u8);
            assert_eq!(sp.add(25).read(), (entry_word & 0xff) as u8);
        }
    }

    #[cfg(feature = "stack-canary")]
    #[test]
    fn create_rewrites_the_canary() {
        let _guard = testutil::hold();

        let canary = super::canary_location(ThreadId::THREAD1);
        unsafe { canary.write(0x00) };

        assert!(create_thread(
            ThreadId::THREAD1,
            never_run,
            false,
            core::ptr::null_mut()
        ));
        assert_eq!(unsafe { canary.read() }, memlayout::STACK_CANARY);
    }

    #[cfg(feature = "stack-canary")]
    #[test]
    fn init_writes_every_canary() {
        let _guard = testutil::hold();

        for i in 0..memlayout::MAX_THREADS {
            assert_eq!(
                unsafe { memlayout::canary_ptr(i).read() },
                memlayout::STACK_CANARY
            );
        }
    }
}
